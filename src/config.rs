use serde::{Deserialize, Serialize};

pub const DEFAULT_RHAI_MAX_OPERATIONS: u64 = 500_000;
pub const DEFAULT_RHAI_MAX_CALL_LEVELS: usize = 64;
pub const DEFAULT_MAX_STRING_SIZE: usize = 256 * 1024;
pub const DEFAULT_MAX_COLLECTION_SIZE: usize = 10_000;
pub const DEFAULT_MAX_CONCURRENT_DRONES: usize = 6;
pub const DEFAULT_MAX_DRONE_AGE_MS: u64 = 30_000;
pub const DEFAULT_FRAME_ERROR_BUDGET: u32 = 5;
pub const DEFAULT_MAX_SCHEDULED_TASKS: usize = 4096;
pub const DEFAULT_MAX_LISTENERS: usize = 256;

const DEFAULT_CONFIG_PATH: &str = "ritual.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_RHAI_MAX_OPERATIONS,
            max_call_levels: DEFAULT_RHAI_MAX_CALL_LEVELS,
            max_string_size: DEFAULT_MAX_STRING_SIZE,
            max_array_size: DEFAULT_MAX_COLLECTION_SIZE,
            max_map_size: DEFAULT_MAX_COLLECTION_SIZE,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DroneLimits {
    pub max_concurrent: usize,
    pub max_age_ms: u64,
}

impl Default for DroneLimits {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT_DRONES,
            max_age_ms: DEFAULT_MAX_DRONE_AGE_MS,
        }
    }
}

/// Periods and grace windows for the supervisor loops, all in milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub readability_period_ms: u64,
    pub readability_grace_ms: u64,
    pub input_period_ms: u64,
    pub input_gone_grace_ms: u64,
    pub input_distorted_grace_ms: u64,
    pub scare_period_ms: u64,
    pub crash_ceiling_ms: u64,
    pub error_overlay_ceiling_ms: u64,
    pub reaper_period_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            readability_period_ms: 2000,
            readability_grace_ms: 8000,
            input_period_ms: 1200,
            input_gone_grace_ms: 5000,
            input_distorted_grace_ms: 8000,
            scare_period_ms: 3000,
            crash_ceiling_ms: 10_000,
            error_overlay_ceiling_ms: 12_000,
            reaper_period_ms: 5000,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
        }
    }
}

impl Viewport {
    pub fn is_mobile(&self) -> bool {
        self.width < 600.0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub engine: EngineLimits,
    pub drones: DroneLimits,
    pub frame_error_budget: u32,
    pub watchdogs: WatchdogConfig,
    pub viewport: Viewport,
    /// Extra selectors added to the built-in protected set.
    pub protected_selectors: Vec<String>,
    /// Capability names or category names (e.g. `capture`) that resolve to a no-op.
    pub disabled_capabilities: Vec<String>,
    pub max_scheduled_tasks: usize,
    pub max_listeners: usize,
    pub seed: Option<u64>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            engine: EngineLimits::default(),
            drones: DroneLimits::default(),
            frame_error_budget: DEFAULT_FRAME_ERROR_BUDGET,
            watchdogs: WatchdogConfig::default(),
            viewport: Viewport::default(),
            protected_selectors: Vec::new(),
            disabled_capabilities: Vec::new(),
            max_scheduled_tasks: DEFAULT_MAX_SCHEDULED_TASKS,
            max_listeners: DEFAULT_MAX_LISTENERS,
            seed: None,
        }
    }
}

impl SandboxConfig {
    pub fn from_json(contents: &str) -> Result<Self, String> {
        serde_json::from_str::<SandboxConfig>(contents).map_err(|e| e.to_string())
    }

    pub fn load(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path).map_err(|e| format!("{path}: {e}"))?;
        Self::from_json(&contents).map_err(|e| format!("{path}: {e}"))
    }

    /// Environment variables win over file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(ops) = env_parse::<u64>("RITUAL_MAX_OPERATIONS") {
            self.engine.max_operations = ops;
        }
        if let Some(levels) = env_parse::<usize>("RITUAL_MAX_CALL_LEVELS") {
            self.engine.max_call_levels = levels;
        }
        if let Some(seed) = env_parse::<u64>("RITUAL_SEED") {
            self.seed = Some(seed);
        }
        if let Ok(list) = std::env::var("RITUAL_DISABLED_CAPABILITIES") {
            self.disabled_capabilities.extend(
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            );
        }
        if let Ok(size) = std::env::var("RITUAL_VIEWPORT") {
            if let Some((w, h)) = size.trim().split_once('x') {
                if let (Ok(w), Ok(h)) = (w.parse::<f64>(), h.parse::<f64>()) {
                    self.viewport = Viewport {
                        width: w.max(1.0),
                        height: h.max(1.0),
                    };
                }
            }
        }
        self.engine.max_operations = self.engine.max_operations.max(10_000);
        self.engine.max_call_levels = self.engine.max_call_levels.max(8);
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

/// Resolve the config file (`RITUAL_CONFIG` or `ritual.json`), falling back to defaults.
pub fn load_sandbox_config() -> SandboxConfig {
    let path = std::env::var("RITUAL_CONFIG")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let base = if std::path::Path::new(&path).exists() {
        match SandboxConfig::load(&path) {
            Ok(cfg) => {
                println!("[Ritual] Loaded sandbox config from {}", path);
                cfg
            }
            Err(e) => {
                eprintln!("[Ritual] Failed to parse {}", e);
                SandboxConfig::default()
            }
        }
    } else {
        SandboxConfig::default()
    };
    base.with_env_overrides()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = SandboxConfig::from_json(r#"{"drones": {"max_concurrent": 3}, "seed": 9}"#)
            .expect("config should parse");
        assert_eq!(cfg.drones.max_concurrent, 3);
        assert_eq!(cfg.drones.max_age_ms, DEFAULT_MAX_DRONE_AGE_MS);
        assert_eq!(cfg.engine.max_operations, DEFAULT_RHAI_MAX_OPERATIONS);
        assert_eq!(cfg.watchdogs.input_period_ms, 1200);
        assert_eq!(cfg.seed, Some(9));
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = SandboxConfig::from_json("{ not json").expect_err("should fail");
        assert!(!err.is_empty());
    }

    #[test]
    fn mobile_threshold() {
        let narrow = Viewport {
            width: 390.0,
            height: 844.0,
        };
        assert!(narrow.is_mobile());
        assert!(!Viewport::default().is_mobile());
    }
}
