//! The capability surface: every operation a ritual may call on `V`, held in
//! one lookup table and registered into the engine from it.

pub mod audio;
pub mod dom;
pub mod fx;
pub mod graphics;
pub mod input;
pub mod scare;
pub mod utility;

use std::collections::HashSet;

use bevy::log::debug;
use rhai::{Dynamic, Engine};
use serde::Serialize;

use crate::config::SandboxConfig;
use crate::engine::{register_variadic, Args, RitualApi, MAX_ARGS};
use crate::page::ElementId;
use crate::registry::VoiceId;
use crate::state::{SandboxState, Shared};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Audio,
    Fx,
    Crt,
    Scene3d,
    Canvas,
    Dom,
    Page,
    Text,
    Input,
    Choice,
    Scare,
    Capture,
    Utility,
}

impl Category {
    pub const ALL: [Category; 13] = [
        Category::Audio,
        Category::Fx,
        Category::Crt,
        Category::Scene3d,
        Category::Canvas,
        Category::Dom,
        Category::Page,
        Category::Text,
        Category::Input,
        Category::Choice,
        Category::Scare,
        Category::Capture,
        Category::Utility,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::Audio => "audio",
            Category::Fx => "fx",
            Category::Crt => "crt",
            Category::Scene3d => "scene3d",
            Category::Canvas => "canvas",
            Category::Dom => "dom",
            Category::Page => "page",
            Category::Text => "text",
            Category::Input => "input",
            Category::Choice => "choice",
            Category::Scare => "scare",
            Category::Capture => "capture",
            Category::Utility => "utility",
        }
    }
}

/// What a handler sees of the running ritual.
pub struct Invocation<'a> {
    pub engine: &'a Engine,
    pub state: &'a Shared,
}

pub type Handler = fn(&Invocation, &Args) -> Dynamic;

#[derive(Clone, Copy)]
pub struct CapabilityEntry {
    pub name: &'static str,
    pub category: Category,
    /// Shown in the catalog.
    pub usage: &'static str,
    pub handler: Handler,
}

impl CapabilityEntry {
    pub const fn new(
        name: &'static str,
        category: Category,
        usage: &'static str,
        handler: Handler,
    ) -> Self {
        Self {
            name,
            category,
            usage,
            handler,
        }
    }
}

pub fn noop(_: &Invocation, _: &Args) -> Dynamic {
    Dynamic::UNIT
}

/// Every entry, in catalog order.
pub fn entries() -> Vec<CapabilityEntry> {
    [
        audio::ENTRIES,
        fx::ENTRIES,
        graphics::ENTRIES,
        dom::ENTRIES,
        input::ENTRIES,
        scare::ENTRIES,
        utility::ENTRIES,
    ]
    .concat()
}

#[derive(Clone, Debug, Serialize)]
pub struct CatalogLine {
    pub category: Category,
    pub usage: Vec<&'static str>,
}

pub struct CapabilityTable {
    entries: Vec<CapabilityEntry>,
    disabled: HashSet<&'static str>,
    capture_enabled: bool,
}

const CAPTURE_USAGE: [&str; 3] = ["capture.start()", "capture.stop()", "capture.snapshot()"];

impl Default for CapabilityTable {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

impl CapabilityTable {
    /// Config entries may name single capabilities or whole categories.
    pub fn from_config(config: &SandboxConfig) -> Self {
        let wanted: Vec<String> = config
            .disabled_capabilities
            .iter()
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .collect();
        let entries = entries();
        let disabled = entries
            .iter()
            .filter(|entry| {
                wanted.iter().any(|name| {
                    *name == entry.name.to_ascii_lowercase()
                        || *name == entry.category.name()
                        || (name == "webcam" && entry.category == Category::Capture)
                })
            })
            .map(|entry| entry.name)
            .collect();
        let capture_enabled = !wanted
            .iter()
            .any(|name| name == "webcam" || name == Category::Capture.name());
        Self {
            entries,
            disabled,
            capture_enabled,
        }
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.is_known(name) && !self.disabled.contains(name)
    }

    /// The handler for `name`; the no-op when missing or disabled.
    pub fn resolve(&self, name: &str) -> Handler {
        self.entries
            .iter()
            .find(|entry| entry.name == name && !self.disabled.contains(entry.name))
            .map_or(noop as Handler, |entry| entry.handler)
    }

    pub fn register(&self, engine: &mut Engine) {
        for entry in &self.entries {
            let handler = self.resolve(entry.name);
            register_variadic(
                engine,
                entry.name,
                move |engine: &Engine, api: RitualApi, args: Args| {
                    handler(
                        &Invocation {
                            engine,
                            state: &api.state,
                        },
                        &args,
                    )
                },
            );
        }
        debug!(
            "[Ritual capabilities] Registered {} entries ({} disabled)",
            self.entries.len(),
            self.disabled.len()
        );
    }

    /// Bind an unrecognized name so calling it succeeds and does nothing.
    pub fn register_noop(engine: &mut Engine, name: &str) {
        register_variadic(engine, name, |_: &Engine, _api: RitualApi, _args: Args| {
            Dynamic::UNIT
        });
    }

    pub fn catalog_lines(&self) -> Vec<CatalogLine> {
        Category::ALL
            .iter()
            .filter_map(|&category| {
                if category == Category::Capture {
                    return self.capture_enabled.then(|| CatalogLine {
                        category,
                        usage: CAPTURE_USAGE.to_vec(),
                    });
                }
                let usage: Vec<&'static str> = self
                    .entries
                    .iter()
                    .filter(|entry| entry.category == category)
                    .filter(|entry| !self.disabled.contains(entry.name))
                    .map(|entry| entry.usage)
                    .filter(|usage| !usage.is_empty())
                    .collect();
                (!usage.is_empty()).then_some(CatalogLine { category, usage })
            })
            .collect()
    }

    /// API reference text for prompt construction, one line per category
    /// followed by the argument limit.
    pub fn catalog(&self) -> String {
        let mut lines: Vec<String> = self
            .catalog_lines()
            .iter()
            .map(|line| format!("{}: {}", line.category.name(), line.usage.join(", ")))
            .collect();
        lines.push(format!("calls: at most {MAX_ARGS} arguments each"));
        lines.join("\n")
    }
}

/// Catalog for the default configuration.
pub fn catalog() -> String {
    CapabilityTable::default().catalog()
}

/// One deferred step of a multi-step effect.
#[derive(Clone, Debug, PartialEq)]
pub enum EffectStep {
    /// Set inline properties; an empty value clears one.
    Restyle {
        element: ElementId,
        props: Vec<(String, String)>,
    },
    AddClass {
        element: ElementId,
        class: String,
    },
    RemoveClass {
        element: ElementId,
        class: String,
    },
    Remove {
        elements: Vec<ElementId>,
    },
    ShakeJitter {
        intensity: f64,
    },
    StrobeToggle,
    RainStep {
        elements: Vec<ElementId>,
        glyphs: Vec<char>,
    },
    ScrambleStep {
        element: ElementId,
        original: String,
        started_ms: u64,
        duration_ms: u64,
        group: String,
    },
    BsodProgress {
        element: ElementId,
    },
    TypewriterStep,
    Uncrash,
    FinishUncrash,
    HideOptions,
    Unmorph,
    StopDrone {
        voice: VoiceId,
    },
    CancelGroup {
        group: String,
    },
}

impl EffectStep {
    pub fn restyle(element: ElementId, props: &[(&str, &str)]) -> Self {
        EffectStep::Restyle {
            element,
            props: props
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

pub fn run_effect_step(state: &mut SandboxState, step: EffectStep) {
    match step {
        EffectStep::Restyle { element, props } => {
            for (prop, value) in props {
                state.page.set_style(element, &prop, &value);
            }
        }
        EffectStep::AddClass { element, class } => {
            if let Some(el) = state.page.get_mut(element) {
                el.add_class(&class);
            }
        }
        EffectStep::RemoveClass { element, class } => {
            if let Some(el) = state.page.get_mut(element) {
                el.remove_class(&class);
            }
        }
        EffectStep::Remove { elements } => {
            for element in elements {
                state.page.remove(element);
            }
        }
        EffectStep::ShakeJitter { intensity } => fx::shake_step(state, intensity),
        EffectStep::StrobeToggle => fx::strobe_step(state),
        EffectStep::RainStep { elements, glyphs } => fx::rain_step(state, &elements, &glyphs),
        EffectStep::ScrambleStep {
            element,
            original,
            started_ms,
            duration_ms,
            group,
        } => dom::scramble_step(state, element, &original, started_ms, duration_ms, &group),
        EffectStep::BsodProgress { element } => scare::bsod_step(state, element),
        EffectStep::TypewriterStep => dom::typewriter_step(state),
        EffectStep::Uncrash => scare::uncrash(state),
        EffectStep::FinishUncrash => scare::finish_uncrash(state),
        EffectStep::HideOptions => {
            if state.fx.options_active {
                input::hide_options(state);
            }
        }
        EffectStep::Unmorph => fx::unmorph(state),
        EffectStep::StopDrone { voice } => {
            state.stop_drone(voice);
        }
        EffectStep::CancelGroup { group } => {
            state.timers.cancel_group(&group);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let entries = entries();
        let mut seen = HashSet::new();
        for entry in &entries {
            assert!(seen.insert(entry.name), "duplicate capability {}", entry.name);
        }
        assert!(entries.len() > 80);
    }

    #[test]
    fn disabled_names_and_categories_resolve_to_noop() {
        let config = SandboxConfig {
            disabled_capabilities: vec!["Audio".to_string(), "crash".to_string()],
            ..SandboxConfig::default()
        };
        let table = CapabilityTable::from_config(&config);
        assert!(table.is_known("tone"));
        assert!(!table.is_enabled("tone"));
        assert!(!table.is_enabled("drone"));
        assert!(!table.is_enabled("crash"));
        assert!(table.is_enabled("bsod"));
        assert!(!table.is_known("summonDemon"));
        assert_eq!(table.resolve("tone") as usize, noop as usize);
        assert_eq!(table.resolve("summonDemon") as usize, noop as usize);
        assert_ne!(table.resolve("bsod") as usize, noop as usize);
    }

    #[test]
    fn catalog_has_one_line_per_enabled_category_and_the_arg_limit() {
        let full = catalog();
        assert_eq!(full.lines().count(), Category::ALL.len() + 1);
        assert_eq!(full.lines().last(), Some("calls: at most 10 arguments each"));
        assert!(full.contains("capture: capture.start()"));
        assert!(full.lines().any(|line| line.starts_with("audio: tone(")));

        let config = SandboxConfig {
            disabled_capabilities: vec!["fx".to_string()],
            ..SandboxConfig::default()
        };
        let trimmed = CapabilityTable::from_config(&config).catalog();
        assert!(!trimmed.lines().any(|line| line.starts_with("fx:")));
    }
}
