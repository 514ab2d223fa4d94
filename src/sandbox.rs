//! The assembled sandbox: one engine, one shared state, the capability table
//! and the watchdogs, driven by `execute` and `tick`.

use bevy::log::{debug, info, warn};
use rhai::{Dynamic, Engine, Map};

use crate::audio::SynthEvent;
use crate::capabilities::{fx, graphics, input, run_effect_step, utility, CapabilityTable};
use crate::config::SandboxConfig;
use crate::engine::{build_engine, invoke, json_to_dynamic, ScriptCallback};
use crate::events::{EventRecord, SandboxEvent};
use crate::executor::{self, ErrorState, Outcome};
use crate::page::PageSnapshot;
use crate::registry::{CaptureDevice, NoCaptureDevice, RegistryStats, TaskOrigin};
use crate::state::{SandboxState, Shared, TaskAction};
use crate::watchdog::Watchdogs;

/// Most due tasks run in one tick; the rest wait for the next.
const MAX_TASKS_PER_TICK: usize = 1024;

pub struct Sandbox {
    engine: Engine,
    table: CapabilityTable,
    state: Shared,
    watchdogs: Watchdogs,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self::with_capture_device(config, Box::new(NoCaptureDevice))
    }

    pub fn with_capture_device(config: SandboxConfig, device: Box<dyn CaptureDevice>) -> Self {
        let table = CapabilityTable::from_config(&config);
        let watchdogs = Watchdogs::new(config.watchdogs.clone());
        let state = SandboxState::new(config, device).into_shared();
        let engine = build_engine(&state, &table);
        info!(
            "[Ritual] Sandbox ready ({} capability categories)",
            table.catalog_lines().len()
        );
        Self {
            engine,
            table,
            state,
            watchdogs,
        }
    }

    pub fn table(&self) -> &CapabilityTable {
        &self.table
    }

    /// Run one ritual and publish its outcome on the event bus.
    pub fn execute(&mut self, code: &str, label: &str) -> Outcome {
        executor::prepare(&mut self.engine, &self.table, code);
        let outcome = executor::run(&self.engine, &self.state, code, label);
        self.state.borrow_mut().emit(SandboxEvent::RitualFinished {
            label: label.to_string(),
            outcome: outcome.clone(),
        });
        outcome
    }

    /// Advance the clock to `now_ms` (never backwards) and run everything
    /// that is due: scheduled tasks, the 3D frame, the canvas frame, then
    /// the watchdogs.
    pub fn tick(&mut self, now_ms: u64) {
        let now = {
            let mut state = self.state.borrow_mut();
            state.now_ms = state.now_ms.max(now_ms);
            state.page.clock_ms = state.now_ms;
            state.now_ms
        };
        self.run_due_tasks(now);
        graphics::run_scene_frame(&self.engine, &self.state);
        graphics::run_canvas_frame(&self.engine, &self.state);
        let mut state = self.state.borrow_mut();
        self.watchdogs.run(&mut state);
    }

    fn run_due_tasks(&mut self, now: u64) {
        for _ in 0..MAX_TASKS_PER_TICK {
            let Some(task) = self.state.borrow_mut().timers.pop_due(now) else {
                return;
            };
            match task.action {
                TaskAction::Callback(callback) => {
                    if let Err(message) = invoke(&self.engine, &self.state, &callback, ()) {
                        warn!("[Ritual timers] Task {} failed: {}", task.id, message);
                    }
                }
                TaskAction::Tone(action) => self.state.borrow_mut().play(action),
                TaskAction::Effect(step) => run_effect_step(&mut self.state.borrow_mut(), step),
            }
        }
        debug!("[Ritual timers] Task budget spent, deferring the rest");
    }

    pub fn now_ms(&self) -> u64 {
        self.state.borrow().now_ms
    }

    pub fn error_state(&self) -> ErrorState {
        self.state.borrow().errors.clone()
    }

    pub fn reset_error_count(&mut self) {
        let mut state = self.state.borrow_mut();
        state.errors.consecutive_errors = 0;
        state.errors.last_error = None;
    }

    /// New pointer position; the googly eyes follow it.
    pub fn set_pointer(&mut self, x: f64, y: f64) {
        let mut state = self.state.borrow_mut();
        state.pointer = (x, y);
        fx::point_eyes(&mut state);
    }

    /// Whether the host is mid-request. While set, the input watchdog leaves
    /// a disabled prompt alone.
    pub fn set_processing(&mut self, active: bool) {
        self.state.borrow_mut().processing = active;
    }

    /// Deliver a host event to every matching listener. Returns how many
    /// listeners ran.
    pub fn dispatch_event(&mut self, name: &str, payload: &serde_json::Value) -> usize {
        let callbacks = {
            let state = self.state.borrow();
            state
                .listeners
                .matching(name, |id| state.page.is_connected(id))
        };
        if callbacks.is_empty() {
            return 0;
        }
        let event = event_object(name, payload);
        for callback in &callbacks {
            let result = if takes_argument(callback) {
                invoke(&self.engine, &self.state, callback, (event.clone(),))
            } else {
                invoke(&self.engine, &self.state, callback, ())
            };
            if let Err(message) = result {
                warn!("[Ritual listeners] '{}' handler failed: {}", name, message);
            }
        }
        callbacks.len()
    }

    pub fn select_option(&mut self, label: &str) -> bool {
        input::select_option(&mut self.state.borrow_mut(), label)
    }

    /// Events published since the last drain.
    pub fn drain_events(&mut self) -> Vec<EventRecord> {
        self.state.borrow_mut().events.drain_new()
    }

    pub fn recent_events(&self) -> Vec<EventRecord> {
        self.state.borrow().events.recent.iter().cloned().collect()
    }

    pub fn events_since(&self, seq: u64) -> Vec<EventRecord> {
        self.state.borrow().events.since(seq)
    }

    pub fn page_snapshot(&self) -> PageSnapshot {
        self.state.borrow().page.snapshot()
    }

    pub fn audio_events(&self) -> Vec<SynthEvent> {
        self.state.borrow().audio.recent().to_vec()
    }

    pub fn drain_audio(&mut self) -> Vec<SynthEvent> {
        self.state.borrow_mut().audio.drain()
    }

    pub fn registry_stats(&self) -> RegistryStats {
        let state = self.state.borrow();
        RegistryStats {
            drones: state.drones.stats(),
            scene: state.scene.stats(),
            canvas: state.canvas.stats(),
            capture: state.capture.stats(),
            scheduled_tasks: state.timers.len(),
            script_tasks: state.timers.count_origin(TaskOrigin::Script),
            listeners: state.listeners.len(),
        }
    }

    pub fn watchdog_heals(&self) -> u64 {
        self.watchdogs.heals
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        let Ok(mut state) = self.state.try_borrow_mut() else {
            return;
        };
        utility::purge(&mut state);
        state.timers.cancel_where(|_| true);
        state.capture.stop();
        state.current_ast = None;
    }
}

/// The value listeners receive: the payload's fields plus `type`.
fn event_object(name: &str, payload: &serde_json::Value) -> Dynamic {
    let mut map = match json_to_dynamic(payload).try_cast::<Map>() {
        Some(map) => map,
        None => {
            let mut map = Map::new();
            if !payload.is_null() {
                map.insert("detail".into(), json_to_dynamic(payload));
            }
            map
        }
    };
    map.entry("type".into())
        .or_insert_with(|| Dynamic::from(name.to_string()));
    Dynamic::from_map(map)
}

/// Whether the closure declares a parameter beyond its captured variables.
fn takes_argument(callback: &ScriptCallback) -> bool {
    let name = callback.fn_ptr.fn_name();
    let curried = callback.fn_ptr.curry().len();
    callback
        .ast
        .iter_functions()
        .find(|f| f.name == name)
        .map_or(false, |f| f.params.len() > curried)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SynthAction;
    use crate::registry::TestPatternCamera;
    use serde_json::json;

    fn sandbox() -> Sandbox {
        Sandbox::new(SandboxConfig {
            seed: Some(3),
            ..SandboxConfig::default()
        })
    }

    fn advance(sandbox: &mut Sandbox, until_ms: u64, step_ms: u64) {
        let mut now = sandbox.now_ms();
        while now < until_ms {
            now += step_ms;
            sandbox.tick(now);
        }
    }

    #[test]
    fn seven_drones_leave_six_alive() {
        let mut sandbox = sandbox();
        let outcome = sandbox.execute(
            "for i in 0..7 { V.drone(220, \"sine\", 0.05); }",
            "drones",
        );
        assert_eq!(outcome, Outcome::Success);
        let stats = sandbox.registry_stats();
        assert_eq!(stats.drones.live, 6);
        assert!(sandbox
            .audio_events()
            .iter()
            .any(|event| event.action == SynthAction::DroneStop { voice: 1 }));
    }

    #[test]
    fn unknown_capability_succeeds_quietly() {
        let mut sandbox = sandbox();
        let before = sandbox.page_snapshot().element_count;
        assert_eq!(sandbox.execute("V.summonEldritchHorror(9);", "unknown"), Outcome::Success);
        assert_eq!(sandbox.page_snapshot().element_count, before);
    }

    #[test]
    fn protected_targets_survive() {
        let mut sandbox = sandbox();
        let outcome = sandbox.execute(
            "V.remove(\"body\"); V.setStyle(\"html\", \"display\", \"none\");",
            "denylist",
        );
        assert_eq!(outcome, Outcome::Success);
        let snapshot = sandbox.page_snapshot();
        assert!(snapshot.root.style.get("display").is_none());
        assert!(snapshot.root.children.iter().any(|child| child.tag == "body"));
    }

    #[test]
    fn blocked_rituals_are_announced() {
        let mut sandbox = sandbox();
        let outcome = sandbox.execute("document.write(\"gone\")", "doc");
        assert!(matches!(outcome, Outcome::Blocked { .. }));
        let events = sandbox.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0].event,
            SandboxEvent::RitualFinished { label, outcome: Outcome::Blocked { .. } } if label == "doc"
        ));
        assert!(sandbox.drain_events().is_empty());
    }

    #[test]
    fn errors_accumulate_and_reset() {
        let mut sandbox = sandbox();
        sandbox.execute("throw \"one\";", "a");
        sandbox.execute("throw \"two\";", "b");
        assert_eq!(sandbox.error_state().consecutive_errors, 2);
        sandbox.reset_error_count();
        assert_eq!(sandbox.error_state(), ErrorState::default());
    }

    #[test]
    fn intervals_run_on_tick_and_timeouts_once() {
        let mut sandbox = sandbox();
        sandbox.execute(
            r#"
            let n = 0;
            V.interval(|| { n += 1; V.title("n" + n); }, 100);
            V.setTimeout(|| V.favicon("!"), 250);
            "#,
            "timers",
        );
        advance(&mut sandbox, 500, 50);
        let snapshot = sandbox.page_snapshot();
        assert_eq!(snapshot.title, "n5");
        assert!(!snapshot.favicon.is_empty());
        assert_eq!(sandbox.registry_stats().script_tasks, 1);
    }

    #[test]
    fn shake_sequence_finishes_on_tick() {
        let mut sandbox = sandbox();
        sandbox.execute("V.shake(5, 300);", "shake");
        advance(&mut sandbox, 400, 16);
        let snapshot = sandbox.page_snapshot();
        let body = snapshot
            .root
            .children
            .iter()
            .find(|child| child.tag == "body")
            .expect("body");
        assert!(body.style.get("transform").is_none());
        assert_eq!(sandbox.registry_stats().scheduled_tasks, 0);
    }

    #[test]
    fn listeners_receive_event_objects() {
        let mut sandbox = sandbox();
        sandbox.execute(
            r#"
            V.on("keydown", |e| V.title(e["type"] + ":" + e.key));
            V.on("keydown", || V.cursor("none"));
            "#,
            "listen",
        );
        assert_eq!(sandbox.dispatch_event("keydown", &json!({ "key": "Escape" })), 2);
        assert_eq!(sandbox.dispatch_event("keyup", &json!({})), 0);
        let snapshot = sandbox.page_snapshot();
        assert_eq!(snapshot.title, "keydown:Escape");
        assert_eq!(snapshot.cursor, "none");
    }

    #[test]
    fn frames_run_each_tick_until_killed() {
        let mut sandbox = sandbox();
        sandbox.execute(
            "V.spawn3D(\"let cube = THREE.Mesh(THREE.BoxGeometry(1, 1, 1), THREE.MeshBasicMaterial()); scene.add(cube); return || { cube.rotation.x += 0.1; };\");",
            "scene",
        );
        advance(&mut sandbox, 48, 16);
        let stats = sandbox.registry_stats();
        assert!(stats.scene.live);
        sandbox.execute("V.kill3D();", "kill");
        assert!(!sandbox.registry_stats().scene.live);
    }

    #[test]
    fn forced_choice_round_trip() {
        let mut sandbox = sandbox();
        sandbox.execute("V.showOptions([\"left\", \"right\"]);", "choice");
        sandbox.drain_events();
        assert!(sandbox.select_option("right"));
        let events = sandbox.drain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].event,
            SandboxEvent::OptionSelected {
                label: "right".to_string()
            }
        );
    }

    #[test]
    fn crash_screen_is_gone_by_the_ceiling() {
        let mut sandbox = sandbox();
        sandbox.execute("V.crash(#{ title: \"FATAL\", duration: 60000 });", "crash");
        let crashed = |sandbox: &Sandbox| {
            sandbox
                .state
                .borrow()
                .element("crash-screen")
                .and_then(|id| sandbox.state.borrow().page.get(id).map(|el| el.has_class("active")))
                .unwrap_or(false)
        };
        assert!(crashed(&sandbox));
        advance(&mut sandbox, 11_000, 100);
        assert!(!crashed(&sandbox));
    }

    #[test]
    fn capture_restarts_release_the_old_stream() {
        let mut sandbox = Sandbox::with_capture_device(
            SandboxConfig::default(),
            Box::new(TestPatternCamera::new(32, 24)),
        );
        let outcome = sandbox.execute(
            r#"
            V.capture.start();
            V.capture.start();
            let shot = V.capture.snapshot();
            V.title(if shot.starts_with("data:image/jpeg;base64,") { "shot" } else { "none" });
            "#,
            "capture",
        );
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(sandbox.page_snapshot().title, "shot");
        let stats = sandbox.registry_stats().capture;
        assert_eq!(stats.streams_opened, 2);
        assert_eq!(stats.streams_closed, 1);
    }

    #[test]
    fn pointer_moves_are_visible_to_rituals() {
        let mut sandbox = sandbox();
        sandbox.set_pointer(12.0, 34.0);
        sandbox.execute("V.title(\"\" + mouseX.to_int() + \",\" + V.mouseY.to_int());", "pointer");
        assert_eq!(sandbox.page_snapshot().title, "12,34");
    }

    #[test]
    fn isolated_sandboxes_do_not_share_state() {
        let mut a = sandbox();
        let b = sandbox();
        a.execute("V.title(\"a\"); V.drone(80);", "a");
        assert_ne!(b.page_snapshot().title, "a");
        assert_eq!(b.registry_stats().drones.live, 0);
    }
}
