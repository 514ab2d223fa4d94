//! State shared between the engine bindings, the executor and the watchdogs.

use std::cell::RefCell;
use std::rc::Rc;

use bevy::log::debug;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rhai::AST;

use crate::audio::{AudioLog, SynthAction};
use crate::capabilities::EffectStep;
use crate::config::SandboxConfig;
use crate::engine::ScriptCallback;
use crate::events::{EventBus, SandboxEvent};
use crate::executor::ErrorState;
use crate::page::guard::ProtectedSet;
use crate::page::{ElementId, Page};
use crate::registry::{
    CaptureDevice, CaptureRegistry, CanvasRegistry, Drone, DroneRegistry, DroneVoice,
    ListenerRegistry, SceneRegistry, TaskId, TaskOrigin, TimerRegistry, VoiceId,
};

pub type Shared = Rc<RefCell<SandboxState>>;

/// What a scheduled task does when it comes due.
#[derive(Clone)]
pub enum TaskAction {
    Callback(ScriptCallback),
    Tone(SynthAction),
    Effect(EffectStep),
}

pub struct RainDrop {
    pub element: ElementId,
    pub y: f64,
    pub speed: f64,
}

pub struct Typewriter {
    pub element: ElementId,
    pub chars: Vec<char>,
    pub pos: usize,
}

/// Bookkeeping for effects that animate across many ticks.
#[derive(Default)]
pub struct FxState {
    pub rain: Vec<RainDrop>,
    pub eyes: Vec<ElementId>,
    pub strobe_on: bool,
    pub portal: Option<ElementId>,
    pub typewriter: Option<Typewriter>,
    pub options_active: bool,
    next_group: u64,
}

impl FxState {
    /// A fresh task group name.
    pub fn group(&mut self, prefix: &str) -> String {
        self.next_group += 1;
        format!("{prefix}-{}", self.next_group)
    }
}

pub struct SandboxState {
    pub config: SandboxConfig,
    pub now_ms: u64,
    pub pointer: (f64, f64),
    pub processing: bool,
    pub page: Page,
    pub protected: ProtectedSet,
    pub audio: AudioLog,
    pub timers: TimerRegistry<TaskAction>,
    pub listeners: ListenerRegistry<ScriptCallback>,
    pub drones: DroneRegistry,
    pub scene: SceneRegistry,
    pub canvas: CanvasRegistry,
    pub capture: CaptureRegistry,
    pub fx: FxState,
    pub events: EventBus,
    pub errors: ErrorState,
    pub rng: SmallRng,
    /// The AST of whatever script is running; closures created now belong to it.
    pub current_ast: Option<Rc<AST>>,
}

impl SandboxState {
    pub fn new(config: SandboxConfig, device: Box<dyn CaptureDevice>) -> Self {
        let viewport = config.viewport;
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self {
            now_ms: 0,
            pointer: (viewport.width / 2.0, viewport.height / 2.0),
            processing: false,
            page: Page::new(viewport),
            protected: ProtectedSet::new(&config.protected_selectors),
            audio: AudioLog::default(),
            timers: TimerRegistry::new(config.max_scheduled_tasks),
            listeners: ListenerRegistry::new(config.max_listeners),
            drones: DroneRegistry::new(config.drones.clone()),
            scene: SceneRegistry::default(),
            canvas: CanvasRegistry::new(viewport.width, viewport.height),
            capture: CaptureRegistry::new(device),
            fx: FxState::default(),
            events: EventBus::default(),
            errors: ErrorState::default(),
            rng,
            current_ast: None,
            config,
        }
    }

    pub fn into_shared(self) -> Shared {
        Rc::new(RefCell::new(self))
    }

    pub fn random(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    pub fn random_range(&mut self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        self.rng.gen_range(low..high)
    }

    pub fn element(&self, id: &str) -> Option<ElementId> {
        self.page.by_id(id)
    }

    /// Whether a destructive operation on `id` must be refused.
    pub fn is_shielded(&self, id: ElementId) -> bool {
        self.protected.shields(&self.page, id)
    }

    pub fn emit(&mut self, event: SandboxEvent) {
        let now = self.now_ms;
        self.events.emit(now, event);
    }

    pub fn play(&mut self, action: SynthAction) {
        let now = self.now_ms;
        self.audio.push(now, action);
    }

    pub fn schedule_tone(&mut self, delay_ms: u64, group: Option<&str>, action: SynthAction) -> Option<TaskId> {
        let now = self.now_ms;
        self.timers
            .schedule(now, delay_ms, None, group, TaskOrigin::Effect, TaskAction::Tone(action))
    }

    pub fn schedule_effect(
        &mut self,
        delay_ms: u64,
        period_ms: Option<u64>,
        group: Option<&str>,
        step: EffectStep,
    ) -> Option<TaskId> {
        let now = self.now_ms;
        self.timers
            .schedule(now, delay_ms, period_ms, group, TaskOrigin::Effect, TaskAction::Effect(step))
    }

    pub fn schedule_callback(
        &mut self,
        delay_ms: u64,
        period_ms: Option<u64>,
        callback: ScriptCallback,
    ) -> Option<TaskId> {
        let now = self.now_ms;
        self.timers.schedule(
            now,
            delay_ms,
            period_ms,
            None,
            TaskOrigin::Script,
            TaskAction::Callback(callback),
        )
    }

    pub fn register_drone(&mut self, kind: &'static str, voice: DroneVoice) -> VoiceId {
        let now = self.now_ms;
        let (id, evicted) = self.drones.register(now, kind, voice);
        for drone in evicted {
            self.release_drone(drone);
        }
        id
    }

    /// Idempotent: unknown or already-stopped voices are ignored.
    pub fn stop_drone(&mut self, id: VoiceId) -> bool {
        match self.drones.remove(id) {
            Some(drone) => {
                self.release_drone(drone);
                true
            }
            None => false,
        }
    }

    pub fn reap_drones(&mut self) -> usize {
        let now = self.now_ms;
        let evicted = self.drones.reap(now);
        let count = evicted.len();
        for drone in evicted {
            self.release_drone(drone);
        }
        count
    }

    pub fn stop_all_drones(&mut self) -> usize {
        let drones = self.drones.drain_all();
        let count = drones.len();
        for drone in drones {
            self.release_drone(drone);
        }
        count
    }

    fn release_drone(&mut self, drone: Drone) {
        debug!("[Ritual audio] Releasing {} voice {}", drone.kind, drone.id);
        match drone.voice {
            DroneVoice::Oscillator => self.play(SynthAction::DroneStop { voice: drone.id }),
            DroneVoice::Pattern { group } => {
                self.timers.cancel_group(&group);
            }
        }
    }

    /// Cancel every script-owned timer and listener.
    pub fn clear_script_work(&mut self) -> (usize, usize) {
        let timers = self
            .timers
            .cancel_where(|task| task.origin == TaskOrigin::Script);
        let listeners = self.listeners.clear();
        (timers, listeners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NoCaptureDevice;

    fn state() -> SandboxState {
        let config = SandboxConfig {
            seed: Some(7),
            ..SandboxConfig::default()
        };
        SandboxState::new(config, Box::new(NoCaptureDevice))
    }

    #[test]
    fn evicted_oscillators_emit_stop_events() {
        let mut state = state();
        let first = state.register_drone("drone", DroneVoice::Oscillator);
        for _ in 0..6 {
            state.register_drone("drone", DroneVoice::Oscillator);
        }
        assert_eq!(state.drones.len(), 6);
        assert!(!state.drones.contains(first));
        assert!(state
            .audio
            .recent()
            .iter()
            .any(|event| event.action == SynthAction::DroneStop { voice: first }));
    }

    #[test]
    fn stopping_a_pattern_cancels_its_group() {
        let mut state = state();
        let group = state.fx.group("arp");
        for i in 0..4 {
            state.schedule_tone(
                i * 100,
                Some(&group),
                SynthAction::Tone {
                    freq: 440.0,
                    duration_s: 0.1,
                    wave: crate::audio::Waveform::Sine,
                    volume: 0.1,
                },
            );
        }
        let voice = state.register_drone("arp", DroneVoice::Pattern { group: group.clone() });
        assert!(state.stop_drone(voice));
        assert!(!state.timers.has_group(&group));
        assert!(!state.stop_drone(voice));
    }

    #[test]
    fn seeded_randomness_is_repeatable() {
        let mut a = state();
        let mut b = state();
        assert_eq!(a.random(), b.random());
        let r = a.random_range(80.0, 2080.0);
        assert!((80.0..2080.0).contains(&r));
        assert_eq!(a.random_range(5.0, 5.0), 5.0);
    }
}
