pub mod canvas;
pub mod capture;
pub mod drones;
pub mod listeners;
pub mod scene;
pub mod timers;

use serde::Serialize;

pub use canvas::{CanvasRegistry, CanvasStats, DrawCommand};
pub use capture::{CaptureDevice, CaptureRegistry, CaptureStats, NoCaptureDevice, TestPatternCamera};
pub use drones::{Drone, DroneRegistry, DroneStats, DroneVoice, VoiceId};
pub use listeners::{Listener, ListenerId, ListenerRegistry};
pub use scene::{SceneRegistry, SceneStats};
pub use timers::{ScheduledTask, TaskId, TaskOrigin, TimerRegistry};

/// Counters for every registry, as reported to the orchestrator.
#[derive(Clone, Debug, Serialize)]
pub struct RegistryStats {
    pub drones: DroneStats,
    pub scene: SceneStats,
    pub canvas: CanvasStats,
    pub capture: CaptureStats,
    pub scheduled_tasks: usize,
    pub script_tasks: usize,
    pub listeners: usize,
}
