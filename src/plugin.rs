use bevy::prelude::*;

use crate::config::SandboxConfig;
use crate::executor::Outcome;
use crate::sandbox::Sandbox;

/// The sandbox lives on the main thread; its engine and shared state are `!Send`.
pub struct RitualSandbox(pub Sandbox);

/// Ask the sandbox to run a ritual on the next update.
#[derive(Event, Clone, Debug)]
pub struct RitualRequest {
    pub code: String,
    pub label: String,
}

impl RitualRequest {
    pub fn new(code: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            label: label.into(),
        }
    }
}

#[derive(Event, Clone, Debug)]
pub struct RitualCompleted {
    pub label: String,
    pub outcome: Outcome,
}

#[derive(Default)]
pub struct RitualPlugin {
    pub config: SandboxConfig,
}

impl RitualPlugin {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }
}

impl Plugin for RitualPlugin {
    fn build(&self, app: &mut App) {
        app.insert_non_send_resource(RitualSandbox(Sandbox::new(self.config.clone())))
            .add_event::<RitualRequest>()
            .add_event::<RitualCompleted>()
            .add_systems(Update, (run_ritual_requests, tick_sandbox).chain());
    }
}

/// Rituals run one at a time, in submission order.
fn run_ritual_requests(
    mut requests: EventReader<RitualRequest>,
    mut completed: EventWriter<RitualCompleted>,
    mut sandbox: NonSendMut<RitualSandbox>,
) {
    for request in requests.read() {
        let outcome = sandbox.0.execute(&request.code, &request.label);
        completed.send(RitualCompleted {
            label: request.label.clone(),
            outcome,
        });
    }
}

fn tick_sandbox(time: Res<Time>, mut sandbox: NonSendMut<RitualSandbox>) {
    let now_ms = u64::try_from(time.elapsed().as_millis()).unwrap_or(u64::MAX);
    sandbox.0.tick(now_ms);
}
