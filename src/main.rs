use bevy::app::ScheduleRunnerPlugin;
use bevy::log::LogPlugin;
use bevy::prelude::*;
use std::time::Duration;

use ritual_sandbox::api::ApiPlugin;
use ritual_sandbox::config::load_sandbox_config;
use ritual_sandbox::watcher::RitualWatcherPlugin;
use ritual_sandbox::RitualPlugin;

fn main() {
    let config = load_sandbox_config();
    println!(
        "[Ritual] Starting headless sandbox ({} ops per ritual, {} drones max)",
        config.engine.max_operations, config.drones.max_concurrent
    );

    App::new()
        .add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(
            Duration::from_secs_f64(1.0 / 60.0),
        )))
        .add_plugins(LogPlugin::default())
        .add_plugins(RitualPlugin::new(config))
        .add_plugins(ApiPlugin::default())
        .add_plugins(RitualWatcherPlugin::default())
        .run();
}
