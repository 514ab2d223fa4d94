use bevy::prelude::*;
use crossbeam_channel::{Receiver, Sender};
use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};

use crate::plugin::RitualRequest;

const RITUAL_EXTENSIONS: [&str; 3] = ["rhai", "js", "ritual"];

/// Runs ritual files dropped into `RITUAL_WATCH_DIR`. Does nothing when unset.
pub struct RitualWatcherPlugin {
    pub dir: Option<PathBuf>,
}

impl Default for RitualWatcherPlugin {
    fn default() -> Self {
        Self {
            dir: std::env::var("RITUAL_WATCH_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}

pub struct RitualFile {
    pub label: String,
    pub code: String,
}

#[derive(Resource)]
pub struct RitualWatchReceiver(pub Receiver<RitualFile>);

impl Plugin for RitualWatcherPlugin {
    fn build(&self, app: &mut App) {
        let Some(dir) = self.dir.clone() else {
            return;
        };
        let (tx, rx) = crossbeam_channel::unbounded::<RitualFile>();
        app.insert_resource(RitualWatchReceiver(rx));

        std::thread::spawn(move || {
            if let Err(e) = run_watcher(tx, &dir) {
                eprintln!("[Ritual watcher] {e}");
            }
        });

        app.add_systems(Update, forward_ritual_files);
    }
}

fn run_watcher(tx: Sender<RitualFile>, dir: &Path) -> Result<(), String> {
    let root = dir.to_path_buf();
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                handle_fs_event(event, &tx, &root);
            }
        })
        .map_err(|e| format!("Failed to create watcher: {e}"))?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| format!("Failed to watch {}: {e}", dir.display()))?;
    println!("[Ritual watcher] Watching rituals: {}", dir.display());

    // The watcher stops when dropped.
    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}

fn handle_fs_event(event: NotifyEvent, tx: &Sender<RitualFile>, dir: &Path) {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }
    for path in &event.paths {
        if let Some(file) = ritual_from_path(path, dir) {
            let _ = tx.send(file);
        }
    }
}

/// Read `path` as a ritual if it is a ritual file directly inside `dir`.
pub fn ritual_from_path(path: &Path, dir: &Path) -> Option<RitualFile> {
    let ext = path.extension().and_then(|e| e.to_str())?.to_ascii_lowercase();
    if !RITUAL_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    let parent = path.parent()?;
    let same_dir = match (std::fs::canonicalize(parent), std::fs::canonicalize(dir)) {
        (Ok(a), Ok(b)) => a == b,
        _ => parent == dir,
    };
    if !same_dir {
        return None;
    }
    let code = std::fs::read_to_string(path).ok()?;
    let label = path.file_stem()?.to_str()?.to_string();
    Some(RitualFile { label, code })
}

fn forward_ritual_files(
    watcher: Option<Res<RitualWatchReceiver>>,
    mut requests: EventWriter<RitualRequest>,
) {
    let Some(watcher) = watcher else { return };

    for file in watcher.0.try_iter().take(16) {
        info!("[Ritual watcher] Running ritual: {}", file.label);
        requests.send(RitualRequest::new(file.code, file.label));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{RitualPlugin, RitualSandbox};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "ritual-watcher-{name}-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).expect("scratch dir");
        dir
    }

    #[test]
    fn only_ritual_files_in_the_watched_dir_are_read() {
        let dir = scratch_dir("filter");
        let ritual = dir.join("omen.rhai");
        std::fs::write(&ritual, "V.title(\"omen\");").expect("write ritual");
        let notes = dir.join("notes.txt");
        std::fs::write(&notes, "not a ritual").expect("write notes");

        let file = ritual_from_path(&ritual, &dir).expect("ritual file");
        assert_eq!(file.label, "omen");
        assert!(file.code.contains("omen"));
        assert!(ritual_from_path(&notes, &dir).is_none());
        assert!(ritual_from_path(&dir.join("missing.js"), &dir).is_none());

        let nested = dir.join("nested");
        std::fs::create_dir_all(&nested).expect("nested dir");
        let deep = nested.join("deep.ritual");
        std::fs::write(&deep, "let a = 1;").expect("write nested");
        assert!(ritual_from_path(&deep, &dir).is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn received_files_run_through_the_sandbox() {
        let (tx, rx) = crossbeam_channel::unbounded::<RitualFile>();
        let mut app = App::new();
        app.add_plugins(MinimalPlugins)
            .add_plugins(RitualPlugin::default())
            .insert_resource(RitualWatchReceiver(rx))
            .add_systems(Update, forward_ritual_files);

        tx.send(RitualFile {
            label: "dropped".to_string(),
            code: "V.title(\"from disk\");".to_string(),
        })
        .expect("send");
        app.update();
        app.update();

        let sandbox = app.world().non_send_resource::<RitualSandbox>();
        assert_eq!(sandbox.0.page_snapshot().title, "from disk");
    }

    #[test]
    fn unset_dir_adds_nothing() {
        let mut app = App::new();
        app.add_plugins(RitualWatcherPlugin { dir: None });
        assert!(app.world().get_resource::<RitualWatchReceiver>().is_none());
    }
}
