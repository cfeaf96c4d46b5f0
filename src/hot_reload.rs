// Shader hot reload
//
// Watches the active backend's shader directory and reports which shader
// names had a file created or modified since the last poll.

use crate::assets::shader_name;
use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

pub struct ShaderWatcher {
    _watcher: RecommendedWatcher,
    events: mpsc::Receiver<notify::Event>,
    dir: PathBuf,
}

impl ShaderWatcher {
    pub fn new(dir: &Path) -> Result<Self> {
        let (sender, events) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    let _ = sender.send(event);
                }
                Err(e) => log::warn!("Shader watcher error: {}", e),
            }
        })
        .context("Failed to create shader watcher")?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;
        log::info!("Watching {} for shader changes", dir.display());

        Ok(Self {
            _watcher: watcher,
            events,
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drain pending events. Each changed shader name is reported once.
    pub fn poll_changes(&self) -> Vec<String> {
        let mut changed = BTreeSet::new();
        while let Ok(event) = self.events.try_recv() {
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                continue;
            }
            changed.extend(event.paths.iter().filter_map(|path| shader_name(path)));
        }
        changed.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    #[test]
    fn written_shader_is_reported_once() {
        let dir = tempdir().unwrap();
        let watcher = match ShaderWatcher::new(dir.path()) {
            Ok(watcher) => watcher,
            Err(e) => {
                eprintln!("skipping: no file watching here ({:#})", e);
                return;
            }
        };

        std::fs::write(dir.path().join("mesh.vs"), "mesh").unwrap();
        std::fs::write(dir.path().join("mesh.ps"), "vertex_colour").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while seen.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
            seen = watcher.poll_changes();
        }
        if seen.is_empty() {
            eprintln!("skipping: no file events delivered");
            return;
        }
        assert_eq!(seen, vec!["mesh".to_string()]);
    }
}
