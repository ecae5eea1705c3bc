//! Directory watcher feeding finished clips into the analysis queue.

use anyhow::{Context, Result};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::queue::QueueProducer;

#[derive(Debug, Default)]
struct WatchState {
    healthy: AtomicBool,
    enqueued: AtomicU64,
}

/// Watches one directory (non-recursively) and enqueues every new file.
///
/// The notify callback only enqueues. Watch errors are logged and flip
/// `is_healthy`; they never reach the worker.
pub struct ClipWatcher {
    dir: PathBuf,
    watcher: Option<RecommendedWatcher>,
    state: Arc<WatchState>,
}

impl ClipWatcher {
    pub fn start(dir: &Path, producer: QueueProducer) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create clips dir {}", dir.display()))?;
        let dir = dir
            .canonicalize()
            .with_context(|| format!("failed to resolve clips dir {}", dir.display()))?;
        let state = Arc::new(WatchState {
            healthy: AtomicBool::new(true),
            enqueued: AtomicU64::new(0),
        });

        let callback_dir = dir.clone();
        let callback_state = Arc::clone(&state);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for clip in arrivals(&event, &callback_dir) {
                    match producer.enqueue(clip.clone()) {
                        Ok(()) => {
                            callback_state.enqueued.fetch_add(1, Ordering::SeqCst);
                            log::info!("queued {} for analysis", clip.display());
                        }
                        Err(err) => {
                            callback_state.healthy.store(false, Ordering::SeqCst);
                            log::warn!("failed to queue {}: {err:#}", clip.display());
                        }
                    }
                }
            }
            Err(err) => {
                callback_state.healthy.store(false, Ordering::SeqCst);
                log::error!("watch error on {}: {err}", callback_dir.display());
            }
        })
        .context("failed to create filesystem watcher")?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", dir.display()))?;
        log::info!("watching {} for finished clips", dir.display());

        Ok(Self {
            dir,
            watcher: Some(watcher),
            state,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_healthy(&self) -> bool {
        self.watcher.is_some() && self.state.healthy.load(Ordering::SeqCst)
    }

    /// Clips handed to the queue so far.
    pub fn enqueued(&self) -> u64 {
        self.state.enqueued.load(Ordering::SeqCst)
    }

    /// Stop watching. No further tasks are enqueued after this returns.
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(err) = watcher.unwatch(&self.dir) {
                log::debug!("unwatch {} failed: {err}", self.dir.display());
            }
            log::info!("stopped watching {}", self.dir.display());
        }
    }
}

impl Drop for ClipWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Files that became visible in `dir` through `event`.
///
/// Creates and rename targets count. Directories, dot-files (in-flight
/// copies) and anything outside `dir` are skipped.
pub fn arrivals(event: &Event, dir: &Path) -> Vec<PathBuf> {
    let candidates: Vec<&PathBuf> = match event.kind {
        EventKind::Create(CreateKind::Folder) => return Vec::new(),
        EventKind::Create(_) => event.paths.iter().collect(),
        // inotify reports a rename as From, To and Both; To alone is enough.
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.iter().collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            event.paths.iter().filter(|p| p.exists()).collect()
        }
        _ => return Vec::new(),
    };
    candidates
        .into_iter()
        .filter(|path| path.parent() == Some(dir))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| !n.starts_with('.'))
                .unwrap_or(false)
        })
        .filter(|path| !path.is_dir())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::RemoveKind;

    fn event(kind: EventKind, paths: &[&Path]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(path.to_path_buf());
        }
        event
    }

    #[test]
    fn creates_and_renames_are_arrivals() {
        let dir = Path::new("/clips");
        let clip = Path::new("/clips/a.y4m");
        let create = event(EventKind::Create(CreateKind::File), &[clip]);
        assert_eq!(arrivals(&create, dir), vec![clip.to_path_buf()]);

        let renamed = event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &[clip]);
        assert_eq!(arrivals(&renamed, dir), vec![clip.to_path_buf()]);

        let both = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[Path::new("/clips/.a.y4m.partial"), clip],
        );
        assert!(arrivals(&both, dir).is_empty());
    }

    #[test]
    fn hidden_foreign_and_removed_are_ignored() {
        let dir = Path::new("/clips");
        let hidden = event(
            EventKind::Create(CreateKind::File),
            &[Path::new("/clips/.a.y4m.partial")],
        );
        assert!(arrivals(&hidden, dir).is_empty());

        let nested = event(
            EventKind::Create(CreateKind::File),
            &[Path::new("/clips/sub/a.y4m")],
        );
        assert!(arrivals(&nested, dir).is_empty());

        let removed = event(
            EventKind::Remove(RemoveKind::File),
            &[Path::new("/clips/a.y4m")],
        );
        assert!(arrivals(&removed, dir).is_empty());

        let folder = event(
            EventKind::Create(CreateKind::Folder),
            &[Path::new("/clips/new")],
        );
        assert!(arrivals(&folder, dir).is_empty());
    }
}
