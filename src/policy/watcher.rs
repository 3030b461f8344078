//! Filesystem-driven policy hot-reload.
//!
//! A [`notify`] watcher on the policy directory forwards change events over a
//! channel to a dedicated reload thread. Each burst of events (coalesced over
//! the configured debounce window) triggers one full rescan of the directory
//! and one [`PolicyStore::replace`]. Reloads are a pure function of the
//! directory contents, so redundant reloads are harmless.
//!
//! The subscription is tied to the directory inode. Once the directory itself
//! is removed or renamed, or a rescan cannot list it, the watcher reports
//! itself degraded: a directory recreated under the same path is not watched.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use super::{loader, LoadError, PolicyStore};
use crate::config::PolicyConfig;

/// Errors from setting up the policy directory watch.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The filesystem notification subscription could not be established.
    #[error("failed to watch policy directory {}: {source}", dir.display())]
    Subscribe {
        /// The policy directory.
        dir: PathBuf,
        /// Underlying notify failure.
        #[source]
        source: notify::Error,
    },

    /// The reload thread could not be started.
    #[error("failed to start policy reload thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Message from the notify callback to the reload thread.
enum WatchSignal {
    Changed,
    Failed(notify::Error),
    DirectoryGone,
}

/// Keeps the policy store in sync with the policy directory.
///
/// Dropping the watcher ends the subscription and stops the reload thread.
pub struct PolicyWatcher {
    dir: PathBuf,
    degraded: Arc<AtomicBool>,
    /// Kept alive to maintain notifications.
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for PolicyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyWatcher")
            .field("dir", &self.dir)
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

impl PolicyWatcher {
    /// Subscribe to changes in `config.directory` and start the reload thread.
    ///
    /// Does not perform the initial load: the caller must populate `store`
    /// before serving requests. The reload thread rescans once on start to
    /// pick up anything that changed in between.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be watched or the reload
    /// thread cannot be spawned.
    pub fn spawn(config: &PolicyConfig, store: Arc<PolicyStore>) -> Result<Self, WatchError> {
        let dir = config.directory.clone();
        let watched = watched_paths(&dir);
        let (tx, rx) = mpsc::channel();

        let mut watcher =
            notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
                let signal = match event {
                    Ok(evt) if removes_watched(&evt, &watched) => WatchSignal::DirectoryGone,
                    Ok(evt) if triggers_reload(&evt.kind) => WatchSignal::Changed,
                    Ok(_) => return,
                    Err(e) => WatchSignal::Failed(e),
                };
                if let Err(e) = tx.send(signal) {
                    warn!(error = %e, "failed to forward policy watch event");
                }
            })
            .map_err(|source| WatchError::Subscribe {
                dir: dir.clone(),
                source,
            })?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Subscribe {
                dir: dir.clone(),
                source,
            })?;

        let degraded = Arc::new(AtomicBool::new(false));
        let reload_loop = ReloadLoop {
            dir: dir.clone(),
            extension: config.file_extension.clone(),
            debounce: Duration::from_millis(config.debounce_ms),
            store,
            degraded: Arc::clone(&degraded),
        };

        std::thread::Builder::new()
            .name("policy-watcher".to_owned())
            .spawn(move || reload_loop.run(rx))
            .map_err(WatchError::Spawn)?;

        info!(dir = %dir.display(), "watching policy directory");

        Ok(Self {
            dir,
            degraded,
            _watcher: watcher,
        })
    }

    /// Returns `true` once a watch error has been observed. Policy changes may
    /// no longer be picked up until restart.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// The watched directory.
    pub fn directory(&self) -> &Path {
        &self.dir
    }
}

/// Rescan `dir` and publish the result to `store`.
///
/// On success returns the committed generation. If the directory cannot be
/// listed, the error is logged and the store keeps its previous snapshot.
///
/// # Errors
///
/// Returns [`LoadError::DirectoryUnreadable`] when the directory cannot be
/// listed.
pub fn reload_into(dir: &Path, extension: &str, store: &PolicyStore) -> Result<u64, LoadError> {
    match loader::scan_dir(dir, extension) {
        Ok(scan) => {
            let rejected = scan.rejected.len();
            let generation = store.replace(scan.into_set());
            info!(dir = %dir.display(), generation, rejected, "policies reloaded");
            Ok(generation)
        }
        Err(e) => {
            warn!(error = %e, "policy reload failed; keeping previous policies");
            Err(e)
        }
    }
}

/// The directory as given plus its canonical form, since some backends
/// report canonical paths.
fn watched_paths(dir: &Path) -> Vec<PathBuf> {
    let mut paths = vec![dir.to_path_buf()];
    if let Ok(canonical) = dir.canonicalize() {
        if canonical != dir {
            paths.push(canonical);
        }
    }
    paths
}

/// Whether the event removes or renames the watched directory itself.
fn removes_watched(event: &notify::Event, watched: &[PathBuf]) -> bool {
    let detaches = matches!(
        event.kind,
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    );
    detaches && event.paths.iter().any(|path| watched.contains(path))
}

/// Whether an event kind can change the policy directory's contents.
///
/// Plain reads (including our own during reload) are ignored, but a
/// close-after-write marks a completed edit.
fn triggers_reload(kind: &EventKind) -> bool {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Access(_) => false,
        _ => true,
    }
}

struct ReloadLoop {
    dir: PathBuf,
    extension: String,
    debounce: Duration,
    store: Arc<PolicyStore>,
    degraded: Arc<AtomicBool>,
}

impl ReloadLoop {
    fn run(self, rx: Receiver<WatchSignal>) {
        // Catch changes made between the caller's initial load and the
        // subscription taking effect.
        self.reload();

        while let Ok(signal) = rx.recv() {
            if !self.accept(signal) {
                continue;
            }

            // Coalesce the rest of the burst.
            let mut disconnected = false;
            loop {
                match rx.recv_timeout(self.debounce) {
                    Ok(signal) => {
                        self.accept(signal);
                    }
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }

            debug!(dir = %self.dir.display(), "policy directory changed");
            self.reload();

            if disconnected {
                break;
            }
        }
        info!(dir = %self.dir.display(), "policy watcher stopped");
    }

    /// Rescan into the store. The previous snapshot stays live on failure.
    fn reload(&self) {
        if let Err(e) = reload_into(&self.dir, &self.extension, &self.store) {
            // An unlistable directory means the watched inode is gone or
            // inaccessible; later changes will not be seen.
            self.degrade(&e);
        }
    }

    /// Returns `true` if the signal calls for a reload.
    fn accept(&self, signal: WatchSignal) -> bool {
        match signal {
            WatchSignal::Changed => true,
            WatchSignal::Failed(e) => {
                self.degrade(&e);
                false
            }
            WatchSignal::DirectoryGone => {
                self.degrade(&"policy directory removed or renamed");
                true
            }
        }
    }

    fn degrade(&self, cause: &dyn std::fmt::Display) {
        self.degraded.store(true, Ordering::Release);
        error!(
            dir = %self.dir.display(),
            error = %cause,
            "policy watch failed; policy changes may no longer be picked up"
        );
    }
}
