//! Background file watching and reload notification.
//!
//! # Data Flow
//! ```text
//! notify backend ──event──▶ channel ──▶ watch thread
//!                                         │ (coalesce burst within `debounce`)
//!                                         ▼
//!                                   Config::reload()
//!                                         │ success
//!                                         ▼
//!                                   Dispatcher::notify() ──▶ callback thread
//! ```
use std::{
    collections::HashSet,
    ops::ControlFlow,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{
        Arc,
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    thread,
    time::{Duration, Instant},
};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};

enum Message {
    Fs(notify::Result<Event>),
    Stop,
}

/// A running watch task. Dropping it stops the task.
pub(crate) struct WatchHandle {
    _watcher: RecommendedWatcher,
    stop: Sender<Message>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        // The thread may already be gone.
        let _ = self.stop.send(Message::Stop);
    }
}

/// Where a source file lives on disk, as reported by watch events.
fn watched_location(path: &Path) -> std::io::Result<(PathBuf, PathBuf)> {
    let absolute = std::path::absolute(path)?;
    let dir = match absolute.parent() {
        Some(dir) => dir.canonicalize()?,
        None => return Err(std::io::Error::other("source has no parent directory")),
    };
    let file = match absolute.file_name() {
        Some(name) => dir.join(name),
        None => return Err(std::io::Error::other("source has no file name")),
    };
    Ok((dir, file))
}

fn is_source(path: &Path, files: &HashSet<PathBuf>) -> bool {
    if files.contains(path) {
        return true;
    }
    match (path.parent(), path.file_name()) {
        (Some(dir), Some(name)) => dir
            .canonicalize()
            .is_ok_and(|dir| files.contains(&dir.join(name))),
        _ => false,
    }
}

fn is_relevant(event: &Event, files: &HashSet<PathBuf>) -> bool {
    (event.kind.is_modify() || event.kind.is_create())
        && event.paths.iter().any(|path| is_source(path, files))
}

/// Starts watching `paths`. `on_change` runs on the watch thread after each
/// burst of changes; returning `Break` ends the task.
pub(crate) fn spawn<F>(
    paths: &[PathBuf],
    debounce: Duration,
    poll_interval: Duration,
    on_change: F,
) -> Result<WatchHandle>
where
    F: FnMut() -> ControlFlow<()> + Send + 'static,
{
    let mut dirs = HashSet::new();
    let mut files = HashSet::new();
    for path in paths {
        let (dir, file) = watched_location(path).map_err(|e| Error::WatchSetup {
            path: Some(path.clone()),
            source: notify::Error::io(e),
        })?;
        dirs.insert(dir);
        files.insert(file);
    }

    let (tx, rx) = mpsc::channel();
    let events = tx.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            let _ = events.send(Message::Fs(res));
        },
        notify::Config::default().with_poll_interval(poll_interval),
    )
    .map_err(|source| Error::WatchSetup { path: None, source })?;

    // Watching the directories keeps working when editors replace a file by
    // renaming a new one over it.
    for dir in &dirs {
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| Error::WatchSetup {
                path: Some(dir.clone()),
                source,
            })?;
    }

    let watched = files.len();
    thread::Builder::new()
        .name("flat-config-watch".to_string())
        .spawn(move || run(rx, files, debounce, on_change))
        .map_err(|e| Error::WatchSetup {
            path: None,
            source: notify::Error::io(e),
        })?;

    tracing::info!(files = watched, "configuration watcher started");
    Ok(WatchHandle {
        _watcher: watcher,
        stop: tx,
    })
}

fn run<F>(rx: Receiver<Message>, files: HashSet<PathBuf>, debounce: Duration, mut on_change: F)
where
    F: FnMut() -> ControlFlow<()>,
{
    while let Ok(message) = rx.recv() {
        match message {
            Message::Stop => break,
            Message::Fs(Err(e)) => tracing::warn!(error = %e, "file watcher error"),
            Message::Fs(Ok(event)) => {
                if !is_relevant(&event, &files) {
                    continue;
                }
                tracing::debug!(paths = ?event.paths, "configuration source changed");

                if settle(&rx, debounce).is_break() || on_change().is_break() {
                    break;
                }
            }
        }
    }

    tracing::info!("configuration watcher stopped");
}

/// Swallows the rest of a burst of events. Breaks when the task should end.
fn settle(rx: &Receiver<Message>, debounce: Duration) -> ControlFlow<()> {
    let deadline = Instant::now() + debounce;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(Message::Stop) | Err(RecvTimeoutError::Disconnected) => {
                return ControlFlow::Break(());
            }
            Ok(Message::Fs(Err(e))) => tracing::warn!(error = %e, "file watcher error"),
            Ok(Message::Fs(Ok(_))) => {}
            Err(RecvTimeoutError::Timeout) => return ControlFlow::Continue(()),
        }
    }
}

pub(crate) type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct DispatchState {
    running: bool,
    pending: bool,
}

/// Runs the reload callback on its own thread.
///
/// At most one invocation runs at a time. Notifications that arrive while it
/// runs collapse into a single follow-up invocation.
#[derive(Default)]
pub(crate) struct Dispatcher {
    callback: RwLock<Option<Callback>>,
    state: Mutex<DispatchState>,
}

impl Dispatcher {
    pub(crate) fn set(&self, callback: Callback) {
        *self.callback.write() = Some(callback);
    }

    pub(crate) fn notify(self: &Arc<Self>) {
        if self.callback.read().is_none() {
            return;
        }

        {
            let mut state = self.state.lock();
            if state.running {
                state.pending = true;
                return;
            }
            state.running = true;
        }

        let this = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("flat-config-on-reload".to_string())
            .spawn(move || this.run());

        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to start reload callback thread");
            self.state.lock().running = false;
        }
    }

    fn run(&self) {
        loop {
            let callback = self.callback.read().clone();
            if let Some(callback) = callback {
                if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                    tracing::error!("reload callback panicked");
                }
            }

            let mut state = self.state.lock();
            if state.pending {
                state.pending = false;
            } else {
                state.running = false;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc,
    };

    use super::*;

    #[test]
    fn test_dispatch_without_callback_is_noop() {
        let dispatcher = Arc::new(Dispatcher::default());
        dispatcher.notify();
        assert!(!dispatcher.state.lock().running);
    }

    #[test]
    fn test_overlapping_notifications_coalesce() {
        let dispatcher = Arc::new(Dispatcher::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let (done_tx, done_rx) = mpsc::channel();

        {
            let calls = Arc::clone(&calls);
            dispatcher.set(Arc::new(move || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    entered_tx.send(()).unwrap();
                    release_rx.lock().recv().unwrap();
                }
                done_tx.send(n).unwrap();
            }));
        }

        dispatcher.notify();
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("callback did not start");

        // The first invocation is blocked; these collapse into one rerun.
        dispatcher.notify();
        dispatcher.notify();
        dispatcher.notify();
        release_tx.send(()).unwrap();

        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
        assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_callback_does_not_wedge_dispatcher() {
        let dispatcher = Arc::new(Dispatcher::default());
        let (tx, rx) = mpsc::channel();
        let calls = Arc::new(AtomicUsize::new(0));

        {
            let calls = Arc::clone(&calls);
            dispatcher.set(Arc::new(move || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                tx.send(n).unwrap();
                if n == 0 {
                    panic!("boom");
                }
            }));
        }

        dispatcher.notify();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);

        // Wait for the first run to finish before notifying again.
        let deadline = Instant::now() + Duration::from_secs(5);
        while dispatcher.state.lock().running && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        dispatcher.notify();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    }
}
