//! Config file watch feeding the daemon configuration notifier

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use kmm_common::config::{Config, DaemonConfig};
use kmm_common::notifier::Notifier;

/// Watch `path` and publish each new daemon configuration through `notifier`.
///
/// The parent directory is watched rather than the file so that atomic
/// replacement (editor renames, ConfigMap symlink swaps) is observed. The
/// returned watcher must be kept alive for events to keep flowing.
pub fn watch_config(
    path: PathBuf,
    notifier: Arc<Notifier<DaemonConfig>>,
) -> anyhow::Result<RecommendedWatcher> {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| match event {
        Ok(evt) if is_content_change(&evt.kind) => {
            if let Err(e) = tx.send(()) {
                warn!(error = %e, "failed to send watcher event");
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "config watcher error"),
    })?;
    watcher.watch(watch_dir(&path), RecursiveMode::NonRecursive)?;

    // Set blocks until the change is consumed, so publishing gets its own task
    let task_path = path.clone();
    tokio::spawn(async move {
        let path = task_path;
        while rx.recv().await.is_some() {
            // Coalesce bursts of events from a single write
            while rx.try_recv().is_ok() {}

            if let Some(next) = reload(&path, &notifier.get()) {
                info!(path = %path.display(), image = %next.image, "configuration file changed");
                notifier.set(next).await;
            }
        }
    });

    info!(dir = %watch_dir(&path).display(), "watching configuration file");
    Ok(watcher)
}

/// Re-read the file, returning the new daemon configuration if it differs.
///
/// A file that fails to parse leaves the current value in place.
pub(crate) fn reload(path: &Path, current: &DaemonConfig) -> Option<DaemonConfig> {
    match Config::from_file(path) {
        Ok(config) => {
            let next = config.daemon_config();
            if next == *current {
                debug!(path = %path.display(), "daemon configuration unchanged");
                None
            } else {
                Some(next)
            }
        }
        Err(e) => {
            warn!(error = %e, "keeping previous configuration");
            None
        }
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn watch_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn unchanged_file_publishes_nothing() {
        let f = write_config("images:\n  daemon: quay.io/kmm/worker:v1\n");
        let current = Config::from_file(f.path()).unwrap().daemon_config();
        assert!(reload(f.path(), &current).is_none());
    }

    /// Story: bumping the daemon image publishes the new value
    #[test]
    fn story_new_daemon_image_is_published() {
        let f = write_config("images:\n  daemon: quay.io/kmm/worker:v2\n");
        let current = Config::default().daemon_config();
        let next = reload(f.path(), &current).unwrap();
        assert_eq!(next.image, "quay.io/kmm/worker:v2");
    }

    #[test]
    fn node_selector_change_is_published() {
        let f = write_config("daemon:\n  nodeSelector:\n    gpu: \"true\"\n");
        let next = reload(f.path(), &Config::default().daemon_config()).unwrap();
        assert_eq!(next.daemon.node_selector["gpu"], "true");
    }

    #[test]
    fn malformed_file_keeps_previous_value() {
        let f = write_config("daemon: [broken\n");
        assert!(reload(f.path(), &Config::default().daemon_config()).is_none());
    }

    #[test]
    fn missing_file_keeps_previous_value() {
        let current = Config::default().daemon_config();
        assert!(reload(Path::new("/nonexistent/kmm.yaml"), &current).is_none());
    }

    #[test]
    fn access_events_are_ignored() {
        assert!(is_content_change(&EventKind::Modify(ModifyKind::Any)));
        assert!(is_content_change(&EventKind::Create(CreateKind::File)));
        assert!(!is_content_change(&EventKind::Access(AccessKind::Any)));
    }

    #[test]
    fn bare_file_name_watches_current_dir() {
        assert_eq!(watch_dir(Path::new("config.yaml")), Path::new("."));
        assert_eq!(watch_dir(Path::new("/etc/kmm/config.yaml")), Path::new("/etc/kmm"));
    }
}
