//! Re-export triggers for documents edited on disk

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Watches one Markdown file and reports debounced changes
pub struct DocumentWatcher {
    _watcher: RecommendedWatcher,
    receiver: Receiver<()>,
    path: PathBuf,
    debounce: Duration,
    last_event: Option<Instant>,
}

impl DocumentWatcher {
    pub fn new(path: &Path, debounce_ms: u64) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let target = path.to_path_buf();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let Ok(event) = res else { return };
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                && event.paths.iter().any(|p| p == &target)
            {
                let _ = tx.send(());
            }
        })
        .context("Failed to create file watcher")?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch file: {}", path.display()))?;

        // Editors that save by atomic rename replace the file's inode
        if let Some(parent) = path.parent() {
            watcher
                .watch(parent, RecursiveMode::NonRecursive)
                .context("Failed to watch parent directory")?;
        }

        log::debug!("Watching {}", path.display());

        Ok(Self {
            _watcher: watcher,
            receiver: rx,
            path: path.to_path_buf(),
            debounce: Duration::from_millis(debounce_ms),
            last_event: None,
        })
    }

    /// True once a change has been seen and the debounce period has passed
    pub fn check_changed(&mut self) -> bool {
        while self.receiver.try_recv().is_ok() {
            self.last_event = Some(Instant::now());
        }

        match self.last_event {
            Some(last) if last.elapsed() >= self.debounce => {
                self.last_event = None;
                true
            }
            _ => false,
        }
    }

    /// Block until a debounced change arrives or `timeout` expires
    pub fn wait_changed(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.check_changed() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// A change was seen but is still inside the debounce period
    pub fn has_pending(&self) -> bool {
        self.last_event.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_watcher_path() -> Result<()> {
        let file = NamedTempFile::new()?;
        let watcher = DocumentWatcher::new(file.path(), 250)?;
        assert_eq!(watcher.path(), file.path());
        assert!(!watcher.has_pending());
        Ok(())
    }

    #[test]
    fn test_debounce_prevents_immediate_trigger() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "# Draft")?;
        file.flush()?;

        let mut watcher = DocumentWatcher::new(file.path(), 10_000)?;
        writeln!(file, "More text")?;
        file.flush()?;
        thread::sleep(Duration::from_millis(50));

        assert!(!watcher.check_changed());
        Ok(())
    }

    #[test]
    #[ignore] // File system events can be unreliable in test environments
    fn test_watcher_detects_changes() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "# Draft")?;
        file.flush()?;

        let mut watcher = DocumentWatcher::new(file.path(), 50)?;
        writeln!(file, "$x^2$")?;
        file.flush()?;

        assert!(watcher.wait_changed(Duration::from_secs(3)));
        Ok(())
    }
}
