//! Watch-folder intake: newly created scans are queued for processing.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

/// File extensions the intake accepts, lowercased.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "tif", "tiff"];

/// Whether a path looks like a scan the pipeline can decode.
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Spawn a notify watcher on `watch_dir` that sends newly created image paths
/// to `tx`. Returns the watcher — it must be kept alive for watching to
/// continue.
pub fn spawn_intake_watcher(
    watch_dir: &Path,
    tx: mpsc::Sender<PathBuf>,
) -> notify::Result<impl notify::Watcher> {
    use notify::{EventKind, RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if let Ok(ev) = event {
            if matches!(ev.kind, EventKind::Create(_)) {
                for path in ev.paths {
                    if is_image_path(&path) {
                        let _ = tx.try_send(path);
                    }
                }
            }
        }
    })?;

    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn image_paths_are_recognized_case_insensitively() {
        assert!(is_image_path(Path::new("/in/scan.png")));
        assert!(is_image_path(Path::new("/in/SCAN.JPG")));
        assert!(!is_image_path(Path::new("/in/notes.txt")));
        assert!(!is_image_path(Path::new("/in/noext")));
    }

    #[tokio::test]
    async fn watcher_reports_new_image_files() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let _watcher = spawn_intake_watcher(dir.path(), tx).unwrap();

        // Give the backend a moment to register the watch.
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(dir.path().join("scan.png"), b"fake").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within timeout")
            .expect("channel closed");
        assert_eq!(received.file_name().unwrap(), "scan.png");
    }
}
