//! Capture-file replay.
//!
//! A capture is one frame per line in the canonical text form. Replay
//! feeds the frames into the router input at full speed, so a dump runs
//! through the whole pipeline exactly as live traffic would.

use std::path::Path;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::error::{DeviceError, Result};
use crate::frame::CanFrame;

/// Replay a capture file into the router input.
///
/// A missing or empty file is a hard error. Lines that fail to parse are
/// logged and skipped.
pub async fn replay_file(path: &Path, frames: &mpsc::Sender<CanFrame>) -> Result<()> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| DeviceError::DumpFile(format!("{}: {}", path.display(), e)))?;
    if metadata.len() == 0 {
        return Err(DeviceError::DumpFile(format!(
            "{}: file is empty, nothing to do",
            path.display()
        )));
    }
    info!(file = %path.display(), size = metadata.len(), "replaying capture");

    let contents = std::fs::read_to_string(path)
        .map_err(|e| DeviceError::DumpFile(format!("{}: {}", path.display(), e)))?;
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<CanFrame>() {
            Ok(frame) => frames
                .send(frame)
                .await
                .map_err(|_| DeviceError::ChannelClosed("router input"))?,
            Err(err) => {
                warn!(line = index + 1, error = %err, "skipping unparseable capture line");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_dump(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let (tx, _rx) = mpsc::channel(1);
        let result = replay_file(Path::new("/nonexistent/dump.txt"), &tx).await;
        assert!(matches!(result, Err(DeviceError::DumpFile(_))));
    }

    #[tokio::test]
    async fn test_empty_file_is_an_error() {
        let (dir, path) = write_dump("");
        let (tx, _rx) = mpsc::channel(1);
        let result = replay_file(&path, &tx).await;
        assert!(matches!(result, Err(DeviceError::DumpFile(_))));
        drop(dir);
    }

    #[tokio::test]
    async fn test_replay_feeds_frames_in_order() {
        let (dir, path) = write_dump("00450001#D204\n1F000041#42\n");
        let (tx, mut rx) = mpsc::channel(2);
        replay_file(&path, &tx).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), CanFrame::new(0x0045_0001, &[0xD2, 0x04]));
        assert_eq!(rx.recv().await.unwrap(), CanFrame::new(0x1F00_0041, &[0x42]));
        drop(dir);
    }

    #[tokio::test]
    async fn test_bad_lines_skipped() {
        let (dir, path) = write_dump("garbage\n00450001#D204\n\nalso bad#\n");
        let (tx, mut rx) = mpsc::channel(4);
        replay_file(&path, &tx).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), CanFrame::new(0x0045_0001, &[0xD2, 0x04]));
        assert!(rx.try_recv().is_err());
        drop(dir);
    }
}
