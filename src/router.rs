//! Inbound frame router.
//!
//! Every received frame passes through here exactly once: it is mirrored
//! to the capture file when capture is on, then classified by the top
//! identifier byte and handed to the matching path.

use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::Path;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::core::error::{DeviceError, Result};
use crate::frame::CanFrame;

const PDO_CLASS: u32 = 0x00;
const HEARTBEAT_CLASS: u32 = 0x10;
const RMI_CLASS: u32 = 0x1F;

/// Line-per-frame capture sink in the canonical text form.
pub(crate) struct Capture {
    file: LineWriter<File>,
}

impl Capture {
    pub(crate) fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(DeviceError::Capture)?;
        Ok(Self { file: LineWriter::new(file) })
    }

    /// A failed write is logged and the frame is lost; capture never
    /// takes the router down.
    fn record(&mut self, frame: &CanFrame) {
        if let Err(err) = writeln!(self.file, "{}", frame) {
            warn!(error = %err, "capture write failed");
        }
    }
}

/// Router worker. Runs until shutdown or until the inbound channel
/// closes.
pub(crate) async fn run_router(
    mut frames: mpsc::Receiver<CanFrame>,
    pdo: mpsc::Sender<CanFrame>,
    rmi: mpsc::Sender<CanFrame>,
    heartbeat: mpsc::Sender<CanFrame>,
    mut capture: Option<Capture>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if let Some(capture) = capture.as_mut() {
                        capture.record(&frame);
                    }
                    let delivered = match frame.id() >> 24 {
                        PDO_CLASS => pdo.send(frame).await.is_ok(),
                        RMI_CLASS => rmi.send(frame).await.is_ok(),
                        HEARTBEAT_CLASS => {
                            // Heartbeats are advisory; without a consumer
                            // they are dropped rather than blocking.
                            if heartbeat.try_send(frame).is_err() {
                                debug!("heartbeat path full, frame dropped");
                            }
                            true
                        }
                        class => {
                            warn!(class = format_args!("{:02X}", class), "dropping frame with an unknown class");
                            true
                        }
                    };
                    if !delivered {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    debug!("frame router stopped");
}
