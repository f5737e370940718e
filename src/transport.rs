//! Physical transport seam and the SocketCAN adapter.
//!
//! The adapter runs three workers outside the core join: a receive loop
//! polling a nonblocking socket, a transmit loop draining the outbound
//! queue, and a heartbeat loop announcing this node on a fixed interval
//! while draining inbound heartbeats from the router.

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use socketcan::{CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::core::error::{DeviceError, Result};
use crate::frame::CanFrame;

const RX_POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);
const HEARTBEAT_BASE: u32 = 0x1000_0000;

/// Channel endpoints the transport workers plug into.
pub struct TransportIo {
    /// Received frames go here, toward the router.
    pub inbound: mpsc::Sender<CanFrame>,
    /// Frames queued for transmission.
    pub outbound: mpsc::Receiver<CanFrame>,
    /// Heartbeat frames the router forwarded to us.
    pub heartbeats: mpsc::Receiver<CanFrame>,
    /// Cooperative shutdown signal.
    pub shutdown: watch::Receiver<bool>,
}

/// Physical transport collaborator.
#[async_trait]
pub trait Transport: Send {
    /// Validate and open the underlying device.
    async fn connect(&mut self) -> Result<()>;

    /// Spawn the transport workers. The returned handles are not part of
    /// the core join set.
    async fn start(&mut self, io: TransportIo) -> Result<Vec<JoinHandle<()>>>;
}

/// SocketCAN-backed transport. Each worker binds its own socket handle.
pub struct SocketCanTransport {
    interface: String,
    node_id: u8,
    heartbeat_period: Duration,
    connected: bool,
}

impl SocketCanTransport {
    pub fn new(interface: impl Into<String>, node_id: u8) -> Self {
        Self {
            interface: interface.into(),
            node_id,
            heartbeat_period: HEARTBEAT_PERIOD,
            connected: false,
        }
    }
}

#[async_trait]
impl Transport for SocketCanTransport {
    async fn connect(&mut self) -> Result<()> {
        // Probe the interface now so a bad name fails the caller rather
        // than a worker.
        let _probe = open_socket(&self.interface, false)?;
        self.connected = true;
        info!(interface = %self.interface, "CAN interface opened");
        Ok(())
    }

    async fn start(&mut self, io: TransportIo) -> Result<Vec<JoinHandle<()>>> {
        if !self.connected {
            return Err(DeviceError::Connection(
                "transport started before connect".to_string(),
            ));
        }
        let receive = tokio::spawn(receive_loop(
            self.interface.clone(),
            io.inbound,
            io.shutdown.clone(),
        ));
        let transmit = tokio::spawn(transmit_loop(
            self.interface.clone(),
            io.outbound,
            io.shutdown.clone(),
        ));
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.interface.clone(),
            self.node_id,
            self.heartbeat_period,
            io.heartbeats,
            io.shutdown,
        ));
        Ok(vec![receive, transmit, heartbeat])
    }
}

fn open_socket(interface: &str, nonblocking: bool) -> Result<CanSocket> {
    let socket = CanSocket::open(interface).map_err(|e| {
        DeviceError::Connection(format!("failed to open CAN interface {}: {}", interface, e))
    })?;
    if nonblocking {
        socket.set_nonblocking(true).map_err(|e| {
            DeviceError::Connection(format!("failed to set nonblocking mode: {}", e))
        })?;
    }
    Ok(socket)
}

fn from_socketcan(frame: &socketcan::CanFrame) -> CanFrame {
    CanFrame::new(frame.raw_id(), frame.data())
}

fn to_socketcan(frame: &CanFrame) -> Option<socketcan::CanFrame> {
    let id = ExtendedId::new(frame.id())?;
    socketcan::CanFrame::new(id, frame.data())
}

async fn receive_loop(
    interface: String,
    inbound: mpsc::Sender<CanFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    let socket = match open_socket(&interface, true) {
        Ok(socket) => socket,
        Err(err) => {
            error!(error = %err, "receive worker failed to bind");
            return;
        }
    };
    let mut poll = interval(RX_POLL_INTERVAL);
    'outer: loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = poll.tick() => {}
        }
        // Drain everything the socket has buffered before sleeping again.
        loop {
            match socket.read_frame() {
                Ok(frame) => {
                    if inbound.send(from_socketcan(&frame)).await.is_err() {
                        break 'outer;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "CAN read error");
                    tokio::time::sleep(READ_ERROR_BACKOFF).await;
                    break;
                }
            }
        }
    }
    debug!("receive worker stopped");
}

async fn transmit_loop(
    interface: String,
    mut outbound: mpsc::Receiver<CanFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    let socket = match open_socket(&interface, false) {
        Ok(socket) => socket,
        Err(err) => {
            error!(error = %err, "transmit worker failed to bind");
            return;
        }
    };
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    debug!(frame = %frame, "transmitting");
                    write_frame(&socket, &frame);
                }
                None => break,
            },
        }
    }
    debug!("transmit worker stopped");
}

async fn heartbeat_loop(
    interface: String,
    node_id: u8,
    period: Duration,
    mut heartbeats: mpsc::Receiver<CanFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    let socket = match open_socket(&interface, false) {
        Ok(socket) => socket,
        Err(err) => {
            error!(error = %err, "heartbeat worker failed to bind");
            return;
        }
    };
    let announce = CanFrame::new(HEARTBEAT_BASE | node_id as u32, &[0x01]);
    let mut ticker = interval(period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Some(frame) = heartbeats.recv() => {
                debug!(frame = %frame, "unit heartbeat");
            }
            _ = ticker.tick() => {
                write_frame(&socket, &announce);
            }
        }
    }
    debug!("heartbeat worker stopped");
}

fn write_frame(socket: &CanSocket, frame: &CanFrame) {
    match to_socketcan(frame) {
        Some(raw) => {
            if let Err(err) = socket.write_frame(&raw) {
                warn!(frame = %frame, error = %err, "CAN write failed");
            }
        }
        None => warn!(frame = %frame, "frame not representable on the wire"),
    }
}
