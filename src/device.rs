//! Device lifecycle and channel wiring.
//!
//! A [`Device`] owns the four core workers (router, PDO, RMI response,
//! RMI transmit) and the channels between them. Transport workers are
//! spawned through the [`Transport`] seam and live outside the core join
//! set. Shutdown is one watch signal observed by every worker.

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

use crate::core::error::{DeviceError, Result};
use crate::dump;
use crate::frame::CanFrame;
use crate::pdo::{PdoStore, SensorReading, SensorValue};
use crate::pdo::store::run_pdo_worker;
use crate::rmi::engine::{
    run_response_worker, run_transmit_worker, Destination, PropertyFacet, RmiCallback, RmiRequest,
};
use crate::rmi::frame::RmiFrame;
use crate::router::{run_router, Capture};
use crate::transport::{SocketCanTransport, Transport, TransportIo};

/// Upper bound on requests waiting for the clear-to-send token. Senders
/// block when it is full.
const RMI_REQUEST_QUEUE: usize = 16;

const IDENTITY_DESTINATION: Destination = Destination { node: 1, unit: 1, subunit: 1 };
const IDENTITY_PROPERTIES: [u8; 3] = [4, 6, 8];

/// Unpack the device version word: major in bits 30-31, minor in bits
/// 20-29.
pub fn decode_version(value: u32) -> (u8, u16) {
    (((value >> 30) & 0x03) as u8, ((value >> 20) & 0x3FF) as u16)
}

/// Identity of the unit on the far end.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub serial: String,
    pub model: String,
    pub version_major: u8,
    pub version_minor: u16,
}

impl DeviceInfo {
    pub fn identity(&self) -> String {
        format!("{} [{}]", self.model, self.serial)
    }
}

/// Decode the get-multiple {4, 6, 8} response: NUL-terminated serial,
/// little-endian u32 version word, model string.
fn parse_device_info(data: &[u8]) -> Option<DeviceInfo> {
    let nul = data.iter().position(|&b| b == 0)?;
    let serial = String::from_utf8_lossy(&data[..nul]).into_owned();
    let version = data.get(nul + 1..nul + 5)?;
    let version = u32::from_le_bytes([version[0], version[1], version[2], version[3]]);
    let (version_major, version_minor) = decode_version(version);
    let rest = data.get(nul + 5..)?;
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    let model = String::from_utf8_lossy(&rest[..end]).into_owned();
    Some(DeviceInfo { serial, model, version_major, version_minor })
}

/// Receiver ends handed to the workers at start.
struct Pending {
    frame_rx: mpsc::Receiver<CanFrame>,
    request_rx: mpsc::Receiver<RmiRequest>,
}

/// One ventilation unit client.
pub struct Device {
    node_id: u8,
    store: Arc<PdoStore>,
    frame_tx: mpsc::Sender<CanFrame>,
    request_tx: mpsc::Sender<RmiRequest>,
    sequence: AtomicU8,
    shutdown: watch::Sender<bool>,
    pending: Option<Pending>,
    workers: Vec<JoinHandle<()>>,
    transport_workers: Vec<JoinHandle<()>>,
    transport: Option<Box<dyn Transport>>,
    capture: Option<Capture>,
    info: Arc<RwLock<Option<DeviceInfo>>>,
}

impl Device {
    pub fn new(node_id: u8) -> Self {
        let (frame_tx, frame_rx) = mpsc::channel(1);
        let (request_tx, request_rx) = mpsc::channel(RMI_REQUEST_QUEUE);
        let (shutdown, _) = watch::channel(false);
        Self {
            node_id,
            store: Arc::new(PdoStore::new()),
            frame_tx,
            request_tx,
            sequence: AtomicU8::new(0),
            shutdown,
            pending: Some(Pending { frame_rx, request_rx }),
            workers: Vec::new(),
            transport_workers: Vec::new(),
            transport: None,
            capture: None,
            info: Arc::new(RwLock::new(None)),
        }
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    /// Open a SocketCAN interface and attach it as this device's
    /// transport. Must be called before [`start`](Self::start).
    pub async fn connect(&mut self, interface: &str) -> Result<()> {
        let mut transport = SocketCanTransport::new(interface, self.node_id);
        transport.connect().await?;
        self.transport = Some(Box::new(transport));
        Ok(())
    }

    /// Attach an already connected transport.
    pub fn attach_transport(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
    }

    /// Mirror every inbound frame to a capture file. The file is created
    /// immediately so a bad path fails here, not mid-run.
    pub fn capture_to(&mut self, path: &Path) -> Result<()> {
        self.capture = Some(Capture::create(path)?);
        Ok(())
    }

    /// Spawn the core workers, then the transport workers if a transport
    /// is attached. The clear-to-send token is primed only with a
    /// transport present, so a replay-only device never transmits.
    pub async fn start(&mut self) -> Result<()> {
        let Pending { frame_rx, request_rx } = self
            .pending
            .take()
            .ok_or_else(|| DeviceError::Config("device already started".to_string()))?;

        let (pdo_tx, pdo_rx) = mpsc::channel(1);
        let (rmi_tx, rmi_rx) = mpsc::channel(1);
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(1);
        let (outbound_tx, outbound_rx) = mpsc::channel(1);
        let (cts_tx, cts_rx) = mpsc::channel(1);
        let (inflight_tx, inflight_rx) = mpsc::channel(1);

        self.workers.push(tokio::spawn(run_router(
            frame_rx,
            pdo_tx,
            rmi_tx,
            heartbeat_tx,
            self.capture.take(),
            self.shutdown.subscribe(),
        )));
        self.workers.push(tokio::spawn(run_pdo_worker(
            self.store.clone(),
            pdo_rx,
            self.shutdown.subscribe(),
        )));
        self.workers.push(tokio::spawn(run_response_worker(
            self.node_id,
            rmi_rx,
            inflight_rx,
            cts_tx.clone(),
            self.shutdown.subscribe(),
        )));
        self.workers.push(tokio::spawn(run_transmit_worker(
            request_rx,
            cts_rx,
            inflight_tx,
            outbound_tx,
            self.shutdown.subscribe(),
        )));

        if let Some(mut transport) = self.transport.take() {
            let io = TransportIo {
                inbound: self.frame_tx.clone(),
                outbound: outbound_rx,
                heartbeats: heartbeat_rx,
                shutdown: self.shutdown.subscribe(),
            };
            let handles = transport.start(io).await?;
            self.transport_workers.extend(handles);
            cts_tx
                .send(())
                .await
                .map_err(|_| DeviceError::ChannelClosed("clear-to-send"))?;
        }

        info!(node_id = self.node_id, "device started");
        Ok(())
    }

    /// Signal every worker to stop.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait for the core workers. Transport workers are aborted rather
    /// than joined.
    pub async fn join(&mut self) {
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
        for handle in self.transport_workers.drain(..) {
            handle.abort();
        }
    }

    /// Replay a capture file through the router.
    pub async fn process_dump_file(&self, path: &Path) -> Result<()> {
        dump::replay_file(path, &self.frame_tx).await
    }

    /// Encode a request and queue it for the transmit worker. Blocks when
    /// the queue is full.
    pub(crate) async fn queue_request(
        &self,
        dest: u8,
        data: Vec<u8>,
        callback: RmiCallback,
    ) -> Result<()> {
        let frame = RmiFrame::request(self.node_id, dest, self.next_sequence(), data);
        self.request_tx
            .send(RmiRequest { frame, callback })
            .await
            .map_err(|_| DeviceError::ChannelClosed("request queue"))
    }

    fn next_sequence(&self) -> u8 {
        self.sequence.fetch_add(1, Ordering::Relaxed) & 0x03
    }

    /// Read one property and wait for the response payload.
    pub async fn fetch_property(
        &self,
        dest: Destination,
        property: u8,
        facet: PropertyFacet,
    ) -> Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        let callback: RmiCallback = Box::new(move |data| {
            let _ = tx.send(data);
        });
        dest.get_one(self, property, facet, callback).await?;
        rx.await.map_err(|_| DeviceError::ChannelClosed("response callback"))
    }

    /// Read several properties in one exchange and wait for the combined
    /// response payload.
    pub async fn fetch_properties(
        &self,
        dest: Destination,
        properties: &[u8],
        facet: PropertyFacet,
    ) -> Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        let callback: RmiCallback = Box::new(move |data| {
            let _ = tx.send(data);
        });
        dest.get_multiple(self, properties, facet, callback).await?;
        rx.await.map_err(|_| DeviceError::ChannelClosed("response callback"))
    }

    /// Ask the unit for its serial, version and model, and remember the
    /// answer.
    pub async fn fetch_device_info(&self) -> Result<DeviceInfo> {
        let data = self
            .fetch_properties(
                IDENTITY_DESTINATION,
                &IDENTITY_PROPERTIES,
                PropertyFacet::ActualValue,
            )
            .await?;
        let parsed = parse_device_info(&data)
            .ok_or_else(|| DeviceError::Frame("malformed device identity response".to_string()))?;
        info!(
            identity = %parsed.identity(),
            version = format_args!("{}.{}", parsed.version_major, parsed.version_minor),
            "device identified"
        );
        *self.info.write().await = Some(parsed.clone());
        Ok(parsed)
    }

    /// Last fetched identity, if any.
    pub async fn device_info(&self) -> Option<DeviceInfo> {
        self.info.read().await.clone()
    }

    /// Current value for one sensor id.
    pub async fn sensor_value(&self, sensor_id: u16) -> Option<SensorValue> {
        self.store.get(sensor_id).await
    }

    /// Snapshot of every observed sensor, sorted by id.
    pub async fn snapshot(&self) -> Vec<SensorReading> {
        self.store.snapshot().await
    }

    /// Slug-keyed JSON object of every observed sensor.
    pub async fn json_snapshot(&self) -> serde_json::Value {
        self.store.json_snapshot().await
    }

    /// Human-readable table of every observed sensor.
    pub async fn dump_values(&self) -> String {
        self.store.dump().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::rmi::frame::RMI_MARKER;

    #[test]
    fn test_decode_version() {
        let word = (1u32 << 30) | (23u32 << 20);
        assert_eq!(decode_version(word), (1, 23));
    }

    #[test]
    fn test_parse_device_info() {
        let mut data = Vec::new();
        data.extend_from_slice(b"SN12345\0");
        data.extend_from_slice(&((2u32 << 30) | (7u32 << 20)).to_le_bytes());
        data.extend_from_slice(b"ComfoAir Q450\0");
        let info = parse_device_info(&data).unwrap();
        assert_eq!(info.serial, "SN12345");
        assert_eq!(info.model, "ComfoAir Q450");
        assert_eq!(info.version_major, 2);
        assert_eq!(info.version_minor, 7);
        assert_eq!(info.identity(), "ComfoAir Q450 [SN12345]");
    }

    #[test]
    fn test_parse_device_info_rejects_truncated_payload() {
        assert!(parse_device_info(b"SN\0\x01\x02").is_none());
        assert!(parse_device_info(b"no terminator").is_none());
    }

    #[test]
    fn test_sequence_rolls_modulo_four() {
        let device = Device::new(55);
        let seen: Vec<u8> = (0..6).map(|_| device.next_sequence()).collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 0, 1]);
    }

    #[tokio::test]
    async fn test_replay_populates_store() {
        let mut device = Device::new(55);
        device.start().await.unwrap();

        // Outdoor air temperature, sensor 276, 12.3 degrees.
        device
            .frame_tx
            .send(CanFrame::new((276 << 14) | 1, &[0x7B, 0x00]))
            .await
            .unwrap();

        let mut value = None;
        for _ in 0..100 {
            value = device.sensor_value(276).await;
            if value.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(value.unwrap().float(), 12.3);

        device.stop();
        device.join().await;
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut device = Device::new(55);
        device.start().await.unwrap();
        assert!(device.start().await.is_err());
        device.stop();
        device.join().await;
    }

    /// Transport that answers every request with a fixed single-frame
    /// response addressed back at the requester.
    struct LoopbackTransport;

    #[async_trait]
    impl Transport for LoopbackTransport {
        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn start(&mut self, mut io: TransportIo) -> Result<Vec<JoinHandle<()>>> {
            let handle = tokio::spawn(async move {
                while let Some(frame) = io.outbound.recv().await {
                    let request = RmiFrame::from_frame(&frame);
                    let reply_id =
                        (RMI_MARKER << 24) | ((request.source as u32) << 6) | request.dest as u32;
                    let reply = CanFrame::new(reply_id, &[0xAB, 0xCD]);
                    if io.inbound.send(reply).await.is_err() {
                        break;
                    }
                }
            });
            Ok(vec![handle])
        }
    }

    #[tokio::test]
    async fn test_request_response_through_transport_seam() {
        let mut device = Device::new(55);
        device.attach_transport(Box::new(LoopbackTransport));
        device.start().await.unwrap();

        let dest = Destination::new(1, 1, 1);
        let first = device
            .fetch_property(dest, 4, PropertyFacet::ActualValue)
            .await
            .unwrap();
        assert_eq!(first, vec![0xAB, 0xCD]);

        // The token came back, a second exchange goes through too.
        let second = device
            .fetch_properties(dest, &[4, 6, 8], PropertyFacet::ActualValue)
            .await
            .unwrap();
        assert_eq!(second, vec![0xAB, 0xCD]);

        device.stop();
        device.join().await;
    }
}
