//! Single-outstanding-request engine.
//!
//! Two workers share the exchange: the transmit worker admits one queued
//! request per clear-to-send token and hands its callback over, and the
//! response worker reassembles the reply, dispatches the callback and
//! releases the token. There is no timeout or retry; a request the far
//! end never answers holds the token forever and stalls everything
//! queued behind it.

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::core::error::Result;
use crate::device::Device;
use crate::frame::CanFrame;

use super::frame::RmiFrame;

/// One-shot completion handler receiving the reassembled response payload.
pub type RmiCallback = Box<dyn FnOnce(Vec<u8>) + Send>;

/// Which facet of a property a request reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PropertyFacet {
    NoValue = 0x00,
    ActualValue = 0x10,
    Range = 0x20,
    StepSize = 0x40,
}

/// Address of a unit/subunit on a remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub node: u8,
    pub unit: u8,
    pub subunit: u8,
}

impl Destination {
    pub fn new(node: u8, unit: u8, subunit: u8) -> Self {
        Self { node, unit, subunit }
    }

    /// Queue a read of a single property. The callback fires once with
    /// the raw response payload.
    pub async fn get_one(
        &self,
        device: &Device,
        property: u8,
        facet: PropertyFacet,
        callback: RmiCallback,
    ) -> Result<()> {
        let data = vec![0x01, self.unit, self.subunit, facet as u8, property];
        device.queue_request(self.node, data, callback).await
    }

    /// Queue a read of several properties in one exchange. The response
    /// payload carries the property values back to back.
    pub async fn get_multiple(
        &self,
        device: &Device,
        properties: &[u8],
        facet: PropertyFacet,
        callback: RmiCallback,
    ) -> Result<()> {
        let mut data = vec![
            0x02,
            self.unit,
            self.subunit,
            0x01,
            facet as u8 | properties.len() as u8,
        ];
        data.extend_from_slice(properties);
        device.queue_request(self.node, data, callback).await
    }
}

/// A request admitted to the wire together with its completion handler.
pub(crate) struct RmiRequest {
    pub(crate) frame: RmiFrame,
    pub(crate) callback: RmiCallback,
}

/// The one exchange the engine may have open.
enum ExchangeState {
    Idle,
    Sending { callback: RmiCallback },
    Reassembling { partial: RmiFrame, callback: Option<RmiCallback> },
}

/// Response worker: consumes the RMI path, reassembles multi-frame
/// replies and completes the open exchange.
pub(crate) async fn run_response_worker(
    node_id: u8,
    mut frames: mpsc::Receiver<CanFrame>,
    mut inflight: mpsc::Receiver<RmiCallback>,
    cts: mpsc::Sender<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut state = ExchangeState::Idle;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            frame = frames.recv() => match frame {
                Some(frame) => state = handle_frame(state, &frame, node_id, &mut inflight, &cts),
                None => break,
            },
        }
    }
    debug!("RMI response worker stopped");
}

fn handle_frame(
    state: ExchangeState,
    frame: &CanFrame,
    node_id: u8,
    inflight: &mut mpsc::Receiver<RmiCallback>,
    cts: &mpsc::Sender<()>,
) -> ExchangeState {
    let rmi = RmiFrame::from_frame(frame);
    if rmi.dest != node_id {
        if rmi.source != node_id {
            warn!(
                dest = rmi.dest,
                source = rmi.source,
                "RMI frame addressed to another node"
            );
        }
        return state;
    }

    // Pick up the callback of a freshly transmitted request.
    let state = match state {
        ExchangeState::Idle => match inflight.try_recv() {
            Ok(callback) => ExchangeState::Sending { callback },
            Err(_) => ExchangeState::Idle,
        },
        other => other,
    };

    match state {
        ExchangeState::Reassembling { mut partial, callback } => {
            partial.append_fragment(rmi);
            if partial.is_complete() {
                complete(callback, partial, cts);
                ExchangeState::Idle
            } else {
                ExchangeState::Reassembling { partial, callback }
            }
        }
        ExchangeState::Sending { callback } => {
            if rmi.is_complete() {
                complete(Some(callback), rmi, cts);
                ExchangeState::Idle
            } else {
                ExchangeState::Reassembling { partial: rmi, callback: Some(callback) }
            }
        }
        ExchangeState::Idle => {
            if rmi.is_complete() {
                complete(None, rmi, cts);
                ExchangeState::Idle
            } else {
                ExchangeState::Reassembling { partial: rmi, callback: None }
            }
        }
    }
}

/// Dispatch the completed exchange and release the clear-to-send token.
///
/// The token is released with `try_send` so a completion arriving with
/// the slot already filled cannot block the worker.
fn complete(callback: Option<RmiCallback>, response: RmiFrame, cts: &mpsc::Sender<()>) {
    if response.is_error {
        warn!(
            source = response.source,
            data = ?response.data,
            "RMI response carries the error flag"
        );
    }
    match callback {
        Some(callback) => callback(response.data),
        None => warn!("RMI response arrived with no request in flight"),
    }
    if cts.try_send(()).is_err() {
        warn!("clear-to-send token was already available");
    }
}

/// Transmit worker: waits for the clear-to-send token, then admits the
/// next queued request, handing its callback to the response worker and
/// pushing the encoded frame to the transmitter.
pub(crate) async fn run_transmit_worker(
    mut requests: mpsc::Receiver<RmiRequest>,
    mut cts: mpsc::Receiver<()>,
    inflight: mpsc::Sender<RmiCallback>,
    tx: mpsc::Sender<CanFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            token = cts.recv() => if token.is_none() { break },
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            request = requests.recv() => match request {
                Some(request) => {
                    if inflight.try_send(request.callback).is_err() {
                        warn!("dropping a request callback, the previous one was never claimed");
                    }
                    if tx.send(request.frame.to_can_frame()).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    debug!("RMI transmit worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rmi::frame::RMI_MARKER;
    use tokio::sync::oneshot;

    const NODE: u8 = 55;

    fn response_frame(multi: bool, data: &[u8]) -> CanFrame {
        let mut id = (RMI_MARKER << 24) | ((NODE as u32) << 6) | 1;
        if multi {
            id |= 1 << 14;
        }
        CanFrame::new(id, data)
    }

    fn capture_callback() -> (RmiCallback, oneshot::Receiver<Vec<u8>>) {
        let (tx, rx) = oneshot::channel();
        let callback: RmiCallback = Box::new(move |data| {
            let _ = tx.send(data);
        });
        (callback, rx)
    }

    #[tokio::test]
    async fn test_single_frame_completion_releases_token() {
        let (inflight_tx, mut inflight_rx) = mpsc::channel(1);
        let (cts_tx, mut cts_rx) = mpsc::channel(1);
        let (callback, done) = capture_callback();
        inflight_tx.send(callback).await.unwrap();

        let state = handle_frame(
            ExchangeState::Idle,
            &response_frame(false, &[0xAA, 0xBB]),
            NODE,
            &mut inflight_rx,
            &cts_tx,
        );
        assert!(matches!(state, ExchangeState::Idle));
        assert_eq!(done.await.unwrap(), vec![0xAA, 0xBB]);
        assert!(cts_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_multi_frame_dispatches_once_when_complete() {
        let (inflight_tx, mut inflight_rx) = mpsc::channel(1);
        let (cts_tx, mut cts_rx) = mpsc::channel(1);
        let (callback, mut done) = capture_callback();
        inflight_tx.send(callback).await.unwrap();

        let state = handle_frame(
            ExchangeState::Idle,
            &response_frame(true, &[0x00, b'a', b'b']),
            NODE,
            &mut inflight_rx,
            &cts_tx,
        );
        assert!(matches!(state, ExchangeState::Reassembling { .. }));
        assert!(done.try_recv().is_err());
        assert!(cts_rx.try_recv().is_err());

        let state = handle_frame(
            state,
            &response_frame(true, &[0x81, b'c']),
            NODE,
            &mut inflight_rx,
            &cts_tx,
        );
        assert!(matches!(state, ExchangeState::Idle));
        assert_eq!(done.await.unwrap(), b"abc".to_vec());
        assert!(cts_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_echo_of_own_request_ignored() {
        let (_inflight_tx, mut inflight_rx) = mpsc::channel::<RmiCallback>(1);
        let (cts_tx, mut cts_rx) = mpsc::channel(1);

        // Echo: source is our node id, dest is the remote.
        let echo = CanFrame::new(
            (RMI_MARKER << 24) | (1 << 16) | (1 << 6) | NODE as u32,
            &[0x01, 1, 1, 0x10, 4],
        );
        let state = handle_frame(ExchangeState::Idle, &echo, NODE, &mut inflight_rx, &cts_tx);
        assert!(matches!(state, ExchangeState::Idle));
        assert!(cts_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsolicited_response_still_releases_token_once() {
        let (_inflight_tx, mut inflight_rx) = mpsc::channel::<RmiCallback>(1);
        let (cts_tx, mut cts_rx) = mpsc::channel(1);

        let state = handle_frame(
            ExchangeState::Idle,
            &response_frame(false, &[0x01]),
            NODE,
            &mut inflight_rx,
            &cts_tx,
        );
        assert!(matches!(state, ExchangeState::Idle));
        assert!(cts_rx.try_recv().is_ok());

        // A second rogue completion must not block on the full slot.
        cts_tx.try_send(()).unwrap();
        let state = handle_frame(
            state,
            &response_frame(false, &[0x02]),
            NODE,
            &mut inflight_rx,
            &cts_tx,
        );
        assert!(matches!(state, ExchangeState::Idle));
    }

    #[tokio::test]
    async fn test_transmit_worker_waits_for_token() {
        let (request_tx, request_rx) = mpsc::channel(16);
        let (cts_tx, cts_rx) = mpsc::channel(1);
        let (inflight_tx, mut inflight_rx) = mpsc::channel(1);
        let (tx_tx, mut tx_rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(run_transmit_worker(
            request_rx, cts_rx, inflight_tx, tx_tx, shutdown_rx,
        ));

        let (callback, _done) = capture_callback();
        let frame = RmiFrame::request(NODE, 1, 0, vec![0x01, 1, 1, 0x10, 4]);
        request_tx.send(RmiRequest { frame, callback }).await.unwrap();
        assert!(tx_rx.try_recv().is_err());

        cts_tx.send(()).await.unwrap();
        let sent = tx_rx.recv().await.unwrap();
        assert_eq!(sent.data(), &[0x01, 1, 1, 0x10, 4]);
        assert!(inflight_rx.try_recv().is_ok());
        // The token is consumed, nothing else goes out.
        assert!(tx_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_second_request_waits_for_token_release() {
        let (request_tx, request_rx) = mpsc::channel(16);
        let (cts_tx, cts_rx) = mpsc::channel(1);
        let (inflight_tx, mut inflight_rx) = mpsc::channel(1);
        let (tx_tx, mut tx_rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(run_transmit_worker(
            request_rx, cts_rx, inflight_tx, tx_tx, shutdown_rx,
        ));
        cts_tx.send(()).await.unwrap();

        for property in [4u8, 8u8] {
            let (callback, _done) = capture_callback();
            let frame = RmiFrame::request(NODE, 1, 0, vec![0x01, 1, 1, 0x10, property]);
            request_tx.send(RmiRequest { frame, callback }).await.unwrap();
        }

        let first = tx_rx.recv().await.unwrap();
        assert_eq!(first.data()[4], 4);
        let _ = inflight_rx.try_recv();
        assert!(tx_rx.try_recv().is_err());

        // Releasing the token admits the second request.
        cts_tx.send(()).await.unwrap();
        let second = tx_rx.recv().await.unwrap();
        assert_eq!(second.data()[4], 8);
    }

    #[tokio::test]
    async fn test_response_worker_end_to_end() {
        let (frame_tx, frame_rx) = mpsc::channel(1);
        let (inflight_tx, inflight_rx) = mpsc::channel(1);
        let (cts_tx, mut cts_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(run_response_worker(
            NODE, frame_rx, inflight_rx, cts_tx, shutdown_rx,
        ));

        let (callback, done) = capture_callback();
        inflight_tx.send(callback).await.unwrap();
        frame_tx.send(response_frame(false, &[0x42])).await.unwrap();

        assert_eq!(done.await.unwrap(), vec![0x42]);
        assert!(cts_rx.recv().await.is_some());

        shutdown_tx.send(true).unwrap();
        worker.await.unwrap();
    }
}
