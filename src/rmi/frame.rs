//! RMI wire framing: identifier packing and multi-frame reassembly.
//!
//! Identifier layout (29 bits):
//!
//! ```text
//! bits 24-28  fixed marker 0x1F
//! bits 17-18  sequence (2 bits, mod 4 per request)
//! bit  16     request flag
//! bit  15     error flag
//! bit  14     multi-frame flag
//! bits 12-13  fragment counter (2 bits)
//! bits  6-11  destination node id
//! bits  0-5   source node id
//! ```

use tracing::warn;

use crate::frame::CanFrame;

/// Top identifier byte marking an RMI frame.
pub const RMI_MARKER: u32 = 0x1F;

/// One RMI frame, or the aggregate of a multi-frame response under
/// reassembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RmiFrame {
    pub source: u8,
    pub dest: u8,
    pub sequence: u8,
    pub counter: u8,
    pub is_multi: bool,
    pub is_request: bool,
    pub is_error: bool,
    pub data: Vec<u8>,
    message_no: u8,
    final_seen: bool,
}

impl RmiFrame {
    /// Build an outbound request frame. Payloads longer than one CAN frame
    /// are flagged multi-frame.
    pub(crate) fn request(source: u8, dest: u8, sequence: u8, data: Vec<u8>) -> Self {
        let is_multi = data.len() > 8;
        Self {
            source,
            dest,
            sequence: sequence & 0x03,
            counter: 0,
            is_multi,
            is_request: true,
            is_error: false,
            data,
            message_no: 0,
            final_seen: false,
        }
    }

    /// Decode an RMI frame.
    ///
    /// Multi-frame fragments carry a leading message-number byte, which is
    /// stripped here; bit 7 of that byte marks the final fragment. A
    /// non-multi-frame response is complete immediately.
    pub fn from_frame(frame: &CanFrame) -> Self {
        let id = frame.id();
        let mut rmi = Self {
            source: (id & 0x3F) as u8,
            dest: ((id >> 6) & 0x3F) as u8,
            counter: ((id >> 12) & 0x03) as u8,
            sequence: ((id >> 17) & 0x03) as u8,
            is_multi: id & (1 << 14) != 0,
            is_error: id & (1 << 15) != 0,
            is_request: id & (1 << 16) != 0,
            data: frame.data().to_vec(),
            message_no: 0,
            final_seen: false,
        };

        if !rmi.is_multi {
            rmi.final_seen = true;
        } else if rmi.data.is_empty() {
            warn!(id = format_args!("{:08X}", id), "multi-frame fragment without a message-number byte");
            rmi.final_seen = true;
        } else {
            rmi.message_no = rmi.data.remove(0);
            if rmi.message_no & 0x80 != 0 {
                rmi.final_seen = true;
                rmi.message_no &= 0x7F;
            }
        }
        rmi
    }

    /// Fold a continuation fragment into this aggregate, concatenating
    /// the remaining payload bytes in arrival order.
    pub fn append_fragment(&mut self, mut fragment: RmiFrame) {
        self.message_no = fragment.message_no;
        self.final_seen = fragment.final_seen;
        self.data.append(&mut fragment.data);
    }

    /// Whether the final fragment has been seen.
    pub fn is_complete(&self) -> bool {
        self.final_seen
    }

    /// Index of the most recent fragment.
    pub fn pending_fragment(&self) -> u8 {
        self.message_no
    }

    /// Pack the 29-bit identifier.
    pub fn can_id(&self) -> u32 {
        let mut id = RMI_MARKER << 24;
        id |= self.source as u32;
        id |= (self.dest as u32 & 0x3F) << 6;
        id |= (self.counter as u32 & 0x03) << 12;
        if self.is_multi {
            id |= 1 << 14;
        }
        if self.is_error {
            id |= 1 << 15;
        }
        if self.is_request {
            id |= 1 << 16;
        }
        id |= (self.sequence as u32 & 0x03) << 17;
        id
    }

    /// Encode into a raw frame; the payload is cut at the frame boundary.
    pub(crate) fn to_can_frame(&self) -> CanFrame {
        CanFrame::new(self.can_id(), &self.data)
    }
}
