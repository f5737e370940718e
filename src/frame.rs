//! CAN frame value type and its canonical text form.
//!
//! Frames cross every stage boundary by value, so the payload lives in a
//! fixed 8-byte buffer rather than on the heap. The text form
//! `XXXXXXXX#HEXBYTES` is what the capture sink writes and the dump replay
//! reads back.

use std::fmt;
use std::str::FromStr;

use crate::core::error::DeviceError;

/// Maximum payload of a classic CAN frame.
pub const MAX_FRAME_DATA: usize = 8;

const ID_MASK: u32 = 0x1FFF_FFFF;

/// A raw CAN frame: 29-bit extended identifier plus 0-8 data bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanFrame {
    id: u32,
    data: [u8; MAX_FRAME_DATA],
    len: u8,
}

impl CanFrame {
    /// Build a frame. The identifier is masked to 29 bits and the payload
    /// truncated to 8 bytes.
    pub fn new(id: u32, data: &[u8]) -> Self {
        let mut buf = [0u8; MAX_FRAME_DATA];
        let len = data.len().min(MAX_FRAME_DATA);
        buf[..len].copy_from_slice(&data[..len]);
        Self {
            id: id & ID_MASK,
            data: buf,
            len: len as u8,
        }
    }

    /// The 29-bit identifier.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Payload bytes, truncated to the frame length.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the frame carries no data.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}#", self.id)?;
        for byte in self.data() {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for CanFrame {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id_part, data_part) = s
            .split_once('#')
            .ok_or_else(|| DeviceError::Frame(format!("missing '#' separator: {:?}", s)))?;

        let id = u32::from_str_radix(id_part, 16)
            .map_err(|e| DeviceError::Frame(format!("bad identifier {:?}: {}", id_part, e)))?;
        if id > ID_MASK {
            return Err(DeviceError::Frame(format!(
                "identifier {:#X} exceeds 29 bits",
                id
            )));
        }

        if data_part.len() % 2 != 0 {
            return Err(DeviceError::Frame(format!(
                "odd-length hex payload: {:?}",
                data_part
            )));
        }
        if data_part.len() / 2 > MAX_FRAME_DATA {
            return Err(DeviceError::Frame(format!(
                "payload longer than {} bytes: {:?}",
                MAX_FRAME_DATA, data_part
            )));
        }

        let mut data = [0u8; MAX_FRAME_DATA];
        let mut len = 0;
        for chunk in data_part.as_bytes().chunks(2) {
            let pair = std::str::from_utf8(chunk)
                .map_err(|_| DeviceError::Frame(format!("non-ascii payload: {:?}", data_part)))?;
            data[len] = u8::from_str_radix(pair, 16)
                .map_err(|e| DeviceError::Frame(format!("bad hex byte {:?}: {}", pair, e)))?;
            len += 1;
        }

        Ok(Self {
            id,
            data,
            len: len as u8,
        })
    }
}
