//! CAN-bus client for residential ventilation units.
//!
//! The unit broadcasts telemetry as Process Data Objects (PDO) and
//! answers attribute reads over a request/response protocol (RMI) that
//! may span multiple frames. This crate decodes both layers: a router
//! classifies raw frames, the PDO store keeps the latest typed value per
//! sensor, and the RMI engine runs one exchange at a time with
//! multi-frame reassembly and clear-to-send flow control.
//!
//! ```no_run
//! use ventcan::{Destination, Device, PropertyFacet};
//!
//! # async fn example() -> ventcan::Result<()> {
//! let mut device = Device::new(55);
//! device.connect("can0").await?;
//! device.start().await?;
//!
//! let serial = device
//!     .fetch_property(Destination::new(1, 1, 1), 4, PropertyFacet::ActualValue)
//!     .await?;
//! println!("serial: {}", String::from_utf8_lossy(&serial));
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod device;
pub mod dump;
pub mod frame;
pub mod pdo;
pub mod rmi;
pub mod router;
pub mod transport;

pub use crate::core::data::Value;
pub use crate::core::error::{DeviceError, Result};
pub use device::{decode_version, Device, DeviceInfo};
pub use frame::CanFrame;
pub use pdo::{PdoStore, SensorDescriptor, SensorKind, SensorReading, SensorValue};
pub use rmi::{Destination, PropertyFacet, RmiCallback, RmiFrame};
pub use transport::{SocketCanTransport, Transport, TransportIo};
