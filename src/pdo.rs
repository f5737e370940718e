//! Telemetry (PDO) layer: the sensor dictionary, typed sensor values and
//! the latest-value store fed by the frame router.

pub mod sensors;
pub mod store;
pub mod value;

pub use sensors::{SensorDescriptor, SensorKind, SensorRegistry};
pub use store::{PdoStore, SensorReading};
pub use value::{slugify, SensorValue};
