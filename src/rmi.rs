//! Attribute access (RMI) layer: wire framing, request builders and the
//! single-outstanding-request engine.

pub mod engine;
pub mod frame;

pub use engine::{Destination, PropertyFacet, RmiCallback};
pub use frame::RmiFrame;
