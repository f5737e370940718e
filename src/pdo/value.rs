//! Decoded sensor values and numeric rendering.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::core::data::Value;

use super::sensors::{SensorDescriptor, SensorKind};

/// Derive the stable machine key for a sensor name: lowercase, with
/// spaces replaced by hyphens.
pub fn slugify(name: &str) -> String {
    name.to_lowercase().replace(' ', "-")
}

/// Latest observed value for one sensor id.
///
/// The slug is computed once at creation; the raw payload is replaced in
/// place on every new frame for the id.
#[derive(Debug, Clone)]
pub struct SensorValue {
    descriptor: SensorDescriptor,
    raw: Vec<u8>,
    slug: String,
    last_updated: DateTime<Utc>,
}

impl SensorValue {
    pub(crate) fn new(descriptor: SensorDescriptor) -> Self {
        let slug = slugify(&descriptor.name);
        Self {
            descriptor,
            raw: Vec::new(),
            slug,
            last_updated: Utc::now(),
        }
    }

    pub(crate) fn update(&mut self, raw: &[u8]) {
        self.raw.clear();
        self.raw.extend_from_slice(raw);
        self.last_updated = Utc::now();
    }

    pub fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn is_bool(&self) -> bool {
        self.descriptor.kind == SensorKind::Bool
    }

    pub fn is_string(&self) -> bool {
        self.descriptor.kind == SensorKind::String
    }

    /// A value renders as floating point iff the descriptor carries
    /// decimal places.
    pub fn is_float(&self) -> bool {
        self.descriptor.decimal_places > 0
    }

    pub fn is_signed(&self) -> bool {
        self.descriptor.kind.is_signed()
    }

    /// Little-endian unsigned reading of the raw payload.
    ///
    /// Calling this on a signed-typed sensor logs a warning and returns 0
    /// rather than reinterpreting the bytes. Non-numeric kinds read as 0.
    pub fn unsigned(&self) -> u64 {
        if self.descriptor.kind.is_signed() {
            warn!(
                sensor = %self.descriptor.name,
                "unsigned read of a sensor with a signed data type"
            );
            return 0;
        }
        match self.descriptor.kind {
            SensorKind::Uint8 => self.byte(0),
            SensorKind::Uint16 => self.le_u16(),
            SensorKind::Uint32 => self.le_u32(),
            _ => 0,
        }
    }

    /// Signed counterpart of [`unsigned`](Self::unsigned).
    ///
    /// The little-endian reading is widened without sign extension, which
    /// is the convention of the device family. Unsigned-typed sensors log
    /// a warning and read as 0.
    pub fn signed(&self) -> i64 {
        if self.descriptor.kind.is_unsigned() {
            warn!(
                sensor = %self.descriptor.name,
                "signed read of a sensor with an unsigned data type"
            );
            return 0;
        }
        match self.descriptor.kind {
            SensorKind::Int8 => self.byte(0) as i64,
            SensorKind::Int16 => self.le_u16() as i64,
            SensorKind::Int64 => self.le_u32() as i64,
            _ => 0,
        }
    }

    /// Floating-point rendering: the unsigned magnitude divided by
    /// `decimal_places * 10`. The divisor is used verbatim by the device
    /// family and only matches a power of ten for one or two decimal
    /// places; it must be preserved for compatibility.
    pub fn float(&self) -> f64 {
        self.unsigned() as f64 / (self.descriptor.decimal_places as f64 * 10.0)
    }

    /// Render the raw payload for a presentation surface.
    pub fn render(&self) -> Value {
        if self.raw.is_empty() {
            return Value::Null;
        }
        match self.descriptor.kind {
            SensorKind::Bool => Value::Bool(self.raw[0] != 0),
            SensorKind::String => Value::String(self.string_value()),
            _ if self.is_float() => Value::Float(self.float()),
            _ if self.is_signed() => Value::Integer(self.signed()),
            _ => Value::Integer(self.unsigned() as i64),
        }
    }

    fn string_value(&self) -> String {
        let end = self.raw.iter().position(|&b| b == 0).unwrap_or(self.raw.len());
        String::from_utf8_lossy(&self.raw[..end]).into_owned()
    }

    fn byte(&self, index: usize) -> u64 {
        self.raw.get(index).copied().unwrap_or(0) as u64
    }

    fn le_u16(&self) -> u64 {
        match self.raw.get(..2) {
            Some(b) => u16::from_le_bytes([b[0], b[1]]) as u64,
            None => {
                warn!(sensor = %self.descriptor.name, len = self.raw.len(), "payload too short for a 16-bit read");
                0
            }
        }
    }

    fn le_u32(&self) -> u64 {
        match self.raw.get(..4) {
            Some(b) => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64,
            None => {
                warn!(sensor = %self.descriptor.name, len = self.raw.len(), "payload too short for a 32-bit read");
                0
            }
        }
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex: String = self.raw.iter().map(|b| format!("{:02X}", b)).collect();
        write!(f, "{:<45}0x{:<8}", self.descriptor.name, hex)?;
        if self.is_float() {
            write!(
                f,
                "  {:>6.prec$}",
                self.float(),
                prec = self.descriptor.decimal_places as usize
            )?;
        } else if self.is_signed() {
            write!(f, "  {:>6}", self.signed())?;
        } else {
            write!(f, "  {:>6}", self.unsigned())?;
        }
        write!(f, " {}", self.descriptor.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdo::sensors::UNIT_CELSIUS;

    fn value(kind: SensorKind, decimal_places: u32, raw: &[u8]) -> SensorValue {
        let mut v = SensorValue::new(SensorDescriptor {
            name: "Test Sensor".to_string(),
            unit: UNIT_CELSIUS,
            kind,
            decimal_places,
        });
        v.update(raw);
        v
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Outdoor Air Temperature"), "outdoor-air-temperature");
        assert_eq!(slugify("RMOT"), "rmot");
    }

    #[test]
    fn test_slug_computed_once() {
        let v = value(SensorKind::Uint16, 0, &[0, 0]);
        assert_eq!(v.slug(), "test-sensor");
    }

    #[test]
    fn test_one_decimal_place_renders_tenths() {
        // 0x04D2 = 1234, divisor 1 * 10
        let v = value(SensorKind::Uint16, 1, &[0xD2, 0x04]);
        assert!(v.is_float());
        assert_eq!(v.float(), 123.4);
        assert_eq!(v.render(), Value::Float(123.4));
    }

    #[test]
    fn test_two_decimal_places_divides_by_twenty() {
        // The divisor is decimal_places * 10, not 10^decimal_places.
        let v = value(SensorKind::Uint16, 2, &[0xD2, 0x04]);
        assert_eq!(v.float(), 1234.0 / 20.0);
    }

    #[test]
    fn test_unsigned_kinds() {
        assert_eq!(value(SensorKind::Uint8, 0, &[0xFF]).unsigned(), 255);
        assert_eq!(value(SensorKind::Uint16, 0, &[0x34, 0x12]).unsigned(), 0x1234);
        assert_eq!(
            value(SensorKind::Uint32, 0, &[0x78, 0x56, 0x34, 0x12]).unsigned(),
            0x1234_5678
        );
    }

    #[test]
    fn test_signed_read_of_unsigned_sensor_is_zero() {
        let v = value(SensorKind::Uint16, 0, &[0xD2, 0x04]);
        assert_eq!(v.signed(), 0);
    }

    #[test]
    fn test_unsigned_read_of_signed_sensor_is_zero() {
        let v = value(SensorKind::Int16, 0, &[0xD2, 0x04]);
        assert_eq!(v.unsigned(), 0);
        assert_eq!(v.signed(), 0x04D2);
    }

    #[test]
    fn test_short_payload_reads_zero() {
        let v = value(SensorKind::Uint16, 0, &[0xD2]);
        assert_eq!(v.unsigned(), 0);
    }

    #[test]
    fn test_render_bool_and_string() {
        assert_eq!(value(SensorKind::Bool, 0, &[1]).render(), Value::Bool(true));
        assert_eq!(
            value(SensorKind::String, 0, b"AB\0\0").render(),
            Value::String("AB".to_string())
        );
        assert_eq!(value(SensorKind::Uint8, 0, &[]).render(), Value::Null);
    }

    #[test]
    fn test_display_layout() {
        let v = value(SensorKind::Uint16, 1, &[0xD2, 0x04]);
        let line = v.to_string();
        assert!(line.starts_with("Test Sensor"));
        assert!(line.contains("0xD204"));
        assert!(line.contains("123.4"));
        assert!(line.ends_with(UNIT_CELSIUS));
    }
}
