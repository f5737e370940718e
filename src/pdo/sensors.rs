//! Sensor dictionary and registry.
//!
//! The built-in table covers the sensors a residential ventilation unit
//! broadcasts. Ids seen on the wire without an entry get a best-effort
//! descriptor that persists for the registry's lifetime, so a sensor's
//! type metadata never changes once observed.

use std::collections::HashMap;

pub const UNIT_WATT: &str = "W";
pub const UNIT_KWH: &str = "kWh";
pub const UNIT_CELSIUS: &str = "°C";
pub const UNIT_PERCENT: &str = "%";
pub const UNIT_RPM: &str = "rpm";
pub const UNIT_M3H: &str = "m³/h";
pub const UNIT_SECONDS: &str = "seconds";
pub const UNIT_UNKNOWN: &str = "unknown";
pub const UNIT_DAYS: &str = "Days";

/// On-wire interpretation of a sensor payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// 00 (false), 01 (true)
    Bool,
    /// 00 (0) until ff (255)
    Uint8,
    /// 3412 = 1234
    Uint16,
    /// 7856 3412 = 12345678
    Uint32,
    Int8,
    /// 3412 = 1234
    Int16,
    /// 32-bit little-endian payload widened into a signed integer
    Int64,
    String,
    Time,
    Version,
}

impl SensorKind {
    /// Whether this kind is read through the signed accessor.
    pub fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int64)
    }

    /// Whether this kind is read through the unsigned accessor.
    pub fn is_unsigned(&self) -> bool {
        matches!(self, Self::Uint8 | Self::Uint16 | Self::Uint32)
    }
}

/// Static metadata for one sensor id.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorDescriptor {
    pub name: String,
    pub unit: &'static str,
    pub kind: SensorKind,
    pub decimal_places: u32,
}

#[rustfmt::skip]
const BUILTIN_SENSORS: &[(u16, &str, &str, SensorKind, u32)] = &[
    (49,  "Operating Mode",                          UNIT_UNKNOWN, SensorKind::Int8,   0),
    (65,  "Fan Speed Setting",                       UNIT_UNKNOWN, SensorKind::Int8,   0),
    (81,  "Boost Period Remaining",                  UNIT_SECONDS, SensorKind::Uint32, 0),
    (117, "Exhaust Fan Duty",                        UNIT_PERCENT, SensorKind::Uint8,  0),
    (118, "Supply Fan Duty",                         UNIT_PERCENT, SensorKind::Uint8,  0),
    (119, "Exhaust Fan Flow",                        UNIT_M3H,     SensorKind::Uint16, 0),
    (120, "Supply Fan Flow",                         UNIT_M3H,     SensorKind::Uint16, 0),
    (121, "Exhaust Fan Speed",                       UNIT_RPM,     SensorKind::Uint16, 0),
    (122, "Supply Fan Speed",                        UNIT_RPM,     SensorKind::Uint16, 0),
    (128, "Power Consumption",                       UNIT_WATT,    SensorKind::Uint16, 0),
    (130, "Power Consumption Total",                 UNIT_KWH,     SensorKind::Uint16, 0),
    (145, "Preheater Power Consumption Total",       UNIT_KWH,     SensorKind::Uint16, 0),
    (146, "Preheater Power Consumption",             UNIT_WATT,    SensorKind::Uint16, 0),
    (192, "Filter Replacement Days",                 UNIT_DAYS,    SensorKind::Uint16, 0),
    (209, "RMOT",                                    UNIT_CELSIUS, SensorKind::Uint16, 1),
    (213, "Avoided Heating Actual",                  UNIT_WATT,    SensorKind::Uint16, 2),
    (214, "Avoided Heating YTD",                     UNIT_KWH,     SensorKind::Uint16, 0),
    (220, "Preheated Air Temperature (pre Heating)", UNIT_CELSIUS, SensorKind::Uint16, 1),
    (221, "Preheated Air Temperature (post Heating)", UNIT_CELSIUS, SensorKind::Uint16, 1),
    (227, "Bypass State",                            UNIT_PERCENT, SensorKind::Uint8,  0),
    (274, "Extract Air Temperature",                 UNIT_CELSIUS, SensorKind::Uint16, 1),
    (275, "Exhaust Air Temperature",                 UNIT_CELSIUS, SensorKind::Uint16, 1),
    (276, "Outdoor Air Temperature",                 UNIT_CELSIUS, SensorKind::Uint16, 1),
    (277, "Preheated Outside Air Temperature",       UNIT_CELSIUS, SensorKind::Uint16, 1),
    (278, "Supply Air Temperature",                  UNIT_CELSIUS, SensorKind::Uint16, 1),
    (290, "Extract Humidity",                        UNIT_PERCENT, SensorKind::Uint8,  0),
    (291, "Exhaust Humidity",                        UNIT_PERCENT, SensorKind::Uint8,  0),
    (292, "Outdoor Humidity",                        UNIT_PERCENT, SensorKind::Uint8,  0),
    (293, "Preheated Outdoor Humidity",              UNIT_PERCENT, SensorKind::Uint8,  0),
    (294, "Supply Air Humidity",                     UNIT_PERCENT, SensorKind::Int8,   0),
];

/// Registry of sensor descriptors keyed by sensor id.
///
/// Owned by (or injected into) the PDO decoder rather than living in
/// process-wide state, so tests can use independent registries.
#[derive(Debug, Clone)]
pub struct SensorRegistry {
    sensors: HashMap<u16, SensorDescriptor>,
}

impl SensorRegistry {
    /// Create a registry seeded with the built-in dictionary.
    pub fn new() -> Self {
        let sensors = BUILTIN_SENSORS
            .iter()
            .map(|&(id, name, unit, kind, decimal_places)| {
                (
                    id,
                    SensorDescriptor {
                        name: name.to_string(),
                        unit,
                        kind,
                        decimal_places,
                    },
                )
            })
            .collect();
        Self { sensors }
    }

    /// Look up a descriptor without registering anything.
    pub fn get(&self, id: u16) -> Option<&SensorDescriptor> {
        self.sensors.get(&id)
    }

    /// Look up a descriptor, synthesizing one for an unknown id.
    ///
    /// The guessed numeric kind follows the payload length: 1 byte is
    /// 8-bit unsigned, 4 bytes is 32-bit unsigned, anything else 16-bit
    /// unsigned. The entry persists for all future frames with this id.
    pub fn lookup_or_insert(&mut self, id: u16, data_len: usize) -> &SensorDescriptor {
        self.sensors.entry(id).or_insert_with(|| {
            let kind = match data_len {
                1 => SensorKind::Uint8,
                4 => SensorKind::Uint32,
                _ => SensorKind::Uint16,
            };
            SensorDescriptor {
                name: format!("Unknown sensor {}", id),
                unit: UNIT_UNKNOWN,
                kind,
                decimal_places: 0,
            }
        })
    }

    /// Number of registered sensors.
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    /// Whether the registry holds no sensors.
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

impl Default for SensorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_dictionary_seeded() {
        let registry = SensorRegistry::new();
        let sensor = registry.get(276).unwrap();
        assert_eq!(sensor.name, "Outdoor Air Temperature");
        assert_eq!(sensor.unit, UNIT_CELSIUS);
        assert_eq!(sensor.kind, SensorKind::Uint16);
        assert_eq!(sensor.decimal_places, 1);
    }

    #[test]
    fn test_unknown_sensor_kind_guessed_from_length() {
        let mut registry = SensorRegistry::new();
        assert_eq!(registry.lookup_or_insert(900, 1).kind, SensorKind::Uint8);
        assert_eq!(registry.lookup_or_insert(901, 4).kind, SensorKind::Uint32);
        assert_eq!(registry.lookup_or_insert(902, 2).kind, SensorKind::Uint16);
        assert_eq!(registry.lookup_or_insert(903, 7).kind, SensorKind::Uint16);
        assert_eq!(registry.get(900).unwrap().name, "Unknown sensor 900");
        assert_eq!(registry.get(900).unwrap().unit, UNIT_UNKNOWN);
    }

    #[test]
    fn test_synthesized_entry_is_stable() {
        let mut registry = SensorRegistry::new();
        let first = registry.lookup_or_insert(950, 1).clone();
        // Later frames with a different length must not change the type.
        let second = registry.lookup_or_insert(950, 4).clone();
        assert_eq!(first, second);
        assert_eq!(second.kind, SensorKind::Uint8);
    }
}
