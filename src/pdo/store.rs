//! Latest-value PDO store and its worker loop.
//!
//! The store is written only by the PDO worker; every other party reads
//! point-in-time snapshots through the async accessors.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::debug;

use crate::core::data::Value;
use crate::frame::CanFrame;

use super::sensors::SensorRegistry;
use super::value::SensorValue;

/// One decoded telemetry frame.
///
/// Identifier layout: source node id in bits 0-5, sensor id in bits
/// 14-24.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PdoMessage<'a> {
    pub node_id: u8,
    pub sensor_id: u16,
    pub data: &'a [u8],
}

impl<'a> PdoMessage<'a> {
    pub(crate) fn from_frame(frame: &'a CanFrame) -> Self {
        Self {
            node_id: (frame.id() & 0x3F) as u8,
            sensor_id: ((frame.id() >> 14) & 0x7FF) as u16,
            data: frame.data(),
        }
    }
}

/// Read-only tuple handed to presentation surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct SensorReading {
    pub id: u16,
    pub name: String,
    pub unit: String,
    pub slug: String,
    pub value: Value,
}

struct PdoTables {
    registry: SensorRegistry,
    values: HashMap<u16, SensorValue>,
}

/// Latest value per sensor id.
pub struct PdoStore {
    tables: RwLock<PdoTables>,
}

impl PdoStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(PdoTables {
                registry: SensorRegistry::new(),
                values: HashMap::new(),
            }),
        }
    }

    /// Decode one PDO frame and replace the stored value for its sensor
    /// id. Sensor id 0 is a sentinel and is discarded.
    pub async fn apply(&self, frame: &CanFrame) {
        let msg = PdoMessage::from_frame(frame);
        if msg.sensor_id == 0 {
            debug!("ignoring PDO with a sensor id of 0");
            return;
        }

        let mut tables = self.tables.write().await;
        let PdoTables { registry, values } = &mut *tables;
        let entry = values.entry(msg.sensor_id).or_insert_with(|| {
            SensorValue::new(registry.lookup_or_insert(msg.sensor_id, msg.data.len()).clone())
        });
        entry.update(msg.data);
    }

    /// Current value for one sensor id.
    pub async fn get(&self, sensor_id: u16) -> Option<SensorValue> {
        self.tables.read().await.values.get(&sensor_id).cloned()
    }

    /// Number of distinct sensor ids observed.
    pub async fn len(&self) -> usize {
        self.tables.read().await.values.len()
    }

    /// Point-in-time snapshot of every observed sensor, sorted by id.
    pub async fn snapshot(&self) -> Vec<SensorReading> {
        let tables = self.tables.read().await;
        let mut readings: Vec<SensorReading> = tables
            .values
            .iter()
            .map(|(&id, value)| SensorReading {
                id,
                name: value.descriptor().name.clone(),
                unit: value.descriptor().unit.to_string(),
                slug: value.slug().to_string(),
                value: value.render(),
            })
            .collect();
        readings.sort_by_key(|r| r.id);
        readings
    }

    /// JSON object keyed by slug, the shape a presentation surface
    /// republishes.
    pub async fn json_snapshot(&self) -> serde_json::Value {
        let tables = self.tables.read().await;
        let mut map = serde_json::Map::new();
        for value in tables.values.values() {
            let rendered = serde_json::to_value(value.render()).unwrap_or(serde_json::Value::Null);
            map.insert(value.slug().to_string(), rendered);
        }
        serde_json::Value::Object(map)
    }

    /// Human-readable table of every observed sensor, one line per id.
    pub async fn dump(&self) -> String {
        let tables = self.tables.read().await;
        let mut ids: Vec<&u16> = tables.values.keys().collect();
        ids.sort();
        let mut out = String::new();
        for id in ids {
            out.push_str(&format!("{:3}: {}\n", id, tables.values[id]));
        }
        out
    }
}

impl Default for PdoStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker consuming the PDO path until shutdown.
pub(crate) async fn run_pdo_worker(
    store: Arc<PdoStore>,
    mut frames: mpsc::Receiver<CanFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            frame = frames.recv() => match frame {
                Some(frame) => store.apply(&frame).await,
                None => break,
            },
        }
    }
    debug!("PDO worker stopped");
}
