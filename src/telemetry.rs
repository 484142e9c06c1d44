use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

// PLC register codes carried in each reading.
pub const REG_TOTAL: &str = "0165"; // A: cumulative total
pub const REG_FLOW_PRIMARY: &str = "0166"; // B: flow channel 1
pub const REG_FLOW_SECONDARY: &str = "0167"; // C: flow channel 2
pub const REG_DECIMALS: &str = "0168"; // D: decimal-place count
pub const REG_UNIT: &str = "0169"; // E: unit code

/// One raw reading as stored at the live feed path: a register-code map
/// plus a source timestamp in unix milliseconds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReading {
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    #[serde(default)]
    pub ts: Option<i64>,
}

/// The feed path returns either a plain JSON array of readings or a keyed
/// object of push-id -> reading. Push ids sort chronologically, so key
/// order preserves insertion order for the keyed form.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ReadingPayload {
    List(Vec<RawReading>),
    Keyed(BTreeMap<String, RawReading>),
}

impl ReadingPayload {
    /// Collapse both payload shapes into one ordered sequence.
    pub fn normalize(self) -> Vec<RawReading> {
        match self {
            ReadingPayload::List(readings) => readings,
            ReadingPayload::Keyed(map) => map.into_values().collect(),
        }
    }
}

/// Canonical decoded sample.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSample {
    pub reading_total: i64,
    pub flow_primary: i64,
    pub flow_secondary: i64,
    pub decimal_places: u32,
    pub unit_code: i64,
    pub sampled_at: DateTime<Utc>,
}

impl FlowSample {
    /// A sample is usable when at least one flow channel is positive.
    pub fn has_flow(&self) -> bool {
        self.flow_primary > 0 || self.flow_secondary > 0
    }
}

/// Decode a raw reading into a canonical sample.
///
/// Missing registers default to zero; the only rejection is an absent or
/// empty register map, which callers treat as a skipped cycle rather than
/// an error.
pub fn decode_reading(reading: &RawReading) -> Option<FlowSample> {
    if reading.values.is_empty() {
        return None;
    }

    let sampled_at = reading.ts.map(millis_to_dt).unwrap_or_else(Utc::now);

    Some(FlowSample {
        reading_total: register_i64(reading, REG_TOTAL),
        flow_primary: register_i64(reading, REG_FLOW_PRIMARY),
        flow_secondary: register_i64(reading, REG_FLOW_SECONDARY),
        decimal_places: register_i64(reading, REG_DECIMALS).max(0) as u32,
        unit_code: register_i64(reading, REG_UNIT),
        sampled_at,
    })
}

// Registers arrive as JSON numbers or numeric strings depending on the
// PLC bridge firmware; coerce both, default zero.
fn register_i64(reading: &RawReading, key: &str) -> i64 {
    match reading.values.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse::<i64>().unwrap_or(0),
        _ => 0,
    }
}

fn millis_to_dt(ms: i64) -> DateTime<Utc> {
    let secs = ms.div_euclid(1000);
    let nanos = (ms.rem_euclid(1000) * 1_000_000) as u32;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .unwrap_or_else(Utc::now)
}
