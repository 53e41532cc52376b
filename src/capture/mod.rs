//! Gateway capture logs
//!
//! A capture log is newline-delimited JSON, one record per received frame:
//!
//! ```json
//! {"gatewayEui": "0102030405060708", "rxpk": {"time": "...", "freq": 868.1, "datr": "SF7BW125", "codr": "4/5", "size": 18, "data": "QNobASYAAQAB..."}}
//! ```
//!
//! Records are handled one line at a time. Blank lines are skipped by
//! every consumer.

pub mod decode;
pub mod export;
pub mod generate;
pub mod scan;

use base64::Engine;
use serde_json::{Map, Value};

/// One parsed capture line
#[derive(Debug, Clone)]
pub struct RawRecord {
    value: Value,
}

impl RawRecord {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        Ok(Self {
            value: serde_json::from_str(line)?,
        })
    }

    /// Gateway EUI as written, accepting `gatewayEui` or `gateway_eui`
    pub fn gateway_eui(&self) -> Option<&str> {
        ["gatewayEui", "gateway_eui"]
            .iter()
            .filter_map(|key| self.str_field(key))
            .map(str::trim)
            .find(|eui| !eui.is_empty())
    }

    /// A top-level string field, untrimmed
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    pub fn rxpk(&self) -> Option<&Map<String, Value>> {
        self.value.get("rxpk").and_then(Value::as_object)
    }

    pub fn time(&self) -> Option<String> {
        self.rxpk()
            .and_then(|rxpk| rxpk.get("time"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Base64 PHY payload from `rxpk.data`
    pub fn data(&self) -> Option<&str> {
        self.rxpk()
            .and_then(|rxpk| rxpk.get("data"))
            .and_then(Value::as_str)
    }
}

/// Non-blank, trimmed lines of a capture log
pub(crate) fn record_lines<I, S>(lines: I) -> impl Iterator<Item = S>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines.into_iter().filter(|line| !line.as_ref().trim().is_empty())
}

/// Base64 decode tolerating missing `=` padding
pub fn decode_base64_lenient(input: &str) -> anyhow::Result<Vec<u8>> {
    let stripped = input.trim();
    let padding = (4 - stripped.len() % 4) % 4;
    let padded = format!("{}{}", stripped, "=".repeat(padding));
    base64::engine::general_purpose::STANDARD
        .decode(padded)
        .map_err(|e| anyhow::anyhow!("Base64 decode error: {}", e))
}
