//! Synthetic capture logs
//!
//! Produces push_data-style JSONL records for a single device, one frame per
//! line, with FCnt counting up from 0. Handy as decode/replay test input.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use crate::lorawan::encoder::FrameBuilder;
use crate::lorawan::keys::SessionKeys;
use crate::lorawan::{normalize_hex, parse_dev_addr};

#[derive(Debug, Clone)]
pub struct GenerateParams {
    pub gateway_eui: String,
    /// Big-endian hex, e.g. `26011BDA`
    pub devaddr: String,
    pub frames: u32,
    pub interval_seconds: i64,
    pub start_time: DateTime<Utc>,
    pub frequency_mhz: f64,
    pub datarate: String,
    pub coding_rate: String,
    /// Plaintext FRMPayload; empty or `None` produces frames with no port
    /// byte, which parse as port 0 with an empty payload
    pub payload_hex: Option<String>,
    pub f_port: u8,
    /// Encrypt the payload so it decodes with these keys
    pub keys: Option<SessionKeys>,
}

/// Generate capture lines (without trailing newline)
pub fn generate_lines(params: &GenerateParams) -> anyhow::Result<Vec<String>> {
    let dev_addr = parse_dev_addr(&params.devaddr)?;
    let payload = match params.payload_hex.as_deref() {
        Some(payload) if !payload.trim().is_empty() => hex::decode(normalize_hex(payload))
            .map_err(|e| anyhow::anyhow!("Payload hex must be byte-aligned hex: {}", e))?,
        _ => Vec::new(),
    };

    (0..params.frames)
        .map(|index| -> anyhow::Result<String> {
            let fcnt = (index & 0xFFFF) as u16;
            let mut builder = FrameBuilder::new_uplink(dev_addr, fcnt, params.f_port, payload.clone());
            if let Some(keys) = &params.keys {
                builder = builder.encrypted(keys);
            }
            let phy = builder.build();

            let timestamp = i64::from(index)
                .checked_mul(params.interval_seconds)
                .and_then(Duration::try_seconds)
                .and_then(|offset| params.start_time.checked_add_signed(offset))
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "Frame {} timestamp out of range (interval {}s)",
                        index,
                        params.interval_seconds
                    )
                })?;
            let rxpk = json!({
                "time": timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                "tmst": 1_000_000u64 + u64::from(index) * 1000,
                "freq": params.frequency_mhz,
                "chan": 0,
                "rfch": 0,
                "stat": 1,
                "modu": "LORA",
                "datr": params.datarate,
                "codr": params.coding_rate,
                "rssi": -60 - i64::from(index % 20),
                "lsnr": 5.5 - f64::from(index % 10) * 0.1,
                "size": phy.len(),
                "data": base64::engine::general_purpose::STANDARD.encode(&phy),
            });

            Ok(json!({ "gatewayEui": params.gateway_eui, "rxpk": rxpk }).to_string())
        })
        .collect()
}
