//! Lightweight capture scan
//!
//! Collects gateway EUIs and DevAddrs without touching session keys.
//! Unparseable lines are noise and are skipped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use super::{decode_base64_lenient, record_lines, RawRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub record_count: usize,
    /// Sorted ascending, deduplicated
    pub gateway_euis: Vec<String>,
    /// Sorted ascending, deduplicated, big-endian hex
    pub devaddrs: Vec<String>,
}

pub fn scan_lines<I, S>(lines: I) -> ScanSummary
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut record_count = 0;
    let mut gateway_euis = BTreeSet::new();
    let mut devaddrs = BTreeSet::new();

    for line in record_lines(lines) {
        let record = match RawRecord::parse(line.as_ref().trim()) {
            Ok(record) => record,
            Err(e) => {
                debug!("Skipping unparseable line: {}", e);
                continue;
            }
        };
        record_count += 1;

        if let Some(eui) = record.gateway_eui() {
            gateway_euis.insert(eui.to_string());
        }
        if let Some(dev_addr) = record.data().and_then(extract_dev_addr) {
            devaddrs.insert(dev_addr);
        }
    }

    ScanSummary {
        record_count,
        gateway_euis: gateway_euis.into_iter().collect(),
        devaddrs: devaddrs.into_iter().collect(),
    }
}

/// DevAddr from bytes 1-4 of the PHY payload, if there are enough bytes
fn extract_dev_addr(data: &str) -> Option<String> {
    let raw = decode_base64_lenient(data).ok()?;
    let bytes: [u8; 4] = raw.get(1..5)?.try_into().ok()?;
    Some(format!("{:08X}", u32::from_le_bytes(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lorawan::encoder::FrameBuilder;
    use base64::Engine;

    fn line(gateway: &str, dev_addr: u32) -> String {
        let frame = FrameBuilder::new_uplink(dev_addr, 1, 1, vec![0xAA]).build();
        let data = base64::engine::general_purpose::STANDARD.encode(frame);
        format!(r#"{{"gatewayEui":"{gateway}","rxpk":{{"time":"2025-01-01T00:00:00Z","data":"{data}"}}}}"#)
    }

    #[test]
    fn test_scan_collects_sorted_distinct_sets() {
        let lines = vec![
            line("AABBCCDDEEFF0011", 0x26011BDA),
            line("0102030405060708", 0x01020304),
            String::new(),
            line("AABBCCDDEEFF0011", 0x26011BDA),
        ];

        let summary = scan_lines(&lines);

        assert_eq!(summary.record_count, 3);
        assert_eq!(summary.gateway_euis, vec!["0102030405060708", "AABBCCDDEEFF0011"]);
        assert_eq!(summary.devaddrs, vec!["01020304", "26011BDA"]);
    }

    #[test]
    fn test_scan_skips_noise() {
        let lines = vec![
            "not json".to_string(),
            r#"{"gatewayEui":"0102030405060708","rxpk":{"data":"QA"}}"#.to_string(),
            r#"{"rxpk":{"data":42}}"#.to_string(),
        ];

        let summary = scan_lines(lines);

        assert_eq!(summary.record_count, 2);
        assert_eq!(summary.gateway_euis, vec!["0102030405060708"]);
        assert!(summary.devaddrs.is_empty());
    }
}
