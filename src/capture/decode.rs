//! Capture decode pipeline
//!
//! Every non-blank line becomes exactly one [`DecodeRow`], in input order,
//! unless the DevAddr filter drops it. A bad line yields an `error` row and
//! the batch carries on.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

use super::{decode_base64_lenient, record_lines, RawRecord};
use crate::lorawan::crypto::decrypt_frm_payload;
use crate::lorawan::keys::KeyStore;
use crate::lorawan::parse_phy_payload;
use crate::script::ScriptDecoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Ok,
    Error,
}

/// One decoded capture record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeRow {
    pub status: RowStatus,
    pub devaddr: Option<String>,
    pub fcnt: Option<u16>,
    pub fport: Option<u8>,
    pub time: Option<String>,
    /// Decrypted FRMPayload, uppercase hex
    pub payload_hex: Option<String>,
    pub decoded_json: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl DecodeRow {
    fn failed(time: Option<String>, error: impl Into<String>) -> Self {
        Self {
            status: RowStatus::Error,
            devaddr: None,
            fcnt: None,
            fport: None,
            time,
            payload_hex: None,
            decoded_json: None,
            error: Some(error.into()),
        }
    }
}

/// What to do with each record besides decrypting it
#[derive(Debug, Default, Clone, Copy)]
pub struct DecodeOptions<'a> {
    /// Script to run on the decrypted bytes
    pub decoder: Option<&'a ScriptDecoder>,
    /// Only keep these DevAddrs (normalized hex); empty means keep all
    pub allowed_devaddrs: Option<&'a HashSet<String>>,
}

pub fn decode_lines<I, S>(lines: I, keys: &KeyStore, options: DecodeOptions<'_>) -> Vec<DecodeRow>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let allowed = options.allowed_devaddrs.filter(|set| !set.is_empty());
    let mut rows = Vec::new();
    let mut filtered = 0usize;

    for line in record_lines(lines) {
        match decode_record(line.as_ref().trim(), keys, options.decoder, allowed) {
            Some(row) => rows.push(row),
            None => filtered += 1,
        }
    }

    let errors = rows.iter().filter(|r| r.status == RowStatus::Error).count();
    info!(
        "Decoded {} record(s): {} ok, {} error, {} filtered",
        rows.len(),
        rows.len() - errors,
        errors,
        filtered
    );
    rows
}

/// Decode one line; `None` means the DevAddr filter dropped it
fn decode_record(
    line: &str,
    keys: &KeyStore,
    decoder: Option<&ScriptDecoder>,
    allowed: Option<&HashSet<String>>,
) -> Option<DecodeRow> {
    let record = match RawRecord::parse(line) {
        Ok(record) => record,
        Err(e) => {
            debug!("Invalid JSON line: {}", e);
            return Some(DecodeRow::failed(None, "Invalid JSON"));
        }
    };

    if record.rxpk().is_none() {
        return Some(DecodeRow::failed(None, "Missing rxpk"));
    }
    let time = record.time();
    let Some(data) = record.data() else {
        return Some(DecodeRow::failed(time, "Missing data"));
    };

    let frame = match decode_base64_lenient(data).and_then(|raw| parse_phy_payload(&raw)) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Failed to decode LoRaWAN frame: {}", e);
            return Some(DecodeRow::failed(time, e.to_string()));
        }
    };

    let devaddr = frame.dev_addr_hex();
    if allowed.is_some_and(|set| !set.contains(&devaddr)) {
        return None;
    }

    let Some(session) = keys.get(&devaddr) else {
        return Some(DecodeRow {
            devaddr: Some(devaddr),
            fcnt: Some(frame.fcnt),
            fport: frame.f_port,
            ..DecodeRow::failed(time, "Missing device credentials")
        });
    };

    let plaintext = match frame.f_port {
        Some(_) if !frame.frm_payload.is_empty() => decrypt_frm_payload(
            session.key_for_port(frame.f_port),
            frame.dev_addr,
            frame.fcnt,
            &frame.frm_payload,
        ),
        _ => frame.frm_payload.clone(),
    };

    let (decoded_json, error) = match decoder.map(|d| d.decode(&plaintext, frame.f_port)) {
        Some(Ok(value)) => (Some(value), None),
        Some(Err(e)) => {
            debug!("Decoder failed for {} FCnt={}: {}", devaddr, frame.fcnt, e);
            (None, Some(format!("Decoder error: {}", e)))
        }
        None => (None, None),
    };

    Some(DecodeRow {
        status: if error.is_some() {
            RowStatus::Error
        } else {
            RowStatus::Ok
        },
        devaddr: Some(devaddr),
        fcnt: Some(frame.fcnt),
        fport: frame.f_port,
        time,
        payload_hex: Some(hex::encode_upper(&plaintext)),
        decoded_json,
        error,
    })
}
