//! Token-based capture workflow
//!
//! Scan a capture file to get a scan token, decode or replay by that token
//! (or by path), then export a decode result by its decode token. Both
//! result caches are owned here; build one `Workbench` at startup and pass
//! it by reference.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{CacheEntry, EphemeralCache};
use crate::capture::decode::{decode_lines, DecodeOptions, DecodeRow};
use crate::capture::export::{export, ExportFormat};
use crate::capture::scan::{scan_lines, ScanSummary};
use crate::config::Config;
use crate::lorawan::keys::KeyStore;
use crate::lorawan::normalize_hex;
use crate::script::{ScriptDecoder, ScriptLimits};
use crate::udp::{replay_lines, ReplayRow};

/// A token that is unknown or past its TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenExpired {
    pub kind: &'static str,
}

impl fmt::Display for TokenExpired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} token expired or missing", self.kind)
    }
}

impl std::error::Error for TokenExpired {}

/// What a scan token remembers
#[derive(Debug, Clone, Serialize)]
pub struct ScanContext {
    pub source: PathBuf,
    pub summary: ScanSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanTicket {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub summary: ScanSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecodeTicket {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub rows: Vec<DecodeRow>,
}

/// Where a decode or replay reads its capture from
#[derive(Debug, Clone)]
pub enum CaptureSource<'a> {
    ScanToken(&'a str),
    File(&'a Path),
}

pub struct Workbench {
    scan_cache: EphemeralCache<ScanContext>,
    decode_cache: EphemeralCache<Vec<DecodeRow>>,
    keys: KeyStore,
    limits: ScriptLimits,
    replay_timeout: Duration,
}

impl Workbench {
    pub fn new(config: &Config, keys: KeyStore) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            scan_cache: EphemeralCache::new(config.cache.scan_ttl(), config.cache.scan_max_items)?,
            decode_cache: EphemeralCache::new(
                config.cache.decode_ttl(),
                config.cache.decode_max_items,
            )?,
            keys,
            limits: config.decoder.limits(),
            replay_timeout: config.replay.timeout()?,
        })
    }

    pub fn scan_file(&self, path: &Path) -> anyhow::Result<ScanTicket> {
        let content = read_capture(path)?;
        let summary = scan_lines(content.lines());
        info!(
            "Scanned {:?}: {} record(s), {} gateway(s), {} device(s)",
            path,
            summary.record_count,
            summary.gateway_euis.len(),
            summary.devaddrs.len()
        );

        let entry = self.scan_cache.create(ScanContext {
            source: path.to_path_buf(),
            summary: summary.clone(),
        })?;
        debug!("Scan cache holds {} result(s)", self.scan_cache.len());
        Ok(ScanTicket {
            token: entry.token.clone(),
            expires_at: entry.expires_at,
            summary,
        })
    }

    pub fn scan_context(&self, token: &str) -> anyhow::Result<Arc<CacheEntry<ScanContext>>> {
        self.scan_cache
            .get(token)
            .ok_or_else(|| TokenExpired { kind: "Scan" }.into())
    }

    /// Decode a capture and cache the rows under a new decode token.
    ///
    /// `devaddrs` entries are normalized; blank entries are ignored and an
    /// empty list decodes every device.
    pub fn decode(
        &self,
        source: CaptureSource<'_>,
        decoder_source: Option<&str>,
        devaddrs: &[String],
    ) -> anyhow::Result<DecodeTicket> {
        let path = self.resolve(source)?;
        let content = read_capture(&path)?;

        let decoder = decoder_source.map(|script| ScriptDecoder::new(script, self.limits));
        let allowed: HashSet<String> = devaddrs
            .iter()
            .filter(|item| !item.trim().is_empty())
            .map(|item| normalize_hex(item))
            .collect();
        let options = DecodeOptions {
            decoder: decoder.as_ref(),
            allowed_devaddrs: (!allowed.is_empty()).then_some(&allowed),
        };

        let rows = decode_lines(content.lines(), &self.keys, options);
        let entry = self.decode_cache.create(rows.clone())?;
        debug!("Decode cache holds {} result(s)", self.decode_cache.len());
        Ok(DecodeTicket {
            token: entry.token.clone(),
            expires_at: entry.expires_at,
            rows,
        })
    }

    pub async fn replay(
        &self,
        source: CaptureSource<'_>,
        host: &str,
        port: u16,
    ) -> anyhow::Result<Vec<ReplayRow>> {
        let path = self.resolve(source)?;
        let content = read_capture(&path)?;
        replay_lines(content.lines(), host, port, self.replay_timeout).await
    }

    /// Rows of an earlier decode, by decode token
    pub fn decode_rows(&self, token: &str) -> anyhow::Result<Arc<CacheEntry<Vec<DecodeRow>>>> {
        self.decode_cache
            .get(token)
            .ok_or_else(|| TokenExpired { kind: "Decode" }.into())
    }

    pub fn export(&self, token: &str, format: ExportFormat) -> anyhow::Result<String> {
        let entry = self.decode_rows(token)?;
        export(&entry.value, format)
    }

    fn resolve(&self, source: CaptureSource<'_>) -> anyhow::Result<PathBuf> {
        match source {
            CaptureSource::ScanToken(token) => Ok(self.scan_context(token)?.value.source.clone()),
            CaptureSource::File(path) => Ok(path.to_path_buf()),
        }
    }
}

fn read_capture(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read capture file {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::decode::RowStatus;
    use crate::capture::generate::{generate_lines, GenerateParams};
    use crate::lorawan::keys::SessionKeys;
    use chrono::TimeZone;
    use std::io::Write;
    use tokio::net::UdpSocket;

    fn keys() -> SessionKeys {
        SessionKeys::from_hex(
            "26011BDA",
            "F0E0D0C0B0A090807060504030201000",
            "000102030405060708090A0B0C0D0E0F",
        )
        .unwrap()
    }

    fn capture_file() -> tempfile::NamedTempFile {
        let params = GenerateParams {
            gateway_eui: "0102030405060708".to_string(),
            devaddr: "26011BDA".to_string(),
            frames: 2,
            interval_seconds: 10,
            start_time: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            frequency_mhz: 868.1,
            datarate: "SF7BW125".to_string(),
            coding_rate: "4/5".to_string(),
            payload_hex: Some("01020304".to_string()),
            f_port: 1,
            keys: Some(keys()),
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in generate_lines(&params).unwrap() {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    fn workbench() -> Workbench {
        let mut store = KeyStore::new();
        store.insert(keys());
        Workbench::new(&Config::default(), store).unwrap()
    }

    #[test]
    fn test_scan_decode_export_by_token() {
        let file = capture_file();
        let bench = workbench();

        let scan = bench.scan_file(file.path()).unwrap();
        assert_eq!(scan.summary.record_count, 2);
        assert_eq!(bench.scan_context(&scan.token).unwrap().value.source, file.path());

        let decoder = "function Decoder(bytes, port) { return { n: bytes.length }; }";
        let decoded = bench
            .decode(CaptureSource::ScanToken(&scan.token), Some(decoder), &[])
            .unwrap();
        assert_eq!(decoded.rows.len(), 2);
        assert!(decoded.rows.iter().all(|r| r.status == RowStatus::Ok));

        let csv = bench.export(&decoded.token, ExportFormat::Csv).unwrap();
        assert_eq!(csv.lines().count(), 3);
        assert!(csv.contains(r#""{""n"":4}""#));

        let json = bench.export(&decoded.token, ExportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[1]["fcnt"], 1);
    }

    #[test]
    fn test_devaddr_filter_is_normalized() {
        let file = capture_file();
        let bench = workbench();

        let other = bench
            .decode(CaptureSource::File(file.path()), None, &["01:02:03:04".to_string()])
            .unwrap();
        assert!(other.rows.is_empty());

        let mine = bench
            .decode(
                CaptureSource::File(file.path()),
                None,
                &["26-01-1b-da".to_string(), "  ".to_string()],
            )
            .unwrap();
        assert_eq!(mine.rows.len(), 2);

        let blank_only = bench
            .decode(CaptureSource::File(file.path()), None, &[" ".to_string()])
            .unwrap();
        assert_eq!(blank_only.rows.len(), 2);
    }

    #[test]
    fn test_unknown_tokens_are_not_found() {
        let bench = workbench();

        let err = bench
            .decode(CaptureSource::ScanToken("missing"), None, &[])
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<TokenExpired>(),
            Some(&TokenExpired { kind: "Scan" })
        );

        let err = bench.export("missing", ExportFormat::Json).unwrap_err();
        assert_eq!(
            err.downcast_ref::<TokenExpired>(),
            Some(&TokenExpired { kind: "Decode" })
        );
    }

    #[test]
    fn test_out_of_range_config_is_an_error() {
        let mut config = Config::default();
        config.cache.decode_ttl_secs = 10_000_000_000_000;
        assert!(Workbench::new(&config, KeyStore::new()).is_err());

        let mut config = Config::default();
        config.replay.timeout_secs = 1e30;
        assert!(Workbench::new(&config, KeyStore::new()).is_err());
    }

    #[test]
    fn test_replay_by_scan_token() {
        let file = capture_file();
        let bench = workbench();
        let scan = bench.scan_file(file.path()).unwrap();

        let rows = tokio_test::block_on(async {
            let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            bench
                .replay(CaptureSource::ScanToken(&scan.token), "127.0.0.1", port)
                .await
                .unwrap()
        });
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.message == "Sent"));
    }
}
