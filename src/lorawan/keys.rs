//! LoRaWAN session key store
//!
//! - NwkSKey keys FPort 0 (MAC command) payloads
//! - AppSKey keys application payloads (FPort > 0)
//! - DevAddr → session key mapping, loaded from a TOML file
//!
//! Keys are only ever read here; activation and key derivation happen
//! elsewhere.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use super::normalize_hex;

/// Session keys for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    /// Normalized uppercase big-endian hex, e.g. `26011BDA`
    pub dev_addr: String,
    pub nwk_s_key: [u8; 16],
    pub app_s_key: [u8; 16],
}

impl SessionKeys {
    /// Build from hex strings as they appear in key files
    pub fn from_hex(dev_addr: &str, nwk_s_key: &str, app_s_key: &str) -> anyhow::Result<Self> {
        let dev_addr = normalize_hex(dev_addr);
        if dev_addr.len() != 8 {
            anyhow::bail!("DevAddr must be 4 bytes (8 hex chars), got '{}'", dev_addr);
        }
        Ok(Self {
            nwk_s_key: parse_key(nwk_s_key).context("invalid nwkskey")?,
            app_s_key: parse_key(app_s_key).context("invalid appskey")?,
            dev_addr,
        })
    }

    /// FPort 0 (or no port) selects the network key, anything else the
    /// application key.
    pub fn key_for_port(&self, f_port: Option<u8>) -> &[u8; 16] {
        match f_port {
            Some(port) if port > 0 => &self.app_s_key,
            _ => &self.nwk_s_key,
        }
    }
}

fn parse_key(value: &str) -> anyhow::Result<[u8; 16]> {
    let bytes = hex::decode(normalize_hex(value))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow::anyhow!("session key must be 16 bytes, got {}", b.len()))
}

#[derive(Debug, Deserialize)]
struct KeyFile {
    #[serde(default)]
    device: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
struct DeviceEntry {
    devaddr: String,
    nwkskey: String,
    appskey: String,
}

/// Session key store, keyed by normalized DevAddr
#[derive(Debug, Default, Clone)]
pub struct KeyStore {
    sessions: HashMap<String, SessionKeys>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Load `[[device]]` entries from a TOML key file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let file: KeyFile =
            toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse key file: {}", e))?;

        let mut store = Self::new();
        for entry in file.device {
            let keys = SessionKeys::from_hex(&entry.devaddr, &entry.nwkskey, &entry.appskey)
                .with_context(|| format!("device {}", entry.devaddr))?;
            store.insert(keys);
        }
        Ok(store)
    }

    pub fn insert(&mut self, keys: SessionKeys) {
        self.sessions.insert(keys.dev_addr.clone(), keys);
    }

    /// Look up session keys by DevAddr (any casing or separators)
    pub fn get(&self, dev_addr: &str) -> Option<&SessionKeys> {
        self.sessions.get(&normalize_hex(dev_addr))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const APPSKEY: &str = "000102030405060708090A0B0C0D0E0F";
    const NWKSKEY: &str = "F0E0D0C0B0A090807060504030201000";

    #[test]
    fn test_key_selection_by_port() {
        let keys = SessionKeys::from_hex("26011bda", NWKSKEY, APPSKEY).unwrap();
        assert_eq!(keys.dev_addr, "26011BDA");
        assert_eq!(keys.key_for_port(Some(1)), &keys.app_s_key);
        assert_eq!(keys.key_for_port(Some(0)), &keys.nwk_s_key);
        assert_eq!(keys.key_for_port(None), &keys.nwk_s_key);
    }

    #[test]
    fn test_rejects_short_key() {
        assert!(SessionKeys::from_hex("26011BDA", "0011", APPSKEY).is_err());
        assert!(SessionKeys::from_hex("26011B", NWKSKEY, APPSKEY).is_err());
    }

    #[test]
    fn test_load_key_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[device]]
devaddr = "26:01:1B:DA"
nwkskey = "{NWKSKEY}"
appskey = "{APPSKEY}"

[[device]]
devaddr = "01020304"
nwkskey = "{NWKSKEY}"
appskey = "{APPSKEY}"
"#
        )
        .unwrap();

        let store = KeyStore::load(file.path()).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get("26011bda").is_some());
        assert!(store.get("01-02-03-04").is_some());
        assert!(store.get("DEADBEEF").is_none());
    }
}
