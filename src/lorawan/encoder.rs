//! LoRaWAN frame encoder
//!
//! Builds raw LoRaWAN PHY payloads for synthetic capture logs and tests.
//!
//! Frame structure (unconfirmed data up):
//!   MHDR(1) | DevAddr(4,LE) | FCtrl(1) | FCnt(2,LE) | [FPort(1) | FRMPayload(N)] | MIC(4,LE)
//!
//! The MIC is always 0x00000000; nothing downstream verifies it.

use super::crypto::encrypt_frm_payload;
use super::keys::SessionKeys;

/// MHDR for unconfirmed data up: MType 010, RFU 000, Major 00
const MHDR_UNCONFIRMED_UP: u8 = 0x40;

/// Parameters for building an uplink data frame
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    /// Device address (32-bit)
    pub dev_addr: u32,
    /// Frame counter (16-bit on the wire)
    pub fcnt: u16,
    /// FPort (0 for MAC commands, 1-223 for application data)
    pub f_port: u8,
    /// FRMPayload bytes, already encrypted if that is wanted
    pub payload: Vec<u8>,
}

impl FrameBuilder {
    /// Create a new frame builder for an unconfirmed uplink
    pub fn new_uplink(dev_addr: u32, fcnt: u16, f_port: u8, payload: Vec<u8>) -> Self {
        Self {
            dev_addr,
            fcnt,
            f_port,
            payload,
        }
    }

    /// Encrypt the payload with the session key the port selects
    pub fn encrypted(mut self, keys: &SessionKeys) -> Self {
        let key = keys.key_for_port(Some(self.f_port));
        self.payload = encrypt_frm_payload(key, self.dev_addr, self.fcnt, &self.payload);
        self
    }

    /// Build the raw LoRaWAN PHY payload bytes
    ///
    /// Returns bytes ready for base64 encoding into rxpk.data. With an empty
    /// payload the port is omitted, so a parser reads the first MIC byte
    /// (0x00) as FPort 0 with an empty FRMPayload.
    pub fn build(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(13 + self.payload.len());

        frame.push(MHDR_UNCONFIRMED_UP);

        frame.extend_from_slice(&self.dev_addr.to_le_bytes());

        // FCtrl: ADR=0, ACK=0, FPending=0, FOptsLen=0
        frame.push(0x00);

        frame.extend_from_slice(&self.fcnt.to_le_bytes());

        // FPort only if payload is present
        if !self.payload.is_empty() {
            frame.push(self.f_port);
            frame.extend_from_slice(&self.payload);
        }

        frame.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);

        frame
    }
}
