pub mod crypto;
pub mod encoder;
pub mod keys;

use std::fmt;

/// LoRaWAN MAC Header (MHDR) - Message Type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MType {
    JoinRequest,
    JoinAccept,
    UnconfirmedDataUp,
    UnconfirmedDataDown,
    ConfirmedDataUp,
    ConfirmedDataDown,
    RejoinRequest,
    Proprietary,
}

impl From<u8> for MType {
    fn from(mhdr: u8) -> Self {
        match (mhdr >> 5) & 0x07 {
            0b000 => MType::JoinRequest,
            0b001 => MType::JoinAccept,
            0b010 => MType::UnconfirmedDataUp,
            0b011 => MType::UnconfirmedDataDown,
            0b100 => MType::ConfirmedDataUp,
            0b101 => MType::ConfirmedDataDown,
            0b110 => MType::RejoinRequest,
            _ => MType::Proprietary,
        }
    }
}

impl fmt::Display for MType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MType::JoinRequest => write!(f, "JoinRequest"),
            MType::JoinAccept => write!(f, "JoinAccept"),
            MType::UnconfirmedDataUp => write!(f, "UnconfirmedDataUp"),
            MType::UnconfirmedDataDown => write!(f, "UnconfirmedDataDown"),
            MType::ConfirmedDataUp => write!(f, "ConfirmedDataUp"),
            MType::ConfirmedDataDown => write!(f, "ConfirmedDataDown"),
            MType::RejoinRequest => write!(f, "RejoinRequest"),
            MType::Proprietary => write!(f, "Proprietary"),
        }
    }
}

/// Frame Control byte (FCtrl) for uplink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FCtrl {
    pub adr: bool,
    pub f_opts_len: u8,
}

impl From<u8> for FCtrl {
    fn from(byte: u8) -> Self {
        Self {
            adr: (byte & 0x80) != 0,
            f_opts_len: byte & 0x0F,
        }
    }
}

/// Parsed LoRaWAN data frame.
///
/// The MIC trailer is stripped and never verified: decoding is best-effort,
/// not authenticated.
#[derive(Debug, Clone)]
pub struct PhyFrame {
    pub mtype: MType,
    /// Device address as a number; the wire carries it little-endian
    pub dev_addr: u32,
    pub fctrl: FCtrl,
    /// Low 16 bits of the frame counter, as carried on the wire
    pub fcnt: u16,
    pub f_port: Option<u8>,
    /// FRMPayload ciphertext
    pub frm_payload: Vec<u8>,
}

impl PhyFrame {
    /// DevAddr in its conventional big-endian display form, e.g. `26011BDA`
    pub fn dev_addr_hex(&self) -> String {
        format!("{:08X}", self.dev_addr)
    }
}

impl fmt::Display for PhyFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} DevAddr={:08X} FCnt={} FPort={} Payload={} bytes ADR={}",
            self.mtype,
            self.dev_addr,
            self.fcnt,
            self.f_port.map(|p| p.to_string()).unwrap_or("-".to_string()),
            self.frm_payload.len(),
            self.fctrl.adr,
        )
    }
}

/// Minimum frame: MHDR(1) + DevAddr(4) + FCtrl(1) + FCnt(2)
const MIN_FRAME_LEN: usize = 8;
const MIC_LEN: usize = 4;

/// Parse a LoRaWAN PHY payload (raw bytes after base64 decode).
///
/// A frame that ends inside FOpts has no port and no payload, which is
/// valid. A port with no room left for the MIC yields an empty payload.
pub fn parse_phy_payload(data: &[u8]) -> anyhow::Result<PhyFrame> {
    if data.len() < MIN_FRAME_LEN {
        return Err(anyhow::anyhow!("Payload too short"));
    }

    let mtype = MType::from(data[0]);
    let dev_addr = u32::from_le_bytes(data[1..5].try_into()?);
    let fctrl = FCtrl::from(data[5]);
    let fcnt = u16::from_le_bytes(data[6..8].try_into()?);

    let port_index = MIN_FRAME_LEN + fctrl.f_opts_len as usize;
    let (f_port, frm_payload) = if data.len() <= port_index {
        (None, Vec::new())
    } else {
        let frm_start = port_index + 1;
        let payload = if data.len() < frm_start + MIC_LEN {
            Vec::new()
        } else {
            data[frm_start..data.len() - MIC_LEN].to_vec()
        };
        (Some(data[port_index]), payload)
    };

    Ok(PhyFrame {
        mtype,
        dev_addr,
        fctrl,
        fcnt,
        f_port,
        frm_payload,
    })
}

/// Strip the usual hex separators (space, colon, dash) and upper-case.
pub fn normalize_hex(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ' ' | ':' | '-'))
        .collect::<String>()
        .trim()
        .to_uppercase()
}

/// Parse a big-endian DevAddr string (`26011BDA`) into its numeric form.
pub fn parse_dev_addr(value: &str) -> anyhow::Result<u32> {
    let cleaned = normalize_hex(value);
    if cleaned.len() != 8 {
        return Err(anyhow::anyhow!("DevAddr must be 4 bytes (8 hex chars)"));
    }
    u32::from_str_radix(&cleaned, 16)
        .map_err(|e| anyhow::anyhow!("Invalid DevAddr '{}': {}", value, e))
}
