//! Semtech UDP Packet Forwarder Protocol (GWMP)
//!
//! Reference: https://github.com/Lora-net/packet_forwarder/blob/master/PROTOCOL.TXT
//!
//! The protocol uses a simple binary header followed by JSON payload.
//! All multi-byte integers are big-endian (network byte order).

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// Protocol version (always 0x02)
pub const PROTOCOL_VERSION: u8 = 0x02;

/// Packet types (identifier byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    PushData = 0x00,
    PushAck = 0x01,
    PullData = 0x02,
    PullResp = 0x03,
    PullAck = 0x04,
    TxAck = 0x05,
}

impl TryFrom<u8> for PacketType {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(PacketType::PushData),
            0x01 => Ok(PacketType::PushAck),
            0x02 => Ok(PacketType::PullData),
            0x03 => Ok(PacketType::PullResp),
            0x04 => Ok(PacketType::PullAck),
            0x05 => Ok(PacketType::TxAck),
            _ => Err(anyhow::anyhow!("Unknown packet type: 0x{:02x}", value)),
        }
    }
}

/// Gateway identifier (EUI-64, 8 bytes)
pub type GatewayEui = [u8; 8];

/// Parsed upstream GWMP packet
#[derive(Debug)]
pub enum GwmpPacket {
    PushData {
        random_token: u16,
        gateway_eui: GatewayEui,
        json_payload: String,
    },
    PullData {
        random_token: u16,
        gateway_eui: GatewayEui,
    },
    TxAck {
        random_token: u16,
        gateway_eui: GatewayEui,
        json_payload: Option<String>,
    },
}

/// Rxpk (received packet) fields the replay sink logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rxpk {
    /// UTC time of packet reception
    pub time: Option<String>,
    /// Frequency in MHz
    pub freq: Option<f64>,
    /// RSSI in dBm
    pub rssi: Option<f64>,
    /// LoRa datarate identifier (e.g., "SF7BW125")
    pub datr: Option<String>,
    /// RF packet payload size in bytes
    pub size: Option<u16>,
    /// Base64 encoded RF packet payload
    pub data: String,
}

/// Push data JSON wrapper
#[derive(Debug, Deserialize)]
pub struct PushDataPayload {
    pub rxpk: Option<Vec<Rxpk>>,
    pub stat: Option<serde_json::Value>,
}

impl GwmpPacket {
    /// Parse a raw UDP datagram into a GWMP packet
    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        if data.len() < 4 {
            return Err(anyhow::anyhow!("Packet too short: {} bytes", data.len()));
        }

        let mut buf = data;

        let version = buf.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(anyhow::anyhow!(
                "Unsupported protocol version: 0x{:02x}",
                version
            ));
        }

        let random_token = buf.get_u16();
        let packet_type = PacketType::try_from(buf.get_u8())?;

        match packet_type {
            PacketType::PushData => {
                let gateway_eui = read_eui(&mut buf, "PUSH_DATA")?;
                let json_payload = String::from_utf8(buf.to_vec())
                    .map_err(|e| anyhow::anyhow!("Invalid UTF-8 in JSON payload: {}", e))?;

                Ok(GwmpPacket::PushData {
                    random_token,
                    gateway_eui,
                    json_payload,
                })
            }
            PacketType::PullData => {
                let gateway_eui = read_eui(&mut buf, "PULL_DATA")?;
                Ok(GwmpPacket::PullData {
                    random_token,
                    gateway_eui,
                })
            }
            PacketType::TxAck => {
                let gateway_eui = read_eui(&mut buf, "TX_ACK")?;
                let json_payload = if buf.has_remaining() {
                    Some(
                        String::from_utf8(buf.to_vec())
                            .map_err(|e| anyhow::anyhow!("Invalid UTF-8: {}", e))?,
                    )
                } else {
                    None
                };

                Ok(GwmpPacket::TxAck {
                    random_token,
                    gateway_eui,
                    json_payload,
                })
            }
            _ => Err(anyhow::anyhow!(
                "Unexpected packet type for parsing: {:?}",
                packet_type
            )),
        }
    }

    /// Build a PUSH_DATA datagram carrying `json_payload`
    pub fn push_data(random_token: u16, gateway_eui: &GatewayEui, json_payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(12 + json_payload.len());
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u16(random_token);
        buf.put_u8(PacketType::PushData as u8);
        buf.put_slice(gateway_eui);
        buf.put_slice(json_payload);
        buf.to_vec()
    }

    /// Build a PUSH_ACK response
    pub fn push_ack(random_token: u16) -> Vec<u8> {
        ack(random_token, PacketType::PushAck)
    }

    /// Build a PULL_ACK response
    pub fn pull_ack(random_token: u16) -> Vec<u8> {
        ack(random_token, PacketType::PullAck)
    }
}

fn ack(random_token: u16, packet_type: PacketType) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u16(random_token);
    buf.put_u8(packet_type as u8);
    buf.to_vec()
}

fn read_eui(buf: &mut &[u8], what: &str) -> anyhow::Result<GatewayEui> {
    if buf.remaining() < 8 {
        return Err(anyhow::anyhow!("{} too short for gateway EUI", what));
    }
    let mut gateway_eui = [0u8; 8];
    buf.copy_to_slice(&mut gateway_eui);
    Ok(gateway_eui)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EUI: GatewayEui = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11];

    #[test]
    fn test_push_data_layout() {
        let packet = GwmpPacket::push_data(0x1234, &EUI, br#"{"rxpk":[]}"#);

        assert_eq!(&packet[..4], &[0x02, 0x12, 0x34, 0x00]);
        assert_eq!(&packet[4..12], &EUI);
        assert_eq!(&packet[12..], br#"{"rxpk":[]}"#);

        match GwmpPacket::parse(&packet).unwrap() {
            GwmpPacket::PushData {
                random_token,
                gateway_eui,
                json_payload,
            } => {
                assert_eq!(random_token, 0x1234);
                assert_eq!(gateway_eui, EUI);
                assert_eq!(json_payload, r#"{"rxpk":[]}"#);
            }
            other => panic!("Expected PUSH_DATA, got {:?}", other),
        }
    }

    #[test]
    fn test_acks_echo_token() {
        assert_eq!(GwmpPacket::push_ack(0xBEEF), vec![0x02, 0xBE, 0xEF, 0x01]);
        assert_eq!(GwmpPacket::pull_ack(0xBEEF), vec![0x02, 0xBE, 0xEF, 0x04]);
    }

    #[test]
    fn test_parse_rejects_bad_headers() {
        assert!(GwmpPacket::parse(&[0x02, 0x00]).is_err());
        assert!(GwmpPacket::parse(&[0x01, 0x00, 0x00, 0x00]).is_err());
        assert!(GwmpPacket::parse(&[0x02, 0x00, 0x00, 0x09]).is_err());
        assert!(GwmpPacket::parse(&[0x02, 0x00, 0x00, 0x00, 0xAA]).is_err());
    }

    #[test]
    fn test_parse_pull_data() {
        let mut packet = vec![0x02, 0x00, 0x07, 0x02];
        packet.extend_from_slice(&EUI);
        assert!(matches!(
            GwmpPacket::parse(&packet).unwrap(),
            GwmpPacket::PullData { random_token: 7, .. }
        ));
    }
}
