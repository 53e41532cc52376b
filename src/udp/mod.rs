pub mod protocol;

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::capture::{decode_base64_lenient, record_lines, RawRecord};
use crate::lorawan::{self, normalize_hex};
use protocol::{GatewayEui, GwmpPacket, PushDataPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayStatus {
    Sent,
    Error,
}

/// Outcome of replaying one capture line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayRow {
    pub status: ReplayStatus,
    pub gateway_eui: Option<String>,
    pub frequency: Option<f64>,
    pub size: Option<u64>,
    pub message: String,
}

impl ReplayRow {
    fn error(gateway_eui: Option<String>, message: impl Into<String>) -> Self {
        Self {
            status: ReplayStatus::Error,
            gateway_eui,
            frequency: None,
            size: None,
            message: message.into(),
        }
    }
}

/// Replay capture lines to `host:port` as PUSH_DATA datagrams.
///
/// One socket serves the whole batch and is dropped when the batch ends.
/// Each send is bounded by `timeout`; failures are recorded per line and do
/// not stop the batch.
pub async fn replay_lines<I, S>(
    lines: I,
    host: &str,
    port: u16,
    timeout: Duration,
) -> anyhow::Result<Vec<ReplayRow>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    if timeout.is_zero() {
        anyhow::bail!("replay timeout must be positive");
    }

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    info!("Replaying capture to {}:{}", host, port);

    let mut rows = Vec::new();
    for line in record_lines(lines) {
        rows.push(replay_record(&socket, line.as_ref().trim(), host, port, timeout).await);
    }

    let sent = rows.iter().filter(|r| r.status == ReplayStatus::Sent).count();
    info!("Replay finished: {} sent, {} error", sent, rows.len() - sent);
    Ok(rows)
}

async fn replay_record(
    socket: &UdpSocket,
    line: &str,
    host: &str,
    port: u16,
    timeout: Duration,
) -> ReplayRow {
    let record = match RawRecord::parse(line) {
        Ok(record) => record,
        Err(_) => return ReplayRow::error(None, "Invalid JSON"),
    };

    // Replay takes `gatewayEui` verbatim; a blank value is an invalid EUI
    let gateway = record.str_field("gatewayEui").map(str::to_string);
    let (Some(gateway), Some(rxpk)) = (gateway.clone(), record.rxpk()) else {
        return ReplayRow::error(gateway, "Missing gatewayEui or rxpk");
    };

    let frequency = rxpk.get("freq").and_then(serde_json::Value::as_f64);
    let size = rxpk.get("size").and_then(serde_json::Value::as_u64);

    let result = async {
        let eui = parse_gateway_eui(&gateway)?;
        let body = serde_json::to_vec(&serde_json::json!({ "rxpk": [rxpk] }))?;
        let packet = GwmpPacket::push_data(random_token()?, &eui, &body);
        tokio::time::timeout(timeout, socket.send_to(&packet, (host, port)))
            .await
            .map_err(|_| anyhow::anyhow!("Send timed out after {:?}", timeout))??;
        anyhow::Ok(())
    }
    .await;

    let (status, message) = match result {
        Ok(()) => (ReplayStatus::Sent, "Sent".to_string()),
        Err(e) => {
            warn!("Replay failed for gateway {}: {}", gateway, e);
            (ReplayStatus::Error, e.to_string())
        }
    };

    ReplayRow {
        status,
        gateway_eui: Some(gateway),
        frequency,
        size,
        message,
    }
}

/// 16 hex chars, separators allowed
fn parse_gateway_eui(value: &str) -> anyhow::Result<GatewayEui> {
    let cleaned = normalize_hex(value);
    if cleaned.len() != 16 {
        anyhow::bail!("Invalid gateway EUI");
    }
    let bytes = hex::decode(cleaned).map_err(|_| anyhow::anyhow!("Invalid gateway EUI"))?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("Invalid gateway EUI"))
}

fn random_token() -> anyhow::Result<u16> {
    let mut bytes = [0u8; 2];
    getrandom::getrandom(&mut bytes).map_err(|e| anyhow::anyhow!("Failed to generate token: {}", e))?;
    Ok(u16::from_be_bytes(bytes))
}

/// Run a GWMP listener on `bind` that acknowledges and logs what it
/// receives. A local target for replays.
pub async fn run_sink(bind: &str) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(bind).await?;
    info!("Replay sink listening on {}", socket.local_addr()?);
    serve(socket).await
}

pub async fn serve(socket: UdpSocket) -> anyhow::Result<()> {
    let mut buf = vec![0u8; 65535];

    loop {
        let (len, src) = socket.recv_from(&mut buf).await?;
        debug!("Received {} bytes from {}", len, src);

        match GwmpPacket::parse(&buf[..len]) {
            Ok(packet) => {
                if let Some(ack) = handle_packet(src, packet) {
                    if let Err(e) = socket.send_to(&ack, src).await {
                        error!("Failed to send ACK to {}: {}", src, e);
                    }
                }
            }
            Err(e) => {
                warn!("Failed to parse GWMP packet from {}: {}", src, e);
            }
        }
    }
}

/// Log an upstream packet and return the ACK to send back, if any
fn handle_packet(src: SocketAddr, packet: GwmpPacket) -> Option<Vec<u8>> {
    match packet {
        GwmpPacket::PushData {
            random_token,
            gateway_eui,
            json_payload,
        } => {
            info!(
                "PUSH_DATA from gateway {} at {} (token: 0x{:04x})",
                hex::encode_upper(gateway_eui),
                src,
                random_token
            );
            log_push_data(&json_payload);
            Some(GwmpPacket::push_ack(random_token))
        }
        GwmpPacket::PullData {
            random_token,
            gateway_eui,
        } => {
            debug!(
                "PULL_DATA from gateway {} (token: 0x{:04x})",
                hex::encode_upper(gateway_eui),
                random_token
            );
            Some(GwmpPacket::pull_ack(random_token))
        }
        GwmpPacket::TxAck {
            random_token,
            gateway_eui,
            json_payload,
        } => {
            debug!(
                "TX_ACK from gateway {} (token: 0x{:04x}): {:?}",
                hex::encode_upper(gateway_eui),
                random_token,
                json_payload
            );
            None
        }
    }
}

fn log_push_data(json_payload: &str) {
    let payload = match serde_json::from_str::<PushDataPayload>(json_payload) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to parse PUSH_DATA JSON: {}", e);
            debug!("  Raw JSON: {}", json_payload);
            return;
        }
    };

    for rxpk in payload.rxpk.unwrap_or_default() {
        info!(
            "  rxpk: time={} freq={:?} MHz, rssi={:?} dBm, datr={}, size={:?} bytes",
            rxpk.time.as_deref().unwrap_or("-"),
            rxpk.freq,
            rxpk.rssi,
            rxpk.datr.as_deref().unwrap_or("-"),
            rxpk.size
        );
        match decode_base64_lenient(&rxpk.data).and_then(|raw| lorawan::parse_phy_payload(&raw)) {
            Ok(frame) => info!("  LoRaWAN: {}", frame),
            Err(e) => warn!("  Failed to decode LoRaWAN frame: {}", e),
        }
    }

    if let Some(stat) = payload.stat {
        debug!("  Gateway status: {}", stat);
    }
}
