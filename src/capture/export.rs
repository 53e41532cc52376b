//! JSON and CSV export of decoded rows

use super::decode::{DecodeRow, RowStatus};

/// CSV column order
pub const CSV_HEADER: [&str; 8] = [
    "status",
    "devaddr",
    "fcnt",
    "fport",
    "time",
    "payload_hex",
    "decoded_json",
    "error",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
}

pub fn export(rows: &[DecodeRow], format: ExportFormat) -> anyhow::Result<String> {
    match format {
        ExportFormat::Json => export_json(rows),
        ExportFormat::Csv => export_csv(rows),
    }
}

pub fn export_json(rows: &[DecodeRow]) -> anyhow::Result<String> {
    Ok(serde_json::to_string(rows)?)
}

/// One CSV line per row; `decoded_json` is embedded as compact JSON text
/// and missing values are empty cells.
pub fn export_csv(rows: &[DecodeRow]) -> anyhow::Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;

    for row in rows {
        let status = match row.status {
            RowStatus::Ok => "ok",
            RowStatus::Error => "error",
        };
        let decoded_json = row
            .decoded_json
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        writer.write_record([
            status.to_string(),
            row.devaddr.clone().unwrap_or_default(),
            row.fcnt.map(|v| v.to_string()).unwrap_or_default(),
            row.fport.map(|v| v.to_string()).unwrap_or_default(),
            row.time.clone().unwrap_or_default(),
            row.payload_hex.clone().unwrap_or_default(),
            decoded_json.unwrap_or_default(),
            row.error.clone().unwrap_or_default(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV: {}", e))?;
    Ok(String::from_utf8(bytes)?)
}
