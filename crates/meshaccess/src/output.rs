use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_table(header: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

/// Raw output is lowercase hex on one line.
pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = writeln!(out, "{}", hex::encode(data));
    let _ = out.flush();
}

/// Hex string for a payload, shortened for table cells.
pub fn payload_preview(payload: &[u8]) -> String {
    const MAX: usize = 24;
    if payload.len() <= MAX {
        hex::encode(payload)
    } else {
        format!("{}.. ({} bytes)", hex::encode(&payload[..MAX]), payload.len())
    }
}
