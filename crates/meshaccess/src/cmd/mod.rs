use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod comp;
pub mod metadata;
pub mod opcode;
pub mod recv;
pub mod schedule;
pub mod sizes;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print a composition data page of a node.
    Comp(CompArgs),
    /// Print the models metadata page of a node.
    Metadata(MetadataArgs),
    /// Print the size of every page a node serves.
    Sizes(SizesArgs),
    /// Decode an access opcode.
    Opcode(OpcodeArgs),
    /// Deliver one access message to a node and print the outcome.
    Recv(RecvArgs),
    /// Simulate publication of one model on a virtual clock.
    Schedule(ScheduleArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Comp(args) => comp::run(args, format),
        Command::Metadata(args) => metadata::run(args, format),
        Command::Sizes(args) => sizes::run(args, format),
        Command::Opcode(args) => opcode::run(args, format),
        Command::Recv(args) => recv::run(args, format),
        Command::Schedule(args) => schedule::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct CompArgs {
    /// Node description (JSON).
    pub node: PathBuf,
    /// Composition data page number.
    #[arg(long, short = 'p', default_value = "0")]
    pub page: u8,
    /// Byte offset into the page.
    #[arg(long, default_value = "0", conflicts_with = "whole")]
    pub offset: usize,
    /// Maximum number of bytes to return.
    #[arg(long)]
    pub max_len: Option<usize>,
    /// Return whole elements only, as a Config Composition Data Status would.
    #[arg(long)]
    pub whole: bool,
}

#[derive(Args, Debug)]
pub struct MetadataArgs {
    /// Node description (JSON).
    pub node: PathBuf,
    /// Models metadata page number.
    #[arg(long, short = 'p', default_value = "0")]
    pub page: u8,
    /// Byte offset into the page.
    #[arg(long, default_value = "0")]
    pub offset: usize,
    /// Maximum number of bytes to return.
    #[arg(long)]
    pub max_len: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SizesArgs {
    /// Node description (JSON).
    pub node: PathBuf,
}

#[derive(Args, Debug)]
pub struct OpcodeArgs {
    /// Access message or opcode as hex (e.g. 8204, c15900).
    pub hex: String,
}

#[derive(Args, Debug)]
pub struct RecvArgs {
    /// Node description (JSON).
    pub node: PathBuf,
    /// Access message as hex, opcode first.
    pub hex: String,
    /// Source address.
    #[arg(long, default_value = "0x7fff", value_parser = parse_u16)]
    pub src: u16,
    /// Destination address.
    #[arg(long, value_parser = parse_u16)]
    pub dst: u16,
    /// Application key index (0xfffe for the local device key).
    #[arg(long, default_value = "0", value_parser = parse_u16)]
    pub app_idx: u16,
    /// Virtual label, required for virtual destinations.
    #[arg(long)]
    pub label: Option<String>,
}

#[derive(Args, Debug)]
pub struct ScheduleArgs {
    /// Node description (JSON).
    pub node: PathBuf,
    /// Element index.
    #[arg(long, default_value = "0")]
    pub elem: u8,
    /// Model index within the element's SIG (or vendor) model list.
    #[arg(long, default_value = "0")]
    pub model: u8,
    /// Select the element's vendor models.
    #[arg(long)]
    pub vnd: bool,
    /// Virtual time to simulate, in milliseconds.
    #[arg(long, default_value = "1000")]
    pub until: u64,
    /// Value returned by the random source for publication jitter.
    #[arg(long, default_value = "0")]
    pub random: u16,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse a decimal or `0x` prefixed hex address or key index.
pub fn parse_u16(input: &str) -> Result<u16, String> {
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|err| format!("invalid value {input}: {err}"))
}
