use meshaccess_node::Opcode;
use serde::Serialize;

use crate::cmd::OpcodeArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::node::parse_sdu;
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct OpcodeOutput {
    opcode: String,
    len: usize,
    class: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    company: Option<u16>,
    payload_len: usize,
}

fn class(opcode: Opcode) -> &'static str {
    match opcode.len() {
        1 => "sig1",
        2 => "sig2",
        _ => "vendor",
    }
}

pub fn run(args: OpcodeArgs, format: OutputFormat) -> CliResult<i32> {
    let (opcode, payload) = parse_sdu(&args.hex)?;
    let out = OpcodeOutput {
        opcode: opcode.to_string(),
        len: opcode.len(),
        class: class(opcode),
        company: opcode.company(),
        payload_len: payload.len(),
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            &["OPCODE", "LEN", "CLASS", "COMPANY", "PAYLOAD"],
            vec![vec![
                out.opcode.clone(),
                out.len.to_string(),
                out.class.to_string(),
                out.company
                    .map(|c| format!("0x{c:04x}"))
                    .unwrap_or_else(|| "-".to_string()),
                out.payload_len.to_string(),
            ]],
        ),
        OutputFormat::Pretty => {
            print!("{} ({}, {} octets", out.opcode, out.class, out.len);
            if let Some(company) = out.company {
                print!(", company 0x{company:04x}");
            }
            println!(") payload={} bytes", out.payload_len);
        }
        OutputFormat::Raw => println!("{}", out.opcode),
    }

    Ok(SUCCESS)
}
