use meshaccess_access::testing::SentPdu;
use meshaccess_access::AccessStatus;
use meshaccess_node::MessageContext;
use serde::Serialize;
use tracing::debug;

use crate::cmd::RecvArgs;
use crate::exit::{CliResult, FAILURE, SUCCESS};
use crate::node::{decode_hex, parse_label, NodeSpec};
use crate::output::{payload_preview, print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct SentOutput {
    src: u16,
    dst: u16,
    app_idx: u16,
    sdu: String,
}

impl From<&SentPdu> for SentOutput {
    fn from(pdu: &SentPdu) -> Self {
        Self {
            src: pdu.src,
            dst: pdu.dst,
            app_idx: pdu.app_idx,
            sdu: hex::encode(&pdu.sdu),
        }
    }
}

#[derive(Serialize)]
struct RecvOutput {
    status: AccessStatus,
    sent: Vec<SentOutput>,
}

pub fn run(args: RecvArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = decode_hex("access message", &args.hex)?;
    let mut node = NodeSpec::load(&args.node)?.build()?;

    let mut ctx = MessageContext::inbound(args.app_idx, args.src, args.dst);
    ctx.uuid = args.label.as_deref().map(parse_label).transpose()?;

    let status = node.access.recv(&mut ctx, &payload);
    let sent = node.transport.take();
    debug!(%status, replies = sent.len(), "message delivered");

    let out = RecvOutput {
        status,
        sent: sent.iter().map(SentOutput::from).collect(),
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            println!("status: {}", out.status);
            if !sent.is_empty() {
                print_table(
                    &["SRC", "DST", "APP_IDX", "SDU"],
                    sent.iter()
                        .map(|pdu| {
                            vec![
                                format!("0x{:04x}", pdu.src),
                                format!("0x{:04x}", pdu.dst),
                                format!("0x{:04x}", pdu.app_idx),
                                payload_preview(&pdu.sdu),
                            ]
                        })
                        .collect(),
                );
            }
        }
        OutputFormat::Pretty => {
            println!("status: {}", out.status);
            for pdu in &out.sent {
                println!(
                    "  sent 0x{:04x} -> 0x{:04x} app_idx=0x{:04x} sdu={}",
                    pdu.src, pdu.dst, pdu.app_idx, pdu.sdu
                );
            }
        }
        OutputFormat::Raw => println!("{}", out.status),
    }

    if status.is_success() {
        Ok(SUCCESS)
    } else {
        Ok(FAILURE)
    }
}
