use meshaccess_node::ModelRef;
use serde::Serialize;
use tracing::info;

use crate::cmd::ScheduleArgs;
use crate::exit::{access_error, CliResult, SUCCESS};
use crate::node::NodeSpec;
use crate::output::{payload_preview, print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct Transmission {
    at: u64,
    dst: u16,
    app_idx: u16,
    retransmission: bool,
    sdu: String,
    #[serde(skip)]
    raw: Vec<u8>,
}

#[derive(Serialize)]
struct ScheduleOutput {
    model: String,
    period_ms: u32,
    until: u64,
    next_deadline: Option<u64>,
    transmissions: Vec<Transmission>,
}

pub fn run(args: ScheduleArgs, format: OutputFormat) -> CliResult<i32> {
    let mut node = NodeSpec::load(&args.node)?.build()?;
    node.set_random(args.random);

    let model = ModelRef {
        elem: args.elem,
        index: args.model,
        vnd: args.vnd,
    };
    let period_ms = node
        .access
        .pub_period_ms(model)
        .map_err(|err| access_error("read publication", err))?;

    let burst = node
        .access
        .model(model)
        .map_err(|err| access_error("read publication", err))?
        .publication
        .as_ref()
        .map_or(0, |p| p.transmit_count() as usize)
        + 1;

    node.access
        .publish(model)
        .map_err(|err| access_error("publish", err))?;
    node.run_until(args.until);

    // Each period sends one message followed by its retransmissions.
    let transmissions: Vec<Transmission> = node
        .transport
        .take()
        .into_iter()
        .enumerate()
        .map(|(i, pdu)| Transmission {
            at: pdu.at,
            dst: pdu.dst,
            app_idx: pdu.app_idx,
            retransmission: i % burst != 0,
            sdu: hex::encode(&pdu.sdu),
            raw: pdu.sdu,
        })
        .collect();

    info!(%model, sent = transmissions.len(), until = args.until, "publication simulated");

    let out = ScheduleOutput {
        model: model.to_string(),
        period_ms,
        until: args.until,
        next_deadline: node.access.next_deadline(),
        transmissions,
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            &["AT_MS", "DST", "APP_IDX", "RETRANSMIT", "SDU"],
            out.transmissions
                .iter()
                .map(|t| {
                    vec![
                        t.at.to_string(),
                        format!("0x{:04x}", t.dst),
                        format!("0x{:04x}", t.app_idx),
                        t.retransmission.to_string(),
                        payload_preview(&t.raw),
                    ]
                })
                .collect(),
        ),
        OutputFormat::Pretty => {
            println!("Publication of {} (period {} ms):", out.model, out.period_ms);
            for t in &out.transmissions {
                let kind = if t.retransmission { "retransmit" } else { "publish" };
                println!("  {:>6} ms  {kind:<10} -> 0x{:04x}  {}", t.at, t.dst, t.sdu);
            }
        }
        OutputFormat::Raw => {
            for t in &out.transmissions {
                println!("{}", t.at);
            }
        }
    }

    Ok(SUCCESS)
}
