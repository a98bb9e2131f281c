use meshaccess_comp::{
    decode_page_0, decode_page_1, decode_page_2, Page0, Page1Element, PageBuf, HIGH_PAGE_BASE,
};
use serde::Serialize;

use crate::cmd::CompArgs;
use crate::exit::{access_error, comp_error, CliResult, SUCCESS};
use crate::node::NodeSpec;
use crate::output::{payload_preview, print_json, print_raw, print_table, OutputFormat};

#[derive(Serialize)]
struct ProfileOutput {
    id: u16,
    version: String,
    elem_offsets: Vec<u8>,
    data: String,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Decoded {
    Page0(Page0),
    Page1(Vec<Page1Element>),
    Page2(Vec<ProfileOutput>),
}

#[derive(Serialize)]
struct CompOutput {
    page: u8,
    offset: usize,
    total_size: usize,
    len: usize,
    data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    decoded: Option<Decoded>,
}

pub fn run(args: CompArgs, format: OutputFormat) -> CliResult<i32> {
    let node = NodeSpec::load(&args.node)?.build()?;
    let access = &node.access;
    let page = access.config().comp_config().parse_page(args.page);

    let mut buf = match args.max_len {
        Some(limit) => PageBuf::with_limit(limit),
        None => PageBuf::unbounded(),
    };
    if args.whole {
        access
            .comp_data_get_elems(&mut buf, page)
            .map_err(|err| access_error("read composition data", err))?;
    } else {
        access
            .comp_data_get_page(&mut buf, page, args.offset)
            .map_err(|err| access_error("read composition data", err))?;
    }

    let total_size = access.comp_page_size(page);
    let decoded = if args.offset == 0 && total_size > 0 && buf.len() == total_size {
        Some(decode(page, &buf)?)
    } else {
        None
    };

    let out = CompOutput {
        page,
        offset: args.offset,
        total_size,
        len: buf.len(),
        data: hex::encode(&buf[..]),
        decoded,
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            &["PAGE", "OFFSET", "LEN", "TOTAL", "DATA"],
            vec![vec![
                out.page.to_string(),
                out.offset.to_string(),
                out.len.to_string(),
                out.total_size.to_string(),
                payload_preview(&buf),
            ]],
        ),
        OutputFormat::Pretty => {
            println!("Composition Data Page {}:", out.page);
            println!("  Offset: {}", out.offset);
            println!("  Length: {} of {}", out.len, out.total_size);
            println!("  Data:   {}", out.data);
            if let Some(decoded) = &out.decoded {
                println!(
                    "  Decoded: {}",
                    serde_json::to_string_pretty(decoded).unwrap_or_default()
                );
            }
        }
        OutputFormat::Raw => print_raw(&buf),
    }

    Ok(SUCCESS)
}

fn decode(page: u8, data: &[u8]) -> CliResult<Decoded> {
    let decoded = match page % HIGH_PAGE_BASE {
        0 => Decoded::Page0(decode_page_0(data).map_err(|err| comp_error("decode page 0", err))?),
        1 => Decoded::Page1(decode_page_1(data).map_err(|err| comp_error("decode page 1", err))?),
        _ => Decoded::Page2(
            decode_page_2(data)
                .map_err(|err| comp_error("decode page 2", err))?
                .into_iter()
                .map(|rec| ProfileOutput {
                    id: rec.id,
                    version: format!("{}.{}.{}", rec.version[0], rec.version[1], rec.version[2]),
                    elem_offsets: rec.elem_offsets,
                    data: hex::encode(&rec.data),
                })
                .collect(),
        ),
    };
    Ok(decoded)
}
