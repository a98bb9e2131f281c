use meshaccess_comp::PageBuf;
use serde::Serialize;

use crate::cmd::MetadataArgs;
use crate::exit::{access_error, CliResult, SUCCESS};
use crate::node::NodeSpec;
use crate::output::{payload_preview, print_json, print_raw, print_table, OutputFormat};

#[derive(Serialize)]
struct MetadataOutput {
    page: u8,
    offset: usize,
    total_size: usize,
    len: usize,
    data: String,
}

pub fn run(args: MetadataArgs, format: OutputFormat) -> CliResult<i32> {
    let node = NodeSpec::load(&args.node)?.build()?;
    let access = &node.access;

    let mut buf = match args.max_len {
        Some(limit) => PageBuf::with_limit(limit),
        None => PageBuf::unbounded(),
    };
    access
        .metadata_get_page(&mut buf, args.page, args.offset)
        .map_err(|err| access_error("read models metadata", err))?;

    let out = MetadataOutput {
        page: args.page,
        offset: args.offset,
        total_size: access.metadata_page_size(args.page),
        len: buf.len(),
        data: hex::encode(&buf[..]),
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
            println!("Models Metadata Page {}:", out.page);
            println!("  Offset: {}", out.offset);
            println!("  Length: {} of {}", out.len, out.total_size);
            println!("  Data:   {}", out.data);
        }
        OutputFormat::Raw => print_raw(&buf),
    }

    Ok(SUCCESS)
}
