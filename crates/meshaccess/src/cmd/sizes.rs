use meshaccess_comp::{PageKind, HIGH_PAGE_BASE};
use serde::Serialize;

use crate::cmd::SizesArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::node::NodeSpec;
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct PageSize {
    kind: &'static str,
    page: u8,
    size: usize,
}

#[derive(Serialize)]
struct SizesOutput {
    elements: u8,
    /// Element count after the next term, from stored page 128.
    next_elements: u8,
    comp_128_changed: bool,
    pages: Vec<PageSize>,
}

pub fn run(args: SizesArgs, format: OutputFormat) -> CliResult<i32> {
    let node = NodeSpec::load(&args.node)?.build()?;
    let access = &node.access;
    let config = access.config();
    let comp_config = config.comp_config();

    let mut pages = Vec::new();
    let mut comp_pages = comp_config.comp_pages();
    if config.high_data_pages {
        let high: Vec<u8> = comp_pages.iter().map(|p| p + HIGH_PAGE_BASE).collect();
        comp_pages.extend(high);
    }
    for page in comp_pages {
        pages.push(PageSize {
            kind: PageKind::Composition.name(),
            page,
            size: access.comp_page_size(page),
        });
    }
    if config.large_comp_data_srv {
        let mut meta_pages = vec![0];
        if config.high_data_pages {
            meta_pages.push(HIGH_PAGE_BASE);
        }
        for page in meta_pages {
            pages.push(PageSize {
                kind: PageKind::Metadata.name(),
                page,
                size: access.metadata_page_size(page),
            });
        }
    }

    let out = SizesOutput {
        elements: access.elem_count(),
        next_elements: access.comp_128_elem_count(),
        comp_128_changed: access.comp_128_changed(),
        pages,
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => print_table(
            &["KIND", "PAGE", "SIZE"],
            out.pages
                .iter()
                .map(|p| vec![p.kind.to_string(), p.page.to_string(), p.size.to_string()])
                .collect(),
        ),
        OutputFormat::Raw => {
            for p in &out.pages {
                println!("{} {} {}", p.kind, p.page, p.size);
            }
        }
    }

    Ok(SUCCESS)
}
