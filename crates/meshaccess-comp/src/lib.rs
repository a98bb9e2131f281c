//! Composition data for the mesh access layer.
//!
//! Generates Composition Data Pages 0, 1 and 2 and Models Metadata Page 0
//! from a registered [`Composition`](meshaccess_node::Composition), with
//! byte-exact size queries and offset based pagination. Page 1 is built
//! from the [`ExtensionGraph`], which also owns the extension groups used
//! for shared subscription lookups.

pub mod buf;
pub mod decode;
pub mod encode;
pub mod error;
pub mod extension;
pub mod page;
pub mod relation;
pub mod stored;

pub use buf::PageBuf;
pub use decode::{decode_page_0, decode_page_1, decode_page_2, Page0, Page0Element, Page1Element, VendorId};
pub use encode::{CompEncoder, Page1Model};
pub use error::{CompError, Result};
pub use extension::{ExtensionGraph, GraphConfig, Walk};
pub use page::{features, CompConfig, PageKind, HIGH_PAGE_BASE, MIC_SHORT, PAGE_0_HEADER_LEN};
pub use relation::{Relation, RelationKind, RelationTable};
pub use stored::{elem_count_128, next_elem_size, write_elems};
