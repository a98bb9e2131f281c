//! Composition data page generation.
//!
//! Every page is a stream of independently sized chunks (elements, or
//! records for Page 2). A read at byte offset `o` skips whole chunks lying
//! before `o` and starts the straddling chunk from its internal offset, so
//! successive bounded reads at increasing offsets concatenate to the full
//! page.
//!
//! Page 0 element:
//! ```text
//! loc(2) | NumS | NumV | SIG ids (2 each) | vendor ids (company, id; 2 + 2 each)
//! ```
//! Page 1 element:
//! ```text
//! NumS | NumV | per model: header | [cor_id] | items
//! header = ext_count << 2 | long << 1 | cor_present
//! short item = (elem_offset & 0x07) | base_idx << 3
//! long item  = elem_offset (i8) | base_idx
//! ```
//! Page 2 record:
//! ```text
//! id(2) | x | y | z | n | offsets(n) | len(2) | data(len)
//! ```
//! Metadata Page 0 element:
//! ```text
//! NumS | NumV | per model with metadata: id(2|4) | count | entries (len(2) | id(2) | data)
//! ```
//! All multi-byte fields are little-endian.

use meshaccess_node::{Comp2, Comp2Record, Composition, Element, Model, ModelId};
use serde::Serialize;
use tracing::debug;

use crate::buf::PageBuf;
use crate::error::{CompError, Result};
use crate::page::{CompConfig, MIC_SHORT, PAGE_0_HEADER_LEN};
use crate::relation::RelationTable;

/// Most extension items a Page 1 model header can count.
pub const MAX_EXT_ITEMS: usize = 63;

/// Page 1 entry of one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page1Model {
    pub cor_id: Option<u8>,
    pub long: bool,
    /// `(elem_offset, base_idx)` per extended model: base element minus the
    /// extending model's element, and the base model's composition index.
    pub items: Vec<(i8, u8)>,
}

impl Page1Model {
    pub fn header(&self) -> u8 {
        ((self.items.len() as u8) << 2) | ((self.long as u8) << 1) | self.cor_id.is_some() as u8
    }

    pub fn encoded_len(&self) -> usize {
        let item_len = if self.long { 2 } else { 1 };
        1 + self.cor_id.is_some() as usize + item_len * self.items.len()
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.header());
        if let Some(id) = self.cor_id {
            out.push(id);
        }
        for &(elem_offset, base_idx) in &self.items {
            if self.long {
                out.push(elem_offset as u8);
                out.push(base_idx);
            } else {
                out.push(((elem_offset as u8) & 0x07) | (base_idx << 3));
            }
        }
    }
}

/// Generates composition data pages from a registered composition.
#[derive(Debug, Clone, Copy)]
pub struct CompEncoder<'a> {
    comp: &'a Composition,
    comp2: Option<&'a Comp2>,
    relations: &'a RelationTable,
    config: &'a CompConfig,
}

impl<'a> CompEncoder<'a> {
    pub fn new(comp: &'a Composition, relations: &'a RelationTable, config: &'a CompConfig) -> Self {
        Self {
            comp,
            comp2: None,
            relations,
            config,
        }
    }

    pub fn with_comp2(mut self, comp2: Option<&'a Comp2>) -> Self {
        self.comp2 = comp2;
        self
    }

    /// Append composition data page `page` from byte `offset`.
    ///
    /// Without `allow_partial`, an element is only added if it fits whole
    /// with room left for a transport MIC; the first one that does not fit
    /// ends the read successfully.
    pub fn get_page(
        &self,
        buf: &mut PageBuf,
        page: u8,
        offset: usize,
        allow_partial: bool,
    ) -> Result<()> {
        debug!(page, offset, allow_partial, tailroom = buf.tailroom(), "composition page read");
        match page {
            0 => {
                self.page_0(buf, offset, allow_partial);
                Ok(())
            }
            1 if self.config.page_1 => {
                self.page_1(buf, offset, allow_partial);
                Ok(())
            }
            2 if self.config.page_2 => self.page_2(buf, offset, allow_partial),
            _ => Err(CompError::UnknownPage(page)),
        }
    }

    /// Size of a generated composition page; 0 for unsupported pages.
    pub fn page_size(&self, page: u8) -> usize {
        match page {
            0 => {
                PAGE_0_HEADER_LEN
                    + self
                        .comp
                        .elements
                        .iter()
                        .map(page_0_elem_size)
                        .sum::<usize>()
            }
            1 if self.config.page_1 => self
                .comp
                .elements
                .iter()
                .enumerate()
                .map(|(idx, elem)| self.page_1_elem_size(idx as u8, elem))
                .sum(),
            2 if self.config.page_2 => self
                .comp2
                .map(|c| c.records.iter().map(Comp2Record::encoded_len).sum())
                .unwrap_or(0),
            _ => 0,
        }
    }

    /// Append Models Metadata Page `page` from byte `offset`.
    ///
    /// Metadata pages are only served in partial mode.
    pub fn get_metadata_page(
        &self,
        buf: &mut PageBuf,
        page: u8,
        offset: usize,
        allow_partial: bool,
    ) -> Result<()> {
        if !self.config.metadata {
            return Err(CompError::NotSupported("models metadata"));
        }
        if !allow_partial {
            return Err(CompError::InvalidArgument(
                "metadata pages require partial reads",
            ));
        }
        if page != 0 {
            return Err(CompError::UnknownPage(page));
        }

        debug!(page, offset, tailroom = buf.tailroom(), "metadata page read");
        let mut offset = offset;
        for elem in &self.comp.elements {
            if buf.tailroom() == 0 {
                break;
            }
            buf.put_slice_offset(&metadata_elem(elem), &mut offset);
        }
        Ok(())
    }

    /// Size of a generated metadata page; 0 for unsupported pages.
    pub fn metadata_page_size(&self, page: u8) -> usize {
        if !self.config.metadata || page != 0 {
            return 0;
        }
        self.comp
            .elements
            .iter()
            .map(|elem| 2 + elem.all_models().map(metadata_model_size).sum::<usize>())
            .sum()
    }

    /// Page 1 entry of a model, by composition index.
    pub fn page_1_model(&self, elem_idx: u8, comp_idx: u8) -> Page1Model {
        let mut items: Vec<(i8, u8)> = self
            .relations
            .extensions_of(elem_idx, comp_idx)
            .map(|r| ((r.elem_base as i16 - elem_idx as i16) as i8, r.idx_base))
            .collect();
        items.truncate(MAX_EXT_ITEMS);

        let short = items.len() < 32
            && items
                .iter()
                .all(|&(off, idx)| (-4..=3).contains(&off) && idx < 32);

        Page1Model {
            cor_id: self.relations.correspondence_of(elem_idx, comp_idx),
            long: !short,
            items,
        }
    }

    fn page_0(&self, buf: &mut PageBuf, offset: usize, allow_partial: bool) {
        let mut offset = offset;
        buf.put_u16_le_offset(self.comp.cid, &mut offset);
        buf.put_u16_le_offset(self.comp.pid, &mut offset);
        buf.put_u16_le_offset(self.comp.vid, &mut offset);
        buf.put_u16_le_offset(self.config.crpl, &mut offset);
        buf.put_u16_le_offset(self.config.features, &mut offset);

        for elem in &self.comp.elements {
            if !emit_chunk(buf, &page_0_elem(elem), &mut offset, allow_partial) {
                return;
            }
        }
    }

    fn page_1(&self, buf: &mut PageBuf, offset: usize, allow_partial: bool) {
        let mut offset = offset;
        for (idx, elem) in self.comp.elements.iter().enumerate() {
            let chunk = self.page_1_elem(idx as u8, elem);
            if !emit_chunk(buf, &chunk, &mut offset, allow_partial) {
                return;
            }
        }
    }

    fn page_2(&self, buf: &mut PageBuf, offset: usize, allow_partial: bool) -> Result<()> {
        let comp2 = self.comp2.ok_or(CompError::NoDevice)?;
        let mut offset = offset;
        for rec in &comp2.records {
            if !emit_chunk(buf, &page_2_record(rec), &mut offset, allow_partial) {
                break;
            }
        }
        Ok(())
    }

    fn page_1_models(&self, elem_idx: u8, elem: &Element) -> impl Iterator<Item = Page1Model> + '_ {
        let total = elem.sig_count() as usize + elem.vnd_count() as usize;
        (0..total).map(move |ci| self.page_1_model(elem_idx, ci as u8))
    }

    fn page_1_elem(&self, elem_idx: u8, elem: &Element) -> Vec<u8> {
        let mut out = vec![elem.sig_count(), elem.vnd_count()];
        for model in self.page_1_models(elem_idx, elem) {
            model.encode(&mut out);
        }
        out
    }

    fn page_1_elem_size(&self, elem_idx: u8, elem: &Element) -> usize {
        2 + self
            .page_1_models(elem_idx, elem)
            .map(|m| m.encoded_len())
            .sum::<usize>()
    }
}

/// Emit one chunk under the pagination rules. Returns false when the read
/// should end.
fn emit_chunk(buf: &mut PageBuf, chunk: &[u8], offset: &mut usize, allow_partial: bool) -> bool {
    if *offset >= chunk.len() {
        *offset -= chunk.len();
        return true;
    }

    let remaining = chunk.len() - *offset;
    if (!allow_partial && buf.tailroom() < remaining + MIC_SHORT) || buf.tailroom() == 0 {
        return false;
    }

    buf.put_slice_offset(chunk, offset);
    true
}

fn put_model_id(out: &mut Vec<u8>, id: ModelId) {
    match id {
        ModelId::Sig(id) => out.extend_from_slice(&id.to_le_bytes()),
        ModelId::Vendor { company, id } => {
            out.extend_from_slice(&company.to_le_bytes());
            out.extend_from_slice(&id.to_le_bytes());
        }
    }
}

fn page_0_elem_size(elem: &Element) -> usize {
    4 + elem.models.len() * 2 + elem.vnd_models.len() * 4
}

fn page_0_elem(elem: &Element) -> Vec<u8> {
    let mut out = Vec::with_capacity(page_0_elem_size(elem));
    out.extend_from_slice(&elem.loc.to_le_bytes());
    out.push(elem.sig_count());
    out.push(elem.vnd_count());
    for model in elem.all_models() {
        put_model_id(&mut out, model.id);
    }
    out
}

fn page_2_record(rec: &Comp2Record) -> Vec<u8> {
    let mut out = Vec::with_capacity(rec.encoded_len());
    out.extend_from_slice(&rec.id.to_le_bytes());
    out.extend_from_slice(&rec.version);
    out.push(rec.elem_offsets.len() as u8);
    out.extend_from_slice(&rec.elem_offsets);
    out.extend_from_slice(&(rec.data.len() as u16).to_le_bytes());
    out.extend_from_slice(&rec.data);
    out
}

fn metadata_model_size(model: &Model) -> usize {
    match &model.metadata {
        None => 0,
        Some(entries) => {
            model.id.wire_len() + 1 + entries.iter().map(|e| 4 + e.data.len()).sum::<usize>()
        }
    }
}

fn metadata_elem(elem: &Element) -> Vec<u8> {
    let with_metadata = |models: &[Model]| models.iter().filter(|m| m.metadata.is_some()).count();
    let mut out = vec![
        with_metadata(&elem.models) as u8,
        with_metadata(&elem.vnd_models) as u8,
    ];

    for model in elem.all_models() {
        let Some(entries) = &model.metadata else {
            continue;
        };
        put_model_id(&mut out, model.id);
        out.push(entries.len() as u8);
        for entry in entries {
            out.extend_from_slice(&(entry.data.len() as u16).to_le_bytes());
            out.extend_from_slice(&entry.id.to_le_bytes());
            out.extend_from_slice(&entry.data);
        }
    }
    out
}
