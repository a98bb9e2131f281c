//! Composition data and models metadata page reads, with persisted
//! overlays for the high data pages.
//!
//! A page at or above 128 is served from the store when an overlay exists,
//! and otherwise falls back to the generated page `page % 128`. An overlay
//! holding the single byte `0x00` is an empty page.

use meshaccess_comp::{elem_count_128, write_elems, PageBuf, PageKind, HIGH_PAGE_BASE};
use meshaccess_settings::overlay_path;
use tracing::{debug, error, warn};

use crate::access::Access;
use crate::error::{AccessError, Result};

/// Stored value of an explicitly empty page.
const EMPTY_PAGE_SENTINEL: [u8; 1] = [0x00];

fn family(kind: PageKind) -> &'static str {
    match kind {
        PageKind::Composition => "cmp",
        PageKind::Metadata => "metadata",
    }
}

impl Access {
    fn stored_page_path(&self, kind: PageKind, page: u8) -> Option<String> {
        let known = match kind {
            PageKind::Composition => (HIGH_PAGE_BASE..=HIGH_PAGE_BASE + 2).contains(&page),
            PageKind::Metadata => page == HIGH_PAGE_BASE,
        };
        known.then(|| overlay_path(&self.config.settings_ns, family(kind), page))
    }

    fn stored_page_load(&self, kind: PageKind, page: u8) -> Result<Option<Vec<u8>>> {
        let Some(path) = self.stored_page_path(kind, page) else {
            return Ok(None);
        };
        let Some(data) = self.store.load(&path)? else {
            return Ok(None);
        };
        if data.len() > self.config.comp_pst_buf_size {
            return Err(AccessError::PageTooLarge {
                page,
                size: data.len(),
                max: self.config.comp_pst_buf_size,
            });
        }
        Ok(Some(data))
    }

    /// Serve a page from its overlay. Returns false if there is none, so
    /// the generated page should be used.
    fn stored_page_read(
        &self,
        buf: &mut PageBuf,
        kind: PageKind,
        page: u8,
        offset: usize,
        allow_partial: bool,
    ) -> Result<bool> {
        if !allow_partial && (kind != PageKind::Composition || offset != 0) {
            return Err(AccessError::InvalidArgument(
                "whole element reads need a composition page at offset 0".into(),
            ));
        }

        let data = match self.stored_page_load(kind, page)? {
            Some(data) if !data.is_empty() => data,
            _ => return Ok(false),
        };
        if data == EMPTY_PAGE_SENTINEL {
            return Ok(true);
        }
        if offset > data.len() {
            return Ok(true);
        }

        debug!(kind = family(kind), page, offset, len = data.len(), "serving stored page");
        if allow_partial {
            buf.put_slice(&data[offset..]);
        } else {
            write_elems(buf, page, &data)?;
        }
        Ok(true)
    }

    fn get_page_contents(
        &self,
        buf: &mut PageBuf,
        kind: PageKind,
        page: u8,
        offset: usize,
        allow_partial: bool,
    ) -> Result<()> {
        let mut page = page;
        if self.config.high_data_pages {
            if page >= HIGH_PAGE_BASE && self.stored_page_read(buf, kind, page, offset, allow_partial)? {
                return Ok(());
            }
            page %= HIGH_PAGE_BASE;
        }

        let encoder = self.encoder();
        match kind {
            PageKind::Composition => encoder.get_page(buf, page, offset, allow_partial)?,
            PageKind::Metadata => encoder.get_metadata_page(buf, page, offset, allow_partial)?,
        }
        Ok(())
    }

    fn page_size(&self, kind: PageKind, page: u8) -> usize {
        let mut page = page;
        if self.config.high_data_pages {
            if page >= HIGH_PAGE_BASE {
                match self.stored_page_load(kind, page) {
                    // Any one-byte overlay, the empty page sentinel included, sizes as empty.
                    Ok(Some(data)) if data.len() == 1 => return 0,
                    Ok(Some(data)) if !data.is_empty() => return data.len(),
                    Ok(_) => {}
                    Err(err) => error!(kind = family(kind), page, %err, "failed to read stored page size"),
                }
            }
            page %= HIGH_PAGE_BASE;
        }

        let encoder = self.encoder();
        match kind {
            PageKind::Composition => encoder.page_size(page),
            PageKind::Metadata => encoder.metadata_page_size(page),
        }
    }

    fn page_set(&mut self, kind: PageKind, page: u8, data: &[u8]) -> Result<()> {
        if !self.config.high_data_pages {
            return Err(AccessError::NotSupported("high data pages"));
        }
        let path = self
            .stored_page_path(kind, page)
            .ok_or_else(|| AccessError::NotFound(format!("{} page {page}", kind.name())))?;

        if data.is_empty() {
            self.store.save(&path, &EMPTY_PAGE_SENTINEL)?;
            debug!(path, "stored empty page");
            return Ok(());
        }

        let same_as_current = {
            let mut current = PageBuf::unbounded();
            let encoder = self.encoder();
            let base = page % HIGH_PAGE_BASE;
            let generated = match kind {
                PageKind::Composition => encoder.get_page(&mut current, base, 0, true),
                PageKind::Metadata => encoder.get_metadata_page(&mut current, base, 0, true),
            };
            generated.is_ok() && current[..] == *data
        };

        if same_as_current {
            // nothing changes in the next term
            self.store.save(&path, &[])?;
        } else {
            self.store.save(&path, data)?;
        }
        debug!(path, len = data.len(), same_as_current, "stored page");
        Ok(())
    }

    /// Read Composition Data page `page` from byte `offset`, for the Large
    /// Composition Data server. Elements may be split.
    pub fn comp_data_get_page(&self, buf: &mut PageBuf, page: u8, offset: usize) -> Result<()> {
        if !self.config.large_comp_data_srv {
            return Err(AccessError::InvalidArgument(
                "paginated reads need the large composition data server".into(),
            ));
        }
        self.get_page_contents(buf, PageKind::Composition, page, offset, true)
    }

    /// Read Models Metadata page `page` from byte `offset`.
    pub fn metadata_get_page(&self, buf: &mut PageBuf, page: u8, offset: usize) -> Result<()> {
        if !self.config.large_comp_data_srv {
            return Err(AccessError::InvalidArgument(
                "paginated reads need the large composition data server".into(),
            ));
        }
        self.get_page_contents(buf, PageKind::Metadata, page, offset, true)
    }

    /// Read as many whole elements of Composition Data page `page` as fit.
    pub fn comp_data_get_elems(&self, buf: &mut PageBuf, page: u8) -> Result<()> {
        self.get_page_contents(buf, PageKind::Composition, page, 0, false)
    }

    pub fn comp_page_size(&self, page: u8) -> usize {
        self.page_size(PageKind::Composition, page)
    }

    pub fn metadata_page_size(&self, page: u8) -> usize {
        self.page_size(PageKind::Metadata, page)
    }

    /// Store Composition Data page `page` (128 to 130) for the next term.
    pub fn comp_data_set(&mut self, page: u8, data: &[u8]) -> Result<()> {
        self.page_set(PageKind::Composition, page, data)
    }

    /// Store Models Metadata page 128 for the next term.
    pub fn metadata_set(&mut self, page: u8, data: &[u8]) -> Result<()> {
        self.page_set(PageKind::Metadata, page, data)
    }

    /// True if Composition Data page 128 differs from page 0.
    pub fn comp_128_changed(&self) -> bool {
        self.config.high_data_pages && self.has_stored_page(PageKind::Composition, HIGH_PAGE_BASE)
    }

    fn has_stored_page(&self, kind: PageKind, page: u8) -> bool {
        match self.stored_page_load(kind, page) {
            Ok(Some(data)) => !data.is_empty(),
            Ok(None) => false,
            Err(err) => {
                error!(kind = family(kind), page, %err, "failed to read stored page");
                false
            }
        }
    }

    /// Element count the node will have in the next term.
    pub fn comp_128_elem_count(&self) -> u8 {
        if !self.config.high_data_pages {
            return 0;
        }
        match self.stored_page_load(PageKind::Composition, HIGH_PAGE_BASE) {
            Ok(Some(data)) if !data.is_empty() => match elem_count_128(&data) {
                Ok(count) => count,
                Err(err) => {
                    warn!(%err, "failed to parse stored page 128");
                    0
                }
            },
            Ok(_) => self.elem_count(),
            Err(err) => {
                error!(%err, "failed to load stored page 128");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use meshaccess_comp::{decode_page_0, MIC_SHORT};
    use meshaccess_node::{Composition, Element, MetadataEntry, Model};

    use super::*;
    use crate::config::AccessConfig;
    use crate::testing::{SharedStore, TestNode};

    fn comp() -> Composition {
        Composition::new(0x0059, 0x0001, 0x0002)
            .with_element(
                Element::new(0x0100)
                    .with_model(Model::sig(0x0000))
                    .with_model(Model::sig(0x1000).with_metadata(vec![MetadataEntry::new(
                        0x0001,
                        Bytes::from_static(&[1, 2, 3]),
                    )]))
                    .with_vnd_model(Model::vendor(0x0059, 0x0001)),
            )
            .with_element(Element::new(0x0101).with_model(Model::sig(0x1000)))
    }

    fn node(store: SharedStore) -> TestNode {
        TestNode::with_parts(comp(), AccessConfig::default(), Vec::new(), store).unwrap()
    }

    fn read(node: &TestNode, page: u8, offset: usize, limit: usize) -> Vec<u8> {
        let mut buf = PageBuf::with_limit(limit);
        node.access.comp_data_get_page(&mut buf, page, offset).unwrap();
        buf.to_vec()
    }

    #[test]
    fn pages_concatenate_across_offsets() {
        let node = node(SharedStore::new());
        for page in [0u8, 1] {
            let size = node.access.comp_page_size(page);
            let whole = read(&node, page, 0, usize::MAX);
            assert_eq!(whole.len(), size, "page {page}");

            let mut joined = Vec::new();
            while joined.len() < size {
                let chunk = read(&node, page, joined.len(), 7);
                assert!(!chunk.is_empty());
                joined.extend(chunk);
            }
            assert_eq!(joined, whole, "page {page}");
        }

        let page0 = decode_page_0(&read(&node, 0, 0, usize::MAX)).unwrap();
        assert_eq!(page0.elements.len(), 2);
    }

    #[test]
    fn high_page_falls_back_to_generated_page() {
        let node = node(SharedStore::new());
        assert_eq!(read(&node, 128, 0, usize::MAX), read(&node, 0, 0, usize::MAX));
        assert_eq!(node.access.comp_page_size(129), node.access.comp_page_size(1));
        assert!(!node.access.comp_128_changed());
        assert_eq!(node.access.comp_128_elem_count(), 2);
    }

    #[test]
    fn stored_page_overrides_generated_page() {
        let store = SharedStore::new();
        let mut node = node(store.clone());
        let mut page = read(&node, 0, 0, usize::MAX);
        // drop element 1: its Page 0 entry is loc(2) + counts(2) + one SIG id
        page.truncate(page.len() - 6);

        node.access.comp_data_set(128, &page).unwrap();
        assert_eq!(store.get("bt/mesh/cmp/128"), Some(page.clone()));
        assert_eq!(read(&node, 128, 0, usize::MAX), page);
        assert_eq!(read(&node, 128, 4, usize::MAX), page[4..].to_vec());
        assert!(read(&node, 128, page.len() + 1, usize::MAX).is_empty());
        assert_eq!(node.access.comp_page_size(128), page.len());
        assert!(node.access.comp_128_changed());
        assert_eq!(node.access.comp_128_elem_count(), 1);

        let mut elems = PageBuf::with_limit(page.len() - 1);
        node.access.comp_data_get_elems(&mut elems, 128).unwrap();
        assert_eq!(elems.len(), 10);
    }

    #[test]
    fn identical_page_is_stored_empty() {
        let store = SharedStore::new();
        let mut node = node(store.clone());
        let page = read(&node, 0, 0, usize::MAX);

        node.access.comp_data_set(128, &page).unwrap();
        assert_eq!(store.get("bt/mesh/cmp/128"), Some(Vec::new()));
        assert!(!node.access.comp_128_changed());
        assert_eq!(read(&node, 128, 0, usize::MAX), page);
    }

    #[test]
    fn empty_page_uses_sentinel() {
        let store = SharedStore::new();
        let mut node = node(store.clone());

        node.access.comp_data_set(129, &[]).unwrap();
        assert_eq!(store.get("bt/mesh/cmp/129"), Some(vec![0]));
        assert_eq!(node.access.comp_page_size(129), 0);
        assert!(read(&node, 129, 0, usize::MAX).is_empty());
    }

    #[test]
    fn one_byte_overlay_sizes_as_empty() {
        let store = SharedStore::new();
        let mut node = node(store.clone());

        node.access.comp_data_set(129, &[0x01]).unwrap();
        assert_eq!(store.get("bt/mesh/cmp/129"), Some(vec![0x01]));
        assert_eq!(node.access.comp_page_size(129), 0);
    }

    #[test]
    fn page_set_rejects_unknown_pages() {
        let mut node = node(SharedStore::new());
        assert!(matches!(
            node.access.comp_data_set(131, &[1]),
            Err(AccessError::NotFound(_))
        ));
        assert!(matches!(
            node.access.metadata_set(129, &[1]),
            Err(AccessError::NotFound(_))
        ));

        let config = AccessConfig {
            high_data_pages: false,
            ..AccessConfig::default()
        };
        let mut node = TestNode::new(comp(), config).unwrap();
        assert!(matches!(
            node.access.comp_data_set(128, &[1]),
            Err(AccessError::NotSupported(_))
        ));
        assert_eq!(node.access.comp_128_elem_count(), 0);
        let mut buf = PageBuf::unbounded();
        assert!(node.access.comp_data_get_page(&mut buf, 128, 0).is_err());
    }

    #[test]
    fn oversized_stored_page_is_an_error() {
        let store = SharedStore::new();
        store.insert("bt/mesh/cmp/130", &[0xEE; 101]);
        let node = node(store);
        let mut buf = PageBuf::unbounded();
        assert!(matches!(
            node.access.comp_data_get_page(&mut buf, 130, 0),
            Err(AccessError::PageTooLarge { page: 130, size: 101, max: 100 })
        ));
    }

    #[test]
    fn whole_element_reads_reserve_mic() {
        let node = node(SharedStore::new());
        let size = node.access.comp_page_size(0);
        let mut buf = PageBuf::with_limit(size + MIC_SHORT - 1);
        node.access.comp_data_get_elems(&mut buf, 0).unwrap();
        assert!(buf.len() < size);

        let mut buf = PageBuf::with_limit(size + MIC_SHORT);
        node.access.comp_data_get_elems(&mut buf, 0).unwrap();
        assert_eq!(buf.len(), size);
    }

    #[test]
    fn metadata_pages() {
        let store = SharedStore::new();
        let mut node = node(store.clone());
        let size = node.access.metadata_page_size(0);
        assert!(size > 0);

        let mut buf = PageBuf::unbounded();
        node.access.metadata_get_page(&mut buf, 0, 0).unwrap();
        assert_eq!(buf.len(), size);

        let mut high = PageBuf::unbounded();
        node.access.metadata_get_page(&mut high, 128, 0).unwrap();
        assert_eq!(high[..], buf[..]);

        node.access.metadata_set(128, &[1, 0, 0, 0]).unwrap();
        assert_eq!(node.access.metadata_page_size(128), 4);

        let config = AccessConfig {
            large_comp_data_srv: false,
            ..AccessConfig::default()
        };
        let node = TestNode::new(comp(), config).unwrap();
        let mut buf = PageBuf::unbounded();
        assert!(matches!(
            node.access.metadata_get_page(&mut buf, 0, 0),
            Err(AccessError::InvalidArgument(_))
        ));
    }
}
