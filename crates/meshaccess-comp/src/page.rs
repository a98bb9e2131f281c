use serde::Deserialize;

/// Size of the short transport MIC, reserved when paginating whole elements.
pub const MIC_SHORT: usize = 4;

/// Size of the Page 0 header: cid, pid, vid, crpl, features.
pub const PAGE_0_HEADER_LEN: usize = 10;

/// First high data page.
pub const HIGH_PAGE_BASE: u8 = 128;

/// Feature bits of the Page 0 header.
pub mod features {
    pub const RELAY: u16 = 1 << 0;
    pub const PROXY: u16 = 1 << 1;
    pub const FRIEND: u16 = 1 << 2;
    pub const LOW_POWER: u16 = 1 << 3;
}

/// Which family of pages a page number belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    Composition,
    Metadata,
}

impl PageKind {
    pub fn name(self) -> &'static str {
        match self {
            PageKind::Composition => "comp",
            PageKind::Metadata => "metadata",
        }
    }
}

/// Node-wide settings that shape the generated pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompConfig {
    /// Replay protection list size advertised in Page 0.
    pub crpl: u16,
    /// Feature bitmap advertised in Page 0.
    pub features: u16,
    /// Generate Composition Data Page 1.
    pub page_1: bool,
    /// Generate Composition Data Page 2.
    pub page_2: bool,
    /// Serve persisted overlays as pages 128 and up.
    pub high_data_pages: bool,
    /// Generate Models Metadata Page 0.
    pub metadata: bool,
}

impl Default for CompConfig {
    fn default() -> Self {
        Self {
            crpl: 10,
            features: features::RELAY | features::PROXY,
            page_1: true,
            page_2: false,
            high_data_pages: false,
            metadata: true,
        }
    }
}

impl CompConfig {
    /// Generated composition pages, ascending.
    pub fn comp_pages(&self) -> Vec<u8> {
        let mut pages = vec![0];
        if self.page_1 {
            pages.push(1);
        }
        if self.page_2 {
            pages.push(2);
        }
        pages
    }

    /// Clamp a requested composition page number to the highest supported
    /// page not above it.
    pub fn parse_page(&self, requested: u8) -> u8 {
        if self.high_data_pages && requested >= HIGH_PAGE_BASE {
            if self.page_2 && requested >= HIGH_PAGE_BASE + 2 {
                return HIGH_PAGE_BASE + 2;
            }
            if self.page_1 && requested >= HIGH_PAGE_BASE + 1 {
                return HIGH_PAGE_BASE + 1;
            }
            return HIGH_PAGE_BASE;
        }

        if self.page_2 && requested >= 2 {
            2
        } else if self.page_1 && requested >= 1 {
            1
        } else {
            0
        }
    }
}
