use meshaccess_comp::{features, CompConfig, GraphConfig};
use meshaccess_settings::DEFAULT_NAMESPACE;
use serde::Deserialize;

/// Bytes of access payload carried by one transport segment.
const SEG_PAYLOAD: usize = 12;

/// Node-wide access layer settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Vendor opcodes must carry their model's company id.
    pub cid_force: bool,
    /// Allow random delay before publishing delayable publications.
    pub delayable_publication: bool,
    /// Mark inbound message contexts as allowing delayed responses.
    pub delayable_msg_ctx: bool,
    /// Track model extension groups.
    pub model_extensions: bool,
    /// Relation table capacity.
    pub extension_list_size: usize,
    pub comp_page_1: bool,
    pub comp_page_2: bool,
    /// Serve and store composition pages 128 and up.
    pub high_data_pages: bool,
    /// Serve paginated composition and metadata page reads.
    pub large_comp_data_srv: bool,
    /// Key slots per model.
    pub model_key_count: usize,
    /// Group subscription slots per model.
    pub model_group_count: usize,
    /// Virtual label subscription slots per model.
    pub label_count: usize,
    /// Replay protection list size advertised in Page 0.
    pub crpl: u16,
    /// Feature bitmap advertised in Page 0.
    pub features: u16,
    /// Maximum transport segments per SDU.
    pub tx_seg_max: usize,
    /// Settings key namespace.
    pub settings_ns: String,
    /// Largest stored page that can be read back.
    pub comp_pst_buf_size: usize,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            cid_force: true,
            delayable_publication: true,
            delayable_msg_ctx: true,
            model_extensions: true,
            extension_list_size: 10,
            comp_page_1: true,
            comp_page_2: false,
            high_data_pages: true,
            large_comp_data_srv: true,
            model_key_count: 1,
            model_group_count: 1,
            label_count: 3,
            crpl: 10,
            features: features::RELAY | features::PROXY,
            tx_seg_max: 3,
            settings_ns: DEFAULT_NAMESPACE.to_string(),
            comp_pst_buf_size: 100,
        }
    }
}

impl AccessConfig {
    /// Largest access SDU the transport accepts.
    pub fn tx_sdu_max(&self) -> usize {
        self.tx_seg_max * SEG_PAYLOAD
    }

    pub fn comp_config(&self) -> CompConfig {
        CompConfig {
            crpl: self.crpl,
            features: self.features,
            page_1: self.comp_page_1,
            page_2: self.comp_page_2,
            high_data_pages: self.high_data_pages,
            metadata: self.large_comp_data_srv,
        }
    }

    pub fn graph_config(&self) -> GraphConfig {
        GraphConfig {
            capacity: self.extension_list_size,
            model_extensions: self.model_extensions,
            page_1: self.comp_page_1,
        }
    }
}
