/// Errors raised while decoding or validating node-level primitives.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The payload is empty, so there is no opcode to decode.
    #[error("empty access payload")]
    EmptyPayload,

    /// The first octet is the reserved 1-octet opcode 0x7F.
    #[error("reserved opcode 0x7f")]
    ReservedOpcode,

    /// The payload is shorter than the opcode class requires.
    #[error("payload too short for {needed}-octet opcode ({len} bytes)")]
    ShortOpcode { needed: usize, len: usize },

    /// The composition does not describe a usable node.
    #[error("invalid composition: {0}")]
    InvalidComposition(String),

    /// An element index is out of range.
    #[error("invalid element index {0}")]
    InvalidElement(u8),

    /// A model index is out of range for its element.
    #[error("invalid {kind} model index {index}")]
    InvalidModel { kind: &'static str, index: u8 },
}

/// Errors reported by a model handler, update callback or model callback.
///
/// The access layer does not interpret the variant; any error rejects the
/// message or skips the publication.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// The model refused the message or state change.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The model has no state to publish right now.
    #[error("model state unavailable")]
    Unavailable,

    /// Model initialization failed.
    #[error("model setup failed: {0}")]
    Setup(String),
}

/// Errors returned by a [`crate::Transport`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The local node has no unicast address yet.
    #[error("local node is not provisioned")]
    NotProvisioned,

    /// The lower layers have no buffer space for the PDU.
    #[error("no transmit buffers available")]
    NoBuffers,

    /// The SDU exceeds what the transport can segment.
    #[error("sdu too large ({size} bytes, max {max})")]
    TooLarge { size: usize, max: usize },

    /// The application key index is unknown to the transport.
    #[error("unknown application key index 0x{0:04x}")]
    UnknownKey(u16),

    /// Any other failure in the lower layers.
    #[error("transport failure: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;
