use meshaccess_comp::CompError;
use meshaccess_node::{ModelError, ModelRef, NodeError, TransportError};
use meshaccess_settings::SettingsError;

/// Errors returned by [`crate::Access`] operations.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// The operation needs a feature that is disabled or absent.
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// The publication has no destination address.
    #[error("publication address not assigned")]
    AddressNotAvailable,

    /// The request is malformed or not valid in the current state.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The message does not fit the largest transport SDU.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// No model, path or stored page matches the request.
    #[error("not found: {0}")]
    NotFound(String),

    /// The model is not bound to the application key it tried to use.
    #[error("model not bound to key index 0x{app_idx:04x}")]
    NotBound { app_idx: u16 },

    /// The node has no unicast address yet.
    #[error("node is not provisioned")]
    NotProvisioned,

    /// A stored page does not fit the page persistence buffer.
    #[error("stored page {page} too large ({size} bytes, max {max})")]
    PageTooLarge { page: u8, size: usize, max: usize },

    /// A model's init callback failed during registration.
    #[error("model {model} init failed: {source}")]
    ModelInit { model: ModelRef, source: ModelError },

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Comp(#[from] CompError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type Result<T> = std::result::Result<T, AccessError>;
