use meshaccess_node::NodeError;

/// Errors raised by the composition data encoder and the extension graph.
#[derive(Debug, thiserror::Error)]
pub enum CompError {
    /// Composition Data Page 2 was requested but no records are registered.
    #[error("composition data page 2 not registered")]
    NoDevice,

    /// The request is not valid for this page type.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The page number is not supported by this node.
    #[error("unknown page {0}")]
    UnknownPage(u8),

    /// Stored page data could not be parsed.
    #[error("malformed page data: {0}")]
    Malformed(String),

    /// No free slot left in the relation table.
    #[error("relation table full (capacity {capacity})")]
    RelationTableFull { capacity: usize },

    /// Every correspondence group id is in use.
    #[error("no correspondence id available")]
    CorrespondenceIdsExhausted,

    /// The feature is disabled in the node configuration.
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// A model or element reference is invalid.
    #[error(transparent)]
    Node(#[from] NodeError),
}

pub type Result<T> = std::result::Result<T, CompError>;
