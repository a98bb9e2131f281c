//! Bluetooth Mesh access layer.
//!
//! meshaccess sits between a mesh transport and the models of a node: it
//! describes the node's composition, generates its Composition Data and
//! Models Metadata pages, dispatches inbound access messages to models and
//! schedules periodic publication.
//!
//! # Crate Structure
//!
//! - [`node`]: composition, addressing, opcodes and collaborator traits
//! - [`comp`]: composition data pages and the model extension graph
//! - [`settings`]: key-value persistence of model state and stored pages
//! - [`access`]: the access layer context (dispatch, publication, persistence)

/// Re-export node types.
pub mod node {
    pub use meshaccess_node::*;
}

/// Re-export composition data types.
pub mod comp {
    pub use meshaccess_comp::*;
}

/// Re-export persistence types.
pub mod settings {
    pub use meshaccess_settings::*;
}

/// Re-export access layer types.
pub mod access {
    pub use meshaccess_access::*;
}
