//! Node composition, addressing and opcode primitives.
//!
//! This is the lowest layer of meshaccess. It describes what a node is made
//! of (elements, SIG and vendor models, their operation tables and
//! publication contexts) and defines the narrow collaborator traits the
//! access layer calls out through:
//! - [`Transport`] for sending access PDUs
//! - [`RandomSource`] and [`Clock`] for publication timing
//! - [`VirtualLabels`] for resolving virtual address label indices
//!
//! Everything above builds on the [`Composition`] type provided here.

pub mod addr;
pub mod comp;
pub mod error;
pub mod key;
pub mod model;
pub mod msg;
pub mod opcode;
pub mod publication;
pub mod traits;

pub use addr::LabelUuid;
pub use comp::{Comp2, Comp2Record, Composition, Element};
pub use error::{ModelError, NodeError, Result, TransportError};
pub use model::{
    HandlerCtx, MetadataEntry, Model, ModelCallbacks, ModelData, ModelFlags, ModelId, ModelOp,
    ModelRef, MsgLen, OpHandler, Reply,
};
pub use msg::{MessageContext, NetTx};
pub use opcode::Opcode;
pub use publication::{PubParams, Publication, UpdateFn};
pub use traits::{Clock, ModelSetup, RandomSource, Transport, VirtualLabels};
