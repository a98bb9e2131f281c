//! Mesh access layer.
//!
//! [`Access`] owns a registered node composition and everything the access
//! layer mutates at runtime: element addresses, the extension graph, model
//! bindings and subscriptions, publication state and pending persistence
//! flags. Inbound messages go through [`Access::recv`]; publication is
//! driven by calling [`Access::tick`] at [`Access::next_deadline`], either
//! from your own scheduler or from the `async` feature's
//! [`PublicationDriver`].

pub mod access;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pages;
pub mod persist;
pub mod publish;
pub mod status;

#[cfg(feature = "async")]
pub mod driver;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use access::{Access, Collaborators, MsgCallback};
pub use clock::MonotonicClock;
pub use config::AccessConfig;
pub use error::{AccessError, Result};
pub use publish::{next_period, PeriodState};
pub use status::AccessStatus;

#[cfg(feature = "async")]
pub use driver::{DriverHandle, PublicationDriver};
