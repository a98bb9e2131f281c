//! Key-value persistence for the mesh access layer.
//!
//! Model bindings, subscriptions, publication parameters, model data and
//! stored composition pages are kept under a slash separated key
//! namespace. [`SettingsStore`] is the seam; [`MemStore`] keeps entries in
//! memory and [`DirStore`] keeps one file per entry in a directory.

pub mod config;
pub mod dir;
pub mod error;
pub mod keys;
pub mod mem;
pub mod store;

pub use config::StoreConfig;
pub use dir::DirStore;
pub use error::{Result, SettingsError};
pub use keys::{overlay_path, ModelKey, SubKey, DEFAULT_NAMESPACE};
pub use mem::MemStore;
pub use store::{in_subtree, SettingsStore};
