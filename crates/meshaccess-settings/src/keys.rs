//! Settings key layout.
//!
//! ```text
//! <ns>/s/<key>/bind|sub|subv|pub|data[/name]   SIG model state
//! <ns>/v/<key>/...                             vendor model state
//! <ns>/cmp/128|129|130                         stored composition pages
//! <ns>/metadata/128                            stored metadata page
//! ```
//!
//! `<key>` is `elem_idx << 8 | model_idx` in lowercase hex without padding.

use std::fmt;

use crate::error::{Result, SettingsError};

pub const DEFAULT_NAMESPACE: &str = "bt/mesh";

/// Which piece of model state an entry holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubKey {
    Bind,
    Sub,
    SubV,
    Pub,
    /// Model-owned data, optionally named.
    Data(Option<String>),
}

impl SubKey {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "bind" => Some(SubKey::Bind),
            "sub" => Some(SubKey::Sub),
            "subv" => Some(SubKey::SubV),
            "pub" => Some(SubKey::Pub),
            "data" => Some(SubKey::Data(None)),
            _ => {
                let name = s.strip_prefix("data/")?;
                (!name.is_empty()).then(|| SubKey::Data(Some(name.to_string())))
            }
        }
    }
}

impl fmt::Display for SubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubKey::Bind => f.write_str("bind"),
            SubKey::Sub => f.write_str("sub"),
            SubKey::SubV => f.write_str("subv"),
            SubKey::Pub => f.write_str("pub"),
            SubKey::Data(None) => f.write_str("data"),
            SubKey::Data(Some(name)) => write!(f, "data/{name}"),
        }
    }
}

/// A parsed model state key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub vnd: bool,
    pub elem: u8,
    pub index: u8,
    pub sub: SubKey,
}

impl ModelKey {
    pub fn new(vnd: bool, elem: u8, index: u8, sub: SubKey) -> Self {
        Self {
            vnd,
            elem,
            index,
            sub,
        }
    }

    /// Full key under `ns`.
    pub fn path(&self, ns: &str) -> String {
        format!(
            "{ns}/{}/{:x}/{}",
            if self.vnd { "v" } else { "s" },
            (self.elem as u16) << 8 | self.index as u16,
            self.sub
        )
    }

    /// Parse a full key under `ns`.
    pub fn parse(ns: &str, key: &str) -> Result<Self> {
        let not_found = || SettingsError::NotFound(key.to_string());

        let rest = key
            .strip_prefix(ns)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(not_found)?;
        let (kind, rest) = rest.split_once('/').ok_or_else(not_found)?;
        let vnd = match kind {
            "s" => false,
            "v" => true,
            _ => return Err(not_found()),
        };

        let (model, sub) = rest.split_once('/').ok_or_else(not_found)?;
        let model = u16::from_str_radix(model, 16).map_err(|_| not_found())?;
        let sub = SubKey::parse(sub).ok_or_else(not_found)?;

        Ok(Self::new(vnd, (model >> 8) as u8, model as u8, sub))
    }
}

/// Key of a stored page overlay, for the `cmp` or `metadata` family.
pub fn overlay_path(ns: &str, family: &str, page: u8) -> String {
    format!("{ns}/{family}/{page}")
}
