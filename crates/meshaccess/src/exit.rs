use std::fmt;
use std::io;

use meshaccess_access::AccessError;
use meshaccess_comp::CompError;

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const NOT_FOUND: i32 = 2;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::NotFound => NOT_FOUND,
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn json_error(context: &str, err: serde_json::Error) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn hex_error(context: &str, err: hex::FromHexError) -> CliError {
    CliError::new(USAGE, format!("{context}: {err}"))
}

pub fn comp_error(context: &str, err: CompError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn access_error(context: &str, err: AccessError) -> CliError {
    match err {
        AccessError::NotFound(_) => CliError::new(NOT_FOUND, format!("{context}: {err}")),
        AccessError::NotSupported(_)
        | AccessError::InvalidArgument(_)
        | AccessError::AddressNotAvailable
        | AccessError::MessageTooLarge { .. }
        | AccessError::PageTooLarge { .. }
        | AccessError::Node(_)
        | AccessError::Comp(_)
        | AccessError::ModelInit { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        AccessError::NotBound { .. }
        | AccessError::NotProvisioned
        | AccessError::Transport(_)
        | AccessError::Model(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}
