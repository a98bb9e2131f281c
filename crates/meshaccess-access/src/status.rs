use std::fmt;

use serde::Serialize;

/// Outcome of delivering one inbound message to the node's models.
///
/// Reported back to the transport layer, which decides whether the message
/// counts as processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    Success,
    WrongOpcode,
    WrongKey,
    InvalidAddress,
    MessageNotUnderstood,
}

impl AccessStatus {
    pub fn is_success(self) -> bool {
        self == AccessStatus::Success
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessStatus::Success => "success",
            AccessStatus::WrongOpcode => "wrong_opcode",
            AccessStatus::WrongKey => "wrong_key",
            AccessStatus::InvalidAddress => "invalid_address",
            AccessStatus::MessageNotUnderstood => "message_not_understood",
        }
    }
}

impl fmt::Display for AccessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
