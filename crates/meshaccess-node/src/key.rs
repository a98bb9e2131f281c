//! Key index values used for model bindings.
//!
//! Application keys are 12-bit indices. The top of the 16-bit range is
//! reserved for device-key markers and for the empty binding slot.

/// Empty key binding slot.
pub const UNUSED: u16 = 0xFFFF;

/// The local device key.
pub const DEV_LOCAL: u16 = 0xFFFE;

/// A remote node's device key.
pub const DEV_REMOTE: u16 = 0xFFFD;

/// Binding slot value that accepts any device key.
pub const DEV_ANY: u16 = 0xFFFC;

/// Largest valid application key index.
pub const APP_IDX_MAX: u16 = 0x0FFF;

pub fn is_dev_key(key: u16) -> bool {
    key == DEV_LOCAL || key == DEV_REMOTE
}

/// Returns true if `slots` binds `key`, directly or through the device-key wildcard.
pub fn slots_have_key(slots: &[u16], key: u16) -> bool {
    if key == UNUSED {
        return false;
    }
    slots
        .iter()
        .any(|slot| *slot == key || (*slot == DEV_ANY && is_dev_key(key)))
}
