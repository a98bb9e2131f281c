//! Mesh address classes.
//!
//! Addresses are 16-bit:
//! - `0x0000` unassigned
//! - `0x0001..=0x7FFF` unicast
//! - `0x8000..=0xBFFF` virtual (hash of a 128-bit label UUID)
//! - `0xC000..=0xFEFF` group
//! - `0xFF00..=0xFFFF` fixed group (all-proxies, all-friends, all-nodes, ...)

/// A 128-bit virtual address label.
pub type LabelUuid = [u8; 16];

/// Unassigned address. Also marks an empty group subscription slot.
pub const UNASSIGNED: u16 = 0x0000;

/// All-proxies fixed group.
pub const ALL_PROXIES: u16 = 0xFFFC;
/// All-friends fixed group.
pub const ALL_FRIENDS: u16 = 0xFFFD;
/// All-relays fixed group.
pub const ALL_RELAYS: u16 = 0xFFFE;
/// All-nodes fixed group.
pub const ALL_NODES: u16 = 0xFFFF;

pub fn is_unicast(addr: u16) -> bool {
    addr != UNASSIGNED && addr < 0x8000
}

pub fn is_virtual(addr: u16) -> bool {
    (0x8000..0xC000).contains(&addr)
}

pub fn is_group(addr: u16) -> bool {
    (0xC000..0xFF00).contains(&addr)
}

pub fn is_fixed_group(addr: u16) -> bool {
    addr >= 0xFF00
}

/// Human-readable address class, used in logs and CLI output.
pub fn class_name(addr: u16) -> &'static str {
    match addr {
        UNASSIGNED => "unassigned",
        a if is_unicast(a) => "unicast",
        a if is_virtual(a) => "virtual",
        a if is_group(a) => "group",
        _ => "fixed-group",
    }
}
