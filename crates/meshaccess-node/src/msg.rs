use crate::addr::{LabelUuid, UNASSIGNED};

/// Default TTL marker: let the network layer apply the node's default TTL.
pub const TTL_DEFAULT: u8 = 0xFF;

/// Per-message context shared by the receive and send paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    /// Network key index the message was received or is sent on.
    pub net_idx: u16,
    /// Application key index, or one of the device key markers.
    pub app_idx: u16,
    /// Remote address: source on receive, destination on send.
    pub addr: u16,
    /// Destination the message was received on.
    pub recv_dst: u16,
    /// Label UUID when `recv_dst` (or `addr` on send) is a virtual address.
    pub uuid: Option<LabelUuid>,
    /// TTL of the received message.
    pub recv_ttl: u8,
    /// TTL to send with.
    pub send_ttl: u8,
    /// Request segmented acknowledged transport.
    pub send_rel: bool,
    /// Allow the response to be sent with a random delay.
    pub rnd_delay: bool,
}

impl Default for MessageContext {
    fn default() -> Self {
        Self {
            net_idx: 0,
            app_idx: 0,
            addr: UNASSIGNED,
            recv_dst: UNASSIGNED,
            uuid: None,
            recv_ttl: 0,
            send_ttl: TTL_DEFAULT,
            send_rel: false,
            rnd_delay: false,
        }
    }
}

impl MessageContext {
    /// Context for an inbound message.
    pub fn inbound(app_idx: u16, src: u16, dst: u16) -> Self {
        Self {
            app_idx,
            addr: src,
            recv_dst: dst,
            ..Self::default()
        }
    }

    /// Context for replying to this message: same keys, back to the sender.
    pub fn reply(&self) -> Self {
        Self {
            net_idx: self.net_idx,
            app_idx: self.app_idx,
            addr: self.addr,
            send_ttl: TTL_DEFAULT,
            ..Self::default()
        }
    }
}

/// A network-layer send request handed to the [`crate::Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetTx<'a> {
    pub ctx: &'a MessageContext,
    /// Source element address.
    pub src: u16,
    /// Use friendship credentials.
    pub friend_cred: bool,
}
