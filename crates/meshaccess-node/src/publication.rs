//! Model publication context.
//!
//! The retransmit and period bytes use the composition wire encoding:
//! ```text
//! retransmit: iiiii ccc   count = ccc, interval = (iiiii + 1) * 50 ms
//! period:     rr ssssss   steps = ssssss, resolution rr = 100 ms | 1 s | 10 s | 10 min
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use crate::addr::{self, LabelUuid, UNASSIGNED};
use crate::error::ModelError;
use crate::model::ModelRef;
use crate::msg::TTL_DEFAULT;

/// Lower bound of the publication delay jitter, in milliseconds.
pub const RANDOM_DELAY_BASE: u64 = 20;
/// Jitter window before the first message of a period (20 - 50 ms).
pub const RANDOM_DELAY_SHORT: u16 = 30;
/// Jitter window for application and power-up triggered publications (20 - 500 ms).
pub const RANDOM_DELAY_LONG: u16 = 480;

/// Size of a persisted publication record.
pub const PUB_RECORD_LEN: usize = 10;

/// Publication update callback.
///
/// Called before each period's first transmission (and before
/// retransmissions when [`Publication::retr_update`] is set) to refill the
/// message buffer. An error skips the transmission.
pub type UpdateFn = Arc<dyn Fn(ModelRef, &mut BytesMut) -> Result<(), ModelError> + Send + Sync>;

/// Number of retransmissions encoded in a retransmit byte.
pub fn transmit_count(retransmit: u8) -> u8 {
    retransmit & 0x07
}

/// Retransmission interval encoded in a retransmit byte.
pub fn transmit_interval_ms(retransmit: u8) -> u32 {
    ((retransmit >> 3) as u32 + 1) * 50
}

/// Encode a retransmit byte. `interval_ms` is rounded down to 50 ms steps.
pub fn transmit(count: u8, interval_ms: u32) -> u8 {
    let steps = (interval_ms / 50).clamp(1, 32) - 1;
    ((steps as u8) << 3) | (count & 0x07)
}

/// Publish period in milliseconds, with the fast period divisor applied.
pub fn period_ms(period: u8, fast_period: bool, period_div: u8) -> u32 {
    let steps = (period & 0x3F) as u32;
    let ms = match period >> 6 {
        0x00 => steps * 100,
        0x01 => steps * 1_000,
        0x02 => steps * 10_000,
        _ => steps * 600_000,
    };

    if fast_period && ms != 0 {
        (ms >> period_div).max(100)
    } else {
        ms
    }
}

/// Configuration-visible publication parameters.
///
/// This is what configuration clients set and what gets persisted; runtime
/// state such as the burst counter is not part of it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PubParams {
    pub addr: u16,
    pub key: u16,
    pub cred: bool,
    pub ttl: u8,
    pub retransmit: u8,
    pub period: u8,
    pub period_div: u8,
    pub uuid: Option<LabelUuid>,
}

impl PubParams {
    /// Persisted form: `addr(2) key(2) ttl retransmit period (div | cred << 4) uuidx(2)`,
    /// little-endian.
    pub fn encode(&self, uuidx: u16) -> [u8; PUB_RECORD_LEN] {
        let mut rec = [0u8; PUB_RECORD_LEN];
        rec[0..2].copy_from_slice(&self.addr.to_le_bytes());
        rec[2..4].copy_from_slice(&self.key.to_le_bytes());
        rec[4] = self.ttl;
        rec[5] = self.retransmit;
        rec[6] = self.period;
        rec[7] = (self.period_div & 0x0F) | ((self.cred as u8) << 4);
        rec[8..10].copy_from_slice(&uuidx.to_le_bytes());
        rec
    }

    /// Parse a persisted record. Returns the parameters (without label) and
    /// the virtual label index.
    pub fn decode(rec: &[u8]) -> Option<(Self, u16)> {
        if rec.len() != PUB_RECORD_LEN {
            return None;
        }
        let params = Self {
            addr: u16::from_le_bytes([rec[0], rec[1]]),
            key: u16::from_le_bytes([rec[2], rec[3]]),
            ttl: rec[4],
            retransmit: rec[5],
            period: rec[6],
            period_div: rec[7] & 0x0F,
            cred: rec[7] & 0x10 != 0,
            uuid: None,
        };
        Some((params, u16::from_le_bytes([rec[8], rec[9]])))
    }
}

/// Publication state of one model.
///
/// An unassigned [`addr`](Self::addr) means publication is inactive; timer
/// fires for an inactive context are abandoned. `count` is only non-zero
/// during a retransmission burst.
#[derive(Clone)]
pub struct Publication {
    pub addr: u16,
    pub key: u16,
    /// Send with friendship credentials.
    pub cred: bool,
    pub ttl: u8,
    pub retransmit: u8,
    pub period: u8,
    pub period_div: u8,
    pub fast_period: bool,
    /// Allow random delay before sending.
    pub delayable: bool,
    /// Call the update callback before each retransmission too.
    pub retr_update: bool,
    /// Label of a virtual publish address.
    pub uuid: Option<LabelUuid>,
    /// Message to publish: opcode followed by payload.
    pub msg: BytesMut,
    pub update: Option<UpdateFn>,
    /// Transmissions left in the current burst.
    pub count: u8,
    /// Timestamp of the current period's first transmission.
    pub period_start: u64,
    /// Armed timer deadline.
    pub deadline: Option<u64>,
}

impl Default for Publication {
    fn default() -> Self {
        Self {
            addr: UNASSIGNED,
            key: 0,
            cred: false,
            ttl: TTL_DEFAULT,
            retransmit: 0,
            period: 0,
            period_div: 0,
            fast_period: false,
            delayable: false,
            retr_update: false,
            uuid: None,
            msg: BytesMut::new(),
            update: None,
            count: 0,
            period_start: 0,
            deadline: None,
        }
    }
}

impl Publication {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_update<F>(mut self, update: F) -> Self
    where
        F: Fn(ModelRef, &mut BytesMut) -> Result<(), ModelError> + Send + Sync + 'static,
    {
        self.update = Some(Arc::new(update));
        self
    }

    pub fn with_message(mut self, msg: &[u8]) -> Self {
        self.msg = BytesMut::from(msg);
        self
    }

    pub fn with_params(mut self, params: PubParams) -> Self {
        self.apply(params);
        self
    }

    pub fn delayable(mut self, delayable: bool) -> Self {
        self.delayable = delayable;
        self
    }

    pub fn retr_update(mut self, retr_update: bool) -> Self {
        self.retr_update = retr_update;
        self
    }

    pub fn is_active(&self) -> bool {
        self.addr != UNASSIGNED
    }

    pub fn period_ms(&self) -> u32 {
        period_ms(self.period, self.fast_period, self.period_div)
    }

    pub fn transmit_count(&self) -> u8 {
        transmit_count(self.retransmit)
    }

    pub fn transmit_interval_ms(&self) -> u32 {
        transmit_interval_ms(self.retransmit)
    }

    /// Messages sent so far in the current burst, counting the one in flight.
    pub fn msg_num(&self) -> u8 {
        (self.transmit_count() + 1).saturating_sub(self.count)
    }

    /// True while sending anything but the first message of a period.
    pub fn is_retransmission(&self) -> bool {
        self.count != self.transmit_count()
    }

    pub fn params(&self) -> PubParams {
        PubParams {
            addr: self.addr,
            key: self.key,
            cred: self.cred,
            ttl: self.ttl,
            retransmit: self.retransmit,
            period: self.period,
            period_div: self.period_div,
            uuid: self.uuid,
        }
    }

    /// Replace the configuration parameters and reset the burst counter.
    ///
    /// The label is kept only for virtual addresses.
    pub fn apply(&mut self, params: PubParams) {
        self.addr = params.addr;
        self.key = params.key;
        self.cred = params.cred;
        self.ttl = params.ttl;
        self.retransmit = params.retransmit;
        self.period = params.period;
        self.period_div = params.period_div & 0x0F;
        self.uuid = if addr::is_virtual(params.addr) {
            params.uuid
        } else {
            None
        };
        self.count = 0;
    }

    /// Deactivate publication and drop any armed deadline.
    pub fn clear(&mut self) {
        self.apply(PubParams {
            ttl: 0,
            ..PubParams::default()
        });
        self.deadline = None;
    }

    /// Arm the timer unless it is already armed.
    pub fn schedule(&mut self, at: u64) {
        if self.deadline.is_none() {
            self.deadline = Some(at);
        }
    }

    /// Arm the timer, replacing any armed deadline.
    pub fn reschedule(&mut self, at: u64) {
        self.deadline = Some(at);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

impl fmt::Debug for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publication")
            .field("addr", &format_args!("0x{:04x}", self.addr))
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("retransmit", &self.retransmit)
            .field("period", &self.period)
            .field("count", &self.count)
            .field("deadline", &self.deadline)
            .field("msg_len", &self.msg.len())
            .field("update", &self.update.is_some())
            .finish_non_exhaustive()
    }
}
