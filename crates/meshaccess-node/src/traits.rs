use crate::addr::LabelUuid;
use crate::error::{ModelError, TransportError};
use crate::model::ModelRef;
use crate::msg::NetTx;

/// Lower-layer send primitive.
///
/// `send` returning is the end-of-transmission signal: the access layer
/// runs its completion logic (publication re-arm) right after the call.
pub trait Transport: Send {
    fn send(&mut self, tx: &NetTx<'_>, sdu: &[u8]) -> Result<(), TransportError>;
}

/// Random number source used for publication jitter.
pub trait RandomSource: Send {
    fn fill(&mut self, dst: &mut [u8]);

    fn next_u16(&mut self) -> u16 {
        let mut b = [0u8; 2];
        self.fill(&mut b);
        u16::from_le_bytes(b)
    }
}

/// Monotonic millisecond clock.
pub trait Clock: Send {
    fn now_ms(&self) -> u64;
}

/// Virtual label table, owned by the lower layers.
pub trait VirtualLabels: Send {
    /// Index of a stored label.
    fn index_of(&self, uuid: &LabelUuid) -> Option<u16>;

    /// Label stored at `index`.
    fn uuid_at(&self, index: u16) -> Option<LabelUuid>;
}

/// Operations available to a model's init callback.
pub trait ModelSetup {
    /// Find a SIG model on an element.
    fn find_sig(&self, elem: u8, id: u16) -> Option<ModelRef>;

    /// Find a vendor model on an element.
    fn find_vnd(&self, elem: u8, company: u16, id: u16) -> Option<ModelRef>;

    /// Declare that `ext` extends `base`.
    fn extend(&mut self, ext: ModelRef, base: ModelRef) -> Result<(), ModelError>;

    /// Declare that `corresponding` corresponds to `base`.
    fn correspond(&mut self, corresponding: ModelRef, base: ModelRef) -> Result<(), ModelError>;

    /// Bind a key index at registration time.
    fn bind_key(&mut self, model: ModelRef, key: u16) -> Result<(), ModelError>;

    /// Restrict a model to device key bindings.
    fn set_devkey_only(&mut self, model: ModelRef);
}
