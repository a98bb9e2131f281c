use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::addr::{LabelUuid, UNASSIGNED};
use crate::error::ModelError;
use crate::key;
use crate::msg::MessageContext;
use crate::opcode::Opcode;
use crate::publication::Publication;
use crate::traits::ModelSetup;

/// Identity of a model instance inside the node composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelRef {
    /// Element index.
    pub elem: u8,
    /// Index in the element's SIG or vendor model list.
    pub index: u8,
    /// Vendor model list.
    pub vnd: bool,
}

impl ModelRef {
    pub const fn sig(elem: u8, index: u8) -> Self {
        Self {
            elem,
            index,
            vnd: false,
        }
    }

    pub const fn vnd(elem: u8, index: u8) -> Self {
        Self {
            elem,
            index,
            vnd: true,
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.vnd { "vnd" } else { "sig" };
        write!(f, "{}/{}{}", self.elem, kind, self.index)
    }
}

/// SIG or vendor model identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelId {
    Sig(u16),
    Vendor { company: u16, id: u16 },
}

impl ModelId {
    /// Size of the identifier in composition data.
    pub fn wire_len(self) -> usize {
        match self {
            ModelId::Sig(_) => 2,
            ModelId::Vendor { .. } => 4,
        }
    }

    /// Append the composition data encoding (little-endian, company first).
    pub fn encode(self, dst: &mut BytesMut) {
        match self {
            ModelId::Sig(id) => dst.put_u16_le(id),
            ModelId::Vendor { company, id } => {
                dst.put_u16_le(company);
                dst.put_u16_le(id);
            }
        }
    }

    pub fn is_vendor(self) -> bool {
        matches!(self, ModelId::Vendor { .. })
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelId::Sig(id) => write!(f, "0x{id:04x}"),
            ModelId::Vendor { company, id } => write!(f, "0x{company:04x}:0x{id:04x}"),
        }
    }
}

/// Payload length rule of an operation (opcode excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgLen {
    Exact(usize),
    Min(usize),
}

impl MsgLen {
    pub fn accepts(self, len: usize) -> bool {
        match self {
            MsgLen::Exact(n) => len == n,
            MsgLen::Min(n) => len >= n,
        }
    }
}

/// Operation handler.
///
/// The handler receives its own cursor over the payload; whatever it
/// consumes is not visible to the caller.
pub type OpHandler =
    Arc<dyn Fn(&mut HandlerCtx<'_>, &mut Bytes) -> Result<(), ModelError> + Send + Sync>;

/// One entry of a model's operation table.
#[derive(Clone)]
pub struct ModelOp {
    pub opcode: Opcode,
    pub len: MsgLen,
    pub handler: OpHandler,
}

impl fmt::Debug for ModelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelOp")
            .field("opcode", &self.opcode)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// A message queued by a handler, sent by the access layer once the
/// handler returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub model: ModelRef,
    pub ctx: MessageContext,
    pub opcode: Opcode,
    pub payload: Bytes,
}

impl Reply {
    /// Opcode followed by payload.
    pub fn to_sdu(&self) -> BytesMut {
        let mut sdu = BytesMut::with_capacity(self.opcode.len() + self.payload.len());
        self.opcode.encode(&mut sdu);
        sdu.put_slice(&self.payload);
        sdu
    }
}

/// What a handler can see and do while processing a message.
pub struct HandlerCtx<'a> {
    model: &'a Model,
    msg: &'a MessageContext,
    replies: &'a mut Vec<Reply>,
}

impl<'a> HandlerCtx<'a> {
    pub fn new(model: &'a Model, msg: &'a MessageContext, replies: &'a mut Vec<Reply>) -> Self {
        Self {
            model,
            msg,
            replies,
        }
    }

    /// The model the message was dispatched to.
    pub fn model(&self) -> &Model {
        self.model
    }

    /// Receive context of the message.
    pub fn msg(&self) -> &MessageContext {
        self.msg
    }

    /// Queue a response to the sender, on the key the message arrived with.
    pub fn reply(&mut self, opcode: Opcode, payload: impl Into<Bytes>) {
        let ctx = self.msg.reply();
        self.send(ctx, opcode, payload);
    }

    /// Queue a message with an explicit send context.
    pub fn send(&mut self, ctx: MessageContext, opcode: Opcode, payload: impl Into<Bytes>) {
        self.replies.push(Reply {
            model: self.model.model_ref(),
            ctx,
            opcode,
            payload: payload.into(),
        });
    }
}

/// One models-metadata entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    pub id: u16,
    pub data: Bytes,
}

impl MetadataEntry {
    pub fn new(id: u16, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }
}

/// Opaque model data a model wants persisted under its `data` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelData {
    /// Optional sub-name appended after `data/`.
    pub name: Option<String>,
    /// Value to store; empty deletes the entry.
    pub value: Vec<u8>,
}

/// Optional per-model lifecycle callbacks.
pub trait ModelCallbacks: Send + Sync {
    /// Called once at registration, after runtime indices are assigned.
    fn init(&self, _model: ModelRef, _setup: &mut dyn ModelSetup) -> Result<(), ModelError> {
        Ok(())
    }

    /// Restore a `data[/name]` entry from persistent storage.
    fn settings_set(
        &self,
        _model: ModelRef,
        _name: Option<&str>,
        _value: &[u8],
    ) -> Result<(), ModelError> {
        Ok(())
    }

    /// Produce the data to write when a data store was scheduled.
    fn pending_data(&self, _model: ModelRef) -> Vec<ModelData> {
        Vec::new()
    }
}

/// Runtime flags of a model instance.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ModelFlags {
    /// Another model extends this one.
    pub extended: bool,
    /// Only the device key may be bound.
    pub devkey_only: bool,
    pub bind_pending: bool,
    pub sub_pending: bool,
    pub pub_pending: bool,
    pub data_pending: bool,
}

impl ModelFlags {
    pub fn any_pending(&self) -> bool {
        self.bind_pending || self.sub_pending || self.pub_pending || self.data_pending
    }
}

/// A model instance.
pub struct Model {
    pub id: ModelId,
    pub ops: Vec<ModelOp>,
    /// Bound key slots; [`key::UNUSED`] marks an empty slot.
    pub keys: Vec<u16>,
    /// Group subscription slots; [`UNASSIGNED`] marks an empty slot.
    pub groups: Vec<u16>,
    /// Virtual label subscription slots.
    pub labels: Vec<Option<LabelUuid>>,
    pub metadata: Option<Vec<MetadataEntry>>,
    pub publication: Option<Publication>,
    pub callbacks: Option<Arc<dyn ModelCallbacks>>,
    pub flags: ModelFlags,
    elem_idx: u8,
    mod_idx: u8,
}

impl Model {
    /// A SIG model with an empty operation table.
    pub fn sig(id: u16) -> Self {
        Self::with_id(ModelId::Sig(id))
    }

    /// A vendor model with an empty operation table.
    pub fn vendor(company: u16, id: u16) -> Self {
        Self::with_id(ModelId::Vendor { company, id })
    }

    fn with_id(id: ModelId) -> Self {
        Self {
            id,
            ops: Vec::new(),
            keys: Vec::new(),
            groups: Vec::new(),
            labels: Vec::new(),
            metadata: None,
            publication: None,
            callbacks: None,
            flags: ModelFlags::default(),
            elem_idx: 0,
            mod_idx: 0,
        }
    }

    /// Add an operation.
    pub fn with_op<F>(mut self, opcode: Opcode, len: MsgLen, handler: F) -> Self
    where
        F: Fn(&mut HandlerCtx<'_>, &mut Bytes) -> Result<(), ModelError> + Send + Sync + 'static,
    {
        self.ops.push(ModelOp {
            opcode,
            len,
            handler: Arc::new(handler),
        });
        self
    }

    pub fn with_metadata(mut self, entries: Vec<MetadataEntry>) -> Self {
        self.metadata = Some(entries);
        self
    }

    pub fn with_publication(mut self, publication: Publication) -> Self {
        self.publication = Some(publication);
        self
    }

    pub fn with_callbacks(mut self, callbacks: Arc<dyn ModelCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    /// Assign runtime indices and size the binding/subscription tables.
    ///
    /// Existing slot contents are discarded.
    pub fn attach(&mut self, elem_idx: u8, mod_idx: u8, keys: usize, groups: usize, labels: usize) {
        self.elem_idx = elem_idx;
        self.mod_idx = mod_idx;
        self.keys = vec![key::UNUSED; keys];
        self.groups = vec![UNASSIGNED; groups];
        self.labels = vec![None; labels];
        self.flags = ModelFlags::default();
    }

    pub fn elem_idx(&self) -> u8 {
        self.elem_idx
    }

    pub fn mod_idx(&self) -> u8 {
        self.mod_idx
    }

    pub fn model_ref(&self) -> ModelRef {
        ModelRef {
            elem: self.elem_idx,
            index: self.mod_idx,
            vnd: self.id.is_vendor(),
        }
    }

    /// Company identifier of a vendor model.
    pub fn company(&self) -> Option<u16> {
        match self.id {
            ModelId::Vendor { company, .. } => Some(company),
            ModelId::Sig(_) => None,
        }
    }

    pub fn find_op(&self, opcode: Opcode) -> Option<&ModelOp> {
        self.ops.iter().find(|op| op.opcode == opcode)
    }

    /// First vendor opcode whose company id differs from the model's.
    pub fn foreign_vendor_op(&self) -> Option<Opcode> {
        let company = self.company()?;
        self.ops
            .iter()
            .map(|op| op.opcode)
            .find(|opcode| opcode.company() != Some(company))
    }

    pub fn has_key(&self, key: u16) -> bool {
        key::slots_have_key(&self.keys, key)
    }

    /// Bind a key. Returns false if the table is full.
    pub fn bind_key(&mut self, key: u16) -> bool {
        if self.keys.contains(&key) {
            return true;
        }
        match self.keys.iter_mut().find(|slot| **slot == key::UNUSED) {
            Some(slot) => {
                *slot = key;
                true
            }
            None => false,
        }
    }

    pub fn unbind_key(&mut self, key: u16) -> bool {
        let mut found = false;
        for slot in self.keys.iter_mut().filter(|slot| **slot == key) {
            *slot = key::UNUSED;
            found = true;
        }
        found
    }

    /// Bound keys, in slot order.
    pub fn bound_keys(&self) -> impl Iterator<Item = u16> + '_ {
        self.keys.iter().copied().filter(|k| *k != key::UNUSED)
    }

    pub fn has_group(&self, addr: u16) -> bool {
        addr != UNASSIGNED && self.groups.contains(&addr)
    }

    /// Subscribe to a group. Returns false if the table is full.
    pub fn add_group(&mut self, addr: u16) -> bool {
        if self.has_group(addr) {
            return true;
        }
        match self.groups.iter_mut().find(|slot| **slot == UNASSIGNED) {
            Some(slot) => {
                *slot = addr;
                true
            }
            None => false,
        }
    }

    pub fn del_group(&mut self, addr: u16) -> bool {
        match self.groups.iter_mut().find(|slot| **slot == addr) {
            Some(slot) if addr != UNASSIGNED => {
                *slot = UNASSIGNED;
                true
            }
            _ => false,
        }
    }

    /// Subscribed groups, in slot order.
    pub fn subscribed_groups(&self) -> impl Iterator<Item = u16> + '_ {
        self.groups.iter().copied().filter(|a| *a != UNASSIGNED)
    }

    pub fn has_label(&self, uuid: &LabelUuid) -> bool {
        self.labels.iter().flatten().any(|l| l == uuid)
    }

    /// True when both a free label slot and a free group slot exist.
    pub fn has_free_label_slot(&self) -> bool {
        self.labels.iter().any(Option::is_none) && self.groups.contains(&UNASSIGNED)
    }

    /// Subscribe to a virtual label. Returns false if the table is full.
    pub fn add_label(&mut self, uuid: LabelUuid) -> bool {
        if self.has_label(&uuid) {
            return true;
        }
        match self.labels.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(uuid);
                true
            }
            None => false,
        }
    }

    pub fn del_label(&mut self, uuid: &LabelUuid) -> bool {
        match self.labels.iter_mut().find(|slot| slot.as_ref() == Some(uuid)) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("id", &self.id)
            .field("ref", &self.model_ref())
            .field("ops", &self.ops)
            .field("keys", &self.keys)
            .field("groups", &self.groups)
            .field("metadata", &self.metadata)
            .field("publication", &self.publication)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attached(model: Model) -> Model {
        let mut model = model;
        model.attach(1, 2, 2, 2, 1);
        model
    }

    #[test]
    fn key_table_is_bounded() {
        let mut model = attached(Model::sig(0x1000));
        assert!(model.bind_key(1));
        assert!(model.bind_key(2));
        assert!(model.bind_key(2));
        assert!(!model.bind_key(3));
        assert_eq!(model.bound_keys().collect::<Vec<_>>(), vec![1, 2]);
        assert!(model.unbind_key(1));
        assert!(model.bind_key(3));
        assert!(model.has_key(3));
    }

    #[test]
    fn group_table_ignores_unassigned() {
        let mut model = attached(Model::sig(0x1000));
        assert!(!model.has_group(UNASSIGNED));
        assert!(model.add_group(0xC001));
        assert!(model.has_group(0xC001));
        assert!(!model.del_group(UNASSIGNED));
        assert!(model.del_group(0xC001));
        assert_eq!(model.subscribed_groups().count(), 0);
    }

    #[test]
    fn label_slot_requires_group_slot() {
        let mut model = attached(Model::sig(0x1000));
        assert!(model.has_free_label_slot());
        model.add_group(0xC001);
        model.add_group(0xC002);
        assert!(!model.has_free_label_slot());
        assert!(model.add_label([7; 16]));
        assert!(model.has_label(&[7; 16]));
    }

    #[test]
    fn model_ref_and_vendor_checks() {
        let model = attached(
            Model::vendor(0x0059, 0x0001)
                .with_op(Opcode::op3(0x01, 0x0059), MsgLen::Min(0), |_, _| Ok(()))
                .with_op(Opcode::op3(0x02, 0x0060), MsgLen::Min(0), |_, _| Ok(())),
        );
        assert_eq!(model.model_ref(), ModelRef::vnd(1, 2));
        assert_eq!(model.foreign_vendor_op(), Some(Opcode::op3(0x02, 0x0060)));
        assert_eq!(model.model_ref().to_string(), "1/vnd2");
    }

    #[test]
    fn handler_replies_go_back_to_sender() {
        let model = attached(Model::sig(0x1000));
        let msg = MessageContext::inbound(3, 0x0100, 0x0002);
        let mut replies = Vec::new();
        let mut ctx = HandlerCtx::new(&model, &msg, &mut replies);
        ctx.reply(Opcode::op2(0x82, 0x04), vec![1u8]);

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].ctx.addr, 0x0100);
        assert_eq!(replies[0].ctx.app_idx, 3);
        assert_eq!(replies[0].to_sdu().as_ref(), &[0x82, 0x04, 0x01]);
    }
}
