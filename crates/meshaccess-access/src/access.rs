use meshaccess_comp::{CompConfig, CompError, CompEncoder, ExtensionGraph, Walk};
use meshaccess_node::{
    addr, Clock, Comp2, Composition, LabelUuid, MessageContext, Model, ModelError, ModelRef,
    ModelSetup, Opcode, RandomSource, Transport, VirtualLabels,
};
use meshaccess_settings::SettingsStore;
use tracing::{debug, info, warn};

use crate::config::AccessConfig;
use crate::error::{AccessError, Result};

/// Observer for every inbound message whose opcode decoded, called after
/// model dispatch with the payload following the opcode.
pub type MsgCallback = Box<dyn FnMut(Opcode, &MessageContext, &[u8]) + Send>;

/// External services the access layer calls out to.
pub struct Collaborators {
    pub transport: Box<dyn Transport>,
    pub rng: Box<dyn RandomSource>,
    pub clock: Box<dyn Clock>,
    pub labels: Box<dyn VirtualLabels>,
    pub store: Box<dyn SettingsStore>,
}

/// The access layer of one node.
pub struct Access {
    pub(crate) comp: Composition,
    pub(crate) comp2: Option<Comp2>,
    pub(crate) config: AccessConfig,
    pub(crate) comp_config: CompConfig,
    pub(crate) graph: ExtensionGraph,
    pub(crate) primary_addr: u16,
    pub(crate) suspended: bool,
    /// Some model has pending state to store.
    pub(crate) mod_pending: bool,
    /// Stored pages must be cleared.
    pub(crate) comp_pending: bool,
    pub(crate) msg_cb: Option<MsgCallback>,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) rng: Box<dyn RandomSource>,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) labels: Box<dyn VirtualLabels>,
    pub(crate) store: Box<dyn SettingsStore>,
}

impl Access {
    /// Register a node composition.
    ///
    /// Sizes every model's key, group and label tables, checks vendor
    /// opcodes when `cid_force` is set, then runs model init callbacks in
    /// composition order. Extension and correspondence relations declared
    /// by the callbacks are recorded here; running out of relation slots
    /// fails registration.
    pub fn register(comp: Composition, config: AccessConfig, io: Collaborators) -> Result<Self> {
        comp.validate()?;

        let mut access = Self {
            comp,
            comp2: None,
            comp_config: config.comp_config(),
            graph: ExtensionGraph::new(config.graph_config()),
            config,
            primary_addr: addr::UNASSIGNED,
            suspended: false,
            mod_pending: false,
            comp_pending: false,
            msg_cb: None,
            transport: io.transport,
            rng: io.rng,
            clock: io.clock,
            labels: io.labels,
            store: io.store,
        };

        access.attach_models();
        if access.config.cid_force {
            access.check_vendor_opcodes()?;
        }
        access.init_models()?;

        for relation in access.graph.relations().iter() {
            debug!(
                kind = ?relation.kind,
                elem_base = relation.elem_base,
                idx_base = relation.idx_base,
                elem_ext = relation.elem_ext,
                idx_ext = relation.idx_ext,
                "registered model relation"
            );
        }
        let relations = access.graph.relations();
        if relations.len() < relations.capacity() {
            warn!(
                unused = relations.capacity() - relations.len(),
                "unused space in relation list"
            );
        }

        info!(
            elements = access.comp.elem_count(),
            models = access.comp.model_refs().len(),
            "composition registered"
        );
        Ok(access)
    }

    fn attach_models(&mut self) {
        let (keys, groups, labels) = (
            self.config.model_key_count,
            self.config.model_group_count,
            self.config.label_count,
        );
        for (e, elem) in self.comp.elements.iter_mut().enumerate() {
            for (i, model) in elem.models.iter_mut().enumerate() {
                model.attach(e as u8, i as u8, keys, groups, labels);
            }
            for (i, model) in elem.vnd_models.iter_mut().enumerate() {
                model.attach(e as u8, i as u8, keys, groups, labels);
            }
        }
    }

    fn check_vendor_opcodes(&self) -> Result<()> {
        for elem in &self.comp.elements {
            for model in &elem.vnd_models {
                if let Some(opcode) = model.foreign_vendor_op() {
                    return Err(AccessError::InvalidArgument(format!(
                        "vendor model {} handles opcode {opcode} of another company",
                        model.id
                    )));
                }
            }
        }
        Ok(())
    }

    fn init_models(&mut self) -> Result<()> {
        for model in self.comp.model_refs() {
            let Some(callbacks) = self.comp.model(model).and_then(|m| m.callbacks.clone()) else {
                continue;
            };

            let mut setup = Registrar {
                comp: &mut self.comp,
                graph: &mut self.graph,
                error: None,
            };
            let result = callbacks.init(model, &mut setup);
            if let Some(err) = setup.error {
                return Err(err.into());
            }
            result.map_err(|source| AccessError::ModelInit { model, source })?;
        }
        Ok(())
    }

    /// Register Composition Data Page 2 records.
    pub fn register_comp2(&mut self, comp2: Comp2) -> Result<()> {
        if !self.config.comp_page_2 {
            return Err(AccessError::InvalidArgument(
                "composition data page 2 disabled".into(),
            ));
        }
        for rec in &comp2.records {
            rec.validate()
                .map_err(|err| AccessError::InvalidArgument(err.to_string()))?;
        }
        self.comp2 = Some(comp2);
        Ok(())
    }

    /// Assign consecutive unicast addresses to the elements.
    pub fn provision(&mut self, addr: u16) {
        debug!(addr, elem_count = self.comp.elem_count(), "provisioned");
        self.primary_addr = addr;
        for (i, elem) in self.comp.elements.iter_mut().enumerate() {
            elem.addr = addr.wrapping_add(i as u16);
        }
    }

    pub fn unprovision(&mut self) {
        debug!("unprovisioned");
        self.primary_addr = addr::UNASSIGNED;
        for elem in &mut self.comp.elements {
            elem.addr = addr::UNASSIGNED;
        }
    }

    pub fn primary_addr(&self) -> u16 {
        self.primary_addr
    }

    pub fn is_provisioned(&self) -> bool {
        self.primary_addr != addr::UNASSIGNED
    }

    pub fn elem_count(&self) -> u8 {
        self.comp.elem_count()
    }

    /// Index of the element owning a unicast address.
    pub fn elem_find(&self, addr: u16) -> Option<u8> {
        if !addr::is_unicast(addr) {
            return None;
        }
        let base = self.comp.elements.first()?.addr;
        let index = addr.wrapping_sub(base);
        (index < self.comp.elem_count() as u16).then_some(index as u8)
    }

    /// True if a message to `addr` would be accepted by this node.
    pub fn has_addr(&self, addr: u16) -> bool {
        if addr::is_unicast(addr) {
            return self.elem_find(addr).is_some();
        }
        if self.msg_cb.is_some() {
            return true;
        }
        self.comp
            .elements
            .iter()
            .any(|elem| elem.all_models().any(|m| m.has_group(addr)))
    }

    pub fn composition(&self) -> &Composition {
        &self.comp
    }

    pub fn comp2(&self) -> Option<&Comp2> {
        self.comp2.as_ref()
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    pub fn extensions(&self) -> &ExtensionGraph {
        &self.graph
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn model(&self, model: ModelRef) -> Result<&Model> {
        Ok(self.comp.resolve(model)?)
    }

    /// Mutable access to a model's bindings, subscriptions and publication.
    ///
    /// Pair changes with [`Access::bind_store`], [`Access::sub_store`] or
    /// [`Access::pub_store`] to persist them.
    pub fn model_mut(&mut self, model: ModelRef) -> Result<&mut Model> {
        self.comp.resolve(model)?;
        self.comp
            .model_mut(model)
            .ok_or_else(|| AccessError::NotFound(format!("model {model}")))
    }

    pub fn is_extended(&self, model: ModelRef) -> bool {
        self.graph.is_extended(&self.comp, model)
    }

    /// Visit `model` and the rest of its extension group.
    pub fn extensions_walk<F>(&self, model: ModelRef, visit: F)
    where
        F: FnMut(ModelRef) -> Walk,
    {
        self.graph.walk(model, visit);
    }

    /// Model in `model`'s extension group, on its element, subscribed to
    /// `group`.
    pub fn find_group(&self, model: ModelRef, group: u16) -> Option<ModelRef> {
        self.graph.find_group(&self.comp, model, group)
    }

    /// Model in `model`'s extension group, on its element, subscribed to
    /// the virtual label `uuid`.
    pub fn find_label(&self, model: ModelRef, uuid: &LabelUuid) -> Option<ModelRef> {
        self.graph.find_label(&self.comp, model, uuid)
    }

    pub fn set_msg_cb(&mut self, cb: MsgCallback) {
        self.msg_cb = Some(cb);
    }

    pub fn clear_msg_cb(&mut self) {
        self.msg_cb = None;
    }

    pub(crate) fn encoder(&self) -> CompEncoder<'_> {
        CompEncoder::new(&self.comp, self.graph.relations(), &self.comp_config)
            .with_comp2(self.comp2.as_ref())
    }
}

/// [`ModelSetup`] handed to init callbacks during registration.
struct Registrar<'a> {
    comp: &'a mut Composition,
    graph: &'a mut ExtensionGraph,
    /// First relation failure; it fails the whole registration.
    error: Option<CompError>,
}

impl Registrar<'_> {
    fn record(&mut self, err: CompError) -> ModelError {
        let msg = err.to_string();
        if self.error.is_none() {
            self.error = Some(err);
        }
        ModelError::Setup(msg)
    }
}

impl ModelSetup for Registrar<'_> {
    fn find_sig(&self, elem: u8, id: u16) -> Option<ModelRef> {
        self.comp
            .elements
            .get(elem as usize)?
            .find_sig(id)
            .map(Model::model_ref)
    }

    fn find_vnd(&self, elem: u8, company: u16, id: u16) -> Option<ModelRef> {
        self.comp
            .elements
            .get(elem as usize)?
            .find_vnd(company, id)
            .map(Model::model_ref)
    }

    fn extend(&mut self, ext: ModelRef, base: ModelRef) -> std::result::Result<(), ModelError> {
        self.graph
            .extend(self.comp, ext, base)
            .map_err(|err| self.record(err))
    }

    fn correspond(
        &mut self,
        corresponding: ModelRef,
        base: ModelRef,
    ) -> std::result::Result<(), ModelError> {
        self.graph
            .correspond(self.comp, corresponding, base)
            .map_err(|err| self.record(err))
    }

    fn bind_key(&mut self, model: ModelRef, key: u16) -> std::result::Result<(), ModelError> {
        let model = self
            .comp
            .model_mut(model)
            .ok_or_else(|| ModelError::Setup(format!("unknown model {model}")))?;
        if model.bind_key(key) {
            Ok(())
        } else {
            Err(ModelError::Setup("no free key slot".into()))
        }
    }

    fn set_devkey_only(&mut self, model: ModelRef) {
        if let Some(model) = self.comp.model_mut(model) {
            model.flags.devkey_only = true;
        }
    }
}
