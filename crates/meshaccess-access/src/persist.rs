//! Persistence of model bindings, subscriptions, publication and model
//! data through the [`meshaccess_settings::SettingsStore`].
//!
//! Mutations only set dirty flags; [`Access::store_pending`] writes them
//! out in one pass.

use meshaccess_node::addr;
use meshaccess_node::key;
use meshaccess_node::publication::RANDOM_DELAY_LONG;
use meshaccess_node::{LabelUuid, Model, ModelRef, PubParams};
use meshaccess_settings::{overlay_path, ModelKey, SettingsStore, SubKey};
use tracing::{debug, error, warn};

use crate::access::Access;
use crate::error::{AccessError, Result};

/// Overlay families that share the settings namespace with model state.
const OVERLAY_FAMILIES: [&str; 2] = ["cmp", "metadata"];

fn read_u16s(value: &[u8]) -> Result<Vec<u16>> {
    if value.len() % 2 != 0 {
        return Err(AccessError::InvalidArgument(format!(
            "odd length list ({} bytes)",
            value.len()
        )));
    }
    Ok(value
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect())
}

fn write_u16s(values: impl Iterator<Item = u16>) -> Vec<u8> {
    values.flat_map(u16::to_le_bytes).collect()
}

/// Save `value`, or delete the entry when it is empty. Failures are logged.
fn write_entry(store: &mut dyn SettingsStore, path: &str, value: &[u8]) {
    let result = if value.is_empty() {
        store.delete(path)
    } else {
        store.save(path, value)
    };
    match result {
        Ok(()) => debug!(path, len = value.len(), "stored model state"),
        Err(err) => error!(path, %err, "failed to store model state"),
    }
}

impl Access {
    /// Restore one persisted entry. An empty value means the state was
    /// cleared.
    pub fn settings_set(&mut self, path: &str, value: &[u8]) -> Result<()> {
        let ns = self.config.settings_ns.as_str();
        if let Some(rest) = path.strip_prefix(ns).and_then(|r| r.strip_prefix('/')) {
            if OVERLAY_FAMILIES
                .iter()
                .any(|family| rest.split('/').next() == Some(family))
            {
                // stored pages are read on demand
                return Ok(());
            }
        }

        let parsed =
            ModelKey::parse(ns, path).map_err(|_| AccessError::NotFound(path.to_string()))?;
        let model = ModelRef {
            elem: parsed.elem,
            index: parsed.index,
            vnd: parsed.vnd,
        };
        if self.comp.resolve(model).is_err() {
            return Err(AccessError::NotFound(format!("model {model} for {path}")));
        }

        debug!(path, len = value.len(), "restoring model state");
        match parsed.sub {
            SubKey::Bind => {
                let keys = read_u16s(value)?;
                let target = self.model_mut(model)?;
                target.keys.fill(key::UNUSED);
                for (slot, k) in target.keys.iter_mut().zip(keys) {
                    *slot = k;
                }
                Ok(())
            }
            SubKey::Sub => {
                let groups = read_u16s(value)?;
                let target = self.model_mut(model)?;
                target.groups.fill(addr::UNASSIGNED);
                for (slot, group) in target.groups.iter_mut().zip(groups) {
                    *slot = group;
                }
                Ok(())
            }
            SubKey::SubV => {
                let indices = read_u16s(value)?;
                let uuids: Vec<LabelUuid> = indices
                    .into_iter()
                    .filter_map(|index| {
                        let uuid = self.labels.uuid_at(index);
                        if uuid.is_none() {
                            warn!(%model, index, "dropping unknown virtual label");
                        }
                        uuid
                    })
                    .collect();
                let target = self.model_mut(model)?;
                target.labels.fill(None);
                for (slot, uuid) in target.labels.iter_mut().zip(uuids) {
                    *slot = Some(uuid);
                }
                Ok(())
            }
            SubKey::Pub => self.restore_pub(model, value),
            SubKey::Data(name) => {
                let callbacks = self.model(model)?.callbacks.clone();
                if let Some(callbacks) = callbacks {
                    callbacks.settings_set(model, name.as_deref(), value)?;
                }
                Ok(())
            }
        }
    }

    fn restore_pub(&mut self, model: ModelRef, value: &[u8]) -> Result<()> {
        let decoded = PubParams::decode(value);
        let Access { comp, labels, .. } = self;
        let publication = comp
            .model_mut(model)
            .and_then(|m| m.publication.as_mut())
            .ok_or_else(|| AccessError::InvalidArgument(format!("model {model} does not publish")))?;

        if value.is_empty() {
            publication.clear();
            return Ok(());
        }

        let (mut params, uuidx) = decoded.ok_or_else(|| {
            AccessError::InvalidArgument(format!("malformed publication record ({} bytes)", value.len()))
        })?;
        if addr::is_virtual(params.addr) {
            params.uuid = labels.uuid_at(uuidx);
            if params.uuid.is_none() {
                warn!(%model, uuidx, "publication label not found");
            }
        }
        publication.apply(params);
        debug!(%model, addr = params.addr, key = params.key, "restored publication");
        Ok(())
    }

    /// Walk the SIG and vendor model subtrees of the store and restore every
    /// entry. Returns how many were applied.
    pub fn load_settings(&mut self) -> usize {
        let mut applied = 0;
        for family in ["s", "v"] {
            let prefix = format!("{}/{family}", self.config.settings_ns);
            let entries = match self.store.load_subtree(&prefix) {
                Ok(entries) => entries,
                Err(err) => {
                    error!(prefix, %err, "failed to load model settings");
                    continue;
                }
            };
            for (path, value) in entries {
                match self.settings_set(&path, &value) {
                    Ok(()) => applied += 1,
                    Err(err) => warn!(path, %err, "ignoring stored entry"),
                }
            }
        }
        debug!(applied, "model settings loaded");
        applied
    }

    fn mark_pending(&mut self, model: ModelRef, mark: impl FnOnce(&mut Model)) -> Result<()> {
        mark(self.model_mut(model)?);
        self.mod_pending = true;
        Ok(())
    }

    /// Schedule the model's key bindings for storage.
    pub fn bind_store(&mut self, model: ModelRef) -> Result<()> {
        self.mark_pending(model, |m| m.flags.bind_pending = true)
    }

    /// Schedule the model's subscriptions (groups and labels) for storage.
    pub fn sub_store(&mut self, model: ModelRef) -> Result<()> {
        self.mark_pending(model, |m| m.flags.sub_pending = true)
    }

    pub fn pub_store(&mut self, model: ModelRef) -> Result<()> {
        self.mark_pending(model, |m| m.flags.pub_pending = true)
    }

    /// Ask the model's `pending_data` callback for data at the next flush.
    pub fn data_store_schedule(&mut self, model: ModelRef) -> Result<()> {
        self.mark_pending(model, |m| m.flags.data_pending = true)
    }

    /// Schedule removal of every stored page.
    pub fn comp_data_clear(&mut self) {
        self.comp_pending = true;
    }

    pub fn has_pending(&self) -> bool {
        self.mod_pending || self.comp_pending
    }

    /// Write out everything marked pending.
    pub fn store_pending(&mut self) {
        if self.comp_pending {
            self.comp_pending = false;
            self.comp_data_pending_clear();
        }
        if !self.mod_pending {
            return;
        }
        self.mod_pending = false;

        for model in self.comp.model_refs() {
            self.store_model(model);
        }
    }

    fn store_model(&mut self, model: ModelRef) {
        let Access {
            comp,
            config,
            labels,
            store,
            ..
        } = self;
        let ns = config.settings_ns.as_str();
        let Some(target) = comp.model_mut(model) else {
            return;
        };
        let flags = target.flags;
        if !flags.any_pending() {
            return;
        }
        target.flags.bind_pending = false;
        target.flags.sub_pending = false;
        target.flags.pub_pending = false;
        target.flags.data_pending = false;

        let path = |sub: SubKey| ModelKey::new(model.vnd, model.elem, model.index, sub).path(ns);
        let store = store.as_mut();

        if flags.bind_pending {
            write_entry(store, &path(SubKey::Bind), &write_u16s(target.bound_keys()));
        }

        if flags.sub_pending {
            write_entry(store, &path(SubKey::Sub), &write_u16s(target.subscribed_groups()));
            let indices = target.labels.iter().flatten().filter_map(|uuid| {
                let index = labels.index_of(uuid);
                if index.is_none() {
                    warn!(%model, "subscribed label has no index");
                }
                index
            });
            write_entry(store, &path(SubKey::SubV), &write_u16s(indices));
        }

        if flags.pub_pending {
            let record = match target.publication.as_ref() {
                Some(publication) if publication.is_active() => {
                    let uuidx = publication
                        .uuid
                        .filter(|_| addr::is_virtual(publication.addr))
                        .and_then(|uuid| labels.index_of(&uuid))
                        .unwrap_or(0);
                    publication.params().encode(uuidx).to_vec()
                }
                _ => Vec::new(),
            };
            write_entry(store, &path(SubKey::Pub), &record);
        }

        if flags.data_pending {
            if let Some(callbacks) = target.callbacks.clone() {
                for data in callbacks.pending_data(model) {
                    write_entry(store, &path(SubKey::Data(data.name)), &data.value);
                }
            }
        }
    }

    /// Store model data under `data` or `data/<name>`; empty data deletes
    /// the entry.
    pub fn model_data_store(&mut self, model: ModelRef, name: Option<&str>, data: &[u8]) -> Result<()> {
        self.comp.resolve(model)?;
        let path = ModelKey::new(
            model.vnd,
            model.elem,
            model.index,
            SubKey::Data(name.map(str::to_string)),
        )
        .path(&self.config.settings_ns);

        if data.is_empty() {
            self.store.delete(&path)?;
        } else {
            self.store.save(&path, data)?;
        }
        debug!(path, len = data.len(), "stored model data");
        Ok(())
    }

    /// Delete every stored page overlay now.
    pub fn comp_data_pending_clear(&mut self) {
        let ns = self.config.settings_ns.clone();
        let paths = (128..=130)
            .map(|page| overlay_path(&ns, "cmp", page))
            .chain([overlay_path(&ns, "metadata", 128)]);
        for path in paths {
            if let Err(err) = self.store.delete(&path) {
                error!(path, %err, "failed to clear stored page");
            }
        }
    }

    /// Arm periodic publication after settings are loaded.
    ///
    /// Every active publication with an update callback and a non-zero
    /// period first fires one period from now, plus up to 500 ms of jitter
    /// when delayable.
    pub fn settings_commit(&mut self) {
        let now = self.clock.now_ms();
        let jitter = self.config.delayable_publication;
        let Access { comp, rng, .. } = self;

        for elem in &mut comp.elements {
            for m in elem.models.iter_mut().chain(elem.vnd_models.iter_mut()) {
                let model = m.model_ref();
                let Some(publication) = m.publication.as_mut() else {
                    continue;
                };
                let period = publication.period_ms() as u64;
                if publication.update.is_none() || !publication.is_active() || period == 0 {
                    continue;
                }

                let delay = if publication.delayable && jitter {
                    crate::publish::pub_delay(rng.as_mut(), RANDOM_DELAY_LONG)
                } else {
                    0
                };
                publication.schedule(now + period + delay);
                debug!(%model, at = now + period + delay, "publication armed");
            }
        }
    }
}
