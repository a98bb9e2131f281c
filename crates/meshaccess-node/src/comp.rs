use bytes::Bytes;
use tracing::debug;

use crate::addr::UNASSIGNED;
use crate::error::{NodeError, Result};
use crate::model::{Model, ModelId, ModelRef};

/// An addressable part of the node.
#[derive(Debug)]
pub struct Element {
    /// Location descriptor.
    pub loc: u16,
    pub models: Vec<Model>,
    pub vnd_models: Vec<Model>,
    /// Unicast address, assigned at provisioning.
    pub addr: u16,
}

impl Element {
    pub fn new(loc: u16) -> Self {
        Self {
            loc,
            models: Vec::new(),
            vnd_models: Vec::new(),
            addr: UNASSIGNED,
        }
    }

    pub fn with_model(mut self, model: Model) -> Self {
        self.models.push(model);
        self
    }

    pub fn with_vnd_model(mut self, model: Model) -> Self {
        self.vnd_models.push(model);
        self
    }

    pub fn get(&self, vnd: bool, index: u8) -> Option<&Model> {
        self.list(vnd).get(index as usize)
    }

    pub fn get_mut(&mut self, vnd: bool, index: u8) -> Option<&mut Model> {
        if vnd {
            self.vnd_models.get_mut(index as usize)
        } else {
            self.models.get_mut(index as usize)
        }
    }

    pub fn list(&self, vnd: bool) -> &[Model] {
        if vnd {
            &self.vnd_models
        } else {
            &self.models
        }
    }

    /// Number of SIG models, as the composition data count byte.
    pub fn sig_count(&self) -> u8 {
        self.models.len() as u8
    }

    pub fn vnd_count(&self) -> u8 {
        self.vnd_models.len() as u8
    }

    pub fn find_sig(&self, id: u16) -> Option<&Model> {
        self.models.iter().find(|m| m.id == ModelId::Sig(id))
    }

    pub fn find_vnd(&self, company: u16, id: u16) -> Option<&Model> {
        self.vnd_models
            .iter()
            .find(|m| m.id == ModelId::Vendor { company, id })
    }

    /// SIG models followed by vendor models.
    pub fn all_models(&self) -> impl Iterator<Item = &Model> + '_ {
        self.models.iter().chain(self.vnd_models.iter())
    }
}

/// The node's composition: identification and elements.
#[derive(Debug)]
pub struct Composition {
    /// Company identifier.
    pub cid: u16,
    /// Product identifier.
    pub pid: u16,
    /// Version identifier.
    pub vid: u16,
    pub elements: Vec<Element>,
}

impl Composition {
    pub fn new(cid: u16, pid: u16, vid: u16) -> Self {
        Self {
            cid,
            pid,
            vid,
            elements: Vec::new(),
        }
    }

    pub fn with_element(mut self, elem: Element) -> Self {
        self.elements.push(elem);
        self
    }

    /// Check the structural limits of the composition data encoding.
    pub fn validate(&self) -> Result<()> {
        if self.elements.is_empty() {
            return Err(NodeError::InvalidComposition("no elements".into()));
        }
        if self.elements.len() > u8::MAX as usize {
            return Err(NodeError::InvalidComposition(format!(
                "{} elements",
                self.elements.len()
            )));
        }

        for (idx, elem) in self.elements.iter().enumerate() {
            // Page 1 addresses models by one composition index byte.
            if elem.models.len() + elem.vnd_models.len() > u8::MAX as usize {
                return Err(NodeError::InvalidComposition(format!(
                    "element {idx} has too many models"
                )));
            }
            if let Some(m) = elem.models.iter().find(|m| m.id.is_vendor()) {
                return Err(NodeError::InvalidComposition(format!(
                    "vendor model {} in SIG list of element {idx}",
                    m.id
                )));
            }
            if let Some(m) = elem.vnd_models.iter().find(|m| !m.id.is_vendor()) {
                return Err(NodeError::InvalidComposition(format!(
                    "SIG model {} in vendor list of element {idx}",
                    m.id
                )));
            }
            for model in elem.all_models() {
                validate_metadata(idx, model)?;
            }
        }

        debug!(elem_count = self.elements.len(), "composition validated");
        Ok(())
    }

    pub fn elem_count(&self) -> u8 {
        self.elements.len() as u8
    }

    pub fn element(&self, idx: u8) -> Result<&Element> {
        self.elements
            .get(idx as usize)
            .ok_or(NodeError::InvalidElement(idx))
    }

    pub fn model(&self, r: ModelRef) -> Option<&Model> {
        self.elements.get(r.elem as usize)?.get(r.vnd, r.index)
    }

    pub fn model_mut(&mut self, r: ModelRef) -> Option<&mut Model> {
        self.elements.get_mut(r.elem as usize)?.get_mut(r.vnd, r.index)
    }

    /// Like [`model`](Self::model), with an error naming the bad index.
    pub fn resolve(&self, r: ModelRef) -> Result<&Model> {
        let elem = self.element(r.elem)?;
        elem.get(r.vnd, r.index).ok_or(NodeError::InvalidModel {
            kind: if r.vnd { "vendor" } else { "SIG" },
            index: r.index,
        })
    }

    /// Position of a model in its element, counting SIG models first.
    pub fn comp_index(&self, r: ModelRef) -> Option<u8> {
        let elem = self.elements.get(r.elem as usize)?;
        elem.get(r.vnd, r.index)?;
        if r.vnd {
            elem.sig_count().checked_add(r.index)
        } else {
            Some(r.index)
        }
    }

    /// Inverse of [`comp_index`](Self::comp_index).
    pub fn model_at(&self, elem: u8, comp_index: u8) -> Option<ModelRef> {
        let e = self.elements.get(elem as usize)?;
        if comp_index < e.sig_count() {
            Some(ModelRef::sig(elem, comp_index))
        } else {
            let index = comp_index - e.sig_count();
            (index < e.vnd_count()).then_some(ModelRef::vnd(elem, index))
        }
    }

    /// Every model, element by element, SIG models before vendor models.
    pub fn model_refs(&self) -> Vec<ModelRef> {
        self.elements
            .iter()
            .enumerate()
            .flat_map(|(e, elem)| {
                let e = e as u8;
                let sig = (0..elem.sig_count()).map(move |i| ModelRef::sig(e, i));
                let vnd = (0..elem.vnd_count()).map(move |i| ModelRef::vnd(e, i));
                sig.chain(vnd)
            })
            .collect()
    }
}

/// One Composition Data Page 2 record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comp2Record {
    /// Mesh profile identifier.
    pub id: u16,
    /// Profile version x.y.z.
    pub version: [u8; 3],
    /// Offsets of the elements the profile applies to.
    pub elem_offsets: Vec<u8>,
    /// Additional profile data.
    pub data: Bytes,
}

impl Comp2Record {
    /// `id(2) | x | y | z | n | offsets(n) | len(2) | data`
    pub fn encoded_len(&self) -> usize {
        2 + 3 + 1 + self.elem_offsets.len() + 2 + self.data.len()
    }

    /// Check that the offset count and data length fit their fields.
    pub fn validate(&self) -> Result<()> {
        if self.elem_offsets.len() > u8::MAX as usize {
            return Err(NodeError::InvalidComposition(format!(
                "profile 0x{:04x} lists {} element offsets",
                self.id,
                self.elem_offsets.len()
            )));
        }
        if self.data.len() > u16::MAX as usize {
            return Err(NodeError::InvalidComposition(format!(
                "profile 0x{:04x} carries {} bytes of data",
                self.id,
                self.data.len()
            )));
        }
        Ok(())
    }
}

fn validate_metadata(elem_idx: usize, model: &Model) -> Result<()> {
    let Some(entries) = &model.metadata else {
        return Ok(());
    };
    if entries.len() > u8::MAX as usize {
        return Err(NodeError::InvalidComposition(format!(
            "model {} in element {elem_idx} has {} metadata entries",
            model.id,
            entries.len()
        )));
    }
    if let Some(entry) = entries.iter().find(|e| e.data.len() > u16::MAX as usize) {
        return Err(NodeError::InvalidComposition(format!(
            "metadata 0x{:04x} of model {} is {} bytes",
            entry.id,
            model.id,
            entry.data.len()
        )));
    }
    Ok(())
}

/// Composition Data Page 2 content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Comp2 {
    pub records: Vec<Comp2Record>,
}
