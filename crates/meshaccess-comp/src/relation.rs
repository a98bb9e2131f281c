use crate::error::{CompError, Result};

/// Wire value of the relation type byte for extensions.
pub const RELATION_TYPE_EXT: u8 = 0xFF;

/// What a relation describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// The extension model extends the base model.
    Extension,
    /// Both models belong to the correspondence group with this id.
    Correspondence(u8),
}

impl RelationKind {
    pub fn wire(self) -> u8 {
        match self {
            RelationKind::Extension => RELATION_TYPE_EXT,
            RelationKind::Correspondence(id) => id,
        }
    }

    pub fn from_wire(value: u8) -> Self {
        match value {
            RELATION_TYPE_EXT => RelationKind::Extension,
            id => RelationKind::Correspondence(id),
        }
    }
}

/// A base/extension model pair. Model indices are composition indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Relation {
    pub elem_base: u8,
    pub idx_base: u8,
    pub elem_ext: u8,
    pub idx_ext: u8,
    pub kind: RelationKind,
}

impl Relation {
    pub fn is_base(&self, elem: u8, idx: u8) -> bool {
        self.elem_base == elem && self.idx_base == idx
    }

    pub fn is_ext(&self, elem: u8, idx: u8) -> bool {
        self.elem_ext == elem && self.idx_ext == idx
    }

    pub fn touches(&self, elem: u8, idx: u8) -> bool {
        self.is_base(elem, idx) || self.is_ext(elem, idx)
    }

    pub fn correspondence_id(&self) -> Option<u8> {
        match self.kind {
            RelationKind::Correspondence(id) => Some(id),
            RelationKind::Extension => None,
        }
    }
}

/// Fixed-capacity relation table.
///
/// Slots are explicit options, so a relation between the first models of
/// element 0 is stored like any other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationTable {
    slots: Vec<Option<Relation>>,
}

impl RelationTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a relation in the first free slot. Identical relations are
    /// stored once.
    pub fn insert(&mut self, relation: Relation) -> Result<()> {
        if self.iter().any(|r| *r == relation) {
            return Ok(());
        }
        let capacity = self.capacity();
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(CompError::RelationTableFull { capacity })?;
        *slot = Some(relation);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    /// Stored relations in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Relation> + '_ {
        self.slots.iter().flatten()
    }

    /// Extension relations in which the given model is the extending one.
    pub fn extensions_of(&self, elem: u8, idx: u8) -> impl Iterator<Item = &Relation> + '_ {
        self.iter()
            .filter(move |r| r.kind == RelationKind::Extension && r.is_ext(elem, idx))
    }

    /// Correspondence group id of a model, from the first relation touching it.
    pub fn correspondence_of(&self, elem: u8, idx: u8) -> Option<u8> {
        self.iter()
            .filter(|r| r.touches(elem, idx))
            .find_map(Relation::correspondence_id)
    }

    /// Highest correspondence id in use.
    pub fn max_correspondence_id(&self) -> Option<u8> {
        self.iter().filter_map(Relation::correspondence_id).max()
    }
}
