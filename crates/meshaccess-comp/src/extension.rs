//! Model extension groups and the relation table behind Composition Data
//! Page 1.
//!
//! Every model belongs to at most one extension group. A group is an
//! ordered cycle: walking it from any member visits every member exactly
//! once. Models outside any group form a group of their own.

use std::collections::HashMap;

use meshaccess_node::{Composition, LabelUuid, ModelRef};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{CompError, Result};
use crate::relation::{Relation, RelationKind, RelationTable};

/// Visitor verdict for [`ExtensionGraph::walk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Continue,
    Stop,
}

/// Extension graph settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Relation table capacity.
    pub capacity: usize,
    /// Maintain extension groups. When off, every walk visits a single model.
    pub model_extensions: bool,
    /// Composition Data Page 1 is generated, so every extension must be
    /// recorded in the relation table.
    pub page_1: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            model_extensions: true,
            page_1: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtensionGraph {
    config: GraphConfig,
    /// Group cycles; an empty vector is a free slot.
    groups: Vec<Vec<ModelRef>>,
    member_of: HashMap<ModelRef, usize>,
    relations: RelationTable,
}

impl ExtensionGraph {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            groups: Vec::new(),
            member_of: HashMap::new(),
            relations: RelationTable::with_capacity(config.capacity),
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn relations(&self) -> &RelationTable {
        &self.relations
    }

    /// Drop every group and relation.
    pub fn reset(&mut self) {
        self.groups.clear();
        self.member_of.clear();
        self.relations.clear();
    }

    /// The members of `model`'s group, starting with `model`.
    pub fn members(&self, model: ModelRef) -> Vec<ModelRef> {
        if !self.config.model_extensions {
            return vec![model];
        }

        match self.member_of.get(&model) {
            Some(&gid) => rotated(&self.groups[gid], model),
            None => vec![model],
        }
    }

    /// Visit `model`, then the rest of its extension group.
    pub fn walk<F>(&self, model: ModelRef, mut visit: F)
    where
        F: FnMut(ModelRef) -> Walk,
    {
        for m in self.members(model) {
            if visit(m) == Walk::Stop {
                return;
            }
        }
    }

    pub fn same_group(&self, a: ModelRef, b: ModelRef) -> bool {
        a == b
            || matches!(
                (self.member_of.get(&a), self.member_of.get(&b)),
                (Some(ga), Some(gb)) if ga == gb
            )
    }

    /// Record that `ext` extends `base`, merging their groups.
    ///
    /// `base` is marked extended even when `ext == base`.
    pub fn extend(&mut self, comp: &mut Composition, ext: ModelRef, base: ModelRef) -> Result<()> {
        if !self.config.model_extensions {
            return Err(CompError::NotSupported("model extensions"));
        }

        let (elem_ext, idx_ext) = comp_pos(comp, ext)?;
        let (elem_base, idx_base) = comp_pos(comp, base)?;

        if let Some(model) = comp.model_mut(base) {
            model.flags.extended = true;
        }

        if ext == base {
            return Ok(());
        }

        if !self.same_group(ext, base) {
            self.merge(ext, base);
        }

        if self.relations.capacity() == 0 {
            if self.config.page_1 {
                warn!("relation table has no capacity, extension not recorded");
                return Err(CompError::RelationTableFull { capacity: 0 });
            }
            return Ok(());
        }

        self.relations.insert(Relation {
            elem_base,
            idx_base,
            elem_ext,
            idx_ext,
            kind: RelationKind::Extension,
        })?;
        debug!(%ext, %base, "model extension registered");
        Ok(())
    }

    /// Record that `corresponding` corresponds to `base`.
    ///
    /// A correspondence id already used anywhere in the extension groups of
    /// either model is reused; otherwise the next unused id is allocated.
    pub fn correspond(
        &mut self,
        comp: &Composition,
        corresponding: ModelRef,
        base: ModelRef,
    ) -> Result<()> {
        if !self.config.model_extensions {
            return Err(CompError::NotSupported("model extensions"));
        }
        if self.relations.capacity() == 0 {
            return Err(CompError::NotSupported("relation table disabled"));
        }

        let (elem_ext, idx_ext) = comp_pos(comp, corresponding)?;
        let (elem_base, idx_base) = comp_pos(comp, base)?;

        let mut scope = self.members(base);
        scope.extend(self.members(corresponding));
        let scope: Vec<(u8, u8)> = scope
            .into_iter()
            .filter_map(|m| comp_pos(comp, m).ok())
            .collect();

        let existing = self
            .relations
            .iter()
            .filter(|r| scope.iter().any(|&(e, i)| r.touches(e, i)))
            .find_map(Relation::correspondence_id);

        let id = match existing {
            Some(id) => id,
            None => match self.relations.max_correspondence_id() {
                None => 0,
                Some(max) if max < RelationKind::Extension.wire() - 1 => max + 1,
                Some(_) => return Err(CompError::CorrespondenceIdsExhausted),
            },
        };

        self.relations.insert(Relation {
            elem_base,
            idx_base,
            elem_ext,
            idx_ext,
            kind: RelationKind::Correspondence(id),
        })?;
        debug!(%corresponding, %base, id, "model correspondence registered");
        Ok(())
    }

    pub fn is_extended(&self, comp: &Composition, model: ModelRef) -> bool {
        comp.model(model).is_some_and(|m| m.flags.extended)
    }

    /// First model in `model`'s group, on the same element, subscribed to
    /// the group address.
    pub fn find_group(&self, comp: &Composition, model: ModelRef, addr: u16) -> Option<ModelRef> {
        self.find_on_element(model, |m| comp.model(m).is_some_and(|m| m.has_group(addr)))
    }

    /// First model in `model`'s group, on the same element, subscribed to
    /// the virtual label.
    pub fn find_label(
        &self,
        comp: &Composition,
        model: ModelRef,
        uuid: &LabelUuid,
    ) -> Option<ModelRef> {
        self.find_on_element(model, |m| comp.model(m).is_some_and(|m| m.has_label(uuid)))
    }

    fn find_on_element<F>(&self, model: ModelRef, mut pred: F) -> Option<ModelRef>
    where
        F: FnMut(ModelRef) -> bool,
    {
        let mut found = None;
        self.walk(model, |m| {
            if m.elem == model.elem && pred(m) {
                found = Some(m);
                Walk::Stop
            } else {
                Walk::Continue
            }
        });
        found
    }

    /// Join the cycles as `ext, b1..bm, base, a1..ak`.
    fn merge(&mut self, ext: ModelRef, base: ModelRef) {
        let ga = self.member_of.get(&ext).copied();
        let gb = self.member_of.get(&base).copied();

        let a = ga.map_or_else(|| vec![ext], |g| rotated(&self.groups[g], ext));
        let b = gb.map_or_else(|| vec![base], |g| rotated(&self.groups[g], base));

        let mut cycle = Vec::with_capacity(a.len() + b.len());
        cycle.push(ext);
        cycle.extend_from_slice(&b[1..]);
        cycle.push(base);
        cycle.extend_from_slice(&a[1..]);

        for g in [ga, gb].into_iter().flatten() {
            self.groups[g].clear();
        }

        let gid = match ga.or(gb) {
            Some(g) => g,
            None => match self.groups.iter().position(Vec::is_empty) {
                Some(free) => free,
                None => {
                    self.groups.push(Vec::new());
                    self.groups.len() - 1
                }
            },
        };

        for m in &cycle {
            self.member_of.insert(*m, gid);
        }
        self.groups[gid] = cycle;
    }

    #[cfg(test)]
    pub(crate) fn relations_mut(&mut self) -> &mut RelationTable {
        &mut self.relations
    }
}

fn rotated(cycle: &[ModelRef], start: ModelRef) -> Vec<ModelRef> {
    let pos = cycle.iter().position(|m| *m == start).unwrap_or(0);
    cycle[pos..].iter().chain(&cycle[..pos]).copied().collect()
}

fn comp_pos(comp: &Composition, model: ModelRef) -> Result<(u8, u8)> {
    comp.resolve(model)?;
    let idx = comp
        .comp_index(model)
        .ok_or(CompError::InvalidArgument("model outside composition"))?;
    Ok((model.elem, idx))
}
