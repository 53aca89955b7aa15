// Retrodex
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Result of a desugaring run
//!
//! A [`DesugaredProgram`] holds the rewritten program classes together with
//! every synthesized class. Bridges and nest members whose host lives outside
//! the unit are kept as deferred until the unit is merged with the one
//! defining the host.

use crate::diagnostics::DesugarDiagnostic;
use crate::error::{DesugarError, DesugarResult};
use crate::metrics::DesugarMetrics;
use crate::naming::SyntheticNameTable;
use crate::passes::nest::is_nest_bridge;
use retrodex_common::{ClassDef, MemberKey, MethodDef, Program, TypeRef};
use std::collections::{BTreeMap, BTreeSet};
use std::collections::btree_map::Entry;
use tracing::debug;

/// Desugared classes of one compilation unit
#[derive(Debug, Clone)]
pub struct DesugaredProgram {
    classes: BTreeMap<TypeRef, ClassDef>,
    deferred_members: BTreeMap<TypeRef, BTreeMap<MemberKey, MethodDef>>,
    deferred_nest_members: BTreeMap<TypeRef, BTreeSet<TypeRef>>,
    diagnostics: Vec<DesugarDiagnostic>,
    synthetic_names: SyntheticNameTable,
    metrics: DesugarMetrics,
}

impl DesugaredProgram {
    pub(crate) fn new(
        classes: BTreeMap<TypeRef, ClassDef>,
        deferred_members: BTreeMap<TypeRef, BTreeMap<MemberKey, MethodDef>>,
        deferred_nest_members: BTreeMap<TypeRef, BTreeSet<TypeRef>>,
        diagnostics: Vec<DesugarDiagnostic>,
        synthetic_names: SyntheticNameTable,
        metrics: DesugarMetrics,
    ) -> Self {
        Self {
            classes,
            deferred_members,
            deferred_nest_members,
            diagnostics,
            synthetic_names,
            metrics,
        }
    }

    /// Output classes, program and synthesized, by name
    pub fn classes(&self) -> &BTreeMap<TypeRef, ClassDef> {
        &self.classes
    }

    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.classes.get(&TypeRef::new(name))
    }

    pub fn into_classes(self) -> BTreeMap<TypeRef, ClassDef> {
        self.classes
    }

    /// Bridges waiting for a host defined by another unit
    pub fn deferred_members(&self) -> &BTreeMap<TypeRef, BTreeMap<MemberKey, MethodDef>> {
        &self.deferred_members
    }

    /// Synthesized nest members waiting for a nest host defined by another unit
    pub fn deferred_nest_members(&self) -> &BTreeMap<TypeRef, BTreeSet<TypeRef>> {
        &self.deferred_nest_members
    }

    /// Diagnostics in deterministic order
    pub fn diagnostics(&self) -> &[DesugarDiagnostic] {
        &self.diagnostics
    }

    pub fn synthetic_names(&self) -> &SyntheticNameTable {
        &self.synthetic_names
    }

    pub fn metrics(&self) -> &DesugarMetrics {
        &self.metrics
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Combine the outputs of two units desugared against each other
    ///
    /// Classes defined by both units must be identical. Deferred bridges and
    /// nest members are attached to hosts the combined output defines.
    pub fn merge(mut self, other: DesugaredProgram) -> DesugarResult<DesugaredProgram> {
        for (name, class) in other.classes {
            match self.classes.entry(name) {
                Entry::Vacant(entry) => {
                    entry.insert(class);
                }
                Entry::Occupied(entry) if entry.get() == &class => {}
                Entry::Occupied(entry) => {
                    return Err(DesugarError::merge_conflict(entry.key(), "both units define the class differently"));
                }
            }
        }

        let mut pending = std::mem::take(&mut self.deferred_members);
        for (host, members) in other.deferred_members {
            let slot = pending.entry(host.clone()).or_default();
            for (key, method) in members {
                match slot.entry(key) {
                    Entry::Vacant(entry) => {
                        entry.insert(method);
                    }
                    Entry::Occupied(entry) if entry.get() == &method => {}
                    Entry::Occupied(entry) => {
                        return Err(DesugarError::merge_conflict(
                            format!("{}.{}", host, entry.key()),
                            "both units bridge the member differently",
                        ));
                    }
                }
            }
        }
        for (host, members) in pending {
            match self.classes.get_mut(&host) {
                Some(class) => {
                    debug!(host = %host, bridges = members.len(), "attached deferred bridges");
                    attach_bridges(class, members.into_values())?;
                }
                None => {
                    self.deferred_members.insert(host, members);
                }
            }
        }

        let mut pending = std::mem::take(&mut self.deferred_nest_members);
        for (host, members) in other.deferred_nest_members {
            pending.entry(host).or_default().extend(members);
        }
        for (host, members) in pending {
            match self.classes.get_mut(&host) {
                Some(class) => attach_nest_members(class, members),
                None => {
                    self.deferred_nest_members.insert(host, members);
                }
            }
        }

        self.diagnostics.extend(other.diagnostics);
        self.diagnostics.sort();
        self.diagnostics.dedup();
        self.synthetic_names.merge(&other.synthetic_names)?;
        self.metrics.absorb(&other.metrics);
        Ok(self)
    }

    /// Program with the desugared classes in place of the program classes of `base`
    pub fn into_program(self, base: &Program) -> DesugarResult<Program> {
        if let Some((host, members)) = self.deferred_members.iter().next() {
            return Err(DesugarError::merge_conflict(
                host,
                format!("{} bridge(s) still wait for their host; merge with the unit defining it", members.len()),
            ));
        }
        if let Some((host, members)) = self.deferred_nest_members.iter().next() {
            return Err(DesugarError::merge_conflict(
                host,
                format!("{} nest member(s) still wait for their nest host; merge with the unit defining it", members.len()),
            ));
        }
        Ok(base.with_program_classes(self.classes.into_values())?)
    }
}

/// Add bridges to `class`, keeping all nest bridges as a suffix in signature order
pub(crate) fn attach_bridges(class: &mut ClassDef, bridges: impl IntoIterator<Item = MethodDef>) -> DesugarResult<()> {
    for bridge in bridges {
        match class.methods.iter().find(|method| method.matches(&bridge.name, &bridge.proto)) {
            Some(existing) if existing == &bridge => {}
            Some(_) => {
                return Err(DesugarError::merge_conflict(
                    format!("{}.{}", class.name, bridge.key()),
                    "bridge clashes with an existing member",
                ));
            }
            None => class.methods.push(bridge),
        }
    }
    let (mut bridges, methods): (Vec<MethodDef>, Vec<MethodDef>) = std::mem::take(&mut class.methods).into_iter().partition(is_nest_bridge);
    bridges.sort_by_key(MethodDef::key);
    class.methods = methods;
    class.methods.extend(bridges);
    Ok(())
}

/// Add nest members to `class`, skipping ones it already lists
pub(crate) fn attach_nest_members(class: &mut ClassDef, members: impl IntoIterator<Item = TypeRef>) {
    for member in members {
        if !class.nest_members.contains(&member) {
            class.nest_members.push(member);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::DesugarMetrics;
    use retrodex_common::{AccessFlags, CodeBuilder, MethodProto, ValueKind, ValueType};

    fn bridge(name: &str) -> MethodDef {
        let proto = MethodProto::new(vec![ValueType::object("Host")], Some(ValueType::Int));
        let mut body = CodeBuilder::for_method(&proto, true);
        body.const_int(0).ret(Some(ValueKind::Int));
        MethodDef::new(name, proto, AccessFlags::STATIC | AccessFlags::SYNTHETIC, body.build())
    }

    fn unit(classes: Vec<ClassDef>, deferred: Vec<(&str, MethodDef)>) -> DesugaredProgram {
        let mut members: BTreeMap<TypeRef, BTreeMap<MemberKey, MethodDef>> = BTreeMap::new();
        for (host, method) in deferred {
            members.entry(TypeRef::new(host)).or_default().insert(method.key(), method);
        }
        DesugaredProgram::new(
            classes.into_iter().map(|class| (class.name.clone(), class)).collect(),
            members,
            BTreeMap::new(),
            Vec::new(),
            SyntheticNameTable::default(),
            DesugarMetrics::default(),
        )
    }

    #[test]
    fn test_merge_attaches_deferred_bridges() {
        let host = ClassDef::class("Host").with_method(bridge("-$$Nest$mb"));
        let first = unit(vec![host], Vec::new());
        let second = unit(vec![ClassDef::class("Other")], vec![("Host", bridge("-$$Nest$ma"))]);

        let merged = first.merge(second).unwrap();
        assert!(merged.deferred_members().is_empty());
        let names: Vec<&str> = merged.class("Host").unwrap().methods.iter().map(|m| &*m.name).collect();
        assert_eq!(names, vec!["-$$Nest$ma", "-$$Nest$mb"]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_keeps_unresolved_deferred() {
        let first = unit(Vec::new(), vec![("Elsewhere", bridge("-$$Nest$ma"))]);
        let merged = first.merge(unit(Vec::new(), Vec::new())).unwrap();
        assert_eq!(merged.deferred_members().len(), 1);
        assert!(merged.into_program(&Program::new()).is_err());
    }

    #[test]
    fn test_merge_attaches_deferred_nest_members() {
        let mut lambda_unit = unit(vec![ClassDef::class("Outer$$ExternalSyntheticLambda$0").with_nest_host("Outer")], Vec::new());
        lambda_unit
            .deferred_nest_members
            .entry(TypeRef::new("Outer"))
            .or_default()
            .insert(TypeRef::new("Outer$$ExternalSyntheticLambda$0"));
        assert!(lambda_unit.clone().into_program(&Program::new()).is_err());

        let host_unit = unit(vec![ClassDef::class("Outer").with_nest_member("Outer$Inner")], Vec::new());
        let merged = host_unit.merge(lambda_unit).unwrap();
        assert!(merged.deferred_nest_members().is_empty());
        assert_eq!(
            merged.class("Outer").unwrap().nest_members,
            vec![TypeRef::new("Outer$Inner"), TypeRef::new("Outer$$ExternalSyntheticLambda$0")]
        );
    }

    #[test]
    fn test_merge_conflicting_classes() {
        let first = unit(vec![ClassDef::class("Shared")], Vec::new());
        let second = unit(vec![ClassDef::class("Shared").with_flags(AccessFlags::FINAL)], Vec::new());
        assert!(matches!(first.merge(second), Err(DesugarError::MergeConflict { .. })));
    }

    #[test]
    fn test_merge_identical_classes() {
        let first = unit(vec![ClassDef::class("Shared")], Vec::new());
        let second = unit(vec![ClassDef::class("Shared")], Vec::new());
        assert_eq!(first.merge(second).unwrap().len(), 1);
    }
}
