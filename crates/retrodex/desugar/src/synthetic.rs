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

//! Shared tables of synthesized classes and members
//!
//! Workers only ever insert into these tables, and every insertion is
//! insert-if-absent: the first writer wins and later writers observe the
//! winning entry.

use crate::error::{DesugarError, DesugarResult};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use retrodex_common::{AccessFlags, ClassDef, MemberKey, MethodDef, TypeRef};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Companion class of one interface, filled as its methods are relocated
#[derive(Debug)]
pub struct CompanionClass {
    pub interface: TypeRef,
    pub name: TypeRef,
    source_file: Option<Arc<str>>,
    methods: Mutex<BTreeMap<MemberKey, MethodDef>>,
}

impl CompanionClass {
    fn new(interface: TypeRef, name: TypeRef, source_file: Option<Arc<str>>) -> Self {
        Self {
            interface,
            name,
            source_file,
            methods: Mutex::new(BTreeMap::new()),
        }
    }

    /// Add a relocated method unless one with the same signature is present
    pub fn add_method(&self, method: MethodDef) -> bool {
        let mut methods = self.methods.lock();
        let key = method.key();
        if methods.contains_key(&key) {
            return false;
        }
        methods.insert(key, method);
        true
    }

    pub fn method_count(&self) -> usize {
        self.methods.lock().len()
    }

    /// Class definition with methods in signature order
    pub fn to_class_def(&self) -> ClassDef {
        let mut class = ClassDef::class(self.name.as_str()).with_flags(AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::SYNTHETIC);
        class.source_file = self.source_file.clone();
        class.methods = self.methods.lock().values().cloned().collect();
        class
    }
}

/// Synthesized items collected during a run
#[derive(Debug, Default)]
pub struct SyntheticItems {
    classes: DashMap<TypeRef, ClassDef>,
    companions: DashMap<TypeRef, Arc<CompanionClass>>,
    bridges: DashMap<(TypeRef, MemberKey), MethodDef>,
    nest_members: DashMap<TypeRef, BTreeSet<TypeRef>>,
}

/// Synthesized classes and the bridges and nest members to attach to existing hosts
#[derive(Debug, Default)]
pub struct SyntheticOutput {
    pub classes: Vec<ClassDef>,
    pub bridges: BTreeMap<TypeRef, Vec<MethodDef>>,
    pub nest_members: BTreeMap<TypeRef, BTreeSet<TypeRef>>,
}

impl SyntheticItems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Companion of `interface`, created on first request
    ///
    /// Returns the companion and whether this call created it.
    pub fn companion(&self, interface: &TypeRef, name: TypeRef, source_file: Option<Arc<str>>) -> (Arc<CompanionClass>, bool) {
        if let Some(existing) = self.companions.get(interface) {
            return (Arc::clone(&existing), false);
        }
        match self.companions.entry(interface.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                debug!(interface = %interface, companion = %name, "created companion class");
                let companion = Arc::new(CompanionClass::new(interface.clone(), name, source_file));
                entry.insert(Arc::clone(&companion));
                (companion, true)
            }
        }
    }

    pub fn companion_count(&self) -> usize {
        self.companions.len()
    }

    /// Insert a synthesized class unless present
    ///
    /// Returns whether the class was inserted. A different class under the same
    /// name is an internal error since names derive from their contexts.
    pub fn add_class(&self, class: ClassDef) -> DesugarResult<bool> {
        match self.classes.entry(class.name.clone()) {
            Entry::Occupied(entry) if entry.get() != &class => Err(DesugarError::internal_error(format!(
                "conflicting definitions synthesized for {}",
                class.name
            ))),
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                debug!(class = %class.name, "synthesized class");
                entry.insert(class);
                Ok(true)
            }
        }
    }

    pub fn contains_class(&self, name: &TypeRef) -> bool {
        self.classes.contains_key(name)
    }

    /// Record a bridge on `host` unless an identical signature is recorded
    pub fn add_bridge(&self, host: &TypeRef, method: MethodDef) -> bool {
        match self.bridges.entry((host.clone(), method.key())) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                debug!(host = %host, bridge = %method.name, "synthesized nest bridge");
                entry.insert(method);
                true
            }
        }
    }

    /// Record `member` as a nest member of `host`, a class other than the one being processed
    pub fn add_nest_member(&self, host: &TypeRef, member: TypeRef) -> bool {
        let inserted = self.nest_members.entry(host.clone()).or_default().insert(member.clone());
        if inserted {
            debug!(host = %host, member = %member, "joined synthesized class to nest");
        }
        inserted
    }

    /// Consume the tables into deterministic, name-ordered output
    pub fn into_output(self) -> SyntheticOutput {
        let mut classes: Vec<ClassDef> = self.classes.into_iter().map(|(_, class)| class).collect();
        classes.extend(self.companions.into_iter().map(|(_, companion)| companion.to_class_def()));
        classes.sort_by(|a, b| a.name.cmp(&b.name));

        let mut bridges: BTreeMap<TypeRef, BTreeMap<MemberKey, MethodDef>> = BTreeMap::new();
        for ((host, key), method) in self.bridges {
            bridges.entry(host).or_default().insert(key, method);
        }
        SyntheticOutput {
            classes,
            bridges: bridges.into_iter().map(|(host, methods)| (host, methods.into_values().collect())).collect(),
            nest_members: self.nest_members.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrodex_common::{CodeBuilder, MethodProto};
    use std::thread;

    fn static_method(name: &str) -> MethodDef {
        let mut builder = CodeBuilder::new(0);
        builder.ret(None);
        MethodDef::new(name, MethodProto::void(), AccessFlags::PUBLIC | AccessFlags::STATIC, builder.build())
    }

    #[test]
    fn test_companion_created_once_concurrently() {
        let items = Arc::new(SyntheticItems::new());
        let interface = TypeRef::new("a/I");
        let handles: Vec<_> = (0..8)
            .map(|index| {
                let items = Arc::clone(&items);
                let interface = interface.clone();
                thread::spawn(move || {
                    let (companion, created) = items.companion(&interface, TypeRef::new("a/I$-CC"), None);
                    companion.add_method(static_method(&format!("m{}", index % 2)));
                    usize::from(created)
                })
            })
            .collect();
        let created: usize = handles.into_iter().map(|handle| handle.join().unwrap()).sum();
        assert_eq!(created, 1);
        assert_eq!(items.companion_count(), 1);

        let output = Arc::try_unwrap(items).unwrap().into_output();
        assert_eq!(output.classes.len(), 1);
        assert_eq!(output.classes[0].methods.len(), 2);
        assert_eq!(&*output.classes[0].methods[0].name, "m0");
    }

    #[test]
    fn test_identical_classes_deduplicated() {
        let items = SyntheticItems::new();
        let class = ClassDef::class("a/Util").with_method(static_method("run"));
        assert!(items.add_class(class.clone()).unwrap());
        assert!(!items.add_class(class.clone()).unwrap());
        let different = class.with_method(static_method("other"));
        assert!(items.add_class(different).is_err());
    }

    #[test]
    fn test_bridges_grouped_by_host() {
        let items = SyntheticItems::new();
        let host = TypeRef::new("a/Outer");
        assert!(items.add_bridge(&host, static_method("-$$Nest$smb")));
        assert!(items.add_bridge(&host, static_method("-$$Nest$sma")));
        assert!(!items.add_bridge(&host, static_method("-$$Nest$sma")));
        let output = items.into_output();
        let names: Vec<&str> = output.bridges[&host].iter().map(|m| &*m.name).collect();
        assert_eq!(names, vec!["-$$Nest$sma", "-$$Nest$smb"]);
    }
}
