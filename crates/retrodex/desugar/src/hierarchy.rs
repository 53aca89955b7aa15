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

//! Read-only view of the class hierarchy as seen by the desugarer
//!
//! Program, classpath and library classes are resolved in that order. Emulated
//! interfaces (the `j$` counterparts of library interfaces) have no class
//! definition but are known to be interfaces.

use crate::config::{DesugarConfig, EmulatedInterface};
use retrodex_common::{ApiLevel, ClassDef, ClassOrigin, FieldDef, MethodDef, MethodProto, Program, TypeRef, ValueType};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Hierarchy queries over the input program
#[derive(Debug)]
pub struct AppView<'a> {
    program: &'a Program,
    min_api: ApiLevel,
    by_library: HashMap<TypeRef, &'a EmulatedInterface>,
    by_emulated: HashMap<TypeRef, &'a EmulatedInterface>,
}

impl<'a> AppView<'a> {
    /// Build a view; only emulations needed at the configured level are active
    pub fn new(program: &'a Program, config: &'a DesugarConfig) -> Self {
        let active: Vec<&'a EmulatedInterface> = config
            .emulated_interfaces
            .iter()
            .filter(|interface| interface.is_active(config.min_api))
            .collect();
        Self {
            program,
            min_api: config.min_api,
            by_library: active.iter().map(|interface| (interface.library_interface.clone(), *interface)).collect(),
            by_emulated: active.iter().map(|interface| (interface.emulated_interface.clone(), *interface)).collect(),
        }
    }

    pub fn program(&self) -> &'a Program {
        self.program
    }

    pub fn min_api(&self) -> ApiLevel {
        self.min_api
    }

    /// Definition of a class together with its origin
    pub fn lookup(&self, name: &TypeRef) -> Option<(&'a ClassDef, ClassOrigin)> {
        self.program.lookup(name)
    }

    pub fn definition(&self, name: &TypeRef) -> Option<&'a ClassDef> {
        self.lookup(name).map(|(class, _)| class)
    }

    pub fn origin(&self, name: &TypeRef) -> Option<ClassOrigin> {
        self.lookup(name).map(|(_, origin)| origin)
    }

    /// Whether a type is known
    pub fn is_known(&self, name: &TypeRef) -> bool {
        self.lookup(name).is_some() || self.by_emulated.contains_key(name) || self.by_library.contains_key(name) || *name == TypeRef::object()
    }

    /// Whether a known type is an interface; `None` when the type is missing
    pub fn is_interface(&self, name: &TypeRef) -> Option<bool> {
        if self.by_emulated.contains_key(name) || (self.by_library.contains_key(name) && self.lookup(name).is_none()) {
            return Some(true);
        }
        if *name == TypeRef::object() && self.lookup(name).is_none() {
            return Some(false);
        }
        self.definition(name).map(ClassDef::is_interface)
    }

    /// Active emulation of a library interface
    pub fn emulation_of(&self, library_interface: &TypeRef) -> Option<&'a EmulatedInterface> {
        self.by_library.get(library_interface).copied()
    }

    /// Emulation whose `j$` interface is `name`
    pub fn emulation_named(&self, name: &TypeRef) -> Option<&'a EmulatedInterface> {
        self.by_emulated.get(name).copied()
    }

    /// Active emulations in library-interface order
    pub fn emulations(&self) -> Vec<&'a EmulatedInterface> {
        let mut emulations: Vec<_> = self.by_library.values().copied().collect();
        emulations.sort_by(|a, b| a.library_interface.cmp(&b.library_interface));
        emulations
    }

    /// Nest host of a known class
    pub fn nest_host(&self, name: &TypeRef) -> Option<&'a TypeRef> {
        self.definition(name).map(ClassDef::nest_host_or_self)
    }

    /// Whether both classes belong to the same nest
    pub fn are_nestmates(&self, class: &ClassDef, other: &TypeRef) -> bool {
        &class.name == other || self.nest_host(other) == Some(class.nest_host_or_self())
    }

    /// Method declared directly by `owner`
    pub fn declared_method(&self, owner: &TypeRef, name: &str, proto: &MethodProto) -> Option<(&'a ClassDef, &'a MethodDef)> {
        let class = self.definition(owner)?;
        class.method(name, proto).map(|method| (class, method))
    }

    /// Field declared directly by `owner`
    pub fn declared_field(&self, owner: &TypeRef, name: &str, ty: &ValueType) -> Option<(&'a ClassDef, &'a FieldDef)> {
        let class = self.definition(owner)?;
        class.field(name, ty).map(|field| (class, field))
    }

    /// Superclasses of `class`, nearest first; unresolvable names are added to `missing`
    pub fn superclasses(&self, class: &ClassDef, missing: &mut BTreeSet<TypeRef>) -> Vec<&'a ClassDef> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = class.super_class.clone();
        while let Some(name) = next {
            if !seen.insert(name.clone()) {
                break;
            }
            match self.definition(&name) {
                Some(parent) => {
                    chain.push(parent);
                    next = parent.super_class.clone();
                }
                None => {
                    if name != TypeRef::object() {
                        missing.insert(name);
                    }
                    break;
                }
            }
        }
        chain
    }

    /// All interfaces implemented by `class` and its superclasses, transitively
    ///
    /// Order is breadth first from the class, so direct interfaces come first.
    pub fn interface_closure(&self, class: &ClassDef, missing: &mut BTreeSet<TypeRef>) -> Vec<TypeRef> {
        let mut roots: Vec<TypeRef> = class.interfaces.clone();
        for parent in self.superclasses(class, missing) {
            roots.extend(parent.interfaces.iter().cloned());
        }
        self.expand_interfaces(roots, missing)
    }

    /// Transitive superinterfaces of `interface`, excluding itself
    pub fn superinterfaces(&self, interface: &TypeRef, missing: &mut BTreeSet<TypeRef>) -> Vec<TypeRef> {
        let roots = self.definition(interface).map(|def| def.interfaces.clone()).unwrap_or_default();
        self.expand_interfaces(roots, missing)
    }

    /// `roots` followed by their transitive superinterfaces, breadth first
    pub fn expand_interfaces(&self, roots: Vec<TypeRef>, missing: &mut BTreeSet<TypeRef>) -> Vec<TypeRef> {
        let mut ordered = Vec::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<TypeRef> = roots.into();
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let definition = self.definition(&name);
            if definition.is_none() && (self.by_emulated.contains_key(&name) || self.by_library.contains_key(&name)) {
                ordered.push(name);
                continue;
            }
            match definition {
                Some(def) => {
                    queue.extend(def.interfaces.iter().cloned());
                    ordered.push(name);
                }
                None => {
                    missing.insert(name);
                }
            }
        }
        ordered
    }

    /// Whether `sub` is `sup` or inherits from it
    pub fn is_subtype(&self, sub: &TypeRef, sup: &TypeRef) -> bool {
        if sub == sup || *sup == TypeRef::object() {
            return true;
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([sub.clone()]);
        while let Some(name) = queue.pop_front() {
            if &name == sup {
                return true;
            }
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(def) = self.definition(&name) {
                queue.extend(def.super_class.iter().cloned());
                queue.extend(def.interfaces.iter().cloned());
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmulatedMethod;

    fn program() -> Program {
        Program::from_parts(
            vec![
                ClassDef::interface("a/I"),
                ClassDef::interface("a/J").implementing("a/I"),
                ClassDef::class("a/Base").implementing("a/J"),
                ClassDef::class("a/Sub").with_super("a/Base").implementing("a/Gone"),
                ClassDef::class("a/Outer").with_nest_member("a/Outer$Inner"),
                ClassDef::class("a/Outer$Inner").with_nest_host("a/Outer"),
            ],
            vec![],
            vec![ClassDef::interface("java/util/Map")],
        )
        .unwrap()
    }

    #[test]
    fn test_interface_closure_reports_missing() {
        let program = program();
        let config = DesugarConfig::default();
        let view = AppView::new(&program, &config);
        let mut missing = BTreeSet::new();
        let sub = view.definition(&TypeRef::new("a/Sub")).unwrap();
        let closure = view.interface_closure(sub, &mut missing);
        assert_eq!(closure, vec![TypeRef::new("a/J"), TypeRef::new("a/I")]);
        assert_eq!(missing.into_iter().collect::<Vec<_>>(), vec![TypeRef::new("a/Gone")]);
    }

    #[test]
    fn test_subtyping() {
        let program = program();
        let config = DesugarConfig::default();
        let view = AppView::new(&program, &config);
        assert!(view.is_subtype(&TypeRef::new("a/Sub"), &TypeRef::new("a/I")));
        assert!(view.is_subtype(&TypeRef::new("a/J"), &TypeRef::new("a/I")));
        assert!(!view.is_subtype(&TypeRef::new("a/I"), &TypeRef::new("a/J")));
    }

    #[test]
    fn test_nestmates() {
        let program = program();
        let config = DesugarConfig::default();
        let view = AppView::new(&program, &config);
        let inner = view.definition(&TypeRef::new("a/Outer$Inner")).unwrap();
        assert!(view.are_nestmates(inner, &TypeRef::new("a/Outer")));
        assert!(!view.are_nestmates(inner, &TypeRef::new("a/Base")));
    }

    #[test]
    fn test_emulations_only_when_needed() {
        let program = program();
        let emulation = EmulatedInterface::new("java/util/Map").with_method(EmulatedMethod::new("m", "()V", ApiLevel::N));
        let config = DesugarConfig::for_api(ApiLevel::L).with_emulated_interface(emulation.clone());
        let view = AppView::new(&program, &config);
        assert!(view.emulation_of(&TypeRef::new("java/util/Map")).is_some());
        assert_eq!(view.is_interface(&TypeRef::new("j$/util/Map")), Some(true));

        let config = DesugarConfig::for_api(ApiLevel::N).with_emulated_interface(emulation);
        let view = AppView::new(&program, &config);
        assert!(view.emulation_of(&TypeRef::new("java/util/Map")).is_none());
    }
}
