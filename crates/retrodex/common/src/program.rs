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

//! Input program: classes to rewrite plus the classes they are resolved against

use crate::class::ClassDef;
use crate::error::{ModelError, ModelResult};
use crate::types::TypeRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a class definition comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClassOrigin {
    /// Rewritten and emitted
    Program,
    /// Visible for resolution only; emitted by another compilation unit
    Classpath,
    /// Provided by the platform at runtime
    Library,
}

/// A set of classes split by origin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    program: BTreeMap<TypeRef, ClassDef>,
    classpath: BTreeMap<TypeRef, ClassDef>,
    library: BTreeMap<TypeRef, ClassDef>,
}

impl Program {
    /// Create an empty program
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a program from class lists
    pub fn from_parts(program: Vec<ClassDef>, classpath: Vec<ClassDef>, library: Vec<ClassDef>) -> ModelResult<Self> {
        let mut result = Self::new();
        for class in program {
            result.add_program_class(class)?;
        }
        for class in classpath {
            result.add_classpath_class(class)?;
        }
        for class in library {
            result.add_library_class(class)?;
        }
        Ok(result)
    }

    pub fn add_program_class(&mut self, class: ClassDef) -> ModelResult<()> {
        Self::insert(&mut self.program, class)
    }

    pub fn add_classpath_class(&mut self, class: ClassDef) -> ModelResult<()> {
        Self::insert(&mut self.classpath, class)
    }

    pub fn add_library_class(&mut self, class: ClassDef) -> ModelResult<()> {
        Self::insert(&mut self.library, class)
    }

    fn insert(map: &mut BTreeMap<TypeRef, ClassDef>, class: ClassDef) -> ModelResult<()> {
        if map.contains_key(&class.name) {
            return Err(ModelError::DuplicateClass(class.name.to_string()));
        }
        map.insert(class.name.clone(), class);
        Ok(())
    }

    /// Program classes in name order
    pub fn program_classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.program.values()
    }

    pub fn classpath_classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.classpath.values()
    }

    pub fn library_classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.library.values()
    }

    pub fn program_class(&self, name: &TypeRef) -> Option<&ClassDef> {
        self.program.get(name)
    }

    pub fn library_class(&self, name: &TypeRef) -> Option<&ClassDef> {
        self.library.get(name)
    }

    /// Resolve a class, preferring program over classpath over library definitions
    pub fn lookup(&self, name: &TypeRef) -> Option<(&ClassDef, ClassOrigin)> {
        self.program
            .get(name)
            .map(|class| (class, ClassOrigin::Program))
            .or_else(|| self.classpath.get(name).map(|class| (class, ClassOrigin::Classpath)))
            .or_else(|| self.library.get(name).map(|class| (class, ClassOrigin::Library)))
    }

    /// Number of program classes
    pub fn len(&self) -> usize {
        self.program.len()
    }

    pub fn is_empty(&self) -> bool {
        self.program.is_empty()
    }

    /// Split the program classes in two units; each unit sees the other half on its classpath
    pub fn split<F>(&self, in_first: F) -> (Program, Program)
    where
        F: Fn(&TypeRef) -> bool,
    {
        let mut first = Program {
            program: BTreeMap::new(),
            classpath: self.classpath.clone(),
            library: self.library.clone(),
        };
        let mut second = first.clone();
        for (name, class) in &self.program {
            if in_first(name) {
                first.program.insert(name.clone(), class.clone());
                second.classpath.insert(name.clone(), class.clone());
            } else {
                second.program.insert(name.clone(), class.clone());
                first.classpath.insert(name.clone(), class.clone());
            }
        }
        (first, second)
    }

    /// Consume the program, returning its program classes
    pub fn into_program_classes(self) -> BTreeMap<TypeRef, ClassDef> {
        self.program
    }

    /// Replace the program classes, keeping classpath and library
    pub fn with_program_classes(&self, classes: impl IntoIterator<Item = ClassDef>) -> ModelResult<Self> {
        let mut result = Program {
            program: BTreeMap::new(),
            classpath: self.classpath.clone(),
            library: self.library.clone(),
        };
        for class in classes {
            result.add_program_class(class)?;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_precedence() {
        let program = Program::from_parts(
            vec![ClassDef::class("a/Shadow")],
            vec![ClassDef::class("a/Other")],
            vec![ClassDef::class("a/Shadow").with_super("lib/Base"), ClassDef::class("lib/Base")],
        )
        .unwrap();

        let (shadow, origin) = program.lookup(&TypeRef::new("a/Shadow")).unwrap();
        assert_eq!(origin, ClassOrigin::Program);
        assert_eq!(shadow.super_class, Some(TypeRef::object()));
        assert_eq!(program.lookup(&TypeRef::new("a/Other")).unwrap().1, ClassOrigin::Classpath);
        assert_eq!(program.lookup(&TypeRef::new("lib/Base")).unwrap().1, ClassOrigin::Library);
        assert!(program.lookup(&TypeRef::new("a/Missing")).is_none());
    }

    #[test]
    fn test_duplicate_program_class() {
        let mut program = Program::new();
        program.add_program_class(ClassDef::class("a/A")).unwrap();
        assert_eq!(program.add_program_class(ClassDef::class("a/A")), Err(ModelError::DuplicateClass("a/A".to_string())));
    }

    #[test]
    fn test_split_moves_other_half_to_classpath() {
        let program = Program::from_parts(vec![ClassDef::class("a/A"), ClassDef::class("b/B")], vec![], vec![]).unwrap();
        let (first, second) = program.split(|name| name.as_str().starts_with("a/"));
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first.lookup(&TypeRef::new("b/B")).unwrap().1, ClassOrigin::Classpath);
        assert_eq!(second.lookup(&TypeRef::new("a/A")).unwrap().1, ClassOrigin::Classpath);
    }

    #[test]
    fn test_program_serializes() {
        let program = Program::from_parts(vec![ClassDef::interface("a/I")], vec![], vec![]).unwrap();
        let json = serde_json::to_string(&program).unwrap();
        let back: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(back, program);
    }
}
