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

//! Class, method and field definitions

use crate::code::Code;
use crate::error::{ModelError, ModelResult};
use crate::flags::AccessFlags;
use crate::types::{FieldRef, MemberKey, MethodProto, MethodRef, TypeRef, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Field definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: Arc<str>,
    pub ty: ValueType,
    pub flags: AccessFlags,
}

impl FieldDef {
    /// Create a field definition
    pub fn new(name: impl AsRef<str>, ty: ValueType, flags: AccessFlags) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            ty,
            flags,
        }
    }

    pub fn key(&self) -> MemberKey {
        MemberKey::new(&*self.name, self.ty.descriptor())
    }

    /// Reference to this field as declared by `owner`
    pub fn reference(&self, owner: &TypeRef) -> FieldRef {
        FieldRef::new(owner.clone(), &*self.name, self.ty.clone())
    }
}

/// Method definition, with a body unless abstract or native
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: Arc<str>,
    pub proto: MethodProto,
    pub flags: AccessFlags,
    pub code: Option<Code>,
}

impl MethodDef {
    /// Create a method with a body
    pub fn new(name: impl AsRef<str>, proto: MethodProto, flags: AccessFlags, code: Code) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            proto,
            flags,
            code: Some(code),
        }
    }

    /// Create an abstract method
    pub fn new_abstract(name: impl AsRef<str>, proto: MethodProto, flags: AccessFlags) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            proto,
            flags: flags | AccessFlags::ABSTRACT,
            code: None,
        }
    }

    pub fn key(&self) -> MemberKey {
        MemberKey::new(&*self.name, self.proto.descriptor())
    }

    /// Reference to this method as declared by `owner`
    pub fn reference(&self, owner: &TypeRef) -> MethodRef {
        MethodRef::new(owner.clone(), &*self.name, self.proto.clone())
    }

    pub fn is_static(&self) -> bool {
        self.flags.is_static()
    }

    pub fn is_private(&self) -> bool {
        self.flags.is_private()
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.is_abstract() || self.code.is_none() && !self.flags.contains(AccessFlags::NATIVE)
    }

    pub fn is_constructor(&self) -> bool {
        &*self.name == "<init>"
    }

    pub fn is_class_initializer(&self) -> bool {
        &*self.name == "<clinit>"
    }

    /// Virtual instance method: not static, not private, not an initializer
    pub fn is_virtual(&self) -> bool {
        !self.is_static() && !self.is_private() && !self.is_constructor() && !self.is_class_initializer()
    }

    /// Whether name and prototype match
    pub fn matches(&self, name: &str, proto: &MethodProto) -> bool {
        &*self.name == name && &self.proto == proto
    }
}

/// Class or interface definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: TypeRef,
    pub flags: AccessFlags,
    pub super_class: Option<TypeRef>,
    pub interfaces: Vec<TypeRef>,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
    /// Nest host declared by a nest member
    pub nest_host: Option<TypeRef>,
    /// Nest members declared by a nest host
    pub nest_members: Vec<TypeRef>,
    pub source_file: Option<Arc<str>>,
}

impl ClassDef {
    /// A public class extending `java/lang/Object`
    pub fn class(name: impl AsRef<str>) -> Self {
        Self {
            name: TypeRef::new(name),
            flags: AccessFlags::PUBLIC,
            super_class: Some(TypeRef::object()),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            nest_host: None,
            nest_members: Vec::new(),
            source_file: None,
        }
    }

    /// A public interface
    pub fn interface(name: impl AsRef<str>) -> Self {
        Self {
            flags: AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT,
            ..Self::class(name)
        }
    }

    pub fn with_flags(mut self, flags: AccessFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_super(mut self, super_class: impl AsRef<str>) -> Self {
        self.super_class = Some(TypeRef::new(super_class));
        self
    }

    pub fn implementing(mut self, interface: impl AsRef<str>) -> Self {
        self.interfaces.push(TypeRef::new(interface));
        self
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    pub fn with_nest_host(mut self, host: impl AsRef<str>) -> Self {
        self.nest_host = Some(TypeRef::new(host));
        self
    }

    pub fn with_nest_member(mut self, member: impl AsRef<str>) -> Self {
        self.nest_members.push(TypeRef::new(member));
        self
    }

    pub fn with_source_file(mut self, file: impl AsRef<str>) -> Self {
        self.source_file = Some(Arc::from(file.as_ref()));
        self
    }

    pub fn is_interface(&self) -> bool {
        self.flags.is_interface()
    }

    /// Host of the nest this class belongs to; a class without nest attributes hosts itself
    pub fn nest_host_or_self(&self) -> &TypeRef {
        self.nest_host.as_ref().unwrap_or(&self.name)
    }

    /// Method declared with the given name and prototype
    pub fn method(&self, name: &str, proto: &MethodProto) -> Option<&MethodDef> {
        self.methods.iter().find(|method| method.matches(name, proto))
    }

    pub fn method_mut(&mut self, name: &str, proto: &MethodProto) -> Option<&mut MethodDef> {
        self.methods.iter_mut().find(|method| method.matches(name, proto))
    }

    /// Field declared with the given name and type
    pub fn field(&self, name: &str, ty: &ValueType) -> Option<&FieldDef> {
        self.fields.iter().find(|field| &*field.name == name && &field.ty == ty)
    }

    /// Add a method unless one with the same name and prototype exists
    pub fn add_method(&mut self, method: MethodDef) -> ModelResult<()> {
        if self.method(&method.name, &method.proto).is_some() {
            return Err(ModelError::DuplicateMember {
                class: self.name.to_string(),
                member: method.key().to_string(),
            });
        }
        self.methods.push(method);
        Ok(())
    }

    /// Check member uniqueness and method bodies
    pub fn validate(&self) -> ModelResult<()> {
        let mut seen = HashSet::new();
        for method in &self.methods {
            if !seen.insert(method.key()) {
                return Err(ModelError::DuplicateMember {
                    class: self.name.to_string(),
                    member: method.key().to_string(),
                });
            }
            if let Some(code) = &method.code {
                code.validate(&method.reference(&self.name).to_string())?;
            }
        }
        let mut fields = HashSet::new();
        for field in &self.fields {
            if !fields.insert(field.key()) {
                return Err(ModelError::DuplicateMember {
                    class: self.name.to_string(),
                    member: field.key().to_string(),
                });
            }
        }
        Ok(())
    }
}
