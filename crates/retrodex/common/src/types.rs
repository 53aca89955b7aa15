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

//! Type, method and field references in JVM descriptor syntax

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Internal (slash separated) name of a class or interface
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeRef(Arc<str>);

impl TypeRef {
    /// Create a type reference from an internal name such as `java/lang/Object`
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// `java/lang/Object`
    pub fn object() -> Self {
        Self::new("java/lang/Object")
    }

    /// Internal name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name without the package prefix
    pub fn simple_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Package prefix including the trailing slash, empty for the default package
    pub fn package_prefix(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[..=idx],
            None => "",
        }
    }

    /// Derive a new type name by appending `suffix` to this one
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self::new(format!("{}{}", self.0, suffix))
    }

    /// Object value type of this class
    pub fn as_value_type(&self) -> ValueType {
        ValueType::Object(self.clone())
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Computational kind of a value on the operand stack or in a local slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Double,
    Ref,
}

/// Field or parameter type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Object(TypeRef),
    Array(Box<ValueType>),
}

impl ValueType {
    /// Object type for the given internal name
    pub fn object(name: impl AsRef<str>) -> Self {
        Self::Object(TypeRef::new(name))
    }

    /// Stack kind of this type
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Boolean | Self::Byte | Self::Char | Self::Short | Self::Int => ValueKind::Int,
            Self::Long => ValueKind::Long,
            Self::Float => ValueKind::Float,
            Self::Double => ValueKind::Double,
            Self::Object(_) | Self::Array(_) => ValueKind::Ref,
        }
    }

    /// Whether values of this type are references
    pub fn is_reference(&self) -> bool {
        self.kind() == ValueKind::Ref
    }

    /// Class named by this type, if it is an object type
    pub fn class_name(&self) -> Option<&TypeRef> {
        match self {
            Self::Object(name) => Some(name),
            _ => None,
        }
    }

    /// Descriptor string, e.g. `I` or `Ljava/lang/String;`
    pub fn descriptor(&self) -> String {
        let mut out = String::new();
        self.write_descriptor(&mut out);
        out
    }

    fn write_descriptor(&self, out: &mut String) {
        match self {
            Self::Boolean => out.push('Z'),
            Self::Byte => out.push('B'),
            Self::Char => out.push('C'),
            Self::Short => out.push('S'),
            Self::Int => out.push('I'),
            Self::Long => out.push('J'),
            Self::Float => out.push('F'),
            Self::Double => out.push('D'),
            Self::Object(name) => {
                out.push('L');
                out.push_str(name.as_str());
                out.push(';');
            }
            Self::Array(element) => {
                out.push('[');
                element.write_descriptor(out);
            }
        }
    }

    fn parse_prefix<'a>(input: &'a str, whole: &str) -> ModelResult<(ValueType, &'a str)> {
        let mut chars = input.chars();
        let head = chars.next().ok_or_else(|| ModelError::invalid_descriptor(whole, "unexpected end of descriptor"))?;
        let rest = chars.as_str();
        let parsed = match head {
            'Z' => (Self::Boolean, rest),
            'B' => (Self::Byte, rest),
            'C' => (Self::Char, rest),
            'S' => (Self::Short, rest),
            'I' => (Self::Int, rest),
            'J' => (Self::Long, rest),
            'F' => (Self::Float, rest),
            'D' => (Self::Double, rest),
            'L' => {
                let end = rest.find(';').ok_or_else(|| ModelError::invalid_descriptor(whole, "unterminated class name"))?;
                if end == 0 {
                    return Err(ModelError::invalid_descriptor(whole, "empty class name"));
                }
                (Self::Object(TypeRef::new(&rest[..end])), &rest[end + 1..])
            }
            '[' => {
                let (element, rest) = Self::parse_prefix(rest, whole)?;
                (Self::Array(Box::new(element)), rest)
            }
            other => return Err(ModelError::invalid_descriptor(whole, format!("unexpected character '{}'", other))),
        };
        Ok(parsed)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

impl FromStr for ValueType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ty, rest) = Self::parse_prefix(s, s)?;
        if !rest.is_empty() {
            return Err(ModelError::invalid_descriptor(s, "trailing characters"));
        }
        Ok(ty)
    }
}

/// Method prototype: parameter types and optional return type (`None` is void)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodProto {
    pub params: Vec<ValueType>,
    pub ret: Option<ValueType>,
}

impl MethodProto {
    /// Create a prototype
    pub fn new(params: Vec<ValueType>, ret: Option<ValueType>) -> Self {
        Self { params, ret }
    }

    /// `()V`
    pub fn void() -> Self {
        Self::new(Vec::new(), None)
    }

    /// Prototype with `first` inserted as the leading parameter
    pub fn prepend(&self, first: ValueType) -> Self {
        let mut params = Vec::with_capacity(self.params.len() + 1);
        params.push(first);
        params.extend(self.params.iter().cloned());
        Self::new(params, self.ret.clone())
    }

    /// Prototype with `last` appended as the trailing parameter
    pub fn append(&self, last: ValueType) -> Self {
        let mut params = self.params.clone();
        params.push(last);
        Self::new(params, self.ret.clone())
    }

    /// Prototype with a different return type
    pub fn with_return(&self, ret: Option<ValueType>) -> Self {
        Self::new(self.params.clone(), ret)
    }

    /// Stack kind of the return value, `None` for void
    pub fn return_kind(&self) -> Option<ValueKind> {
        self.ret.as_ref().map(ValueType::kind)
    }

    /// Descriptor string, e.g. `(II)I`
    pub fn descriptor(&self) -> String {
        let mut out = String::from("(");
        for param in &self.params {
            param.write_descriptor(&mut out);
        }
        out.push(')');
        match &self.ret {
            Some(ret) => ret.write_descriptor(&mut out),
            None => out.push('V'),
        }
        out
    }
}

impl fmt::Display for MethodProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

impl FromStr for MethodProto {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.strip_prefix('(').ok_or_else(|| ModelError::invalid_descriptor(s, "missing '('"))?;
        let close = body.find(')').ok_or_else(|| ModelError::invalid_descriptor(s, "missing ')'"))?;
        let mut params_src = &body[..close];
        let ret_src = &body[close + 1..];

        let mut params = Vec::new();
        while !params_src.is_empty() {
            let (param, rest) = ValueType::parse_prefix(params_src, s)?;
            params.push(param);
            params_src = rest;
        }

        let ret = match ret_src {
            "V" => None,
            other => Some(other.parse::<ValueType>().map_err(|_| ModelError::invalid_descriptor(s, "invalid return type"))?),
        };
        Ok(Self::new(params, ret))
    }
}

/// Name and descriptor of a member, unique within its holder
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberKey {
    pub name: Arc<str>,
    pub descriptor: Arc<str>,
}

impl MemberKey {
    /// Create a member key
    pub fn new(name: impl AsRef<str>, descriptor: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            descriptor: Arc::from(descriptor.as_ref()),
        }
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.descriptor)
    }
}

/// Symbolic reference to a method
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodRef {
    pub owner: TypeRef,
    pub name: Arc<str>,
    pub proto: MethodProto,
}

impl MethodRef {
    /// Create a method reference
    pub fn new(owner: TypeRef, name: impl AsRef<str>, proto: MethodProto) -> Self {
        Self {
            owner,
            name: Arc::from(name.as_ref()),
            proto,
        }
    }

    /// Parse a reference from owner, name and descriptor strings
    pub fn parse(owner: &str, name: &str, descriptor: &str) -> ModelResult<Self> {
        Ok(Self::new(TypeRef::new(owner), name, descriptor.parse()?))
    }

    /// Name and descriptor of the referenced method
    pub fn key(&self) -> MemberKey {
        MemberKey::new(&*self.name, self.proto.descriptor())
    }

    /// Whether the reference names an instance initializer
    pub fn is_constructor(&self) -> bool {
        &*self.name == "<init>"
    }

    /// Same name and prototype on a different owner
    pub fn with_owner(&self, owner: TypeRef) -> Self {
        Self::new(owner, &*self.name, self.proto.clone())
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.proto)
    }
}

/// Symbolic reference to a field
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: TypeRef,
    pub name: Arc<str>,
    pub ty: ValueType,
}

impl FieldRef {
    /// Create a field reference
    pub fn new(owner: TypeRef, name: impl AsRef<str>, ty: ValueType) -> Self {
        Self {
            owner,
            name: Arc::from(name.as_ref()),
            ty,
        }
    }

    /// Name and descriptor of the referenced field
    pub fn key(&self) -> MemberKey {
        MemberKey::new(&*self.name, self.ty.descriptor())
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.owner, self.name, self.ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_descriptor_parsing() {
        let proto: MethodProto = "(I[JLjava/lang/String;)Ljava/lang/Object;".parse().unwrap();
        assert_eq!(proto.params.len(), 3);
        assert_eq!(proto.params[1], ValueType::Array(Box::new(ValueType::Long)));
        assert_eq!(proto.params[2], ValueType::object("java/lang/String"));
        assert_eq!(proto.ret, Some(ValueType::object("java/lang/Object")));
        assert_eq!(proto.descriptor(), "(I[JLjava/lang/String;)Ljava/lang/Object;");
    }

    #[test]
    fn test_void_descriptor() {
        let proto: MethodProto = "()V".parse().unwrap();
        assert_eq!(proto, MethodProto::void());
        assert_eq!(proto.return_kind(), None);
    }

    #[test]
    fn test_invalid_descriptors() {
        assert!("II)I".parse::<MethodProto>().is_err());
        assert!("(Ljava/lang/String)V".parse::<MethodProto>().is_err());
        assert!("(Q)V".parse::<MethodProto>().is_err());
        assert!("(I)".parse::<MethodProto>().is_err());
        assert!("IJ".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_proto_prepend() {
        let proto: MethodProto = "(I)V".parse().unwrap();
        let with_receiver = proto.prepend(ValueType::object("a/I"));
        assert_eq!(with_receiver.descriptor(), "(La/I;I)V");
    }

    #[test]
    fn test_type_names() {
        let ty = TypeRef::new("com/example/Outer$Inner");
        assert_eq!(ty.simple_name(), "Outer$Inner");
        assert_eq!(ty.package_prefix(), "com/example/");
        assert_eq!(TypeRef::new("Top").package_prefix(), "");
        assert_eq!(ty.with_suffix("$-CC").as_str(), "com/example/Outer$Inner$-CC");
    }

    #[test]
    fn test_value_kinds() {
        assert_eq!(ValueType::Boolean.kind(), ValueKind::Int);
        assert_eq!(ValueType::Long.kind(), ValueKind::Long);
        assert!(ValueType::Array(Box::new(ValueType::Int)).is_reference());
    }
}
