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

//! Runtime values and the object heap

use crate::errors::{VmError, VmResult};
use retrodex_common::{LambdaCallSite, TypeRef, ValueKind, ValueType};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Value held in a local or on the operand stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Int(i32),
    Long(i64),
    Null,
    /// Index of an object in the heap
    Ref(usize),
}

impl Value {
    /// Default value of a field of type `ty`
    pub fn default_for(ty: &ValueType) -> Self {
        match ty.kind() {
            ValueKind::Long => Self::Long(0),
            ValueKind::Ref => Self::Null,
            ValueKind::Int | ValueKind::Float | ValueKind::Double => Self::Int(0),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Null => "null",
            Self::Ref(_) => "reference",
        }
    }

    pub fn as_int(&self, method: &str) -> VmResult<i32> {
        match self {
            Self::Int(value) => Ok(*value),
            other => Err(mismatch(method, "int", other)),
        }
    }

    pub fn as_long(&self, method: &str) -> VmResult<i64> {
        match self {
            Self::Long(value) => Ok(*value),
            other => Err(mismatch(method, "long", other)),
        }
    }

    /// Heap index of a reference, `None` for null
    pub fn as_object(&self, method: &str) -> VmResult<Option<usize>> {
        match self {
            Self::Ref(index) => Ok(Some(*index)),
            Self::Null => Ok(None),
            other => Err(mismatch(method, "reference", other)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Long(value) => write!(f, "{value}L"),
            Self::Null => write!(f, "null"),
            Self::Ref(index) => write!(f, "@{index}"),
        }
    }
}

fn mismatch(method: &str, expected: &'static str, found: &Value) -> VmError {
    VmError::TypeMismatch {
        method: method.to_string(),
        expected,
        found: found.to_string(),
    }
}

/// Contents of a heap object
#[derive(Debug, Clone)]
pub enum Payload {
    /// Instance of a class defined by the program or library
    Plain { fields: HashMap<Arc<str>, Value> },
    Str(Arc<str>),
    /// Instance created natively by a lambda capture site
    Lambda { site: Box<LambdaCallSite>, captures: Vec<Value> },
    Throwable { message: Option<Arc<str>> },
    /// `java/lang/Class` object
    Class(TypeRef),
    /// `java/util/Optional` instance
    Optional(Option<Value>),
}

/// A heap object
#[derive(Debug, Clone)]
pub struct Object {
    pub class: TypeRef,
    pub payload: Payload,
}

/// Append-only object heap; objects are never collected
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<Object>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object and return a reference to it
    pub fn allocate(&mut self, class: TypeRef, payload: Payload) -> Value {
        self.objects.push(Object { class, payload });
        Value::Ref(self.objects.len() - 1)
    }

    pub fn string(&mut self, text: &str) -> Value {
        self.allocate(TypeRef::new("java/lang/String"), Payload::Str(Arc::from(text)))
    }

    pub fn get(&self, index: usize) -> VmResult<&Object> {
        self.objects
            .get(index)
            .ok_or_else(|| VmError::Unsupported(format!("dangling reference @{index}")))
    }

    pub fn get_mut(&mut self, index: usize) -> VmResult<&mut Object> {
        self.objects
            .get_mut(index)
            .ok_or_else(|| VmError::Unsupported(format!("dangling reference @{index}")))
    }

    /// Text of a string object
    pub fn text(&self, value: Value) -> Option<Arc<str>> {
        match value {
            Value::Ref(index) => match &self.objects.get(index)?.payload {
                Payload::Str(text) => Some(Arc::clone(text)),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_defaults() {
        assert_eq!(Value::default_for(&ValueType::Int), Value::Int(0));
        assert_eq!(Value::default_for(&ValueType::Long), Value::Long(0));
        assert_eq!(Value::default_for(&ValueType::object("A")), Value::Null);
    }

    #[test]
    fn test_heap_strings() {
        let mut heap = Heap::new();
        let value = heap.string("hi");
        assert_eq!(heap.text(value).as_deref(), Some("hi"));
        assert_eq!(heap.text(Value::Null), None);
        assert!(Value::Int(1).as_long("m").is_err());
    }
}
