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

//! Operand Stack Management
//!
//! Each activation owns an operand stack holding intermediate values while a
//! method body executes.

use crate::errors::{VmError, VmResult};
use crate::value::Value;

/// Maximum operand stack depth of a single activation
pub const MAX_STACK_SIZE: usize = 1024;

/// Operand stack of one activation
#[derive(Debug, Clone)]
pub struct OperandStack {
    values: Vec<Value>,
    max_size: usize,
    /// Method owning the stack, used in fault messages
    method: String,
}

impl OperandStack {
    /// Create a stack with the default maximum size
    pub fn new(method: impl Into<String>) -> Self {
        Self::with_max_size(method, MAX_STACK_SIZE)
    }

    pub fn with_max_size(method: impl Into<String>, max_size: usize) -> Self {
        Self {
            values: Vec::with_capacity(max_size.min(16)),
            max_size,
            method: method.into(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Push a value onto the stack
    pub fn push(&mut self, value: Value) -> VmResult<()> {
        if self.values.len() >= self.max_size {
            return Err(VmError::StackOverflow { method: self.method.clone() });
        }
        self.values.push(value);
        Ok(())
    }

    /// Pop a value from the stack
    pub fn pop(&mut self) -> VmResult<Value> {
        self.values.pop().ok_or_else(|| VmError::StackUnderflow { method: self.method.clone() })
    }

    pub fn pop_int(&mut self) -> VmResult<i32> {
        let value = self.pop()?;
        value.as_int(&self.method)
    }

    pub fn pop_long(&mut self) -> VmResult<i64> {
        let value = self.pop()?;
        value.as_long(&self.method)
    }

    /// Pop a reference, `None` for null
    pub fn pop_object(&mut self) -> VmResult<Option<usize>> {
        let value = self.pop()?;
        value.as_object(&self.method)
    }

    /// Pop `count` values, returned in push order
    pub fn pop_many(&mut self, count: usize) -> VmResult<Vec<Value>> {
        if count > self.values.len() {
            return Err(VmError::StackUnderflow { method: self.method.clone() });
        }
        Ok(self.values.split_off(self.values.len() - count))
    }

    /// Duplicate the top value
    pub fn dup(&mut self) -> VmResult<()> {
        let top = *self.values.last().ok_or_else(|| VmError::StackUnderflow { method: self.method.clone() })?;
        self.push(top)
    }

    /// Swap the top two values
    pub fn swap(&mut self) -> VmResult<()> {
        let len = self.values.len();
        if len < 2 {
            return Err(VmError::StackUnderflow { method: self.method.clone() });
        }
        self.values.swap(len - 1, len - 2);
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
