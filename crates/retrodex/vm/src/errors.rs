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

use retrodex_common::ModelError;
use thiserror::Error;

/// Errors raised while executing a program
///
/// [`VmError::Thrown`] carries a throwable raised by the executed program or
/// by the runtime on its behalf; every other variant is an interpreter fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("{class}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Thrown { class: String, message: Option<String> },

    #[error("Stack underflow in {method}")]
    StackUnderflow { method: String },

    #[error("Operand stack overflow in {method}")]
    StackOverflow { method: String },

    #[error("Type mismatch in {method}: expected {expected}, found {found}")]
    TypeMismatch { method: String, expected: &'static str, found: String },

    #[error("Unknown label L{label} in {method}")]
    UnknownLabel { method: String, label: u32 },

    #[error("Local {index} out of range in {method}")]
    InvalidLocal { method: String, index: u16 },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Execution exceeded {0} steps")]
    StepLimit(u64),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

impl VmError {
    /// A throwable raised by the runtime
    pub fn thrown(class: &str, message: impl Into<String>) -> Self {
        Self::Thrown {
            class: class.to_string(),
            message: Some(message.into()),
        }
    }

    pub fn null_pointer(details: impl Into<String>) -> Self {
        Self::thrown("java/lang/NullPointerException", details)
    }

    pub fn incompatible_class_change(details: impl Into<String>) -> Self {
        Self::thrown("java/lang/IncompatibleClassChangeError", details)
    }

    pub fn illegal_access(details: impl Into<String>) -> Self {
        Self::thrown("java/lang/IllegalAccessError", details)
    }

    pub fn abstract_method(details: impl Into<String>) -> Self {
        Self::thrown("java/lang/AbstractMethodError", details)
    }

    pub fn no_such_method(details: impl Into<String>) -> Self {
        Self::thrown("java/lang/NoSuchMethodError", details)
    }

    pub fn no_such_field(details: impl Into<String>) -> Self {
        Self::thrown("java/lang/NoSuchFieldError", details)
    }

    pub fn no_class_def(details: impl Into<String>) -> Self {
        Self::thrown("java/lang/NoClassDefFoundError", details)
    }

    pub fn verify(details: impl Into<String>) -> Self {
        Self::thrown("java/lang/VerifyError", details)
    }

    /// Class of the throwable, if this is a Java-level exception
    pub fn thrown_class(&self) -> Option<&str> {
        match self {
            Self::Thrown { class, .. } => Some(class),
            _ => None,
        }
    }

    /// Whether this is a throwable of exactly `class`
    pub fn is_thrown(&self, class: &str) -> bool {
        self.thrown_class() == Some(class)
    }
}

pub type VmResult<T> = Result<T, VmError>;
