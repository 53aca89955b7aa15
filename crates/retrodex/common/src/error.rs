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

//! Errors raised while building or validating the class model

use thiserror::Error;

/// Errors in the class-definition model
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid descriptor '{descriptor}': {details}")]
    InvalidDescriptor { descriptor: String, details: String },

    #[error("Invalid API level: {0}")]
    InvalidApiLevel(String),

    #[error("Duplicate class definition: {0}")]
    DuplicateClass(String),

    #[error("Duplicate member {member} in class {class}")]
    DuplicateMember { class: String, member: String },

    #[error("Jump to undefined label L{label} in {method}")]
    UndefinedLabel { method: String, label: u32 },

    #[error("Label L{label} defined twice in {method}")]
    DuplicateLabel { method: String, label: u32 },
}

impl ModelError {
    /// Create a descriptor error
    pub fn invalid_descriptor(descriptor: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            descriptor: descriptor.into(),
            details: details.into(),
        }
    }
}

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;
