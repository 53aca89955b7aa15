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

//! Error handling for the desugaring engine
//!
//! Only structural contradictions and internal failures are errors. Missing
//! or duplicated types are reported as diagnostics and never abort a run.

use retrodex_common::{ModelError, TypeRef};
use thiserror::Error;

/// Errors that can occur during desugaring
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DesugarError {
    // Input Errors
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Conflicting access flags on {member} in {class}: {details}")]
    ConflictingAccess { class: String, member: String, details: String },

    #[error("Malformed code in {method}: {details}")]
    MalformedCode { method: String, details: String },

    // Naming Errors
    #[error("Synthetic name {name} requested by {requested} is already taken by {existing}")]
    SyntheticNameCollision { name: String, existing: String, requested: String },

    // Merge Errors
    #[error("Cannot merge {name}: {details}")]
    MergeConflict { name: String, details: String },

    // Configuration Errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Configuration validation failed: {field} - {details}")]
    ConfigurationValidationError { field: String, details: String },

    // Aggregate Errors
    #[error("Desugaring failed for {} class(es)", .failures.len())]
    ClassesFailed { failures: Vec<ClassFailure> },

    // Internal Errors
    #[error("Internal desugarer error: {0}")]
    InternalError(String),
}

/// A class whose desugaring was aborted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFailure {
    pub class: TypeRef,
    pub error: Box<DesugarError>,
}

impl DesugarError {
    /// Create a conflicting-access error
    pub fn conflicting_access(class: impl ToString, member: impl ToString, details: impl Into<String>) -> Self {
        Self::ConflictingAccess {
            class: class.to_string(),
            member: member.to_string(),
            details: details.into(),
        }
    }

    /// Create a malformed-code error
    pub fn malformed_code(method: impl ToString, details: impl Into<String>) -> Self {
        Self::MalformedCode {
            method: method.to_string(),
            details: details.into(),
        }
    }

    /// Create a merge conflict
    pub fn merge_conflict(name: impl ToString, details: impl Into<String>) -> Self {
        Self::MergeConflict {
            name: name.to_string(),
            details: details.into(),
        }
    }

    /// Create a configuration validation error
    pub fn config_validation(field: impl Into<String>, details: impl Into<String>) -> Self {
        Self::ConfigurationValidationError {
            field: field.into(),
            details: details.into(),
        }
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    /// Whether the remaining classes of a run can still be processed after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Model(_) | Self::ConflictingAccess { .. } | Self::MalformedCode { .. } => true,
            Self::SyntheticNameCollision { .. } => false,
            Self::MergeConflict { .. } => false,
            Self::InvalidConfiguration(_) | Self::ConfigurationValidationError { .. } => false,
            Self::ClassesFailed { .. } => false,
            Self::InternalError(_) => false,
        }
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Model(_) | Self::MalformedCode { .. } => ErrorCategory::Input,
            Self::ConflictingAccess { .. } => ErrorCategory::Access,
            Self::SyntheticNameCollision { .. } => ErrorCategory::Naming,
            Self::MergeConflict { .. } => ErrorCategory::Merge,
            Self::InvalidConfiguration(_) | Self::ConfigurationValidationError { .. } => ErrorCategory::Configuration,
            Self::ClassesFailed { .. } => ErrorCategory::Aggregate,
            Self::InternalError(_) => ErrorCategory::Internal,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self.category() {
            ErrorCategory::Input => "An input class is malformed and cannot be desugared.".to_string(),
            ErrorCategory::Access => "An input class declares contradictory access flags; desugaring it could not preserve its behavior.".to_string(),
            ErrorCategory::Naming => "A synthesized class name clashes with an existing class.".to_string(),
            ErrorCategory::Merge => "Separately desugared outputs disagree and cannot be merged.".to_string(),
            ErrorCategory::Configuration => "The desugaring configuration is invalid or incomplete.".to_string(),
            ErrorCategory::Aggregate => "One or more classes could not be desugared.".to_string(),
            ErrorCategory::Internal => "An internal error occurred in the desugarer. This is likely a bug.".to_string(),
        }
    }
}

/// Error categories for better error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Access,
    Naming,
    Merge,
    Configuration,
    Aggregate,
    Internal,
}

impl ErrorCategory {
    /// Get the category name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Access => "access",
            Self::Naming => "naming",
            Self::Merge => "merge",
            Self::Configuration => "configuration",
            Self::Aggregate => "aggregate",
            Self::Internal => "internal",
        }
    }
}

/// Result type alias for desugaring operations
pub type DesugarResult<T> = Result<T, DesugarError>;
