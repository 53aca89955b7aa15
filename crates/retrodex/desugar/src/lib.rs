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

//! Retrodex Desugaring Engine
//!
//! Rewrites compiled classes that use newer language and library features so
//! they run on older platform API levels: library methods are backported,
//! private nest access is bridged, interface bodies move to companion classes
//! and lambda capture sites become classes.

pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod features;
pub mod hierarchy;
pub mod metrics;
pub mod naming;
pub mod output;
pub mod passes;
pub mod pipeline;
pub mod synthetic;

// Re-export the entry points
pub use config::{DesugarConfig, EmulatedInterface, EmulatedMethod, EmulatedOverride};
pub use diagnostics::{DesugarDiagnostic, DiagnosticKind, SourcePosition};
pub use error::{ClassFailure, DesugarError, DesugarResult};
pub use features::{ConstructKind, FeatureModel, FeatureTable, ForwarderPolicy, PlatformProfile};
pub use metrics::DesugarMetrics;
pub use naming::{SyntheticContext, SyntheticKind, SyntheticName, SyntheticNameTable};
pub use output::DesugaredProgram;
pub use pipeline::Desugarer;

use retrodex_common::Program;

/// Desugar `program` with a one-off engine
pub fn desugar(program: &Program, config: DesugarConfig) -> DesugarResult<DesugaredProgram> {
    Desugarer::new(config)?.desugar(program)
}
