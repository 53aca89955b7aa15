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

//! Shared state of a desugaring run
//!
//! Every pass receives the run context explicitly. Apart from the tables
//! behind the registry, synthetic items, diagnostics and metrics, all of it is
//! read-only.

use crate::config::DesugarConfig;
use crate::diagnostics::{DesugarDiagnostic, DiagnosticsCollector, SourcePosition};
use crate::error::DesugarResult;
use crate::features::{ConstructKind, FeatureModel};
use crate::hierarchy::AppView;
use crate::metrics::MetricsRecorder;
use crate::naming::{CompanionRole, NamingRegistry, SyntheticContext, SyntheticKind};
use crate::passes::backport::catalog::BackportCatalog;
use crate::passes::interfaces::emulated::DispatchCache;
use crate::synthetic::SyntheticItems;
use retrodex_common::{AccessFlags, ApiLevel, MethodDef, MethodProto, MethodRef, TypeRef};

/// Context passed to every pass of a run
pub struct DesugarContext<'a> {
    pub config: &'a DesugarConfig,
    pub features: &'a FeatureModel,
    pub catalog: &'a BackportCatalog,
    pub app: AppView<'a>,
    pub registry: &'a NamingRegistry,
    pub synthetics: &'a SyntheticItems,
    pub diagnostics: &'a DiagnosticsCollector,
    pub metrics: &'a MetricsRecorder,
    pub dispatch: DispatchCache,
}

impl<'a> DesugarContext<'a> {
    pub fn min_api(&self) -> ApiLevel {
        self.config.min_api
    }

    /// Whether a language construct must be desugared for the target
    pub fn requires(&self, kind: ConstructKind) -> bool {
        self.features.requires_desugaring(kind, self.config.min_api)
    }

    /// Whether any interface construct must be desugared
    pub fn desugars_interfaces(&self) -> bool {
        self.config.desugar_interfaces
            && (self.requires(ConstructKind::DefaultInterfaceMethods)
                || self.requires(ConstructKind::StaticInterfaceMethods)
                || self.requires(ConstructKind::PrivateInterfaceMethods))
    }

    /// Name of the companion class of `interface`
    pub fn companion_name(&self, interface: &TypeRef) -> DesugarResult<TypeRef> {
        let name = self
            .registry
            .allocate(&SyntheticContext::of_type(interface.clone()), SyntheticKind::CompanionClass)?;
        Ok(name.as_type())
    }

    /// Role a method of `interface` takes once relocated
    pub fn companion_role(method: &MethodDef) -> CompanionRole {
        if method.is_static() {
            CompanionRole::Static
        } else if method.is_private() {
            CompanionRole::Private
        } else {
            CompanionRole::Default
        }
    }

    /// Static companion method standing in for `method` of `interface`
    pub fn companion_method(&self, interface: &TypeRef, method: &MethodDef) -> DesugarResult<MethodRef> {
        let role = Self::companion_role(method);
        let context = SyntheticContext::of_member(interface.clone(), method.key());
        let name = self.registry.allocate(&context, SyntheticKind::CompanionMethod(role))?;
        let proto = match role {
            CompanionRole::Static => method.proto.clone(),
            CompanionRole::Default | CompanionRole::Private => method.proto.prepend(interface.as_value_type()),
        };
        Ok(MethodRef::new(self.companion_name(interface)?, name.as_str(), proto))
    }

    /// Companion reference for a default method known only by name and prototype
    pub fn default_companion_method(&self, interface: &TypeRef, name: &str, proto: &MethodProto) -> DesugarResult<MethodRef> {
        let probe = MethodDef::new_abstract(name, proto.clone(), AccessFlags::PUBLIC);
        self.companion_method(interface, &probe)
    }

    /// Report a type that could not be resolved
    pub fn report_missing(&self, missing: &TypeRef, context: &TypeRef, position: SourcePosition) {
        self.diagnostics
            .record(DesugarDiagnostic::missing_type(missing.clone(), context.clone(), position));
    }

    /// Report a call whose shape contradicts its resolved owner
    pub fn report_unverifiable(&self, method: &MethodRef, context: &TypeRef, position: SourcePosition) {
        self.diagnostics
            .record(DesugarDiagnostic::unverifiable(method.clone(), context.clone(), position));
    }
}

/// Source position of an instruction within `method`
pub fn position(method: &MethodRef, line: Option<u32>) -> SourcePosition {
    SourcePosition::Method {
        method: method.clone(),
        line,
    }
}
