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

//! Default method resolution and forwarder synthesis
//!
//! Once default bodies are stripped from interfaces, every class whose
//! effective implementation of a method differs from its superclass's gets a
//! forwarder. The effective implementation follows the JVM rules: a method
//! found on the superclass chain wins, otherwise the maximally specific
//! superinterface method is selected.

use crate::context::DesugarContext;
use crate::diagnostics::SourcePosition;
use crate::error::DesugarResult;
use crate::features::ConstructKind;
use crate::metrics::Artifact;
use retrodex_common::{AccessFlags, ClassDef, ClassOrigin, CodeBuilder, InvokeKind, MethodDef, MethodProto, MethodRef, TypeRef, ValueKind};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Effective implementation of a method for a class
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Implemented on the class chain, or natively by the platform
    Inherited,
    /// Implemented by a static companion method
    Companion(MethodRef),
    /// Several maximally specific defaults
    Conflict,
    /// Only abstract declarations are maximally specific
    Abstract,
    /// Nothing declares the method
    Absent,
}

struct Candidate {
    interface: TypeRef,
    resolution: Option<Resolution>,
}

/// Select among the methods declared by `closure` following maximal specificity
pub fn resolve_in_interfaces(ctx: &DesugarContext<'_>, closure: &[TypeRef], name: &str, proto: &MethodProto) -> DesugarResult<Resolution> {
    let mut candidates = Vec::new();
    for interface in closure {
        if let Some(candidate) = candidate(ctx, interface, name, proto)? {
            candidates.push(candidate);
        }
    }

    let maximal: Vec<&Candidate> = candidates
        .iter()
        .filter(|candidate| {
            !candidates
                .iter()
                .any(|other| other.interface != candidate.interface && ctx.app.is_subtype(&other.interface, &candidate.interface))
        })
        .collect();
    let implemented: Vec<&Resolution> = maximal.iter().filter_map(|candidate| candidate.resolution.as_ref()).collect();
    Ok(match implemented.as_slice() {
        [single] => (*single).clone(),
        [] if maximal.is_empty() => Resolution::Absent,
        [] => Resolution::Abstract,
        _ => Resolution::Conflict,
    })
}

/// Declaration of the method by one interface; `resolution` is `None` for an abstract declaration
fn candidate(ctx: &DesugarContext<'_>, interface: &TypeRef, name: &str, proto: &MethodProto) -> DesugarResult<Option<Candidate>> {
    if let Some(emulation) = ctx.app.emulation_of(interface)
        && let Some(method) = emulation.emulated_method(name, proto, ctx.min_api())
    {
        return Ok(Some(Candidate {
            interface: interface.clone(),
            resolution: Some(Resolution::Companion(emulation.companion_method(method)?)),
        }));
    }
    let Some((class, origin)) = ctx.app.lookup(interface) else {
        return Ok(None);
    };
    let Some(method) = class.method(name, proto) else {
        return Ok(None);
    };
    if method.is_static() || method.is_private() {
        return Ok(None);
    }
    let resolution = if method.is_abstract() {
        None
    } else if origin == ClassOrigin::Library || !defaults_desugared(ctx) {
        Some(Resolution::Inherited)
    } else {
        Some(Resolution::Companion(ctx.companion_method(interface, method)?))
    };
    Ok(Some(Candidate {
        interface: interface.clone(),
        resolution,
    }))
}

fn defaults_desugared(ctx: &DesugarContext<'_>) -> bool {
    ctx.config.desugar_interfaces && ctx.requires(ConstructKind::DefaultInterfaceMethods)
}

/// Effective implementation of `name` for a non-interface class
pub fn resolve_for_class(
    ctx: &DesugarContext<'_>,
    class: &ClassDef,
    name: &str,
    proto: &MethodProto,
    missing: &mut BTreeSet<TypeRef>,
) -> DesugarResult<Resolution> {
    if declares_instance_method(class, name, proto) {
        return Ok(Resolution::Inherited);
    }
    if ctx
        .app
        .superclasses(class, missing)
        .into_iter()
        .any(|parent| declares_instance_method(parent, name, proto))
    {
        return Ok(Resolution::Inherited);
    }
    let closure = ctx.app.interface_closure(class, missing);
    resolve_in_interfaces(ctx, &closure, name, proto)
}

fn declares_instance_method(class: &ClassDef, name: &str, proto: &MethodProto) -> bool {
    class.method(name, proto).is_some_and(|method| !method.is_static() && !method.is_private())
}

/// Add the forwarders `class` needs; returns whether any was added
pub fn add_forwarders(ctx: &DesugarContext<'_>, class: &mut ClassDef) -> DesugarResult<bool> {
    if class.is_interface() {
        return Ok(false);
    }
    let mut missing = BTreeSet::new();
    let closure = ctx.app.interface_closure(class, &mut missing);
    let signatures = candidate_signatures(ctx, &closure);

    let parent = class.super_class.as_ref().and_then(|name| ctx.app.lookup(name));
    let mut forwarders = Vec::new();
    for (name, proto) in signatures {
        let own = resolve_for_class(ctx, class, &name, &proto, &mut missing)?;
        let inherited = match parent {
            Some((parent, ClassOrigin::Program | ClassOrigin::Classpath)) => resolve_for_class(ctx, parent, &name, &proto, &mut missing)?,
            Some((_, ClassOrigin::Library)) => Resolution::Inherited,
            None => Resolution::Absent,
        };
        let needed = match &own {
            Resolution::Companion(_) | Resolution::Conflict => own != inherited,
            Resolution::Abstract => matches!(inherited, Resolution::Companion(_) | Resolution::Conflict),
            Resolution::Inherited | Resolution::Absent => false,
        };
        if needed {
            forwarders.push(forwarder(&name, &proto, &own));
        }
    }

    for name in &missing {
        ctx.report_missing(name, &class.name, SourcePosition::Unknown);
    }
    let added = !forwarders.is_empty();
    for method in forwarders {
        debug!(class = %class.name, method = %method.key(), "added default method forwarder");
        class.add_method(method)?;
        ctx.metrics.record_artifact(Artifact::Forwarder);
    }
    Ok(added)
}

/// Signatures that may resolve to a desugared or emulated default
fn candidate_signatures(ctx: &DesugarContext<'_>, closure: &[TypeRef]) -> Vec<(Arc<str>, MethodProto)> {
    let mut signatures = BTreeMap::new();
    for interface in closure {
        if let Some(emulation) = ctx.app.emulation_of(interface) {
            for method in &emulation.methods {
                if let Ok(proto) = method.proto()
                    && emulation.emulated_method(&method.name, &proto, ctx.min_api()).is_some()
                {
                    signatures.insert((Arc::from(method.name.as_str()), proto.descriptor()), proto);
                }
            }
        }
        if !defaults_desugared(ctx) {
            continue;
        }
        if let Some((definition, ClassOrigin::Program | ClassOrigin::Classpath)) = ctx.app.lookup(interface) {
            for method in &definition.methods {
                if method.is_virtual() && !method.is_abstract() {
                    signatures.insert((method.name.clone(), method.proto.descriptor()), method.proto.clone());
                }
            }
        }
    }
    signatures.into_iter().map(|((name, _), proto)| (name, proto)).collect()
}

fn forwarder(name: &str, proto: &MethodProto, resolution: &Resolution) -> MethodDef {
    let mut body = CodeBuilder::for_method(proto, false);
    match resolution {
        Resolution::Companion(target) => {
            body.load(ValueKind::Ref, 0)
                .load_params(&proto.params, 1)
                .invoke(InvokeKind::Static, target.clone(), false)
                .ret(proto.return_kind());
        }
        Resolution::Conflict => {
            body.throw_new("java/lang/IncompatibleClassChangeError", None);
        }
        Resolution::Abstract | Resolution::Inherited | Resolution::Absent => {
            body.throw_new("java/lang/AbstractMethodError", None);
        }
    }
    MethodDef::new(name, proto.clone(), AccessFlags::PUBLIC | AccessFlags::SYNTHETIC, body.build())
}
