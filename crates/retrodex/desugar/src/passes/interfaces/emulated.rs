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

//! Emulated library interfaces
//!
//! Program classes implementing an emulated library interface also implement
//! its `j$` counterpart. Calls to emulated methods go through a static
//! dispatcher that prefers an implementation by the receiver, then library
//! overrides, then the emulation companion.

use crate::config::{EmulatedInterface, EmulatedMethod, EmulatedOverride};
use crate::context::DesugarContext;
use crate::error::DesugarResult;
use crate::metrics::Artifact;
use crate::naming::{SyntheticContext, SyntheticKind};
use dashmap::DashMap;
use retrodex_common::{AccessFlags, ClassDef, CodeBuilder, Condition, Instruction, InvokeKind, MethodDef, MethodRef, TypeRef, ValueKind};
use std::collections::BTreeSet;
use tracing::debug;

/// Dispatcher classes already synthesized, by library interface
#[derive(Debug, Default)]
pub struct DispatchCache {
    dispatchers: DashMap<TypeRef, TypeRef>,
}

impl DispatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the dispatcher class of `emulation`, synthesizing it on first use
    pub fn dispatcher(&self, ctx: &DesugarContext<'_>, emulation: &EmulatedInterface) -> DesugarResult<TypeRef> {
        if let Some(existing) = self.dispatchers.get(&emulation.library_interface) {
            return Ok(existing.clone());
        }
        let context = SyntheticContext::of_type(emulation.emulated_interface.clone());
        let name = ctx.registry.allocate(&context, SyntheticKind::DispatchClass)?.as_type();

        let mut class = ClassDef::class(name.as_str()).with_flags(AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::SYNTHETIC);
        for method in &emulation.methods {
            class.add_method(dispatch_method(ctx, emulation, method)?)?;
        }
        if ctx.synthetics.add_class(class)? {
            debug!(interface = %emulation.library_interface, dispatcher = %name, "synthesized emulated interface dispatcher");
            ctx.metrics.record_artifact(Artifact::Dispatcher);
        }
        self.dispatchers.insert(emulation.library_interface.clone(), name.clone());
        Ok(name)
    }

    pub fn len(&self) -> usize {
        self.dispatchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatchers.is_empty()
    }
}

/// Dispatcher entry replacing a call to an emulated method, if `method` is one
pub fn dispatch_target(ctx: &DesugarContext<'_>, method: &MethodRef) -> DesugarResult<Option<MethodRef>> {
    let emulation = match ctx.app.emulation_of(&method.owner) {
        Some(emulation) => emulation,
        None => match ctx.app.emulation_named(&method.owner) {
            Some(emulation) => emulation,
            None => return Ok(None),
        },
    };
    if emulation.emulated_method(&method.name, &method.proto, ctx.min_api()).is_none() {
        return Ok(None);
    }
    let dispatcher = ctx.dispatch.dispatcher(ctx, emulation)?;
    let proto = method.proto.prepend(emulation.library_interface.as_value_type());
    Ok(Some(MethodRef::new(dispatcher, &*method.name, proto)))
}

/// `instanceof` cascade selecting the implementation of one emulated method
fn dispatch_method(ctx: &DesugarContext<'_>, emulation: &EmulatedInterface, method: &EmulatedMethod) -> DesugarResult<MethodDef> {
    let proto = method.proto()?;
    let dispatch_proto = proto.prepend(emulation.library_interface.as_value_type());
    let mut body = CodeBuilder::for_method(&dispatch_proto, true);

    let next = body.new_label();
    body.load(ValueKind::Ref, 0)
        .push(Instruction::InstanceOf(emulation.emulated_interface.clone()))
        .push(Instruction::If { cond: Condition::Eq, target: next });
    body.load(ValueKind::Ref, 0)
        .push(Instruction::CheckCast(emulation.emulated_interface.clone()))
        .load_params(&proto.params, 1)
        .invoke(
            InvokeKind::Interface,
            MethodRef::new(emulation.emulated_interface.clone(), &method.name, proto.clone()),
            true,
        )
        .ret(proto.return_kind());
    body.mark(next);

    for override_ in overrides_by_specificity(ctx, emulation, method) {
        let skip = body.new_label();
        let implementation = MethodRef::new(
            override_.implementation.clone(),
            &method.name,
            proto.prepend(override_.subtype.as_value_type()),
        );
        body.load(ValueKind::Ref, 0)
            .push(Instruction::InstanceOf(override_.subtype.clone()))
            .push(Instruction::If { cond: Condition::Eq, target: skip });
        body.load(ValueKind::Ref, 0)
            .push(Instruction::CheckCast(override_.subtype.clone()))
            .load_params(&proto.params, 1)
            .invoke(InvokeKind::Static, implementation, false)
            .ret(proto.return_kind());
        body.mark(skip);
    }

    body.load(ValueKind::Ref, 0)
        .load_params(&proto.params, 1)
        .invoke(InvokeKind::Static, emulation.companion_method(method)?, false)
        .ret(proto.return_kind());
    Ok(MethodDef::new(
        &method.name,
        dispatch_proto,
        AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::SYNTHETIC,
        body.build(),
    ))
}

/// Overrides of `method`, subtypes before their supertypes
fn overrides_by_specificity<'e>(
    ctx: &DesugarContext<'_>,
    emulation: &'e EmulatedInterface,
    method: &EmulatedMethod,
) -> Vec<&'e EmulatedOverride> {
    let matching: Vec<_> = emulation
        .overrides
        .iter()
        .filter(|override_| override_.method == method.name && override_.descriptor == method.descriptor)
        .collect();
    let mut ranked: Vec<(usize, &EmulatedOverride)> = matching
        .iter()
        .map(|override_| {
            let depth = matching
                .iter()
                .filter(|other| other.subtype != override_.subtype && ctx.app.is_subtype(&override_.subtype, &other.subtype))
                .count();
            (depth, *override_)
        })
        .collect();
    ranked.sort_by(|(a_depth, a), (b_depth, b)| b_depth.cmp(a_depth).then_with(|| a.subtype.cmp(&b.subtype)));
    ranked.into_iter().map(|(_, override_)| override_).collect()
}

/// Add `j$` interfaces to a class that is the topmost implementor of emulated library interfaces
pub fn add_emulated_interfaces(ctx: &DesugarContext<'_>, class: &mut ClassDef) -> bool {
    if class.is_interface() || ctx.app.emulations().is_empty() {
        return false;
    }
    let mut missing = BTreeSet::new();
    let own = ctx.app.expand_interfaces(class.interfaces.clone(), &mut missing);
    let inherited: BTreeSet<TypeRef> = match class.super_class.as_ref().and_then(|name| ctx.app.definition(name)) {
        Some(parent) => ctx.app.interface_closure(parent, &mut missing).into_iter().collect(),
        None => BTreeSet::new(),
    };

    let mut changed = false;
    for emulation in ctx.app.emulations() {
        if own.contains(&emulation.library_interface)
            && !inherited.contains(&emulation.library_interface)
            && !class.interfaces.contains(&emulation.emulated_interface)
        {
            debug!(class = %class.name, interface = %emulation.emulated_interface, "added emulated interface");
            class.interfaces.push(emulation.emulated_interface.clone());
            changed = true;
        }
    }
    changed
}
