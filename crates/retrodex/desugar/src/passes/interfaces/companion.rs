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

//! Companion relocation and interface call-site rewriting

use super::emulated;
use super::forwarders::{Resolution, resolve_in_interfaces};
use crate::context::{DesugarContext, position};
use crate::diagnostics::SourcePosition;
use crate::error::{DesugarError, DesugarResult};
use crate::features::{ConstructKind, ForwarderPolicy};
use crate::naming::CompanionRole;
use crate::passes::{ClassWork, RelocatedMethod, rewrite_instructions};
use retrodex_common::{
    AccessFlags, ClassOrigin, CodeBuilder, HandleKind, Instruction, InvokeKind, MethodDef, MethodHandle, MethodRef, TypeRef, ValueKind,
};
use std::collections::BTreeSet;
use tracing::debug;

/// Role a method of an interface takes in its companion, if it is relocated at the target level
pub fn relocation_role(ctx: &DesugarContext<'_>, method: &MethodDef) -> Option<CompanionRole> {
    if !ctx.config.desugar_interfaces || method.code.is_none() || method.is_constructor() || method.is_class_initializer() {
        return None;
    }
    let construct = if method.is_private() {
        ConstructKind::PrivateInterfaceMethods
    } else if method.is_static() {
        ConstructKind::StaticInterfaceMethods
    } else {
        ConstructKind::DefaultInterfaceMethods
    };
    ctx.requires(construct).then(|| DesugarContext::companion_role(method))
}

/// Move the bodies of an interface into `work.relocated`
pub fn relocate(ctx: &DesugarContext<'_>, work: &mut ClassWork) -> DesugarResult<bool> {
    let interface = work.class.name.clone();
    if let Some(method) = work.class.methods.iter().find(|method| method.flags.has_conflicting_visibility()) {
        return Err(DesugarError::conflicting_access(
            &interface,
            method.key(),
            "interface method is declared with more than one visibility",
        ));
    }

    let policy = ctx.features.forwarder_policy();
    let mut kept = Vec::with_capacity(work.class.methods.len());
    let mut changed = false;
    for method in std::mem::take(&mut work.class.methods) {
        let Some(role) = relocation_role(ctx, &method) else {
            kept.push(method);
            continue;
        };
        let target = ctx.companion_method(&interface, &method)?;
        if role == CompanionRole::Default {
            kept.push(match policy {
                ForwarderPolicy::Strip => MethodDef::new_abstract(
                    &*method.name,
                    method.proto.clone(),
                    method.flags.difference(AccessFlags::SYNCHRONIZED | AccessFlags::FINAL),
                ),
                ForwarderPolicy::KeepInInterface => {
                    let mut body = CodeBuilder::for_method(&method.proto, false);
                    body.load(ValueKind::Ref, 0)
                        .load_params(&method.proto.params, 1)
                        .invoke(InvokeKind::Static, target.clone(), false)
                        .ret(method.proto.return_kind());
                    MethodDef::new(&*method.name, method.proto.clone(), method.flags, body.build())
                }
            });
        }
        debug!(interface = %interface, method = %method.key(), companion = %target, "relocated interface method");
        work.relocated.push(RelocatedMethod {
            origin: method.key(),
            method: MethodDef {
                name: target.name.clone(),
                proto: target.proto.clone(),
                flags: AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::SYNTHETIC,
                code: method.code,
            },
        });
        changed = true;
    }
    work.class.methods = kept;
    Ok(changed)
}

/// Rewrite calls into interfaces in every body of the class
pub fn rewrite_calls(ctx: &DesugarContext<'_>, work: &mut ClassWork) -> DesugarResult<bool> {
    let rewriter = CallRewriter {
        ctx,
        own: work.class.name.clone(),
    };
    let mut changed = false;
    for (reference, code) in work.bodies_mut() {
        changed |= rewrite_instructions(code, |insn, cursor| rewriter.rewrite(insn, position(&reference, cursor.line)))?;
    }
    Ok(changed)
}

struct CallRewriter<'c, 'a> {
    ctx: &'c DesugarContext<'a>,
    own: TypeRef,
}

impl CallRewriter<'_, '_> {
    fn rewrite(&self, insn: &Instruction, at: SourcePosition) -> DesugarResult<Option<Vec<Instruction>>> {
        match insn {
            Instruction::Invoke { kind, method, interface } => Ok(self
                .rewrite_invoke(*kind, method, *interface, at)?
                .map(|target| vec![Instruction::invoke(InvokeKind::Static, target, false)])),
            Instruction::InvokeDynamic(site) => {
                let Some(handle) = self.rewrite_handle(&site.implementation)? else {
                    return Ok(None);
                };
                let mut site = site.clone();
                site.implementation = handle;
                Ok(Some(vec![Instruction::InvokeDynamic(site)]))
            }
            _ => Ok(None),
        }
    }

    /// Static replacement for an invocation, if one is needed
    fn rewrite_invoke(&self, kind: InvokeKind, method: &MethodRef, interface: bool, at: SourcePosition) -> DesugarResult<Option<MethodRef>> {
        let ctx = self.ctx;
        if matches!(kind, InvokeKind::Interface | InvokeKind::Virtual)
            && let Some(target) = emulated::dispatch_target(ctx, method)?
        {
            return Ok(Some(target));
        }
        if method.is_constructor() {
            return Ok(None);
        }

        let Some(owner_is_interface) = ctx.app.is_interface(&method.owner) else {
            if interface || (kind == InvokeKind::Special && method.owner != self.own) {
                ctx.report_missing(&method.owner, &self.own, at);
            }
            return Ok(None);
        };
        let flag_matches = match kind {
            InvokeKind::Interface => owner_is_interface,
            InvokeKind::Virtual => !owner_is_interface,
            InvokeKind::Static | InvokeKind::Special => interface == owner_is_interface,
        };
        if !flag_matches {
            ctx.report_unverifiable(method, &self.own, at);
            return Ok(None);
        }
        if !owner_is_interface {
            return Ok(None);
        }

        match kind {
            InvokeKind::Static => self.relocated_target(method),
            InvokeKind::Special if method.owner == self.own => {
                let Some((_, target)) = ctx.app.declared_method(&method.owner, &method.name, &method.proto) else {
                    return Ok(None);
                };
                if !target.is_private() {
                    return Err(DesugarError::conflicting_access(
                        &self.own,
                        method.key(),
                        "non-virtual call to a non-private method of the same interface",
                    ));
                }
                self.relocated_target(method)
            }
            InvokeKind::Special => self.super_target(method),
            InvokeKind::Interface if method.owner == self.own => {
                match ctx.app.declared_method(&method.owner, &method.name, &method.proto) {
                    Some((_, target)) if target.is_private() => self.relocated_target(method),
                    _ => Ok(None),
                }
            }
            InvokeKind::Interface | InvokeKind::Virtual => Ok(None),
        }
    }

    /// Companion method for a method declared by its owner, when that method is relocated
    fn relocated_target(&self, method: &MethodRef) -> DesugarResult<Option<MethodRef>> {
        let ctx = self.ctx;
        let Some((class, origin)) = ctx.app.lookup(&method.owner) else {
            return Ok(None);
        };
        if origin == ClassOrigin::Library {
            return Ok(None);
        }
        let Some(target) = class.method(&method.name, &method.proto) else {
            return Ok(None);
        };
        if relocation_role(ctx, target).is_none() {
            return Ok(None);
        }
        ctx.companion_method(&method.owner, target).map(Some)
    }

    /// Implementation selected by `Owner.super.m()`
    fn super_target(&self, method: &MethodRef) -> DesugarResult<Option<MethodRef>> {
        let ctx = self.ctx;
        let mut missing = BTreeSet::new();
        let mut closure = vec![method.owner.clone()];
        closure.extend(ctx.app.superinterfaces(&method.owner, &mut missing));
        for name in &missing {
            ctx.report_missing(name, &self.own, SourcePosition::Unknown);
        }
        match resolve_in_interfaces(ctx, &closure, &method.name, &method.proto)? {
            Resolution::Companion(target) => Ok(Some(target)),
            Resolution::Inherited | Resolution::Conflict | Resolution::Abstract | Resolution::Absent => Ok(None),
        }
    }

    fn rewrite_handle(&self, handle: &MethodHandle) -> DesugarResult<Option<MethodHandle>> {
        let target = match handle.kind {
            HandleKind::InvokeStatic if handle.interface => self.relocated_target(&handle.method)?,
            HandleKind::InvokeSpecial | HandleKind::InvokeInterface if handle.method.owner == self.own => {
                match self.ctx.app.declared_method(&handle.method.owner, &handle.method.name, &handle.method.proto) {
                    Some((_, declared)) if declared.is_private() => self.relocated_target(&handle.method)?,
                    _ => None,
                }
            }
            _ => None,
        };
        Ok(target.map(|method| MethodHandle::new(HandleKind::InvokeStatic, method, false)))
    }
}
