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

//! Nest-based access desugaring
//!
//! Private members accessed from another class of the same nest get a
//! package-private static bridge on their holder, and calls to the class's
//! own private methods are made non-virtual. Private constructors receive a
//! bridge constructor distinguished by a trailing tag parameter.

use super::interfaces::companion::relocation_role;
use super::{ClassWork, rewrite_instructions};
use crate::context::DesugarContext;
use crate::error::{DesugarError, DesugarResult};
use crate::features::ConstructKind;
use crate::metrics::Artifact;
use crate::naming::{AccessShape, SyntheticContext, SyntheticKind};
use retrodex_common::{
    AccessFlags, ClassDef, CodeBuilder, Constant, FieldDef, FieldRef, HandleKind, Instruction, InvokeKind, MemberKey, MethodDef,
    MethodHandle, MethodProto, MethodRef, TypeRef, ValueKind,
};
use std::collections::HashSet;
use tracing::instrument;

/// Suffix of the tag class passed to constructor bridges
const CONSTRUCTOR_TAG_SUFFIX: &str = "-$$Nest$Constructor";

/// Rewrite private nest access in every body of the class
#[instrument(skip_all, fields(class = %work.class.name))]
pub fn run(ctx: &DesugarContext<'_>, work: &mut ClassWork) -> DesugarResult<bool> {
    if !ctx.config.desugar_nests || !ctx.requires(ConstructKind::NestBasedAccess) {
        return Ok(false);
    }
    let access = NestAccess {
        ctx,
        own: work.class.name.clone(),
        host: work.class.nest_host_or_self().clone(),
        own_private: work
            .class
            .methods
            .iter()
            .filter(|method| method.is_private() && !method.is_static() && !method.is_constructor())
            .map(MethodDef::key)
            .collect(),
    };

    let mut changed = false;
    for (_, code) in work.bodies_mut() {
        changed |= rewrite_instructions(code, |insn, _| access.rewrite(insn))?;
    }
    Ok(changed)
}

/// Whether `method` is a bridge synthesized by this pass
pub fn is_nest_bridge(method: &MethodDef) -> bool {
    if !method.flags.is_synthetic() {
        return false;
    }
    method.name.starts_with("-$$Nest$")
        || (method.is_constructor()
            && method
                .proto
                .params
                .last()
                .and_then(|param| param.class_name())
                .is_some_and(|tag| tag.as_str().ends_with(CONSTRUCTOR_TAG_SUFFIX)))
}

struct NestAccess<'c, 'a> {
    ctx: &'c DesugarContext<'a>,
    own: TypeRef,
    host: TypeRef,
    own_private: HashSet<MemberKey>,
}

impl<'c, 'a> NestAccess<'c, 'a> {
    fn rewrite(&self, insn: &Instruction) -> DesugarResult<Option<Vec<Instruction>>> {
        match insn {
            Instruction::Invoke { kind, method, .. } => self.rewrite_invoke(*kind, method),
            Instruction::GetField(field) => self.rewrite_field(field, AccessShape::InstanceGet),
            Instruction::PutField(field) => self.rewrite_field(field, AccessShape::InstancePut),
            Instruction::GetStatic(field) => self.rewrite_field(field, AccessShape::StaticGet),
            Instruction::PutStatic(field) => self.rewrite_field(field, AccessShape::StaticPut),
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

    fn rewrite_invoke(&self, kind: InvokeKind, method: &MethodRef) -> DesugarResult<Option<Vec<Instruction>>> {
        if method.owner == self.own {
            // Own private methods are never selected virtually
            if matches!(kind, InvokeKind::Virtual | InvokeKind::Interface) && self.own_private.contains(&method.key()) {
                let interface = kind == InvokeKind::Interface;
                return Ok(Some(vec![Instruction::invoke(InvokeKind::Special, method.clone(), interface)]));
            }
            return Ok(None);
        }
        let Some((owner, target)) = self.private_nestmate_method(method) else {
            return Ok(None);
        };
        if target.is_constructor() {
            let bridge = self.constructor_bridge(owner, target)?;
            return Ok(Some(vec![
                Instruction::Const(Constant::Null),
                Instruction::invoke(InvokeKind::Special, bridge, false),
            ]));
        }
        let (bridge, interface) = self.method_bridge(owner, target)?;
        Ok(Some(vec![Instruction::invoke(InvokeKind::Static, bridge, interface)]))
    }

    fn rewrite_handle(&self, handle: &MethodHandle) -> DesugarResult<Option<MethodHandle>> {
        if handle.kind == HandleKind::NewInvokeSpecial || handle.method.owner == self.own {
            return Ok(None);
        }
        let Some((owner, target)) = self.private_nestmate_method(&handle.method) else {
            return Ok(None);
        };
        let (bridge, interface) = self.method_bridge(owner, target)?;
        Ok(Some(MethodHandle::new(HandleKind::InvokeStatic, bridge, interface)))
    }

    fn rewrite_field(&self, field: &FieldRef, shape: AccessShape) -> DesugarResult<Option<Vec<Instruction>>> {
        if field.owner == self.own || !self.is_nestmate(&field.owner) {
            return Ok(None);
        }
        let Some((owner, def)) = self.ctx.app.declared_field(&field.owner, &field.name, &field.ty) else {
            return Ok(None);
        };
        if !def.flags.is_private() {
            return Ok(None);
        }
        let bridge = self.field_bridge(owner, def, shape)?;
        Ok(Some(vec![Instruction::invoke(InvokeKind::Static, bridge, owner.is_interface())]))
    }

    fn is_nestmate(&self, owner: &TypeRef) -> bool {
        self.ctx.app.nest_host(owner) == Some(&self.host)
    }

    /// Private method of another class in this nest
    fn private_nestmate_method(&self, method: &MethodRef) -> Option<(&'a ClassDef, &'a MethodDef)> {
        if !self.is_nestmate(&method.owner) {
            return None;
        }
        let (owner, target) = self.ctx.app.declared_method(&method.owner, &method.name, &method.proto)?;
        target.is_private().then_some((owner, target))
    }

    /// Bridge for a private method; returns the bridge and whether its holder is an interface
    fn method_bridge(&self, owner: &ClassDef, target: &MethodDef) -> DesugarResult<(MethodRef, bool)> {
        let ctx = self.ctx;
        if owner.is_interface() && relocation_role(ctx, target).is_some() {
            return Ok((ctx.companion_method(&owner.name, target)?, false));
        }

        let shape = if target.is_static() {
            AccessShape::StaticMethod
        } else {
            AccessShape::InstanceMethod
        };
        let context = SyntheticContext::of_member(owner.name.clone(), target.key());
        let name = ctx.registry.allocate(&context, SyntheticKind::NestBridge(shape))?;
        let proto = if target.is_static() {
            target.proto.clone()
        } else {
            target.proto.prepend(owner.name.as_value_type())
        };

        let mut body = CodeBuilder::for_method(&proto, true);
        body.load_params(&proto.params, 0);
        let invoke = if target.is_static() { InvokeKind::Static } else { InvokeKind::Special };
        body.invoke(invoke, target.reference(&owner.name), owner.is_interface())
            .ret(target.proto.return_kind());

        let bridge = MethodDef::new(name.as_str(), proto, bridge_flags(owner), body.build());
        let reference = bridge.reference(&owner.name);
        self.install(&owner.name, bridge);
        Ok((reference, owner.is_interface()))
    }

    fn field_bridge(&self, owner: &ClassDef, field: &FieldDef, shape: AccessShape) -> DesugarResult<MethodRef> {
        let context = SyntheticContext::of_member(owner.name.clone(), field.key());
        let name = self.ctx.registry.allocate(&context, SyntheticKind::NestBridge(shape))?;
        let reference = field.reference(&owner.name);
        let holder = owner.name.as_value_type();
        let (proto, access) = match shape {
            AccessShape::InstanceGet => (
                MethodProto::new(vec![holder], Some(field.ty.clone())),
                Instruction::GetField(reference),
            ),
            AccessShape::InstancePut => (MethodProto::new(vec![holder, field.ty.clone()], None), Instruction::PutField(reference)),
            AccessShape::StaticGet => (MethodProto::new(Vec::new(), Some(field.ty.clone())), Instruction::GetStatic(reference)),
            AccessShape::StaticPut => (MethodProto::new(vec![field.ty.clone()], None), Instruction::PutStatic(reference)),
            AccessShape::InstanceMethod | AccessShape::StaticMethod => {
                return Err(DesugarError::internal_error(format!(
                    "method access shape used for field {}",
                    field.name
                )));
            }
        };

        let mut body = CodeBuilder::for_method(&proto, true);
        body.load_params(&proto.params, 0).push(access).ret(proto.return_kind());
        let bridge = MethodDef::new(name.as_str(), proto, bridge_flags(owner), body.build());
        let reference = bridge.reference(&owner.name);
        self.install(&owner.name, bridge);
        Ok(reference)
    }

    /// Constructor taking an extra tag argument, callable from anywhere in the nest
    fn constructor_bridge(&self, owner: &ClassDef, target: &MethodDef) -> DesugarResult<MethodRef> {
        let ctx = self.ctx;
        let tag_context = SyntheticContext::of_type(owner.nest_host_or_self().clone());
        let tag = ctx.registry.allocate(&tag_context, SyntheticKind::NestConstructorClass)?.as_type();
        ctx.synthetics
            .add_class(ClassDef::class(tag.as_str()).with_flags(AccessFlags::FINAL | AccessFlags::SYNTHETIC))?;

        let proto = target.proto.append(tag.as_value_type());
        let mut body = CodeBuilder::for_method(&proto, false);
        body.load(ValueKind::Ref, 0)
            .load_params(&target.proto.params, 1)
            .invoke(InvokeKind::Special, target.reference(&owner.name), false)
            .ret(None);
        let bridge = MethodDef::new("<init>", proto, AccessFlags::SYNTHETIC, body.build());
        let reference = bridge.reference(&owner.name);
        self.install(&owner.name, bridge);
        Ok(reference)
    }

    fn install(&self, holder: &TypeRef, bridge: MethodDef) {
        if self.ctx.synthetics.add_bridge(holder, bridge) {
            self.ctx.metrics.record_artifact(Artifact::Bridge);
        }
    }
}

fn bridge_flags(owner: &ClassDef) -> AccessFlags {
    let flags = AccessFlags::STATIC | AccessFlags::SYNTHETIC;
    if owner.is_interface() { flags | AccessFlags::PUBLIC } else { flags }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrodex_common::ValueType;

    #[test]
    fn test_bridge_recognition() {
        let mut code = CodeBuilder::new(0);
        code.ret(None);
        let code = code.build();
        let bridge = MethodDef::new(
            "-$$Nest$smsecret",
            MethodProto::void(),
            AccessFlags::STATIC | AccessFlags::SYNTHETIC,
            code.clone(),
        );
        assert!(is_nest_bridge(&bridge));

        let tagged = MethodDef::new(
            "<init>",
            MethodProto::new(vec![ValueType::object("a/Outer-$$Nest$Constructor")], None),
            AccessFlags::SYNTHETIC,
            code.clone(),
        );
        assert!(is_nest_bridge(&tagged));

        let ordinary = MethodDef::new("-$$Nest$smsecret", MethodProto::void(), AccessFlags::STATIC, code);
        assert!(!is_nest_bridge(&ordinary));
    }
}
