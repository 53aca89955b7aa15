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

//! Lambda and method reference desugaring
//!
//! Every capture site becomes a class implementing the functional interface.
//! A lambda without captures is a singleton held in a static `INSTANCE`
//! field; a capturing lambda stores its captures in final fields set by its
//! constructor. The generated classes are then desugared like program
//! classes, which bridges their access to private members of the host.

use super::{ClassWork, Cursor, rewrite_instructions};
use crate::context::DesugarContext;
use crate::error::{DesugarError, DesugarResult};
use crate::features::ConstructKind;
use crate::metrics::Artifact;
use crate::naming::{SyntheticContext, SyntheticKind};
use retrodex_common::{
    AccessFlags, ClassDef, CodeBuilder, FieldDef, FieldRef, HandleKind, Instruction, InvokeKind, LambdaCallSite, MemberKey, MethodDef,
    MethodHandle, MethodProto, MethodRef, TypeRef, ValueKind, ValueType,
};
use std::collections::HashMap;
use tracing::{debug, instrument};

const INSTANCE_FIELD: &str = "INSTANCE";
const SELF_FIELD: &str = "self$";

/// Progress of one capture site through desugaring
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LambdaPhase {
    Unprocessed,
    ClassAllocated,
    BodyRelocated,
    CallSiteRewritten,
}

/// A capture site and the class generated for it
#[derive(Debug)]
struct LambdaDesugaring {
    site: LambdaCallSite,
    phase: LambdaPhase,
    class_name: Option<TypeRef>,
}

impl LambdaDesugaring {
    fn new(site: LambdaCallSite) -> Self {
        Self {
            site,
            phase: LambdaPhase::Unprocessed,
            class_name: None,
        }
    }

    fn advance(&mut self, from: LambdaPhase, to: LambdaPhase) -> DesugarResult<()> {
        if self.phase != from {
            return Err(DesugarError::internal_error(format!(
                "lambda for {} is {:?}, expected {:?}",
                self.site.interface, self.phase, from
            )));
        }
        self.phase = to;
        Ok(())
    }

    fn class_name(&self) -> DesugarResult<&TypeRef> {
        self.class_name
            .as_ref()
            .ok_or_else(|| DesugarError::internal_error(format!("lambda for {} has no class yet", self.site.interface)))
    }

    /// Allocate the class name from the enclosing method and the site's ordinal in it
    fn allocate(&mut self, ctx: &DesugarContext<'_>, host: &TypeRef, method: &MemberKey, ordinal: u32) -> DesugarResult<()> {
        self.advance(LambdaPhase::Unprocessed, LambdaPhase::ClassAllocated)?;
        let context = SyntheticContext::of_member(host.clone(), method.clone()).with_ordinal(ordinal);
        self.class_name = Some(ctx.registry.allocate(&context, SyntheticKind::LambdaClass)?.as_type());
        Ok(())
    }

    /// Build the lambda class around the implementation method
    fn build_class(&mut self, host: &mut ClassDef) -> DesugarResult<ClassDef> {
        self.advance(LambdaPhase::ClassAllocated, LambdaPhase::BodyRelocated)?;
        let name = self.class_name()?.clone();
        let site = &self.site;

        let mut class = ClassDef::class(name.as_str()).with_flags(AccessFlags::FINAL | AccessFlags::SYNTHETIC);
        class.interfaces.push(site.interface.clone());
        class.interfaces.extend(site.markers.iter().cloned());
        class.nest_host = Some(host.nest_host_or_self().clone());
        class.source_file = host.source_file.clone();

        for (index, capture) in site.captures.iter().enumerate() {
            class
                .fields
                .push(FieldDef::new(capture_field(index), capture.clone(), AccessFlags::PRIVATE | AccessFlags::FINAL));
        }
        if site.self_referencing {
            class.fields.push(FieldDef::new(SELF_FIELD, site.interface.as_value_type(), AccessFlags::PRIVATE));
        }
        if site.is_stateless() {
            class.fields.push(FieldDef::new(
                INSTANCE_FIELD,
                name.as_value_type(),
                AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::FINAL | AccessFlags::SYNTHETIC,
            ));
            class.add_method(class_initializer(&name))?;
        }
        class.add_method(constructor(&name, site))?;

        let invocation = implementation_invocation(host, &site.implementation)?;
        class.add_method(abstract_method(&name, site, &invocation)?)?;
        for bridge in &site.bridges {
            if bridge != &site.erased_proto {
                class.add_method(bridge_method(&name, site, bridge))?;
            }
        }
        Ok(class)
    }

    /// Instructions replacing the capture site
    fn call_site(&mut self, cursor: &mut Cursor) -> DesugarResult<Vec<Instruction>> {
        // A site shared by several instructions is rewritten once per instruction
        if self.phase != LambdaPhase::CallSiteRewritten {
            self.advance(LambdaPhase::BodyRelocated, LambdaPhase::CallSiteRewritten)?;
        }
        let name = self.class_name()?.clone();
        if self.site.is_stateless() {
            return Ok(vec![Instruction::GetStatic(FieldRef::new(
                name.clone(),
                INSTANCE_FIELD,
                name.as_value_type(),
            ))]);
        }

        // Captures are on the stack, last on top
        let slots = self
            .site
            .captures
            .iter()
            .map(|_| cursor.fresh_local())
            .collect::<DesugarResult<Vec<u16>>>()?;
        let mut insns = Vec::new();
        for (capture, slot) in self.site.captures.iter().zip(&slots).rev() {
            insns.push(Instruction::Store {
                kind: capture.kind(),
                index: *slot,
            });
        }
        insns.push(Instruction::New(name.clone()));
        insns.push(Instruction::Dup);
        for (capture, slot) in self.site.captures.iter().zip(&slots) {
            insns.push(Instruction::Load {
                kind: capture.kind(),
                index: *slot,
            });
        }
        insns.push(Instruction::invoke(
            InvokeKind::Special,
            MethodRef::new(name, "<init>", MethodProto::new(self.site.captures.clone(), None)),
            false,
        ));
        Ok(insns)
    }
}

/// Replace every capture site of the class
#[instrument(skip_all, fields(class = %work.class.name))]
pub fn run(ctx: &DesugarContext<'_>, work: &mut ClassWork) -> DesugarResult<bool> {
    if !ctx.config.desugar_lambdas || !ctx.requires(ConstructKind::LambdaExpressions) {
        return Ok(false);
    }
    let host = work.class.name.clone();
    let mut host_shape = work.class.clone();
    let mut lambdas: Vec<LambdaDesugaring> = Vec::new();
    let mut by_site: HashMap<LambdaCallSite, usize> = HashMap::new();
    let mut created = Vec::new();
    let mut changed = false;

    for (reference, code) in work.bodies_mut() {
        let method = reference.key();
        let mut ordinal = 0u32;
        changed |= rewrite_instructions(code, |insn, cursor| {
            let Instruction::InvokeDynamic(site) = insn else {
                return Ok(None);
            };
            let index = match by_site.get(site.as_ref()) {
                Some(&index) => index,
                None => {
                    let mut lambda = LambdaDesugaring::new((**site).clone());
                    lambda.allocate(ctx, &host, &method, ordinal)?;
                    ordinal += 1;
                    let class = lambda.build_class(&mut host_shape)?;
                    debug!(host = %host, lambda = %class.name, interface = %site.interface, "synthesized lambda class");
                    ctx.metrics.record_artifact(Artifact::LambdaClass);
                    created.push(class);
                    by_site.insert((**site).clone(), lambdas.len());
                    lambdas.push(lambda);
                    lambdas.len() - 1
                }
            };
            lambdas[index].call_site(cursor).map(Some)
        })?;
    }

    // Super accessors were added to the host while building lambda classes
    for method in host_shape.methods.iter().filter(|method| is_super_accessor(method)) {
        if work.class.method(&method.name, &method.proto).is_none() {
            work.class.methods.push(method.clone());
        }
    }
    // Lambda classes join the host's nest on both sides
    let nest_host = work.class.nest_host_or_self().clone();
    for class in &created {
        if nest_host == work.class.name {
            if !work.class.nest_members.contains(&class.name) {
                work.class.nest_members.push(class.name.clone());
            }
        } else {
            ctx.synthetics.add_nest_member(&nest_host, class.name.clone());
        }
    }
    work.lambda_classes.extend(created);
    Ok(changed)
}

fn is_super_accessor(method: &MethodDef) -> bool {
    method.flags.is_synthetic() && method.name.starts_with("-$$Lambda$super$")
}

fn capture_field(index: usize) -> String {
    format!("f${}", index)
}

fn object_constructor() -> MethodRef {
    MethodRef::new(TypeRef::object(), "<init>", MethodProto::void())
}

fn class_initializer(name: &TypeRef) -> MethodDef {
    let mut body = CodeBuilder::new(0);
    body.push(Instruction::New(name.clone()))
        .push(Instruction::Dup)
        .invoke(InvokeKind::Special, MethodRef::new(name.clone(), "<init>", MethodProto::void()), false)
        .push(Instruction::PutStatic(FieldRef::new(name.clone(), INSTANCE_FIELD, name.as_value_type())))
        .ret(None);
    MethodDef::new("<clinit>", MethodProto::void(), AccessFlags::STATIC | AccessFlags::SYNTHETIC, body.build())
}

fn constructor(name: &TypeRef, site: &LambdaCallSite) -> MethodDef {
    let proto = MethodProto::new(site.captures.clone(), None);
    let mut body = CodeBuilder::for_method(&proto, false);
    body.load(ValueKind::Ref, 0).invoke(InvokeKind::Special, object_constructor(), false);
    for (index, capture) in site.captures.iter().enumerate() {
        body.load(ValueKind::Ref, 0)
            .load(capture.kind(), index as u16 + 1)
            .push(Instruction::PutField(FieldRef::new(name.clone(), capture_field(index), capture.clone())));
    }
    if site.self_referencing {
        body.load(ValueKind::Ref, 0)
            .load(ValueKind::Ref, 0)
            .push(Instruction::PutField(FieldRef::new(name.clone(), SELF_FIELD, site.interface.as_value_type())));
    }
    body.ret(None);
    let visibility = if site.is_stateless() { AccessFlags::PRIVATE } else { AccessFlags::PUBLIC };
    MethodDef::new("<init>", proto, visibility | AccessFlags::SYNTHETIC, body.build())
}

/// How the generated class calls the implementation method
struct Invocation {
    kind: InvokeKind,
    method: MethodRef,
    interface: bool,
    /// Argument types expected by the invocation, receiver first
    params: Vec<ValueType>,
    /// Type left on the stack, if any
    result: Option<ValueType>,
    constructs: bool,
}

fn implementation_invocation(host: &mut ClassDef, handle: &MethodHandle) -> DesugarResult<Invocation> {
    let method = &handle.method;
    let with_receiver = || method.proto.prepend(method.owner.as_value_type()).params;
    let invocation = match handle.kind {
        HandleKind::InvokeStatic => Invocation {
            kind: InvokeKind::Static,
            method: method.clone(),
            interface: handle.interface,
            params: method.proto.params.clone(),
            result: method.proto.ret.clone(),
            constructs: false,
        },
        HandleKind::InvokeVirtual | HandleKind::InvokeInterface => Invocation {
            kind: if handle.kind == HandleKind::InvokeInterface {
                InvokeKind::Interface
            } else {
                InvokeKind::Virtual
            },
            method: method.clone(),
            interface: handle.interface,
            params: with_receiver(),
            result: method.proto.ret.clone(),
            constructs: false,
        },
        HandleKind::InvokeSpecial => {
            let private = method.owner == host.name && host.method(&method.name, &method.proto).is_some_and(MethodDef::is_private);
            if private {
                // Called virtually from the lambda class; the nest pass bridges it non-virtually
                Invocation {
                    kind: if handle.interface { InvokeKind::Interface } else { InvokeKind::Virtual },
                    method: method.clone(),
                    interface: handle.interface,
                    params: with_receiver(),
                    result: method.proto.ret.clone(),
                    constructs: false,
                }
            } else {
                Invocation {
                    kind: if host.is_interface() { InvokeKind::Interface } else { InvokeKind::Virtual },
                    method: super_accessor(host, handle)?,
                    interface: host.is_interface(),
                    params: method.proto.prepend(host.name.as_value_type()).params,
                    result: method.proto.ret.clone(),
                    constructs: false,
                }
            }
        }
        HandleKind::NewInvokeSpecial => Invocation {
            kind: InvokeKind::Special,
            method: method.clone(),
            interface: false,
            params: method.proto.params.clone(),
            result: Some(method.owner.as_value_type()),
            constructs: true,
        },
    };
    Ok(invocation)
}

/// Instance method on the host performing the non-virtual super call of `handle`
fn super_accessor(host: &mut ClassDef, handle: &MethodHandle) -> DesugarResult<MethodRef> {
    let method = &handle.method;
    let name = format!("-$$Lambda$super${}", method.name);
    if host.method(&name, &method.proto).is_none() {
        let mut body = CodeBuilder::for_method(&method.proto, false);
        body.load(ValueKind::Ref, 0)
            .load_params(&method.proto.params, 1)
            .invoke(InvokeKind::Special, method.clone(), handle.interface)
            .ret(method.proto.return_kind());
        let mut flags = AccessFlags::SYNTHETIC;
        if host.is_interface() {
            flags |= AccessFlags::PUBLIC;
        }
        host.add_method(MethodDef::new(&name, method.proto.clone(), flags, body.build()))?;
    }
    Ok(MethodRef::new(host.name.clone(), name, method.proto.clone()))
}

/// The single abstract method, calling the implementation with captures then arguments
fn abstract_method(name: &TypeRef, site: &LambdaCallSite, invocation: &Invocation) -> DesugarResult<MethodDef> {
    let proto = &site.erased_proto;
    let described = || format!("{}.{}{}", name, site.method_name, proto);
    let leading = site.captures.len() + usize::from(site.self_referencing);
    if invocation.params.len() != leading + proto.params.len() {
        return Err(DesugarError::malformed_code(
            described(),
            format!(
                "implementation {} takes {} arguments, lambda supplies {}",
                invocation.method,
                invocation.params.len(),
                leading + proto.params.len()
            ),
        ));
    }

    let mut body = CodeBuilder::for_method(proto, false);
    if invocation.constructs {
        body.push(Instruction::New(invocation.method.owner.clone())).push(Instruction::Dup);
    }
    if site.self_referencing {
        body.load(ValueKind::Ref, 0)
            .push(Instruction::GetField(FieldRef::new(name.clone(), SELF_FIELD, site.interface.as_value_type())));
    }
    for (index, capture) in site.captures.iter().enumerate() {
        body.load(ValueKind::Ref, 0)
            .push(Instruction::GetField(FieldRef::new(name.clone(), capture_field(index), capture.clone())));
    }
    for (offset, (param, expected)) in proto.params.iter().zip(&invocation.params[leading..]).enumerate() {
        if param.kind() != expected.kind() {
            return Err(DesugarError::malformed_code(
                described(),
                format!("argument {} of type {} cannot be passed as {}", offset, param, expected),
            ));
        }
        body.load(param.kind(), offset as u16 + 1);
        if expected.is_reference() && expected != param && expected.class_name() != Some(&TypeRef::object()) {
            body.push(Instruction::CheckCast(reference_class(expected)));
        }
    }
    body.invoke(invocation.kind, invocation.method.clone(), invocation.interface);

    match (&proto.ret, &invocation.result) {
        (None, None) => {
            body.ret(None);
        }
        (None, Some(_)) => {
            body.push(Instruction::Pop).ret(None);
        }
        (Some(expected), Some(actual)) if expected.kind() == actual.kind() => {
            body.ret(Some(expected.kind()));
        }
        (Some(expected), actual) => {
            return Err(DesugarError::malformed_code(
                described(),
                format!(
                    "implementation returns {}, lambda must return {}",
                    actual.as_ref().map_or_else(|| "void".to_string(), ToString::to_string),
                    expected
                ),
            ));
        }
    }
    Ok(MethodDef::new(
        &*site.method_name,
        proto.clone(),
        AccessFlags::PUBLIC | AccessFlags::FINAL,
        body.build(),
    ))
}

/// Additional erased signature forwarding to the abstract method
fn bridge_method(name: &TypeRef, site: &LambdaCallSite, bridge: &MethodProto) -> MethodDef {
    let target = &site.erased_proto;
    let mut body = CodeBuilder::for_method(bridge, false);
    body.load(ValueKind::Ref, 0);
    for (offset, (param, expected)) in bridge.params.iter().zip(&target.params).enumerate() {
        body.load(param.kind(), offset as u16 + 1);
        if expected.is_reference() && expected != param && expected.class_name() != Some(&TypeRef::object()) {
            body.push(Instruction::CheckCast(reference_class(expected)));
        }
    }
    body.invoke(InvokeKind::Virtual, MethodRef::new(name.clone(), &*site.method_name, target.clone()), false);
    match (&bridge.ret, &target.ret) {
        (None, Some(_)) => body.push(Instruction::Pop).ret(None),
        (ret, _) => body.ret(ret.as_ref().map(ValueType::kind)),
    };
    MethodDef::new(
        &*site.method_name,
        bridge.clone(),
        AccessFlags::PUBLIC | AccessFlags::SYNTHETIC | AccessFlags::BRIDGE,
        body.build(),
    )
}

/// Class named by a checkcast to `ty`; array types use their descriptor
fn reference_class(ty: &ValueType) -> TypeRef {
    match ty.class_name() {
        Some(class) => class.clone(),
        None => TypeRef::new(ty.descriptor()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(captures: Vec<ValueType>) -> LambdaCallSite {
        let mut proto_params = captures.clone();
        proto_params.push(ValueType::Int);
        LambdaCallSite::new(
            TypeRef::new("a/IntOp"),
            "apply",
            "(I)I".parse().unwrap(),
            captures,
            MethodHandle::new(
                HandleKind::InvokeStatic,
                MethodRef::new(TypeRef::new("a/Host"), "lambda$0", MethodProto::new(proto_params, Some(ValueType::Int))),
                false,
            ),
        )
    }

    fn allocated(site: LambdaCallSite) -> LambdaDesugaring {
        let mut lambda = LambdaDesugaring::new(site);
        lambda.phase = LambdaPhase::ClassAllocated;
        lambda.class_name = Some(TypeRef::new("a/Host$$ExternalSyntheticLambda$0"));
        lambda
    }

    #[test]
    fn test_stateless_lambda_is_singleton() {
        let mut host = ClassDef::class("a/Host");
        let mut lambda = allocated(site(Vec::new()));
        let class = lambda.build_class(&mut host).unwrap();
        assert!(class.field(INSTANCE_FIELD, &class.name.as_value_type()).is_some());
        assert!(class.method("<clinit>", &MethodProto::void()).is_some());
        let ctor = class.method("<init>", &MethodProto::void()).unwrap();
        assert!(ctor.is_private());

        let mut cursor = Cursor { line: None, max_locals: 0 };
        let insns = lambda.call_site(&mut cursor).unwrap();
        assert!(matches!(insns.as_slice(), [Instruction::GetStatic(_)]));
    }

    #[test]
    fn test_stateful_lambda_constructs_per_site() {
        let mut host = ClassDef::class("a/Host");
        let mut lambda = allocated(site(vec![ValueType::Int, ValueType::object("java/lang/String")]));
        let class = lambda.build_class(&mut host).unwrap();
        assert_eq!(class.fields.len(), 2);
        let sam = class.method("apply", &"(I)I".parse().unwrap()).unwrap();
        assert!(!sam.flags.is_synthetic());
        assert!(!sam.flags.is_bridge());

        let mut cursor = Cursor { line: None, max_locals: 3 };
        let insns = lambda.call_site(&mut cursor).unwrap();
        assert_eq!(insns.len(), 2 + 2 + 2 + 1);
        assert_eq!(insns[0], Instruction::Store { kind: ValueKind::Ref, index: 4 });
        assert_eq!(cursor.max_locals, 5);
    }

    #[test]
    fn test_phases_are_ordered() {
        let mut lambda = LambdaDesugaring::new(site(Vec::new()));
        let mut cursor = Cursor { line: None, max_locals: 0 };
        assert!(lambda.call_site(&mut cursor).is_err());
    }

    #[test]
    fn test_boxing_mismatch_is_malformed() {
        let mut host = ClassDef::class("a/Host");
        let mut broken = site(Vec::new());
        broken.implementation.method.proto = "(Ljava/lang/Integer;)I".parse().unwrap();
        let mut lambda = allocated(broken);
        assert!(matches!(lambda.build_class(&mut host), Err(DesugarError::MalformedCode { .. })));
    }

    #[test]
    fn test_super_reference_goes_through_accessor() {
        let mut host = ClassDef::class("a/Host").with_super("a/Base");
        let handle = MethodHandle::new(
            HandleKind::InvokeSpecial,
            MethodRef::parse("a/Base", "describe", "()Ljava/lang/String;").unwrap(),
            false,
        );
        let invocation = implementation_invocation(&mut host, &handle).unwrap();
        assert_eq!(&*invocation.method.name, "-$$Lambda$super$describe");
        assert_eq!(invocation.method.owner, TypeRef::new("a/Host"));
        assert!(host.method("-$$Lambda$super$describe", &"()Ljava/lang/String;".parse().unwrap()).is_some());
    }
}
