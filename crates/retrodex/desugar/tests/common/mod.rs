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

//! Shared helpers for the desugaring integration tests
//!
//! Each scenario is a small program run twice on the reference VM: as
//! written, at a level supporting its constructs natively, and desugared, at
//! the minimum level the desugaring targeted.

#![allow(dead_code)]

use retrodex_common::{
    AccessFlags, ApiLevel, ClassDef, CodeBuilder, InvokeKind, MethodDef, MethodProto, MethodRef, Program, TypeRef, ValueKind, ValueType,
};
use retrodex_desugar::{DesugarConfig, DesugaredProgram, desugar};
use retrodex_vm::{Value, Vm, VmError, VmResult};

/// Install a test subscriber once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn int() -> Option<ValueType> {
    Some(ValueType::Int)
}

/// `(I...)I` with `params` int parameters
pub fn int_proto(params: usize) -> MethodProto {
    MethodProto::new(vec![ValueType::Int; params], int())
}

pub fn method(owner: &str, name: &str, descriptor: &str) -> MethodRef {
    MethodRef::parse(owner, name, descriptor).unwrap()
}

pub fn public_static(name: &str, proto: MethodProto, body: CodeBuilder) -> MethodDef {
    MethodDef::new(name, proto, AccessFlags::PUBLIC | AccessFlags::STATIC, body.build())
}

pub fn public_method(name: &str, proto: MethodProto, body: CodeBuilder) -> MethodDef {
    MethodDef::new(name, proto, AccessFlags::PUBLIC, body.build())
}

pub fn abstract_method(name: &str, proto: MethodProto) -> MethodDef {
    MethodDef::new_abstract(name, proto, AccessFlags::PUBLIC)
}

/// `int name() { return value; }` with the given flags
pub fn returns_int(name: &str, value: i32, flags: AccessFlags) -> MethodDef {
    let proto = int_proto(0);
    let mut body = CodeBuilder::for_method(&proto, flags.is_static());
    body.const_int(value).ret(Some(ValueKind::Int));
    MethodDef::new(name, proto, flags, body.build())
}

/// No-argument constructor delegating to `super_class`
pub fn constructor(super_class: &str) -> MethodDef {
    let mut body = CodeBuilder::new(1);
    body.load(ValueKind::Ref, 0)
        .invoke(InvokeKind::Special, MethodRef::new(TypeRef::new(super_class), "<init>", MethodProto::void()), false)
        .ret(None);
    MethodDef::new("<init>", MethodProto::void(), AccessFlags::PUBLIC, body.build())
}

/// Push a new, constructed instance of `class`
pub fn new_instance(body: &mut CodeBuilder, class: &str) {
    body.push(retrodex_common::Instruction::New(TypeRef::new(class)))
        .push(retrodex_common::Instruction::Dup)
        .invoke(InvokeKind::Special, MethodRef::new(TypeRef::new(class), "<init>", MethodProto::void()), false);
}

pub fn program(classes: Vec<ClassDef>) -> Program {
    Program::from_parts(classes, Vec::new(), Vec::new()).unwrap()
}

pub fn program_with_library(classes: Vec<ClassDef>, library: Vec<ClassDef>) -> Program {
    Program::from_parts(classes, Vec::new(), library).unwrap()
}

/// Run `Main.run` with the given descriptor and arguments
pub fn run(program: Program, api: ApiLevel, descriptor: &str, args: &[Value]) -> VmResult<Option<Value>> {
    Vm::new(program, api).invoke_static("Main", "run", descriptor, args)
}

pub fn desugar_for(program: &Program, min_api: ApiLevel) -> DesugaredProgram {
    desugar(program, DesugarConfig::for_api(min_api).with_parallelism(false)).unwrap()
}

/// The desugared program, ready to run
pub fn lower(program: &Program, min_api: ApiLevel) -> Program {
    desugar_for(program, min_api).into_program(program).unwrap()
}

/// Observable outcome of a run: the value, or the class of the throwable
pub fn outcome(result: VmResult<Option<Value>>) -> Result<Option<Value>, String> {
    result.map_err(|error| match error {
        VmError::Thrown { class, .. } => class,
        other => panic!("interpreter fault: {other}"),
    })
}

/// Run the original at `native_api` and its desugaring at `min_api`, and compare
pub fn assert_same_behaviour(program: &Program, native_api: ApiLevel, min_api: ApiLevel, descriptor: &str, args: &[Value]) -> Result<Option<Value>, String> {
    let expected = outcome(run(program.clone(), native_api, descriptor, args));
    let actual = outcome(run(lower(program, min_api), min_api, descriptor, args));
    assert_eq!(actual, expected, "desugared behaviour at {min_api} differs from native behaviour at {native_api}");
    expected
}

/// Whether a program is rejected or fails as written at `api`
pub fn fails_natively(program: &Program, api: ApiLevel, descriptor: &str, args: &[Value]) -> bool {
    run(program.clone(), api, descriptor, args).is_err()
}
