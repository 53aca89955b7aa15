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

mod common;

use common::*;
use retrodex_common::{
    AccessFlags, ApiLevel, BinaryOp, ClassDef, CodeBuilder, FieldDef, FieldRef, Instruction, InvokeKind, MethodDef, MethodProto, NumKind,
    Program, TypeRef, ValueKind, ValueType,
};
use retrodex_vm::Value;

const OUTER: &str = "app/Outer";
const INNER: &str = "app/Outer$Inner";

fn count_field() -> FieldRef {
    FieldRef::new(TypeRef::new(OUTER), "count", ValueType::Int)
}

/// `class Outer { private int count; private Outer() {} private static int secret() { return 11; } }`
fn outer() -> ClassDef {
    let mut init = CodeBuilder::new(1);
    init.load(ValueKind::Ref, 0)
        .invoke(InvokeKind::Special, method("java/lang/Object", "<init>", "()V"), false)
        .ret(None);
    ClassDef::class(OUTER)
        .with_nest_member(INNER)
        .with_field(FieldDef::new("count", ValueType::Int, AccessFlags::PRIVATE))
        .with_method(MethodDef::new("<init>", MethodProto::void(), AccessFlags::PRIVATE, init.build()))
        .with_method(returns_int("secret", 11, AccessFlags::PRIVATE | AccessFlags::STATIC))
}

/// `static int peek() { Outer o = new Outer(); o.count += 5; return o.count + Outer.secret(); }`
fn inner() -> ClassDef {
    let proto = int_proto(0);
    let mut body = CodeBuilder::new(0);
    let outer = body.new_local();
    new_instance(&mut body, OUTER);
    body.store(ValueKind::Ref, outer)
        .load(ValueKind::Ref, outer)
        .load(ValueKind::Ref, outer)
        .push(Instruction::GetField(count_field()))
        .const_int(5)
        .binary(BinaryOp::Add, NumKind::Int)
        .push(Instruction::PutField(count_field()))
        .load(ValueKind::Ref, outer)
        .push(Instruction::GetField(count_field()))
        .invoke(InvokeKind::Static, method(OUTER, "secret", "()I"), false)
        .binary(BinaryOp::Add, NumKind::Int)
        .ret(Some(ValueKind::Int));
    ClassDef::class(INNER)
        .with_nest_host(OUTER)
        .with_method(public_static("peek", proto, body))
}

fn nest_program() -> Program {
    let mut body = CodeBuilder::new(0);
    body.invoke(InvokeKind::Static, method(INNER, "peek", "()I"), false)
        .ret(Some(ValueKind::Int));
    program(vec![
        outer(),
        inner(),
        ClassDef::class("Main").with_method(public_static("run", int_proto(0), body)),
    ])
}

#[test]
fn test_private_nest_access_is_bridged() {
    init_tracing();
    let program = nest_program();
    assert!(fails_natively(&program, ApiLevel::U, "()I", &[]));
    let result = assert_same_behaviour(&program, ApiLevel::MASTER, ApiLevel::U, "()I", &[]);
    assert_eq!(result, Ok(Some(Value::Int(16))));
}

#[test]
fn test_bridges_land_on_the_holder() {
    let output = desugar_for(&nest_program(), ApiLevel::U);
    let outer = output.class(OUTER).unwrap();
    let holder = ValueType::object(OUTER);
    let get = outer
        .method("-$$Nest$fgetcount", &MethodProto::new(vec![holder.clone()], Some(ValueType::Int)))
        .unwrap();
    assert!(get.is_static() && get.flags.is_synthetic() && !get.is_private());
    assert!(outer.method("-$$Nest$fputcount", &MethodProto::new(vec![holder, ValueType::Int], None)).is_some());
    assert!(outer.method("-$$Nest$smsecret", &int_proto(0)).is_some());

    // The private constructor is reached through a tagged constructor
    let tag = ValueType::object("app/Outer-$$Nest$Constructor");
    assert!(outer.method("<init>", &MethodProto::new(vec![tag], None)).is_some());
    assert!(output.class("app/Outer-$$Nest$Constructor").is_some());
    assert_eq!(output.metrics().artifacts.bridges, 4);
}

#[test]
fn test_native_nests_untouched() {
    let program = nest_program();
    let output = desugar_for(&program, ApiLevel::MASTER);
    assert_eq!(output.len(), program.len());
    assert_eq!(output.class(INNER), program.program_class(&INNER.into()));
    assert_eq!(output.metrics().artifacts.bridges, 0);
}

/// `class Base { private int id() { return 1; } public int call() { return id(); } }`
/// with `id` invoked virtually, and `class Sub extends Base { public int id() { return 2; } }`
fn shadowed_private_program() -> Program {
    let proto = int_proto(0);
    let mut call = CodeBuilder::for_method(&proto, false);
    call.load(ValueKind::Ref, 0)
        .invoke(InvokeKind::Virtual, method("app/Base", "id", "()I"), false)
        .ret(Some(ValueKind::Int));
    let base = ClassDef::class("app/Base")
        .with_method(constructor("java/lang/Object"))
        .with_method(returns_int("id", 1, AccessFlags::PRIVATE))
        .with_method(public_method("call", proto.clone(), call));
    let sub = ClassDef::class("app/Sub")
        .with_super("app/Base")
        .with_method(constructor("app/Base"))
        .with_method(returns_int("id", 2, AccessFlags::PUBLIC));

    let mut body = CodeBuilder::new(0);
    new_instance(&mut body, "app/Sub");
    body.invoke(InvokeKind::Virtual, method("app/Base", "call", "()I"), false)
        .ret(Some(ValueKind::Int));
    program(vec![base, sub, ClassDef::class("Main").with_method(public_static("run", proto, body))])
}

#[test]
fn test_private_methods_stay_non_virtual() {
    let program = shadowed_private_program();
    // Old runtimes select the override when a private method is invoked virtually
    assert_eq!(run(program.clone(), ApiLevel::B, "()I", &[]), Ok(Some(Value::Int(2))));
    let result = assert_same_behaviour(&program, ApiLevel::MASTER, ApiLevel::B, "()I", &[]);
    assert_eq!(result, Ok(Some(Value::Int(1))));

    let output = desugar_for(&program, ApiLevel::B);
    let call = output.class("app/Base").unwrap().method("call", &int_proto(0)).unwrap();
    let code = call.code.as_ref().unwrap();
    assert!(code.instructions.iter().any(|insn| matches!(
        insn,
        Instruction::Invoke {
            kind: InvokeKind::Special,
            ..
        }
    )));
}
