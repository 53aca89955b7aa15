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

use proptest::prelude::*;
use retrodex_common::{
    AccessFlags, ApiLevel, BinaryOp, ClassDef, CodeBuilder, Condition, Instruction, InvokeKind, MethodDef, MethodProto, MethodRef, NumKind, Program,
    TypeRef, ValueKind, ValueType,
};
use retrodex_vm::{Value, Vm, VmError};

fn static_method(name: &str, proto: MethodProto, body: CodeBuilder) -> MethodDef {
    MethodDef::new(name, proto, AccessFlags::PUBLIC | AccessFlags::STATIC, body.build())
}

fn vm_for(class: ClassDef, api: ApiLevel) -> Vm {
    let program = Program::from_parts(vec![class], Vec::new(), Vec::new()).unwrap();
    Vm::new(program, api)
}

fn long_shift_vm(op: BinaryOp) -> Vm {
    let proto = MethodProto::new(vec![ValueType::Long, ValueType::Int], Some(ValueType::Long));
    let mut body = CodeBuilder::for_method(&proto, true);
    body.load(ValueKind::Long, 0)
        .load(ValueKind::Int, 1)
        .binary(op, NumKind::Long)
        .ret(Some(ValueKind::Long));
    vm_for(ClassDef::class("Ops").with_method(static_method("shift", proto, body)), ApiLevel::B)
}

proptest! {
    #[test]
    fn test_long_shifts_mask_count(value in any::<i64>(), count in any::<i32>()) {
        let expected = [
            (BinaryOp::Shl, value.wrapping_shl(count as u32 & 63)),
            (BinaryOp::Shr, value >> (count as u32 & 63)),
            (BinaryOp::Ushr, ((value as u64) >> (count as u32 & 63)) as i64),
        ];
        for (op, result) in expected {
            let mut vm = long_shift_vm(op);
            let actual = vm.invoke_static("Ops", "shift", "(JI)J", &[Value::Long(value), Value::Int(count)]).unwrap();
            prop_assert_eq!(actual, Some(Value::Long(result)));
        }
    }

    #[test]
    fn test_int_remainder_follows_dividend_sign(lhs in any::<i32>(), rhs in any::<i32>().prop_filter("non-zero", |v| *v != 0)) {
        let proto = MethodProto::new(vec![ValueType::Int, ValueType::Int], Some(ValueType::Int));
        let mut body = CodeBuilder::for_method(&proto, true);
        body.load(ValueKind::Int, 0)
            .load(ValueKind::Int, 1)
            .binary(BinaryOp::Rem, NumKind::Int)
            .ret(Some(ValueKind::Int));
        let mut vm = vm_for(ClassDef::class("Ops").with_method(static_method("rem", proto, body)), ApiLevel::B);
        let actual = vm.invoke_static("Ops", "rem", "(II)I", &[Value::Int(lhs), Value::Int(rhs)]).unwrap();
        prop_assert_eq!(actual, Some(Value::Int(lhs.wrapping_rem(rhs))));
    }
}

#[test]
fn test_thrown_exception_keeps_message() {
    let mut body = CodeBuilder::new(0);
    body.throw_new("java/lang/IllegalStateException", Some("boom"));
    let mut vm = vm_for(ClassDef::class("Main").with_method(static_method("run", MethodProto::void(), body)), ApiLevel::B);
    let error = vm.invoke_static("Main", "run", "()V", &[]).unwrap_err();
    assert_eq!(error, VmError::thrown("java/lang/IllegalStateException", "boom"));
    assert_eq!(error.to_string(), "java/lang/IllegalStateException: boom");
}

#[test]
fn test_null_receiver_raises_npe() {
    let mut body = CodeBuilder::new(0);
    body.const_null()
        .invoke(InvokeKind::Virtual, MethodRef::parse("java/lang/Object", "hashCode", "()I").unwrap(), false)
        .ret(Some(ValueKind::Int));
    let proto = MethodProto::new(Vec::new(), Some(ValueType::Int));
    let mut vm = vm_for(ClassDef::class("Main").with_method(static_method("run", proto, body)), ApiLevel::B);
    let error = vm.invoke_static("Main", "run", "()I", &[]).unwrap_err();
    assert!(error.is_thrown("java/lang/NullPointerException"));
}

#[test]
fn test_string_equality_and_branches() {
    // run(s) = "abc".equals(s) ? 1 : 0
    let proto = MethodProto::new(vec![ValueType::object("java/lang/String")], Some(ValueType::Int));
    let mut body = CodeBuilder::for_method(&proto, true);
    let no = body.new_label();
    body.const_string("abc")
        .load(ValueKind::Ref, 0)
        .invoke(
            InvokeKind::Virtual,
            MethodRef::parse("java/lang/Object", "equals", "(Ljava/lang/Object;)Z").unwrap(),
            false,
        )
        .push(Instruction::If { cond: Condition::Eq, target: no })
        .const_int(1)
        .ret(Some(ValueKind::Int))
        .mark(no)
        .const_int(0)
        .ret(Some(ValueKind::Int));
    let mut vm = vm_for(ClassDef::class("Main").with_method(static_method("run", proto, body)), ApiLevel::B);
    let same = vm.string("abc");
    let other = vm.string("abd");
    assert_eq!(vm.invoke_static("Main", "run", "(Ljava/lang/String;)I", &[same]).unwrap(), Some(Value::Int(1)));
    assert_eq!(vm.invoke_static("Main", "run", "(Ljava/lang/String;)I", &[other]).unwrap(), Some(Value::Int(0)));
}

#[test]
fn test_instanceof_tolerates_unknown_interfaces() {
    let proto = MethodProto::new(Vec::new(), Some(ValueType::Int));
    let mut body = CodeBuilder::new(0);
    body.push(Instruction::New(TypeRef::new("Main")))
        .push(Instruction::InstanceOf(TypeRef::new("j$/util/Missing")))
        .ret(Some(ValueKind::Int));
    let class = ClassDef::class("Main").implementing("j$/util/Missing").with_method(static_method("run", proto, body));
    let mut vm = vm_for(class, ApiLevel::B);
    assert_eq!(vm.invoke_static("Main", "run", "()I", &[]).unwrap(), Some(Value::Int(1)));
}

#[test]
fn test_unbounded_recursion_overflows() {
    let proto = MethodProto::void();
    let mut body = CodeBuilder::new(0);
    body.invoke(InvokeKind::Static, MethodRef::new(TypeRef::new("Main"), "run", MethodProto::void()), false)
        .ret(None);
    let mut vm = vm_for(ClassDef::class("Main").with_method(static_method("run", proto, body)), ApiLevel::B);
    let error = vm.invoke_static("Main", "run", "()V", &[]).unwrap_err();
    assert!(error.is_thrown("java/lang/StackOverflowError"));
}
