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

//! Emulated library interfaces: a default method `Coll.twice()` the old
//! platform lacks is provided by the `j$` emulation library instead.

mod common;

use common::*;
use retrodex_common::{AccessFlags, ApiLevel, BinaryOp, ClassDef, CodeBuilder, InvokeKind, NumKind, Program, TypeRef, ValueKind, ValueType};
use retrodex_desugar::{DesugarConfig, DesugaredProgram, EmulatedInterface, EmulatedMethod, EmulatedOverride, desugar};
use retrodex_vm::Value;

const COLL: &str = "java/util/Coll";

/// `return size() * 2;` with the receiver in slot 0, called through `Coll`
fn doubled_size(body: &mut CodeBuilder) {
    body.load(ValueKind::Ref, 0)
        .invoke(InvokeKind::Interface, method(COLL, "size", "()I"), true)
        .const_int(2)
        .binary(BinaryOp::Mul, NumKind::Int)
        .ret(Some(ValueKind::Int));
}

/// The platform interface; only newer platforms declare the default
fn coll(with_default: bool) -> ClassDef {
    let interface = ClassDef::interface(COLL).with_method(abstract_method("size", int_proto(0)));
    if !with_default {
        return interface;
    }
    let mut body = CodeBuilder::for_method(&int_proto(0), false);
    doubled_size(&mut body);
    interface.with_method(public_method("twice", int_proto(0), body))
}

/// Library classes shared by every platform level, emulation library included
fn library(with_default: bool) -> Vec<ClassDef> {
    let coll_value = ValueType::object(COLL);
    let companion_proto = int_proto(0).prepend(coll_value);
    let mut companion_body = CodeBuilder::for_method(&companion_proto, true);
    doubled_size(&mut companion_body);

    let list_value = ValueType::object("java/util/LibList");
    let override_proto = int_proto(0).prepend(list_value);
    let mut override_body = CodeBuilder::for_method(&override_proto, true);
    override_body.const_int(40).ret(Some(ValueKind::Int));

    let mut list = ClassDef::class("java/util/LibList")
        .implementing(COLL)
        .with_method(returns_int("size", 4, AccessFlags::PUBLIC));
    if with_default {
        list = list.with_method(returns_int("twice", 40, AccessFlags::PUBLIC));
    }
    vec![
        coll(with_default),
        list,
        ClassDef::class("java/util/Bag")
            .implementing(COLL)
            .with_method(returns_int("size", 5, AccessFlags::PUBLIC)),
        ClassDef::class("j$/util/Coll$-CC").with_method(public_static("twice", companion_proto, companion_body)),
        ClassDef::class("j$/util/LibListTwice").with_method(public_static("twice", override_proto, override_body)),
    ]
}

fn emulation() -> EmulatedInterface {
    EmulatedInterface::new(COLL)
        .with_method(EmulatedMethod::new("twice", "()I", ApiLevel::N))
        .with_override(EmulatedOverride {
            subtype: TypeRef::new("java/util/LibList"),
            method: "twice".to_string(),
            descriptor: "()I".to_string(),
            implementation: TypeRef::new("j$/util/LibListTwice"),
        })
}

fn config(min_api: ApiLevel) -> DesugarConfig {
    DesugarConfig::for_api(min_api)
        .with_emulated_interface(emulation())
        .with_parallelism(false)
}

/// `run()` combining `twice()` on each receiver class, most significant first
fn program_for(receivers: &[&str], program_classes: Vec<ClassDef>, with_default: bool) -> Program {
    let mut body = CodeBuilder::new(0);
    body.const_int(0);
    for receiver in receivers {
        body.const_int(1000).binary(BinaryOp::Mul, NumKind::Int);
        new_instance(&mut body, receiver);
        body.invoke(InvokeKind::Interface, method(COLL, "twice", "()I"), true)
            .binary(BinaryOp::Add, NumKind::Int);
    }
    body.ret(Some(ValueKind::Int));
    let mut classes = program_classes;
    classes.push(ClassDef::class("Main").with_method(public_static("run", int_proto(0), body)));
    program_with_library(classes, library(with_default))
}

fn sized(name: &str, size: i32) -> ClassDef {
    ClassDef::class(name)
        .implementing(COLL)
        .with_method(constructor("java/lang/Object"))
        .with_method(returns_int("size", size, AccessFlags::PUBLIC))
}

fn app_classes() -> Vec<ClassDef> {
    vec![
        sized("app/Impl", 3),
        sized("app/Custom", 3).with_method(returns_int("twice", 100, AccessFlags::PUBLIC)),
    ]
}

/// Run natively on the newer platform, and desugared on the older one
fn compare(receivers: &[&str], program_classes: Vec<ClassDef>, min_api: ApiLevel) -> (Result<Option<Value>, String>, DesugaredProgram) {
    let native = program_for(receivers, program_classes.clone(), true);
    let expected = outcome(run(native, ApiLevel::N, "()I", &[]));

    let old = program_for(receivers, program_classes, false);
    assert!(fails_natively(&old, min_api, "()I", &[]));
    let output = desugar(&old, config(min_api)).unwrap();
    let lowered = output.clone().into_program(&old).unwrap();
    let actual = outcome(run(lowered, min_api, "()I", &[]));
    assert_eq!(actual, expected);
    (actual, output)
}

#[test]
fn test_program_implementations_dispatch() {
    init_tracing();
    let (result, output) = compare(&["app/Impl", "app/Custom"], app_classes(), ApiLevel::L);
    assert_eq!(result, Ok(Some(Value::Int(6100))));

    let emulated = TypeRef::new("j$/util/Coll");
    for name in ["app/Impl", "app/Custom"] {
        assert!(output.class(name).unwrap().interfaces.contains(&emulated));
    }
    // Impl inherits the emulated default; Custom implements it itself
    let forwarder = output.class("app/Impl").unwrap().method("twice", &int_proto(0)).unwrap();
    assert!(forwarder.flags.is_synthetic());
    assert!(!output.class("app/Custom").unwrap().method("twice", &int_proto(0)).unwrap().flags.is_synthetic());

    let dispatcher = output.class("j$/util/Coll$-EL").unwrap();
    assert!(dispatcher.method("twice", &int_proto(0).prepend(ValueType::object(COLL))).is_some());
    assert_eq!(output.metrics().artifacts.dispatchers, 1);
}

#[test]
fn test_library_overrides_precede_companion() {
    let (result, _) = compare(&["java/util/LibList", "java/util/Bag"], Vec::new(), ApiLevel::M);
    assert_eq!(result, Ok(Some(Value::Int(40010))));
}

#[test]
fn test_subclass_is_not_given_the_interface_again() {
    let sub = ClassDef::class("app/Sub").with_super("app/Impl").with_method(constructor("app/Impl"));
    let mut classes = app_classes();
    classes.push(sub);
    let (result, output) = compare(&["app/Sub"], classes, ApiLevel::L);
    assert_eq!(result, Ok(Some(Value::Int(6))));
    let sub = output.class("app/Sub").unwrap();
    assert!(sub.interfaces.is_empty());
    assert!(sub.method("twice", &int_proto(0)).is_none());
}

#[test]
fn test_emulation_inactive_at_introduction_level() {
    let program = program_for(&["app/Impl"], app_classes(), true);
    let output = desugar(&program, config(ApiLevel::N)).unwrap();
    assert!(output.class("j$/util/Coll$-EL").is_none());
    assert_eq!(output.class("app/Impl"), program.program_class(&"app/Impl".into()));
    assert!(output.diagnostics().is_empty());
}

#[test]
fn test_emulation_from_json() {
    let json = r#"{
        "min_api": 21,
        "parallel": false,
        "emulated_interfaces": [{
            "library_interface": "java/util/Coll",
            "emulated_interface": "j$/util/Coll",
            "companion": "j$/util/Coll$-CC",
            "methods": [{ "name": "twice", "descriptor": "()I", "introduced": 24 }]
        }]
    }"#;
    let config = DesugarConfig::from_json(json).unwrap();
    let program = program_for(&["app/Impl"], app_classes(), false);
    let output = desugar(&program, config).unwrap();
    let lowered = output.into_program(&program).unwrap();
    assert_eq!(run(lowered, ApiLevel::L, "()I", &[]), Ok(Some(Value::Int(6))));
}
