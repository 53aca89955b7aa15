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

//! Interpreter
//!
//! Executes a [`Program`] the way a runtime at a fixed [`ApiLevel`] would:
//! library natives appear at their introduction level, interface bodies and
//! capture sites are only loadable from N and O on, and private members are
//! only shared across a nest at [`NEST_LEVEL`]. Below that level an
//! `invokevirtual` of a private method still selects virtually, as older
//! runtimes did.
//!
//! Classes are verified lazily when first used and initialized on the first
//! `new`, static field access or static invocation.

use crate::errors::{VmError, VmResult};
use crate::natives::NativeTable;
use crate::stack::OperandStack;
use crate::value::{Heap, Payload, Value};
use crate::verify::verify_class;
use retrodex_common::{
    AccessFlags, ApiLevel, BinaryOp, ClassDef, ClassOrigin, Code, Constant, Conversion, FieldRef, HandleKind, Instruction, InvokeKind, LambdaCallSite,
    MethodDef, MethodProto, MethodRef, NumKind, Program, TypeRef,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

/// First level at which private members are accessible across a nest
pub const NEST_LEVEL: ApiLevel = ApiLevel::MASTER;
/// Nested activations allowed before `StackOverflowError` is thrown
pub const MAX_CALL_DEPTH: usize = 64;
/// Instructions executed before a run is aborted
pub const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

const THROWABLE: &str = "java/lang/Throwable";

/// Outcome of selecting among interface methods
enum DefaultSelection<'p> {
    Found(&'p ClassDef, &'p MethodDef),
    /// More than one maximally-specific non-abstract method
    Conflict,
    /// Only abstract candidates
    Abstract,
    Absent,
}

/// Reference interpreter for a program at one API level
pub struct Vm {
    program: Arc<Program>,
    api: ApiLevel,
    natives: NativeTable,
    heap: Heap,
    statics: HashMap<(TypeRef, Arc<str>), Value>,
    initialized: HashSet<TypeRef>,
    verified: HashMap<TypeRef, VmResult<()>>,
    steps: u64,
    step_limit: u64,
    depth: usize,
}

impl Vm {
    /// Create a runtime at `api` with the standard natives
    pub fn new(program: Program, api: ApiLevel) -> Self {
        Self {
            program: Arc::new(program),
            api,
            natives: NativeTable::standard(),
            heap: Heap::new(),
            statics: HashMap::new(),
            initialized: HashSet::new(),
            verified: HashMap::new(),
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
            depth: 0,
        }
    }

    pub fn with_step_limit(mut self, step_limit: u64) -> Self {
        self.step_limit = step_limit;
        self
    }

    pub fn with_natives(mut self, natives: NativeTable) -> Self {
        self.natives = natives;
        self
    }

    pub fn api(&self) -> ApiLevel {
        self.api
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Instructions executed so far
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Allocate a string object
    pub fn string(&mut self, text: &str) -> Value {
        self.heap.string(text)
    }

    /// Text of a string object
    pub fn text(&self, value: Value) -> Option<String> {
        self.heap.text(value).map(|text| text.to_string())
    }

    /// Invoke a static method as an external caller
    pub fn invoke_static(&mut self, class: &str, name: &str, descriptor: &str, args: &[Value]) -> VmResult<Option<Value>> {
        let method = MethodRef::parse(class, name, descriptor)?;
        debug!(method = %method, api = %self.api, "invoking entry point");
        let interface = self.program.lookup(&method.owner).is_some_and(|(class, _)| class.is_interface());
        let caller = method.owner.clone();
        self.invoke_static_ref(&caller, &method, interface, args.to_vec())
    }

    fn ensure_verified(&mut self, name: &TypeRef) -> VmResult<()> {
        if let Some(outcome) = self.verified.get(name) {
            return outcome.clone();
        }
        let program = Arc::clone(&self.program);
        let outcome = match program.lookup(name) {
            Some((_, ClassOrigin::Library)) | None => Ok(()),
            Some((class, _)) => verify_class(class, self.api),
        };
        self.verified.insert(name.clone(), outcome.clone());
        outcome
    }

    fn ensure_initialized(&mut self, name: &TypeRef) -> VmResult<()> {
        if !self.initialized.insert(name.clone()) {
            return Ok(());
        }
        let program = Arc::clone(&self.program);
        let Some((class, _)) = program.lookup(name) else {
            return Ok(());
        };
        self.ensure_verified(name)?;
        if !class.is_interface()
            && let Some(parent) = &class.super_class
        {
            self.ensure_initialized(parent)?;
        }
        if let Some(clinit) = class.methods.iter().find(|method| method.is_class_initializer()) {
            trace!(class = %name, "running class initializer");
            self.run_method(name, clinit, Vec::new())?;
        }
        Ok(())
    }

    fn check_access(&self, caller: &TypeRef, declaring: &TypeRef, flags: AccessFlags, member: &dyn std::fmt::Display) -> VmResult<()> {
        if !flags.is_private() || caller == declaring {
            return Ok(());
        }
        if self.api >= NEST_LEVEL && self.nest_host(caller) == self.nest_host(declaring) {
            return Ok(());
        }
        Err(VmError::illegal_access(format!("{caller} cannot access private member {member}")))
    }

    fn nest_host(&self, name: &TypeRef) -> TypeRef {
        self.program
            .lookup(name)
            .map(|(class, _)| class.nest_host_or_self().clone())
            .unwrap_or_else(|| name.clone())
    }

    fn run_method(&mut self, owner: &TypeRef, method: &MethodDef, args: Vec<Value>) -> VmResult<Option<Value>> {
        self.ensure_verified(owner)?;
        let reference = method.reference(owner);
        let Some(code) = &method.code else {
            if method.flags.contains(AccessFlags::NATIVE)
                && let Some(native) = self.natives.lookup(&reference, self.api)
            {
                return native(&mut self.heap, &args);
            }
            return Err(VmError::abstract_method(reference.to_string()));
        };
        if self.depth >= MAX_CALL_DEPTH {
            return Err(VmError::Thrown {
                class: "java/lang/StackOverflowError".to_string(),
                message: None,
            });
        }
        self.depth += 1;
        let result = self.execute(owner, &reference, code, args);
        self.depth -= 1;
        result
    }

    fn execute(&mut self, owner: &TypeRef, reference: &MethodRef, code: &Code, args: Vec<Value>) -> VmResult<Option<Value>> {
        let name = reference.to_string();
        let labels = code.label_positions(&name)?;
        let mut locals = args;
        let slots = usize::from(code.max_locals).max(locals.len());
        locals.resize(slots, Value::Null);
        let mut stack = OperandStack::new(name.clone());
        let mut pc = 0usize;

        while let Some(insn) = code.instructions.get(pc) {
            self.steps += 1;
            if self.steps > self.step_limit {
                return Err(VmError::StepLimit(self.step_limit));
            }
            pc += 1;
            let mut jump = |target: retrodex_common::Label| -> VmResult<()> {
                pc = *labels.get(&target).ok_or_else(|| VmError::UnknownLabel {
                    method: name.clone(),
                    label: target.0,
                })?;
                Ok(())
            };
            match insn {
                Instruction::Const(constant) => {
                    let value = match constant {
                        Constant::Int(value) => Value::Int(*value),
                        Constant::Long(value) => Value::Long(*value),
                        Constant::Null => Value::Null,
                        Constant::String(text) => self.heap.string(text),
                    };
                    stack.push(value)?;
                }
                Instruction::Load { index, .. } => {
                    let value = *locals.get(usize::from(*index)).ok_or_else(|| VmError::InvalidLocal {
                        method: name.clone(),
                        index: *index,
                    })?;
                    stack.push(value)?;
                }
                Instruction::Store { index, .. } => {
                    let value = stack.pop()?;
                    let slot = locals.get_mut(usize::from(*index)).ok_or_else(|| VmError::InvalidLocal {
                        method: name.clone(),
                        index: *index,
                    })?;
                    *slot = value;
                }
                Instruction::Dup => stack.dup()?,
                Instruction::Pop => {
                    stack.pop()?;
                }
                Instruction::Swap => stack.swap()?,
                Instruction::Binary { op, kind } => binary(&mut stack, *op, *kind)?,
                Instruction::Neg(NumKind::Int) => {
                    let value = stack.pop_int()?;
                    stack.push(Value::Int(value.wrapping_neg()))?;
                }
                Instruction::Neg(NumKind::Long) => {
                    let value = stack.pop_long()?;
                    stack.push(Value::Long(value.wrapping_neg()))?;
                }
                Instruction::Convert(Conversion::IntToLong) => {
                    let value = stack.pop_int()?;
                    stack.push(Value::Long(i64::from(value)))?;
                }
                Instruction::Convert(Conversion::LongToInt) => {
                    let value = stack.pop_long()?;
                    stack.push(Value::Int(value as i32))?;
                }
                Instruction::LongCompare => {
                    let rhs = stack.pop_long()?;
                    let lhs = stack.pop_long()?;
                    stack.push(Value::Int(lhs.cmp(&rhs) as i32))?;
                }
                Instruction::If { cond, target } => {
                    if cond.holds(stack.pop_int()?, 0) {
                        jump(*target)?;
                    }
                }
                Instruction::IfCmp { cond, target } => {
                    let rhs = stack.pop_int()?;
                    let lhs = stack.pop_int()?;
                    if cond.holds(lhs, rhs) {
                        jump(*target)?;
                    }
                }
                Instruction::IfNull { target } => {
                    if stack.pop_object()?.is_none() {
                        jump(*target)?;
                    }
                }
                Instruction::IfNonNull { target } => {
                    if stack.pop_object()?.is_some() {
                        jump(*target)?;
                    }
                }
                Instruction::IfRefEq { target } | Instruction::IfRefNe { target } => {
                    let rhs = stack.pop_object()?;
                    let lhs = stack.pop_object()?;
                    if (lhs == rhs) == matches!(insn, Instruction::IfRefEq { .. }) {
                        jump(*target)?;
                    }
                }
                Instruction::Goto(target) => jump(*target)?,
                Instruction::Mark(_) | Instruction::Line(_) => {}
                Instruction::New(class) => {
                    let object = self.instantiate(class)?;
                    stack.push(object)?;
                }
                Instruction::GetField(field) => {
                    let object = self.field_receiver(&mut stack, field)?;
                    let value = self.get_field(owner, object, field)?;
                    stack.push(value)?;
                }
                Instruction::PutField(field) => {
                    let value = stack.pop()?;
                    let object = self.field_receiver(&mut stack, field)?;
                    self.put_field(owner, object, field, value)?;
                }
                Instruction::GetStatic(field) => {
                    let key = self.static_slot(owner, field)?;
                    let value = self.statics.get(&key).copied().unwrap_or_else(|| Value::default_for(&field.ty));
                    stack.push(value)?;
                }
                Instruction::PutStatic(field) => {
                    let value = stack.pop()?;
                    let key = self.static_slot(owner, field)?;
                    self.statics.insert(key, value);
                }
                Instruction::Invoke { kind, method, interface } => {
                    let receiver = usize::from(*kind != InvokeKind::Static);
                    let args = stack.pop_many(method.proto.params.len() + receiver)?;
                    let result = match kind {
                        InvokeKind::Static => self.invoke_static_ref(owner, method, *interface, args)?,
                        InvokeKind::Special => self.invoke_special(owner, method, *interface, args)?,
                        InvokeKind::Virtual | InvokeKind::Interface => self.invoke_virtual(owner, *kind, method, *interface, args)?,
                    };
                    match (result, method.proto.ret.is_some()) {
                        (Some(value), true) => stack.push(value)?,
                        (None, false) => {}
                        (_, true) => return Err(VmError::Unsupported(format!("{method} returned no value"))),
                        (Some(_), false) => return Err(VmError::Unsupported(format!("void {method} returned a value"))),
                    }
                }
                Instruction::InvokeDynamic(site) => {
                    let captures = stack.pop_many(site.captures.len())?;
                    let class = owner.with_suffix("$$Lambda");
                    let lambda = self.heap.allocate(
                        class,
                        Payload::Lambda {
                            site: site.clone(),
                            captures,
                        },
                    );
                    stack.push(lambda)?;
                }
                Instruction::CheckCast(target) => {
                    let value = stack.pop()?;
                    if let Some(index) = value.as_object(&name)?
                        && !self.instance_of(index, target)?
                    {
                        let class = self.heap.get(index)?.class.clone();
                        return Err(VmError::thrown(
                            "java/lang/ClassCastException",
                            format!("{class} cannot be cast to {target}"),
                        ));
                    }
                    stack.push(value)?;
                }
                Instruction::InstanceOf(target) => {
                    let result = match stack.pop_object()? {
                        Some(index) => self.instance_of(index, target)?,
                        None => false,
                    };
                    stack.push(Value::Int(i32::from(result)))?;
                }
                Instruction::Throw => {
                    let index = stack
                        .pop_object()?
                        .ok_or_else(|| VmError::null_pointer("Attempt to throw a null reference"))?;
                    let object = self.heap.get(index)?;
                    let message = match &object.payload {
                        Payload::Throwable { message } => message.as_ref().map(|text| text.to_string()),
                        _ => None,
                    };
                    return Err(VmError::Thrown {
                        class: object.class.to_string(),
                        message,
                    });
                }
                Instruction::Return(None) => return Ok(None),
                Instruction::Return(Some(_)) => return Ok(Some(stack.pop()?)),
            }
        }
        Err(VmError::Unsupported(format!("execution fell off the end of {name}")))
    }

    /// Allocate an uninitialized instance of `class`
    fn instantiate(&mut self, class: &TypeRef) -> VmResult<Value> {
        let program = Arc::clone(&self.program);
        match program.lookup(class) {
            Some((definition, _)) => {
                if definition.is_interface() || definition.flags.is_abstract() {
                    return Err(VmError::thrown("java/lang/InstantiationError", class.to_string()));
                }
                self.ensure_initialized(class)?;
                if is_throwable_name(class) && !self.declares_fields(definition) {
                    return Ok(self.heap.allocate(class.clone(), Payload::Throwable { message: None }));
                }
                let mut fields = HashMap::new();
                for ancestor in class_chain(&program, definition) {
                    for field in ancestor.fields.iter().filter(|field| !field.flags.is_static()) {
                        fields.entry(Arc::clone(&field.name)).or_insert_with(|| Value::default_for(&field.ty));
                    }
                }
                Ok(self.heap.allocate(class.clone(), Payload::Plain { fields }))
            }
            None if is_throwable_name(class) => Ok(self.heap.allocate(class.clone(), Payload::Throwable { message: None })),
            None if *class == TypeRef::object() => Ok(self.heap.allocate(class.clone(), Payload::Plain { fields: HashMap::new() })),
            None => Err(VmError::no_class_def(class.to_string())),
        }
    }

    fn declares_fields(&self, definition: &ClassDef) -> bool {
        class_chain(&self.program, definition)
            .iter()
            .any(|class| class.fields.iter().any(|field| !field.flags.is_static()))
    }

    fn field_receiver(&self, stack: &mut OperandStack, field: &FieldRef) -> VmResult<usize> {
        stack
            .pop_object()?
            .ok_or_else(|| VmError::null_pointer(format!("Attempt to access field {field} on a null object reference")))
    }

    fn check_field_access(&self, caller: &TypeRef, field: &FieldRef) -> VmResult<()> {
        let program = Arc::clone(&self.program);
        if let Some((owner, _)) = program.lookup(&field.owner) {
            for class in class_chain(&program, owner) {
                if let Some(definition) = class.field(&field.name, &field.ty) {
                    return self.check_access(caller, &class.name, definition.flags, field);
                }
            }
        }
        Ok(())
    }

    fn get_field(&mut self, caller: &TypeRef, index: usize, field: &FieldRef) -> VmResult<Value> {
        self.check_field_access(caller, field)?;
        match &self.heap.get(index)?.payload {
            Payload::Plain { fields } => fields
                .get(&field.name)
                .copied()
                .ok_or_else(|| VmError::no_such_field(field.to_string())),
            _ => Err(VmError::no_such_field(field.to_string())),
        }
    }

    fn put_field(&mut self, caller: &TypeRef, index: usize, field: &FieldRef, value: Value) -> VmResult<()> {
        self.check_field_access(caller, field)?;
        match &mut self.heap.get_mut(index)?.payload {
            Payload::Plain { fields } => match fields.get_mut(&field.name) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(VmError::no_such_field(field.to_string())),
            },
            _ => Err(VmError::no_such_field(field.to_string())),
        }
    }

    /// Resolve a static field to its declaring class, initializing that class
    fn static_slot(&mut self, caller: &TypeRef, field: &FieldRef) -> VmResult<(TypeRef, Arc<str>)> {
        let program = Arc::clone(&self.program);
        let Some((owner, _)) = program.lookup(&field.owner) else {
            return Err(VmError::no_class_def(field.owner.to_string()));
        };
        let mut candidates: Vec<&ClassDef> = class_chain(&program, owner);
        candidates.extend(
            interface_closure(&program, owner)
                .iter()
                .filter_map(|name| program.lookup(name).map(|(class, _)| class)),
        );
        for class in candidates {
            if let Some(definition) = class.field(&field.name, &field.ty) {
                if !definition.flags.is_static() {
                    return Err(VmError::incompatible_class_change(format!("expected static field {field}")));
                }
                self.check_access(caller, &class.name, definition.flags, field)?;
                self.ensure_initialized(&class.name)?;
                return Ok((class.name.clone(), Arc::clone(&field.name)));
            }
        }
        Err(VmError::no_such_field(field.to_string()))
    }

    fn invoke_native(&mut self, method: &MethodRef, args: &[Value]) -> Option<VmResult<Option<Value>>> {
        let native = self.natives.lookup(method, self.api)?;
        Some(native(&mut self.heap, args))
    }

    fn invoke_static_ref(&mut self, caller: &TypeRef, method: &MethodRef, interface: bool, args: Vec<Value>) -> VmResult<Option<Value>> {
        let program = Arc::clone(&self.program);
        if let Some((owner, _)) = program.lookup(&method.owner) {
            check_interface_flag(owner, interface, method)?;
            let found = if owner.is_interface() {
                owner.method(&method.name, &method.proto).map(|definition| (owner, definition))
            } else {
                find_in_chain(&program, owner, &method.name, &method.proto, |_| true)
            };
            if let Some((declaring, definition)) = found {
                if !definition.is_static() {
                    return Err(VmError::incompatible_class_change(format!("expected static method {method}")));
                }
                self.check_access(caller, &declaring.name, definition.flags, method)?;
                self.ensure_initialized(&declaring.name)?;
                if definition.code.is_some() {
                    return self.run_method(&declaring.name, definition, args);
                }
            }
        }
        if let Some(outcome) = self.invoke_native(method, &args) {
            return outcome;
        }
        if program.lookup(&method.owner).is_some() || self.natives.knows_class(&method.owner) {
            Err(VmError::no_such_method(method.to_string()))
        } else {
            Err(VmError::no_class_def(method.owner.to_string()))
        }
    }

    fn invoke_special(&mut self, caller: &TypeRef, method: &MethodRef, interface: bool, args: Vec<Value>) -> VmResult<Option<Value>> {
        let receiver = receiver_of(&args, method)?;
        let program = Arc::clone(&self.program);
        if method.is_constructor() {
            return self.construct(caller, &program, method, receiver, args);
        }
        let Some((owner, _)) = program.lookup(&method.owner) else {
            return self.invoke_builtin(receiver, method, &args);
        };
        check_interface_flag(owner, interface, method)?;
        if let Some(definition) = owner.method(&method.name, &method.proto)
            && !definition.is_static()
            && (definition.is_private() || !definition.is_abstract())
        {
            self.check_access(caller, &owner.name, definition.flags, method)?;
            return self.run_method(&owner.name, definition, args);
        }
        let selection = if owner.is_interface() {
            select_default(&program, &expand_interfaces(&program, &owner.interfaces), &method.name, &method.proto)
        } else {
            match find_in_chain(&program, owner, &method.name, &method.proto, |m| !m.is_static() && !m.is_private()) {
                Some((declaring, definition)) if !definition.is_abstract() => DefaultSelection::Found(declaring, definition),
                Some(_) => DefaultSelection::Abstract,
                None => select_default(&program, &interface_closure(&program, owner), &method.name, &method.proto),
            }
        };
        self.run_selection(selection, receiver, method, args)
    }

    fn construct(&mut self, caller: &TypeRef, program: &Program, method: &MethodRef, receiver: usize, args: Vec<Value>) -> VmResult<Option<Value>> {
        match program.lookup(&method.owner) {
            Some((owner, origin)) => match owner.method(&method.name, &method.proto) {
                Some(definition) => {
                    self.check_access(caller, &owner.name, definition.flags, method)?;
                    self.run_method(&owner.name, definition, args)?;
                    Ok(None)
                }
                None if origin == ClassOrigin::Library || owner.name == TypeRef::object() => self.builtin_init(receiver, method, &args),
                None => Err(VmError::no_such_method(method.to_string())),
            },
            None => self.builtin_init(receiver, method, &args),
        }
    }

    /// Constructors of library classes without a modelled body
    fn builtin_init(&mut self, receiver: usize, method: &MethodRef, args: &[Value]) -> VmResult<Option<Value>> {
        let message = args.get(1).and_then(|value| self.heap.text(*value));
        match &mut self.heap.get_mut(receiver)?.payload {
            Payload::Throwable { message: slot } => {
                *slot = message;
                Ok(None)
            }
            _ if method.owner == TypeRef::object() => Ok(None),
            _ if self.program.lookup(&method.owner).is_some() => Ok(None),
            _ => Err(VmError::no_class_def(method.owner.to_string())),
        }
    }

    fn invoke_virtual(&mut self, caller: &TypeRef, kind: InvokeKind, method: &MethodRef, interface: bool, args: Vec<Value>) -> VmResult<Option<Value>> {
        let receiver = receiver_of(&args, method)?;
        let program = Arc::clone(&self.program);
        if let Some((owner, _)) = program.lookup(&method.owner) {
            if owner.is_interface() != (kind == InvokeKind::Interface) {
                return Err(VmError::incompatible_class_change(format!("{kind:?} invocation of {method}")));
            }
            check_interface_flag(owner, interface, method)?;
            let resolved = if owner.is_interface() {
                owner.method(&method.name, &method.proto).map(|definition| (owner, definition))
            } else {
                find_in_chain(&program, owner, &method.name, &method.proto, |_| true)
            };
            if let Some((declaring, definition)) = resolved {
                if definition.is_static() {
                    return Err(VmError::incompatible_class_change(format!("expected instance method {method}")));
                }
                if definition.is_private() {
                    self.check_access(caller, &declaring.name, definition.flags, method)?;
                    if self.api >= NEST_LEVEL || declaring.is_interface() {
                        return self.run_method(&declaring.name, definition, args);
                    }
                    return self.select_legacy(&program, receiver, method, args);
                }
            }
        }
        self.select_virtual(&program, receiver, method, args)
    }

    /// Selection of older runtimes: the most derived method with the
    /// signature wins, private or not
    fn select_legacy(&mut self, program: &Program, receiver: usize, method: &MethodRef, args: Vec<Value>) -> VmResult<Option<Value>> {
        let class = self.heap.get(receiver)?.class.clone();
        let Some((runtime, _)) = program.lookup(&class) else {
            return self.invoke_builtin(receiver, method, &args);
        };
        match find_in_chain(program, runtime, &method.name, &method.proto, |m| !m.is_static()) {
            Some((declaring, definition)) if !definition.is_abstract() => self.run_method(&declaring.name, definition, args),
            _ => Err(VmError::abstract_method(method.to_string())),
        }
    }

    fn select_virtual(&mut self, program: &Program, receiver: usize, method: &MethodRef, args: Vec<Value>) -> VmResult<Option<Value>> {
        let object = self.heap.get(receiver)?;
        let class = object.class.clone();
        if let Payload::Lambda { site, captures } = &object.payload {
            let site = site.clone();
            let captures = captures.clone();
            if implements_sam(&site, method) {
                return self.invoke_lambda(receiver, &site, captures, method, args);
            }
            let mut roots = vec![site.interface.clone()];
            roots.extend(site.markers.iter().cloned());
            let selection = select_default(program, &expand_interfaces(program, &roots), &method.name, &method.proto);
            return self.run_selection(selection, receiver, method, args);
        }
        let Some((runtime, _)) = program.lookup(&class) else {
            return self.invoke_builtin(receiver, method, &args);
        };
        let selection = match find_in_chain(program, runtime, &method.name, &method.proto, |m| !m.is_static() && !m.is_private()) {
            Some((declaring, definition)) if !definition.is_abstract() => DefaultSelection::Found(declaring, definition),
            found => match select_default(program, &interface_closure(program, runtime), &method.name, &method.proto) {
                DefaultSelection::Absent if found.is_some() => DefaultSelection::Abstract,
                other => other,
            },
        };
        self.run_selection(selection, receiver, method, args)
    }

    fn run_selection(&mut self, selection: DefaultSelection<'_>, receiver: usize, method: &MethodRef, args: Vec<Value>) -> VmResult<Option<Value>> {
        match selection {
            DefaultSelection::Found(declaring, definition) => self.run_method(&declaring.name, definition, args),
            DefaultSelection::Conflict => Err(VmError::incompatible_class_change(format!(
                "conflicting default methods for {}{}",
                method.name,
                method.proto.descriptor()
            ))),
            DefaultSelection::Abstract => Err(VmError::abstract_method(method.to_string())),
            DefaultSelection::Absent => self.invoke_builtin(receiver, method, &args),
        }
    }

    /// Methods of library objects modelled natively
    fn invoke_builtin(&mut self, receiver: usize, method: &MethodRef, args: &[Value]) -> VmResult<Option<Value>> {
        let object = self.heap.get(receiver)?;
        let mut owners = vec![object.class.clone()];
        if matches!(object.payload, Payload::Throwable { .. }) {
            owners.push(TypeRef::new(THROWABLE));
        }
        owners.push(method.owner.clone());
        owners.push(TypeRef::object());
        for owner in owners {
            if let Some(outcome) = self.invoke_native(&method.with_owner(owner), args) {
                return outcome;
            }
        }
        Err(VmError::abstract_method(method.to_string()))
    }

    fn invoke_lambda(&mut self, lambda: usize, site: &LambdaCallSite, captures: Vec<Value>, method: &MethodRef, args: Vec<Value>) -> VmResult<Option<Value>> {
        let mut forwarded = Vec::with_capacity(captures.len() + args.len());
        if site.self_referencing {
            forwarded.push(Value::Ref(lambda));
        }
        forwarded.extend(captures);
        forwarded.extend(args.into_iter().skip(1));

        let handle = &site.implementation;
        let owner = handle.method.owner.clone();
        let result = match handle.kind {
            HandleKind::InvokeStatic => self.invoke_static_ref(&owner, &handle.method, handle.interface, forwarded)?,
            HandleKind::InvokeVirtual => self.invoke_virtual(&owner, InvokeKind::Virtual, &handle.method, handle.interface, forwarded)?,
            HandleKind::InvokeInterface => self.invoke_virtual(&owner, InvokeKind::Interface, &handle.method, handle.interface, forwarded)?,
            HandleKind::InvokeSpecial => self.invoke_special(&owner, &handle.method, handle.interface, forwarded)?,
            HandleKind::NewInvokeSpecial => {
                let instance = self.instantiate(&owner)?;
                let mut with_receiver = vec![instance];
                with_receiver.extend(forwarded);
                self.invoke_special(&owner, &handle.method, false, with_receiver)?;
                Some(instance)
            }
        };
        Ok(if method.proto.ret.is_none() { None } else { result })
    }

    fn instance_of(&self, index: usize, target: &TypeRef) -> VmResult<bool> {
        if *target == TypeRef::object() {
            return Ok(true);
        }
        let object = self.heap.get(index)?;
        Ok(match &object.payload {
            Payload::Lambda { site, .. } => {
                let mut roots = vec![site.interface.clone()];
                roots.extend(site.markers.iter().cloned());
                expand_interfaces(&self.program, &roots).contains(target)
            }
            Payload::Str(_) => matches!(
                target.as_str(),
                "java/lang/String" | "java/lang/CharSequence" | "java/lang/Comparable" | "java/io/Serializable"
            ),
            Payload::Throwable { .. } => object.class == *target || target.as_str() == THROWABLE || throwable_supertype(&object.class, target),
            Payload::Class(_) | Payload::Optional(_) => object.class == *target,
            Payload::Plain { .. } => is_subtype(&self.program, &object.class, target),
        })
    }
}

fn receiver_of(args: &[Value], method: &MethodRef) -> VmResult<usize> {
    args.first()
        .copied()
        .unwrap_or(Value::Null)
        .as_object(&method.to_string())?
        .ok_or_else(|| VmError::null_pointer(format!("Attempt to invoke {method} on a null object reference")))
}

fn check_interface_flag(owner: &ClassDef, interface: bool, method: &MethodRef) -> VmResult<()> {
    if owner.is_interface() != interface {
        return Err(VmError::incompatible_class_change(format!(
            "{method}: {} is {}an interface",
            owner.name,
            if owner.is_interface() { "" } else { "not " }
        )));
    }
    Ok(())
}

fn implements_sam(site: &LambdaCallSite, method: &MethodRef) -> bool {
    *site.method_name == *method.name
        && (method.proto == site.erased_proto || method.proto == site.instantiated_proto || site.bridges.contains(&method.proto))
}

fn binary(stack: &mut OperandStack, op: BinaryOp, kind: NumKind) -> VmResult<()> {
    let division_by_zero = || VmError::thrown("java/lang/ArithmeticException", "/ by zero");
    match kind {
        NumKind::Int => {
            let rhs = stack.pop_int()?;
            let lhs = stack.pop_int()?;
            let result = match op {
                BinaryOp::Add => lhs.wrapping_add(rhs),
                BinaryOp::Sub => lhs.wrapping_sub(rhs),
                BinaryOp::Mul => lhs.wrapping_mul(rhs),
                BinaryOp::Div if rhs == 0 => return Err(division_by_zero()),
                BinaryOp::Div => lhs.wrapping_div(rhs),
                BinaryOp::Rem if rhs == 0 => return Err(division_by_zero()),
                BinaryOp::Rem => lhs.wrapping_rem(rhs),
                BinaryOp::And => lhs & rhs,
                BinaryOp::Or => lhs | rhs,
                BinaryOp::Xor => lhs ^ rhs,
                BinaryOp::Shl => lhs.wrapping_shl(rhs as u32 & 31),
                BinaryOp::Shr => lhs.wrapping_shr(rhs as u32 & 31),
                BinaryOp::Ushr => ((lhs as u32) >> (rhs as u32 & 31)) as i32,
            };
            stack.push(Value::Int(result))
        }
        NumKind::Long => {
            // Long shifts take an int count
            let rhs = match op {
                BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Ushr => i64::from(stack.pop_int()?),
                _ => stack.pop_long()?,
            };
            let lhs = stack.pop_long()?;
            let result = match op {
                BinaryOp::Add => lhs.wrapping_add(rhs),
                BinaryOp::Sub => lhs.wrapping_sub(rhs),
                BinaryOp::Mul => lhs.wrapping_mul(rhs),
                BinaryOp::Div if rhs == 0 => return Err(division_by_zero()),
                BinaryOp::Div => lhs.wrapping_div(rhs),
                BinaryOp::Rem if rhs == 0 => return Err(division_by_zero()),
                BinaryOp::Rem => lhs.wrapping_rem(rhs),
                BinaryOp::And => lhs & rhs,
                BinaryOp::Or => lhs | rhs,
                BinaryOp::Xor => lhs ^ rhs,
                BinaryOp::Shl => lhs.wrapping_shl(rhs as u32 & 63),
                BinaryOp::Shr => lhs.wrapping_shr(rhs as u32 & 63),
                BinaryOp::Ushr => ((lhs as u64) >> (rhs as u32 & 63)) as i64,
            };
            stack.push(Value::Long(result))
        }
    }
}

fn is_throwable_name(class: &TypeRef) -> bool {
    let name = class.as_str();
    name == THROWABLE || name.ends_with("Exception") || name.ends_with("Error")
}

/// Library supertypes of a natively modelled throwable
fn throwable_supertype(class: &TypeRef, target: &TypeRef) -> bool {
    match target.as_str() {
        "java/lang/Exception" => class.as_str().ends_with("Exception"),
        "java/lang/Error" => class.as_str().ends_with("Error"),
        "java/lang/RuntimeException" => class.as_str().ends_with("Exception") && class.as_str() != "java/lang/Exception",
        _ => false,
    }
}

/// A class followed by its resolvable superclasses
fn class_chain<'p>(program: &'p Program, class: &'p ClassDef) -> Vec<&'p ClassDef> {
    let mut chain = vec![class];
    let mut current = class;
    while let Some(parent) = &current.super_class
        && let Some((next, _)) = program.lookup(parent)
        && !chain.iter().any(|seen| seen.name == next.name)
    {
        chain.push(next);
        current = next;
    }
    chain
}

/// First method along the superclass chain accepted by `filter`
fn find_in_chain<'p>(
    program: &'p Program,
    class: &'p ClassDef,
    name: &str,
    proto: &MethodProto,
    filter: impl Fn(&MethodDef) -> bool,
) -> Option<(&'p ClassDef, &'p MethodDef)> {
    class_chain(program, class).into_iter().find_map(|ancestor| {
        ancestor
            .method(name, proto)
            .filter(|method| filter(method))
            .map(|method| (ancestor, method))
    })
}

/// Interfaces reachable from `roots`, including the roots
fn expand_interfaces(program: &Program, roots: &[TypeRef]) -> Vec<TypeRef> {
    let mut seen = Vec::new();
    let mut queue: VecDeque<TypeRef> = roots.iter().cloned().collect();
    while let Some(name) = queue.pop_front() {
        if seen.contains(&name) {
            continue;
        }
        if let Some((class, _)) = program.lookup(&name) {
            queue.extend(class.interfaces.iter().cloned());
        }
        seen.push(name);
    }
    seen
}

/// Every interface implemented by a class or its superclasses
fn interface_closure(program: &Program, class: &ClassDef) -> Vec<TypeRef> {
    let roots: Vec<TypeRef> = class_chain(program, class)
        .iter()
        .flat_map(|ancestor| ancestor.interfaces.iter().cloned())
        .collect();
    expand_interfaces(program, &roots)
}

fn is_subtype(program: &Program, class: &TypeRef, target: &TypeRef) -> bool {
    if class == target {
        return true;
    }
    let Some((definition, _)) = program.lookup(class) else {
        return false;
    };
    class_chain(program, definition).iter().any(|ancestor| ancestor.name == *target)
        || interface_closure(program, definition).contains(target)
        || (definition.is_interface() && expand_interfaces(program, &definition.interfaces).contains(target))
}

/// Maximally-specific selection among the instance methods of `interfaces`
fn select_default<'p>(program: &'p Program, interfaces: &[TypeRef], name: &str, proto: &MethodProto) -> DefaultSelection<'p> {
    let candidates: Vec<(&ClassDef, &MethodDef)> = interfaces
        .iter()
        .filter_map(|interface| program.lookup(interface))
        .filter_map(|(class, _)| {
            class
                .method(name, proto)
                .filter(|method| !method.is_static() && !method.is_private())
                .map(|method| (class, method))
        })
        .collect();
    let maximal: Vec<&(&ClassDef, &MethodDef)> = candidates
        .iter()
        .filter(|(class, _)| {
            !candidates
                .iter()
                .any(|(other, _)| other.name != class.name && is_subtype(program, &other.name, &class.name))
        })
        .collect();
    let concrete: Vec<(&ClassDef, &MethodDef)> = maximal.iter().map(|pair| **pair).filter(|(_, method)| !method.is_abstract()).collect();
    match *concrete.as_slice() {
        [(class, method)] => DefaultSelection::Found(class, method),
        [] if maximal.is_empty() => DefaultSelection::Absent,
        [] => DefaultSelection::Abstract,
        _ => DefaultSelection::Conflict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrodex_common::{CodeBuilder, FieldDef, MethodHandle, ValueKind, ValueType};

    fn int_proto(params: usize) -> MethodProto {
        MethodProto::new(vec![ValueType::Int; params], Some(ValueType::Int))
    }

    fn constant_method(name: &str, value: i32, flags: AccessFlags) -> MethodDef {
        let mut body = CodeBuilder::for_method(&int_proto(0), flags.is_static());
        body.const_int(value).ret(Some(ValueKind::Int));
        MethodDef::new(name, int_proto(0), flags, body.build())
    }

    fn constructor() -> MethodDef {
        let mut body = CodeBuilder::new(1);
        body.load(ValueKind::Ref, 0)
            .invoke(InvokeKind::Special, MethodRef::new(TypeRef::object(), "<init>", MethodProto::void()), false)
            .ret(None);
        MethodDef::new("<init>", MethodProto::void(), AccessFlags::PUBLIC, body.build())
    }

    /// `static int run()` that creates `class` and calls `name()I` on it
    fn driver(class: &str, kind: InvokeKind, owner: &str, name: &str, interface: bool) -> ClassDef {
        let mut body = CodeBuilder::new(0);
        body.push(Instruction::New(TypeRef::new(class)))
            .push(Instruction::Dup)
            .invoke(InvokeKind::Special, MethodRef::new(TypeRef::new(class), "<init>", MethodProto::void()), false)
            .invoke(kind, MethodRef::new(TypeRef::new(owner), name, int_proto(0)), interface)
            .ret(Some(ValueKind::Int));
        ClassDef::class("Main").with_method(MethodDef::new("run", int_proto(0), AccessFlags::PUBLIC | AccessFlags::STATIC, body.build()))
    }

    fn run(classes: Vec<ClassDef>, api: ApiLevel) -> VmResult<Option<Value>> {
        let program = Program::from_parts(classes, Vec::new(), Vec::new()).unwrap();
        Vm::new(program, api).invoke_static("Main", "run", "()I", &[])
    }

    #[test]
    fn test_arithmetic_wraps_and_traps() {
        let mut body = CodeBuilder::new(2);
        body.load(ValueKind::Int, 0)
            .load(ValueKind::Int, 1)
            .binary(BinaryOp::Div, NumKind::Int)
            .ret(Some(ValueKind::Int));
        let method = MethodDef::new("div", int_proto(2), AccessFlags::PUBLIC | AccessFlags::STATIC, body.build());
        let program = Program::from_parts(vec![ClassDef::class("Main").with_method(method)], Vec::new(), Vec::new()).unwrap();
        let mut vm = Vm::new(program, ApiLevel::B);
        assert_eq!(vm.invoke_static("Main", "div", "(II)I", &[Value::Int(i32::MIN), Value::Int(-1)]).unwrap(), Some(Value::Int(i32::MIN)));
        let error = vm.invoke_static("Main", "div", "(II)I", &[Value::Int(1), Value::Int(0)]).unwrap_err();
        assert_eq!(error, VmError::thrown("java/lang/ArithmeticException", "/ by zero"));
    }

    #[test]
    fn test_default_method_selected() {
        let iface = ClassDef::interface("I").with_method(constant_method("m", 7, AccessFlags::PUBLIC));
        let class = ClassDef::class("C").implementing("I").with_method(constructor());
        let main = driver("C", InvokeKind::Interface, "I", "m", true);
        assert_eq!(run(vec![iface.clone(), class.clone(), main.clone()], ApiLevel::N).unwrap(), Some(Value::Int(7)));
        assert!(run(vec![iface, class, main], ApiLevel::M).unwrap_err().is_thrown("java/lang/VerifyError"));
    }

    #[test]
    fn test_conflicting_defaults() {
        let left = ClassDef::interface("L").with_method(constant_method("m", 1, AccessFlags::PUBLIC));
        let right = ClassDef::interface("R").with_method(constant_method("m", 2, AccessFlags::PUBLIC));
        let class = ClassDef::class("C").implementing("L").implementing("R").with_method(constructor());
        let main = driver("C", InvokeKind::Interface, "L", "m", true);
        let error = run(vec![left, right, class, main], ApiLevel::N).unwrap_err();
        assert!(error.is_thrown("java/lang/IncompatibleClassChangeError"));
    }

    #[test]
    fn test_abstract_method_error() {
        let iface = ClassDef::interface("I").with_method(MethodDef::new_abstract("m", int_proto(0), AccessFlags::PUBLIC | AccessFlags::ABSTRACT));
        let class = ClassDef::class("C").implementing("I").with_method(constructor());
        let main = driver("C", InvokeKind::Interface, "I", "m", true);
        assert!(run(vec![iface, class, main], ApiLevel::B).unwrap_err().is_thrown("java/lang/AbstractMethodError"));
    }

    #[test]
    fn test_private_access_depends_on_nest_level() {
        let mut body = CodeBuilder::new(0);
        body.invoke(InvokeKind::Static, MethodRef::new(TypeRef::new("Outer"), "secret", int_proto(0)), false)
            .ret(Some(ValueKind::Int));
        let main = ClassDef::class("Main")
            .with_nest_host("Outer")
            .with_method(MethodDef::new("run", int_proto(0), AccessFlags::PUBLIC | AccessFlags::STATIC, body.build()));
        let outer = ClassDef::class("Outer")
            .with_nest_member("Main")
            .with_method(constant_method("secret", 3, AccessFlags::PRIVATE | AccessFlags::STATIC));
        assert_eq!(run(vec![main.clone(), outer.clone()], ApiLevel::MASTER).unwrap(), Some(Value::Int(3)));
        assert!(run(vec![main, outer], ApiLevel::U).unwrap_err().is_thrown("java/lang/IllegalAccessError"));
    }

    #[test]
    fn test_legacy_private_virtual_selection() {
        // Base.call() invokes its private m() virtually on a Derived receiver
        let mut call = CodeBuilder::new(1);
        call.load(ValueKind::Ref, 0)
            .invoke(InvokeKind::Virtual, MethodRef::new(TypeRef::new("Base"), "m", int_proto(0)), false)
            .ret(Some(ValueKind::Int));
        let base = ClassDef::class("Base")
            .with_method(constructor())
            .with_method(constant_method("m", 1, AccessFlags::PRIVATE))
            .with_method(MethodDef::new("call", int_proto(0), AccessFlags::PUBLIC, call.build()));
        let mut derived_init = CodeBuilder::new(1);
        derived_init
            .load(ValueKind::Ref, 0)
            .invoke(InvokeKind::Special, MethodRef::new(TypeRef::new("Base"), "<init>", MethodProto::void()), false)
            .ret(None);
        let derived = ClassDef::class("Derived")
            .with_super("Base")
            .with_method(MethodDef::new("<init>", MethodProto::void(), AccessFlags::PUBLIC, derived_init.build()))
            .with_method(constant_method("m", 2, AccessFlags::PUBLIC));
        let main = driver("Derived", InvokeKind::Virtual, "Base", "call", false);
        let classes = vec![base, derived, main];
        assert_eq!(run(classes.clone(), ApiLevel::MASTER).unwrap(), Some(Value::Int(1)));
        assert_eq!(run(classes, ApiLevel::B).unwrap(), Some(Value::Int(2)));
    }

    #[test]
    fn test_lambda_capture_requires_o() {
        let supplier = ClassDef::interface("S").with_method(MethodDef::new_abstract("get", int_proto(0), AccessFlags::PUBLIC | AccessFlags::ABSTRACT));
        let mut body = CodeBuilder::new(0);
        let site = LambdaCallSite::new(
            TypeRef::new("S"),
            "get",
            int_proto(0),
            vec![ValueType::Int],
            MethodHandle::new(HandleKind::InvokeStatic, MethodRef::new(TypeRef::new("Main"), "lambda$0", int_proto(1)), false),
        );
        body.const_int(41)
            .push(Instruction::InvokeDynamic(Box::new(site)))
            .invoke(InvokeKind::Interface, MethodRef::new(TypeRef::new("S"), "get", int_proto(0)), true)
            .ret(Some(ValueKind::Int));
        let mut lambda = CodeBuilder::new(1);
        lambda
            .load(ValueKind::Int, 0)
            .const_int(1)
            .binary(BinaryOp::Add, NumKind::Int)
            .ret(Some(ValueKind::Int));
        let main = ClassDef::class("Main")
            .with_method(MethodDef::new("run", int_proto(0), AccessFlags::PUBLIC | AccessFlags::STATIC, body.build()))
            .with_method(MethodDef::new(
                "lambda$0",
                int_proto(1),
                AccessFlags::PRIVATE | AccessFlags::STATIC | AccessFlags::SYNTHETIC,
                lambda.build(),
            ));
        assert_eq!(run(vec![supplier.clone(), main.clone()], ApiLevel::O).unwrap(), Some(Value::Int(42)));
        assert!(run(vec![supplier, main], ApiLevel::N).unwrap_err().is_thrown("java/lang/VerifyError"));
    }

    #[test]
    fn test_fields_and_statics() {
        let counter = FieldRef::new(TypeRef::new("Main"), "count", ValueType::Int);
        let mut clinit = CodeBuilder::new(0);
        clinit.const_int(10).push(Instruction::PutStatic(counter.clone())).ret(None);
        let mut body = CodeBuilder::new(0);
        body.push(Instruction::GetStatic(counter)).ret(Some(ValueKind::Int));
        let main = ClassDef::class("Main")
            .with_field(FieldDef::new("count", ValueType::Int, AccessFlags::PRIVATE | AccessFlags::STATIC))
            .with_method(MethodDef::new("<clinit>", MethodProto::void(), AccessFlags::STATIC, clinit.build()))
            .with_method(MethodDef::new("run", int_proto(0), AccessFlags::PUBLIC | AccessFlags::STATIC, body.build()));
        assert_eq!(run(vec![main], ApiLevel::B).unwrap(), Some(Value::Int(10)));
    }

    #[test]
    fn test_backported_library_method_missing_at_old_level() {
        let mut body = CodeBuilder::new(0);
        body.const_int(-1)
            .const_int(1)
            .invoke(InvokeKind::Static, MethodRef::parse("java/lang/Integer", "compareUnsigned", "(II)I").unwrap(), false)
            .ret(Some(ValueKind::Int));
        let main = ClassDef::class("Main").with_method(MethodDef::new("run", int_proto(0), AccessFlags::PUBLIC | AccessFlags::STATIC, body.build()));
        assert_eq!(run(vec![main.clone()], ApiLevel::O).unwrap(), Some(Value::Int(1)));
        assert!(run(vec![main], ApiLevel::N).unwrap_err().is_thrown("java/lang/NoSuchMethodError"));
    }

    #[test]
    fn test_step_limit() {
        let mut body = CodeBuilder::new(0);
        let top = body.new_label();
        body.mark(top).push(Instruction::Goto(top));
        let main = ClassDef::class("Main").with_method(MethodDef::new("run", int_proto(0), AccessFlags::PUBLIC | AccessFlags::STATIC, body.build()));
        let program = Program::from_parts(vec![main], Vec::new(), Vec::new()).unwrap();
        let mut vm = Vm::new(program, ApiLevel::B).with_step_limit(100);
        assert_eq!(vm.invoke_static("Main", "run", "()I", &[]).unwrap_err(), VmError::StepLimit(100));
    }
}
