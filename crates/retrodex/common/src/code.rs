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

//! Stack-machine instruction set and method bodies
//!
//! Every local occupies exactly one slot, including longs. Branch targets are
//! symbolic [`Label`]s placed with [`Instruction::Mark`].

use crate::error::{ModelError, ModelResult};
use crate::types::{FieldRef, MethodProto, MethodRef, TypeRef, ValueKind, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Symbolic branch target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label(pub u32);

/// Constant pushed by [`Instruction::Const`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constant {
    Int(i32),
    Long(i64),
    Null,
    String(Arc<str>),
}

/// Width of an arithmetic operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumKind {
    Int,
    Long,
}

/// Binary arithmetic and bitwise operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

/// Primitive conversions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Conversion {
    IntToLong,
    LongToInt,
}

/// Branch conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Condition {
    /// Evaluate the condition for an ordering of `lhs` against `rhs`
    pub fn holds<T: Ord>(self, lhs: T, rhs: T) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Ge => lhs >= rhs,
            Self::Gt => lhs > rhs,
            Self::Le => lhs <= rhs,
        }
    }
}

/// Invocation opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvokeKind {
    Static,
    Virtual,
    Interface,
    /// Non-virtual invocation: constructors, private methods and super calls
    Special,
}

/// Method handle kinds usable as lambda implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleKind {
    InvokeStatic,
    InvokeVirtual,
    InvokeInterface,
    InvokeSpecial,
    NewInvokeSpecial,
}

/// Constant method handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodHandle {
    pub kind: HandleKind,
    pub method: MethodRef,
    /// Whether the owner is an interface
    pub interface: bool,
}

impl MethodHandle {
    /// Create a method handle
    pub fn new(kind: HandleKind, method: MethodRef, interface: bool) -> Self {
        Self { kind, method, interface }
    }

    /// Whether invoking the handle consumes a receiver argument
    pub fn has_receiver(&self) -> bool {
        matches!(self.kind, HandleKind::InvokeVirtual | HandleKind::InvokeInterface | HandleKind::InvokeSpecial)
    }
}

/// Lambda capture site, the equivalent of a metafactory `invokedynamic`
///
/// Captured values are on the operand stack in declaration order when the
/// instruction executes; it leaves one instance of `interface` behind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LambdaCallSite {
    /// Functional interface implemented by the lambda
    pub interface: TypeRef,
    /// Name of the single abstract method
    pub method_name: Arc<str>,
    /// Erased prototype of the abstract method
    pub erased_proto: MethodProto,
    /// Prototype of the abstract method after generic instantiation
    pub instantiated_proto: MethodProto,
    /// Types of the captured values
    pub captures: Vec<ValueType>,
    /// Method implementing the lambda body
    pub implementation: MethodHandle,
    /// Additional prototypes the generated class must also implement
    pub bridges: Vec<MethodProto>,
    /// Additional marker interfaces
    pub markers: Vec<TypeRef>,
    /// Whether the body receives the lambda instance as its leading argument
    pub self_referencing: bool,
}

impl LambdaCallSite {
    /// Create a capture site without bridges, markers or self reference
    pub fn new(interface: TypeRef, method_name: impl AsRef<str>, erased_proto: MethodProto, captures: Vec<ValueType>, implementation: MethodHandle) -> Self {
        Self {
            interface,
            method_name: Arc::from(method_name.as_ref()),
            instantiated_proto: erased_proto.clone(),
            erased_proto,
            captures,
            implementation,
            bridges: Vec::new(),
            markers: Vec::new(),
            self_referencing: false,
        }
    }

    /// A lambda that captures nothing
    pub fn is_stateless(&self) -> bool {
        self.captures.is_empty()
    }

    /// Prototype of the capture site itself: captures in, interface out
    pub fn site_proto(&self) -> MethodProto {
        MethodProto::new(self.captures.clone(), Some(self.interface.as_value_type()))
    }
}

/// A single instruction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Instruction {
    Const(Constant),
    Load { kind: ValueKind, index: u16 },
    Store { kind: ValueKind, index: u16 },
    Dup,
    Pop,
    Swap,
    Binary { op: BinaryOp, kind: NumKind },
    Neg(NumKind),
    Convert(Conversion),
    /// Compare two longs, pushing -1, 0 or 1
    LongCompare,
    /// Compare an int against zero
    If { cond: Condition, target: Label },
    /// Compare two ints
    IfCmp { cond: Condition, target: Label },
    IfNull { target: Label },
    IfNonNull { target: Label },
    IfRefEq { target: Label },
    IfRefNe { target: Label },
    Goto(Label),
    /// Position of a label
    Mark(Label),
    /// Source line of the following instructions
    Line(u32),
    New(TypeRef),
    GetField(FieldRef),
    PutField(FieldRef),
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    Invoke { kind: InvokeKind, method: MethodRef, interface: bool },
    InvokeDynamic(Box<LambdaCallSite>),
    CheckCast(TypeRef),
    InstanceOf(TypeRef),
    Throw,
    Return(Option<ValueKind>),
}

impl Instruction {
    /// Branch target of the instruction, if any
    pub fn branch_target(&self) -> Option<Label> {
        match self {
            Self::If { target, .. }
            | Self::IfCmp { target, .. }
            | Self::IfNull { target }
            | Self::IfNonNull { target }
            | Self::IfRefEq { target }
            | Self::IfRefNe { target }
            | Self::Goto(target) => Some(*target),
            _ => None,
        }
    }

    /// Convenience constructor for method invocations
    pub fn invoke(kind: InvokeKind, method: MethodRef, interface: bool) -> Self {
        Self::Invoke { kind, method, interface }
    }
}

/// Method body
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Code {
    pub max_locals: u16,
    pub instructions: Vec<Instruction>,
}

impl Code {
    /// Create a method body
    pub fn new(max_locals: u16, instructions: Vec<Instruction>) -> Self {
        Self { max_locals, instructions }
    }

    /// Reserve a new local slot
    pub fn fresh_local(&mut self) -> u16 {
        let slot = self.max_locals;
        self.max_locals += 1;
        slot
    }

    /// A label not yet used by this body
    pub fn next_label(&self) -> Label {
        let max = self
            .instructions
            .iter()
            .filter_map(|insn| match insn {
                Instruction::Mark(label) => Some(label.0),
                other => other.branch_target().map(|label| label.0),
            })
            .max();
        Label(max.map_or(0, |value| value + 1))
    }

    /// Map each label to the index of its [`Instruction::Mark`]
    pub fn label_positions(&self, method: &str) -> ModelResult<HashMap<Label, usize>> {
        let mut positions = HashMap::new();
        for (index, insn) in self.instructions.iter().enumerate() {
            if let Instruction::Mark(label) = insn
                && positions.insert(*label, index).is_some()
            {
                return Err(ModelError::DuplicateLabel {
                    method: method.to_string(),
                    label: label.0,
                });
            }
        }
        Ok(positions)
    }

    /// Check that every branch target is defined exactly once
    pub fn validate(&self, method: &str) -> ModelResult<()> {
        let positions = self.label_positions(method)?;
        for insn in &self.instructions {
            if let Some(target) = insn.branch_target()
                && !positions.contains_key(&target)
            {
                return Err(ModelError::UndefinedLabel {
                    method: method.to_string(),
                    label: target.0,
                });
            }
        }
        Ok(())
    }
}

/// Incremental builder for synthesized method bodies
#[derive(Debug, Default)]
pub struct CodeBuilder {
    instructions: Vec<Instruction>,
    max_locals: u16,
    next_label: u32,
}

impl CodeBuilder {
    /// Builder for a body whose arguments occupy `arg_slots` locals
    pub fn new(arg_slots: u16) -> Self {
        Self {
            instructions: Vec::new(),
            max_locals: arg_slots,
            next_label: 0,
        }
    }

    /// Builder sized for a method with the given prototype
    pub fn for_method(proto: &MethodProto, is_static: bool) -> Self {
        let receiver = if is_static { 0 } else { 1 };
        Self::new(proto.params.len() as u16 + receiver)
    }

    /// Allocate a fresh label
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Allocate a fresh local slot
    pub fn new_local(&mut self) -> u16 {
        let slot = self.max_locals;
        self.max_locals += 1;
        slot
    }

    /// Append an instruction
    pub fn push(&mut self, insn: Instruction) -> &mut Self {
        self.instructions.push(insn);
        self
    }

    /// Place a label at the current position
    pub fn mark(&mut self, label: Label) -> &mut Self {
        self.push(Instruction::Mark(label))
    }

    pub fn const_int(&mut self, value: i32) -> &mut Self {
        self.push(Instruction::Const(Constant::Int(value)))
    }

    pub fn const_long(&mut self, value: i64) -> &mut Self {
        self.push(Instruction::Const(Constant::Long(value)))
    }

    pub fn const_null(&mut self) -> &mut Self {
        self.push(Instruction::Const(Constant::Null))
    }

    pub fn const_string(&mut self, value: &str) -> &mut Self {
        self.push(Instruction::Const(Constant::String(Arc::from(value))))
    }

    pub fn load(&mut self, kind: ValueKind, index: u16) -> &mut Self {
        self.push(Instruction::Load { kind, index })
    }

    pub fn store(&mut self, kind: ValueKind, index: u16) -> &mut Self {
        self.push(Instruction::Store { kind, index })
    }

    pub fn binary(&mut self, op: BinaryOp, kind: NumKind) -> &mut Self {
        self.push(Instruction::Binary { op, kind })
    }

    pub fn invoke(&mut self, kind: InvokeKind, method: MethodRef, interface: bool) -> &mut Self {
        self.push(Instruction::invoke(kind, method, interface))
    }

    /// Load consecutive locals for `params`, starting at `first_slot`
    pub fn load_params(&mut self, params: &[ValueType], first_slot: u16) -> &mut Self {
        for (offset, param) in params.iter().enumerate() {
            self.load(param.kind(), first_slot + offset as u16);
        }
        self
    }

    /// `new` + `dup` + message + `<init>` + `throw` for a library throwable
    pub fn throw_new(&mut self, exception: &str, message: Option<&str>) -> &mut Self {
        let owner = TypeRef::new(exception);
        self.push(Instruction::New(owner.clone())).push(Instruction::Dup);
        let proto = match message {
            Some(text) => {
                self.const_string(text);
                MethodProto::new(vec![ValueType::object("java/lang/String")], None)
            }
            None => MethodProto::void(),
        };
        self.invoke(InvokeKind::Special, MethodRef::new(owner, "<init>", proto), false);
        self.push(Instruction::Throw)
    }

    pub fn ret(&mut self, kind: Option<ValueKind>) -> &mut Self {
        self.push(Instruction::Return(kind))
    }

    /// Finish the body
    pub fn build(self) -> Code {
        Code::new(self.max_locals, self.instructions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_validation() {
        let mut builder = CodeBuilder::new(1);
        let done = builder.new_label();
        builder
            .load(ValueKind::Int, 0)
            .push(Instruction::If { cond: Condition::Eq, target: done })
            .const_int(1)
            .ret(Some(ValueKind::Int))
            .mark(done)
            .const_int(0)
            .ret(Some(ValueKind::Int));
        let code = builder.build();
        assert!(code.validate("test").is_ok());
        assert_eq!(code.next_label(), Label(1));
    }

    #[test]
    fn test_undefined_label() {
        let code = Code::new(0, vec![Instruction::Goto(Label(7))]);
        assert_eq!(
            code.validate("m"),
            Err(ModelError::UndefinedLabel {
                method: "m".to_string(),
                label: 7
            })
        );
    }

    #[test]
    fn test_duplicate_label() {
        let code = Code::new(0, vec![Instruction::Mark(Label(0)), Instruction::Mark(Label(0))]);
        assert!(matches!(code.validate("m"), Err(ModelError::DuplicateLabel { .. })));
    }

    #[test]
    fn test_fresh_locals() {
        let mut code = Code::new(2, Vec::new());
        assert_eq!(code.fresh_local(), 2);
        assert_eq!(code.fresh_local(), 3);
        assert_eq!(code.max_locals, 4);
    }

    #[test]
    fn test_condition_evaluation() {
        assert!(Condition::Lt.holds(-1, 0));
        assert!(Condition::Ge.holds(3, 3));
        assert!(!Condition::Ne.holds(2, 2));
    }
}
