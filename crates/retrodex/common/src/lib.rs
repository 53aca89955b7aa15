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

//! Class-definition model shared by the desugaring engine and the reference VM
//!
//! The model mirrors the parts of a compiled class file the desugarer needs:
//! type and member references in JVM descriptor syntax, access flags, a
//! stack-machine instruction set with lambda capture sites, and a program made
//! of program, classpath and library classes.

pub mod api;
pub mod class;
pub mod code;
pub mod error;
pub mod flags;
pub mod program;
pub mod types;

pub use api::ApiLevel;
pub use class::{ClassDef, FieldDef, MethodDef};
pub use code::{
    BinaryOp, Code, CodeBuilder, Condition, Constant, Conversion, HandleKind, Instruction, InvokeKind, Label, LambdaCallSite, MethodHandle, NumKind,
};
pub use error::{ModelError, ModelResult};
pub use flags::AccessFlags;
pub use program::{ClassOrigin, Program};
pub use types::{FieldRef, MemberKey, MethodProto, MethodRef, TypeRef, ValueKind, ValueType};
