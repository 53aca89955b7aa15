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

//! Retrodex Reference VM
//!
//! A small interpreter for the class model that behaves like a platform
//! runtime at a chosen API level. Desugared programs are run on it at the
//! level they target and compared with the original run at a level that
//! supports the original constructs natively.

pub mod errors;
pub mod interpreter;
pub mod natives;
pub mod stack;
pub mod value;
pub mod verify;

pub use errors::{VmError, VmResult};
pub use interpreter::{DEFAULT_STEP_LIMIT, MAX_CALL_DEPTH, NEST_LEVEL, Vm};
pub use natives::{NativeFn, NativeTable};
pub use stack::{MAX_STACK_SIZE, OperandStack};
pub use value::{Heap, Object, Payload, Value};
pub use verify::verify_class;
