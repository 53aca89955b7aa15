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

//! Load-time verification
//!
//! A class is rejected when it uses a construct the runtime cannot load:
//! interface method bodies before N and capture sites before O.

use crate::errors::{VmError, VmResult};
use retrodex_common::{ApiLevel, ClassDef, Instruction};

/// First level loading interfaces with default, static or private bodies
pub const INTERFACE_BODIES_LEVEL: ApiLevel = ApiLevel::N;
/// First level resolving lambda capture sites
pub const CAPTURE_SITES_LEVEL: ApiLevel = ApiLevel::O;

/// Verify `class` for a runtime at `api`
pub fn verify_class(class: &ClassDef, api: ApiLevel) -> VmResult<()> {
    if let Err(error) = class.validate() {
        return Err(VmError::verify(format!("{}: {error}", class.name)));
    }
    if class.is_interface() && api < INTERFACE_BODIES_LEVEL {
        for method in &class.methods {
            if method.code.is_some() && !method.is_class_initializer() {
                return Err(VmError::verify(format!(
                    "interface {} declares a body for {}{}",
                    class.name,
                    method.name,
                    method.proto.descriptor()
                )));
            }
        }
    }
    if api < CAPTURE_SITES_LEVEL {
        for method in &class.methods {
            let uses_capture_site = method
                .code
                .as_ref()
                .is_some_and(|code| code.instructions.iter().any(|insn| matches!(insn, Instruction::InvokeDynamic(_))));
            if uses_capture_site {
                return Err(VmError::verify(format!("{}.{} uses invokedynamic", class.name, method.name)));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrodex_common::{AccessFlags, CodeBuilder, MethodDef, MethodProto, ValueKind};

    fn default_method() -> MethodDef {
        let mut body = CodeBuilder::new(1);
        body.const_int(1).ret(Some(ValueKind::Int));
        MethodDef::new("one", MethodProto::new(Vec::new(), Some(retrodex_common::ValueType::Int)), AccessFlags::PUBLIC, body.build())
    }

    #[test]
    fn test_interface_bodies_rejected_before_n() {
        let iface = ClassDef::interface("I").with_method(default_method());
        assert!(verify_class(&iface, ApiLevel::M).unwrap_err().is_thrown("java/lang/VerifyError"));
        assert!(verify_class(&iface, ApiLevel::N).is_ok());
    }

    #[test]
    fn test_class_initializer_allowed() {
        let mut body = CodeBuilder::new(0);
        body.ret(None);
        let clinit = MethodDef::new("<clinit>", MethodProto::void(), AccessFlags::STATIC, body.build());
        let iface = ClassDef::interface("I").with_method(clinit);
        assert!(verify_class(&iface, ApiLevel::B).is_ok());
    }
}
