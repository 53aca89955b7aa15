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

//! Per-class rewriting passes
//!
//! The kinds of desugaring form a closed set dispatched with exhaustive
//! matches. Each pass rewrites one [`ClassWork`] in place and reports whether
//! it changed anything.

pub mod backport;
pub mod interfaces;
pub mod lambda;
pub mod nest;

use crate::context::DesugarContext;
use crate::error::{DesugarError, DesugarResult};
use crate::features::ConstructKind;
use retrodex_common::{ClassDef, Code, Instruction, MemberKey, MethodDef, MethodRef};

/// Kind of desugaring applied to a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Desugaring {
    /// Nothing to do for the target
    NoOp,
    /// Library calls replaced by synthesized implementations
    Backport,
    /// Private nest access routed through bridges
    Bridge,
    /// Interface method bodies moved to companion classes
    CompanionRelocate,
    /// Lambda capture sites turned into classes
    LambdaClassify,
}

impl Desugaring {
    /// Pass order for a program class
    pub const ORDER: [Desugaring; 4] = [
        Desugaring::Backport,
        Desugaring::Bridge,
        Desugaring::CompanionRelocate,
        Desugaring::LambdaClassify,
    ];

    /// Pass order for a synthesized lambda class
    pub const LAMBDA_CLASS_ORDER: [Desugaring; 3] = [Desugaring::Backport, Desugaring::Bridge, Desugaring::CompanionRelocate];

    pub fn name(self) -> &'static str {
        match self {
            Self::NoOp => "noop",
            Self::Backport => "backport",
            Self::Bridge => "nest-bridge",
            Self::CompanionRelocate => "interface",
            Self::LambdaClassify => "lambda",
        }
    }

    /// Whether the pass has any work at the configured target
    pub fn is_needed(self, ctx: &DesugarContext<'_>) -> bool {
        match self {
            Self::NoOp => false,
            Self::Backport => ctx.config.backport_methods,
            Self::Bridge => ctx.config.desugar_nests && ctx.requires(ConstructKind::NestBasedAccess),
            Self::CompanionRelocate => ctx.desugars_interfaces() || (ctx.config.desugar_interfaces && !ctx.app.emulations().is_empty()),
            Self::LambdaClassify => ctx.config.desugar_lambdas && ctx.requires(ConstructKind::LambdaExpressions),
        }
    }

    /// Passes to run for the target, or `[NoOp]` when nothing applies
    pub fn plan(ctx: &DesugarContext<'_>, order: &[Desugaring]) -> Vec<Desugaring> {
        let plan: Vec<Desugaring> = order.iter().copied().filter(|pass| pass.is_needed(ctx)).collect();
        if plan.is_empty() { vec![Desugaring::NoOp] } else { plan }
    }

    /// Run the pass on one class
    pub fn run(self, ctx: &DesugarContext<'_>, work: &mut ClassWork) -> DesugarResult<bool> {
        match self {
            Self::NoOp => Ok(false),
            Self::Backport => backport::run(ctx, work),
            Self::Bridge => nest::run(ctx, work),
            Self::CompanionRelocate => interfaces::run(ctx, work),
            Self::LambdaClassify => lambda::run(ctx, work),
        }
    }
}

/// A method moved out of an interface, keyed by its original signature
#[derive(Debug, Clone)]
pub struct RelocatedMethod {
    pub origin: MemberKey,
    pub method: MethodDef,
}

/// A class being rewritten by one worker
#[derive(Debug, Clone)]
pub struct ClassWork {
    pub class: ClassDef,
    /// Bodies moved to the companion of `class`, committed once all passes ran
    pub relocated: Vec<RelocatedMethod>,
    /// Lambda classes synthesized for capture sites of `class`
    pub lambda_classes: Vec<ClassDef>,
    /// Whether `class` was itself synthesized during this run
    pub synthesized: bool,
}

impl ClassWork {
    pub fn new(class: ClassDef) -> Self {
        Self {
            class,
            relocated: Vec::new(),
            lambda_classes: Vec::new(),
            synthesized: false,
        }
    }

    pub fn synthesized(class: ClassDef) -> Self {
        Self {
            synthesized: true,
            ..Self::new(class)
        }
    }

    /// Every body of the class and of its relocated methods, with the
    /// reference naming it in diagnostics
    pub fn bodies_mut(&mut self) -> Vec<(MethodRef, &mut Code)> {
        let owner = self.class.name.clone();
        let mut bodies = Vec::new();
        for method in &mut self.class.methods {
            let reference = method.reference(&owner);
            if let Some(code) = method.code.as_mut() {
                bodies.push((reference, code));
            }
        }
        for relocated in &mut self.relocated {
            let reference = MethodRef::new(owner.clone(), &*relocated.origin.name, relocated.method.proto.clone());
            if let Some(code) = relocated.method.code.as_mut() {
                bodies.push((reference, code));
            }
        }
        bodies
    }
}

/// Mutable state available while rewriting one body
#[derive(Debug)]
pub struct Cursor {
    /// Source line of the instruction being rewritten
    pub line: Option<u32>,
    max_locals: u16,
}

impl Cursor {
    /// Reserve a fresh local slot in the body
    pub fn fresh_local(&mut self) -> DesugarResult<u16> {
        let slot = self.max_locals;
        self.max_locals = slot.checked_add(1).ok_or_else(|| {
            DesugarError::malformed_code(
                self.line.map_or_else(|| "rewritten body".to_string(), |line| format!("rewritten body at line {line}")),
                format!("no local slot left after {}", u16::MAX),
            )
        })?;
        Ok(slot)
    }
}

/// Replace instructions of `code` for which `rewrite` returns a replacement sequence
pub fn rewrite_instructions<F>(code: &mut Code, mut rewrite: F) -> DesugarResult<bool>
where
    F: FnMut(&Instruction, &mut Cursor) -> DesugarResult<Option<Vec<Instruction>>>,
{
    let mut cursor = Cursor {
        line: None,
        max_locals: code.max_locals,
    };
    let mut rewritten = Vec::with_capacity(code.instructions.len());
    let mut changed = false;
    for insn in &code.instructions {
        if let Instruction::Line(line) = insn {
            cursor.line = Some(*line);
        }
        match rewrite(insn, &mut cursor)? {
            Some(replacement) => {
                changed = true;
                rewritten.extend(replacement);
            }
            None => rewritten.push(insn.clone()),
        }
    }
    if changed {
        code.instructions = rewritten;
        code.max_locals = cursor.max_locals;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrodex_common::{CodeBuilder, Constant, ValueKind};

    #[test]
    fn test_rewrite_replaces_and_tracks_lines() {
        let mut builder = CodeBuilder::new(1);
        builder.push(Instruction::Line(7)).const_int(1).const_int(2).ret(Some(ValueKind::Int));
        let mut code = builder.build();
        let mut seen_line = None;
        let changed = rewrite_instructions(&mut code, |insn, cursor| {
            if let Instruction::Const(Constant::Int(2)) = insn {
                seen_line = cursor.line;
                let slot = cursor.fresh_local()?;
                return Ok(Some(vec![
                    Instruction::Const(Constant::Int(3)),
                    Instruction::Store { kind: ValueKind::Int, index: slot },
                    Instruction::Load { kind: ValueKind::Int, index: slot },
                ]));
            }
            Ok(None)
        })
        .unwrap();
        assert!(changed);
        assert_eq!(seen_line, Some(7));
        assert_eq!(code.max_locals, 2);
        assert_eq!(code.instructions.len(), 7);
    }

    #[test]
    fn test_exhausted_locals_are_malformed() {
        let mut cursor = Cursor {
            line: Some(3),
            max_locals: u16::MAX - 1,
        };
        assert_eq!(cursor.fresh_local().unwrap(), u16::MAX - 1);
        assert!(matches!(cursor.fresh_local(), Err(DesugarError::MalformedCode { .. })));
        assert_eq!(cursor.max_locals, u16::MAX);
    }

    #[test]
    fn test_unchanged_body_is_identical() {
        let mut builder = CodeBuilder::new(0);
        builder.ret(None);
        let mut code = builder.build();
        let before = code.clone();
        assert!(!rewrite_instructions(&mut code, |_, _| Ok(None)).unwrap());
        assert_eq!(code, before);
    }
}
