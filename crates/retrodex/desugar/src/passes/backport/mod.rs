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

//! Library method backporting
//!
//! Calls to catalog methods missing at the target level are redirected to a
//! static method in a synthesized utility class. One utility class exists per
//! backported method, named from the method so that independent runs agree.

pub mod catalog;

use self::catalog::BackportEntry;
use super::{ClassWork, rewrite_instructions};
use crate::context::DesugarContext;
use crate::error::DesugarResult;
use crate::features::Construct;
use crate::metrics::Artifact;
use crate::naming::{SyntheticContext, SyntheticKind};
use retrodex_common::{AccessFlags, ClassDef, ClassOrigin, Code, Instruction, InvokeKind, MethodDef, MethodRef};
use tracing::{debug, instrument};

/// Redirect backportable calls in every body of the class
#[instrument(skip_all, fields(class = %work.class.name))]
pub fn run(ctx: &DesugarContext<'_>, work: &mut ClassWork) -> DesugarResult<bool> {
    if !ctx.config.backport_methods {
        return Ok(false);
    }
    let mut changed = false;
    for (_, code) in work.bodies_mut() {
        changed |= rewrite_body(ctx, code)?;
    }
    Ok(changed)
}

/// Rewrite one body, materializing the backports it now calls
pub fn rewrite_body(ctx: &DesugarContext<'_>, code: &mut Code) -> DesugarResult<bool> {
    rewrite_instructions(code, |insn, _| {
        let Instruction::Invoke { kind, method, .. } = insn else {
            return Ok(None);
        };
        let Some(entry) = applicable(ctx, *kind, method) else {
            return Ok(None);
        };
        let target = materialize(ctx, entry)?;
        Ok(Some(vec![Instruction::invoke(InvokeKind::Static, target, false)]))
    })
}

/// Catalog entry replacing a call, when the call needs one at the target level
fn applicable<'c>(ctx: &'c DesugarContext<'_>, kind: InvokeKind, method: &MethodRef) -> Option<&'c BackportEntry> {
    let entry = ctx.catalog.lookup(method)?;
    let shape_matches = match kind {
        InvokeKind::Static => !entry.receiver,
        InvokeKind::Virtual | InvokeKind::Interface => entry.receiver,
        InvokeKind::Special => false,
    };
    if !shape_matches || !ctx.features.support(Construct::LibraryMethod(method), ctx.min_api()).requires_desugaring() {
        return None;
    }
    // A definition supplied by the application is called as is
    match ctx.app.origin(&method.owner) {
        Some(ClassOrigin::Program | ClassOrigin::Classpath) => None,
        Some(ClassOrigin::Library) | None => Some(entry),
    }
}

/// Static method implementing `entry`, synthesizing its utility class on first use
fn materialize(ctx: &DesugarContext<'_>, entry: &BackportEntry) -> DesugarResult<MethodRef> {
    let context = SyntheticContext::of_member(entry.method.owner.clone(), entry.method.key()).with_ordinal(entry.overload);
    let class_name = ctx.registry.allocate(&context, SyntheticKind::BackportClass)?.as_type();
    let target = MethodRef::new(class_name.clone(), &*entry.method.name, entry.static_proto());
    if ctx.synthetics.contains_class(&class_name) {
        return Ok(target);
    }

    let mut body = entry.body();
    rewrite_body(ctx, &mut body)?;
    let method = MethodDef::new(
        &*entry.method.name,
        entry.static_proto(),
        AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::SYNTHETIC,
        body,
    );
    let class = ClassDef::class(class_name.as_str())
        .with_flags(AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::SYNTHETIC)
        .with_method(method);
    if ctx.synthetics.add_class(class)? {
        debug!(method = %entry.method, utility = %class_name, "backported library method");
        ctx.metrics.record_artifact(Artifact::Backport);
    }
    Ok(target)
}
