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

//! Interface method desugaring
//!
//! Default, static and private interface bodies move to a companion class
//! named `Interface$-CC`. Call sites are redirected to the companion, classes
//! inheriting a default get a forwarder, and emulated library interfaces are
//! dispatched through `$-EL` classes.

pub mod companion;
pub mod emulated;
pub mod forwarders;

use super::ClassWork;
use crate::context::DesugarContext;
use crate::error::DesugarResult;
use crate::features::ForwarderPolicy;
use tracing::instrument;

#[instrument(skip_all, fields(class = %work.class.name))]
pub fn run(ctx: &DesugarContext<'_>, work: &mut ClassWork) -> DesugarResult<bool> {
    if !ctx.config.desugar_interfaces {
        return Ok(false);
    }
    let mut changed = false;
    if work.class.is_interface() && ctx.desugars_interfaces() {
        changed |= companion::relocate(ctx, work)?;
    }
    changed |= companion::rewrite_calls(ctx, work)?;
    if !work.class.is_interface() {
        changed |= emulated::add_emulated_interfaces(ctx, &mut work.class);
        if ctx.features.forwarder_policy() == ForwarderPolicy::Strip {
            changed |= forwarders::add_forwarders(ctx, &mut work.class)?;
        }
    }
    Ok(changed)
}
