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

//! Synthetic naming registry
//!
//! Names are a pure function of the [`SyntheticContext`] and [`SyntheticKind`]
//! that request them, so independent runs over the same input (and separately
//! compiled units later merged) agree on every synthetic name. The registry
//! memoizes allocations and rejects class names that clash with an original
//! class or with a synthetic class requested by a different context.

use crate::error::{DesugarError, DesugarResult};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use retrodex_common::{MemberKey, TypeRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Why a synthetic artifact exists
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyntheticContext {
    /// Original type the artifact derives from
    pub origin: TypeRef,
    /// Triggering member, if any
    pub member: Option<MemberKey>,
    /// Disambiguates artifacts sharing type and member
    pub ordinal: u32,
}

impl SyntheticContext {
    /// Context keyed to a type alone
    pub fn of_type(origin: TypeRef) -> Self {
        Self {
            origin,
            member: None,
            ordinal: 0,
        }
    }

    /// Context keyed to a member of a type
    pub fn of_member(origin: TypeRef, member: MemberKey) -> Self {
        Self {
            origin,
            member: Some(member),
            ordinal: 0,
        }
    }

    pub fn with_ordinal(mut self, ordinal: u32) -> Self {
        self.ordinal = ordinal;
        self
    }

    fn member_name(&self, kind: SyntheticKind) -> DesugarResult<&str> {
        self.member
            .as_ref()
            .map(|member| &*member.name)
            .ok_or_else(|| DesugarError::internal_error(format!("{:?} name requested without a member for {}", kind, self.origin)))
    }
}

impl fmt::Display for SyntheticContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.member {
            Some(member) => write!(f, "{}.{}#{}", self.origin, member, self.ordinal),
            None => write!(f, "{}#{}", self.origin, self.ordinal),
        }
    }
}

/// Role of a method relocated to a companion class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CompanionRole {
    Default,
    Static,
    Private,
}

/// Operation performed by a nest bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessShape {
    InstanceMethod,
    StaticMethod,
    InstanceGet,
    InstancePut,
    StaticGet,
    StaticPut,
}

impl AccessShape {
    fn prefix(self) -> &'static str {
        match self {
            Self::InstanceMethod => "-$$Nest$m",
            Self::StaticMethod => "-$$Nest$sm",
            Self::InstanceGet => "-$$Nest$fget",
            Self::InstancePut => "-$$Nest$fput",
            Self::StaticGet => "-$$Nest$sfget",
            Self::StaticPut => "-$$Nest$sfput",
        }
    }
}

/// Kind of synthetic artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SyntheticKind {
    LambdaClass,
    CompanionClass,
    DispatchClass,
    BackportClass,
    NestConstructorClass,
    CompanionMethod(CompanionRole),
    NestBridge(AccessShape),
    SuperAccessor,
}

impl SyntheticKind {
    /// Whether the kind names a class, and therefore must be globally unique
    pub fn is_class(self) -> bool {
        matches!(
            self,
            Self::LambdaClass | Self::CompanionClass | Self::DispatchClass | Self::BackportClass | Self::NestConstructorClass
        )
    }

    fn derive_name(self, context: &SyntheticContext) -> DesugarResult<String> {
        let name = match self {
            Self::LambdaClass => format!("{}$$ExternalSyntheticLambda${}", context.origin, context_digest(context)),
            Self::CompanionClass => format!("{}$-CC", context.origin),
            Self::DispatchClass => format!("{}$-EL", context.origin),
            Self::BackportClass => format!(
                "$r8$backportedMethods$utility${}${}${}",
                context.origin.simple_name(),
                context.ordinal,
                context.member_name(self)?
            ),
            Self::NestConstructorClass => format!("{}-$$Nest$Constructor", context.origin),
            Self::CompanionMethod(CompanionRole::Default) => format!("$default${}", context.member_name(self)?),
            Self::CompanionMethod(CompanionRole::Private) => format!("$private${}", context.member_name(self)?),
            Self::CompanionMethod(CompanionRole::Static) => context.member_name(self)?.to_string(),
            Self::NestBridge(shape) => format!("{}{}", shape.prefix(), context.member_name(self)?),
            Self::SuperAccessor => format!("-$$Lambda$super${}", context.member_name(self)?),
        };
        Ok(name)
    }
}

/// Stable digest of the member and ordinal of a context
fn context_digest(context: &SyntheticContext) -> String {
    let mut hasher = blake3::Hasher::new();
    if let Some(member) = &context.member {
        hasher.update(member.name.as_bytes());
        hasher.update(member.descriptor.as_bytes());
    }
    hasher.update(b"#");
    hasher.update(&context.ordinal.to_le_bytes());
    hex::encode_upper(&hasher.finalize().as_bytes()[..6])
}

/// Allocated name of a synthetic class or member
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyntheticName(Arc<str>);

impl SyntheticName {
    fn new(name: String) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name as a class reference
    pub fn as_type(&self) -> TypeRef {
        TypeRef::new(&*self.0)
    }
}

impl fmt::Display for SyntheticName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type RegistryKey = (SyntheticContext, SyntheticKind);

/// Thread-safe, memoizing name allocator shared by all workers of a run
#[derive(Debug, Default)]
pub struct NamingRegistry {
    allocated: DashMap<RegistryKey, SyntheticName>,
    class_owners: DashMap<Arc<str>, RegistryKey>,
    reserved: HashSet<TypeRef>,
}

impl NamingRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that refuses to hand out any of `names` as a class name
    pub fn with_reserved(names: impl IntoIterator<Item = TypeRef>) -> Self {
        Self {
            reserved: names.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Allocate the name for `context` and `kind`, returning the existing one if already allocated
    pub fn allocate(&self, context: &SyntheticContext, kind: SyntheticKind) -> DesugarResult<SyntheticName> {
        let key = (context.clone(), kind);
        if let Some(existing) = self.allocated.get(&key) {
            return Ok(existing.clone());
        }

        match self.allocated.entry(key) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let name = SyntheticName::new(kind.derive_name(context)?);
                if kind.is_class() {
                    self.claim_class_name(&name, entry.key())?;
                }
                debug!(context = %context, ?kind, name = %name, "allocated synthetic name");
                entry.insert(name.clone());
                Ok(name)
            }
        }
    }

    /// Previously allocated name, if any
    pub fn lookup(&self, context: &SyntheticContext, kind: SyntheticKind) -> Option<SyntheticName> {
        self.allocated.get(&(context.clone(), kind)).map(|name| name.clone())
    }

    fn claim_class_name(&self, name: &SyntheticName, key: &RegistryKey) -> DesugarResult<()> {
        if self.reserved.contains(&name.as_type()) {
            return Err(DesugarError::SyntheticNameCollision {
                name: name.to_string(),
                existing: "an original class".to_string(),
                requested: key.0.to_string(),
            });
        }
        match self.class_owners.entry(name.0.clone()) {
            Entry::Occupied(entry) if entry.get() != key => Err(DesugarError::SyntheticNameCollision {
                name: name.to_string(),
                existing: entry.get().0.to_string(),
                requested: key.0.to_string(),
            }),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(entry) => {
                entry.insert(key.clone());
                Ok(())
            }
        }
    }

    /// Number of allocated names
    pub fn len(&self) -> usize {
        self.allocated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocated.is_empty()
    }

    /// Snapshot of all allocations in context order
    pub fn table(&self) -> SyntheticNameTable {
        let entries = self
            .allocated
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        SyntheticNameTable { entries }
    }
}

/// One row of the synthetic name table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticNameEntry {
    pub context: SyntheticContext,
    pub kind: SyntheticKind,
    pub name: SyntheticName,
}

/// Side table from synthetic context to allocated name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyntheticNameTable {
    entries: BTreeMap<RegistryKey, SyntheticName>,
}

impl SyntheticNameTable {
    pub fn get(&self, context: &SyntheticContext, kind: SyntheticKind) -> Option<&SyntheticName> {
        self.entries.get(&(context.clone(), kind))
    }

    /// Entries in context order
    pub fn entries(&self) -> impl Iterator<Item = SyntheticNameEntry> + '_ {
        self.entries.iter().map(|((context, kind), name)| SyntheticNameEntry {
            context: context.clone(),
            kind: *kind,
            name: name.clone(),
        })
    }

    /// Names allocated for a given origin type
    pub fn names_for(&self, origin: &TypeRef) -> Vec<&SyntheticName> {
        self.entries
            .iter()
            .filter(|((context, _), _)| &context.origin == origin)
            .map(|(_, name)| name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Union with the table of another unit; the same key must map to the same name
    pub fn merge(&mut self, other: &SyntheticNameTable) -> DesugarResult<()> {
        for (key, name) in &other.entries {
            match self.entries.get(key) {
                Some(existing) if existing != name => {
                    return Err(DesugarError::merge_conflict(
                        name,
                        format!("context {} is named {} in the other unit", key.0, existing),
                    ));
                }
                Some(_) => {}
                None => {
                    self.entries.insert(key.clone(), name.clone());
                }
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl Serialize for SyntheticNameTable {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries())
    }
}

impl<'de> Deserialize<'de> for SyntheticNameTable {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rows = Vec::<SyntheticNameEntry>::deserialize(deserializer)?;
        let entries = rows.into_iter().map(|row| ((row.context, row.kind), row.name)).collect();
        Ok(Self { entries })
    }
}
