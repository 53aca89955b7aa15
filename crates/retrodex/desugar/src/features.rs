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

//! Platform feature model
//!
//! Maps language and library constructs to the minimum API level at which the
//! target runtime supports them natively. Lookups are pure; the rewriting passes
//! consult the model before touching any instruction.

use retrodex_common::{ApiLevel, MethodRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Construct kinds with a fixed platform threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructKind {
    DefaultInterfaceMethods,
    StaticInterfaceMethods,
    PrivateInterfaceMethods,
    LambdaExpressions,
    NestBasedAccess,
}

impl ConstructKind {
    pub const ALL: [ConstructKind; 5] = [
        ConstructKind::DefaultInterfaceMethods,
        ConstructKind::StaticInterfaceMethods,
        ConstructKind::PrivateInterfaceMethods,
        ConstructKind::LambdaExpressions,
        ConstructKind::NestBasedAccess,
    ];
}

/// A construct whose support is queried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Construct<'a> {
    Language(ConstructKind),
    /// A specific library method signature
    LibraryMethod(&'a MethodRef),
}

/// Outcome of a feature lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    Supported,
    RequiresDesugaring,
}

impl Support {
    pub fn requires_desugaring(self) -> bool {
        self == Support::RequiresDesugaring
    }
}

/// Minimum level of one construct kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRequirement {
    pub construct: ConstructKind,
    pub minimum: ApiLevel,
}

/// What happens to a default method once its body has moved to the companion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwarderPolicy {
    /// The interface keeps an abstract declaration and every implementer without
    /// an override receives a forwarder
    #[default]
    Strip,
    /// The interface keeps a default method forwarding to the companion
    KeepInInterface,
}

/// Platform thresholds, overriding the Android table where listed
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureTable {
    pub requirements: Vec<FeatureRequirement>,
    pub forwarder_policy: ForwarderPolicy,
}

impl FeatureTable {
    /// Thresholds of the Android runtime
    pub fn android() -> Self {
        Self {
            requirements: vec![
                FeatureRequirement {
                    construct: ConstructKind::DefaultInterfaceMethods,
                    minimum: ApiLevel::N,
                },
                FeatureRequirement {
                    construct: ConstructKind::StaticInterfaceMethods,
                    minimum: ApiLevel::N,
                },
                FeatureRequirement {
                    construct: ConstructKind::PrivateInterfaceMethods,
                    minimum: ApiLevel::N,
                },
                FeatureRequirement {
                    construct: ConstructKind::LambdaExpressions,
                    minimum: ApiLevel::O,
                },
                FeatureRequirement {
                    construct: ConstructKind::NestBasedAccess,
                    minimum: ApiLevel::MASTER,
                },
            ],
            forwarder_policy: ForwarderPolicy::Strip,
        }
    }

    pub fn with_requirement(mut self, construct: ConstructKind, minimum: ApiLevel) -> Self {
        self.requirements.retain(|requirement| requirement.construct != construct);
        self.requirements.push(FeatureRequirement { construct, minimum });
        self
    }

    pub fn with_forwarder_policy(mut self, policy: ForwarderPolicy) -> Self {
        self.forwarder_policy = policy;
        self
    }
}

/// Target platform description
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformProfile {
    #[default]
    Android,
    Custom(FeatureTable),
}

/// Resolved feature model
#[derive(Debug, Clone)]
pub struct FeatureModel {
    thresholds: HashMap<ConstructKind, ApiLevel>,
    library: HashMap<MethodRef, ApiLevel>,
    forwarder_policy: ForwarderPolicy,
}

impl FeatureModel {
    /// Build the model for a platform profile
    pub fn new(profile: &PlatformProfile) -> Self {
        let mut thresholds: HashMap<ConstructKind, ApiLevel> = FeatureTable::android()
            .requirements
            .into_iter()
            .map(|requirement| (requirement.construct, requirement.minimum))
            .collect();
        let mut forwarder_policy = ForwarderPolicy::Strip;
        if let PlatformProfile::Custom(table) = profile {
            for requirement in &table.requirements {
                thresholds.insert(requirement.construct, requirement.minimum);
            }
            forwarder_policy = table.forwarder_policy;
        }
        Self {
            thresholds,
            library: HashMap::new(),
            forwarder_policy,
        }
    }

    /// Register the introduction level of a library method
    pub fn register_library_method(&mut self, method: MethodRef, introduced: ApiLevel) {
        self.library.insert(method, introduced);
    }

    /// Minimum level that supports `construct`; unknown library methods are always present
    pub fn minimum(&self, construct: Construct<'_>) -> ApiLevel {
        match construct {
            Construct::Language(kind) => self.thresholds.get(&kind).copied().unwrap_or(ApiLevel::B),
            Construct::LibraryMethod(method) => self.library.get(method).copied().unwrap_or(ApiLevel::B),
        }
    }

    /// Whether `construct` runs natively at `target`
    pub fn support(&self, construct: Construct<'_>, target: ApiLevel) -> Support {
        if target.is_at_least(self.minimum(construct)) {
            Support::Supported
        } else {
            Support::RequiresDesugaring
        }
    }

    /// Shorthand for language constructs
    pub fn requires_desugaring(&self, kind: ConstructKind, target: ApiLevel) -> bool {
        self.support(Construct::Language(kind), target).requires_desugaring()
    }

    pub fn forwarder_policy(&self) -> ForwarderPolicy {
        self.forwarder_policy
    }
}
