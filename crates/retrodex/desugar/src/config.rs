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

//! Desugarer configuration

use crate::error::{DesugarError, DesugarResult};
use crate::features::{ConstructKind, PlatformProfile};
use retrodex_common::{ApiLevel, MethodProto, MethodRef, TypeRef};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A default method of a library interface that is emulated below its introduction level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatedMethod {
    pub name: String,
    pub descriptor: String,
    pub introduced: ApiLevel,
}

impl EmulatedMethod {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>, introduced: ApiLevel) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            introduced,
        }
    }

    /// Parsed prototype; configurations are validated before use
    pub fn proto(&self) -> DesugarResult<MethodProto> {
        Ok(self.descriptor.parse()?)
    }
}

/// A library subtype whose own implementation of an emulated method takes precedence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatedOverride {
    /// Library class or interface overriding the method
    pub subtype: TypeRef,
    pub method: String,
    pub descriptor: String,
    /// Class holding a static implementation taking the subtype as first argument
    pub implementation: TypeRef,
}

/// A library interface whose default methods are dispatched through a generated dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatedInterface {
    /// Interface as named by the platform library, e.g. `java/util/Map`
    pub library_interface: TypeRef,
    /// Interface implemented by program classes to opt into emulation, e.g. `j$/util/Map`
    pub emulated_interface: TypeRef,
    /// Emulation-library class holding the default implementations as statics
    pub companion: TypeRef,
    pub methods: Vec<EmulatedMethod>,
    #[serde(default)]
    pub overrides: Vec<EmulatedOverride>,
}

impl EmulatedInterface {
    /// Emulation of `library_interface` under the conventional `j$` names
    pub fn new(library_interface: impl AsRef<str>) -> Self {
        let library_interface = TypeRef::new(library_interface);
        let suffix = library_interface.as_str().strip_prefix("java/").unwrap_or(library_interface.as_str());
        let emulated_interface = TypeRef::new(format!("j$/{}", suffix));
        Self {
            companion: emulated_interface.with_suffix("$-CC"),
            library_interface,
            emulated_interface,
            methods: Vec::new(),
            overrides: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: EmulatedMethod) -> Self {
        self.methods.push(method);
        self
    }

    pub fn with_override(mut self, override_: EmulatedOverride) -> Self {
        self.overrides.push(override_);
        self
    }

    /// Emulated method matching a reference on the library interface, if absent at `min_api`
    pub fn emulated_method(&self, name: &str, proto: &MethodProto, min_api: ApiLevel) -> Option<&EmulatedMethod> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == proto.descriptor() && !min_api.is_at_least(method.introduced))
    }

    /// Whether any method of the interface needs emulation at `min_api`
    pub fn is_active(&self, min_api: ApiLevel) -> bool {
        self.methods.iter().any(|method| !min_api.is_at_least(method.introduced))
    }

    /// Static implementation of `method` in the emulation companion
    pub fn companion_method(&self, method: &EmulatedMethod) -> DesugarResult<MethodRef> {
        let proto = method.proto()?.prepend(self.library_interface.as_value_type());
        Ok(MethodRef::new(self.companion.clone(), &method.name, proto))
    }

    fn validate(&self) -> DesugarResult<()> {
        let field = format!("emulated_interfaces[{}]", self.library_interface);
        if self.library_interface == self.emulated_interface {
            return Err(DesugarError::config_validation(field, "emulated interface must differ from the library interface"));
        }
        if self.methods.is_empty() {
            return Err(DesugarError::config_validation(field, "no emulated methods listed"));
        }
        let mut seen = HashSet::new();
        for method in &self.methods {
            method
                .proto()
                .map_err(|_| DesugarError::config_validation(field.clone(), format!("invalid descriptor {}", method.descriptor)))?;
            if !seen.insert((method.name.as_str(), method.descriptor.as_str())) {
                return Err(DesugarError::config_validation(field, format!("method {}{} listed twice", method.name, method.descriptor)));
            }
        }
        for override_ in &self.overrides {
            if !seen.contains(&(override_.method.as_str(), override_.descriptor.as_str())) {
                return Err(DesugarError::config_validation(
                    field,
                    format!("override in {} names unknown method {}{}", override_.subtype, override_.method, override_.descriptor),
                ));
            }
        }
        Ok(())
    }
}

/// Configuration for a desugaring run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesugarConfig {
    /// Minimum API level the output must run on
    pub min_api: ApiLevel,
    /// Platform feature thresholds
    pub platform: PlatformProfile,
    /// Library interfaces with emulated default methods
    pub emulated_interfaces: Vec<EmulatedInterface>,
    /// Whether to desugar default, static and private interface methods
    pub desugar_interfaces: bool,
    /// Whether to desugar lambda capture sites
    pub desugar_lambdas: bool,
    /// Whether to backport library methods
    pub backport_methods: bool,
    /// Whether to bridge private nest access
    pub desugar_nests: bool,
    /// Whether to process classes on a worker pool
    pub parallel: bool,
    /// Worker count; `None` uses the global pool
    pub threads: Option<usize>,
}

impl Default for DesugarConfig {
    fn default() -> Self {
        Self {
            min_api: ApiLevel::B,
            platform: PlatformProfile::Android,
            emulated_interfaces: Vec::new(),
            desugar_interfaces: true,
            desugar_lambdas: true,
            backport_methods: true,
            desugar_nests: true,
            parallel: true,
            threads: None,
        }
    }
}

impl DesugarConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration targeting `min_api`
    pub fn for_api(min_api: ApiLevel) -> Self {
        Self { min_api, ..Self::default() }
    }

    /// Configuration that leaves every construct untouched
    pub fn disabled(min_api: ApiLevel) -> Self {
        Self {
            min_api,
            desugar_interfaces: false,
            desugar_lambdas: false,
            backport_methods: false,
            desugar_nests: false,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> DesugarResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| DesugarError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_min_api(mut self, min_api: ApiLevel) -> Self {
        self.min_api = min_api;
        self
    }

    pub fn with_platform(mut self, platform: PlatformProfile) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_emulated_interface(mut self, interface: EmulatedInterface) -> Self {
        self.emulated_interfaces.push(interface);
        self
    }

    pub fn with_interface_desugaring(mut self, enable: bool) -> Self {
        self.desugar_interfaces = enable;
        self
    }

    pub fn with_lambda_desugaring(mut self, enable: bool) -> Self {
        self.desugar_lambdas = enable;
        self
    }

    pub fn with_backports(mut self, enable: bool) -> Self {
        self.backport_methods = enable;
        self
    }

    pub fn with_nest_desugaring(mut self, enable: bool) -> Self {
        self.desugar_nests = enable;
        self
    }

    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> DesugarResult<()> {
        if self.min_api.level() == 0 {
            return Err(DesugarError::config_validation("min_api", "API levels start at 1"));
        }

        if self.threads == Some(0) {
            return Err(DesugarError::config_validation("threads", "worker count cannot be zero"));
        }

        if let PlatformProfile::Custom(table) = &self.platform {
            let mut seen: HashSet<ConstructKind> = HashSet::new();
            for requirement in &table.requirements {
                if !seen.insert(requirement.construct) {
                    return Err(DesugarError::config_validation("platform", format!("{:?} listed twice", requirement.construct)));
                }
            }
        }

        let mut libraries = HashSet::new();
        for interface in &self.emulated_interfaces {
            if !libraries.insert(&interface.library_interface) {
                return Err(DesugarError::config_validation(
                    "emulated_interfaces",
                    format!("{} is emulated twice", interface.library_interface),
                ));
            }
            interface.validate()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureTable;

    fn map_emulation() -> EmulatedInterface {
        EmulatedInterface::new("java/util/Map").with_method(EmulatedMethod::new(
            "getOrDefault",
            "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;",
            ApiLevel::N,
        ))
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(DesugarConfig::default().validate().is_ok());
        assert!(DesugarConfig::for_api(ApiLevel::L).with_emulated_interface(map_emulation()).validate().is_ok());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let config = DesugarConfig::for_api(ApiLevel::L).with_threads(0);
        assert!(matches!(config.validate(), Err(DesugarError::ConfigurationValidationError { .. })));
    }

    #[test]
    fn test_duplicate_constructs_rejected() {
        let mut table = FeatureTable::default().with_requirement(ConstructKind::LambdaExpressions, ApiLevel::O);
        table.requirements.push(table.requirements[0]);
        let config = DesugarConfig::for_api(ApiLevel::L).with_platform(PlatformProfile::Custom(table));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_emulated_interface_naming() {
        let emulation = map_emulation();
        assert_eq!(emulation.emulated_interface.as_str(), "j$/util/Map");
        assert_eq!(emulation.companion.as_str(), "j$/util/Map$-CC");
        let proto: MethodProto = "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;".parse().unwrap();
        assert!(emulation.emulated_method("getOrDefault", &proto, ApiLevel::M).is_some());
        assert!(emulation.emulated_method("getOrDefault", &proto, ApiLevel::N).is_none());
        let target = emulation.companion_method(&emulation.methods[0]).unwrap();
        assert_eq!(target.proto.descriptor(), "(Ljava/util/Map;Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;");
    }

    #[test]
    fn test_bad_emulated_descriptor() {
        let config = DesugarConfig::for_api(ApiLevel::L)
            .with_emulated_interface(EmulatedInterface::new("java/util/Map").with_method(EmulatedMethod::new("m", "(Q)V", ApiLevel::N)));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_loading() {
        let json = r#"{
            "min_api": 21,
            "platform": "android",
            "desugar_lambdas": false,
            "threads": 2
        }"#;
        let config = DesugarConfig::from_json(json).unwrap();
        assert_eq!(config.min_api, ApiLevel::L);
        assert!(!config.desugar_lambdas);
        assert!(config.desugar_interfaces);
        assert_eq!(config.threads, Some(2));

        assert!(matches!(DesugarConfig::from_json("{\"min_api\": \"x\"}"), Err(DesugarError::InvalidConfiguration(_))));
    }
}
