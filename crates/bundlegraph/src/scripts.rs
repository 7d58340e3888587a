//! Script capabilities for Modifier and PrefabBuilder nodes.
//!
//! Implementations are registered by class name; a node names its class and
//! carries serialized instance data per target group.

use crate::{AssetRef, AssetType};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("script class '{0}' is not registered")]
    UnknownClass(String),
    #[error("instance data for '{class_name}' is invalid: {message}")]
    InvalidData { class_name: String, message: String },
    #[error("{0}")]
    Failed(String),
}

/// Per-asset mutation applied by Modifier nodes.
pub trait AssetModifier: Send + Sync {
    /// The only asset type this modifier accepts.
    fn asset_type(&self) -> AssetType;

    fn serialize(&self) -> Vec<u8>;

    fn deserialize(&mut self, data: &[u8]) -> Result<(), ScriptError>;

    /// New file contents, or `None` when the asset already matches.
    fn modify(&self, asset: &AssetRef, contents: &[u8]) -> Result<Option<Vec<u8>>, ScriptError>;
}

/// Builds one composite artifact from a group of assets.
pub trait PrefabBuilder: Send + Sync {
    fn serialize(&self) -> Vec<u8>;

    fn deserialize(&mut self, data: &[u8]) -> Result<(), ScriptError>;

    /// Prefab name for the group, or `None` to skip it.
    fn can_create(&self, group_key: &str, assets: &[AssetRef]) -> Option<String>;

    fn create(&self, prefab_name: &str, assets: &[AssetRef]) -> Result<Vec<u8>, ScriptError>;
}

pub type ModifierFactory = Arc<dyn Fn() -> Box<dyn AssetModifier> + Send + Sync>;
pub type PrefabBuilderFactory = Arc<dyn Fn() -> Box<dyn PrefabBuilder> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ScriptRegistry {
    modifiers: BTreeMap<String, ModifierFactory>,
    prefab_builders: BTreeMap<String, PrefabBuilderFactory>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_modifier(
        &mut self,
        class_name: impl Into<String>,
        factory: impl Fn() -> Box<dyn AssetModifier> + Send + Sync + 'static,
    ) {
        self.modifiers.insert(class_name.into(), Arc::new(factory));
    }

    pub fn register_prefab_builder(
        &mut self,
        class_name: impl Into<String>,
        factory: impl Fn() -> Box<dyn PrefabBuilder> + Send + Sync + 'static,
    ) {
        self.prefab_builders
            .insert(class_name.into(), Arc::new(factory));
    }

    pub fn has_modifier(&self, class_name: &str) -> bool {
        self.modifiers.contains_key(class_name)
    }

    pub fn has_prefab_builder(&self, class_name: &str) -> bool {
        self.prefab_builders.contains_key(class_name)
    }

    pub fn modifier_classes(&self) -> Vec<String> {
        self.modifiers.keys().cloned().collect()
    }

    pub fn prefab_builder_classes(&self) -> Vec<String> {
        self.prefab_builders.keys().cloned().collect()
    }

    pub fn instantiate_modifier(
        &self,
        class_name: &str,
        instance_data: &str,
    ) -> Result<Box<dyn AssetModifier>, ScriptError> {
        let factory = self
            .modifiers
            .get(class_name)
            .ok_or_else(|| ScriptError::UnknownClass(class_name.to_string()))?;
        let mut modifier = factory();
        if !instance_data.is_empty() {
            modifier
                .deserialize(instance_data.as_bytes())
                .map_err(|error| invalid_data(class_name, error))?;
        }
        Ok(modifier)
    }

    pub fn instantiate_prefab_builder(
        &self,
        class_name: &str,
        instance_data: &str,
    ) -> Result<Box<dyn PrefabBuilder>, ScriptError> {
        let factory = self
            .prefab_builders
            .get(class_name)
            .ok_or_else(|| ScriptError::UnknownClass(class_name.to_string()))?;
        let mut builder = factory();
        if !instance_data.is_empty() {
            builder
                .deserialize(instance_data.as_bytes())
                .map_err(|error| invalid_data(class_name, error))?;
        }
        Ok(builder)
    }
}

impl std::fmt::Debug for ScriptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRegistry")
            .field("modifiers", &self.modifiers.keys().collect::<Vec<_>>())
            .field("prefab_builders", &self.prefab_builders.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn invalid_data(class_name: &str, error: ScriptError) -> ScriptError {
    match error {
        ScriptError::InvalidData { .. } => error,
        other => ScriptError::InvalidData {
            class_name: class_name.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Suffix {
        suffix: String,
    }

    impl AssetModifier for Suffix {
        fn asset_type(&self) -> AssetType {
            AssetType::Text
        }

        fn serialize(&self) -> Vec<u8> {
            self.suffix.as_bytes().to_vec()
        }

        fn deserialize(&mut self, data: &[u8]) -> Result<(), ScriptError> {
            self.suffix = String::from_utf8(data.to_vec())
                .map_err(|error| ScriptError::Failed(error.to_string()))?;
            Ok(())
        }

        fn modify(&self, _asset: &AssetRef, contents: &[u8]) -> Result<Option<Vec<u8>>, ScriptError> {
            Ok(Some([contents, self.suffix.as_bytes()].concat()))
        }
    }

    #[test]
    fn instantiate_modifier_registered_expected_instance_data_applied() {
        let mut registry = ScriptRegistry::new();
        registry.register_modifier("Suffix", || Box::new(Suffix::default()));

        let modifier = registry
            .instantiate_modifier("Suffix", "!")
            .expect("modifier should instantiate");
        assert_eq!(modifier.serialize(), b"!".to_vec());
        assert_eq!(registry.modifier_classes(), vec!["Suffix"]);
    }

    #[test]
    fn instantiate_modifier_unknown_class_expected_error() {
        let registry = ScriptRegistry::new();
        assert_eq!(
            registry.instantiate_modifier("Missing", "").err(),
            Some(ScriptError::UnknownClass("Missing".to_string()))
        );
    }

    struct Strict;

    impl PrefabBuilder for Strict {
        fn serialize(&self) -> Vec<u8> {
            Vec::new()
        }

        fn deserialize(&mut self, _data: &[u8]) -> Result<(), ScriptError> {
            Err(ScriptError::Failed("no settings accepted".to_string()))
        }

        fn can_create(&self, group_key: &str, _assets: &[AssetRef]) -> Option<String> {
            Some(group_key.to_string())
        }

        fn create(&self, _prefab_name: &str, _assets: &[AssetRef]) -> Result<Vec<u8>, ScriptError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn instantiate_prefab_builder_bad_data_expected_invalid_data() {
        let mut registry = ScriptRegistry::new();
        registry.register_prefab_builder("Strict", || Box::new(Strict));

        let error = registry
            .instantiate_prefab_builder("Strict", "{}")
            .map(|_| ())
            .err();
        assert_eq!(
            error,
            Some(ScriptError::InvalidData {
                class_name: "Strict".to_string(),
                message: "no settings accepted".to_string(),
            })
        );
        assert!(registry.instantiate_prefab_builder("Strict", "").is_ok());
        assert!(!registry.has_modifier("Strict"));
    }
}
