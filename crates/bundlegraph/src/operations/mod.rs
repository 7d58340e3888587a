use crate::asset::{AssetGroups, PointOutputs, asset_types};
use crate::filesystem::SharedAssetFileSystem;
use crate::{
    AssetRef, AssetType, BuildTargetGroup, BundleGraphError, Connection, ConnectionPoint,
    NodeKind, NodeSpec, ProjectLayout, ScriptRegistry, configuration_error,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

pub mod bundle_builder;
pub mod bundle_config;
pub mod exporter;
pub mod filter;
pub mod grouping;
pub mod import_setting;
pub mod loader;
pub mod modifier;
pub mod prefab_builder;
pub mod registry;

pub use import_setting::{AssetImporter, NoopImporter, SharedAssetImporter};
pub use registry::OperationRegistry;

/// What the executor knows about a node's previous run for this target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheHints {
    pub cache_enabled: bool,
    pub previous_outputs: Option<PointOutputs>,
}

/// Collaborators shared by every operation in a run.
#[derive(Clone)]
pub struct OperationEnv {
    pub fs: SharedAssetFileSystem,
    pub layout: ProjectLayout,
    pub scripts: Arc<ScriptRegistry>,
    pub importer: SharedAssetImporter,
}

pub struct OperationRequest<'a> {
    pub target: BuildTargetGroup,
    pub node: &'a NodeSpec,
    pub input_point: Option<&'a ConnectionPoint>,
    pub output_connections: Vec<&'a Connection>,
    pub inputs: &'a AssetGroups,
    pub cache_hints: &'a CacheHints,
    pub env: &'a OperationEnv,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFailure {
    pub asset_path: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub points: PointOutputs,
    #[serde(default)]
    pub failures: Vec<AssetFailure>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// One empty entry per resolved output point of the node.
    pub fn declared(node: &NodeSpec) -> Self {
        let mut output = Self::new();
        for point in node.resolved_output_points() {
            output.points.entry(point.id).or_default();
        }
        output
    }

    pub fn with_groups(point_id: impl Into<String>, groups: AssetGroups) -> Self {
        let mut output = Self::new();
        output.points.insert(point_id.into(), groups);
        output
    }

    pub fn emit(&mut self, point_id: &str, group_key: &str, asset: AssetRef) {
        self.points
            .entry(point_id.to_string())
            .or_default()
            .entry(group_key.to_string())
            .or_default()
            .push(asset);
    }

    pub fn record_failure(&mut self, asset_path: impl Into<String>, message: impl Into<String>) {
        self.failures.push(AssetFailure {
            asset_path: asset_path.into(),
            message: message.into(),
        });
    }

    pub fn groups(&self, point_id: &str) -> Option<&AssetGroups> {
        self.points.get(point_id)
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn asset_count(&self) -> usize {
        self.points
            .values()
            .map(crate::asset::asset_count)
            .sum()
    }
}

/// Per-kind transform contract.
///
/// `setup` validates configuration and declares output points; it performs
/// no filesystem writes beyond directory creation. `run` does the work and
/// must be idempotent.
#[async_trait]
pub trait NodeOperation: Send + Sync {
    async fn setup(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError>;

    async fn run(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError>;

    /// Whether unchanged fingerprints may skip `run`.
    fn cacheable(&self) -> bool {
        true
    }
}

pub type SharedNodeOperation = Arc<dyn NodeOperation>;

pub fn core_registry() -> OperationRegistry {
    let mut registry = OperationRegistry::new();
    registry.register(NodeKind::Loader, Arc::new(loader::LoaderOperation));
    registry.register(NodeKind::Filter, Arc::new(filter::FilterOperation));
    registry.register(
        NodeKind::ImportSetting,
        Arc::new(import_setting::ImportSettingOperation),
    );
    registry.register(NodeKind::Modifier, Arc::new(modifier::ModifierOperation));
    registry.register(NodeKind::Grouping, Arc::new(grouping::GroupingOperation));
    registry.register(
        NodeKind::PrefabBuilder,
        Arc::new(prefab_builder::PrefabBuilderOperation),
    );
    registry.register(
        NodeKind::BundleConfigurator,
        Arc::new(bundle_config::BundleConfiguratorOperation),
    );
    registry.register(
        NodeKind::BundleBuilder,
        Arc::new(bundle_builder::BundleBuilderOperation),
    );
    registry.register(NodeKind::Exporter, Arc::new(exporter::ExporterOperation));
    registry
}

/// The single asset type arriving at a node, `None` when nothing arrives.
pub(crate) fn single_input_type(
    request: &OperationRequest<'_>,
) -> Result<Option<AssetType>, BundleGraphError> {
    let types: BTreeSet<AssetType> = asset_types(request.inputs);
    match types.len() {
        0 => Ok(None),
        1 => Ok(types.into_iter().next()),
        _ => Err(configuration_error(
            request.node,
            format!(
                "expects one incoming asset type, got {}",
                types
                    .iter()
                    .map(|kind| kind.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        )),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::filesystem::LocalFileSystem;
    use std::path::Path;

    pub(crate) fn env(project_root: &Path) -> OperationEnv {
        env_with_scripts(project_root, ScriptRegistry::new())
    }

    pub(crate) fn env_with_scripts(project_root: &Path, scripts: ScriptRegistry) -> OperationEnv {
        OperationEnv {
            fs: Arc::new(LocalFileSystem::new()),
            layout: ProjectLayout::new(project_root),
            scripts: Arc::new(scripts),
            importer: Arc::new(NoopImporter),
        }
    }

    pub(crate) fn request<'a>(
        node: &'a NodeSpec,
        inputs: &'a AssetGroups,
        hints: &'a CacheHints,
        env: &'a OperationEnv,
    ) -> OperationRequest<'a> {
        OperationRequest {
            target: BuildTargetGroup::Default,
            node,
            input_point: node.input_point(),
            output_connections: Vec::new(),
            inputs,
            cache_hints: hints,
            env,
        }
    }

    /// Writes `files` (project-relative) under `root` and returns loader-style refs.
    pub(crate) fn seed(root: &Path, files: &[(&str, &[u8])]) -> Vec<AssetRef> {
        files
            .iter()
            .map(|(relative, contents)| {
                let absolute = root.join(relative);
                if let Some(parent) = absolute.parent() {
                    std::fs::create_dir_all(parent).expect("fixture dirs should create");
                }
                std::fs::write(&absolute, contents).expect("fixture should write");
                AssetRef::from_loader(absolute, *relative)
            })
            .collect()
    }

    pub(crate) fn single_group(assets: Vec<AssetRef>) -> AssetGroups {
        AssetGroups::from([(crate::asset::DEFAULT_GROUP_KEY.to_string(), assets)])
    }
}
