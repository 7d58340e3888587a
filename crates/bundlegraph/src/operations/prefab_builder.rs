use crate::operations::{NodeOperation, NodeOutput, OperationRequest};
use crate::scripts::PrefabBuilder;
use crate::{AssetRef, AssetType, BundleGraphError, configuration_error, runtime_error};
use async_trait::async_trait;
use tracing::debug;

pub const PREFAB_EXTENSION: &str = "prefab";

/// Builds one prefab per accepted group under the prefab cache. Groups the
/// builder declines pass through unchanged.
#[derive(Debug, Default)]
pub struct PrefabBuilderOperation;

impl PrefabBuilderOperation {
    fn instantiate(request: &OperationRequest<'_>) -> Result<Box<dyn PrefabBuilder>, BundleGraphError> {
        let node = request.node;
        let class_name = node
            .script_class_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| configuration_error(node, "no prefab builder class selected"))?;
        let instance_data = node.instance_data.resolve(request.target);
        request
            .env
            .scripts
            .instantiate_prefab_builder(class_name, &instance_data)
            .map_err(|error| configuration_error(node, error.to_string()))
    }
}

#[async_trait]
impl NodeOperation for PrefabBuilderOperation {
    async fn setup(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        Self::instantiate(request)?;
        Ok(NodeOutput::with_groups(
            request.node.primary_output_point_id(),
            request.inputs.clone(),
        ))
    }

    async fn run(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        let builder = Self::instantiate(request)?;
        let env = request.env;
        let cache_dir = env
            .layout
            .prefab_cache_dir(request.target, &request.node.id);
        let point_id = request.node.primary_output_point_id();
        let mut output = NodeOutput::new();
        let groups = output.points.entry(point_id).or_default();
        let mut failures = Vec::new();

        for (group_key, assets) in request.inputs {
            let Some(prefab_name) = builder.can_create(group_key, assets) else {
                groups.insert(group_key.clone(), assets.clone());
                continue;
            };
            let contents = match builder.create(&prefab_name, assets) {
                Ok(contents) => contents,
                Err(error) => {
                    failures.push((group_key.clone(), error.to_string()));
                    continue;
                }
            };

            let path = cache_dir.join(format!("{prefab_name}.{PREFAB_EXTENSION}"));
            let written = env
                .fs
                .write_if_changed(&path, &contents)
                .await
                .map_err(|error| runtime_error(request.node, error.to_string()))?;
            debug!(node_id = %request.node.id, prefab = %prefab_name, written, "prefab ready");

            let relative_path = env
                .layout
                .relative(&path)
                .unwrap_or_else(|| path.to_string_lossy().replace('\\', "/"));
            let mut group = assets.clone();
            group.push(AssetRef::derived(path, relative_path, AssetType::Prefab));
            groups.insert(group_key.clone(), group);
        }

        for (group_key, message) in failures {
            output.record_failure(group_key, message);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetGroups;
    use crate::operations::CacheHints;
    use crate::operations::test_support::{env_with_scripts, request, seed};
    use crate::scripts::{ScriptError, ScriptRegistry};
    use crate::{NodeKind, NodeSpec};
    use tempfile::TempDir;

    struct Manifest;

    impl PrefabBuilder for Manifest {
        fn serialize(&self) -> Vec<u8> {
            Vec::new()
        }

        fn deserialize(&mut self, _data: &[u8]) -> Result<(), ScriptError> {
            Ok(())
        }

        fn can_create(&self, group_key: &str, assets: &[AssetRef]) -> Option<String> {
            (assets.len() > 1).then(|| format!("{group_key}_prefab"))
        }

        fn create(&self, _prefab_name: &str, assets: &[AssetRef]) -> Result<Vec<u8>, ScriptError> {
            Ok(assets
                .iter()
                .map(AssetRef::match_path)
                .collect::<Vec<_>>()
                .join("\n")
                .into_bytes())
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn prefab_builder_run_expected_prefab_for_accepted_group_only() {
        let temp = TempDir::new().expect("temp dir should create");
        let mut scripts = ScriptRegistry::new();
        scripts.register_prefab_builder("Manifest", || Box::new(Manifest));
        let env = env_with_scripts(temp.path(), scripts);
        let assets = seed(
            temp.path(),
            &[
                ("Assets/hero/a.png", b"a"),
                ("Assets/hero/b.png", b"b"),
                ("Assets/solo/c.png", b"c"),
            ],
        );
        let inputs = AssetGroups::from([
            ("hero".to_string(), assets[..2].to_vec()),
            ("solo".to_string(), assets[2..].to_vec()),
        ]);
        let hints = CacheHints::default();
        let node = NodeSpec::new("p", "Prefabs", NodeKind::PrefabBuilder)
            .with_input("in")
            .with_output("out", "-")
            .with_script("Manifest", "");

        let output = PrefabBuilderOperation
            .run(&request(&node, &inputs, &hints, &env))
            .await
            .expect("run should succeed");

        let hero = &output.points["out"]["hero"];
        assert_eq!(hero.len(), 3);
        assert_eq!(hero[2].asset_type, AssetType::Prefab);
        assert!(hero[2].source_absolute_path.is_file());
        assert_eq!(
            hero[2].relative_path(),
            Some("Assets/BundleGraph/Cache/PrefabBuilder/Default/p/hero_prefab.prefab")
        );
        assert_eq!(output.points["out"]["solo"].len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn prefab_builder_setup_no_class_expected_configuration_error() {
        let temp = TempDir::new().expect("temp dir should create");
        let env = env_with_scripts(temp.path(), ScriptRegistry::new());
        let inputs = AssetGroups::new();
        let hints = CacheHints::default();
        let node = NodeSpec::new("p", "Prefabs", NodeKind::PrefabBuilder).with_input("in");

        assert!(matches!(
            PrefabBuilderOperation
                .setup(&request(&node, &inputs, &hints, &env))
                .await,
            Err(BundleGraphError::NodeConfiguration(_))
        ));
    }
}
