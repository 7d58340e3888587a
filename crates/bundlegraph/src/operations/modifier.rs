use crate::operations::{NodeOperation, NodeOutput, OperationRequest, single_input_type};
use crate::scripts::AssetModifier;
use crate::{BundleGraphError, configuration_error, runtime_error};
use async_trait::async_trait;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ModifierOperation;

impl ModifierOperation {
    fn instantiate(
        request: &OperationRequest<'_>,
    ) -> Result<Box<dyn AssetModifier>, BundleGraphError> {
        let node = request.node;
        let class_name = node
            .script_class_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| configuration_error(node, "no modifier class selected"))?;
        let instance_data = node.instance_data.resolve(request.target);
        let modifier = request
            .env
            .scripts
            .instantiate_modifier(class_name, &instance_data)
            .map_err(|error| configuration_error(node, error.to_string()))?;

        if let Some(input_type) = single_input_type(request)? {
            if modifier.asset_type() != input_type {
                return Err(configuration_error(
                    node,
                    format!(
                        "modifier '{class_name}' handles {} but incoming assets are {input_type}",
                        modifier.asset_type()
                    ),
                ));
            }
        }
        Ok(modifier)
    }
}

#[async_trait]
impl NodeOperation for ModifierOperation {
    async fn setup(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        Self::instantiate(request)?;
        Ok(NodeOutput::with_groups(
            request.node.primary_output_point_id(),
            request.inputs.clone(),
        ))
    }

    async fn run(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        let modifier = Self::instantiate(request)?;
        let fs = &request.env.fs;
        let point_id = request.node.primary_output_point_id();
        let mut output = NodeOutput::new();
        output.points.entry(point_id.clone()).or_default();

        let mut modified = 0usize;
        for (group_key, assets) in request.inputs {
            for asset in assets {
                let path = asset.materialized_path();
                let contents = match fs.read(path).await {
                    Ok(contents) => contents,
                    Err(error) => {
                        output.record_failure(asset.match_path(), error.to_string());
                        continue;
                    }
                };
                match modifier.modify(asset, &contents) {
                    Ok(Some(updated)) if updated != contents => {
                        fs.write(path, &updated)
                            .await
                            .map_err(|error| runtime_error(request.node, error.to_string()))?;
                        modified += 1;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        output.record_failure(asset.match_path(), error.to_string());
                        continue;
                    }
                }
                output.emit(&point_id, group_key, asset.clone());
            }
        }

        debug!(node_id = %request.node.id, modified, "modifier finished");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::CacheHints;
    use crate::operations::test_support::{env_with_scripts, request, seed, single_group};
    use crate::scripts::{ScriptError, ScriptRegistry};
    use crate::{AssetRef, AssetType, NodeKind, NodeSpec};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Uppercase;

    impl AssetModifier for Uppercase {
        fn asset_type(&self) -> AssetType {
            AssetType::Text
        }

        fn serialize(&self) -> Vec<u8> {
            Vec::new()
        }

        fn deserialize(&mut self, _data: &[u8]) -> Result<(), ScriptError> {
            Ok(())
        }

        fn modify(&self, _asset: &AssetRef, contents: &[u8]) -> Result<Option<Vec<u8>>, ScriptError> {
            Ok(Some(contents.to_ascii_uppercase()))
        }
    }

    fn scripts() -> ScriptRegistry {
        let mut scripts = ScriptRegistry::new();
        scripts.register_modifier("Uppercase", || Box::new(Uppercase));
        scripts
    }

    fn node(class_name: &str) -> NodeSpec {
        NodeSpec::new("m", "Modifier", NodeKind::Modifier)
            .with_input("in")
            .with_output("out", "-")
            .with_script(class_name, "")
    }

    #[tokio::test(flavor = "current_thread")]
    async fn modifier_setup_unregistered_class_expected_configuration_error() {
        let temp = TempDir::new().expect("temp dir should create");
        let env = env_with_scripts(temp.path(), scripts());
        let inputs = single_group(Vec::new());
        let hints = CacheHints::default();
        let node = node("Missing");

        assert!(matches!(
            ModifierOperation
                .setup(&request(&node, &inputs, &hints, &env))
                .await,
            Err(BundleGraphError::NodeConfiguration(_))
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn modifier_setup_type_mismatch_expected_configuration_error() {
        let temp = TempDir::new().expect("temp dir should create");
        let env = env_with_scripts(temp.path(), scripts());
        let inputs = single_group(seed(temp.path(), &[("Assets/a.png", b"a")]));
        let hints = CacheHints::default();
        let node = node("Uppercase");

        assert!(
            ModifierOperation
                .setup(&request(&node, &inputs, &hints, &env))
                .await
                .is_err()
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn modifier_run_expected_file_rewritten_once() {
        let temp = TempDir::new().expect("temp dir should create");
        let env = env_with_scripts(temp.path(), scripts());
        let assets = seed(temp.path(), &[("Assets/notes.txt", b"hello")]);
        let path = assets[0].source_absolute_path.clone();
        let inputs = single_group(assets);
        let hints = CacheHints::default();
        let node = node("Uppercase");

        let output = ModifierOperation
            .run(&request(&node, &inputs, &hints, &env))
            .await
            .expect("run should succeed");

        assert_eq!(std::fs::read(&path).expect("read"), b"HELLO".to_vec());
        assert_eq!(output.points["out"]["0"].len(), 1);
        assert!(!output.is_partial());
    }
}
