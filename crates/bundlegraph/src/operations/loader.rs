use crate::asset::DEFAULT_GROUP_KEY;
use crate::layout::is_internal_path;
use crate::operations::{NodeOperation, NodeOutput, OperationRequest};
use crate::{AssetRef, BundleGraphError, configuration_error, runtime_error};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Scans a folder under the asset root. An empty load path scans the whole
/// asset root.
#[derive(Debug, Default)]
pub struct LoaderOperation;

impl LoaderOperation {
    fn load_root(request: &OperationRequest<'_>) -> Result<PathBuf, BundleGraphError> {
        let load_path = request.node.settings.load_path.resolve(request.target);
        request
            .env
            .layout
            .loader_root(&load_path)
            .map_err(|message| configuration_error(request.node, message))
    }

    async fn load(
        request: &OperationRequest<'_>,
        root: PathBuf,
    ) -> Result<NodeOutput, BundleGraphError> {
        let files = request
            .env
            .fs
            .list_files(&root)
            .await
            .map_err(|error| runtime_error(request.node, error.to_string()))?;

        let mut assets = Vec::new();
        let mut skipped = 0usize;
        for file in files {
            let Some(relative_path) = request.env.layout.relative(&file) else {
                return Err(runtime_error(
                    request.node,
                    format!("'{}' is outside the project", file.display()),
                ));
            };
            if is_internal_path(&relative_path) {
                continue;
            }
            let asset = AssetRef::from_loader(file, relative_path);
            if !asset.asset_type.is_known() {
                skipped += 1;
                continue;
            }
            assets.push(asset);
        }

        debug!(
            node_id = %request.node.id,
            root = %root.display(),
            loaded = assets.len(),
            skipped,
            "loader scan finished"
        );

        let mut output = NodeOutput::new();
        output
            .points
            .entry(request.node.primary_output_point_id())
            .or_default()
            .insert(DEFAULT_GROUP_KEY.to_string(), assets);
        Ok(output)
    }
}

#[async_trait]
impl NodeOperation for LoaderOperation {
    async fn setup(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        let root = Self::load_root(request)?;
        if !request.env.fs.is_dir(&root).await {
            return Err(configuration_error(
                request.node,
                format!("directory not found: {}", root.display()),
            ));
        }
        Self::load(request, root).await
    }

    async fn run(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        let root = Self::load_root(request)?;
        if !request.env.fs.is_dir(&root).await {
            return Err(runtime_error(
                request.node,
                format!("directory not found: {}", root.display()),
            ));
        }
        Self::load(request, root).await
    }

    /// Every run rescans; file changes show up in downstream fingerprints.
    fn cacheable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetGroups;
    use crate::operations::CacheHints;
    use crate::operations::test_support::{env, request};
    use crate::{MultiTarget, NodeKind, NodeSpec};
    use tempfile::TempDir;

    fn loader(load_path: &str) -> NodeSpec {
        let mut node = NodeSpec::new("l", "Loader", NodeKind::Loader).with_output("out", "-");
        node.settings.load_path = MultiTarget::with_default(load_path.to_string());
        node
    }

    #[tokio::test(flavor = "current_thread")]
    async fn loader_setup_missing_directory_expected_configuration_error() {
        let temp = TempDir::new().expect("temp dir should create");
        let env = env(temp.path());
        let node = loader("Nope");
        let inputs = AssetGroups::new();
        let hints = CacheHints::default();

        let error = LoaderOperation
            .setup(&request(&node, &inputs, &hints, &env))
            .await
            .expect_err("setup should fail");
        assert!(matches!(error, BundleGraphError::NodeConfiguration(_)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn loader_run_skips_tool_folder_and_unknown_types() {
        let temp = TempDir::new().expect("temp dir should create");
        for (relative, contents) in [
            ("Assets/a.png", "a"),
            ("Assets/a.png.meta", "m"),
            ("Assets/BundleGraph/Cache/x.png", "x"),
            ("Assets/sub/b.txt", "b"),
        ] {
            let path = temp.path().join(relative);
            std::fs::create_dir_all(path.parent().expect("parent")).expect("dirs");
            std::fs::write(path, contents).expect("write");
        }
        let env = env(temp.path());
        let node = loader("");
        let inputs = AssetGroups::new();
        let hints = CacheHints::default();

        let output = LoaderOperation
            .run(&request(&node, &inputs, &hints, &env))
            .await
            .expect("run should succeed");
        let paths: Vec<String> = output.points["out"]["0"]
            .iter()
            .map(|asset| asset.match_path())
            .collect();
        assert_eq!(paths, vec!["Assets/a.png", "Assets/sub/b.txt"]);

        let again = LoaderOperation
            .run(&request(&node, &inputs, &hints, &env))
            .await
            .expect("second run should succeed");
        assert_eq!(again, output);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn loader_setup_escaping_path_expected_configuration_error() {
        let temp = TempDir::new().expect("temp dir should create");
        let env = env(temp.path());
        let node = loader("../outside");
        let inputs = AssetGroups::new();
        let hints = CacheHints::default();

        assert!(matches!(
            LoaderOperation
                .setup(&request(&node, &inputs, &hints, &env))
                .await,
            Err(BundleGraphError::NodeConfiguration(_))
        ));
    }
}
