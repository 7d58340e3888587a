use crate::layout::strip_bundle_cache_prefix;
use crate::operations::{NodeOperation, NodeOutput, OperationRequest};
use crate::{BundleGraphError, configuration_error, runtime_error};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Copies assets to `export_path/<relative path>`. Bundle-cache paths lose
/// the cache root and platform folder first.
#[derive(Debug, Default)]
pub struct ExporterOperation;

impl ExporterOperation {
    fn export_root(request: &OperationRequest<'_>) -> Result<PathBuf, BundleGraphError> {
        let export_path = request.node.settings.export_path.resolve(request.target);
        if export_path.trim().is_empty() {
            return Err(configuration_error(request.node, "export path is empty"));
        }
        Ok(request.env.layout.resolve_export_path(&export_path))
    }

    fn destination(root: &Path, relative_path: &str) -> PathBuf {
        let mut destination = root.to_path_buf();
        for part in strip_bundle_cache_prefix(relative_path)
            .split('/')
            .filter(|part| !part.is_empty())
        {
            destination.push(part);
        }
        destination
    }
}

#[async_trait]
impl NodeOperation for ExporterOperation {
    async fn setup(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        let root = Self::export_root(request)?;
        if !request.env.fs.is_dir(&root).await {
            return Err(configuration_error(
                request.node,
                format!("export directory does not exist: {}", root.display()),
            ));
        }

        let point_id = request.node.primary_output_point_id();
        let mut output = NodeOutput::new();
        output.points.entry(point_id.clone()).or_default();
        for (group_key, assets) in request.inputs {
            for asset in assets {
                if let Some(relative_path) = asset.relative_path() {
                    let destination = Self::destination(&root, relative_path);
                    output.emit(&point_id, group_key, asset.exported(destination));
                }
            }
        }
        Ok(output)
    }

    async fn run(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        let root = Self::export_root(request)?;
        let env = request.env;
        let node = request.node;
        if !env.fs.is_dir(&root).await {
            env.fs
                .create_dir_all(&root)
                .await
                .map_err(|error| runtime_error(node, error.to_string()))?;
        }

        let point_id = node.primary_output_point_id();
        let mut output = NodeOutput::new();
        output.points.entry(point_id.clone()).or_default();

        for (group_key, assets) in request.inputs {
            for asset in assets {
                let Some(relative_path) = asset.relative_path() else {
                    output.record_failure(
                        asset.source_absolute_path.to_string_lossy(),
                        "asset has no project-relative path; import it before exporting",
                    );
                    continue;
                };
                let source = &asset.source_absolute_path;
                let destination = Self::destination(&root, relative_path);

                if let Some(parent) = destination.parent() {
                    if !env.fs.is_dir(parent).await {
                        env.fs
                            .create_dir_all(parent)
                            .await
                            .map_err(|error| runtime_error(node, error.to_string()))?;
                    }
                }
                if env.fs.is_file(&destination).await {
                    env.fs
                        .remove_file(&destination)
                        .await
                        .map_err(|error| runtime_error(node, error.to_string()))?;
                }
                if let Err(error) = env.fs.copy(source, &destination).await {
                    output.record_failure(relative_path, error.to_string());
                    continue;
                }
                output.emit(&point_id, group_key, asset.exported(destination));
            }
        }

        if output.is_partial() {
            warn!(
                node_id = %node.id,
                failed = output.failures.len(),
                "some assets could not be exported"
            );
        }
        info!(
            node_id = %node.id,
            exported = output.asset_count(),
            root = %root.display(),
            "export finished"
        );
        Ok(output)
    }
}
