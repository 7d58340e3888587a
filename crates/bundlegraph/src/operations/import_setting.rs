use crate::operations::{NodeOperation, NodeOutput, OperationRequest, single_input_type};
use crate::{AssetRef, AssetType, BuildTargetGroup, BundleGraphError, configuration_error};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ImportError(pub String);

/// Applies import configuration to assets on behalf of ImportSetting nodes.
#[async_trait]
pub trait AssetImporter: Send + Sync {
    /// Applies the configuration of `reference` (project-relative; `None`
    /// for importer defaults) to `asset`. Returns whether anything changed.
    async fn apply(
        &self,
        target: BuildTargetGroup,
        reference: Option<&str>,
        asset: &AssetRef,
    ) -> Result<bool, ImportError>;
}

pub type SharedAssetImporter = Arc<dyn AssetImporter>;

/// Reports every asset as already configured.
#[derive(Debug, Default)]
pub struct NoopImporter;

#[async_trait]
impl AssetImporter for NoopImporter {
    async fn apply(
        &self,
        _target: BuildTargetGroup,
        _reference: Option<&str>,
        _asset: &AssetRef,
    ) -> Result<bool, ImportError> {
        Ok(false)
    }
}

#[derive(Debug, Default)]
pub struct ImportSettingOperation;

impl ImportSettingOperation {
    fn reference(request: &OperationRequest<'_>) -> Option<String> {
        let reference = request
            .node
            .settings
            .import_reference
            .resolve(request.target);
        let trimmed = reference.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    fn validate(request: &OperationRequest<'_>) -> Result<(), BundleGraphError> {
        let input_type = single_input_type(request)?;
        if let (Some(input_type), Some(reference)) = (input_type, Self::reference(request)) {
            let reference_type = AssetType::from_path(&reference);
            if reference_type != input_type {
                return Err(configuration_error(
                    request.node,
                    format!(
                        "reference '{reference}' is {reference_type} but incoming assets are {input_type}"
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NodeOperation for ImportSettingOperation {
    async fn setup(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        Self::validate(request)?;
        Ok(NodeOutput::with_groups(
            request.node.primary_output_point_id(),
            request.inputs.clone(),
        ))
    }

    async fn run(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        Self::validate(request)?;
        let reference = Self::reference(request);
        let point_id = request.node.primary_output_point_id();
        let mut output = NodeOutput::new();
        output.points.entry(point_id.clone()).or_default();

        let mut changed = 0usize;
        for (group_key, assets) in request.inputs {
            for asset in assets {
                match request
                    .env
                    .importer
                    .apply(request.target, reference.as_deref(), asset)
                    .await
                {
                    Ok(was_changed) => {
                        changed += usize::from(was_changed);
                        output.emit(&point_id, group_key, asset.clone());
                    }
                    Err(error) => output.record_failure(asset.match_path(), error.to_string()),
                }
            }
        }

        debug!(node_id = %request.node.id, changed, "import settings applied");
        Ok(output)
    }
}
