use crate::operations::{NodeOperation, NodeOutput, OperationRequest};
use crate::{BundleGraphError, NodeSpec, configuration_error};
use async_trait::async_trait;
use std::collections::BTreeSet;

pub const BUNDLE_NAME_WILDCARD: char = '*';

/// Names bundles. The default output carries `bundle name -> assets`; each
/// variant output carries the same assets under `bundle.variant`.
#[derive(Debug, Default)]
pub struct BundleConfiguratorOperation;

impl BundleConfiguratorOperation {
    fn template(request: &OperationRequest<'_>) -> Result<String, BundleGraphError> {
        let template = request
            .node
            .settings
            .bundle_name_template
            .resolve(request.target);
        let template = template.trim();
        if template.is_empty() {
            return Err(configuration_error(request.node, "bundle name template is empty"));
        }
        Ok(template.to_string())
    }

    fn validate_variants(node: &NodeSpec) -> Result<(), BundleGraphError> {
        let mut seen = BTreeSet::new();
        for variant in &node.settings.variants {
            let name = variant.name.trim().to_lowercase();
            if name.is_empty() {
                return Err(configuration_error(node, "variant name is empty"));
            }
            if !seen.insert(name) {
                return Err(configuration_error(
                    node,
                    format!("variant name '{}' is used more than once", variant.name),
                ));
            }
        }
        Ok(())
    }

    fn configure(request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        let template = Self::template(request)?;
        Self::validate_variants(request.node)?;

        let node = request.node;
        let default_point = node.primary_output_point_id();
        let mut output = NodeOutput::declared(node);
        output.points.entry(default_point.clone()).or_default();

        for (group_key, assets) in request.inputs {
            let bundle_name = bundle_name(&template, group_key);
            for asset in assets {
                output.emit(&default_point, &bundle_name, asset.clone());
                for variant in &node.settings.variants {
                    let variant_name = variant.name.trim().to_lowercase();
                    output.emit(
                        &variant.point_id,
                        &format!("{bundle_name}.{variant_name}"),
                        asset.with_bundle_variant(variant_name),
                    );
                }
            }
        }
        Ok(output)
    }
}

/// Substitutes the group key for the wildcard and lowercases the result.
pub fn bundle_name(template: &str, group_key: &str) -> String {
    template
        .replace(BUNDLE_NAME_WILDCARD, group_key)
        .to_lowercase()
}

#[async_trait]
impl NodeOperation for BundleConfiguratorOperation {
    async fn setup(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        Self::configure(request)
    }

    async fn run(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        Self::configure(request)
    }
}
