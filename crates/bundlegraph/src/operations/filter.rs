use crate::operations::{NodeOperation, NodeOutput, OperationRequest};
use crate::{AssetRef, AssetType, BundleGraphError, FilterCondition, configuration_error};
use async_trait::async_trait;
use regex::Regex;

#[derive(Debug, Default)]
pub struct FilterOperation;

struct CompiledCondition {
    point_id: String,
    pattern: Regex,
    /// `None` accepts any type.
    key_type: Option<AssetType>,
}

impl CompiledCondition {
    fn matches(&self, asset: &AssetRef) -> bool {
        if self.key_type.is_some_and(|key_type| key_type != asset.asset_type) {
            return false;
        }
        self.pattern.is_match(&asset.match_path())
    }
}

impl FilterOperation {
    fn compile(request: &OperationRequest<'_>) -> Result<Vec<CompiledCondition>, BundleGraphError> {
        let node = request.node;
        let mut compiled = Vec::with_capacity(node.settings.filter_conditions.len());
        for condition in &node.settings.filter_conditions {
            let keyword = condition.keyword.resolve(request.target);
            let pattern = Regex::new(&keyword).map_err(|error| {
                configuration_error(node, format!("invalid filter keyword '{keyword}': {error}"))
            })?;
            let key_type = condition.key_type_for(request.target);
            let key_type = if key_type.eq_ignore_ascii_case(FilterCondition::ANY_TYPE) {
                None
            } else {
                Some(
                    key_type
                        .parse::<AssetType>()
                        .map_err(|message| configuration_error(node, message))?,
                )
            };
            compiled.push(CompiledCondition {
                point_id: condition.point_id.clone(),
                pattern,
                key_type,
            });
        }
        Ok(compiled)
    }
}

#[async_trait]
impl NodeOperation for FilterOperation {
    async fn setup(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        let conditions = Self::compile(request)?;
        Ok(partition(&conditions, request))
    }

    async fn run(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        let conditions = Self::compile(request)?;
        Ok(partition(&conditions, request))
    }
}

/// First matching condition wins; unmatched assets are dropped.
fn partition(conditions: &[CompiledCondition], request: &OperationRequest<'_>) -> NodeOutput {
    let mut output = NodeOutput::declared(request.node);
    for (group_key, assets) in request.inputs {
        for asset in assets {
            if let Some(condition) = conditions.iter().find(|condition| condition.matches(asset)) {
                output.emit(&condition.point_id, group_key, asset.clone());
            }
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::CacheHints;
    use crate::operations::test_support::{env, request, seed, single_group};
    use crate::{NodeKind, NodeSpec};
    use tempfile::TempDir;

    fn filter(conditions: Vec<FilterCondition>) -> NodeSpec {
        let mut node = NodeSpec::new("f", "Filter", NodeKind::Filter).with_input("in");
        node.settings.filter_conditions = conditions;
        node
    }

    #[tokio::test(flavor = "current_thread")]
    async fn filter_run_overlapping_keywords_expected_first_match_only() {
        let temp = TempDir::new().expect("temp dir should create");
        let env = env(temp.path());
        let assets = seed(
            temp.path(),
            &[
                ("Assets/Chars/hero.png", b"h"),
                ("Assets/Chars/hero.fbx", b"m"),
                ("Assets/Props/box.png", b"b"),
            ],
        );
        let inputs = single_group(assets);
        let hints = CacheHints::default();
        let node = filter(vec![
            FilterCondition::new("chars", "Chars/"),
            FilterCondition::new("png", r"\.png$"),
            FilterCondition::new("none", "Nothing"),
        ]);

        let output = FilterOperation
            .run(&request(&node, &inputs, &hints, &env))
            .await
            .expect("run should succeed");

        assert_eq!(output.points["chars"]["0"].len(), 2);
        assert_eq!(output.points["png"]["0"].len(), 1);
        assert!(output.points["none"].is_empty());
        assert_eq!(output.asset_count(), 3);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn filter_run_key_type_expected_type_restricted() {
        let temp = TempDir::new().expect("temp dir should create");
        let env = env(temp.path());
        let inputs = single_group(seed(
            temp.path(),
            &[("Assets/a.png", b"a"), ("Assets/a.fbx", b"m")],
        ));
        let hints = CacheHints::default();
        let node = filter(vec![FilterCondition::new("models", "Assets").with_key_type("Model")]);

        let output = FilterOperation
            .run(&request(&node, &inputs, &hints, &env))
            .await
            .expect("run should succeed");
        let kept = &output.points["models"]["0"];
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].asset_type, AssetType::Model);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn filter_setup_invalid_regex_expected_configuration_error() {
        let temp = TempDir::new().expect("temp dir should create");
        let env = env(temp.path());
        let inputs = single_group(Vec::new());
        let hints = CacheHints::default();
        let node = filter(vec![FilterCondition::new("bad", "([")]);

        assert!(matches!(
            FilterOperation
                .setup(&request(&node, &inputs, &hints, &env))
                .await,
            Err(BundleGraphError::NodeConfiguration(_))
        ));
    }
}
