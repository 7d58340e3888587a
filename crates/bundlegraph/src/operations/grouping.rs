use crate::operations::{NodeOperation, NodeOutput, OperationRequest};
use crate::{BundleGraphError, configuration_error};
use async_trait::async_trait;
use regex::Regex;

pub const WILDCARD: char = '*';

/// Regroups assets by the path segment matched at the keyword's wildcard.
/// Assets the keyword does not match are dropped.
#[derive(Debug, Default)]
pub struct GroupingOperation;

impl GroupingOperation {
    fn pattern(request: &OperationRequest<'_>) -> Result<Regex, BundleGraphError> {
        let keyword = request
            .node
            .settings
            .grouping_keyword
            .resolve(request.target);
        compile_keyword(&keyword).map_err(|message| configuration_error(request.node, message))
    }

    fn group(pattern: &Regex, request: &OperationRequest<'_>) -> NodeOutput {
        let point_id = request.node.primary_output_point_id();
        let mut output = NodeOutput::new();
        output.points.entry(point_id.clone()).or_default();
        for asset in request.inputs.values().flatten() {
            let path = asset.match_path();
            if let Some(key) = pattern.captures(&path).and_then(|captures| captures.get(1)) {
                output.emit(&point_id, key.as_str(), asset.clone());
            }
        }
        output
    }
}

/// `prefix*postfix` into a regex capturing the wildcard within one path segment.
pub fn compile_keyword(keyword: &str) -> Result<Regex, String> {
    if keyword.trim().is_empty() {
        return Err("grouping keyword is empty".to_string());
    }
    let Some((prefix, postfix)) = keyword.split_once(WILDCARD) else {
        return Err(format!("grouping keyword '{keyword}' must contain '{WILDCARD}'"));
    };
    if postfix.contains(WILDCARD) {
        return Err(format!(
            "grouping keyword '{keyword}' must contain exactly one '{WILDCARD}'"
        ));
    }

    let capture = if postfix.is_empty() {
        "([^/]+)"
    } else {
        "([^/]+?)"
    };
    let source = format!(
        "{}{capture}{}",
        regex::escape(prefix),
        regex::escape(postfix)
    );
    Regex::new(&source).map_err(|error| format!("grouping keyword '{keyword}': {error}"))
}

#[async_trait]
impl NodeOperation for GroupingOperation {
    async fn setup(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        let pattern = Self::pattern(request)?;
        Ok(Self::group(&pattern, request))
    }

    async fn run(&self, request: &OperationRequest<'_>) -> Result<NodeOutput, BundleGraphError> {
        let pattern = Self::pattern(request)?;
        Ok(Self::group(&pattern, request))
    }
}
