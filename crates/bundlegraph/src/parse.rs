use crate::lint::ensure_well_formed;
use crate::{
    BundleGraphError, Connection, ConnectionPoint, GraphModel, MultiTarget, NodeKind, NodeSettings,
    NodeSpec,
};
use serde::{Deserialize, Serialize};

/// Serialized graph document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub nodes: Vec<NodeDocument>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub input_points: Vec<PointDocument>,
    #[serde(default)]
    pub output_points: Vec<PointDocument>,
    #[serde(default)]
    pub script_class_name: Option<String>,
    #[serde(default)]
    pub instance_data: MultiTarget<String>,
    #[serde(default)]
    pub settings: NodeSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointDocument {
    pub id: String,
    #[serde(default)]
    pub label: String,
}

impl From<NodeDocument> for NodeSpec {
    fn from(document: NodeDocument) -> Self {
        let owner = document.id.clone();
        Self {
            input_points: document
                .input_points
                .into_iter()
                .map(|point| ConnectionPoint::input(owner.clone(), point.id, point.label))
                .collect(),
            output_points: document
                .output_points
                .into_iter()
                .map(|point| ConnectionPoint::output(owner.clone(), point.id, point.label))
                .collect(),
            id: document.id,
            name: document.name,
            kind: document.kind,
            script_class_name: document.script_class_name,
            instance_data: document.instance_data,
            settings: document.settings,
        }
    }
}

impl From<&NodeSpec> for NodeDocument {
    fn from(node: &NodeSpec) -> Self {
        let point = |point: &ConnectionPoint| PointDocument {
            id: point.id.clone(),
            label: point.label.clone(),
        };
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            kind: node.kind,
            input_points: node.input_points.iter().map(point).collect(),
            output_points: node.output_points.iter().map(point).collect(),
            script_class_name: node.script_class_name.clone(),
            instance_data: node.instance_data.clone(),
            settings: node.settings.clone(),
        }
    }
}

impl GraphDocument {
    pub fn into_model(self) -> Result<GraphModel, BundleGraphError> {
        let nodes = self.nodes.into_iter().map(NodeSpec::from).collect();
        let graph = GraphModel::new(nodes, self.connections);
        ensure_well_formed(&graph)?;
        Ok(graph)
    }

    pub fn from_model(graph: &GraphModel) -> Self {
        Self {
            nodes: graph.nodes().iter().map(NodeDocument::from).collect(),
            connections: graph.connections().to_vec(),
        }
    }
}

/// Parses a JSON graph document. Duplicate node ids or names and
/// connections referencing missing nodes or points fail with `MalformedGraph`.
pub fn parse_graph(source: &str) -> Result<GraphModel, BundleGraphError> {
    let document: GraphDocument = serde_json::from_str(source)
        .map_err(|error| BundleGraphError::MalformedGraph(error.to_string()))?;
    document.into_model()
}

pub fn serialize_graph(graph: &GraphModel) -> Result<String, BundleGraphError> {
    serde_json::to_string_pretty(&GraphDocument::from_model(graph))
        .map_err(|error| BundleGraphError::Runtime(format!("graph serialization failed: {error}")))
}
