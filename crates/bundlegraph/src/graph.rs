use crate::asset::DEFAULT_GROUP_KEY;
use crate::{BuildTargetGroup, BundleGraphError, MultiTarget};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointDirection {
    Input,
    Output,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionPoint {
    pub id: String,
    pub label: String,
    pub owner_node_id: String,
    pub direction: PointDirection,
}

impl ConnectionPoint {
    pub fn input(owner: impl Into<String>, id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            owner_node_id: owner.into(),
            direction: PointDirection::Input,
        }
    }

    pub fn output(owner: impl Into<String>, id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            owner_node_id: owner.into(),
            direction: PointDirection::Output,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub from_node_id: String,
    pub from_point_id: String,
    pub to_node_id: String,
    pub to_point_id: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Loader,
    Filter,
    ImportSetting,
    Modifier,
    Grouping,
    PrefabBuilder,
    BundleConfigurator,
    BundleBuilder,
    Exporter,
}

impl NodeKind {
    pub const ALL: [NodeKind; 9] = [
        Self::Loader,
        Self::Filter,
        Self::ImportSetting,
        Self::Modifier,
        Self::Grouping,
        Self::PrefabBuilder,
        Self::BundleConfigurator,
        Self::BundleBuilder,
        Self::Exporter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loader => "Loader",
            Self::Filter => "Filter",
            Self::ImportSetting => "ImportSetting",
            Self::Modifier => "Modifier",
            Self::Grouping => "Grouping",
            Self::PrefabBuilder => "PrefabBuilder",
            Self::BundleConfigurator => "BundleConfigurator",
            Self::BundleBuilder => "BundleBuilder",
            Self::Exporter => "Exporter",
        }
    }

    pub fn requires_input(self) -> bool {
        self != Self::Loader
    }

    pub fn uses_script(self) -> bool {
        matches!(self, Self::Modifier | Self::PrefabBuilder)
    }

    /// Writes into files under `Assets/` shared by every target group.
    pub fn rewrites_sources(self) -> bool {
        matches!(self, Self::Modifier)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bundle build flags. Bit values follow the engine's build option enum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleOptions(pub u32);

impl BundleOptions {
    pub const NONE: Self = Self(0);
    pub const UNCOMPRESSED: Self = Self(1);
    pub const DISABLE_WRITE_TYPE_TREE: Self = Self(8);
    pub const DETERMINISTIC: Self = Self(16);
    pub const FORCE_REBUILD: Self = Self(32);
    pub const IGNORE_TYPE_TREE_CHANGES: Self = Self(64);
    pub const APPEND_HASH: Self = Self(128);
    pub const CHUNK_BASED_COMPRESSION: Self = Self(256);
    pub const STRICT_MODE: Self = Self(512);

    const NAMED: [(Self, &'static str); 8] = [
        (Self::UNCOMPRESSED, "uncompressed"),
        (Self::DISABLE_WRITE_TYPE_TREE, "disable_write_type_tree"),
        (Self::DETERMINISTIC, "deterministic"),
        (Self::FORCE_REBUILD, "force_rebuild"),
        (Self::IGNORE_TYPE_TREE_CHANGES, "ignore_type_tree_changes"),
        (Self::APPEND_HASH, "append_hash"),
        (Self::CHUNK_BASED_COMPRESSION, "chunk_based_compression"),
        (Self::STRICT_MODE, "strict_mode"),
    ];

    pub fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCondition {
    /// Output point the matching assets are emitted on.
    pub point_id: String,
    #[serde(default)]
    pub keyword: MultiTarget<String>,
    /// Asset type name, or `Any`.
    #[serde(default)]
    pub key_type: MultiTarget<String>,
}

impl FilterCondition {
    pub const ANY_TYPE: &'static str = "Any";

    pub fn new(point_id: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self {
            point_id: point_id.into(),
            keyword: MultiTarget::with_default(keyword.into()),
            key_type: MultiTarget::with_default(Self::ANY_TYPE.to_string()),
        }
    }

    pub fn with_key_type(mut self, key_type: impl Into<String>) -> Self {
        self.key_type.set_default(key_type.into());
        self
    }

    pub fn key_type_for(&self, target: BuildTargetGroup) -> String {
        let key_type = self.key_type.resolve(target);
        if key_type.trim().is_empty() {
            Self::ANY_TYPE.to_string()
        } else {
            key_type
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub point_id: String,
    pub name: String,
}

impl Variant {
    pub fn new(point_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            point_id: point_id.into(),
            name: name.into(),
        }
    }
}

/// Per-kind configuration. Fields a kind does not use stay empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub load_path: MultiTarget<String>,
    pub filter_conditions: Vec<FilterCondition>,
    pub grouping_keyword: MultiTarget<String>,
    pub bundle_name_template: MultiTarget<String>,
    pub variants: Vec<Variant>,
    pub bundle_options: MultiTarget<BundleOptions>,
    pub export_path: MultiTarget<String>,
    /// Project-relative path of the asset whose import configuration is applied.
    pub import_reference: MultiTarget<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    pub input_points: Vec<ConnectionPoint>,
    pub output_points: Vec<ConnectionPoint>,
    pub script_class_name: Option<String>,
    pub instance_data: MultiTarget<String>,
    pub settings: NodeSettings,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            input_points: Vec::new(),
            output_points: Vec::new(),
            script_class_name: None,
            instance_data: MultiTarget::new(),
            settings: NodeSettings::default(),
        }
    }

    pub fn with_input(mut self, point_id: impl Into<String>) -> Self {
        let point_id = point_id.into();
        let point = ConnectionPoint::input(self.id.clone(), point_id, "-");
        self.input_points.push(point);
        self
    }

    pub fn with_output(mut self, point_id: impl Into<String>, label: impl Into<String>) -> Self {
        let point = ConnectionPoint::output(self.id.clone(), point_id, label);
        self.output_points.push(point);
        self
    }

    pub fn with_settings(mut self, settings: NodeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_script(mut self, class_name: impl Into<String>, instance_data: impl Into<String>) -> Self {
        self.script_class_name = Some(class_name.into());
        self.instance_data = MultiTarget::with_default(instance_data.into());
        self
    }

    /// Output points after applying configuration-driven fan-out: one point
    /// per filter condition, and one per variant after the configurator's
    /// static outputs.
    pub fn resolved_output_points(&self) -> Vec<ConnectionPoint> {
        match self.kind {
            NodeKind::Filter => self
                .settings
                .filter_conditions
                .iter()
                .map(|condition| {
                    let label = condition.keyword.resolve(BuildTargetGroup::Default);
                    ConnectionPoint::output(self.id.clone(), condition.point_id.clone(), label)
                })
                .collect(),
            NodeKind::BundleConfigurator => {
                let mut points = self.output_points.clone();
                points.extend(self.settings.variants.iter().map(|variant| {
                    ConnectionPoint::output(
                        self.id.clone(),
                        variant.point_id.clone(),
                        variant.name.clone(),
                    )
                }));
                points
            }
            _ => self.output_points.clone(),
        }
    }

    pub fn output_point(&self, point_id: &str) -> Option<ConnectionPoint> {
        self.resolved_output_points()
            .into_iter()
            .find(|point| point.id == point_id)
    }

    pub fn input_point(&self) -> Option<&ConnectionPoint> {
        self.input_points.first()
    }

    pub fn has_input_point(&self, point_id: &str) -> bool {
        self.input_points.iter().any(|point| point.id == point_id)
    }

    /// Point id used for a kind's single (non fan-out) output.
    pub fn primary_output_point_id(&self) -> String {
        self.output_points
            .first()
            .map(|point| point.id.clone())
            .unwrap_or_else(|| DEFAULT_GROUP_KEY.to_string())
    }

    /// Configuration as seen by one target group, used for fingerprinting.
    pub fn config_snapshot(&self, target: BuildTargetGroup) -> Value {
        let settings = &self.settings;
        json!({
            "id": self.id,
            "kind": self.kind.as_str(),
            "script_class_name": self.script_class_name,
            "instance_data": self.instance_data.resolve(target),
            "load_path": settings.load_path.resolve(target),
            "filter_conditions": settings
                .filter_conditions
                .iter()
                .map(|condition| json!({
                    "point_id": condition.point_id,
                    "keyword": condition.keyword.resolve(target),
                    "key_type": condition.key_type_for(target),
                }))
                .collect::<Vec<_>>(),
            "grouping_keyword": settings.grouping_keyword.resolve(target),
            "bundle_name_template": settings.bundle_name_template.resolve(target),
            "variants": settings.variants,
            "bundle_options": settings.bundle_options.resolve(target).0,
            "export_path": settings.export_path.resolve(target),
            "import_reference": settings.import_reference.resolve(target),
            "output_points": self
                .resolved_output_points()
                .into_iter()
                .map(|point| point.id)
                .collect::<Vec<_>>(),
        })
    }
}

/// Node and connection graph. Construction does not validate; see
/// [`crate::parse_graph`] and [`crate::validate`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GraphModel {
    nodes: Vec<NodeSpec>,
    connections: Vec<Connection>,
    index: BTreeMap<String, usize>,
}

impl GraphModel {
    pub fn new(nodes: Vec<NodeSpec>, connections: Vec<Connection>) -> Self {
        let mut index = BTreeMap::new();
        for (position, node) in nodes.iter().enumerate() {
            index.entry(node.id.clone()).or_insert(position);
        }
        Self {
            nodes,
            connections,
            index,
        }
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeSpec> {
        self.index.get(node_id).map(|position| &self.nodes[*position])
    }

    pub fn declaration_index(&self, node_id: &str) -> Option<usize> {
        self.index.get(node_id).copied()
    }

    pub fn connections_into<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |connection| connection.to_node_id == node_id)
    }

    pub fn connections_out_of<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |connection| connection.from_node_id == node_id)
    }

    /// Nodes with no outgoing connection, in declaration order.
    pub fn endpoint_nodes(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|node| self.connections_out_of(&node.id).next().is_none())
            .map(|node| node.id.clone())
            .collect()
    }

    /// Distinct direct upstream node ids, in declaration order.
    pub fn upstream_nodes(&self, node_id: &str) -> Vec<String> {
        let upstream: BTreeSet<&str> = self
            .connections_into(node_id)
            .map(|connection| connection.from_node_id.as_str())
            .collect();
        let mut upstream: Vec<String> = upstream.into_iter().map(str::to_string).collect();
        upstream.sort_by_key(|id| self.declaration_index(id).unwrap_or(usize::MAX));
        upstream
    }

    /// Nodes needed to produce `endpoint`, each after all of its upstream
    /// dependencies. Ties follow declaration order.
    pub fn topological_order(&self, endpoint: &str) -> Result<Vec<String>, BundleGraphError> {
        let mut walk = OrderWalk::default();
        self.visit(endpoint, &mut walk)?;
        Ok(walk.order)
    }

    /// Union of the per-endpoint orders, keeping first occurrences.
    pub fn execution_order(&self) -> Result<Vec<String>, BundleGraphError> {
        let mut walk = OrderWalk::default();
        for endpoint in self.endpoint_nodes() {
            self.visit(&endpoint, &mut walk)?;
        }
        Ok(walk.order)
    }

    /// Cycle check over every node, including components without endpoints.
    pub fn check_acyclic(&self) -> Result<(), BundleGraphError> {
        let mut walk = OrderWalk::default();
        for node in &self.nodes {
            self.visit(&node.id, &mut walk)?;
        }
        Ok(())
    }

    /// Snapshot whose connection labels match the current labels of their
    /// source points.
    pub fn with_refreshed_labels(&self) -> Self {
        let mut refreshed = self.clone();
        for connection in &mut refreshed.connections {
            let label = self
                .node(&connection.from_node_id)
                .and_then(|node| node.output_point(&connection.from_point_id))
                .map(|point| point.label);
            if let Some(label) = label {
                connection.label = label;
            }
        }
        refreshed
    }

    /// Connections whose label differs from their source point's label.
    pub fn stale_connections(&self) -> Vec<&Connection> {
        self.connections
            .iter()
            .filter(|connection| {
                self.node(&connection.from_node_id)
                    .and_then(|node| node.output_point(&connection.from_point_id))
                    .is_some_and(|point| point.label != connection.label)
            })
            .collect()
    }

    fn visit(&self, node_id: &str, walk: &mut OrderWalk) -> Result<(), BundleGraphError> {
        if let Some(position) = walk.path.iter().position(|id| id == node_id) {
            let mut path = walk.path[position..].to_vec();
            path.push(node_id.to_string());
            return Err(BundleGraphError::CycleDetected {
                node_id: node_id.to_string(),
                path,
            });
        }
        if walk.visited.contains(node_id) {
            return Ok(());
        }
        if self.node(node_id).is_none() {
            return Err(BundleGraphError::MalformedGraph(format!(
                "unknown node id '{node_id}'"
            )));
        }

        walk.path.push(node_id.to_string());
        for upstream in self.upstream_nodes(node_id) {
            self.visit(&upstream, walk)?;
        }
        walk.path.pop();

        walk.visited.insert(node_id.to_string());
        walk.order.push(node_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct OrderWalk {
    visited: BTreeSet<String>,
    path: Vec<String>,
    order: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(id: &str, from: &str, to: &str) -> Connection {
        Connection {
            id: id.to_string(),
            from_node_id: from.to_string(),
            from_point_id: "out".to_string(),
            to_node_id: to.to_string(),
            to_point_id: "in".to_string(),
            label: "-".to_string(),
        }
    }

    fn node(id: &str, kind: NodeKind) -> NodeSpec {
        NodeSpec::new(id, id, kind).with_input("in").with_output("out", "-")
    }

    #[test]
    fn topological_order_diamond_expected_dependencies_first() {
        let graph = GraphModel::new(
            vec![
                node("d", NodeKind::Exporter),
                node("b", NodeKind::Filter),
                node("c", NodeKind::Grouping),
                node("a", NodeKind::Loader),
            ],
            vec![
                connection("1", "a", "b"),
                connection("2", "a", "c"),
                connection("3", "b", "d"),
                connection("4", "c", "d"),
            ],
        );

        let order = graph.topological_order("d").expect("order should succeed");
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn topological_order_cycle_expected_cycle_detected_with_path() {
        let graph = GraphModel::new(
            vec![node("a", NodeKind::Filter), node("b", NodeKind::Filter)],
            vec![connection("1", "a", "b"), connection("2", "b", "a")],
        );

        let error = graph.topological_order("a").expect_err("cycle should fail");
        match error {
            BundleGraphError::CycleDetected { node_id, path } => {
                assert_eq!(node_id, "a");
                assert_eq!(path, vec!["a", "b", "a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn check_acyclic_cycle_without_endpoint_expected_error() {
        let graph = GraphModel::new(
            vec![
                node("a", NodeKind::Filter),
                node("b", NodeKind::Filter),
                node("z", NodeKind::Loader),
            ],
            vec![connection("1", "a", "b"), connection("2", "b", "a")],
        );

        assert_eq!(graph.endpoint_nodes(), vec!["z"]);
        assert!(graph.execution_order().is_ok());
        assert!(matches!(
            graph.check_acyclic(),
            Err(BundleGraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn execution_order_two_endpoints_expected_shared_prefix_once() {
        let graph = GraphModel::new(
            vec![
                node("a", NodeKind::Loader),
                node("x", NodeKind::Exporter),
                node("y", NodeKind::Exporter),
            ],
            vec![connection("1", "a", "x"), connection("2", "a", "y")],
        );

        assert_eq!(graph.endpoint_nodes(), vec!["x", "y"]);
        assert_eq!(
            graph.execution_order().expect("order should succeed"),
            vec!["a", "x", "y"]
        );
    }

    #[test]
    fn resolved_output_points_filter_expected_point_per_condition() {
        let mut filter = NodeSpec::new("f", "f", NodeKind::Filter).with_input("in");
        filter.settings.filter_conditions = vec![
            FilterCondition::new("p1", "Textures"),
            FilterCondition::new("p2", "Models"),
        ];

        let labels: Vec<String> = filter
            .resolved_output_points()
            .into_iter()
            .map(|point| point.label)
            .collect();
        assert_eq!(labels, vec!["Textures", "Models"]);
    }

    #[test]
    fn with_refreshed_labels_renamed_keyword_expected_connection_label_updated() {
        let mut filter = NodeSpec::new("f", "f", NodeKind::Filter).with_input("in");
        filter.settings.filter_conditions = vec![FilterCondition::new("out", "new")];
        let mut link = connection("1", "f", "e");
        link.label = "old".to_string();
        let graph = GraphModel::new(vec![filter, node("e", NodeKind::Exporter)], vec![link]);

        assert_eq!(graph.stale_connections().len(), 1);
        let refreshed = graph.with_refreshed_labels();
        assert_eq!(refreshed.connections()[0].label, "new");
        assert_eq!(graph.connections()[0].label, "old");
        assert!(refreshed.stale_connections().is_empty());
    }

    #[test]
    fn bundle_options_contains_expected_flag_membership() {
        let options = BundleOptions::DISABLE_WRITE_TYPE_TREE.with(BundleOptions::APPEND_HASH);

        assert!(options.contains(BundleOptions::APPEND_HASH));
        assert!(!options.contains(BundleOptions::IGNORE_TYPE_TREE_CHANGES));
        assert_eq!(options.names(), vec!["disable_write_type_tree", "append_hash"]);
    }

    #[test]
    fn config_snapshot_target_override_expected_value_changes() {
        let mut loader = NodeSpec::new("l", "l", NodeKind::Loader);
        loader.settings.load_path = MultiTarget::with_default("Assets/A".to_string());
        loader
            .settings
            .load_path
            .set(BuildTargetGroup::Ios, "Assets/B".to_string());

        assert_ne!(
            loader.config_snapshot(BuildTargetGroup::Default),
            loader.config_snapshot(BuildTargetGroup::Ios)
        );
        assert_eq!(
            loader.config_snapshot(BuildTargetGroup::Default),
            loader.config_snapshot(BuildTargetGroup::Android)
        );
    }
}
