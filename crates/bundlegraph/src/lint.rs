use crate::{BundleGraphError, Diagnostic, GraphModel, Severity, ValidationError};
use std::collections::BTreeSet;

pub trait LintRule {
    fn name(&self) -> &str;
    fn apply(&self, graph: &GraphModel) -> Vec<Diagnostic>;
}

pub fn validate(graph: &GraphModel, extra_rules: &[&dyn LintRule]) -> Vec<Diagnostic> {
    let mut diagnostics = structural_diagnostics(graph);

    diagnostics.extend(rule_connection_direction(graph));
    diagnostics.extend(rule_endpoint_exists(graph));
    diagnostics.extend(rule_acyclic(graph));
    diagnostics.extend(rule_stale_connection_label(graph));
    diagnostics.extend(rule_input_connected(graph));
    diagnostics.extend(rule_script_class_present(graph));

    for rule in extra_rules {
        diagnostics.extend(rule.apply(graph));
    }

    diagnostics
}

pub fn validate_or_raise(
    graph: &GraphModel,
    extra_rules: &[&dyn LintRule],
) -> Result<Vec<Diagnostic>, ValidationError> {
    let diagnostics = validate(graph, extra_rules);
    if diagnostics.iter().any(Diagnostic::is_error) {
        return Err(ValidationError::new(diagnostics));
    }
    Ok(diagnostics)
}

/// Identity and reference problems that make a graph unusable as a model.
pub fn structural_diagnostics(graph: &GraphModel) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    diagnostics.extend(rule_duplicate_node_id(graph));
    diagnostics.extend(rule_duplicate_node_name(graph));
    diagnostics.extend(rule_duplicate_connection_id(graph));
    diagnostics.extend(rule_connection_references(graph));
    diagnostics
}

/// Fails with `MalformedGraph` when any structural rule reports an error.
pub fn ensure_well_formed(graph: &GraphModel) -> Result<(), BundleGraphError> {
    let messages: Vec<String> = structural_diagnostics(graph)
        .into_iter()
        .filter(Diagnostic::is_error)
        .map(|diagnostic| diagnostic.message)
        .collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(BundleGraphError::MalformedGraph(messages.join("; ")))
    }
}

fn rule_duplicate_node_id(graph: &GraphModel) -> Vec<Diagnostic> {
    let mut seen = BTreeSet::new();
    let mut diagnostics = Vec::new();
    for node in graph.nodes() {
        if !seen.insert(node.id.as_str()) {
            diagnostics.push(
                Diagnostic::new(
                    "duplicate_node_id",
                    Severity::Error,
                    format!("node id '{}' is declared more than once", node.id),
                )
                .with_node_id(node.id.clone()),
            );
        }
    }
    diagnostics
}

fn rule_duplicate_node_name(graph: &GraphModel) -> Vec<Diagnostic> {
    let mut seen = BTreeSet::new();
    let mut diagnostics = Vec::new();
    for node in graph.nodes() {
        if !seen.insert(node.name.as_str()) {
            diagnostics.push(
                Diagnostic::new(
                    "duplicate_node_name",
                    Severity::Error,
                    format!("node name '{}' is used by more than one node", node.name),
                )
                .with_node_id(node.id.clone())
                .with_fix("give every node a unique name"),
            );
        }
    }
    diagnostics
}

fn rule_duplicate_connection_id(graph: &GraphModel) -> Vec<Diagnostic> {
    let mut seen = BTreeSet::new();
    let mut diagnostics = Vec::new();
    for connection in graph.connections() {
        if !seen.insert(connection.id.as_str()) {
            diagnostics.push(
                Diagnostic::new(
                    "duplicate_connection_id",
                    Severity::Error,
                    format!("connection id '{}' is declared more than once", connection.id),
                )
                .with_connection_id(connection.id.clone()),
            );
        }
    }
    diagnostics
}

fn rule_connection_references(graph: &GraphModel) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for connection in graph.connections() {
        let dangling = |message: String| {
            Diagnostic::new("connection_references", Severity::Error, message)
                .with_connection_id(connection.id.clone())
        };

        match graph.node(&connection.from_node_id) {
            None => diagnostics.push(dangling(format!(
                "connection '{}' starts at missing node '{}'",
                connection.id, connection.from_node_id
            ))),
            Some(node) => {
                let known = node.output_point(&connection.from_point_id).is_some()
                    || node.has_input_point(&connection.from_point_id);
                if !known {
                    diagnostics.push(
                        dangling(format!(
                            "connection '{}' starts at missing point '{}' on node '{}'",
                            connection.id, connection.from_point_id, connection.from_node_id
                        ))
                        .at_point(&connection.from_node_id, &connection.from_point_id),
                    );
                }
            }
        }

        match graph.node(&connection.to_node_id) {
            None => diagnostics.push(dangling(format!(
                "connection '{}' ends at missing node '{}'",
                connection.id, connection.to_node_id
            ))),
            Some(node) => {
                let known = node.has_input_point(&connection.to_point_id)
                    || node.output_point(&connection.to_point_id).is_some();
                if !known {
                    diagnostics.push(
                        dangling(format!(
                            "connection '{}' ends at missing point '{}' on node '{}'",
                            connection.id, connection.to_point_id, connection.to_node_id
                        ))
                        .at_point(&connection.to_node_id, &connection.to_point_id),
                    );
                }
            }
        }
    }
    diagnostics
}

fn rule_connection_direction(graph: &GraphModel) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for connection in graph.connections() {
        let from_is_input = graph.node(&connection.from_node_id).is_some_and(|node| {
            node.output_point(&connection.from_point_id).is_none()
                && node.has_input_point(&connection.from_point_id)
        });
        let to_is_output = graph.node(&connection.to_node_id).is_some_and(|node| {
            !node.has_input_point(&connection.to_point_id)
                && node.output_point(&connection.to_point_id).is_some()
        });
        if from_is_input || to_is_output {
            diagnostics.push(
                Diagnostic::new(
                    "connection_direction",
                    Severity::Error,
                    format!(
                        "connection '{}' must run from an output point to an input point",
                        connection.id
                    ),
                )
                .with_connection_id(connection.id.clone()),
            );
        }
    }
    diagnostics
}

fn rule_endpoint_exists(graph: &GraphModel) -> Vec<Diagnostic> {
    if graph.endpoint_nodes().is_empty() {
        vec![Diagnostic::new(
            "endpoint_exists",
            Severity::Error,
            "graph must have at least one node without outgoing connections",
        )]
    } else {
        Vec::new()
    }
}

fn rule_acyclic(graph: &GraphModel) -> Vec<Diagnostic> {
    match graph.check_acyclic() {
        Err(BundleGraphError::CycleDetected { node_id, path }) => vec![
            Diagnostic::new(
                "acyclic",
                Severity::Error,
                format!("cycle detected: {}", path.join(" -> ")),
            )
            .with_node_id(node_id),
        ],
        _ => Vec::new(),
    }
}

fn rule_stale_connection_label(graph: &GraphModel) -> Vec<Diagnostic> {
    graph
        .stale_connections()
        .into_iter()
        .map(|connection| {
            Diagnostic::new(
                "stale_connection_label",
                Severity::Warning,
                format!(
                    "connection '{}' label '{}' no longer matches its source point",
                    connection.id, connection.label
                ),
            )
            .with_connection_id(connection.id.clone())
            .at_point(&connection.from_node_id, &connection.from_point_id)
            .with_fix("refresh connection labels before executing")
        })
        .collect()
}

fn rule_input_connected(graph: &GraphModel) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for node in graph.nodes() {
        if node.kind.requires_input() && graph.connections_into(&node.id).next().is_none() {
            diagnostics.push(
                Diagnostic::new(
                    "input_connected",
                    Severity::Warning,
                    format!("{} node '{}' has no incoming connection", node.kind, node.name),
                )
                .with_node_id(node.id.clone()),
            );
        }
    }
    diagnostics
}

fn rule_script_class_present(graph: &GraphModel) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for node in graph.nodes() {
        let missing = node
            .script_class_name
            .as_deref()
            .is_none_or(|name| name.trim().is_empty());
        if node.kind.uses_script() && missing {
            diagnostics.push(
                Diagnostic::new(
                    "script_class_present",
                    Severity::Warning,
                    format!("{} node '{}' has no script class", node.kind, node.name),
                )
                .with_node_id(node.id.clone()),
            );
        }
    }
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Connection, NodeKind, NodeSpec};

    fn link(id: &str, from: &str, to: &str) -> Connection {
        Connection {
            id: id.to_string(),
            from_node_id: from.to_string(),
            from_point_id: "out".to_string(),
            to_node_id: to.to_string(),
            to_point_id: "in".to_string(),
            label: "-".to_string(),
        }
    }

    fn loader(id: &str) -> NodeSpec {
        NodeSpec::new(id, id, NodeKind::Loader).with_output("out", "-")
    }

    fn exporter(id: &str) -> NodeSpec {
        NodeSpec::new(id, id, NodeKind::Exporter).with_input("in")
    }

    #[test]
    fn validate_duplicate_names_expected_error() {
        let mut second = exporter("e");
        second.name = "l".to_string();
        let graph = GraphModel::new(vec![loader("l"), second], vec![link("1", "l", "e")]);

        let diagnostics = validate(&graph, &[]);
        assert!(
            diagnostics
                .iter()
                .any(|d| d.rule == "duplicate_node_name" && d.is_error())
        );
        assert!(matches!(
            ensure_well_formed(&graph),
            Err(BundleGraphError::MalformedGraph(_))
        ));
    }

    #[test]
    fn validate_missing_point_expected_error() {
        let mut connection = link("1", "l", "e");
        connection.to_point_id = "nope".to_string();
        let graph = GraphModel::new(vec![loader("l"), exporter("e")], vec![connection]);

        assert!(
            validate(&graph, &[])
                .iter()
                .any(|d| d.rule == "connection_references"
                    && d.connection_id.as_deref() == Some("1")
                    && d.location().as_deref() == Some("e/nope"))
        );
    }

    #[test]
    fn validate_stale_label_expected_warning_at_source_point() {
        let mut connection = link("1", "l", "e");
        connection.label = "renamed".to_string();
        let graph = GraphModel::new(vec![loader("l"), exporter("e")], vec![connection]);

        let diagnostics = validate_or_raise(&graph, &[]).expect("stale labels only warn");
        let stale = diagnostics
            .iter()
            .find(|d| d.rule == "stale_connection_label")
            .expect("stale label should be reported");
        assert_eq!(stale.location().as_deref(), Some("l/out"));
        assert_eq!(stale.connection_id.as_deref(), Some("1"));
    }

    #[test]
    fn validate_empty_graph_expected_endpoint_error() {
        let graph = GraphModel::new(Vec::new(), Vec::new());
        assert!(
            validate(&graph, &[])
                .iter()
                .any(|d| d.rule == "endpoint_exists")
        );
    }

    #[test]
    fn validate_unconnected_exporter_expected_warning_only() {
        let graph = GraphModel::new(vec![loader("l"), exporter("e")], Vec::new());

        let diagnostics = validate_or_raise(&graph, &[]).expect("warnings should not raise");
        assert!(
            diagnostics
                .iter()
                .any(|d| d.rule == "input_connected" && d.severity == Severity::Warning)
        );
    }

    #[test]
    fn validate_or_raise_reversed_connection_expected_err() {
        let reversed = Connection {
            id: "1".to_string(),
            from_node_id: "e".to_string(),
            from_point_id: "in".to_string(),
            to_node_id: "l".to_string(),
            to_point_id: "out".to_string(),
            label: String::new(),
        };
        let graph = GraphModel::new(vec![loader("l"), exporter("e")], vec![reversed]);

        let error = validate_or_raise(&graph, &[]).expect_err("direction should fail");
        assert!(
            error
                .diagnostics
                .iter()
                .any(|d| d.rule == "connection_direction")
        );
    }

    struct NoExporters;

    impl LintRule for NoExporters {
        fn name(&self) -> &str {
            "no_exporters"
        }

        fn apply(&self, graph: &GraphModel) -> Vec<Diagnostic> {
            graph
                .nodes()
                .iter()
                .filter(|node| node.kind == NodeKind::Exporter)
                .map(|node| {
                    Diagnostic::new(self.name(), Severity::Error, "exporters disabled")
                        .with_node_id(node.id.clone())
                })
                .collect()
        }
    }

    #[test]
    fn validate_extra_rule_expected_included() {
        let graph = GraphModel::new(vec![loader("l"), exporter("e")], vec![link("1", "l", "e")]);
        let diagnostics = validate(&graph, &[&NoExporters]);

        assert!(diagnostics.iter().any(|d| d.rule == "no_exporters"));
    }
}
