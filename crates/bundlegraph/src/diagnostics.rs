use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors stop a run before any filesystem access; warnings are logged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

/// A lint finding, located on a node, a connection, or one point of a
/// connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub node_id: Option<String>,
    pub connection_id: Option<String>,
    pub point_id: Option<String>,
    pub fix: Option<String>,
}

impl Diagnostic {
    pub fn new(rule: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            severity,
            message: message.into(),
            node_id: None,
            connection_id: None,
            point_id: None,
            fix: None,
        }
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_connection_id(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    /// The connection point the finding is about, together with its node.
    pub fn at_point(mut self, node_id: impl Into<String>, point_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self.point_id = Some(point_id.into());
        self
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// `node/point` or `connection` location, when the finding has one.
    pub fn location(&self) -> Option<String> {
        match (&self.node_id, &self.point_id, &self.connection_id) {
            (Some(node), Some(point), _) => Some(format!("{node}/{point}")),
            (Some(node), None, _) => Some(node.clone()),
            (None, _, Some(connection)) => Some(format!("connection {connection}")),
            (None, _, None) => None,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.severity.as_str(), self.rule)?;
        if let Some(location) = self.location() {
            write!(f, " {location}")?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(fix) = &self.fix {
            write!(f, " (fix: {fix})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_point_finding_expected_node_and_point_location() {
        let diagnostic = Diagnostic::new("stale_connection_label", Severity::Warning, "label drift")
            .with_connection_id("c1")
            .at_point("filter", "0")
            .with_fix("refresh labels");

        assert_eq!(
            diagnostic.to_string(),
            "warning [stale_connection_label] filter/0: label drift (fix: refresh labels)"
        );
    }

    #[test]
    fn location_connection_only_expected_connection_label() {
        let diagnostic = Diagnostic::new("connection_direction", Severity::Error, "reversed")
            .with_connection_id("c9");

        assert_eq!(diagnostic.location().as_deref(), Some("connection c9"));
        assert!(diagnostic.is_error());
    }
}
