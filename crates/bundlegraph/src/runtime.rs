use crate::asset::PointOutputs;
use crate::cache::SharedCacheStore;
use crate::filesystem::{LocalFileSystem, SharedAssetFileSystem};
use crate::operations::{
    AssetFailure, NoopImporter, OperationRegistry, SharedAssetImporter, core_registry,
};
use crate::{
    AggregateRunError, BuildTargetGroup, Diagnostic, ProjectLayout, RuntimeEventSink,
    ScriptRegistry,
};
use bundlegraph_cache::MemoryCacheStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    Idle,
    Validating,
    Ordering,
    SettingUp,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl ExecutorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Setup,
    Run,
}

impl ExecutionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Run => "run",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Success,
    PartialSuccess,
    Cached,
    Failed,
    /// An upstream node failed or was blocked.
    Blocked,
    /// Not started because the run was cancelled.
    Skipped,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Cached => "cached",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_success_like(self) -> bool {
        matches!(self, Self::Success | Self::PartialSuccess | Self::Cached)
    }

    /// Downstream nodes of a node in this status cannot run.
    pub fn blocks_downstream(self) -> bool {
        matches!(self, Self::Failed | Self::Blocked | Self::Skipped)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Failed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeError {
    pub target: BuildTargetGroup,
    pub node_id: String,
    pub node_name: String,
    pub phase: ExecutionPhase,
    pub message: String,
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}) {}: {}",
            self.target,
            self.node_name,
            self.node_id,
            self.phase.as_str(),
            self.message
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node_id: String,
    pub node_name: String,
    pub status: NodeStatus,
    pub outputs: PointOutputs,
    pub failures: Vec<AssetFailure>,
    pub fingerprint: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: BuildTargetGroup,
    pub nodes: Vec<NodeReport>,
}

impl TargetReport {
    pub fn node(&self, node_id: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|report| report.node_id == node_id)
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes
            .iter()
            .filter(|report| report.status == status)
            .count()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub state: ExecutorState,
    pub order: Vec<String>,
    pub targets: Vec<TargetReport>,
    pub errors: Vec<NodeError>,
    pub diagnostics: Vec<Diagnostic>,
}

impl RunReport {
    pub fn is_done(&self) -> bool {
        self.status == RunStatus::Done
    }

    pub fn target(&self, target: BuildTargetGroup) -> Option<&TargetReport> {
        self.targets.iter().find(|report| report.target == target)
    }

    pub fn node_status(&self, target: BuildTargetGroup, node_id: &str) -> Option<NodeStatus> {
        self.target(target)?.node(node_id).map(|report| report.status)
    }

    /// Every per-asset failure across targets, with the node that recorded it.
    pub fn asset_failures(&self) -> Vec<(BuildTargetGroup, &str, &AssetFailure)> {
        self.targets
            .iter()
            .flat_map(|target| {
                target.nodes.iter().flat_map(move |node| {
                    node.failures
                        .iter()
                        .map(move |failure| (target.target, node.node_id.as_str(), failure))
                })
            })
            .collect()
    }

    pub fn into_result(self) -> Result<RunReport, AggregateRunError> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(AggregateRunError {
                errors: self.errors,
            })
        }
    }
}

/// Shared flag checked before each node starts. Nodes already running finish.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct RunConfig {
    pub run_id: Option<String>,
    pub targets: Vec<BuildTargetGroup>,
    pub layout: ProjectLayout,
    pub fs: SharedAssetFileSystem,
    pub cache: SharedCacheStore,
    pub use_cache: bool,
    pub parallel_targets: bool,
    pub operations: OperationRegistry,
    pub scripts: Arc<ScriptRegistry>,
    pub importer: SharedAssetImporter,
    pub events: RuntimeEventSink,
    pub cancellation: CancellationToken,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_id: None,
            targets: vec![BuildTargetGroup::Default],
            layout: ProjectLayout::default(),
            fs: Arc::new(LocalFileSystem::new()),
            cache: Arc::new(MemoryCacheStore::new()),
            use_cache: true,
            parallel_targets: false,
            operations: core_registry(),
            scripts: Arc::new(ScriptRegistry::new()),
            importer: Arc::new(NoopImporter),
            events: RuntimeEventSink::default(),
            cancellation: CancellationToken::new(),
        }
    }
}

impl RunConfig {
    pub fn for_project(project_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            layout: ProjectLayout::new(project_root),
            ..Self::default()
        }
    }
}
