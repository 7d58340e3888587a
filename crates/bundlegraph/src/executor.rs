use crate::asset::{AssetGroups, PointOutputs, merge_groups};
use crate::cache::{ExecutionCache, fingerprint};
use crate::events::{EventEmitter, NodeEvent, RunEvent};
use crate::operations::{
    CacheHints, OperationEnv, OperationRegistry, OperationRequest, SharedNodeOperation,
};
use crate::{
    BuildTargetGroup, BundleGraphError, CancellationToken, ExecutionPhase, ExecutorState,
    GraphModel, NodeError, NodeReport, NodeSpec, NodeStatus, RunConfig, RunReport, RunStatus,
    TargetReport, parse_graph, validate_or_raise,
};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Runs a graph through Validating, Ordering, SettingUp and Running for every
/// configured target group.
///
/// The executor keeps its cache store between calls, so executing the same
/// graph again reuses the outputs of unchanged nodes.
pub struct GraphExecutor {
    config: RunConfig,
    state: Mutex<ExecutorState>,
}

impl GraphExecutor {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ExecutorState::Idle),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn state(&self) -> ExecutorState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(ExecutorState::Failed)
    }

    fn transition(&self, next: ExecutorState) {
        if let Ok(mut state) = self.state.lock() {
            debug!(from = ?*state, to = ?next, "executor state");
            *state = next;
        }
    }

    pub async fn execute_document(&self, source: &str) -> Result<RunReport, BundleGraphError> {
        let graph = parse_graph(source)?;
        self.execute(&graph).await
    }

    /// Malformed or cyclic graphs fail before any filesystem access. Node
    /// failures come back inside the report.
    pub async fn execute(&self, graph: &GraphModel) -> Result<RunReport, BundleGraphError> {
        let result = self.execute_inner(graph).await;
        if result.is_err() {
            self.transition(ExecutorState::Failed);
        }
        result
    }

    async fn execute_inner(&self, graph: &GraphModel) -> Result<RunReport, BundleGraphError> {
        let config = &self.config;
        let run_id = config.run_id.clone().unwrap_or_else(generate_run_id);
        let events = EventEmitter::new(config.events.clone());

        self.transition(ExecutorState::Validating);
        graph.check_acyclic()?;
        let diagnostics = validate_or_raise(graph, &[])?;
        for diagnostic in diagnostics.iter().filter(|d| !d.is_error()) {
            warn!(rule = %diagnostic.rule, "{diagnostic}");
        }

        self.transition(ExecutorState::Ordering);
        let order = graph.execution_order()?;

        let targets = config.targets.clone();
        info!(
            run_id = %run_id,
            targets = ?targets.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
            nodes = order.len(),
            "run started"
        );
        events.run(RunEvent::Started {
            run_id: run_id.clone(),
            targets: targets.iter().map(|target| target.to_string()).collect(),
            node_count: order.len(),
        });

        let run = TargetRun {
            run_id: run_id.clone(),
            graph: graph.clone(),
            order: order.clone(),
            env: OperationEnv {
                fs: config.fs.clone(),
                layout: config.layout.clone(),
                scripts: config.scripts.clone(),
                importer: config.importer.clone(),
            },
            operations: config.operations.clone(),
            use_cache: config.use_cache,
            cancellation: config.cancellation.clone(),
            events: events.clone(),
        };

        self.transition(ExecutorState::SettingUp);
        let mut setup_errors = Vec::new();
        let mut caches = BTreeMap::new();
        for target in &targets {
            setup_errors.extend(run.setup(*target).await);
            if config.use_cache {
                let cache = ExecutionCache::load(config.cache.clone(), *target, &order).await?;
                caches.insert(*target, cache);
            }
        }
        if !setup_errors.is_empty() {
            warn!(run_id = %run_id, errors = setup_errors.len(), "setup failed");
            events.run(RunEvent::SetupFailed {
                run_id: run_id.clone(),
                error_count: setup_errors.len(),
            });
            self.transition(ExecutorState::Failed);
            return Ok(RunReport {
                run_id,
                status: RunStatus::Failed,
                state: ExecutorState::Failed,
                order,
                targets: Vec::new(),
                errors: setup_errors,
                diagnostics,
            });
        }

        self.transition(ExecutorState::Running);
        let writes_sources = order
            .iter()
            .filter_map(|node_id| graph.node(node_id))
            .any(|node| node.kind.rewrites_sources());
        let parallel = config.parallel_targets && targets.len() > 1;
        if parallel && writes_sources {
            warn!(run_id = %run_id, "graph modifies source assets, running targets sequentially");
        }
        let outcomes = if parallel && !writes_sources {
            let runs = targets
                .iter()
                .map(|target| run.run(*target, caches.remove(target)));
            join_all(runs)
                .await
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?
        } else {
            let mut outcomes = Vec::with_capacity(targets.len());
            for target in &targets {
                outcomes.push(run.run(*target, caches.remove(target)).await?);
            }
            outcomes
        };

        let cancelled = outcomes.iter().any(|outcome| outcome.cancelled);
        let mut errors = Vec::new();
        let mut reports = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            errors.extend(outcome.errors);
            reports.push(outcome.report);
        }

        let (status, state) = if !errors.is_empty() {
            (RunStatus::Failed, ExecutorState::Failed)
        } else if cancelled {
            (RunStatus::Cancelled, ExecutorState::Cancelled)
        } else {
            (RunStatus::Done, ExecutorState::Done)
        };
        match status {
            RunStatus::Done => events.run(RunEvent::Completed {
                run_id: run_id.clone(),
            }),
            RunStatus::Failed => events.run(RunEvent::Failed {
                run_id: run_id.clone(),
                error_count: errors.len(),
            }),
            RunStatus::Cancelled => events.run(RunEvent::Cancelled {
                run_id: run_id.clone(),
            }),
        }
        info!(run_id = %run_id, status = ?status, errors = errors.len(), "run finished");
        self.transition(state);

        Ok(RunReport {
            run_id,
            status,
            state,
            order,
            targets: reports,
            errors,
            diagnostics,
        })
    }
}

impl Default for GraphExecutor {
    fn default() -> Self {
        Self::new(RunConfig::default())
    }
}

/// Shared-nothing per-target execution over one graph snapshot.
struct TargetRun {
    run_id: String,
    graph: GraphModel,
    order: Vec<String>,
    env: OperationEnv,
    operations: OperationRegistry,
    use_cache: bool,
    cancellation: CancellationToken,
    events: EventEmitter,
}

struct TargetOutcome {
    report: TargetReport,
    errors: Vec<NodeError>,
    cancelled: bool,
}

impl TargetRun {
    fn node(&self, node_id: &str) -> Result<&NodeSpec, BundleGraphError> {
        self.graph.node(node_id).ok_or_else(|| {
            BundleGraphError::MalformedGraph(format!("ordered node '{node_id}' is missing"))
        })
    }

    fn operation(&self, node: &NodeSpec) -> Result<SharedNodeOperation, BundleGraphError> {
        self.operations.resolve(node.kind).ok_or_else(|| {
            crate::configuration_error(node, format!("no operation registered for {}", node.kind.as_str()))
        })
    }

    /// Assets arriving on the node's input connections, in connection order.
    fn inputs(&self, node_id: &str, outputs: &BTreeMap<String, PointOutputs>) -> AssetGroups {
        let mut inputs = AssetGroups::new();
        for connection in self.graph.connections_into(node_id) {
            if let Some(groups) = outputs
                .get(&connection.from_node_id)
                .and_then(|points| points.get(&connection.from_point_id))
            {
                merge_groups(&mut inputs, groups);
            }
        }
        inputs
    }

    fn request<'a>(
        &'a self,
        target: BuildTargetGroup,
        node: &'a NodeSpec,
        inputs: &'a AssetGroups,
        cache_hints: &'a CacheHints,
    ) -> OperationRequest<'a> {
        OperationRequest {
            target,
            node,
            input_point: node.input_point(),
            output_connections: self.graph.connections_out_of(&node.id).collect(),
            inputs,
            cache_hints,
            env: &self.env,
        }
    }

    fn node_error(
        &self,
        target: BuildTargetGroup,
        node: &NodeSpec,
        phase: ExecutionPhase,
        error: &BundleGraphError,
    ) -> NodeError {
        let message = match error {
            BundleGraphError::NodeConfiguration(error) => error.message.clone(),
            BundleGraphError::NodeRuntime(error) => error.message.clone(),
            other => other.to_string(),
        };
        self.events.node(NodeEvent::Failed {
            run_id: self.run_id.clone(),
            target: target.to_string(),
            node_id: node.id.clone(),
            phase: phase.as_str().to_string(),
            message: message.clone(),
        });
        NodeError {
            target,
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            phase,
            message,
        }
    }

    /// Validates every node for one target, threading setup outputs so that
    /// input-dependent checks see the assets that will arrive.
    async fn setup(&self, target: BuildTargetGroup) -> Vec<NodeError> {
        let mut errors = Vec::new();
        let mut outputs: BTreeMap<String, PointOutputs> = BTreeMap::new();
        let hints = CacheHints {
            cache_enabled: self.use_cache,
            previous_outputs: None,
        };

        for node_id in &self.order {
            let node = match self.node(node_id) {
                Ok(node) => node,
                Err(error) => {
                    errors.push(NodeError {
                        target,
                        node_id: node_id.clone(),
                        node_name: node_id.clone(),
                        phase: ExecutionPhase::Setup,
                        message: error.to_string(),
                    });
                    continue;
                }
            };
            let inputs = self.inputs(node_id, &outputs);
            let result = match self.operation(node) {
                Ok(operation) => {
                    operation
                        .setup(&self.request(target, node, &inputs, &hints))
                        .await
                }
                Err(error) => Err(error),
            };
            match result {
                Ok(output) => {
                    debug!(target_group = %target, node_id = %node.id, "setup ok");
                    self.events.node(NodeEvent::SetupCompleted {
                        run_id: self.run_id.clone(),
                        target: target.to_string(),
                        node_id: node.id.clone(),
                    });
                    outputs.insert(node_id.clone(), output.points);
                }
                Err(error) => {
                    warn!(target_group = %target, node_id = %node.id, %error, "setup failed");
                    errors.push(self.node_error(target, node, ExecutionPhase::Setup, &error));
                }
            }
        }
        errors
    }

    async fn run(
        &self,
        target: BuildTargetGroup,
        mut cache: Option<ExecutionCache>,
    ) -> Result<TargetOutcome, BundleGraphError> {
        let mut outputs: BTreeMap<String, PointOutputs> = BTreeMap::new();
        let mut statuses: BTreeMap<String, NodeStatus> = BTreeMap::new();
        let mut reports = Vec::with_capacity(self.order.len());
        let mut errors = Vec::new();
        let mut cancelled = false;

        for node_id in &self.order {
            let node = self.node(node_id)?;
            let mut report = NodeReport {
                node_id: node.id.clone(),
                node_name: node.name.clone(),
                status: NodeStatus::Success,
                outputs: PointOutputs::new(),
                failures: Vec::new(),
                fingerprint: None,
            };

            if self.cancellation.is_cancelled() {
                cancelled = true;
                report.status = NodeStatus::Skipped;
                statuses.insert(node_id.clone(), report.status);
                reports.push(report);
                continue;
            }

            let blocked_by = self
                .graph
                .upstream_nodes(node_id)
                .into_iter()
                .find(|upstream| {
                    statuses
                        .get(upstream)
                        .is_some_and(|status| status.blocks_downstream())
                });
            if let Some(upstream_node_id) = blocked_by {
                debug!(target_group = %target, node_id = %node.id, upstream = %upstream_node_id, "blocked");
                self.events.node(NodeEvent::Blocked {
                    run_id: self.run_id.clone(),
                    target: target.to_string(),
                    node_id: node.id.clone(),
                    upstream_node_id,
                });
                report.status = NodeStatus::Blocked;
                statuses.insert(node_id.clone(), report.status);
                reports.push(report);
                continue;
            }

            let inputs = self.inputs(node_id, &outputs);
            match self
                .run_node(target, node, &inputs, cache.as_mut(), &mut report)
                .await
            {
                Ok(()) => {
                    for failure in &report.failures {
                        warn!(
                            target_group = %target,
                            node_id = %node.id,
                            asset = %failure.asset_path,
                            "{}",
                            failure.message
                        );
                    }
                    outputs.insert(node_id.clone(), report.outputs.clone());
                }
                Err(error) => {
                    warn!(target_group = %target, node_id = %node.id, %error, "node failed");
                    if let Some(cache) = cache.as_mut() {
                        cache.invalidate(node_id);
                    }
                    errors.push(self.node_error(target, node, ExecutionPhase::Run, &error));
                    report.status = NodeStatus::Failed;
                }
            }
            statuses.insert(node_id.clone(), report.status);
            reports.push(report);
        }

        if let Some(cache) = cache.as_mut() {
            let written = cache.flush().await?;
            debug!(target_group = %target, written, "cache flushed");
        }

        Ok(TargetOutcome {
            report: TargetReport {
                target,
                nodes: reports,
            },
            errors,
            cancelled,
        })
    }

    async fn run_node(
        &self,
        target: BuildTargetGroup,
        node: &NodeSpec,
        inputs: &AssetGroups,
        cache: Option<&mut ExecutionCache>,
        report: &mut NodeReport,
    ) -> Result<(), BundleGraphError> {
        let operation = self.operation(node)?;
        let fs = self.env.fs.as_ref();
        let cache = cache.filter(|_| operation.cacheable());

        let node_fingerprint = match cache.as_ref() {
            Some(_) => Some(fingerprint(target, node, inputs, fs).await?),
            None => None,
        };
        report.fingerprint = node_fingerprint.clone();

        if let (Some(cache), Some(node_fingerprint)) = (cache.as_ref(), node_fingerprint.as_ref()) {
            if let Some(cached) = cache.lookup(&node.id, node_fingerprint, fs).await {
                debug!(target_group = %target, node_id = %node.id, "cache hit");
                self.events.node(NodeEvent::CacheHit {
                    run_id: self.run_id.clone(),
                    target: target.to_string(),
                    node_id: node.id.clone(),
                });
                report.status = NodeStatus::Cached;
                report.outputs = cached;
                return Ok(());
            }
        }

        let hints = CacheHints {
            cache_enabled: self.use_cache,
            previous_outputs: cache
                .as_ref()
                .and_then(|cache| cache.previous_outputs(&node.id).cloned()),
        };
        self.events.node(NodeEvent::Started {
            run_id: self.run_id.clone(),
            target: target.to_string(),
            node_id: node.id.clone(),
        });
        let output = operation
            .run(&self.request(target, node, inputs, &hints))
            .await?;

        // Operations such as Modifier rewrite their inputs, so the recorded
        // fingerprint has to reflect the files as this run left them.
        let node_fingerprint = match node_fingerprint {
            Some(_) => Some(fingerprint(target, node, inputs, fs).await?),
            None => None,
        };
        report.fingerprint = node_fingerprint.clone();

        report.status = if output.is_partial() {
            NodeStatus::PartialSuccess
        } else {
            NodeStatus::Success
        };
        if let Some(cache) = cache {
            match node_fingerprint {
                Some(node_fingerprint) if !output.is_partial() => {
                    cache.record(&node.id, node_fingerprint, output.points.clone());
                }
                _ => cache.invalidate(&node.id),
            }
        }

        self.events.node(NodeEvent::Completed {
            run_id: self.run_id.clone(),
            target: target.to_string(),
            node_id: node.id.clone(),
            status: report.status.as_str().to_string(),
            asset_count: output.asset_count(),
            failure_count: output.failures.len(),
        });
        info!(
            target_group = %target,
            node_id = %node.id,
            node = %node.name,
            status = report.status.as_str(),
            assets = output.asset_count(),
            "node finished"
        );
        report.outputs = output.points;
        report.failures = output.failures;
        Ok(())
    }
}

fn generate_run_id() -> String {
    format!("run-{}", uuid::Uuid::new_v4())
}
