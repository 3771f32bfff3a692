//! Activity execution engine.
//!
//! `ExecutionEngine` is the central orchestrator:
//! 1. Validates the graph (unless disabled) and seeds start tokens for the
//!    initial node and every bound input parameter.
//! 2. Runs rounds: computes the whole enabled set from the pending pool,
//!    fires it in node order, then places every token the round produced.
//! 3. Offers each new record to the registered specializations.
//! 4. Stops when nothing is enabled, and reports the run as complete only if
//!    every required output parameter was bound.
//!
//! Sub-protocol invocations re-enter the same loop recursively with their own
//! pool and trace; a failure anywhere aborts every enclosing run, unless the
//! engine is permissive, in which case the failing node is recorded as a run
//! issue and the rest of the graph carries on.

use std::collections::BTreeMap;
use std::sync::Arc;

use primitives::ParameterValue;
use primitives::ParameterValueMap;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::error::{
    BindingError, EngineError, ExecutionFailure, SpecializationError, StructuralError,
};
use crate::execution::{aggregate, ActivityExecution, RecordId, TokenValue};
use crate::library::Library;
use crate::models::{Graph, NodeId, NodeKind};
use crate::pool::TokenPool;
use crate::predicates::enabling_tokens;
use crate::specialization::Specialization;
use crate::validation::validate_graph;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Log and annotate specialization failures instead of aborting.
    pub failsafe: bool,
    /// Record a failing node as a run issue and keep going instead of
    /// aborting the run.
    pub permissive: bool,
    /// Run graph validation before each (sub-)run.
    pub validate: bool,
    /// Use the ordinal clock for reproducible timestamps.
    pub ordinal_time: bool,
    /// Rounds a single run may take before it is considered runaway.
    pub max_rounds: usize,
    /// Deepest permitted sub-protocol nesting.
    pub max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            failsafe: false,
            permissive: false,
            validate: true,
            ordinal_time: false,
            max_rounds: 10_000,
            max_depth: 32,
        }
    }
}

/// Output values supplied from outside the engine, keyed by action node.
///
/// A primitive output listed here is taken as given and its computation
/// hook is not called.
pub type NodeOutputs = BTreeMap<NodeId, ParameterValueMap>;

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// Runs activity graphs against a behavior library.
///
/// Construct one engine per library and call [`ExecutionEngine::execute`]
/// once per run; runs share nothing but the library and the registered
/// specializations.
pub struct ExecutionEngine {
    library: Arc<Library>,
    config: EngineConfig,
    specializations: Vec<Box<dyn Specialization>>,
}

impl ExecutionEngine {
    pub fn new(library: impl Into<Arc<Library>>, config: EngineConfig) -> Self {
        Self {
            library: library.into(),
            config,
            specializations: Vec::new(),
        }
    }

    pub fn with_specialization(mut self, specialization: impl Specialization + 'static) -> Self {
        self.specializations.push(Box::new(specialization));
        self
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `graph` to quiescence.
    ///
    /// # Errors
    /// Returns an [`ExecutionFailure`] carrying the partial trace when a
    /// structural, binding, behavior or (outside failsafe mode)
    /// specialization error aborts the run.
    pub fn execute(
        &mut self,
        graph: &Graph,
        actor: &str,
        parameter_values: Vec<ParameterValue>,
    ) -> Result<ActivityExecution, ExecutionFailure> {
        self.execute_with_outputs(graph, actor, parameter_values, NodeOutputs::new())
    }

    /// Run `graph` with some action outputs supplied by the caller, e.g.
    /// measurements taken by hand. `node_outputs` applies to `graph`'s own
    /// actions only, not to those of invoked sub-protocols.
    #[instrument(skip(self, graph, parameter_values, node_outputs), fields(graph = %graph.id))]
    pub fn execute_with_outputs(
        &mut self,
        graph: &Graph,
        actor: &str,
        parameter_values: Vec<ParameterValue>,
        node_outputs: NodeOutputs,
    ) -> Result<ActivityExecution, ExecutionFailure> {
        let mut ctx = RunContext {
            library: &self.library,
            config: &self.config,
            clock: if self.config.ordinal_time {
                Clock::ordinal()
            } else {
                Clock::wall()
            },
            specializations: &mut self.specializations,
        };
        run_graph(&mut ctx, graph, actor, parameter_values, node_outputs, 0)
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// State shared by a run and all of its nested sub-runs.
pub(crate) struct RunContext<'a> {
    pub(crate) library: &'a Library,
    pub(crate) config: &'a EngineConfig,
    pub(crate) clock: Clock,
    pub(crate) specializations: &'a mut [Box<dyn Specialization>],
}

/// One run of one graph.
pub(crate) struct Run<'g> {
    pub(crate) graph: &'g Graph,
    pub(crate) actor: String,
    pub(crate) depth: usize,
    pub(crate) round: usize,
    pub(crate) pool: TokenPool,
    pub(crate) execution: ActivityExecution,
    pub(crate) node_outputs: NodeOutputs,
    began: bool,
    /// Node failures recorded instead of raised, in permissive mode.
    absorbed: usize,
}

#[instrument(skip(ctx, graph, parameter_values, node_outputs), fields(graph = %graph.id))]
pub(crate) fn run_graph(
    ctx: &mut RunContext<'_>,
    graph: &Graph,
    actor: &str,
    parameter_values: Vec<ParameterValue>,
    node_outputs: NodeOutputs,
    depth: usize,
) -> Result<ActivityExecution, ExecutionFailure> {
    let start = ctx.clock.now();
    let mut run = Run {
        graph,
        actor: actor.to_string(),
        depth,
        round: 0,
        pool: TokenPool::new(),
        execution: ActivityExecution::new(graph.id.clone(), actor, start),
        node_outputs,
        began: false,
        absorbed: 0,
    };
    info!(run = %run.execution.id, "run started");

    let result = run.drive(ctx, parameter_values);
    run.finish(ctx, result)
}

impl Run<'_> {
    fn drive(
        &mut self,
        ctx: &mut RunContext<'_>,
        parameter_values: Vec<ParameterValue>,
    ) -> Result<(), EngineError> {
        if self.depth > ctx.config.max_depth {
            return Err(StructuralError::NestingTooDeep {
                behavior: self.graph.id.clone(),
                depth: self.depth,
            }
            .into());
        }

        self.began = true;
        let mut issues = Vec::new();
        for specialization in ctx.specializations.iter_mut() {
            if let Err(source) = specialization.on_run_begin(&self.execution) {
                issues.push(guard_specialization(ctx.config, specialization.name(), source)?);
            }
        }
        self.execution.issues.extend(issues);

        if ctx.config.validate {
            let report = validate_graph(self.graph, ctx.library);
            for issue in &report.warnings {
                warn!(graph = %self.graph.id, "{issue}");
            }
            if !report.errors.is_empty() {
                return Err(StructuralError::Invalid {
                    issues: report.errors.iter().map(ToString::to_string).collect(),
                }
                .into());
            }
        }

        self.seed(parameter_values)?;

        loop {
            let mut ready: Vec<(NodeId, Vec<_>)> = Vec::new();
            for node in self.pool.candidates() {
                if let Some(tokens) = enabling_tokens(self.graph, ctx.library, node, &self.pool)? {
                    ready.push((node, tokens));
                }
            }
            if ready.is_empty() {
                break;
            }
            if self.round >= ctx.config.max_rounds {
                return Err(EngineError::RoundLimitExceeded(ctx.config.max_rounds));
            }
            debug!(round = self.round, enabled = ready.len(), "round");

            let mut produced = Vec::new();
            for (node, ids) in ready {
                let consumed = self.pool.take(&ids);
                match self.fire(ctx, node, consumed) {
                    Ok((record, tokens)) => {
                        let id = record.id;
                        self.execution.executions.push(record);
                        self.dispatch(ctx, id)?;
                        produced.extend(tokens);
                    }
                    Err(error) if ctx.config.permissive => {
                        warn!(graph = %self.graph.id, %node, %error, "node failed (permissive)");
                        self.execution.issues.push(format!("{node}: {error}"));
                        self.absorbed += 1;
                    }
                    Err(error) => return Err(error),
                }
            }
            for token in produced {
                self.pool.place(token)?;
            }
            self.round += 1;
        }
        Ok(())
    }

    /// Start tokens for the initial node and bound input parameters.
    fn seed(&mut self, parameter_values: Vec<ParameterValue>) -> Result<(), EngineError> {
        let graph = self.graph;
        for pv in &parameter_values {
            if !graph.parameter(&pv.parameter).is_some_and(|p| p.is_input()) {
                return Err(BindingError::UnknownParameter {
                    graph: graph.id.clone(),
                    parameter: pv.parameter.clone(),
                }
                .into());
            }
        }
        let supplied: ParameterValueMap = parameter_values.into_iter().collect();

        let mut bound: BTreeMap<&str, Value> = BTreeMap::new();
        for parameter in graph.parameters.iter().filter(|p| p.is_input()) {
            let value = match (supplied.as_value(&parameter.name), &parameter.default) {
                (Some(value), _) => value,
                (None, Some(default)) => default.clone(),
                (None, None) if parameter.required => {
                    return Err(BindingError::MissingParameter {
                        graph: graph.id.clone(),
                        parameter: parameter.name.clone(),
                    }
                    .into())
                }
                (None, None) => continue,
            };
            for v in supplied.get_all(&parameter.name) {
                self.execution
                    .parameter_values
                    .push(ParameterValue::new(parameter.name.clone(), v.clone()));
            }
            if !supplied.contains(&parameter.name) {
                self.execution
                    .parameter_values
                    .push(ParameterValue::new(parameter.name.clone(), value.clone()));
            }
            bound.insert(parameter.name.as_str(), value);
        }

        for node in graph.initiating_nodes() {
            let value = match graph.node(node).map(|n| &n.kind) {
                Some(NodeKind::Initial) => TokenValue::Control,
                Some(NodeKind::Parameter(p)) => match bound.get(p.parameter.as_str()) {
                    Some(value) => TokenValue::Object(value.clone()),
                    None => continue,
                },
                _ => continue,
            };
            let token = self.pool.mint(None, node, None, value);
            self.pool.place(token)?;
        }
        Ok(())
    }

    /// Offer record `id` to every specialization.
    fn dispatch(&mut self, ctx: &mut RunContext<'_>, id: RecordId) -> Result<(), EngineError> {
        let mut issues = Vec::new();
        if let Some(record) = self.execution.record(id) {
            for specialization in ctx.specializations.iter_mut() {
                if let Err(source) = specialization.on_node_executed(record, &self.execution) {
                    issues.push(guard_specialization(ctx.config, specialization.name(), source)?);
                }
            }
        }
        if let Some(record) = self.execution.executions.get_mut(id.0) {
            record.issues.extend(issues);
        }
        Ok(())
    }

    fn finish(
        mut self,
        ctx: &mut RunContext<'_>,
        mut result: Result<(), EngineError>,
    ) -> Result<ActivityExecution, ExecutionFailure> {
        let pool = std::mem::take(&mut self.pool);
        let execution = &mut self.execution;
        execution.end_time = Some(ctx.clock.now());
        execution.flows = pool.flows();
        execution.pending = pool.into_pending();
        execution.consumed = aggregate(
            execution
                .executions
                .iter()
                .filter_map(|r| r.call.as_ref())
                .flat_map(|c| c.consumed.iter()),
        );

        let missing: Vec<&str> = self
            .graph
            .required_outputs()
            .filter(|p| !execution.parameter_values.iter().any(|pv| pv.parameter == p.name))
            .map(|p| p.name.as_str())
            .collect();
        execution.completed_normally = result.is_ok() && missing.is_empty() && self.absorbed == 0;
        if result.is_ok() && !missing.is_empty() {
            warn!(graph = %self.graph.id, ?missing, "run ended with unbound outputs");
        }

        if self.began {
            for specialization in ctx.specializations.iter_mut() {
                if let Err(source) = specialization.on_run_end(execution) {
                    match guard_specialization(ctx.config, specialization.name(), source) {
                        Ok(issue) => execution.issues.push(issue),
                        Err(error) => {
                            execution.completed_normally = false;
                            if result.is_ok() {
                                result = Err(error);
                            }
                        }
                    }
                }
            }
        }

        info!(
            run = %self.execution.id,
            actor = %self.actor,
            records = self.execution.executions.len(),
            rounds = self.round,
            complete = self.execution.completed_normally,
            "run finished"
        );
        match result {
            Ok(()) => Ok(self.execution),
            Err(error) => Err(ExecutionFailure {
                error,
                execution: Box::new(self.execution),
            }),
        }
    }
}

/// In failsafe mode turn a specialization failure into an annotation,
/// otherwise into a fatal error.
fn guard_specialization(
    config: &EngineConfig,
    name: &str,
    source: SpecializationError,
) -> Result<String, EngineError> {
    if config.failsafe {
        warn!(specialization = name, error = %source, "specialization failed (failsafe)");
        Ok(format!("{name}: {source}"))
    } else {
        Err(EngineError::Specialization {
            name: name.to_string(),
            source,
        })
    }
}
