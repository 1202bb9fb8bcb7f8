//! Convergence controller.
//!
//! Drives one fusion run through synchronous iterations: propose a candidate
//! delta, fan it out to the agents, arbitrate, validate, commit, audit, then
//! evaluate the stopping gates. Iteration `t + 1` never starts before `t` is
//! committed and audited.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::affinity_graph::AffinityGraphBuilder;
use super::audit_chain::{inputs_digest, AuditLogger};
use super::entity_registry::EntityRegistry;
use super::harmonizer::Harmonizer;
use super::proposal::{coherence_score, relax, supporting_entities, CandidateProposer};
use crate::adapters::NullResegmentation;
use crate::domain::errors::{FusionError, FusionResult};
use crate::domain::models::{
    AffinityGraph, AgentId, AgentOutput, Admissibility, Config, ConstraintLattice,
    ConvergenceConfig, ConvergenceGate, EntityId, IterationSummary, RejectedEntity,
    ResegmentationReason, ResegmentationRequest, RunDiagnostics, RunOutcome, RunReport,
    StateVector, Transition, TrustRegistry,
};
use crate::domain::ports::{InferenceAgent, ProposalRequest, ResegmentationHandler};

/// Mutable bookkeeping of one run.
struct RunContext {
    graph: Arc<AffinityGraph>,
    diagnostics: RunDiagnostics,
    iterations: Vec<IterationSummary>,
    resegmentation_requests: Vec<ResegmentationRequest>,
    rejected_entities: Vec<RejectedEntity>,
}

impl RunContext {
    fn record_rejections(&mut self, rejected: impl IntoIterator<Item = RejectedEntity>) {
        for entity in rejected {
            if !self.rejected_entities.contains(&entity) {
                self.rejected_entities.push(entity);
            }
        }
        self.diagnostics.malformed_entities = self.rejected_entities.len() as u64;
    }
}

/// What one committed iteration produced.
struct Committed {
    state: StateVector,
    changed: Transition,
    weighted_score: f64,
}

/// Runs the fusion loop for one session.
pub struct ConvergenceController {
    config: ConvergenceConfig,
    harmonizer: Harmonizer,
    proposer: CandidateProposer,
    builder: AffinityGraphBuilder,
    lattice: Arc<ConstraintLattice>,
    agents: Vec<Arc<dyn InferenceAgent>>,
    agent_timeout: Duration,
    resegmentation: Arc<dyn ResegmentationHandler>,
    audit: Arc<AuditLogger>,
}

impl ConvergenceController {
    pub fn new(config: &Config, lattice: Arc<ConstraintLattice>, registry: Arc<TrustRegistry>) -> Self {
        Self {
            config: config.convergence.clone(),
            harmonizer: Harmonizer::new(config.harmonizer.clone(), registry),
            proposer: CandidateProposer::new(config.convergence.assert_threshold),
            builder: AffinityGraphBuilder::new(config.affinity.clone()),
            lattice,
            agents: Vec::new(),
            agent_timeout: Duration::from_millis(config.agents.timeout_ms),
            resegmentation: Arc::new(NullResegmentation),
            audit: Arc::new(AuditLogger::new()),
        }
    }

    #[must_use]
    pub fn with_agent(mut self, agent: Arc<dyn InferenceAgent>) -> Self {
        self.agents.push(agent);
        self
    }

    #[must_use]
    pub fn with_agents<I>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn InferenceAgent>>,
    {
        self.agents.extend(agents);
        self
    }

    #[must_use]
    pub fn with_resegmentation(mut self, handler: Arc<dyn ResegmentationHandler>) -> Self {
        self.resegmentation = handler;
        self
    }

    #[must_use]
    pub fn with_audit_logger(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn audit_logger(&self) -> Arc<AuditLogger> {
        Arc::clone(&self.audit)
    }

    pub fn lattice(&self) -> &ConstraintLattice {
        &self.lattice
    }

    /// Run to convergence, timeout or cancellation.
    ///
    /// `ConvergenceTimeout` is reported in the returned [`RunReport`], not as
    /// an error. Errors are the fatal conditions: exhausted resegmentation
    /// retries, every candidate rejected, audit chain corruption.
    pub async fn run(
        &self,
        registry: &mut EntityRegistry,
        cancel: CancellationToken,
    ) -> FusionResult<RunReport> {
        let run_id = Uuid::new_v4();
        let (graph, rejected) = self.builder.build_lenient(registry.active_entities());
        let mut ctx = RunContext {
            graph: Arc::new(graph),
            diagnostics: RunDiagnostics::default(),
            iterations: Vec::new(),
            resegmentation_requests: Vec::new(),
            rejected_entities: Vec::new(),
        };
        ctx.record_rejections(registry.rejected().iter().cloned());
        ctx.record_rejections(rejected);

        info!(
            %run_id,
            entities = ctx.graph.len(),
            edges = ctx.graph.edge_count(),
            nodes = self.lattice.len(),
            agents = self.agents.len(),
            "Starting fusion run"
        );

        let mut state = StateVector::initial(&self.lattice);
        self.audit.append(&state, &registry.snapshot_digest()?).await?;

        let mut outcome = RunOutcome::ConvergenceTimeout {
            iterations: self.config.max_iterations,
        };
        while state.iteration() < self.config.max_iterations {
            if cancel.is_cancelled() {
                info!(%run_id, iteration = state.iteration(), "Run cancelled between iterations");
                outcome = RunOutcome::Cancelled {
                    iterations: state.iteration(),
                };
                break;
            }

            let iteration = state.iteration() + 1;
            let committed = self
                .iterate(&state, registry, &mut ctx)
                .instrument(info_span!("fusion_iteration", iteration))
                .await?;

            let norm = committed.state.distance(&state);
            let entropy_delta = (committed.state.entropy() - state.entropy()).abs();
            let truths_settled = committed.state.same_truths(&state);
            if let Some(summary) = ctx.iterations.last_mut() {
                summary.norm = norm;
                summary.entropy_delta = entropy_delta;
            }
            info!(
                iteration,
                agent = ctx
                    .iterations
                    .last()
                    .and_then(|s| s.selected_agent.as_ref())
                    .map_or("controller", AgentId::as_str),
                norm,
                entropy_delta,
                "Committed iteration"
            );

            if committed.weighted_score < self.harmonizer.config().resegmentation_floor {
                self.request_low_confidence_resegmentation(iteration, &committed, registry, &mut ctx)
                    .await;
            }
            state = committed.state;

            let norm_gate = norm < self.config.norm_epsilon;
            let entropy_gate = self.config.entropy_gamma > 0.0
                && truths_settled
                && entropy_delta < self.config.entropy_gamma;
            if let Some(gate) = ConvergenceGate::from_flags(norm_gate, entropy_gate) {
                info!(%run_id, iteration, gate = gate.as_str(), "Run converged");
                outcome = RunOutcome::Converged {
                    gate,
                    iterations: iteration,
                };
                break;
            }
        }

        if matches!(outcome, RunOutcome::ConvergenceTimeout { .. }) {
            warn!(
                %run_id,
                max_iterations = self.config.max_iterations,
                "Iteration ceiling reached without convergence"
            );
        }

        Ok(RunReport {
            run_id,
            outcome,
            final_state: state.freeze(),
            audit_chain: self.audit.records().await,
            iterations: ctx.iterations,
            diagnostics: ctx.diagnostics,
            resegmentation_requests: ctx.resegmentation_requests,
            rejected_entities: ctx.rejected_entities,
        })
    }

    /// One iteration, including `NoCandidates` resegmentation retries.
    async fn iterate(
        &self,
        state: &StateVector,
        registry: &mut EntityRegistry,
        ctx: &mut RunContext,
    ) -> FusionResult<Committed> {
        let iteration = state.iteration() + 1;
        let mut retries = 0_u32;

        loop {
            let candidate = self
                .proposer
                .candidate_delta(&self.lattice, &ctx.graph, state);
            let request = Arc::new(ProposalRequest {
                iteration,
                state: state.clone(),
                candidate: candidate.clone(),
                graph: Arc::clone(&ctx.graph),
                lattice: Arc::clone(&self.lattice),
            });
            let outputs = self.collect_outputs(&request, &mut ctx.diagnostics).await;

            let ranked = match self.harmonizer.rank(iteration, &outputs) {
                Ok(ranked) => ranked,
                Err(FusionError::NoCandidates { .. })
                    if retries < self.harmonizer.config().max_resegmentation_retries =>
                {
                    retries += 1;
                    ctx.diagnostics.resegmentation_retries += 1;
                    warn!(iteration, retries, "No candidates; requesting resegmentation");
                    let mut targets = supporting_entities(&self.lattice, &ctx.graph, candidate.nodes());
                    if targets.is_empty() {
                        targets = ctx.graph.entities().iter().map(|e| e.id().clone()).collect();
                    }
                    self.resegment(
                        iteration,
                        targets,
                        ResegmentationReason::NoCandidates,
                        registry,
                        ctx,
                    )
                    .await;
                    continue;
                }
                Err(err) => return Err(err),
            };

            return self
                .commit(state, &candidate, &outputs, &ranked, ctx)
                .await;
        }
    }

    /// Apply the first admissible proposal: ranked agents, then the
    /// controller's own candidate.
    async fn commit(
        &self,
        state: &StateVector,
        candidate: &Transition,
        outputs: &[AgentOutput],
        ranked: &[AgentOutput],
        ctx: &mut RunContext,
    ) -> FusionResult<Committed> {
        let iteration = state.iteration() + 1;
        let weighted_score = ranked.first().map_or(0.0, AgentOutput::weighted_score);

        let proposals = ranked
            .iter()
            .map(|output| (Some(&output.agent_id), &output.delta))
            .chain(std::iter::once((None, candidate)));

        let mut last_rejection = None;
        let mut rejected_candidates = 0;
        for (agent_id, delta) in proposals {
            let relaxed = relax(state, delta, self.config.relaxation);
            match self.lattice.validate(state, &relaxed) {
                Admissibility::Admissible => {
                    let next = state.with_transition(&relaxed);
                    self.audit
                        .append(&next, &inputs_digest(outputs, agent_id)?)
                        .await?;
                    ctx.iterations.push(IterationSummary {
                        iteration,
                        selected_agent: agent_id.cloned(),
                        weighted_score,
                        candidates: outputs.len(),
                        rejected_candidates,
                        changed_nodes: relaxed.len(),
                        norm: 0.0,
                        entropy_delta: 0.0,
                    });
                    return Ok(Committed {
                        state: next,
                        changed: relaxed,
                        weighted_score,
                    });
                }
                Admissibility::Rejected { reason } => {
                    ctx.diagnostics.constraint_rejections += 1;
                    rejected_candidates += 1;
                    warn!(
                        iteration,
                        agent = agent_id.map_or("controller", AgentId::as_str),
                        reason = %reason,
                        "Transition rejected by constraint lattice"
                    );
                    last_rejection = Some(reason);
                }
            }
        }

        Err(match last_rejection {
            Some(reason) => FusionError::ConstraintRejected(reason),
            None => FusionError::NoCandidates { iteration },
        })
    }

    /// Fan the request out to every agent concurrently. Each call runs under
    /// the agent timeout; failures are dropped and counted.
    async fn collect_outputs(
        &self,
        request: &Arc<ProposalRequest>,
        diagnostics: &mut RunDiagnostics,
    ) -> Vec<AgentOutput> {
        let limit = self.agent_timeout;
        let calls = self.agents.iter().map(|agent| {
            let agent = Arc::clone(agent);
            let request = Arc::clone(request);
            tokio::spawn(async move {
                let result = timeout(limit, agent.propose(&request)).await;
                (agent.id().clone(), result)
            })
        });

        let mut outputs = Vec::new();
        for joined in join_all(calls).await {
            let (agent_id, result) = match joined {
                Ok(pair) => pair,
                Err(err) => {
                    diagnostics.agent_failures += 1;
                    warn!(error = %err, "Agent task aborted");
                    continue;
                }
            };
            let delta = match result {
                Ok(Ok(delta)) => delta,
                Ok(Err(err)) => {
                    diagnostics.agent_failures += 1;
                    warn!(agent_id = %agent_id, error = %err, "Agent proposal failed");
                    continue;
                }
                Err(_) => {
                    diagnostics.agent_timeouts += 1;
                    let err = FusionError::AgentTimeout {
                        agent_id,
                        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    };
                    warn!(error = %err, "Dropping agent proposal");
                    continue;
                }
            };

            let Some(trust) = self.harmonizer.registry().trust(&agent_id) else {
                diagnostics.unregistered_outputs += 1;
                warn!(agent_id = %agent_id, "Dropping output from unregistered agent");
                continue;
            };
            if delta.iter().any(|(_, value)| !value.is_well_formed()) {
                diagnostics.invalid_outputs += 1;
                warn!(agent_id = %agent_id, "Dropping output with out-of-range confidence");
                continue;
            }

            let coherence = coherence_score(&self.lattice, &request.state, &request.candidate, &delta);
            outputs.push(AgentOutput {
                agent_id,
                trust_score: trust,
                coherence_score: coherence,
                delta,
            });
        }
        outputs
    }

    async fn request_low_confidence_resegmentation(
        &self,
        iteration: u64,
        committed: &Committed,
        registry: &mut EntityRegistry,
        ctx: &mut RunContext,
    ) {
        let targets = supporting_entities(&self.lattice, &ctx.graph, committed.changed.nodes());
        if targets.is_empty() {
            return;
        }
        ctx.diagnostics.low_confidence_resegmentations += 1;
        let floor = self.harmonizer.config().resegmentation_floor;
        warn!(
            iteration,
            score = committed.weighted_score,
            floor,
            entities = targets.len(),
            "Harmonization confidence below floor; requesting resegmentation"
        );
        self.resegment(
            iteration,
            targets,
            ResegmentationReason::LowConfidence {
                score: committed.weighted_score,
                floor,
            },
            registry,
            ctx,
        )
        .await;
    }

    /// Emit requests, ingest returned revisions and rebuild the graph.
    async fn resegment(
        &self,
        iteration: u64,
        targets: impl IntoIterator<Item = EntityId>,
        reason: ResegmentationReason,
        registry: &mut EntityRegistry,
        ctx: &mut RunContext,
    ) {
        let requests: Vec<ResegmentationRequest> = targets
            .into_iter()
            .map(|entity_id| ResegmentationRequest {
                entity_id,
                iteration,
                reason: reason.clone(),
            })
            .collect();
        ctx.resegmentation_requests.extend(requests.iter().cloned());

        let revisions = match timeout(self.agent_timeout, self.resegmentation.resegment(&requests)).await {
            Ok(Ok(revisions)) => revisions,
            Ok(Err(err)) => {
                ctx.diagnostics.agent_failures += 1;
                warn!(iteration, error = %err, "Resegmentation failed");
                return;
            }
            Err(_) => {
                ctx.diagnostics.agent_timeouts += 1;
                warn!(iteration, "Resegmentation timed out");
                return;
            }
        };
        if revisions.is_empty() {
            return;
        }

        let report = registry.ingest(revisions);
        let (graph, rejected) = self.builder.build_lenient(registry.active_entities());
        ctx.record_rejections(report.rejected);
        ctx.record_rejections(rejected);
        info!(
            iteration,
            revisions = report.accepted.len(),
            entities = graph.len(),
            edges = graph.edge_count(),
            "Rebuilt affinity graph after resegmentation"
        );
        ctx.graph = Arc::new(graph);
    }
}
