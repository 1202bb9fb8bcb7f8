//! Multi-agent harmonizer.
//!
//! Selects `argmax_i (w_i · S_i)` over the agent outputs of one iteration.
//! Selection is fully deterministic: scores within `tie_epsilon` of the
//! maximum are resolved by trust, then by registration order.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::errors::{FusionError, FusionResult};
use crate::domain::models::{AgentOutput, HarmonizerConfig, TrustRegistry};

/// Trust-weighted arbitration between agent outputs.
#[derive(Debug, Clone)]
pub struct Harmonizer {
    config: HarmonizerConfig,
    registry: Arc<TrustRegistry>,
}

impl Harmonizer {
    pub const fn new(config: HarmonizerConfig, registry: Arc<TrustRegistry>) -> Self {
        Self { config, registry }
    }

    pub const fn config(&self) -> &HarmonizerConfig {
        &self.config
    }

    pub fn registry(&self) -> &TrustRegistry {
        &self.registry
    }

    /// Pick the winning output for `iteration`.
    ///
    /// Fails with `NoCandidates` when `candidates` is empty or every entry
    /// carries unusable scores.
    pub fn arbitrate(&self, iteration: u64, candidates: &[AgentOutput]) -> FusionResult<AgentOutput> {
        let mut pool = self.usable(candidates);
        let winner = self
            .select(&mut pool)
            .ok_or(FusionError::NoCandidates { iteration })?;
        debug!(
            iteration,
            agent_id = %winner.agent_id,
            weighted_score = winner.weighted_score(),
            candidates = candidates.len(),
            "Harmonizer selected candidate"
        );
        Ok(winner)
    }

    /// Order every usable candidate by repeated selection. The first entry is
    /// what [`arbitrate`](Self::arbitrate) returns.
    pub fn rank(&self, iteration: u64, candidates: &[AgentOutput]) -> FusionResult<Vec<AgentOutput>> {
        let mut pool = self.usable(candidates);
        let mut ranked = Vec::with_capacity(pool.len());
        while let Some(next) = self.select(&mut pool) {
            ranked.push(next);
        }
        if ranked.is_empty() {
            return Err(FusionError::NoCandidates { iteration });
        }
        Ok(ranked)
    }

    fn usable(&self, candidates: &[AgentOutput]) -> Vec<AgentOutput> {
        candidates
            .iter()
            .filter(|candidate| {
                let ok = candidate.has_valid_scores() && candidate.weighted_score().is_finite();
                if !ok {
                    warn!(
                        agent_id = %candidate.agent_id,
                        trust_score = candidate.trust_score,
                        coherence_score = candidate.coherence_score,
                        "Discarding candidate with invalid scores"
                    );
                }
                ok
            })
            .cloned()
            .collect()
    }

    /// Remove and return the best candidate in `pool`.
    fn select(&self, pool: &mut Vec<AgentOutput>) -> Option<AgentOutput> {
        let max = pool
            .iter()
            .map(AgentOutput::weighted_score)
            .max_by(f64::total_cmp)?;
        let band = max - self.config.tie_epsilon;

        let position = pool
            .iter()
            .enumerate()
            .filter(|(_, candidate)| candidate.weighted_score() >= band)
            .min_by(|(_, a), (_, b)| self.tie_break(a, b))
            .map(|(position, _)| position)?;
        Some(pool.remove(position))
    }

    /// `Less` means `a` is preferred.
    fn tie_break(&self, a: &AgentOutput, b: &AgentOutput) -> Ordering {
        b.trust_score
            .total_cmp(&a.trust_score)
            .then_with(|| {
                let order = |o: &AgentOutput| {
                    self.registry
                        .registration_order(&o.agent_id)
                        .unwrap_or(usize::MAX)
                };
                order(a).cmp(&order(b))
            })
            .then_with(|| a.agent_id.cmp(&b.agent_id))
    }
}
