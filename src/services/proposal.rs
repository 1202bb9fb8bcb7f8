//! Candidate deltas, symbolic coherence and the update function.
//!
//! The controller derives its own candidate delta from the affinity graph
//! each iteration. Agents see that candidate; their proposals are scored for
//! coherence against it and against the lattice.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::models::{
    AffinityGraph, ConstraintLattice, EntityId, EntityKind, NodeId, NodeValue, Predicate,
    StateVector, Transition, Truth,
};

/// Derives candidate deltas by evaluating node predicates over the graph.
#[derive(Debug, Clone, Copy)]
pub struct CandidateProposer {
    assert_threshold: f64,
}

impl CandidateProposer {
    pub const fn new(assert_threshold: f64) -> Self {
        Self { assert_threshold }
    }

    /// Evaluate every node in topological order against the overlay being
    /// built.
    ///
    /// Evidence at or above the assert threshold targets `true` with that
    /// confidence, below it `false` with `1 - evidence`. Nodes without
    /// evidence are left out. A node whose predecessor does not hold is
    /// reset to `unknown` if currently asserted. When two exclusive nodes
    /// would both hold, the weaker one (larger id on a tie) is refuted and the
    /// pass restarts with that decision pinned.
    pub fn candidate_delta(
        &self,
        lattice: &ConstraintLattice,
        graph: &AffinityGraph,
        state: &StateVector,
    ) -> Transition {
        let mut pinned: BTreeMap<NodeId, NodeValue> = BTreeMap::new();
        loop {
            match self.evaluate_pass(lattice, graph, state, &pinned) {
                Ok(delta) => return delta,
                Err((loser, value)) => {
                    if pinned.insert(loser, value).is_some() {
                        // A pinned node cannot lose again; bail out with what
                        // the last pass would produce without further pins.
                        return self
                            .evaluate_pass(lattice, graph, state, &pinned)
                            .unwrap_or_default();
                    }
                }
            }
        }
    }

    fn evaluate_pass(
        &self,
        lattice: &ConstraintLattice,
        graph: &AffinityGraph,
        state: &StateVector,
        pinned: &BTreeMap<NodeId, NodeValue>,
    ) -> Result<Transition, (NodeId, NodeValue)> {
        let mut delta = Transition::new();
        let mut strength: BTreeMap<&NodeId, f64> = BTreeMap::new();

        for node_id in lattice.topological_order() {
            let Some(node) = lattice.node(node_id) else {
                continue;
            };
            let current = state.get(node_id).unwrap_or(NodeValue::UNKNOWN);

            let predecessors_hold = node
                .requires
                .iter()
                .all(|p| state.overlay(&delta, p).holds());
            if !predecessors_hold {
                if current.holds() {
                    delta.insert(node_id.clone(), NodeValue::UNKNOWN);
                }
                continue;
            }

            if let Some(value) = pinned.get(node_id) {
                delta.insert(node_id.clone(), *value);
                continue;
            }

            let evidence = match &node.predicate {
                Predicate::Derived => derived_evidence(lattice, state, &delta, node_id),
                predicate => predicate_evidence(predicate, graph),
            };
            let Some(evidence) = evidence else {
                continue;
            };
            let evidence = evidence.clamp(0.0, 1.0);

            if evidence < self.assert_threshold {
                delta.insert(node_id.clone(), NodeValue::refuted(1.0 - evidence));
                continue;
            }

            for rival in lattice.exclusions(node_id) {
                let rival_value = state.overlay(&delta, rival);
                if !rival_value.holds() {
                    continue;
                }
                let rival_strength = strength
                    .get(rival)
                    .copied()
                    .unwrap_or(rival_value.confidence);
                let wins = evidence > rival_strength
                    || (evidence == rival_strength && node_id < rival);
                return Err(if wins {
                    (rival.clone(), NodeValue::refuted(1.0 - rival_strength))
                } else {
                    (node_id.clone(), NodeValue::refuted(1.0 - evidence))
                });
            }

            strength.insert(node_id, evidence);
            delta.insert(node_id.clone(), NodeValue::asserted(evidence));
        }

        Ok(delta)
    }
}

/// Evidence for an entity-backed predicate; `None` for `derived`.
pub fn predicate_evidence(predicate: &Predicate, graph: &AffinityGraph) -> Option<f64> {
    match predicate {
        Predicate::EntityPresent {
            label,
            kind,
            min_confidence,
        } => graph
            .with_label(label, None)
            .filter(|e| kind.is_none_or(|k| e.kind() == k))
            .filter(|e| e.confidence() >= *min_confidence)
            .map(|e| e.confidence())
            .max_by(f64::total_cmp),
        Predicate::MeasurementAbove {
            label,
            threshold_mm3,
        } => {
            let measured: Vec<(f64, f64)> = graph
                .with_label(label, None)
                .filter(|e| e.kind() == EntityKind::Measurement)
                .filter_map(|e| e.payload().volume_mm3().map(|v| (v, e.confidence())))
                .collect();
            if measured.is_empty() {
                return None;
            }
            Some(
                measured
                    .iter()
                    .filter(|(volume, _)| volume > threshold_mm3)
                    .map(|(_, confidence)| *confidence)
                    .max_by(f64::total_cmp)
                    .unwrap_or(0.0),
            )
        }
        Predicate::Corroborated { label, modalities } => {
            let groups: Vec<Vec<&EntityId>> = modalities
                .iter()
                .map(|m| graph.with_label(label, Some(*m)).map(|e| e.id()).collect())
                .collect();
            if groups.iter().any(Vec::is_empty) {
                return None;
            }
            let mut links = Vec::new();
            for (i, left) in groups.iter().enumerate() {
                for right in &groups[i + 1..] {
                    match graph.strongest_link(left, right) {
                        Some(weight) => links.push(weight),
                        None => return Some(0.0),
                    }
                }
            }
            if links.is_empty() {
                return None;
            }
            #[allow(clippy::cast_precision_loss)]
            let count = links.len() as f64;
            Some(links.iter().sum::<f64>() / count)
        }
        Predicate::Derived => None,
    }
}

fn derived_evidence(
    lattice: &ConstraintLattice,
    state: &StateVector,
    delta: &Transition,
    node: &NodeId,
) -> Option<f64> {
    lattice
        .predecessors(node)
        .iter()
        .map(|p| state.overlay(delta, p))
        .map(|v| v.holds().then_some(v.confidence))
        .try_fold(None::<f64>, |acc, c| {
            c.map(|c| Some(acc.map_or(c, |a: f64| a.min(c))))
        })
        .flatten()
}

/// Symbolic coherence of an agent delta: `admissible_ratio × agreement`.
///
/// `admissible_ratio = 1 - violations / |delta|`; `agreement` averages
/// `1 - |signed(v) - signed(candidate)| / 2` over the delta, counting 0.5 for
/// nodes the candidate leaves out. An empty delta scores 1.
pub fn coherence_score(
    lattice: &ConstraintLattice,
    state: &StateVector,
    candidate: &Transition,
    delta: &Transition,
) -> f64 {
    if delta.is_empty() {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let size = delta.len() as f64;
    #[allow(clippy::cast_precision_loss)]
    let violations = lattice.violations(state, delta).len() as f64;
    let admissible_ratio = (1.0 - violations / size).max(0.0);

    let agreement = delta
        .iter()
        .map(|(node, value)| {
            candidate.get(node).map_or(0.5, |target| {
                1.0 - (value.signed() - target.signed()).abs() / 2.0
            })
        })
        .sum::<f64>()
        / size;

    (admissible_ratio * agreement).clamp(0.0, 1.0)
}

/// Update function applied to the arbitrated delta.
///
/// A changed truth value takes the target as is; an unchanged one relaxes
/// its confidence `c' = c + α (c_target - c)`.
pub fn relax(state: &StateVector, delta: &Transition, alpha: f64) -> Transition {
    delta
        .iter()
        .map(|(node, target)| {
            let current = state.get(node).unwrap_or(NodeValue::UNKNOWN);
            let value = if current.truth == target.truth && target.truth != Truth::Unknown {
                NodeValue {
                    truth: target.truth,
                    confidence: alpha
                        .mul_add(target.confidence - current.confidence, current.confidence)
                        .clamp(0.0, 1.0),
                }
            } else {
                *target
            };
            (node.clone(), value)
        })
        .collect()
}

/// Active entities whose labels feed the predicates of `nodes` (or of their
/// ancestors, for derived nodes).
pub fn supporting_entities<'a, I>(
    lattice: &ConstraintLattice,
    graph: &AffinityGraph,
    nodes: I,
) -> BTreeSet<EntityId>
where
    I: IntoIterator<Item = &'a NodeId>,
{
    let mut support = BTreeSet::new();
    for node_id in nodes {
        let mut related = lattice.ancestors(node_id);
        related.insert(node_id.clone());
        for id in &related {
            let label = match lattice.node(id).map(|n| &n.predicate) {
                Some(
                    Predicate::EntityPresent { label, .. }
                    | Predicate::MeasurementAbove { label, .. }
                    | Predicate::Corroborated { label, .. },
                ) => label,
                Some(Predicate::Derived) | None => continue,
            };
            support.extend(graph.with_label(label, None).map(|e| e.id().clone()));
        }
    }
    support
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        AffinityEdge, ConstraintNode, DiagnosticEntity, EdgeKind, EntityPayload,
        EntitySubmission, Geometry, LatticeDefinition, Modality, Severity, TextSpan,
    };

    fn present(label: &str) -> Predicate {
        Predicate::EntityPresent {
            label: label.to_string(),
            kind: None,
            min_confidence: 0.0,
        }
    }

    fn measurement(label: &str, volume: f64, confidence: f64) -> DiagnosticEntity {
        EntitySubmission::new(
            Modality::Segmentation,
            EntityPayload::Measurement {
                label: label.to_string(),
                geometry: Geometry::at([0.0, 0.0, 0.0]),
                volume_mm3: Some(volume),
            },
            confidence,
        )
        .seal()
    }

    fn finding(label: &str, confidence: f64) -> DiagnosticEntity {
        EntitySubmission::new(
            Modality::Imaging,
            EntityPayload::Finding {
                label: label.to_string(),
                severity: Severity::High,
                region: None,
            },
            confidence,
        )
        .seal()
    }

    fn note(label: &str, confidence: f64) -> DiagnosticEntity {
        EntitySubmission::new(
            Modality::ClinicalText,
            EntityPayload::TextEntity {
                label: label.to_string(),
                span: TextSpan {
                    start: 0,
                    end: 4,
                    text: label.to_string(),
                },
            },
            confidence,
        )
        .seal()
    }

    fn lattice() -> ConstraintLattice {
        ConstraintLattice::new(LatticeDefinition {
            nodes: vec![
                ConstraintNode::new("lesion", present("lesion")),
                ConstraintNode::new(
                    "large_lesion",
                    Predicate::MeasurementAbove {
                        label: "lesion".to_string(),
                        threshold_mm3: 500.0,
                    },
                )
                .requires(["lesion"]),
                ConstraintNode::new("refer", Predicate::Derived).requires(["large_lesion"]),
                ConstraintNode::new("benign", present("cyst")).excludes(["malignant"]),
                ConstraintNode::new("malignant", present("mass")).requires(["lesion"]),
            ],
        })
        .unwrap()
    }

    #[test]
    fn test_candidate_follows_evidence_in_order() {
        let lattice = lattice();
        let graph = AffinityGraph::from_parts(vec![measurement("lesion", 900.0, 0.8)], vec![]);
        let state = StateVector::initial(&lattice);

        let delta = CandidateProposer::new(0.5).candidate_delta(&lattice, &graph, &state);
        assert_eq!(delta.get(&"lesion".into()), Some(&NodeValue::asserted(0.8)));
        assert_eq!(delta.get(&"large_lesion".into()), Some(&NodeValue::asserted(0.8)));
        assert_eq!(delta.get(&"refer".into()), Some(&NodeValue::asserted(0.8)));
        assert!(!delta.contains(&"benign".into()));
        assert!(lattice.validate(&state, &delta).is_admissible());
    }

    #[test]
    fn test_measurement_below_threshold_refutes() {
        let lattice = lattice();
        let graph = AffinityGraph::from_parts(vec![measurement("lesion", 100.0, 0.8)], vec![]);
        let state = StateVector::initial(&lattice);
        let delta = CandidateProposer::new(0.5).candidate_delta(&lattice, &graph, &state);
        assert_eq!(delta.get(&"large_lesion".into()), Some(&NodeValue::refuted(1.0)));
        assert!(!delta.contains(&"refer".into()));
    }

    #[test]
    fn test_exclusive_pair_keeps_stronger() {
        let lattice = lattice();
        let graph = AffinityGraph::from_parts(
            vec![
                measurement("lesion", 10.0, 0.9),
                finding("cyst", 0.6),
                finding("mass", 0.7),
            ],
            vec![],
        );
        let state = StateVector::initial(&lattice);
        let delta = CandidateProposer::new(0.5).candidate_delta(&lattice, &graph, &state);
        assert!(delta.get(&"malignant".into()).unwrap().holds());
        assert_eq!(delta.get(&"benign".into()).unwrap().truth, Truth::False);
        assert!(lattice.validate(&state, &delta).is_admissible());
    }

    #[test]
    fn test_lost_predecessor_resets_dependents() {
        let lattice = lattice();
        let state = StateVector::initial(&lattice).with_transition(
            &Transition::new()
                .with("lesion", NodeValue::asserted(0.9))
                .with("large_lesion", NodeValue::asserted(0.9))
                .with("refer", NodeValue::asserted(0.9)),
        );
        let graph = AffinityGraph::from_parts(vec![measurement("lesion", 900.0, 0.2)], vec![]);
        let delta = CandidateProposer::new(0.5).candidate_delta(&lattice, &graph, &state);
        assert_eq!(delta.get(&"lesion".into()).unwrap().truth, Truth::False);
        assert_eq!(delta.get(&"large_lesion".into()), Some(&NodeValue::UNKNOWN));
        assert_eq!(delta.get(&"refer".into()), Some(&NodeValue::UNKNOWN));
        assert!(lattice.validate(&state, &delta).is_admissible());
    }

    #[test]
    fn test_corroborated_evidence() {
        let a = finding("nodule", 0.7);
        let b = note("nodule", 0.9);
        let predicate = Predicate::Corroborated {
            label: "nodule".to_string(),
            modalities: vec![Modality::Imaging, Modality::ClinicalText],
        };

        let unlinked = AffinityGraph::from_parts(vec![a.clone(), b.clone()], vec![]);
        assert_eq!(predicate_evidence(&predicate, &unlinked), Some(0.0));

        let (source, target) = if a.id() < b.id() { (&a, &b) } else { (&b, &a) };
        let linked = AffinityGraph::from_parts(
            vec![a.clone(), b.clone()],
            vec![AffinityEdge {
                source: source.id().clone(),
                target: target.id().clone(),
                kind: EdgeKind::SemanticMatch,
                weight: 0.85,
            }],
        );
        assert_eq!(predicate_evidence(&predicate, &linked), Some(0.85));

        let one_sided = AffinityGraph::from_parts(vec![a], vec![]);
        assert_eq!(predicate_evidence(&predicate, &one_sided), None);
    }

    #[test]
    fn test_coherence_score() {
        let lattice = lattice();
        let state = StateVector::initial(&lattice);
        let candidate = Transition::new().with("lesion", NodeValue::asserted(0.8));

        let agreeing = candidate.clone();
        assert!((coherence_score(&lattice, &state, &candidate, &agreeing) - 1.0).abs() < 1e-12);

        let opposing = Transition::new().with("lesion", NodeValue::refuted(0.8));
        assert!((coherence_score(&lattice, &state, &candidate, &opposing) - 0.2).abs() < 1e-12);

        let inadmissible = Transition::new().with("refer", NodeValue::asserted(0.8));
        assert!(coherence_score(&lattice, &state, &candidate, &inadmissible).abs() < 1e-12);

        assert!((coherence_score(&lattice, &state, &candidate, &Transition::new()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_relax() {
        let lattice = lattice();
        let state = StateVector::initial(&lattice)
            .with_transition(&Transition::new().with("lesion", NodeValue::asserted(0.4)));
        let delta = Transition::new()
            .with("lesion", NodeValue::asserted(0.8))
            .with("benign", NodeValue::refuted(0.6));
        let relaxed = relax(&state, &delta, 0.5);
        let lesion = relaxed.get(&"lesion".into()).unwrap();
        assert!((lesion.confidence - 0.6).abs() < 1e-12);
        assert_eq!(relaxed.get(&"benign".into()), Some(&NodeValue::refuted(0.6)));
    }

    #[test]
    fn test_supporting_entities_follow_ancestors() {
        let lattice = lattice();
        let lesion = measurement("lesion", 900.0, 0.8);
        let cyst = finding("cyst", 0.6);
        let graph = AffinityGraph::from_parts(vec![lesion.clone(), cyst], vec![]);
        let support = supporting_entities(&lattice, &graph, [&NodeId::from("refer")]);
        assert_eq!(support.into_iter().collect::<Vec<_>>(), vec![lesion.id().clone()]);
    }
}
