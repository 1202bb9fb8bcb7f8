//! Harmonizer arbitration scenarios and determinism properties.

use std::sync::Arc;

use msk_fusion::domain::models::{
    AgentOutput, AgentRegistration, HarmonizerConfig, NodeValue, Transition, TrustRegistry,
};
use msk_fusion::services::Harmonizer;
use msk_fusion::FusionError;
use proptest::prelude::*;

const AGENTS: [&str; 5] = ["radiology", "nlp", "segmentation", "pathology", "vqa"];

fn harmonizer(trust: &[f64]) -> Harmonizer {
    let registrations = AGENTS
        .iter()
        .zip(trust)
        .map(|(id, trust)| AgentRegistration::new(*id, *trust))
        .collect();
    Harmonizer::new(
        HarmonizerConfig::default(),
        Arc::new(TrustRegistry::new(registrations).unwrap()),
    )
}

fn output(agent: &str, trust: f64, coherence: f64) -> AgentOutput {
    AgentOutput::new(
        agent,
        trust,
        coherence,
        Transition::new().with("lesion", NodeValue::asserted(coherence)),
    )
}

#[test]
fn test_trust_weighting_beats_raw_coherence() {
    // 0.9 * 0.7 = 0.63 beats 0.6 * 0.95 = 0.57
    let harmonizer = harmonizer(&[0.9, 0.6]);
    let winner = harmonizer
        .arbitrate(
            1,
            &[output("nlp", 0.6, 0.95), output("radiology", 0.9, 0.7)],
        )
        .unwrap();
    assert_eq!(winner.agent_id.as_str(), "radiology");
}

#[test]
fn test_exact_tie_prefers_earlier_registration() {
    let harmonizer = harmonizer(&[0.8, 0.8, 0.8]);
    let outputs = [
        output("segmentation", 0.8, 0.5),
        output("nlp", 0.8, 0.5),
        output("radiology", 0.8, 0.5),
    ];
    let ranked = harmonizer.rank(4, &outputs).unwrap();
    let ids: Vec<&str> = ranked.iter().map(|o| o.agent_id.as_str()).collect();
    assert_eq!(ids, vec!["radiology", "nlp", "segmentation"]);
}

#[test]
fn test_every_invalid_output_means_no_candidates() {
    let harmonizer = harmonizer(&[0.8, 0.6]);
    let err = harmonizer
        .arbitrate(
            7,
            &[output("radiology", 0.8, f64::NAN), output("nlp", 1.4, 0.5)],
        )
        .unwrap_err();
    assert!(matches!(err, FusionError::NoCandidates { iteration: 7 }));
}

fn outputs_strategy() -> impl Strategy<Value = (Vec<f64>, Vec<AgentOutput>)> {
    prop::collection::vec(0.0f64..=1.0, AGENTS.len()).prop_flat_map(|trust| {
        let coherence = prop::collection::vec(prop_oneof![Just(0.5), 0.0f64..=1.0], AGENTS.len());
        (Just(trust), coherence).prop_map(|(trust, coherence)| {
            let outputs = AGENTS
                .iter()
                .zip(trust.iter().zip(&coherence))
                .map(|(id, (w, s))| output(id, *w, *s))
                .collect();
            (trust, outputs)
        })
    })
}

proptest! {
    /// The winner does not depend on the order outputs arrive in.
    #[test]
    fn prop_arbitration_ignores_arrival_order(
        (trust, outputs) in outputs_strategy(),
        seed in any::<u64>(),
    ) {
        let harmonizer = harmonizer(&trust);
        let baseline = harmonizer.arbitrate(1, &outputs).unwrap();

        let mut shuffled = outputs.clone();
        let len = shuffled.len();
        shuffled.rotate_left(usize::try_from(seed % len as u64).unwrap());
        shuffled.reverse();

        let again = harmonizer.arbitrate(1, &shuffled).unwrap();
        prop_assert_eq!(baseline.agent_id, again.agent_id);
    }

    /// The winner's weighted score is within the tie band of the maximum.
    #[test]
    fn prop_winner_is_maximal((trust, outputs) in outputs_strategy()) {
        let harmonizer = harmonizer(&trust);
        let winner = harmonizer.arbitrate(1, &outputs).unwrap();
        let max = outputs
            .iter()
            .map(AgentOutput::weighted_score)
            .fold(f64::MIN, f64::max);
        prop_assert!(winner.weighted_score() >= max - HarmonizerConfig::default().tie_epsilon);
    }

    /// Ranking is a permutation whose head is the arbitration winner.
    #[test]
    fn prop_rank_head_is_winner((trust, outputs) in outputs_strategy()) {
        let harmonizer = harmonizer(&trust);
        let ranked = harmonizer.rank(1, &outputs).unwrap();
        prop_assert_eq!(ranked.len(), outputs.len());
        let winner = harmonizer.arbitrate(1, &outputs).unwrap();
        prop_assert_eq!(&ranked[0].agent_id, &winner.agent_id);
    }
}
