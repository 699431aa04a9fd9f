use approx::assert_relative_eq;
use rstest::*;

use crate::config::{CacheConfig, MeanFieldConfig, ModelConfig};
use crate::elimination::{ExactLikelihood, SimpleNodeElimination};
use crate::evolutionary_models::{EvolModel, EvolModelType, StatDistr};
use crate::handler::BayesNetHandler;
use crate::likelihood::{SampleCostFunction, Scorer, ScoringMode};
use crate::mean_field::MeanField;
use crate::sequences::{PhyloSequence, WeightedSample};

fn handler() -> BayesNetHandler {
    let mut handler = BayesNetHandler::default();
    let model = EvolModel::new(EvolModelType::RateMixing, 1, 4).unwrap();
    handler
        .add_bayes_net("((A:0.1,B:0.2):0.05,C:0.3);", model.clone())
        .unwrap();
    handler
        .add_bayes_net("((A:0.2,B:0.1):0.15,C:0.1);", model)
        .unwrap();
    handler.connect_virtual_trees(0, 1).unwrap();
    handler
}

fn sample() -> PhyloSequence {
    PhyloSequence::new("s", vec![vec![0, 0, 2], vec![1, 3, 3]])
}

#[test]
fn exact_mode_matches_elimination() {
    let mut handler = handler();
    let mut scorer = Scorer::new(ScoringMode::Exact, ModelConfig::default());
    let score = scorer.score(&mut handler, &sample()).unwrap();
    handler.observe(&sample()).unwrap();
    let expected = SimpleNodeElimination::default()
        .log_likelihood(handler.net())
        .unwrap();
    assert_relative_eq!(score, expected);
}

#[test]
fn mean_field_mode_matches_session() {
    let mut handler = handler();
    let mut scorer = Scorer::new(ScoringMode::MeanField, ModelConfig::default());
    let score = scorer.score(&mut handler, &sample()).unwrap();
    let mut mean_field = MeanField::new(MeanFieldConfig::default());
    mean_field.init_observation(&mut handler, &sample()).unwrap();
    mean_field.optimise_by_normalisation(&handler).unwrap();
    assert_relative_eq!(score, mean_field.score(&handler).unwrap());
}

#[rstest]
#[case::mean_field(ScoringMode::MeanField)]
#[case::exact(ScoringMode::Exact)]
fn cache_is_keyed_by_content_and_version(#[case] mode: ScoringMode) {
    let mut handler = handler();
    let mut scorer = Scorer::new(mode, ModelConfig::default());
    let first = scorer.score(&mut handler, &sample()).unwrap();
    let renamed = PhyloSequence::new("other", sample().columns().to_vec());
    assert_eq!(scorer.score(&mut handler, &renamed).unwrap(), first);
    assert_eq!(scorer.cache().hits(), 1);

    handler.set_branch_length(0, 1, 0.4).unwrap();
    let changed = scorer.score(&mut handler, &sample()).unwrap();
    assert_ne!(changed, first);
    assert_eq!(scorer.cache().hits(), 1);
    assert_eq!(scorer.cache().misses(), 2);
    assert_eq!(scorer.cache().len(), 1);

    scorer.reset();
    assert!(scorer.cache().is_empty());
}

#[test]
fn warm_start_reaches_same_score() {
    let mut handler = handler();
    let config = ModelConfig::default().with_cache(CacheConfig {
        capacity: 8,
        warm_start: true,
    });
    let mut warm = Scorer::new(ScoringMode::MeanField, config);
    let mut cold = Scorer::new(ScoringMode::MeanField, ModelConfig::default());
    warm.score(&mut handler, &sample()).unwrap();
    handler.set_branch_length(1, 2, 0.3).unwrap();
    let warm_score = warm.score(&mut handler, &sample()).unwrap();
    let cold_score = cold.score(&mut handler, &sample()).unwrap();
    assert_relative_eq!(warm_score, cold_score, epsilon = 1e-3);
}

#[test]
fn weighted_total() {
    let mut handler = handler();
    let mut scorer = Scorer::new(ScoringMode::Exact, ModelConfig::default());
    let other = PhyloSequence::new("t", vec![vec![3, 3, 3], vec![3, 3, 3]]);
    let a = scorer.score(&mut handler, &sample()).unwrap();
    let b = scorer.score(&mut handler, &other).unwrap();
    let total = scorer
        .score_all(
            &mut handler,
            &[
                WeightedSample::new(sample(), 0.5),
                WeightedSample::new(other, 2.0),
            ],
        )
        .unwrap();
    assert_relative_eq!(total, 0.5 * a + 2.0 * b);
}

#[test]
fn cache_separates_handlers_with_equal_history() {
    let mut skewed = handler();
    let mut uniform = handler();
    skewed
        .set_stat_distr(0, StatDistr::from_row_slice(1, 4, &[0.7, 0.1, 0.1, 0.1]))
        .unwrap();
    uniform
        .set_stat_distr(0, StatDistr::from_row_slice(1, 4, &[0.25; 4]))
        .unwrap();
    assert_ne!(skewed.version(), uniform.version());

    let mut scorer = Scorer::new(ScoringMode::Exact, ModelConfig::default());
    let first = scorer.score(&mut skewed, &sample()).unwrap();
    let second = scorer.score(&mut uniform, &sample()).unwrap();
    assert_eq!(scorer.cache().hits(), 0);
    uniform.observe(&sample()).unwrap();
    let expected = SimpleNodeElimination::default()
        .log_likelihood(uniform.net())
        .unwrap();
    assert_relative_eq!(second, expected);
    assert_ne!(first, second);
}
