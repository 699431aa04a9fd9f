use approx::assert_relative_eq;
use rstest::*;

use crate::assert_float_relative_slice_eq;
use crate::config::MeanFieldConfig;
use crate::evolutionary_models::{EvolModel, EvolModelType, StatDistr};
use crate::handler::{BayesNetHandler, ParameterSet};
use crate::optimisers::{FreeEnergyCost, ParameterOptimiser};
use crate::sequences::{PhyloSequence, WeightedSample};

fn skewed_model() -> EvolModel {
    let pi = StatDistr::from_row_slice(1, 4, &[0.1, 0.2, 0.3, 0.4]);
    EvolModel::with_stat_distr(EvolModelType::ProbabilityMixing, pi).unwrap()
}

fn samples() -> Vec<WeightedSample> {
    vec![
        WeightedSample::new(PhyloSequence::new("a", vec![vec![0, 0, 0]]), 1.0),
        WeightedSample::new(PhyloSequence::new("b", vec![vec![0, 0, 1]]), 2.0),
        WeightedSample::new(PhyloSequence::new("c", vec![vec![3, 0, 0]]), 0.5),
    ]
}

#[test]
fn evaluate_sums_weighted_scores() {
    let mut handler = BayesNetHandler::default();
    handler
        .add_bayes_net("(A:0.1,B:0.2,C:0.3);", skewed_model())
        .unwrap();
    let samples = samples();
    let set = ParameterSet::BranchLengths {
        column: Some(0),
        shared: false,
    };
    let mut cost =
        FreeEnergyCost::new(&mut handler, &samples, set, MeanFieldConfig::default()).unwrap();
    let start = cost.parameters().unwrap();
    assert_eq!(start.len(), 3);
    let total = cost.evaluate(&start).unwrap();
    assert!(total.is_finite());
    assert!(total < 0.0);
    let blens = cost.handler().trees()[0].branch_lengths(cost.handler().net());
    assert_float_relative_slice_eq(&blens, &[0.1, 0.2, 0.3], 1e-12);
    assert!(cost.evaluate(&[0.0, 0.0]).is_err());
}

#[rstest]
#[case::stationary(ParameterSet::StationaryDistributions { column: None })]
#[case::branch_lengths(ParameterSet::BranchLengths { column: None, shared: false })]
fn nelder_mead_does_not_decrease_score(#[case] set: ParameterSet) {
    let mut handler = BayesNetHandler::default();
    handler
        .add_bayes_net("(A:0.1,B:0.2,C:0.3);", skewed_model())
        .unwrap();
    let samples = samples();
    let mut cost =
        FreeEnergyCost::new(&mut handler, &samples, set, MeanFieldConfig::default()).unwrap();
    let result = ParameterOptimiser::new(&mut cost)
        .with_max_iters(50)
        .run()
        .unwrap();
    assert!(result.final_score >= result.initial_score - 1e-4);
    let installed = cost.parameters().unwrap();
    assert_relative_eq!(
        cost.evaluate(&installed).unwrap(),
        result.final_score,
        epsilon = 1e-4
    );
}

#[test]
fn brent_on_global_temperature() {
    let mut handler = BayesNetHandler::default();
    handler
        .add_bayes_net("(A:0.1,B:0.2,C:0.3);", skewed_model())
        .unwrap();
    let samples = samples();
    let mut cost = FreeEnergyCost::new(
        &mut handler,
        &samples,
        ParameterSet::Temperatures { local: false },
        MeanFieldConfig::default(),
    )
    .unwrap()
    .with_reoptimisation(false);
    let result = ParameterOptimiser::new(&mut cost)
        .with_max_iters(30)
        .run()
        .unwrap();
    assert_eq!(result.parameters.len(), 1);
    assert!(result.final_score >= result.initial_score - 1e-9);
    assert_relative_eq!(
        cost.handler().trees()[0].temperature(),
        result.parameters[0].exp()
    );
}

#[test]
fn empty_parameter_set() {
    let mut handler = BayesNetHandler::default();
    let samples = Vec::new();
    let mut cost = FreeEnergyCost::new(
        &mut handler,
        &samples,
        ParameterSet::Temperatures { local: true },
        MeanFieldConfig::default(),
    )
    .unwrap();
    let result = ParameterOptimiser::new(&mut cost).run().unwrap();
    assert_eq!(result.iterations, 0);
    assert_eq!(result.initial_score, 0.0);
    assert!(result.parameters.is_empty());
}
