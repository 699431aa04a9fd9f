use approx::assert_relative_eq;
use assert_matches::assert_matches;
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rstest::*;

use crate::bayes_net::StructuralError;
use crate::evolutionary_models::{ConfigurationError, EvolModel, EvolModelType, StatDistr};
use crate::handler::{BayesNetHandler, ParameterSet};
use crate::sequences::PhyloSequence;

const STAR: &str = "(A:0.1,B:0.2,C:0.3);";
const CHERRY: &str = "((A:0.1,B:0.2):0.05,C:0.3);";

fn structural(err: anyhow::Error) -> StructuralError {
    err.downcast_ref::<StructuralError>().unwrap().clone()
}

fn fs81(dimension: usize) -> EvolModel {
    EvolModel::new(EvolModelType::ProbabilityMixing, dimension, 4).unwrap()
}

fn handler_with(newicks: &[&str]) -> BayesNetHandler {
    let mut handler = BayesNetHandler::default();
    for newick in newicks {
        handler.add_bayes_net(newick, fs81(1)).unwrap();
    }
    handler
}

fn cond_probs(handler: &BayesNetHandler) -> Vec<DMatrix<f64>> {
    handler
        .net()
        .nodes()
        .iter()
        .map(|n| n.cpf.cond_prob().clone())
        .collect()
}

fn assert_row_stochastic(matrix: &DMatrix<f64>) {
    for row in matrix.row_iter() {
        assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-12);
    }
}

#[test]
fn add_bayes_net_builds_column() {
    let handler = handler_with(&[STAR]);
    assert_eq!(handler.len(), 1);
    assert_eq!(handler.net().len(), 4);
    let tree = handler.tree(0).unwrap();
    assert_eq!(tree.n_leaves(), 3);
    assert!(tree.is_star());
    assert_eq!(handler.net().node(tree.leaf(0)).name, "pos_0:A");
    assert_eq!(handler.net().node(tree.node(0)).name, "pos_0:iN0");

    let root = handler.net().node(tree.node(0));
    assert_relative_eq!(root.cpf.cond_prob(), &DMatrix::from_element(1, 4, 0.25));
    let leaf = handler.net().node(tree.leaf(0));
    assert_relative_eq!(leaf.cpf.cond_prob()[(0, 0)], 0.925, epsilon = 1e-12);
    assert_relative_eq!(leaf.cpf.cond_prob()[(0, 1)], 0.025, epsilon = 1e-12);
}

#[test]
fn add_bayes_net_keeps_connections() {
    let mut handler = handler_with(&[STAR, STAR]);
    handler.connect_virtual_trees(0, 1).unwrap();
    handler.add_bayes_net(STAR, fs81(1)).unwrap();
    assert_eq!(
        handler.connection_table(),
        &[vec![0, 1, 0], vec![0, 0, 0], vec![0, 0, 0]]
    );
}

#[test]
fn add_bayes_net_rejects_foreign_alphabet() {
    let mut handler = BayesNetHandler::new(2);
    let err = handler.add_bayes_net(STAR, fs81(1)).unwrap_err();
    assert!(err.downcast_ref::<ConfigurationError>().is_some());
    assert!(handler.is_empty());
}

#[test]
fn unknown_column() {
    let handler = handler_with(&[STAR]);
    assert_matches!(
        structural(handler.tree(3).unwrap_err()),
        StructuralError::UnknownColumn(3)
    );
}

#[test]
fn init_parameters_is_idempotent() {
    let mut handler = handler_with(&[STAR, STAR]);
    handler.connect_virtual_trees(0, 1).unwrap();
    let pi = StatDistr::from_row_slice(1, 4, &[0.1, 0.2, 0.3, 0.4]);
    handler.set_stat_distr(0, pi).unwrap();
    let before = cond_probs(&handler);
    handler.init_parameters().unwrap();
    handler.init_parameters().unwrap();
    assert_eq!(cond_probs(&handler), before);
}

#[test]
fn connect_requires_equal_node_counts() {
    let mut handler = handler_with(&["(A:0.1,B:0.2);", STAR]);
    assert_matches!(
        structural(handler.connect_virtual_trees(0, 1).unwrap_err()),
        StructuralError::NodeCountMismatch {
            first: 3,
            second: 4
        }
    );
    assert_eq!(handler.connection_table(), &[vec![0, 0], vec![0, 0]]);
    assert_eq!(handler.tree(1).unwrap().evol_model().dimension(), 1);
}

#[test]
fn connect_resizes_target_model() {
    let mut handler = handler_with(&[STAR, STAR]);
    let version = handler.version();
    handler.connect_virtual_trees(0, 1).unwrap();
    assert!(handler.version() > version);
    assert_eq!(handler.connection_table(), &[vec![0, 1], vec![0, 0]]);
    assert_eq!(handler.tree(0).unwrap().evol_model().dimension(), 1);
    assert_eq!(handler.tree(1).unwrap().evol_model().dimension(), 4);

    let tree = handler.tree(1).unwrap();
    let root = handler.net().node(tree.node(0));
    assert_eq!(root.parents, vec![handler.tree(0).unwrap().node(0)]);
    assert_eq!(root.cpf.rows(), 4);
    let leaf = handler.net().node(tree.leaf(2));
    assert_eq!(leaf.parents.len(), 2);
    assert_eq!(leaf.cpf.rows(), 16);
    assert_row_stochastic(leaf.cpf.cond_prob());
}

#[test]
fn connect_rejects_cycles_and_duplicates() {
    let mut handler = handler_with(&[STAR, STAR]);
    handler.connect_virtual_trees(0, 1).unwrap();
    assert_matches!(
        structural(handler.connect_virtual_trees(0, 1).unwrap_err()),
        StructuralError::DuplicateEdge {
            parent: 0,
            child: 1
        }
    );
    assert_matches!(
        structural(handler.connect_virtual_trees(1, 0).unwrap_err()),
        StructuralError::Cycle { .. }
    );
    assert_eq!(handler.connection_table(), &[vec![0, 1], vec![0, 0]]);
    let root = handler.tree(0).unwrap().node(0);
    assert!(handler.net().node(root).parents.is_empty());
}

#[test]
fn fresh_handlers_never_share_a_version() {
    let first = handler_with(&[STAR]);
    let second = handler_with(&[STAR]);
    assert_ne!(first.version(), second.version());
    assert_eq!(first.clone().version(), first.version());
}

#[test]
fn dimer_violation_keeps_table() {
    let mut handler = handler_with(&[STAR, STAR, STAR]);
    handler.connect_virtual_trees(0, 2).unwrap();
    assert!(handler.is_dimer_consistent());
    handler.connect_virtual_trees(1, 2).unwrap();
    assert!(!handler.is_dimer_consistent());
    assert_eq!(handler.connection_table()[0][2], 1);
    assert_eq!(handler.connection_table()[1][2], 1);
    assert_eq!(handler.tree(2).unwrap().evol_model().dimension(), 16);
    let leaf = handler.tree(2).unwrap().leaf(0);
    assert_eq!(handler.net().node(leaf).cpf.rows(), 64);
}

#[test]
fn separate_undoes_connect() {
    let mut handler = handler_with(&[STAR, STAR]);
    let before = cond_probs(&handler);
    handler.connect_virtual_trees(0, 1).unwrap();
    handler.separate_virtual_trees(0, 1).unwrap();
    assert_eq!(handler.connection_table(), &[vec![0, 0], vec![0, 0]]);
    assert_eq!(handler.tree(1).unwrap().evol_model().dimension(), 1);
    assert_eq!(cond_probs(&handler), before);
    assert_matches!(
        structural(handler.separate_virtual_trees(0, 1).unwrap_err()),
        StructuralError::MissingEdge { .. }
    );
}

#[test]
fn temperature_mode_filters_first_leaf() {
    let mut handler = BayesNetHandler::default();
    let pi = StatDistr::from_row_slice(1, 4, &[0.1, 0.2, 0.3, 0.4]);
    let model = EvolModel::with_stat_distr(EvolModelType::RateMixing, pi).unwrap();
    handler.add_bayes_net(STAR, model.clone()).unwrap();
    handler.set_temperature(0, 2.0).unwrap();

    let tree = handler.tree(0).unwrap();
    let net = handler.net();
    for &idx in tree.nodes() {
        assert_row_stochastic(net.node(idx).cpf.cond_prob());
    }
    let pi_a = [0.01, 0.04, 0.09, 0.16].map(|p| p / 0.3);
    let transitions = model.transitions(0.1);
    let root = net.node(tree.node(0)).cpf.cond_prob();
    for c in 0..4 {
        let expected: f64 = (0..4).map(|r| pi_a[r] * transitions[(r, c)]).sum();
        assert_relative_eq!(root[(0, c)], expected, epsilon = 1e-12);
    }
    let other = net.node(tree.leaf(1)).cpf.cond_prob();
    assert_relative_eq!(other, &model.transitions(0.2), epsilon = 1e-12);
}

#[test]
fn temperature_mode_needs_star_tree() {
    let mut handler = handler_with(&[CHERRY]);
    let before = cond_probs(&handler);
    assert_matches!(
        structural(handler.set_temperature(0, 0.5).unwrap_err()),
        StructuralError::NotStarTopology {
            nodes: 5,
            leaves: 3
        }
    );
    assert_eq!(handler.tree(0).unwrap().temperature(), 1.0);
    assert_eq!(cond_probs(&handler), before);
}

#[test]
fn temperature_mode_needs_single_class() {
    let mut handler = handler_with(&[STAR, STAR]);
    handler.connect_virtual_trees(0, 1).unwrap();
    let err = handler.set_temperature(1, 0.5).unwrap_err();
    assert!(err.downcast_ref::<ConfigurationError>().is_some());
    handler.set_temperature(0, 0.5).unwrap();
}

#[rstest]
#[case::leaves(vec![0, 1, 2], vec![0, 1, 2])]
#[case::all_nodes(vec![3, 0, 1, 4], vec![0, 1, 4])]
fn set_observation_by_length(#[case] observation: Vec<usize>, #[case] leaves: Vec<usize>) {
    let mut handler = handler_with(&[STAR]);
    handler.set_observation(0, &observation).unwrap();
    assert_eq!(handler.tree(0).unwrap().observation(handler.net()), leaves);
}

#[test]
fn set_observation_wrong_length() {
    let mut handler = handler_with(&[STAR]);
    assert_matches!(
        structural(handler.set_observation(0, &[0, 1]).unwrap_err()),
        StructuralError::ObservationLength {
            leaves: 3,
            nodes: 4,
            found: 2
        }
    );
}

#[test]
fn observe_sequence_resets_previous() {
    let mut handler = handler_with(&[STAR, STAR]);
    handler.set_observation(1, &[3, 3, 3]).unwrap();
    let seq = PhyloSequence::new("s", vec![vec![0, 1, 2]]);
    handler.observe(&seq).unwrap();
    assert_eq!(
        handler.tree(0).unwrap().observation(handler.net()),
        vec![0, 1, 2]
    );
    assert_eq!(
        handler.tree(1).unwrap().observation(handler.net()),
        vec![4, 4, 4]
    );
    handler.clear_observations();
    assert!(handler.net().nodes().iter().all(|n| !n.is_observed()));
}

#[test]
fn newick_and_branch_length_reinit() {
    let mut handler = handler_with(&[CHERRY]);
    assert_eq!(handler.newick(0).unwrap(), "((A:0.1,B:0.2):0.05,C:0.3);");
    handler
        .reinit_branch_lengths(0, "((A:0.5,B:0.25):0.125,C:0.0625);")
        .unwrap();
    let tree = handler.tree(0).unwrap();
    assert_eq!(
        tree.branch_lengths(handler.net()),
        vec![0.125, 0.5, 0.25, 0.0625]
    );
    let leaf = handler.net().node(tree.leaf(0)).cpf.cond_prob();
    assert_relative_eq!(leaf, &fs81(1).transitions(0.5));
    assert!(handler.reinit_branch_lengths(0, STAR).is_err());
}

#[test]
fn set_branch_length_updates_cpf() {
    let mut handler = handler_with(&[STAR]);
    handler.set_branch_length(0, 2, 0.6).unwrap();
    let tree = handler.tree(0).unwrap();
    assert_eq!(tree.branch_lengths(handler.net()), vec![0.1, 0.6, 0.3]);
    let leaf = handler.net().node(tree.leaf(1)).cpf.cond_prob();
    assert_relative_eq!(leaf, &fs81(1).transitions(0.6));
    assert_matches!(
        structural(handler.set_branch_length(0, 0, 0.6).unwrap_err()),
        StructuralError::UnknownNode(0)
    );
}

#[test]
fn persisted_state_round_trip() {
    let mut handler = handler_with(&[STAR, STAR]);
    let hky = EvolModelType::TransitionTransversion { ratio: 0.5 };
    let pi = StatDistr::from_row_slice(1, 4, &[0.1, 0.2, 0.3, 0.4]);
    handler
        .set_evol_model(0, EvolModel::with_stat_distr(hky, pi).unwrap())
        .unwrap();
    handler.connect_virtual_trees(0, 1).unwrap();
    let classes = StatDistr::from_fn(4, 4, |i, j| if i == j { 0.7 } else { 0.1 });
    handler.set_stat_distr(1, classes).unwrap();
    handler
        .add_bayes_net(
            "(A:0.123456789,B:0.2,C:0.3);",
            EvolModel::new(EvolModelType::RateMixing, 1, 4).unwrap(),
        )
        .unwrap();
    handler.set_temperature(2, 0.5).unwrap();

    let text = handler.to_tagged_string();
    let restored = BayesNetHandler::from_tagged_string(&text).unwrap();
    assert_eq!(restored.len(), 3);
    assert_eq!(restored.connection_table(), handler.connection_table());
    assert_eq!(restored.tree(0).unwrap().evol_model().model_type(), hky);
    assert_eq!(restored.tree(1).unwrap().evol_model().dimension(), 4);
    assert_eq!(restored.tree(2).unwrap().temperature(), 0.5);
    assert_eq!(cond_probs(&restored), cond_probs(&handler));
    assert_eq!(restored.to_tagged_string(), text);
}

#[test]
fn persisted_state_defaults_temperature() {
    let text = "<numberOfTrees>1</numberOfTrees>\n\
                <connectionTable>0</connectionTable>\n\
                <VirtualTree0><evolModel><modelType>FS81alpha</modelType>\
                <dimension>1</dimension><statDistr>0.25 0.25 0.25 0.25</statDistr>\
                </evolModel><newickString>(A:0.1,B:0.2);</newickString></VirtualTree0>";
    let handler = BayesNetHandler::from_tagged_string(text).unwrap();
    assert_eq!(handler.tree(0).unwrap().temperature(), 1.0);
    assert!(!handler.net().uses_independent_transitions());
    assert_eq!(handler.net().len(), 3);
}

#[test]
fn persisted_state_errors() {
    assert!(BayesNetHandler::from_tagged_string("").is_err());
    let text = "<numberOfTrees>2</numberOfTrees><connectionTable>0</connectionTable>";
    assert!(BayesNetHandler::from_tagged_string(text).is_err());
}

#[rstest]
#[case::stat_distr(ParameterSet::StationaryDistributions { column: None }, 20)]
#[case::stat_distr_column(ParameterSet::StationaryDistributions { column: Some(1) }, 16)]
#[case::blens(ParameterSet::BranchLengths { column: None, shared: false }, 6)]
#[case::shared_blens(ParameterSet::BranchLengths { column: None, shared: true }, 3)]
#[case::blens_column(ParameterSet::BranchLengths { column: Some(0), shared: false }, 3)]
#[case::local_temperatures(ParameterSet::Temperatures { local: true }, 2)]
#[case::global_temperature(ParameterSet::Temperatures { local: false }, 1)]
fn parameter_round_trip(#[case] set: ParameterSet, #[case] expected: usize) {
    let mut handler = handler_with(&[STAR, STAR]);
    handler.connect_virtual_trees(0, 1).unwrap();
    let pi = StatDistr::from_row_slice(1, 4, &[0.1, 0.2, 0.3, 0.4]);
    handler.set_stat_distr(0, pi).unwrap();
    let before = cond_probs(&handler);
    let version = handler.version();

    let values = handler.get_parameters(set).unwrap();
    assert_eq!(values.len(), expected);
    assert_eq!(handler.number_of_parameters(set).unwrap(), expected);
    handler.set_parameters(set, &values).unwrap();
    assert!(handler.version() > version);
    let after = handler.get_parameters(set).unwrap();
    for (a, b) in values.iter().zip(after.iter()) {
        assert_relative_eq!(a, b, epsilon = 1e-9);
    }
    for (a, b) in before.iter().zip(cond_probs(&handler).iter()) {
        assert_relative_eq!(a, b, epsilon = 1e-12);
    }
}

#[test]
fn parameters_move_the_model() {
    let mut handler = handler_with(&[STAR]);
    let set = ParameterSet::StationaryDistributions { column: Some(0) };
    handler.set_parameters(set, &[0.0, 0.0, 0.0, 2.0_f64.ln()]).unwrap();
    let pi = handler.tree(0).unwrap().evol_model().stat_distr().clone();
    assert_relative_eq!(pi, StatDistr::from_row_slice(1, 4, &[0.2, 0.2, 0.2, 0.4]));

    let set = ParameterSet::BranchLengths {
        column: Some(0),
        shared: false,
    };
    handler.set_parameters(set, &[0.0, 0.0, 0.0]).unwrap();
    for blen in handler.tree(0).unwrap().branch_lengths(handler.net()) {
        assert_relative_eq!(blen, 0.50025, epsilon = 1e-12);
    }
}

#[test]
fn parameter_length_is_checked() {
    let mut handler = handler_with(&[STAR]);
    let err = handler
        .set_parameters(ParameterSet::Temperatures { local: true }, &[0.0, 1.0])
        .unwrap_err();
    assert!(err.downcast_ref::<ConfigurationError>().is_some());
}

#[test]
fn shared_branch_lengths_need_equal_trees() {
    let handler = handler_with(&[STAR, CHERRY]);
    let set = ParameterSet::BranchLengths {
        column: None,
        shared: true,
    };
    assert_matches!(
        structural(handler.get_parameters(set).unwrap_err()),
        StructuralError::NodeCountMismatch { .. }
    );
}

#[test]
fn leaf_marginals_follow_stationary_distribution() {
    let mut handler = handler_with(&[STAR, STAR]);
    let pi = StatDistr::from_row_slice(1, 4, &[0.1, 0.2, 0.3, 0.4]);
    handler.set_stat_distr(1, pi).unwrap();
    let marginals = handler.leaf_marginals(2).unwrap();
    assert_eq!(marginals.len(), 2);
    for (m, expected) in marginals[0].iter().zip([0.25; 4]) {
        assert_relative_eq!(*m, expected, epsilon = 1e-12);
    }
    for (m, expected) in marginals[1].iter().zip([0.1, 0.2, 0.3, 0.4]) {
        assert_relative_eq!(*m, expected, epsilon = 1e-12);
    }
    assert!(handler.leaf_marginals(3).is_err());
}

#[test]
fn draw_sample_gives_one_symbol_per_leaf() {
    let mut handler = handler_with(&[STAR, CHERRY]);
    handler.add_bayes_net("(A:0.1,B:0.1);", fs81(1)).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let sample = handler.draw_sample("draw", &mut rng).unwrap();
    assert_eq!(sample.len(), 3);
    assert_eq!(sample.column(0).len(), 3);
    assert_eq!(sample.column(2).len(), 2);
    assert!(sample.columns().iter().flatten().all(|&s| s < 4));
}
