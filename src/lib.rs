use anyhow::Error;

pub mod alphabets;
pub mod bayes_net;
pub mod config;
pub mod elimination;
pub mod evolutionary_models;
pub mod handler;
pub mod io;
pub mod likelihood;
pub mod mean_field;
pub mod optimisers;
pub mod sequences;
pub mod tree;

type Result<T> = std::result::Result<T, Error>;

pub fn assert_float_relative_slice_eq(actual: &[f64], expected: &[f64], epsilon: f64) {
    use approx::relative_eq;
    assert_eq!(
        actual.len(),
        expected.len(),
        "Must have the same number of entries."
    );
    for (i, (&act, &exp)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(
            relative_eq!(act, exp, epsilon = epsilon),
            "Entries at position {} do not match, actual: {}, expected: {}",
            i,
            act,
            exp,
        );
    }
}
