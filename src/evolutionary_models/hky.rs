use crate::evolutionary_models::SubstMatrix;

// With symbols ordered ACGT the transition partner is two positions away: A<->G, C<->T.
fn partner(symbol: usize) -> usize {
    (symbol + 2) % 4
}

/// HKY-style mixing for the branch parameter `t`: the transition partner gets `t * pi_b`,
/// the two transversions get `t * ratio * pi_b` and the diagonal takes the remainder.
pub(crate) fn transition_transversion(pi: &[f64], t: f64, ratio: f64) -> SubstMatrix {
    debug_assert_eq!(pi.len(), 4);
    let alpha = t;
    let beta = alpha * ratio;
    let mut matrix = SubstMatrix::from_fn(4, 4, |a, b| {
        if a == b {
            0.0
        } else if b == partner(a) {
            alpha * pi[b]
        } else {
            beta * pi[b]
        }
    });
    for a in 0..4 {
        let leaving = matrix.row(a).sum();
        matrix[(a, a)] = 1.0 - leaving;
    }
    matrix
}
