use crate::evolutionary_models::SubstMatrix;

/// Values of `exp(-t * beta)` closer than this to 0 or 1 are snapped to the bound.
pub(crate) const RATE_CLAMP: f64 = 1e-4;

/// Felsenstein 81 with the branch parameter read as a substitution probability:
/// diagonal `1 - t + pi_a * t`, off-diagonal `pi_b * t`.
pub(crate) fn probability_mixing(pi: &[f64], t: f64) -> SubstMatrix {
    let k = pi.len();
    SubstMatrix::from_fn(k, k, |a, b| {
        if a == b {
            1.0 - t + pi[b] * t
        } else {
            pi[b] * t
        }
    })
}

/// Felsenstein 81 with the branch parameter read as an expected substitution count.
pub(crate) fn rate_mixing(pi: &[f64], t: f64) -> SubstMatrix {
    let k = pi.len();
    let alpha = persistence(pi, t);
    SubstMatrix::from_fn(k, k, |a, b| {
        if a == b {
            alpha + pi[b] * (1.0 - alpha)
        } else {
            pi[b] * (1.0 - alpha)
        }
    })
}

fn persistence(pi: &[f64], t: f64) -> f64 {
    let beta = 1.0 / (1.0 - pi.iter().map(|p| p * p).sum::<f64>());
    // a point mass never substitutes away
    if !beta.is_finite() {
        return if t == 0.0 { 1.0 } else { 0.0 };
    }
    let alpha = (-t * beta).exp();
    if alpha < RATE_CLAMP {
        0.0
    } else if alpha > 1.0 - RATE_CLAMP {
        1.0
    } else {
        alpha
    }
}
