//! The simulation payload.
//!
//! A real deployment plugs a simulator in here. The bundled payload reduces
//! the parameter vector to its minimum element.

use simbroker_core::{Error, Result};

/// Computes the objective for one parameter vector.
///
/// A `NaN` anywhere in `params` makes the objective `NaN`.
///
/// # Errors
///
/// Returns [`Error::InvalidRequest`] for an empty vector.
pub fn objective(params: &[f64]) -> Result<f64> {
    let (first, rest) = params.split_first().ok_or_else(|| Error::InvalidRequest {
        reason: "Parameter vector must not be empty".to_string(),
    })?;

    Ok(rest.iter().fold(*first, |min, &x| {
        if min.is_nan() || x.is_nan() {
            f64::NAN
        } else {
            min.min(x)
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_minimum() {
        assert_eq!(objective(&[3.0, 1.0, 2.0]).unwrap(), 1.0);
        assert_eq!(objective(&[-0.5]).unwrap(), -0.5);
        assert_eq!(objective(&[2.0, f64::NEG_INFINITY]).unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn nan_propagates() {
        assert!(objective(&[1.0, f64::NAN, 0.0]).unwrap().is_nan());
    }

    #[test]
    fn empty_vector_is_rejected() {
        assert!(matches!(objective(&[]), Err(Error::InvalidRequest { .. })));
    }
}
