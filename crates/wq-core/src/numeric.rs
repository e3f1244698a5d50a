use crate::CoreError;

/// Floating point type used throughout the workspace
pub type Real = f64;

pub fn ensure_finite(v: Real, what: &str) -> Result<Real, CoreError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(CoreError::NonFinite {
            what: what.to_string(),
            value: v,
        })
    }
}

/// Finite and not below zero. Concentrations and rate constants use this.
pub fn ensure_non_negative(v: Real, what: &str) -> Result<Real, CoreError> {
    let v = ensure_finite(v, what)?;
    if v < 0.0 {
        return Err(CoreError::Negative {
            what: what.to_string(),
            value: v,
        });
    }
    Ok(v)
}

pub fn ensure_same_len(
    what: &'static str,
    expected: usize,
    found: usize,
) -> Result<(), CoreError> {
    if expected == found {
        Ok(())
    } else {
        Err(CoreError::LengthMismatch {
            what,
            expected,
            found,
        })
    }
}

/// Round half away from zero, then convert to a count. Negative inputs give 0.
pub fn round_to_count(v: Real) -> usize {
    if !v.is_finite() || v <= 0.0 {
        return 0;
    }
    v.round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ensure_finite_detects_nan() {
        let err = ensure_finite(Real::NAN, "test").unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("Non-finite"));
    }

    #[test]
    fn ensure_non_negative_rejects_negative() {
        assert!(ensure_non_negative(0.0, "c").is_ok());
        let err = ensure_non_negative(-0.5, "CL2").unwrap_err();
        assert!(matches!(err, CoreError::Negative { .. }));
        assert!(format!("{err}").contains("CL2"));
    }

    #[test]
    fn round_to_count_matches_worker_policy() {
        assert_eq!(round_to_count(8.0 * 0.85), 7);
        assert_eq!(round_to_count(1.0 * 0.85), 1);
        assert_eq!(round_to_count(0.4), 0);
        assert_eq!(round_to_count(-3.0), 0);
        assert_eq!(round_to_count(f64::NAN), 0);
    }

    proptest! {
        #[test]
        fn round_to_count_is_nearest_count(v in 0.0f64..1e6) {
            let n = round_to_count(v) as f64;
            prop_assert!((n - v).abs() <= 0.5);
        }
    }
}
