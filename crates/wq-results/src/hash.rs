//! Content fingerprint of a sampling design.

use sha2::{Digest, Sha256};
use wq_design::{DesignMatrix, ProblemSpec};

/// SHA-256 over the canonical JSON of problem and design, hex encoded.
pub fn design_fingerprint(problem: &ProblemSpec, design: &DesignMatrix) -> String {
    let mut hasher = Sha256::new();

    let problem_json = serde_json::to_string(problem).unwrap_or_default();
    hasher.update(problem_json.as_bytes());

    let design_json = serde_json::to_string(design).unwrap_or_default();
    hasher.update(design_json.as_bytes());

    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem() -> ProblemSpec {
        ProblemSpec::new(vec!["k1".into()], vec![(0.0, 1.0)]).unwrap()
    }

    #[test]
    fn fingerprint_stability() {
        let design = DesignMatrix::from_rows(vec![vec![0.25], vec![0.75]]).unwrap();
        assert_eq!(
            design_fingerprint(&problem(), &design),
            design_fingerprint(&problem(), &design.clone())
        );
    }

    #[test]
    fn fingerprint_differs_for_different_designs() {
        let a = DesignMatrix::from_rows(vec![vec![0.25], vec![0.75]]).unwrap();
        let b = DesignMatrix::from_rows(vec![vec![0.75], vec![0.25]]).unwrap();
        assert_ne!(
            design_fingerprint(&problem(), &a),
            design_fingerprint(&problem(), &b)
        );
    }
}
