//! wq-design: sensitivity problem definition and Morris sampling design.
//!
//! - problem (variable list + bounds built from baseline model state)
//! - bounds (percent tables and fixed-factor bound rules)
//! - proxy (swappable mapping between sampled variables and native species)
//! - matrix (row-ordered design matrix)
//! - morris (trajectory design with optimal-trajectory selection)
//! - analyze (Morris elementary-effect indices)

pub mod analyze;
pub mod bounds;
pub mod error;
pub mod matrix;
pub mod morris;
pub mod problem;
pub mod proxy;

pub use analyze::{MorrisIndices, analyze};
pub use bounds::{BoundRule, BoundTable};
pub use error::{DesignError, DesignResult};
pub use matrix::DesignMatrix;
pub use morris::{DEFAULT_NUM_LEVELS, SampleOptions, sample, sample_with};
pub use problem::{ProblemSpec, build_problem, problem_variable_names};
pub use proxy::{CarbonPoolSplit, PoolFraction, ProxySpec, ProxyTransform, ProxyVariable};
