//! wq-model: the model binding contract and quality result types.
//!
//! The sensitivity driver only ever talks to a water-quality solver through
//! [`ModelBinding`]. [`BatchReactor`] is a self-contained reference binding
//! that reads YAML network and reaction-scheme files; native solvers plug in
//! behind the same trait.

pub mod binding;
pub mod error;
pub mod files;
pub mod reactor;
pub mod types;

pub use binding::ModelBinding;
pub use error::{ModelError, ModelResult};
pub use files::{LinkDef, NetworkFile, NodeDef, ReactionDef, SchemeFile, SpeciesDef, YieldDef};
pub use reactor::BatchReactor;
pub use types::*;
