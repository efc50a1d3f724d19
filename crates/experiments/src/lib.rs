//! A/B content experiments — deterministic per-customer variant assignment
//! and winner declaration with a two-proportion significance test.

pub mod registry;
pub mod significance;
pub mod types;

pub use registry::ExperimentRegistry;
pub use types::{AbTest, AbTestStatus, Variant, VariantContent, VariantResults, WinnerDecision};
