//! Audience specification and resolution — turns a declarative audience
//! into a concrete, deduplicated customer list at dispatch time.

pub mod resolver;
pub mod types;

pub use resolver::{AudienceResolver, CustomerProfile, CustomerStore, InMemoryCustomerStore};
pub use types::{Audience, AudienceFilters};
