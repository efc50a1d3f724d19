//! Outbound delivery providers — transactional email and in-app messaging
//! implementations of the core channel contracts.

pub mod email;
pub mod in_app;

pub use email::{SendGridConfig, SendGridEmailChannel};
pub use in_app::InAppMessageChannel;
