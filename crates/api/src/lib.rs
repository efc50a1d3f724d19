//! HTTP control surface over the campaign orchestration service.

pub mod rest;
pub mod server;

pub use server::ApiServer;
