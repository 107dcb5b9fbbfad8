//! LLM transport used by the snipgate oracles.
//!
//! The core crate only depends on [`provider::LlmProvider`]; concrete backends live in
//! [`http`], and [`provider::MockProvider`] / [`provider::OfflineProvider`] cover tests and
//! credential-less runs.

pub mod http;
pub mod provider;
