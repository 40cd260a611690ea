//! HTTP module
//!
//! Upstream access for the adapters.
//!
//! # Features
//!
//! - **Unified API Source**: `UnifiedApiClient` implements `PlatformSource`
//!   over the platform gateway
//! - **Gateway Retries**: `RetryPolicy` retries 500/502/504 with a fixed delay
//! - **Pacing**: per-platform token bucket using governor
//! - **Transport Backoff**: Constant, linear, and exponential backoff

mod client;
mod pacing;
mod retry;
mod unified;

pub use client::{Backoff, HttpClient, HttpClientConfig, HttpClientConfigBuilder};
pub use pacing::{Pacer, Pacing};
pub use retry::RetryPolicy;
pub use unified::{UnifiedApiClient, UnifiedBudgetProbe, RATE_LIMIT_USECASE};
