//! # Web API Application State

use crate::rate_limiting::RateLimiter;
use crate::resilience::Registry;
use crate::sync::EventIngestionPipeline;

/// Shared state handed to every handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub pipeline: EventIngestionPipeline,
    pub rate_limiter: RateLimiter,
    pub registry: Registry,
}

impl AppState {
    /// Share the pipeline's breaker registry with the health endpoint
    pub fn new(pipeline: EventIngestionPipeline, rate_limiter: RateLimiter) -> Self {
        let registry = pipeline.registry().clone();
        Self {
            pipeline,
            rate_limiter,
            registry,
        }
    }
}
