//! Service layer: the analysis pipeline.
//!
//! [`CallProducer`] records calls and hands jobs to a [`JobSink`].
//! [`RateLimitedConsumer`] drains the broker through the
//! [`NarrativeAnalyzer`], which fans out to the enrichment provider and
//! persists the aggregated result. [`QueueAdmin`] exposes the operator
//! actions on the broker.

pub mod admin;
pub mod aggregation;
pub mod analyzer;
pub mod breaker;
pub mod consumer;
pub mod producer;
pub mod rate_gate;
pub mod sink;

pub use admin::QueueAdmin;
pub use analyzer::{AnalysisOutcome, NarrativeAnalyzer};
pub use breaker::{BreakerState, CircuitBreaker};
pub use consumer::{DeliveryOutcome, RateLimitedConsumer};
pub use producer::{CallProducer, CallReceipt, CallSubmission};
pub use rate_gate::RateGate;
pub use sink::{DirectSink, FailoverSink, JobSink, QueueSink, SinkOutcome};
