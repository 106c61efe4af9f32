//! # narrative-pipeline
//!
//! Rate-limited analysis pipeline for token buy calls.
//!
//! A detected call creates or updates a per-token narrative and queues an
//! analysis job. A single consumer drains the queue no faster than the
//! enrichment provider's quota allows, fans each job out into five
//! provider requests, aggregates the answers into a sentiment snapshot,
//! and retries or dead-letters failed jobs.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)
//!     │
//!     ├── REST Handlers (api/)
//!     │
//!     ├── CallProducer ──► JobSink (queue, or direct when the broker is down)
//!     ├── RateLimitedConsumer ──► NarrativeAnalyzer (service/)
//!     ├── QueueAdmin
//!     │
//!     ├── JobQueue (queue/)         priority queue + dead-letter queue
//!     ├── NarrativeStore (store/)   narratives + snapshot history
//!     ├── EnrichmentClient (enrichment/)
//!     │
//!     └── PostgreSQL Persistence
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod enrichment;
pub mod error;
pub mod queue;
pub mod service;
pub mod store;
