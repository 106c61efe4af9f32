//! Shared application state injected into all Axum handlers, and the
//! wiring that builds it.

use std::sync::Arc;
use std::time::Duration;

use crate::config::QueueConfig;
use crate::domain::Clock;
use crate::enrichment::EnrichmentClient;
use crate::queue::JobQueue;
use crate::service::{
    CallProducer, CircuitBreaker, DirectSink, FailoverSink, JobSink, NarrativeAnalyzer,
    QueueAdmin, QueueSink, RateLimitedConsumer,
};
use crate::store::NarrativeStore;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Call submission and re-analysis.
    pub producer: Arc<CallProducer>,
    /// Narrative reads and admin deletes.
    pub store: Arc<dyn NarrativeStore>,
    /// Queue operator actions.
    pub admin: Arc<QueueAdmin>,
    /// Time source for request timestamps and query windows.
    pub clock: Arc<dyn Clock>,
    /// Bearer token for the `/api/v1` surface. `None` rejects every
    /// protected request.
    pub api_token: Option<Arc<str>>,
}

/// Storage, broker, provider and time backends.
#[derive(Debug, Clone)]
pub struct Backends {
    /// Narrative documents.
    pub store: Arc<dyn NarrativeStore>,
    /// Broker.
    pub queue: Arc<dyn JobQueue>,
    /// Enrichment provider.
    pub client: Arc<dyn EnrichmentClient>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

/// Fully wired pipeline.
#[derive(Debug)]
pub struct Pipeline {
    /// Handler state.
    pub state: AppState,
    /// Queue consumer; spawn [`RateLimitedConsumer::run`] to start it.
    pub consumer: Arc<RateLimitedConsumer>,
    /// Degraded-mode sink, for draining direct analyses on shutdown.
    pub direct: Arc<DirectSink>,
}

impl Pipeline {
    /// Wires producer, consumer and admin over the given backends.
    ///
    /// `job_interval` is the minimum spacing between two analyses.
    #[must_use]
    pub fn assemble(
        backends: Backends,
        queue_config: &QueueConfig,
        job_interval: Duration,
        api_token: Option<String>,
    ) -> Self {
        let Backends {
            store,
            queue,
            client,
            clock,
        } = backends;

        let analyzer = Arc::new(NarrativeAnalyzer::new(
            Arc::clone(&store),
            client,
            Arc::clone(&clock),
        ));
        let direct = Arc::new(DirectSink::new(Arc::clone(&analyzer)));
        let sink: Arc<dyn JobSink> = Arc::new(FailoverSink::new(
            Arc::new(QueueSink::new(Arc::clone(&queue))),
            Arc::clone(&direct) as Arc<dyn JobSink>,
            CircuitBreaker::new(
                queue_config.breaker_failure_threshold,
                queue_config.breaker_cooldown,
                Arc::clone(&clock),
            ),
        ));

        let consumer = Arc::new(RateLimitedConsumer::new(
            Arc::clone(&queue),
            analyzer,
            Arc::clone(&clock),
            job_interval,
            queue_config.poll_interval,
        ));

        let state = AppState {
            producer: Arc::new(CallProducer::new(
                Arc::clone(&store),
                sink,
                Arc::clone(&clock),
            )),
            store,
            admin: Arc::new(QueueAdmin::new(queue, Arc::clone(&clock))),
            clock,
            api_token: api_token.map(Arc::from),
        };

        Self {
            state,
            consumer,
            direct,
        }
    }
}
