//! Domain layer: narrative documents, snapshots, queue jobs and time.
//!
//! This module contains the data model shared by the producer, the
//! consumer and the stores: the per-token [`Narrative`], the append-only
//! [`SentimentSnapshot`] history, the [`AnalysisJob`] wire format and the
//! injectable [`Clock`].

pub mod clock;
pub mod job;
pub mod narrative;
pub mod narrative_id;
pub mod snapshot;

pub use clock::{Clock, ManualClock, SystemClock};
pub use job::{AnalysisJob, CallContext};
pub use narrative::{AnalysisResult, AnalysisStatus, CallRecord, Narrative};
pub use narrative_id::NarrativeId;
pub use snapshot::{AnalysisType, SentimentSnapshot, TriggerSource};
