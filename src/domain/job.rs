//! Queue job wire format.
//!
//! [`AnalysisJob`] is the JSON body of every broker message. It lives only
//! in the broker and in the consumer's memory while being processed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::NarrativeId;
use super::snapshot::TriggerSource;
use crate::error::PipelineError;

/// Attempts after which a failing job is dead-lettered.
pub const MAX_RETRIES: u32 = 3;

/// Priority of a token's first analysis.
pub const NEW_TOKEN_PRIORITY: u8 = 7;

/// Priority of re-analyses.
pub const REPEAT_CALL_PRIORITY: u8 = 5;

/// Highest priority the broker honours.
pub const MAX_PRIORITY: u8 = 10;

/// Context of the call that produced the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallContext {
    /// Chat message id.
    pub message_id: String,
    /// Chat channel id.
    pub channel_id: String,
    /// Call time.
    pub timestamp: DateTime<Utc>,
    /// `true` when the narrative already existed.
    pub is_update: bool,
}

/// One unit of enrichment work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisJob {
    /// Primary enrichment key.
    pub token_symbol: String,
    /// Fallback enrichment key and narrative lookup key.
    pub token_address: String,
    /// Narrative to update.
    pub narrative_id: NarrativeId,
    /// Originating call.
    pub call_context: CallContext,
    /// Failed attempts so far.
    #[serde(default)]
    pub retries: u32,
    /// When the job was first enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Broker priority, 0–10.
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Set when an operator moved the job back from the DLQ.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reprocessed_at: Option<DateTime<Utc>>,
    /// What caused the analysis.
    #[serde(default)]
    pub trigger: TriggerSource,
}

const fn default_priority() -> u8 {
    REPEAT_CALL_PRIORITY
}

impl AnalysisJob {
    /// Returns `true` once another failure would exhaust the retry budget.
    #[must_use]
    pub const fn is_exhausted_after(retries: u32) -> bool {
        retries >= MAX_RETRIES
    }

    /// Copy of this job for the next attempt, `retries` incremented by one.
    #[must_use]
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.retries = self.retries.saturating_add(1);
        next
    }

    /// Copy of this job moved back from the DLQ with a fresh retry budget.
    #[must_use]
    pub fn reset_for_reprocess(&self, now: DateTime<Utc>) -> Self {
        let mut reset = self.clone();
        reset.retries = 0;
        reset.reprocessed_at = Some(now);
        reset
    }

    /// Decodes a broker message body.
    ///
    /// # Errors
    ///
    /// [`PipelineError::MalformedJob`] when the body is not a valid job or
    /// its priority is above [`MAX_PRIORITY`].
    pub fn from_slice(body: &[u8]) -> Result<Self, PipelineError> {
        let job: Self = serde_json::from_slice(body)
            .map_err(|e| PipelineError::MalformedJob(e.to_string()))?;
        if job.priority > MAX_PRIORITY {
            return Err(PipelineError::MalformedJob(format!(
                "priority {} above {MAX_PRIORITY}",
                job.priority
            )));
        }
        Ok(job)
    }

    /// Encodes the job as a broker message body.
    ///
    /// # Errors
    ///
    /// Returns the serde error if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn job(symbol: &str, address: &str, priority: u8) -> AnalysisJob {
        AnalysisJob {
            token_symbol: symbol.to_string(),
            token_address: address.to_string(),
            narrative_id: NarrativeId::new(),
            call_context: CallContext {
                message_id: "m-1".to_string(),
                channel_id: "c-1".to_string(),
                timestamp: Utc::now(),
                is_update: false,
            },
            retries: 0,
            enqueued_at: Utc::now(),
            priority,
            reprocessed_at: None,
            trigger: TriggerSource::DiscordCall,
        }
    }

    #[test]
    fn wire_format_uses_camel_case() {
        let Ok(value) = serde_json::to_value(job("BONK", "Dez63", 7)) else {
            panic!("serialization failed");
        };
        for key in [
            "tokenSymbol",
            "tokenAddress",
            "narrativeId",
            "callContext",
            "retries",
            "enqueuedAt",
            "priority",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert!(value.get("reprocessedAt").is_none());
        assert!(value["callContext"].get("isUpdate").is_some());
    }

    #[test]
    fn missing_retries_and_priority_default() {
        let body = serde_json::json!({
            "tokenSymbol": "BONK",
            "tokenAddress": "Dez63",
            "narrativeId": NarrativeId::new(),
            "callContext": {
                "messageId": "m",
                "channelId": "c",
                "timestamp": "2024-01-01T00:00:00Z",
                "isUpdate": true
            },
            "enqueuedAt": "2024-01-01T00:00:00Z"
        });
        let Ok(job) = serde_json::from_value::<AnalysisJob>(body) else {
            panic!("decode failed");
        };
        assert_eq!(job.retries, 0);
        assert_eq!(job.priority, REPEAT_CALL_PRIORITY);
        assert_eq!(job.trigger, TriggerSource::DiscordCall);
    }

    #[test]
    fn next_attempt_increments_by_exactly_one() {
        let first = job("BONK", "Dez63", 7);
        let second = first.next_attempt();
        let third = second.next_attempt();
        assert_eq!(second.retries, 1);
        assert_eq!(third.retries, 2);
        assert!(!AnalysisJob::is_exhausted_after(third.retries));
        assert!(AnalysisJob::is_exhausted_after(third.next_attempt().retries));
    }

    #[test]
    fn reprocess_resets_retries() {
        let now = Utc::now();
        let mut exhausted = job("BONK", "Dez63", 7);
        exhausted.retries = 2;
        let reset = exhausted.reset_for_reprocess(now);
        assert_eq!(reset.retries, 0);
        assert_eq!(reset.reprocessed_at, Some(now));
        assert_eq!(reset.priority, 7);
    }

    #[test]
    fn garbage_body_is_rejected() {
        assert!(AnalysisJob::from_slice(b"{not json").is_err());
        assert!(AnalysisJob::from_slice(br#"{"tokenSymbol": 1}"#).is_err());
    }

    #[test]
    fn priority_above_ceiling_is_malformed() {
        let Ok(top) = job("BONK", "Dez63", MAX_PRIORITY).to_vec() else {
            panic!("serialization failed");
        };
        assert!(AnalysisJob::from_slice(&top).is_ok());

        let Ok(body) = job("BONK", "Dez63", 11).to_vec() else {
            panic!("serialization failed");
        };
        let Err(PipelineError::MalformedJob(reason)) = AnalysisJob::from_slice(&body) else {
            panic!("priority 11 should be rejected");
        };
        assert!(reason.contains("priority 11"));
    }
}
