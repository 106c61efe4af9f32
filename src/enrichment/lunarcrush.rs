//! LunarCrush v4 HTTP client.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use super::types::Envelope;
use super::{
    EnrichmentClient, EnrichmentError, RawCreator, RawNews, RawPost, RawTimePoint, Result,
    TopicData,
};
use crate::config::EnrichmentConfig;

/// Client for the LunarCrush public API and its AI report endpoint.
#[derive(Debug, Clone)]
pub struct LunarCrushClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    ai_base_url: String,
    ai_report_timeout: std::time::Duration,
}

impl LunarCrushClient {
    /// Builds a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EnrichmentError::Network`] if the HTTP client cannot be
    /// constructed (TLS backend initialisation).
    pub fn new(config: &EnrichmentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ai_base_url: config.ai_base_url.trim_end_matches('/').to_string(),
            ai_report_timeout: config.ai_report_timeout,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        topic: &str,
        resource: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let topic = topic.to_lowercase();
        let url = topic_url(&self.base_url, &topic, resource)?;
        tracing::debug!(%url, "provider request");

        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &topic, body));
        }

        let body = resp.text().await?;
        let envelope: Envelope<T> = serde_json::from_str(&body)?;
        Ok(envelope.data)
    }

    async fn list<T: DeserializeOwned>(
        &self,
        topic: &str,
        resource: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        Ok(self
            .get::<Vec<T>>(topic, resource, query)
            .await?
            .unwrap_or_default())
    }
}

/// `{base}/topic/{key}/{resource}` with `key` percent-encoded as a single
/// path segment.
fn topic_url(base: &str, key: &str, resource: &str) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| EnrichmentError::Network(format!("invalid base url {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| EnrichmentError::Network(format!("base url {base} cannot take a path")))?
        .pop_if_empty()
        .push("topic")
        .push(key)
        .extend(resource.split('/').filter(|s| !s.is_empty()));
    Ok(url)
}

/// Rejects a topic payload carrying none of the fields the analysis reads.
fn recognised_topic(key: &str, data: Option<TopicData>) -> Result<TopicData> {
    let topic = data.ok_or_else(|| EnrichmentError::NotFound(key.to_string()))?;
    if topic.is_recognised() {
        Ok(topic)
    } else {
        Err(EnrichmentError::Malformed(format!(
            "topic {key} has no recognised fields"
        )))
    }
}

fn status_error(status: StatusCode, topic: &str, body: String) -> EnrichmentError {
    match status {
        StatusCode::PAYMENT_REQUIRED => EnrichmentError::PlanRestricted,
        StatusCode::TOO_MANY_REQUESTS => EnrichmentError::RateLimited,
        StatusCode::NOT_FOUND => EnrichmentError::NotFound(topic.to_string()),
        _ => EnrichmentError::Upstream {
            status: status.as_u16(),
            message: if body.is_empty() {
                status.canonical_reason().unwrap_or_default().to_string()
            } else {
                body
            },
        },
    }
}

#[async_trait]
impl EnrichmentClient for LunarCrushClient {
    async fn topic(&self, key: &str) -> Result<TopicData> {
        let data = self.get::<TopicData>(key, "v1", &[]).await?;
        recognised_topic(key, data)
    }

    async fn time_series(&self, key: &str, days: u32) -> Result<Vec<RawTimePoint>> {
        self.list(
            key,
            "time-series/v1",
            &[("interval", "1d".to_string()), ("data_points", days.to_string())],
        )
        .await
    }

    async fn posts(&self, key: &str, limit: u32) -> Result<Vec<RawPost>> {
        self.list(key, "posts/v1", &[("limit", limit.to_string())])
            .await
    }

    async fn news(&self, key: &str, limit: u32) -> Result<Vec<RawNews>> {
        self.list(key, "news/v1", &[("limit", limit.to_string())])
            .await
    }

    async fn creators(&self, key: &str, limit: u32) -> Result<Vec<RawCreator>> {
        self.list(key, "creators/v1", &[("limit", limit.to_string())])
            .await
    }

    async fn ai_report(&self, key: &str) -> Result<String> {
        let url = topic_url(&self.ai_base_url, key, "")?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .header(
                reqwest::header::ACCEPT,
                "application/json, text/markdown, text/plain",
            )
            .timeout(self.ai_report_timeout)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, key, body));
        }

        let is_json = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        let body = resp.text().await?;
        if is_json {
            let value: serde_json::Value = serde_json::from_str(&body)?;
            return Ok(serde_json::to_string_pretty(&value)?);
        }
        Ok(body)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn decode_topic(body: &str) -> Result<TopicData> {
        let Ok(env) = serde_json::from_str::<Envelope<TopicData>>(body) else {
            panic!("envelope decode failed");
        };
        recognised_topic("bonk", env.data)
    }

    #[test]
    fn unknown_topic_shape_is_rejected() {
        let err = decode_topic(r#"{"data":{"totally":"unrelated","shape":[1,2]}}"#);
        assert!(matches!(err, Err(EnrichmentError::Malformed(_))));
        assert_eq!(
            decode_topic(r#"{"data":null}"#),
            Err(EnrichmentError::NotFound("bonk".to_string()))
        );
        let Ok(topic) = decode_topic(r#"{"data":{"sentiment":64}}"#) else {
            panic!("sentiment-only topic should decode");
        };
        assert_eq!(topic.sentiment, Some(64.0));
    }

    #[test]
    fn topic_key_is_a_single_encoded_segment() {
        let base = "https://lunarcrush.com/api4/public";
        let Ok(url) = topic_url(base, "a/b?c#d", "time-series/v1") else {
            panic!("url build failed");
        };
        assert_eq!(
            url.as_str(),
            "https://lunarcrush.com/api4/public/topic/a%2Fb%3Fc%23d/time-series/v1"
        );
        let Ok(ai) = topic_url("https://lunarcrush.ai", "bonk", "") else {
            panic!("url build failed");
        };
        assert_eq!(ai.as_str(), "https://lunarcrush.ai/topic/bonk");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            status_error(StatusCode::PAYMENT_REQUIRED, "bonk", String::new()),
            EnrichmentError::PlanRestricted
        );
        assert_eq!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "bonk", String::new()),
            EnrichmentError::RateLimited
        );
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, "bonk", String::new()),
            EnrichmentError::NotFound("bonk".to_string())
        );
        let err = status_error(StatusCode::BAD_GATEWAY, "bonk", String::new());
        assert!(err.is_transient());
        assert_eq!(
            err,
            EnrichmentError::Upstream {
                status: 502,
                message: "Bad Gateway".to_string()
            }
        );
    }

    #[test]
    fn base_urls_are_normalised() {
        let config = EnrichmentConfig {
            api_key: "k".to_string(),
            base_url: "https://lunarcrush.com/api4/public/".to_string(),
            ai_base_url: "https://lunarcrush.ai/".to_string(),
            request_timeout: std::time::Duration::from_secs(1),
            ai_report_timeout: std::time::Duration::from_secs(1),
            requests_per_minute: 10,
            requests_per_job: 5,
        };
        let Ok(client) = LunarCrushClient::new(&config) else {
            panic!("client build failed");
        };
        assert_eq!(client.base_url, "https://lunarcrush.com/api4/public");
        assert_eq!(client.ai_base_url, "https://lunarcrush.ai");
    }
}
