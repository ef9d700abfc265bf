use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::models::{ApplicationCategory, Enrichment};

use super::{Classifier, RecordStore};

/// Document store reachable over HTTP: `PUT {base_url}/{collection}/{id}`
/// with the full record as the JSON body.
pub struct HttpRecordStore {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
    request_timeout: Duration,
}

impl HttpRecordStore {
    pub fn new(base_url: impl Into<String>, bearer_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            collection.trim_matches('/'),
            id
        )
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn upsert(&self, collection: &str, id: &str, record: &serde_json::Value) -> Result<()> {
        let mut request = self
            .client
            .put(self.document_url(collection, id))
            .timeout(self.request_timeout)
            .json(record);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("failed to send upsert for {id}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("store rejected upsert for {id} ({status}): {body}");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct AssessmentResponse {
    category: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    suggested_action: String,
}

/// Classifier service taking `{window_title, process_name}` and answering
/// with `{category, confidence, reasoning, suggested_action}`.
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn assess(
        &self,
        window_title: &str,
        process_name: &str,
        timeout: Duration,
    ) -> Result<Enrichment> {
        let body = serde_json::json!({
            "window_title": window_title,
            "process_name": process_name,
        });

        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("failed to send request to classifier")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("classifier error ({status}): {body}");
        }

        let parsed: AssessmentResponse = response
            .json()
            .await
            .context("invalid response format from classifier")?;

        Ok(Enrichment {
            category: ApplicationCategory::from_label(&parsed.category),
            confidence: parsed.confidence.clamp(0.0, 1.0),
            reasoning: parsed.reasoning,
            suggested_action: parsed.suggested_action,
        })
    }
}
