use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Verdict returned by the moderation classifier. `score` is in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierVerdict {
    pub score: f64,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ClassifyRequest<'a> {
    Text { text: &'a str },
    Image { object_key: &'a str },
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier request timed out")]
    Timeout,
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
}

/// HTTP client for the external AI moderation service.
#[derive(Clone)]
pub struct ClassifierClient {
    client: Client,
    base_url: String,
}

impl ClassifierClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn classify_text(&self, text: &str) -> Result<ClassifierVerdict, ClassifierError> {
        self.classify(&ClassifyRequest::Text { text }).await
    }

    pub async fn classify_image(&self, object_key: &str) -> Result<ClassifierVerdict, ClassifierError> {
        self.classify(&ClassifyRequest::Image { object_key }).await
    }

    async fn classify(&self, request: &ClassifyRequest<'_>) -> Result<ClassifierVerdict, ClassifierError> {
        let response = self
            .client
            .post(format!("{}/v1/classify", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Unavailable(format!("{status}: {body}")));
        }

        let verdict: ClassifierVerdict = response.json().await.map_err(map_transport_error)?;
        tracing::debug!(score = verdict.score, labels = ?verdict.labels, "content classified");
        Ok(verdict)
    }
}

fn map_transport_error(e: reqwest::Error) -> ClassifierError {
    if e.is_timeout() {
        ClassifierError::Timeout
    } else {
        ClassifierError::Unavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_tagged_by_kind() {
        let json = serde_json::to_value(ClassifyRequest::Text { text: "hi" }).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["text"], "hi");
    }

    #[test]
    fn verdict_labels_default_to_empty() {
        let verdict: ClassifierVerdict = serde_json::from_str(r#"{"score":0.25}"#).unwrap();
        assert!(verdict.labels.is_empty());
        assert_eq!(verdict.score, 0.25);
    }
}
