use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
pub struct EmbedRequest {
    pub model: String,
    pub version: String,
    pub inputs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct EmbedResponse {
    pub vectors: Vec<Vec<f32>>,
    #[serde(default)]
    pub latency_ms: Option<i64>,
}

/// HTTP client for one embedding model generation. The expected dimension is
/// fixed at construction; every response is validated against it.
#[derive(Clone)]
pub struct InferenceClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    version: String,
    dim: usize,
}

impl InferenceClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        version: impl Into<String>,
        dim: usize,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            model: model.into(),
            version: version.into(),
            dim,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Embed a batch of inputs. Returns vectors aligned to input order plus
    /// the service-reported latency. Any malformed vector fails the whole
    /// batch; a partially valid batch is worse than a retried one.
    pub async fn embed_batch(&self, inputs: &[String]) -> Result<EmbedResponse> {
        if inputs.is_empty() {
            return Ok(EmbedResponse {
                vectors: vec![],
                latency_ms: None,
            });
        }

        let request = EmbedRequest {
            model: self.model.clone(),
            version: self.version.clone(),
            inputs: inputs.to_vec(),
        };

        debug!(count = inputs.len(), model = %self.model, "Embedding batch");

        let response = self.http.post(&self.endpoint).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("embedding service error ({}): {}", status, error_text));
        }

        let parsed: EmbedResponse = response.json().await?;
        self.validate(inputs.len(), &parsed.vectors)?;
        Ok(parsed)
    }

    fn validate(&self, expected_count: usize, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.len() != expected_count {
            return Err(anyhow!(
                "embedding service returned {} vectors for {} inputs",
                vectors.len(),
                expected_count
            ));
        }
        for (i, vector) in vectors.iter().enumerate() {
            if vector.len() != self.dim {
                return Err(anyhow!(
                    "vector {} has dimension {} (expected {})",
                    i,
                    vector.len(),
                    self.dim
                ));
            }
            if vector.iter().any(|c| !c.is_finite()) {
                return Err(anyhow!("vector {} contains non-finite components", i));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(dim: usize) -> InferenceClient {
        InferenceClient::new(
            reqwest::Client::new(),
            "http://localhost:9000/embed",
            "news-embed",
            "2026-05",
            dim,
        )
    }

    #[test]
    fn validate_accepts_well_formed_batch() {
        let c = client(3);
        let vectors = vec![vec![0.1, 0.2, 0.3], vec![1.0, 0.0, -1.0]];
        assert!(c.validate(2, &vectors).is_ok());
    }

    #[test]
    fn validate_rejects_count_mismatch() {
        let c = client(3);
        let vectors = vec![vec![0.1, 0.2, 0.3]];
        assert!(c.validate(2, &vectors).is_err());
    }

    #[test]
    fn validate_rejects_wrong_dimension() {
        let c = client(3);
        let vectors = vec![vec![0.1, 0.2]];
        assert!(c.validate(1, &vectors).is_err());
    }

    #[test]
    fn validate_rejects_non_finite() {
        let c = client(2);
        let vectors = vec![vec![0.1, f32::NAN]];
        assert!(c.validate(1, &vectors).is_err());
        let vectors = vec![vec![0.1, f32::INFINITY]];
        assert!(c.validate(1, &vectors).is_err());
    }

    #[test]
    fn response_parses_without_latency() {
        let parsed: EmbedResponse =
            serde_json::from_str(r#"{"vectors": [[0.5, 0.5]]}"#).unwrap();
        assert_eq!(parsed.vectors.len(), 1);
        assert!(parsed.latency_ms.is_none());
    }

    #[test]
    fn response_parses_with_latency() {
        let parsed: EmbedResponse =
            serde_json::from_str(r#"{"vectors": [], "latency_ms": 42}"#).unwrap();
        assert_eq!(parsed.latency_ms, Some(42));
    }
}
