// BIEM — External Providers
//
// The engine consumes exactly two external capabilities:
//   • an embedding function  embed(texts) → vectors
//   • an LLM completion      complete(prompt) → text
//
// Both are traits so tests and embedders can swap deterministic
// implementations; the HTTP clients below are the single concrete
// implementation per backend. The embedding client speaks Ollama's
// /api/embed first and falls back to the OpenAI-compatible /v1/embeddings
// shape; the LLM client speaks /v1/chat/completions.

use crate::atoms::error::{MemoryError, MemoryResult};
use async_trait::async_trait;
use log::info;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

// ── Traits ─────────────────────────────────────────────────────────────────

/// Produces dense vectors for texts. Implementations should be
/// deterministic enough for idempotent upserts; if not, callers re-embed on
/// every update.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts. The result has one vector per input, all of
    /// the provider's fixed dimension.
    async fn embed(&self, texts: &[String]) -> MemoryResult<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> MemoryResult<Vec<f32>> {
        let mut vectors = self.embed(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| MemoryError::provider("embedding", "empty batch response"))
    }

    /// The fixed embedding dimension.
    fn dim(&self) -> usize;
}

/// Single-prompt LLM completion, used for entity extraction, sentiment,
/// conflict arbitration, triple extraction, and consolidation. Responses
/// are parsed tolerantly by the callers; no schema forcing is required.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> MemoryResult<String>;
}

// ── HTTP embedding client ──────────────────────────────────────────────────

/// Embedding client for Ollama or OpenAI-compatible embedding APIs.
pub struct HttpEmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
    dim: usize,
}

impl HttpEmbeddingClient {
    pub fn new(base_url: &str, model: &str, dim: usize) -> Self {
        HttpEmbeddingClient {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dim,
        }
    }

    /// Ollama API: POST /api/embed { model, input } → { embeddings: [[f32…]] }
    async fn embed_ollama(&self, texts: &[String]) -> MemoryResult<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let body = json!({
            "model": self.model,
            "input": texts,
        });

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(MemoryError::provider(
                "ollama",
                format!("embed {} — {}", status, text),
            ));
        }

        let v: Value = resp.json().await?;
        let embeddings = v["embeddings"]
            .as_array()
            .ok_or_else(|| MemoryError::provider("ollama", "no 'embeddings' array in response"))?;

        let vectors: Vec<Vec<f32>> = embeddings
            .iter()
            .filter_map(|e| e.as_array())
            .map(|arr| arr.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect())
            .collect();

        if vectors.len() != texts.len() {
            return Err(MemoryError::provider(
                "ollama",
                format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
            ));
        }
        Ok(vectors)
    }

    /// OpenAI-compatible: POST /v1/embeddings { model, input } → { data: [{embedding}] }
    async fn embed_openai(&self, texts: &[String]) -> MemoryResult<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": texts,
        });

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(MemoryError::provider(
                "openai",
                format!("embed {} — {}", status, text),
            ));
        }

        let v: Value = resp.json().await?;
        let data = v["data"]
            .as_array()
            .ok_or_else(|| MemoryError::provider("openai", "no 'data' array in response"))?;

        let vectors: Vec<Vec<f32>> = data
            .iter()
            .filter_map(|d| d["embedding"].as_array())
            .map(|arr| arr.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect())
            .collect();

        if vectors.len() != texts.len() {
            return Err(MemoryError::provider(
                "openai",
                format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
            ));
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> MemoryResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Ollama format first, OpenAI-compatible as fallback.
        let ollama_err = match self.embed_ollama(texts).await {
            Ok(vectors) => return Ok(vectors),
            Err(e) => e,
        };
        match self.embed_openai(texts).await {
            Ok(vectors) => Ok(vectors),
            Err(openai_err) => Err(MemoryError::provider(
                "embedding",
                format!("Ollama: {} | OpenAI: {}", ollama_err, openai_err),
            )),
        }
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

// ── HTTP LLM client ────────────────────────────────────────────────────────

/// OpenAI-compatible chat completion client (non-streaming).
pub struct HttpLlmClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpLlmClient {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        HttpLlmClient {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl LlmProvider for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> MemoryResult<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.0,
        });

        let mut req = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(MemoryError::provider(
                "llm",
                format!("chat {} — {}", status, text),
            ));
        }

        let v: Value = resp.json().await?;
        let content = v["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| MemoryError::provider("llm", "no message content in response"))?;

        info!("[providers] LLM completion: {} chars", content.len());
        Ok(content.to_string())
    }
}

// ── JSON response helpers ──────────────────────────────────────────────────

/// Extract a JSON value from an LLM response, tolerating markdown code
/// fences and surrounding prose. Returns None when nothing parses.
pub fn extract_json_block(response: &str) -> Option<Value> {
    // Fenced block first: ```json … ``` or ``` … ```
    if let Some(start) = response.find("```") {
        let after = &response[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            if let Ok(v) = serde_json::from_str(after[..end].trim()) {
                return Some(v);
            }
        }
    }

    // Raw JSON body.
    if let Ok(v) = serde_json::from_str::<Value>(response.trim()) {
        return Some(v);
    }

    // First '{' to last '}' as a final attempt.
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end > start {
        serde_json::from_str(&response[start..=end]).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json() {
        let resp = "Here you go:\n```json\n{\"is_conflict\": true}\n```\nDone.";
        let v = extract_json_block(resp).unwrap();
        assert_eq!(v["is_conflict"], true);
    }

    #[test]
    fn extracts_unfenced_json() {
        let v = extract_json_block("  {\"a\": 1}  ").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn extracts_embedded_json() {
        let v = extract_json_block("The answer is {\"a\": [1, 2]} as requested").unwrap();
        assert_eq!(v["a"][1], 2);
    }

    #[test]
    fn garbage_yields_none() {
        assert!(extract_json_block("no json here").is_none());
        assert!(extract_json_block("").is_none());
    }

    #[test]
    fn fence_without_json_falls_through_to_braces() {
        let v = extract_json_block("```\nnot json\n``` but {\"x\": 3} works").unwrap();
        assert_eq!(v["x"], 3);
    }
}
