//! Thin HTTP client for the rollcalld API.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

pub struct DaemonClient {
    base_url: String,
    client: reqwest::Client,
}

impl DaemonClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        debug!(%url, "GET");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to reach rollcalld at {}", self.base_url))?;
        read_json(response).await
    }

    pub async fn post(&self, path: &str, body: Option<Value>) -> Result<Value> {
        let url = self.url(path);
        debug!(%url, "POST");
        let mut request = self.client.post(&url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("failed to reach rollcalld at {}", self.base_url))?;
        read_json(response).await
    }

    /// Upload a registration photo for the student with database id `id`.
    pub async fn upload_photo(&self, id: i64, photo: &Path) -> Result<Value> {
        let bytes = tokio::fs::read(photo)
            .await
            .with_context(|| format!("failed to read {}", photo.display()))?;
        let file_name = photo
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "photo.jpg".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("photo", part);

        let response = self
            .client
            .post(self.url(&format!("/api/students/{id}/face")))
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("failed to reach rollcalld at {}", self.base_url))?;
        read_json(response).await
    }

    /// Resolve an external student identifier ("S001") to its database id.
    pub async fn student_db_id(&self, student_id: &str) -> Result<i64> {
        let listing = self.get("/api/students").await?;
        listing["students"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|s| s["student_id"] == student_id)
            .and_then(|s| s["id"].as_i64())
            .with_context(|| format!("student not found: {student_id}"))
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .context("failed to parse daemon response")?;
    if !status.is_success() {
        let message = body["error"].as_str().unwrap_or("unknown error");
        anyhow::bail!("{status}: {message}");
    }
    Ok(body)
}
