use axum::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::domain::face::TargetPerson;
use crate::server;

use super::error::{Error, Result};

/// One face-creation call, pixel coordinates as the target API expects.
#[derive(Debug, Clone)]
pub struct CreateFaceCall {
    pub asset_id: String,
    pub person_id: String,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    pub image_width: i64,
    pub image_height: i64,
}

/// The mutating surface of the target photo service. The executor talks
/// through this trait so batches can run against a scripted fake in tests.
#[async_trait]
pub trait TargetService: Send + Sync {
    async fn ping(&self) -> Result<()>;
    /// Every person/cluster, named or not (empty name = unnamed cluster).
    async fn get_people(&self) -> Result<Vec<TargetPerson>>;
    async fn create_person(&self, name: &str) -> Result<TargetPerson>;
    async fn rename_person(&self, person_id: &str, name: &str) -> Result<()>;
    async fn reassign_face(&self, face_id: &str, person_id: &str) -> Result<()>;
    async fn create_face(&self, call: &CreateFaceCall) -> Result<()>;
}

pub struct TargetApiClient {
    client: Client,
}

impl TargetApiClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Base URL and api key are read per call so runtime config overrides
    /// take effect without rebuilding the client.
    async fn base(&self) -> Result<(String, String)> {
        let settings = server::get_settings().await;
        let url = settings.target_api_url.trim_end_matches('/').to_string();
        if url.is_empty() {
            return Err(Error::TargetApiNotConfigured);
        }
        Ok((url, settings.target_api_key))
    }

    async fn expect_status(response: reqwest::Response, expected: u16) -> Result<reqwest::Response> {
        let status = response.status().as_u16();
        if status != expected {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::TargetApiStatus(
                status,
                text.chars().take(200).collect(),
            ));
        }
        Ok(response)
    }
}

impl Default for TargetApiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetService for TargetApiClient {
    async fn ping(&self) -> Result<()> {
        let (url, key) = self.base().await?;
        let response = self
            .client
            .get(format!("{}/api/server/ping", url))
            .header("x-api-key", key)
            .send()
            .await?;
        Self::expect_status(response, 200).await?;
        Ok(())
    }

    async fn get_people(&self) -> Result<Vec<TargetPerson>> {
        let (url, key) = self.base().await?;
        let response = self
            .client
            .get(format!("{}/api/people", url))
            .query(&[("withHidden", "true")])
            .header("x-api-key", key)
            .send()
            .await?;
        let response = Self::expect_status(response, 200).await?;
        let body: Value = response.json().await?;
        let people = body
            .get("people")
            .and_then(|p| p.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(people
            .iter()
            .filter_map(|p| {
                Some(TargetPerson {
                    id: p.get("id")?.as_str()?.to_string(),
                    name: p.get("name").and_then(|n| n.as_str()).unwrap_or("").to_string(),
                })
            })
            .collect())
    }

    async fn create_person(&self, name: &str) -> Result<TargetPerson> {
        let (url, key) = self.base().await?;
        let response = self
            .client
            .post(format!("{}/api/people", url))
            .header("x-api-key", key)
            .json(&json!({ "name": name }))
            .send()
            .await?;
        let response = Self::expect_status(response, 201).await?;
        let body: Value = response.json().await?;
        let id = body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Other("person creation returned no id".to_string()))?;
        Ok(TargetPerson {
            id: id.to_string(),
            name: name.to_string(),
        })
    }

    async fn rename_person(&self, person_id: &str, name: &str) -> Result<()> {
        let (url, key) = self.base().await?;
        let response = self
            .client
            .put(format!("{}/api/people/{}", url, person_id))
            .header("x-api-key", key)
            .json(&json!({ "name": name }))
            .send()
            .await?;
        Self::expect_status(response, 200).await?;
        Ok(())
    }

    async fn reassign_face(&self, face_id: &str, person_id: &str) -> Result<()> {
        let (url, key) = self.base().await?;
        let response = self
            .client
            .put(format!("{}/api/faces/{}", url, person_id))
            .header("x-api-key", key)
            .json(&json!({ "id": face_id }))
            .send()
            .await?;
        Self::expect_status(response, 200).await?;
        Ok(())
    }

    async fn create_face(&self, call: &CreateFaceCall) -> Result<()> {
        let (url, key) = self.base().await?;
        let response = self
            .client
            .post(format!("{}/api/faces", url))
            .header("x-api-key", key)
            .json(&json!({
                "assetId": call.asset_id,
                "personId": call.person_id,
                "x": call.x,
                "y": call.y,
                "width": call.width,
                "height": call.height,
                "imageWidth": call.image_width,
                "imageHeight": call.image_height,
            }))
            .send()
            .await?;
        Self::expect_status(response, 201).await?;
        Ok(())
    }
}
