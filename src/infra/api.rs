//! Backend REST API source.
//!
//! Routes, relative to the configured base URL:
//! - `GET /v1/itineraries`
//! - `GET /v1/itineraries/{id}/submissions?scope=&category=`
//! - `GET /v1/hierarchy?scope=`

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::hierarchy::{EntityId, EntityRecord};
use crate::services::source::{HierarchyProvider, SubmissionSource};
use crate::submission::{Category, Itinerary, ItineraryId, Submission};

pub struct ApiSource {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl ApiSource {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let mut request = self.client.get(url).query(query);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send request: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("API returned status {}: {}", status, body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read response: {}", e))?;
        debug!(url, bytes = body.len(), "API response received");

        parse_body(&body)
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))
}

fn scope_query(scope: Option<&EntityId>) -> Vec<(&'static str, String)> {
    scope
        .map(|scope| ("scope", scope.to_string()))
        .into_iter()
        .collect()
}

#[async_trait]
impl SubmissionSource for ApiSource {
    async fn fetch_itineraries(&self) -> Result<Vec<Itinerary>> {
        self.get_json(&self.url("/v1/itineraries"), &[]).await
    }

    async fn fetch_submissions(
        &self,
        itinerary: &ItineraryId,
        scope: Option<&EntityId>,
        category: Option<Category>,
    ) -> Result<Vec<Submission>> {
        let mut query = scope_query(scope);
        if let Some(category) = category {
            query.push(("category", category.to_string()));
        }

        let url = self.url(&format!("/v1/itineraries/{}/submissions", itinerary));
        self.get_json(&url, &query).await
    }
}

#[async_trait]
impl HierarchyProvider for ApiSource {
    async fn fetch_hierarchy(&self, scope: Option<&EntityId>) -> Result<Vec<EntityRecord>> {
        self.get_json(&self.url("/v1/hierarchy"), &scope_query(scope))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::EntityKind;
    use crate::submission::AnswerValue;

    #[test]
    fn test_base_url_trailing_slash() {
        let source = ApiSource::new("https://api.example.org/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(source.url("/v1/itineraries"), "https://api.example.org/v1/itineraries");
    }

    #[test]
    fn test_parse_hierarchy_body() {
        let body = r#"[
            {"id": "r1", "type": "region", "name": "Volta"},
            {"id": "d1", "type": "district", "name": "Ho", "parentId": "r1"}
        ]"#;
        let records: Vec<EntityRecord> = parse_body(body).unwrap();
        assert_eq!(records[1].kind, EntityKind::District);
        assert_eq!(records[1].parent_id, Some(EntityId::from("r1")));
    }

    #[test]
    fn test_parse_submissions_body() {
        let body = r#"[{
            "id": "x1",
            "entityId": "s1",
            "itineraryId": "t1",
            "categoryId": "partners-in-play",
            "answers": {"friendly_tone": 4, "notes": "calm class"},
            "submittedAt": "2024-03-04T08:30:00Z"
        }]"#;
        let submissions: Vec<Submission> = parse_body(body).unwrap();
        assert_eq!(submissions[0].category, Category::PartnersInPlay);
        assert_eq!(
            submissions[0].answer("friendly_tone"),
            Some(&AnswerValue::Number(4.0))
        );
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = parse_body::<Vec<Itinerary>>("not json").unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse response"));
    }
}
