//! HTTP client over the guard backend endpoints.

use super::models::*;
use super::ApiError;
use crate::defaults::DefaultsResponse;
use crate::period::QueryRange;
use crate::wizard::PhotoAttachment;

use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// Thin typed wrapper around the guard REST API.
#[derive(Clone)]
pub struct GuardApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl GuardApiClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::InvalidRequest(format!("bad base URL {:?}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidRequest(format!("bad base URL {:?}", base_url.as_str())));
        }

        Ok(Self { http, base_url, token })
    }

    /// Base URL extended by `segments`, each percent-encoded as one segment.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self.http.request(method, self.url(segments));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        self.send(self.request(Method::GET, segments).query(query)).await
    }

    // --- Guards ---

    pub async fn list_guards(&self, filter: &GuardFilter) -> Result<GuardListPage, ApiError> {
        self.get(&["guards"], &filter.query_pairs()).await
    }

    pub async fn get_guard(&self, id: &str) -> Result<Guard, ApiError> {
        self.get(&["guards", id], &[]).await
    }

    pub async fn get_profile(&self, id: &str) -> Result<GuardProfile, ApiError> {
        self.get(&["guards", id, "profile"], &[]).await
    }

    pub async fn guard_types(&self) -> Result<Vec<GuardType>, ApiError> {
        self.get(&["guard-types"], &[]).await
    }

    /// Register a guard: a JSON `data` part plus an optional `photo` file.
    pub async fn create_guard<P: Serialize>(
        &self,
        payload: &P,
        photo: Option<&PhotoAttachment>,
    ) -> Result<Guard, ApiError> {
        let data = serde_json::to_string(payload)
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let mut form = Form::new().text("data", data);
        if let Some(photo) = photo {
            let part = Part::bytes(photo.bytes.clone())
                .file_name(photo.file_name.clone())
                .mime_str(&photo.content_type)
                .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
            form = form.part("photo", part);
        }
        self.send(self.request(Method::POST, &["guards"]).multipart(form))
            .await
    }

    pub async fn update_guard(&self, id: &str, patch: &Map<String, Value>) -> Result<Guard, ApiError> {
        self.send(self.request(Method::PATCH, &["guards", id]).json(patch))
            .await
    }

    // --- Performance ---

    pub async fn assignments(&self, id: &str) -> Result<Vec<Assignment>, ApiError> {
        self.get(&["guards", id, "assignments"], &[]).await
    }

    pub async fn history(&self, id: &str, range: &QueryRange) -> Result<Vec<ActivityRecord>, ApiError> {
        self.get(&["guards", id, "history"], &range_query(range)).await
    }

    pub async fn incidents(&self, id: &str, range: &QueryRange) -> Result<Vec<ActivityRecord>, ApiError> {
        self.get(&["guards", id, "incidents"], &range_query(range)).await
    }

    pub async fn tasks(&self, id: &str, range: &QueryRange) -> Result<Vec<ActivityRecord>, ApiError> {
        self.get(&["guards", id, "tasks"], &range_query(range)).await
    }

    pub async fn defaults(&self, id: &str, range: Option<&QueryRange>) -> Result<DefaultsResponse, ApiError> {
        let query = range.map(range_query).unwrap_or_default();
        self.get(&["guards", id, "defaults"], &query).await
    }
}

fn range_query(range: &QueryRange) -> Vec<(&'static str, String)> {
    vec![
        ("fromDate", range.from_date.clone()),
        ("toDate", range.to_date.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> GuardApiClient {
        GuardApiClient::new(base, None, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_ids_are_encoded_as_one_segment() {
        let api = client("http://localhost:3000/api");
        assert_eq!(
            api.url(&["guards", "g1/profile"]).as_str(),
            "http://localhost:3000/api/guards/g1%2Fprofile"
        );
        assert_eq!(
            api.url(&["guards", "g1?x=1#f", "tasks"]).as_str(),
            "http://localhost:3000/api/guards/g1%3Fx=1%23f/tasks"
        );
    }

    #[test]
    fn test_trailing_slash_on_base_is_ignored() {
        let api = client("http://localhost:3000/api/");
        assert_eq!(api.url(&["guard-types"]).as_str(), "http://localhost:3000/api/guard-types");
    }

    #[test]
    fn test_unusable_base_url_is_rejected() {
        assert!(GuardApiClient::new("not a url", None, Duration::from_secs(1)).is_err());
        assert!(GuardApiClient::new("mailto:ops@example.com", None, Duration::from_secs(1)).is_err());
    }
}
