//! HTTP request handlers.

use super::AppState;
use crate::api::{
    ActivityRecord, ApiError, Assignment, Guard, GuardFilter, GuardListPage, GuardProfile, GuardType,
};
use crate::cache::{QueryKey, QueryState, Resource};
use crate::period::{DateViewState, QueryRange, ViewType};
use crate::service::{
    assignments_key, guard_key, guard_types_key, list_key, profile_key, range_key, DefaultsView,
};
use crate::wizard::{check_step, license_required, DraftEnvelope, GuardFormData, Step, StepRejection};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::RangeInclusive;

/// Calendar years the performance views accept.
pub const SUPPORTED_YEARS: RangeInclusive<i32> = 1900..=9999;

fn status_of(e: &ApiError) -> StatusCode {
    match e {
        ApiError::Status { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ApiError::Transport(_) | ApiError::Decode(_) => StatusCode::BAD_GATEWAY,
    }
}

fn api_error(e: ApiError) -> Response {
    (status_of(&e), e.to_string()).into_response()
}

/// A failed read as an error state carrying whatever the cache last held.
fn read_error<T: Serialize>(e: ApiError, stale_data: Option<T>) -> Response {
    let status = status_of(&e);
    let body: QueryState<T> = QueryState::Error {
        error: e.to_string(),
        stale_data,
    };
    (status, Json(body)).into_response()
}

pub async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================================
// API: Guards
// ============================================================================

pub async fn handle_list_guards(
    State(state): State<AppState>,
    Query(filter): Query<GuardFilter>,
) -> impl IntoResponse {
    let key = list_key(&filter);
    match state.service.list_guards(filter).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => read_error(e, state.service.cached::<GuardListPage>(&key).await),
    }
}

pub async fn handle_get_guard(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.service.guard(&id).await {
        Ok(guard) => Json(guard).into_response(),
        Err(e) => read_error(e, state.service.cached::<Guard>(&guard_key(&id)).await),
    }
}

pub async fn handle_refresh_guard(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.service.refresh_guard(&id).await {
        Ok(guard) => Json(guard).into_response(),
        Err(e) => read_error(e, state.service.cached::<Guard>(&guard_key(&id)).await),
    }
}

pub async fn handle_update_guard(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<Map<String, Value>>,
) -> impl IntoResponse {
    if patch.is_empty() {
        return (StatusCode::BAD_REQUEST, "Empty patch").into_response();
    }
    match state.service.update_guard(&id, patch).await {
        Ok(guard) => Json(guard).into_response(),
        Err(e) => api_error(e),
    }
}

pub async fn handle_get_profile(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.service.guard_profile(&id).await {
        Ok(profile) => Json(profile).into_response(),
        Err(e) => read_error(e, state.service.cached::<GuardProfile>(&profile_key(&id)).await),
    }
}

pub async fn handle_get_assignments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.service.assignments(&id).await {
        Ok(assignments) => Json(assignments).into_response(),
        Err(e) => read_error(
            e,
            state.service.cached::<Vec<Assignment>>(&assignments_key(&id)).await,
        ),
    }
}

pub async fn handle_get_guard_types(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.guard_types().await {
        Ok(types) => Json(types).into_response(),
        Err(e) => read_error(e, state.service.cached::<Vec<GuardType>>(&guard_types_key()).await),
    }
}

// ============================================================================
// API: Performance
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    #[serde(default)]
    pub view: Option<ViewType>,
    /// Selected day, `YYYY-MM-DD`; today in the configured zone when absent.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub specific: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodResponse<T: Serialize> {
    pub range: QueryRange,
    pub label: String,
    pub day_options: Vec<NaiveDate>,
    #[serde(flatten)]
    pub body: T,
}

#[derive(Debug, Serialize)]
pub struct ActivityPage {
    pub records: Vec<ActivityRecord>,
}

/// Resolved picker state: query range, label and drill-down days.
pub struct Period {
    pub range: QueryRange,
    pub label: String,
    pub day_options: Vec<NaiveDate>,
}

impl Period {
    fn respond<T: Serialize>(self, body: T) -> PeriodResponse<T> {
        PeriodResponse {
            range: self.range,
            label: self.label,
            day_options: self.day_options,
            body,
        }
    }
}

/// Resolve the picker state carried by the query string. Dates outside
/// `SUPPORTED_YEARS` are rejected.
fn period_of(state: &AppState, query: &PeriodQuery) -> Result<Period, Response> {
    let tz = state.service.timezone();
    let date = query
        .date
        .unwrap_or_else(|| Utc::now().with_timezone(&tz).date_naive());
    if !SUPPORTED_YEARS.contains(&date.year()) {
        return Err((StatusCode::BAD_REQUEST, format!("Date out of range: {}", date)).into_response());
    }
    let view = DateViewState::from_parts(&tz, query.view.unwrap_or(ViewType::Day), date, query.specific);
    Ok(Period {
        range: view.query_range().to_query(),
        label: view.display_label(),
        day_options: view.day_options(),
    })
}

async fn activity_response(
    state: &AppState,
    resource: Resource,
    id: &str,
    query: &PeriodQuery,
) -> Response {
    let period = match period_of(state, query) {
        Ok(period) => period,
        Err(rejection) => return rejection,
    };
    let result = match resource {
        Resource::Incidents => state.service.incidents(id, &period.range).await,
        Resource::Tasks => state.service.tasks(id, &period.range).await,
        _ => state.service.history(id, &period.range).await,
    };
    match result {
        Ok(records) => Json(period.respond(ActivityPage { records })).into_response(),
        Err(e) => {
            let key: QueryKey = range_key(resource, id, &period.range);
            let stale = state.service.cached::<Vec<ActivityRecord>>(&key).await;
            read_error(e, stale.map(|records| period.respond(ActivityPage { records })))
        }
    }
}

pub async fn handle_get_defaults(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> impl IntoResponse {
    let period = match period_of(&state, &query) {
        Ok(period) => period,
        Err(rejection) => return rejection,
    };
    match state.service.defaults(&id, &period.range).await {
        Ok(view) => Json(period.respond::<DefaultsView>(view)).into_response(),
        Err(e) => {
            let stale = state.service.cached_defaults(&id, &period.range).await;
            read_error(e, stale.map(|view| period.respond(view)))
        }
    }
}

pub async fn handle_get_incidents(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> impl IntoResponse {
    activity_response(&state, Resource::Incidents, &id, &query).await
}

pub async fn handle_get_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> impl IntoResponse {
    activity_response(&state, Resource::Tasks, &id, &query).await
}

pub async fn handle_get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> impl IntoResponse {
    activity_response(&state, Resource::History, &id, &query).await
}

// ============================================================================
// API: Registration
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub step: Step,
    pub valid: bool,
    pub license_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<StepRejection>,
}

pub async fn handle_validate_step(
    State(state): State<AppState>,
    Path(step): Path<u8>,
    Json(form): Json<GuardFormData>,
) -> impl IntoResponse {
    let Some(step) = Step::from_number(step) else {
        return (StatusCode::BAD_REQUEST, "Invalid step").into_response();
    };

    // Licence rules need the type names; validate without them if unavailable.
    let guard_types = match state.service.guard_types().await {
        Ok(types) => types,
        Err(e) => {
            tracing::warn!("Validating without guard types: {}", e);
            Vec::new()
        }
    };

    let rejection = check_step(step, &form, &guard_types).err();
    Json(ValidationResponse {
        step,
        valid: rejection.is_none(),
        license_required: license_required(&form.employment_details.guard_type_id, &guard_types),
        rejection,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveDraftRequest {
    pub data: GuardFormData,
    pub current_step: Step,
}

pub async fn handle_get_draft(State(state): State<AppState>) -> impl IntoResponse {
    match state.drafts.load_draft() {
        Ok(draft) => Json(draft).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_save_draft(
    State(state): State<AppState>,
    Json(req): Json<SaveDraftRequest>,
) -> impl IntoResponse {
    let envelope = DraftEnvelope::new(req.data, req.current_step);
    match state.drafts.save_draft(&envelope) {
        Ok(()) => Json(envelope).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_delete_draft(State(state): State<AppState>) -> impl IntoResponse {
    match state.drafts.clear_draft() {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use crate::web::Server;
    use crate::api::{Guard, GuardApiClient};
    use crate::cache::{QueryCache, RetryPolicy};
    use crate::config::ServerConfig;
    use crate::service::{guard_key, GuardService};
    use crate::wizard::DraftStore;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    async fn spawn_server() -> String {
        spawn_server_with_service().await.0
    }

    async fn spawn_server_with_service() -> (String, Arc<GuardService>) {
        // Nothing listens on port 1, so backend calls fail fast.
        let api = GuardApiClient::new("http://127.0.0.1:1", None, Duration::from_secs(2)).unwrap();
        let cache = Arc::new(QueryCache::new(RetryPolicy::none()));
        let service = Arc::new(GuardService::new(api, cache, chrono_tz::Asia::Kolkata));
        let drafts = Arc::new(DraftStore::in_memory().unwrap());
        let router = Server::new(ServerConfig::default(), Arc::clone(&service), drafts).routes();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{}", addr), service)
    }

    #[tokio::test]
    async fn test_draft_lifecycle() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();
        let url = format!("{}/api/registration/draft", base);

        let saved = client
            .put(&url)
            .json(&json!({"data": {"personalDetails": {"firstName": "Asha"}}, "currentStep": 2}))
            .send()
            .await
            .unwrap();
        assert!(saved.status().is_success());

        let draft: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
        assert_eq!(draft["currentStep"], 2);
        assert_eq!(draft["data"]["personalDetails"]["firstName"], "Asha");

        let deleted = client.delete(&url).send().await.unwrap();
        assert_eq!(deleted.status(), reqwest::StatusCode::NO_CONTENT);
        let draft: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
        assert!(draft.is_null());
    }

    #[tokio::test]
    async fn test_validate_reports_field_errors() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();

        let body: Value = client
            .post(format!("{}/api/registration/validate/2", base))
            .json(&json!({"contactDetails": {"mobileNumber": "12345"}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["valid"], false);
        assert_eq!(body["rejection"]["kind"], "invalid");
        assert_eq!(
            body["rejection"]["detail"]["contactDetails.mobileNumber"],
            "Mobile number must be 10 digits"
        );

        let bad = client
            .post(format!("{}/api/registration/validate/9", base))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unreachable_backend_maps_to_bad_gateway() {
        let base = spawn_server().await;
        let response = reqwest::get(format!("{}/api/guards/g1?view=week&date=2024-10-16", base))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);

        let health: Value = reqwest::get(format!("{}/health", base)).await.unwrap().json().await.unwrap();
        assert_eq!(health["status"], "ok");
    }

    #[tokio::test]
    async fn test_failed_read_carries_stale_data() {
        let (base, service) = spawn_server_with_service().await;
        let key = guard_key("g1");
        let cached = Guard {
            id: "g1".into(),
            first_name: "Asha".into(),
            ..Guard::default()
        };
        service.cache().set_query_data(&key, cached).await;
        service.cache().invalidate(&key).await;

        let response = reqwest::get(format!("{}/api/guards/g1", base)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["staleData"]["id"], "g1");
        assert_eq!(body["staleData"]["firstName"], "Asha");

        let refreshed = reqwest::Client::new()
            .post(format!("{}/api/guards/g1/refresh", base))
            .send()
            .await
            .unwrap();
        assert_eq!(refreshed.status(), reqwest::StatusCode::BAD_GATEWAY);
        let body: Value = refreshed.json().await.unwrap();
        assert_eq!(body["staleData"]["id"], "g1");
    }

    #[tokio::test]
    async fn test_failed_read_without_cache_has_null_stale_data() {
        let base = spawn_server().await;
        let body: Value = reqwest::get(format!("{}/api/guards/g2/profile", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "error");
        assert!(body["staleData"].is_null());
    }

    #[tokio::test]
    async fn test_dates_outside_supported_years_are_rejected() {
        let base = spawn_server().await;
        for date in ["%2B262142-12-31", "1899-12-31"] {
            let response = reqwest::get(format!("{}/api/guards/g1/defaults?view=week&date={}", base, date))
                .await
                .unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST, "{}", date);
        }

        let response = reqwest::get(format!("{}/api/guards/g1/tasks?view=month&date=9999-12-31", base))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    }
}
