//! Guard data service: typed reads through the query cache plus the two
//! guard mutations.

use crate::api::*;
use crate::cache::{QueryCache, QueryKey, Resource};
use crate::defaults::{aggregate, DefaultsCounts, DefaultsResponse, GuardDefaultsByDate};
use crate::period::QueryRange;
use crate::wizard::GuardFormData;

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Delay between a guard mutation and the guard list invalidation.
pub const LIST_INVALIDATION_DELAY: Duration = Duration::from_millis(500);

/// Defaults of one guard over one range, grouped by duty date.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultsView {
    pub defaults: GuardDefaultsByDate,
    pub counts: DefaultsCounts,
    pub summary: Option<Value>,
}

#[derive(Clone)]
pub struct GuardService {
    api: GuardApiClient,
    cache: Arc<QueryCache>,
    tz: chrono_tz::Tz,
}

impl GuardService {
    pub fn new(api: GuardApiClient, cache: Arc<QueryCache>, tz: chrono_tz::Tz) -> Self {
        Self { api, cache, tz }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn timezone(&self) -> chrono_tz::Tz {
        self.tz
    }

    // --- Reads ---

    pub async fn list_guards(&self, filter: GuardFilter) -> Result<GuardListPage, ApiError> {
        let key = list_key(&filter);
        let api = self.api.clone();
        self.cache
            .fetch(key, move || {
                let api = api.clone();
                let filter = filter.clone();
                async move { api.list_guards(&filter).await }
            })
            .await
    }

    pub async fn guard(&self, id: &str) -> Result<Guard, ApiError> {
        let api = self.api.clone();
        let id = id.to_string();
        self.cache
            .fetch(guard_key(&id), move || {
                let api = api.clone();
                let id = id.clone();
                async move { api.get_guard(&id).await }
            })
            .await
    }

    pub async fn guard_profile(&self, id: &str) -> Result<GuardProfile, ApiError> {
        let api = self.api.clone();
        let id = id.to_string();
        self.cache
            .fetch(profile_key(&id), move || {
                let api = api.clone();
                let id = id.clone();
                async move { api.get_profile(&id).await }
            })
            .await
    }

    pub async fn guard_types(&self) -> Result<Vec<GuardType>, ApiError> {
        let api = self.api.clone();
        self.cache
            .fetch(guard_types_key(), move || {
                let api = api.clone();
                async move { api.guard_types().await }
            })
            .await
    }

    /// Current assignments. A guard without any gets a 404 upstream, which
    /// resolves to an empty list.
    pub async fn assignments(&self, id: &str) -> Result<Vec<Assignment>, ApiError> {
        let api = self.api.clone();
        let id = id.to_string();
        self.cache
            .fetch(assignments_key(&id), move || {
                let api = api.clone();
                let id = id.clone();
                async move {
                    match api.assignments(&id).await {
                        Err(e) if e.is_not_found() => Ok(Vec::new()),
                        other => other,
                    }
                }
            })
            .await
    }

    pub async fn history(&self, id: &str, range: &QueryRange) -> Result<Vec<ActivityRecord>, ApiError> {
        self.activity(Resource::History, id, range).await
    }

    pub async fn incidents(&self, id: &str, range: &QueryRange) -> Result<Vec<ActivityRecord>, ApiError> {
        self.activity(Resource::Incidents, id, range).await
    }

    pub async fn tasks(&self, id: &str, range: &QueryRange) -> Result<Vec<ActivityRecord>, ApiError> {
        self.activity(Resource::Tasks, id, range).await
    }

    async fn activity(
        &self,
        resource: Resource,
        id: &str,
        range: &QueryRange,
    ) -> Result<Vec<ActivityRecord>, ApiError> {
        let key = range_key(resource, id, range);
        let api = self.api.clone();
        let id = id.to_string();
        let range = range.clone();
        self.cache
            .fetch(key, move || {
                let api = api.clone();
                let id = id.clone();
                let range = range.clone();
                async move {
                    match resource {
                        Resource::Incidents => api.incidents(&id, &range).await,
                        Resource::Tasks => api.tasks(&id, &range).await,
                        _ => api.history(&id, &range).await,
                    }
                }
            })
            .await
    }

    /// Defaults over `range`. The raw response is cached; grouping runs on
    /// every read.
    pub async fn defaults(&self, id: &str, range: &QueryRange) -> Result<DefaultsView, ApiError> {
        let key = range_key(Resource::Defaults, id, range);
        let api = self.api.clone();
        let guard_id = id.to_string();
        let query = range.clone();
        let raw: DefaultsResponse = self
            .cache
            .fetch(key, move || {
                let api = api.clone();
                let id = guard_id.clone();
                let query = query.clone();
                async move { api.defaults(&id, Some(&query)).await }
            })
            .await?;

        Ok(self.view_of(raw))
    }

    fn view_of(&self, raw: DefaultsResponse) -> DefaultsView {
        let defaults = aggregate(&raw, &self.tz);
        DefaultsView {
            counts: defaults.counts(),
            defaults,
            summary: raw.summary,
        }
    }

    // --- Cached values ---

    /// Last stored value of `key`, fresh or not. Reads that fail upstream
    /// fall back to it.
    pub async fn cached<T: Clone + Send + Sync + 'static>(&self, key: &QueryKey) -> Option<T> {
        self.cache.get_query_data(key).await
    }

    pub async fn cached_defaults(&self, id: &str, range: &QueryRange) -> Option<DefaultsView> {
        let raw: DefaultsResponse = self.cached(&range_key(Resource::Defaults, id, range)).await?;
        Some(self.view_of(raw))
    }

    /// Refetch a guard regardless of freshness. Its profile and assignments
    /// are invalidated so their next read also goes upstream.
    pub async fn refresh_guard(&self, id: &str) -> Result<Guard, ApiError> {
        self.cache.invalidate(&profile_key(id)).await;
        self.cache.invalidate(&assignments_key(id)).await;
        self.cache
            .refetch(guard_key(id), move || self.api.get_guard(id))
            .await
    }

    // --- Mutations ---

    /// Register a guard from a completed form.
    pub async fn create_guard(&self, form: &GuardFormData) -> Result<Guard, ApiError> {
        let payload = form.to_create_payload();
        let guard = self
            .api
            .create_guard(&payload, form.personal_details.profile_photo.as_ref())
            .await?;
        info!("Registered guard {}", guard.id);
        self.cache.set_query_data(&guard_key(&guard.id), guard.clone()).await;
        self.invalidate_list_later();
        Ok(guard)
    }

    /// Patch a guard optimistically. The cached guard is rolled back if the
    /// backend rejects the change.
    pub async fn update_guard(&self, id: &str, patch: Map<String, Value>) -> Result<Guard, ApiError> {
        let key = guard_key(id);
        let snapshot: Option<Guard> = self.cache.get_query_data(&key).await;

        if let Some(current) = &snapshot {
            match current.patched(&patch) {
                Ok(optimistic) => self.cache.set_query_data(&key, optimistic).await,
                Err(e) => warn!("Cannot apply optimistic patch to guard {}: {}", id, e),
            }
        }

        match self.api.update_guard(id, &patch).await {
            Ok(updated) => {
                self.cache.set_query_data(&key, updated.clone()).await;
                self.invalidate_list_later();
                Ok(updated)
            }
            Err(e) => {
                warn!("Update of guard {} failed, rolling back: {}", id, e);
                match snapshot {
                    Some(previous) => self.cache.set_query_data(&key, previous).await,
                    None => self.cache.remove(&key).await,
                }
                Err(e)
            }
        }
    }

    fn invalidate_list_later(&self) {
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            tokio::time::sleep(LIST_INVALIDATION_DELAY).await;
            cache.invalidate_resource(Resource::GuardList).await;
        });
    }
}

// --- Query keys ---

pub fn list_key(filter: &GuardFilter) -> QueryKey {
    QueryKey::new(
        Resource::GuardList,
        filter
            .query_pairs()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v)),
    )
}

pub fn guard_key(id: &str) -> QueryKey {
    QueryKey::new(Resource::Guard, [id])
}

pub fn profile_key(id: &str) -> QueryKey {
    QueryKey::new(Resource::GuardProfile, [id])
}

pub fn guard_types_key() -> QueryKey {
    QueryKey::new(Resource::GuardTypes, Vec::<String>::new())
}

pub fn assignments_key(id: &str) -> QueryKey {
    QueryKey::new(Resource::Assignments, [id])
}

pub fn range_key(resource: Resource, id: &str, range: &QueryRange) -> QueryKey {
    QueryKey::new(resource, [id, range.from_date.as_str(), range.to_date.as_str()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RetryPolicy;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    #[derive(Clone, Default)]
    struct Hits {
        assignments: Arc<AtomicUsize>,
        guard: Arc<AtomicUsize>,
        list: Arc<AtomicUsize>,
    }

    async fn assignments(State(hits): State<Hits>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
        hits.assignments.fetch_add(1, Ordering::SeqCst);
        if id == "unassigned" {
            return (StatusCode::NOT_FOUND, Json(json!({"message": "no assignments"})));
        }
        (StatusCode::OK, Json(json!([{"id": "a1", "siteName": "Gate 4"}])))
    }

    async fn guard(State(hits): State<Hits>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
        hits.guard.fetch_add(1, Ordering::SeqCst);
        if id == "broken" {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({})));
        }
        (
            StatusCode::OK,
            Json(json!({"id": id, "firstName": "Asha", "lastName": "Rao", "status": "ACTIVE"})),
        )
    }

    async fn patch_guard(Path(id): Path<String>, Json(patch): Json<Value>) -> (StatusCode, Json<Value>) {
        if patch.get("status") == Some(&json!("INVALID")) {
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"message": "bad status"})));
        }
        let mut body = json!({"id": id, "firstName": "Asha", "lastName": "Rao"});
        if let (Value::Object(b), Value::Object(p)) = (&mut body, patch) {
            b.extend(p);
        }
        (StatusCode::OK, Json(body))
    }

    async fn create() -> Json<Value> {
        Json(json!({"id": "g-new", "firstName": "Asha", "lastName": "Rao", "status": "ACTIVE"}))
    }

    async fn list(State(hits): State<Hits>) -> Json<Value> {
        hits.list.fetch_add(1, Ordering::SeqCst);
        Json(json!({"guards": [], "total": 0, "page": 1, "limit": 20}))
    }

    async fn defaults() -> Json<Value> {
        Json(json!({
            "lateDuties": [{
                "id": "l1",
                "dutyDate": "2024-10-16",
                "isLate": true,
                "lateMinutes": 12,
                "actualStartTime": "2024-10-16T03:42:00Z"
            }],
            "alertnessChecks": [{"id": "a1", "dutyDate": "2024-10-17", "passed": true, "score": 90.0, "minimumScore": 60.0}],
            "summary": {"totalDefaults": 1}
        }))
    }

    async fn service_with(hits: Hits) -> GuardService {
        let router = Router::new()
            .route("/guards", get(list).post(create))
            .route("/guards/{id}", get(guard).patch(patch_guard))
            .route("/guards/{id}/assignments", get(assignments))
            .route("/guards/{id}/defaults", get(defaults))
            .with_state(hits);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let api = GuardApiClient::new(&format!("http://{}", addr), None, Duration::from_secs(5)).unwrap();
        let retry = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        };
        GuardService::new(api, Arc::new(QueryCache::new(retry)), chrono_tz::Asia::Kolkata)
    }

    fn range() -> QueryRange {
        QueryRange {
            from_date: "2024-10-13T18:30:00.000Z".into(),
            to_date: "2024-10-20T18:29:59.999Z".into(),
        }
    }

    #[tokio::test]
    async fn test_missing_assignments_resolve_empty_without_retry() {
        let hits = Hits::default();
        let service = service_with(hits.clone()).await;

        let found = assert_ok!(service.assignments("unassigned").await);
        assert!(found.is_empty());
        assert_eq!(hits.assignments.load(Ordering::SeqCst), 1);

        let found = assert_ok!(service.assignments("g1").await);
        assert_eq!(found[0].site_name.as_deref(), Some("Gate 4"));
    }

    #[tokio::test]
    async fn test_server_error_is_retried_then_surfaced() {
        let hits = Hits::default();
        let service = service_with(hits.clone()).await;

        let err = assert_err!(service.guard("broken").await);
        assert_eq!(err.status(), Some(500));
        assert_eq!(hits.guard.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_update_rolls_back() {
        let service = service_with(Hits::default()).await;
        let before = assert_ok!(service.guard("g1").await);

        let mut patch = Map::new();
        patch.insert("status".into(), json!("INVALID"));
        let err = assert_err!(service.update_guard("g1", patch).await);
        assert_eq!(err.status(), Some(422));

        let cached: Option<Guard> = service.cache().get_query_data(&guard_key("g1")).await;
        assert_eq!(cached, Some(before));
    }

    #[tokio::test]
    async fn test_update_stores_response_and_invalidates_list_later() {
        let hits = Hits::default();
        let service = service_with(hits.clone()).await;
        service.guard("g1").await.unwrap();
        service.list_guards(GuardFilter::default()).await.unwrap();

        let mut patch = Map::new();
        patch.insert("status".into(), json!("SUSPENDED"));
        let updated = assert_ok!(service.update_guard("g1", patch).await);
        assert_eq!(updated.status.as_deref(), Some("SUSPENDED"));
        assert_eq!(assert_ok!(service.guard("g1").await), updated);
        assert_eq!(hits.guard.load(Ordering::SeqCst), 1);

        service.list_guards(GuardFilter::default()).await.unwrap();
        assert_eq!(hits.list.load(Ordering::SeqCst), 1);

        tokio::time::sleep(LIST_INVALIDATION_DELAY + Duration::from_millis(200)).await;
        service.list_guards(GuardFilter::default()).await.unwrap();
        assert_eq!(hits.list.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_defaults_are_grouped_by_duty_date() {
        let service = service_with(Hits::default()).await;
        let view = assert_ok!(service.defaults("g1", &range()).await);

        assert_eq!(view.counts.late, 1);
        assert_eq!(view.counts.alertness, 0);
        assert_eq!(view.counts.days_affected, 1);
        assert_eq!(view.summary, Some(json!({"totalDefaults": 1})));
        assert_eq!(view.defaults.len(), 1);
    }

    #[tokio::test]
    async fn test_ids_with_reserved_characters_stay_one_segment() {
        let hits = Hits::default();
        let service = service_with(hits.clone()).await;

        let guard = assert_ok!(service.guard("g1/profile").await);
        assert_eq!(guard.id, "g1/profile");
        assert_eq!(hits.guard.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_bypasses_fresh_entry() {
        let hits = Hits::default();
        let service = service_with(hits.clone()).await;
        assert_ok!(service.guard("g1").await);
        assert_ok!(service.guard("g1").await);
        assert_eq!(hits.guard.load(Ordering::SeqCst), 1);

        let refreshed = assert_ok!(service.refresh_guard("g1").await);
        assert_eq!(refreshed.id, "g1");
        assert_eq!(hits.guard.load(Ordering::SeqCst), 2);

        // The refreshed value is fresh again.
        assert_ok!(service.guard("g1").await);
        assert_eq!(hits.guard.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_created_guard_is_served_from_cache() {
        let hits = Hits::default();
        let service = service_with(hits.clone()).await;

        let created = assert_ok!(service.create_guard(&GuardFormData::default()).await);
        assert_eq!(created.id, "g-new");

        let read = assert_ok!(service.guard("g-new").await);
        assert_eq!(read, created);
        assert_eq!(hits.guard.load(Ordering::SeqCst), 0);
    }
}
