use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, Shared};
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::domain::{DomainError, Endpoint, EndpointPolicy, ModelOption};
use crate::ports::HttpClient;

type CatalogFuture = Shared<BoxFuture<'static, Result<Arc<Vec<ModelOption>>, DomainError>>>;

/// What the caller should do with its selected model after a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionUpdate {
    Keep,
    /// The selected id is not offered by the endpoint.
    Clear,
}

/// View of the catalog for the most recently requested endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogEntry {
    pub models: Arc<Vec<ModelOption>>,
    pub loading: bool,
    pub error: Option<String>,
}

struct InFlight {
    id: u64,
    key: String,
    token: CancellationToken,
    future: CatalogFuture,
}

#[derive(Default)]
struct ResolverState {
    /// Key of the last endpoint asked for. Only its results are applied.
    latest: Option<String>,
    inflight: Option<InFlight>,
    cache: HashMap<String, Arc<Vec<ModelOption>>>,
    error: Option<String>,
}

/// Loads model lists from `{base_url}/models`.
///
/// Endpoints are normalized before use, so equivalent spellings share one
/// cache entry and one request. Insecure endpoints are rejected before any
/// request. A response for an endpoint other than the latest one asked for
/// is discarded.
pub struct CatalogResolver {
    http: Arc<dyn HttpClient>,
    policy: EndpointPolicy,
    api_key: Option<Zeroizing<String>>,
    state: Arc<Mutex<ResolverState>>,
    next_fetch: AtomicU64,
}

impl CatalogResolver {
    pub fn new(
        http: Arc<dyn HttpClient>,
        policy: EndpointPolicy,
        api_key: Option<Zeroizing<String>>,
    ) -> Self {
        Self {
            http,
            policy,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            state: Arc::new(Mutex::new(ResolverState::default())),
            next_fetch: AtomicU64::new(1),
        }
    }

    /// Models offered by `base_url`, from cache or a single shared request.
    ///
    /// `auth_token` overrides the configured API key for this request.
    /// Resolves to `Superseded` if another endpoint was requested before
    /// this one answered.
    pub async fn load_models(
        &self,
        base_url: &str,
        auth_token: Option<&str>,
    ) -> Result<Arc<Vec<ModelOption>>, DomainError> {
        let endpoint = self.checked(base_url)?;
        self.begin(&endpoint, auth_token, true).await
    }

    /// Fetch `base_url` again, bypassing the cache. The cached list is
    /// kept if the fetch fails.
    pub async fn reload_models(
        &self,
        base_url: &str,
        auth_token: Option<&str>,
    ) -> Result<Arc<Vec<ModelOption>>, DomainError> {
        let endpoint = self.checked(base_url)?;
        self.begin(&endpoint, auth_token, false).await
    }

    /// Load and tell the caller whether `selected` is still offered.
    pub async fn load_and_reconcile(
        &self,
        base_url: &str,
        auth_token: Option<&str>,
        selected: &str,
    ) -> Result<(Arc<Vec<ModelOption>>, SelectionUpdate), DomainError> {
        let models = self.load_models(base_url, auth_token).await?;
        let update = reconcile_selection(&models, selected);
        if update == SelectionUpdate::Clear {
            info!(selected, "Selected model not offered by endpoint, clearing");
        }
        Ok((models, update))
    }

    /// Cached list for `base_url`, without any request.
    pub fn cached(&self, base_url: &str) -> Option<Arc<Vec<ModelOption>>> {
        let endpoint = Endpoint::parse(base_url).ok()?;
        self.state.lock().cache.get(endpoint.key()).cloned()
    }

    /// State for the latest requested endpoint.
    pub fn entry(&self) -> CatalogEntry {
        let state = self.state.lock();
        let Some(latest) = state.latest.as_deref() else {
            return CatalogEntry::default();
        };
        CatalogEntry {
            models: state.cache.get(latest).cloned().unwrap_or_default(),
            loading: state
                .inflight
                .as_ref()
                .is_some_and(|inflight| inflight.key == latest),
            error: state.error.clone(),
        }
    }

    fn checked(&self, base_url: &str) -> Result<Endpoint, DomainError> {
        let endpoint = Endpoint::parse(base_url)?;
        if let Err(e) = self.policy.check(&endpoint) {
            warn!(endpoint = %endpoint, "Refusing insecure catalog endpoint");
            return Err(e);
        }
        Ok(endpoint)
    }

    fn begin(&self, endpoint: &Endpoint, auth_token: Option<&str>, use_cache: bool) -> CatalogFuture {
        let key = endpoint.key().to_string();
        let mut state = self.state.lock();
        state.latest = Some(key.clone());

        if state.inflight.as_ref().is_some_and(|f| f.key != key) {
            if let Some(stale) = state.inflight.take() {
                debug!(endpoint = %stale.key, "Catalog fetch superseded");
                stale.token.cancel();
            }
        }

        let cached = state.cache.get(&key).cloned().filter(|_| use_cache);
        if let Some(models) = cached {
            debug!(endpoint = %key, "Catalog cache hit");
            state.error = None;
            return future::ready(Ok(models)).boxed().shared();
        }
        if let Some(inflight) = state.inflight.as_ref() {
            debug!(endpoint = %key, "Joining in-flight catalog fetch");
            return inflight.future.clone();
        }

        let bearer = auth_token
            .filter(|token| !token.trim().is_empty())
            .map(|token| Zeroizing::new(token.to_string()))
            .or_else(|| self.api_key.clone());
        let id = self.next_fetch.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        let future = self
            .fetch(id, endpoint, bearer, token.clone())
            .boxed()
            .shared();

        state.error = None;
        state.inflight = Some(InFlight {
            id,
            key,
            token,
            future: future.clone(),
        });
        future
    }

    fn fetch(
        &self,
        id: u64,
        endpoint: &Endpoint,
        bearer: Option<Zeroizing<String>>,
        token: CancellationToken,
    ) -> impl std::future::Future<Output = Result<Arc<Vec<ModelOption>>, DomainError>> + Send + 'static
    {
        let http = self.http.clone();
        let weak = Arc::downgrade(&self.state);
        let key = endpoint.key().to_string();
        let url = endpoint.models_url();

        async move {
            debug!(endpoint = %key, "Catalog fetch started");
            let body = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(DomainError::Superseded { key });
                }
                body = http.get(&url, bearer.as_ref().map(|b| b.as_str())) => body,
            };
            let result = body.and_then(|body| parse_models(&body)).map(Arc::new);

            let Some(state) = weak.upgrade() else {
                return result;
            };
            let mut state = state.lock();
            if state.inflight.as_ref().is_some_and(|f| f.id == id) {
                state.inflight = None;
            }
            if state.latest.as_deref() != Some(key.as_str()) {
                debug!(endpoint = %key, "Discarding stale catalog response");
                return Err(DomainError::Superseded { key });
            }

            match &result {
                Ok(models) => {
                    info!(endpoint = %key, count = models.len(), "Catalog loaded");
                    state.cache.insert(key, models.clone());
                    state.error = None;
                }
                Err(e) => {
                    warn!(endpoint = %key, error = %e, "Catalog fetch failed");
                    state.error = Some(e.to_string());
                }
            }
            result
        }
    }
}

impl std::fmt::Debug for CatalogResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CatalogResolver")
            .field("policy", &self.policy)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("latest", &state.latest)
            .field("cached", &state.cache.len())
            .finish()
    }
}

/// Parse a `{"data": [...]}` or `{"models": [...]}` listing.
///
/// Entries may be objects with `id` and/or `name`, or bare strings.
/// Entries with neither are skipped; repeated ids keep the first.
pub fn parse_models(body: &str) -> Result<Vec<ModelOption>, DomainError> {
    let value: Value = serde_json::from_str(body)?;
    let entries = ["data", "models"]
        .iter()
        .find_map(|field| value.get(*field).and_then(Value::as_array))
        .ok_or_else(|| {
            DomainError::Serialization("expected a `data` or `models` array".to_string())
        })?;

    let mut seen = HashSet::new();
    let mut models = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(option) = model_option(entry) else {
            continue;
        };
        if seen.insert(option.id.clone()) {
            models.push(option);
        }
    }
    Ok(models)
}

fn model_option(entry: &Value) -> Option<ModelOption> {
    let text = |field: &str| {
        entry
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    if let Some(id) = entry.as_str().map(str::trim).filter(|s| !s.is_empty()) {
        return Some(ModelOption {
            id: id.to_string(),
            label: id.to_string(),
            owned_by: None,
        });
    }

    let id = text("id");
    let name = text("name");
    let id = id.or_else(|| name.clone())?;
    Some(ModelOption {
        label: name.unwrap_or_else(|| id.clone()),
        id,
        owned_by: text("owned_by"),
    })
}

/// `Clear` when a non-empty selection is missing from `models`.
pub fn reconcile_selection(models: &[ModelOption], selected: &str) -> SelectionUpdate {
    if selected.is_empty() || models.iter().any(|m| m.id == selected) {
        SelectionUpdate::Keep
    } else {
        SelectionUpdate::Clear
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeHttp;

    const A: &str = "https://a.example.com/v1";
    const B: &str = "https://b.example.com/v1";

    fn resolver(http: Arc<FakeHttp>) -> CatalogResolver {
        CatalogResolver::new(http, EndpointPolicy::default(), None)
    }

    fn ids(models: &[ModelOption]) -> Vec<&str> {
        models.iter().map(|m| m.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_stale_response_never_wins() {
        let http = FakeHttp::new();
        let a_gate = http.gate("https://a.example.com/v1/models");
        http.respond("https://b.example.com/v1/models", r#"{"data":[{"id":"b-1"}]}"#);
        let resolver = Arc::new(resolver(http.clone()));

        let a = tokio::spawn({
            let resolver = resolver.clone();
            async move { resolver.load_models(A, None).await }
        });
        while http.call_count() == 0 {
            tokio::task::yield_now().await;
        }

        let b = resolver.load_models(B, None).await.unwrap();
        assert_eq!(ids(&b), vec!["b-1"]);

        // A answers after B.
        let _ = a_gate.send(Ok(r#"{"data":[{"id":"a-1"}]}"#.to_string()));
        let a = a.await.unwrap().unwrap_err();
        assert!(a.is_race_resolved());

        let entry = resolver.entry();
        assert_eq!(ids(&entry.models), vec!["b-1"]);
        assert!(!entry.loading);
        assert!(resolver.cached(A).is_none());
    }

    #[tokio::test]
    async fn test_cache_hit_abandons_stale_fetch() {
        let http = FakeHttp::new();
        http.respond("https://b.example.com/v1/models", r#"{"data":[{"id":"b-1"}]}"#);
        let resolver = Arc::new(resolver(http.clone()));
        resolver.load_models(B, None).await.unwrap();

        let _a_gate = http.gate("https://a.example.com/v1/models");
        let a = tokio::spawn({
            let resolver = resolver.clone();
            async move { resolver.load_models(A, None).await }
        });
        while http.call_count() < 2 {
            tokio::task::yield_now().await;
        }
        assert!(resolver.entry().loading);

        let b = resolver.load_models(B, None).await.unwrap();
        assert_eq!(ids(&b), vec!["b-1"]);
        assert_eq!(http.call_count(), 2);

        // A's gate is never answered; the fetch must end on its own.
        let a = tokio::time::timeout(std::time::Duration::from_secs(1), a)
            .await
            .expect("stale fetch still running")
            .unwrap()
            .unwrap_err();
        assert!(a.is_race_resolved());
        assert!(!resolver.entry().loading);
        assert!(resolver.cached(A).is_none());
    }

    #[tokio::test]
    async fn test_insecure_endpoint_rejected_without_request() {
        let http = FakeHttp::new();
        let resolver = resolver(http.clone());

        let err = resolver
            .load_models("http://api.example.com/v1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InsecureEndpoint { .. }));
        assert_eq!(http.call_count(), 0);

        let strict = CatalogResolver::new(
            http.clone(),
            EndpointPolicy {
                allow_local_network: false,
            },
            None,
        );
        assert!(strict.load_models("http://192.168.1.5:8080", None).await.is_err());
        assert_eq!(http.call_count(), 0);
    }

    #[tokio::test]
    async fn test_local_endpoints_allowed_over_http() {
        let http = FakeHttp::new();
        http.respond("http://localhost:11434/v1/models", r#"{"models":[{"name":"llama3"}]}"#);
        let resolver = resolver(http.clone());

        let models = resolver.load_models("http://localhost:11434/v1", None).await.unwrap();
        assert_eq!(ids(&models), vec!["llama3"]);
    }

    #[tokio::test]
    async fn test_equivalent_urls_share_cache() {
        let http = FakeHttp::new();
        http.respond("https://a.example.com/v1/models", r#"{"data":[{"id":"m"}]}"#);
        let resolver = resolver(http.clone());

        resolver.load_models("https://A.example.com:443/v1/", None).await.unwrap();
        resolver.load_models(A, None).await.unwrap();
        assert_eq!(http.call_count(), 1);
        assert!(resolver.cached("https://a.example.com/v1/").is_some());

        resolver.reload_models(A, None).await.unwrap();
        assert_eq!(http.call_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_request() {
        let http = FakeHttp::new();
        let gate = http.gate("https://a.example.com/v1/models");
        let resolver = resolver(http.clone());

        let first = resolver.load_models(A, None);
        let second = resolver.load_models("https://a.example.com/v1/", None);
        let _ = gate.send(Ok(r#"{"data":[{"id":"m"}]}"#.to_string()));
        let (first, second) = tokio::join!(first, second);
        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
        assert_eq!(http.call_count(), 1);
    }

    #[tokio::test]
    async fn test_bearer_token() {
        let http = FakeHttp::new();
        http.respond("https://a.example.com/v1/models", r#"{"data":[]}"#);
        http.respond("https://b.example.com/v1/models", r#"{"data":[]}"#);
        let resolver = CatalogResolver::new(
            http.clone(),
            EndpointPolicy::default(),
            Some(Zeroizing::new("sk-config".to_string())),
        );

        resolver.load_models(A, None).await.unwrap();
        resolver.load_models(B, Some("sk-override")).await.unwrap();

        let calls = http.calls.lock();
        assert_eq!(calls[0].1.as_deref(), Some("sk-config"));
        assert_eq!(calls[1].1.as_deref(), Some("sk-override"));
    }

    #[tokio::test]
    async fn test_failure_keeps_cache_and_reports_error() {
        let http = FakeHttp::new();
        http.respond("https://a.example.com/v1/models", r#"{"data":[{"id":"m"}]}"#);
        let resolver = resolver(http.clone());
        resolver.load_models(A, None).await.unwrap();

        http.fail(
            "https://a.example.com/v1/models",
            DomainError::HttpRequest("HTTP 503".into()),
        );
        assert!(resolver.reload_models(A, None).await.is_err());
        let entry = resolver.entry();
        assert!(entry.error.unwrap().contains("503"));
        assert_eq!(ids(&entry.models), vec!["m"]);

        http.respond("https://b.example.com/v1/models", r#"{"data":[{"id":"b"}]}"#);
        resolver.load_models(B, None).await.unwrap();
        assert!(resolver.entry().error.is_none());
    }

    #[tokio::test]
    async fn test_selection_cleared_when_missing() {
        let http = FakeHttp::new();
        http.respond("https://a.example.com/v1/models", r#"{"data":[{"id":"gpt-4o"}]}"#);
        let resolver = resolver(http);

        let (_, update) = resolver.load_and_reconcile(A, None, "gpt-4o").await.unwrap();
        assert_eq!(update, SelectionUpdate::Keep);
        let (_, update) = resolver.load_and_reconcile(A, None, "gone").await.unwrap();
        assert_eq!(update, SelectionUpdate::Clear);
        let (_, update) = resolver.load_and_reconcile(A, None, "").await.unwrap();
        assert_eq!(update, SelectionUpdate::Keep);
    }

    #[test]
    fn test_parse_models() {
        let body = r#"{"data": [
            {"id": "gpt-4o", "owned_by": "openai"},
            {"name": "llama3"},
            {"id": "whisper-1", "name": "Whisper"},
            {"object": "model"},
            "plain",
            {"id": "gpt-4o"}
        ]}"#;
        let models = parse_models(body).unwrap();
        assert_eq!(ids(&models), vec!["gpt-4o", "llama3", "whisper-1", "plain"]);
        assert_eq!(models[0].owned_by.as_deref(), Some("openai"));
        assert_eq!(models[2].label, "Whisper");

        assert!(parse_models(r#"{"object": "list"}"#).is_err());
        assert!(parse_models("not json").is_err());
    }
}
