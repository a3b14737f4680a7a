//! Offline resource layer: request routing, install-time precache and
//! activation-time sweep of stale cache versions.
//!
//! Every outbound request is routed to one of three policies:
//! - API traffic always goes to the network. When the network is down the
//!   caller gets a normal `200` JSON body `{success: false, mensaje}` instead
//!   of a transport error, so the word-source client sees a plain rejection.
//! - Cross-origin assets are served cache-first from `external@<version>`,
//!   and fresh `200` responses are stored on the way through.
//! - Same-origin assets are served cache-first from `primary@<version>`,
//!   which `install` fills from the precache manifest.
//!
//! Changing the version string is the only way to invalidate cached assets:
//! `activate` deletes every store whose name does not match the current
//! version.

use std::cell::Cell;

use futures::future::{join_all, try_join_all};
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::{Origin, Url};

use crate::cache::{store_name, CacheStorage, CacheStore};
use crate::config::{
    API_HOST_PATTERN, API_PATH_MARKER, CACHE_VERSION, EXTERNAL_CACHE_PREFIX,
    EXTERNAL_PRECACHE_URLS, OFFLINE_MESSAGE, PRECACHE_URLS, PRIMARY_CACHE_PREFIX,
};
use crate::error::{CacheError, ConfigError, FetchError};
use crate::net::{Fetch, ResourceRequest, ResourceResponse};

/// Raw, deserializable settings for the offline layer. Every field falls
/// back to the constants in [`crate::config`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineSettings {
    pub version: String,
    pub primary_prefix: String,
    pub external_prefix: String,
    pub precache: Vec<String>,
    pub external_precache: Vec<String>,
    pub api_path_marker: String,
    pub api_host_pattern: String,
    pub offline_message: String,
}

impl Default for OfflineSettings {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION.to_string(),
            primary_prefix: PRIMARY_CACHE_PREFIX.to_string(),
            external_prefix: EXTERNAL_CACHE_PREFIX.to_string(),
            precache: PRECACHE_URLS.iter().map(|s| s.to_string()).collect(),
            external_precache: EXTERNAL_PRECACHE_URLS.iter().map(|s| s.to_string()).collect(),
            api_path_marker: API_PATH_MARKER.to_string(),
            api_host_pattern: API_HOST_PATTERN.to_string(),
            offline_message: OFFLINE_MESSAGE.to_string(),
        }
    }
}

impl OfflineSettings {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Checked offline configuration for one application origin.
#[derive(Debug, Clone)]
pub struct OfflineConfig {
    version: String,
    origin: Origin,
    primary_store: String,
    external_store: String,
    precache: Vec<Url>,
    external_precache: Vec<Url>,
    api_path_marker: String,
    api_host: Regex,
    offline_message: String,
}

/// Which fetch policy a request falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Api,
    CrossOrigin,
    SameOrigin,
}

impl OfflineConfig {
    /// Build the configuration for the application served at `app_url`.
    /// Relative manifest entries are resolved against it.
    pub fn new(app_url: &str, settings: OfflineSettings) -> Result<Self, ConfigError> {
        if settings.version.trim().is_empty() {
            return Err(ConfigError::EmptyVersion);
        }
        if settings.offline_message.trim().is_empty() {
            return Err(ConfigError::EmptyOfflineMessage);
        }

        let app_url = parse_url(app_url)?;
        let resolve = |entries: &[String]| -> Result<Vec<Url>, ConfigError> {
            entries
                .iter()
                .map(|entry| {
                    app_url.join(entry).map_err(|source| ConfigError::Url {
                        url: entry.clone(),
                        source,
                    })
                })
                .collect()
        };
        let precache = resolve(&settings.precache)?;
        let external_precache = resolve(&settings.external_precache)?;

        Ok(Self {
            primary_store: store_name(&settings.primary_prefix, &settings.version),
            external_store: store_name(&settings.external_prefix, &settings.version),
            origin: app_url.origin(),
            api_host: Regex::new(&settings.api_host_pattern)?,
            version: settings.version,
            precache,
            external_precache,
            api_path_marker: settings.api_path_marker,
            offline_message: settings.offline_message,
        })
    }

    /// Default settings for the application served at `app_url`.
    pub fn for_app(app_url: &str) -> Result<Self, ConfigError> {
        Self::new(app_url, OfflineSettings::default())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn primary_store(&self) -> &str {
        &self.primary_store
    }

    pub fn external_store(&self) -> &str {
        &self.external_store
    }

    pub fn is_api(&self, url: &Url) -> bool {
        (!self.api_path_marker.is_empty() && url.path().contains(&self.api_path_marker))
            || url.host_str().is_some_and(|host| self.api_host.is_match(host))
    }

    pub fn route(&self, url: &Url) -> Route {
        if self.is_api(url) {
            Route::Api
        } else if url.origin() != self.origin {
            Route::CrossOrigin
        } else {
            Route::SameOrigin
        }
    }
}

fn parse_url(text: &str) -> Result<Url, ConfigError> {
    Url::parse(text).map_err(|source| ConfigError::Url {
        url: text.to_string(),
        source,
    })
}

/// The `{success: false, mensaje}` body handed back when an API request
/// cannot reach the network.
pub fn offline_response(message: &str) -> ResourceResponse {
    ResourceResponse::json(&json!({
        "success": false,
        "mensaje": message,
    }))
}

/// Out-of-band messages from the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate the waiting version now instead of when old clients close.
    SkipWaiting,
}

impl ControlMessage {
    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    New,
    Installing,
    Waiting,
    Activating,
    Active,
    Redundant,
}

impl LifecycleState {
    pub fn name(self) -> &'static str {
        match self {
            LifecycleState::New => "new",
            LifecycleState::Installing => "installing",
            LifecycleState::Waiting => "waiting",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
            LifecycleState::Redundant => "redundant",
        }
    }
}

/// The environment hosting the worker.
#[allow(async_fn_in_trait)]
pub trait WorkerHost {
    /// Ask the host to activate this worker without waiting for the
    /// previous version's clients to close.
    fn skip_waiting(&self);

    /// Take control of already-open clients.
    async fn claim_clients(&self) -> Result<(), CacheError>;
}

/// A host with no real clients, for running the layer outside a browser.
/// Counts the calls it receives.
#[derive(Debug, Default)]
pub struct HeadlessHost {
    skip_requests: Cell<usize>,
    claims: Cell<usize>,
}

impl HeadlessHost {
    pub fn skip_requests(&self) -> usize {
        self.skip_requests.get()
    }

    pub fn claims(&self) -> usize {
        self.claims.get()
    }
}

impl WorkerHost for HeadlessHost {
    fn skip_waiting(&self) {
        self.skip_requests.set(self.skip_requests.get() + 1);
    }

    async fn claim_clients(&self) -> Result<(), CacheError> {
        self.claims.set(self.claims.get() + 1);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub precached: usize,
    pub external_cached: usize,
    pub external_failed: Vec<String>,
}

/// One version of the offline layer.
pub struct OfflineWorker<C, N, H> {
    config: OfflineConfig,
    caches: C,
    network: N,
    host: H,
    state: Cell<LifecycleState>,
    skip_waiting: Cell<bool>,
}

impl<C, N, H> OfflineWorker<C, N, H>
where
    C: CacheStorage,
    N: Fetch,
    H: WorkerHost,
{
    pub fn new(config: OfflineConfig, caches: C, network: N, host: H) -> Self {
        Self {
            config,
            caches,
            network,
            host,
            state: Cell::new(LifecycleState::New),
            skip_waiting: Cell::new(false),
        }
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn caches(&self) -> &C {
        &self.caches
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    fn require_state(
        &self,
        expected: LifecycleState,
        operation: &'static str,
    ) -> Result<(), CacheError> {
        let state = self.state.get();
        if state == expected {
            Ok(())
        } else {
            Err(CacheError::InvalidState {
                operation,
                state: state.name(),
            })
        }
    }

    /// Fill `primary@<version>` from the precache manifest, then try the
    /// cross-origin manifest.
    ///
    /// Any same-origin asset that cannot be fetched fails the install and
    /// nothing is stored. Cross-origin failures are logged and skipped.
    pub async fn install(&self) -> Result<InstallReport, CacheError> {
        self.require_state(LifecycleState::New, "install")?;
        self.state.set(LifecycleState::Installing);
        info!("Installing offline cache version {}", self.config.version);

        let precached = match self.precache_primary().await {
            Ok(count) => count,
            Err(e) => {
                warn!("Install of version {} failed: {}", self.config.version, e);
                self.state.set(LifecycleState::Redundant);
                return Err(e);
            }
        };

        let (external_cached, external_failed) = self.precache_external().await;
        if !external_failed.is_empty() {
            warn!(
                "Skipped {} third-party assets during install",
                external_failed.len()
            );
        }

        self.state.set(LifecycleState::Waiting);
        info!(
            "Installed version {}: {} assets, {} third-party assets",
            self.config.version, precached, external_cached
        );

        Ok(InstallReport {
            precached,
            external_cached,
            external_failed,
        })
    }

    async fn precache_primary(&self) -> Result<usize, CacheError> {
        let requests: Vec<ResourceRequest> = self
            .config
            .precache
            .iter()
            .cloned()
            .map(ResourceRequest::get)
            .collect();

        let network = &self.network;
        let responses = try_join_all(requests.iter().map(|request| async move {
            let response = network
                .fetch(request)
                .await
                .map_err(|e| CacheError::Precache {
                    url: request.url.to_string(),
                    reason: e.to_string(),
                })?;
            if !response.is_ok() {
                return Err(CacheError::Precache {
                    url: request.url.to_string(),
                    reason: format!("status {}", response.status),
                });
            }
            Ok::<_, CacheError>(response)
        }))
        .await?;

        // Only written once every asset is in hand
        let store = self.caches.open(&self.config.primary_store).await?;
        for (request, response) in requests.iter().zip(&responses) {
            if let Err(e) = store.put(request, response).await {
                self.discard_primary().await;
                return Err(e);
            }
        }
        Ok(responses.len())
    }

    // Drop a half-written primary store so a failed install leaves nothing behind
    async fn discard_primary(&self) {
        if let Err(e) = self.caches.delete(&self.config.primary_store).await {
            warn!(
                "Could not discard partial store {}: {}",
                self.config.primary_store, e
            );
        }
    }

    async fn precache_external(&self) -> (usize, Vec<String>) {
        let urls = &self.config.external_precache;
        let store = match self.caches.open(&self.config.external_store).await {
            Ok(store) => store,
            Err(e) => {
                warn!("Could not open {}: {}", self.config.external_store, e);
                return (0, urls.iter().map(Url::to_string).collect());
            }
        };

        let network = &self.network;
        let store = &store;
        let outcomes = join_all(urls.iter().cloned().map(|url| async move {
            let request = ResourceRequest::get(url);
            let result = match network.fetch(&request).await {
                Ok(response) if response.is_ok() => store
                    .put(&request, &response)
                    .await
                    .map_err(|e| e.to_string()),
                Ok(response) => Err(format!("status {}", response.status)),
                Err(e) => Err(e.to_string()),
            };
            (request.url, result)
        }))
        .await;

        let mut cached = 0;
        let mut failed = Vec::new();
        for (url, result) in outcomes {
            match result {
                Ok(()) => cached += 1,
                Err(reason) => {
                    debug!("Third-party asset {} not cached: {}", url, reason);
                    failed.push(url.to_string());
                }
            }
        }
        (cached, failed)
    }

    /// Treat an earlier run of this version as installed. For hosts that
    /// restart the worker between the install and activate events.
    pub fn mark_installed(&self) {
        if self.state.get() == LifecycleState::New {
            self.state.set(LifecycleState::Waiting);
        }
    }

    /// Whether a waiting worker may activate now, given how many clients of
    /// the previous version are still open.
    pub fn ready_to_activate(&self, previous_clients: usize) -> bool {
        self.state.get() == LifecycleState::Waiting
            && (self.skip_waiting.get() || previous_clients == 0)
    }

    /// Delete every store not belonging to this version and claim open
    /// clients. Returns the names of the deleted stores.
    ///
    /// Sweep and claim failures are logged; activation still completes.
    pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
        self.require_state(LifecycleState::Waiting, "activate")?;
        self.state.set(LifecycleState::Activating);

        let deleted = match self.caches.keys().await {
            Ok(names) => self.sweep(names).await,
            Err(e) => {
                warn!("Could not list cache stores: {}", e);
                Vec::new()
            }
        };

        if let Err(e) = self.host.claim_clients().await {
            warn!("Could not claim open clients: {}", e);
        }

        self.state.set(LifecycleState::Active);
        info!(
            "Activated version {}, removed {} stale stores",
            self.config.version,
            deleted.len()
        );
        Ok(deleted)
    }

    async fn sweep(&self, names: Vec<String>) -> Vec<String> {
        let stale: Vec<String> = names
            .into_iter()
            .filter(|name| {
                *name != self.config.primary_store && *name != self.config.external_store
            })
            .collect();

        let caches = &self.caches;
        let results = join_all(stale.iter().map(|name| caches.delete(name))).await;

        stale
            .into_iter()
            .zip(results)
            .filter_map(|(name, result)| match result {
                Ok(true) => {
                    debug!("Deleted stale cache store {}", name);
                    Some(name)
                }
                Ok(false) => None,
                Err(e) => {
                    warn!("Could not delete cache store {}: {}", name, e);
                    None
                }
            })
            .collect()
    }

    pub fn handle_control(&self, message: ControlMessage) {
        match message {
            ControlMessage::SkipWaiting => {
                info!("Skip-waiting requested for version {}", self.config.version);
                self.skip_waiting.set(true);
                self.host.skip_waiting();
            }
        }
    }

    /// Handle a raw message from the page. Unknown messages are ignored.
    pub fn handle_message(&self, data: &Value) -> Option<ControlMessage> {
        let message = ControlMessage::from_value(data);
        match message {
            Some(message) => self.handle_control(message),
            None => debug!("Ignoring unknown control message {}", data),
        }
        message
    }

    /// The stored copy the route would serve for `request`, without touching
    /// the network. API traffic and non-GET requests are never cached.
    pub async fn cached(&self, request: &ResourceRequest) -> Option<ResourceResponse> {
        let store_name = match self.config.route(&request.url) {
            Route::Api => return None,
            _ if !request.is_get() => return None,
            Route::CrossOrigin => &self.config.external_store,
            Route::SameOrigin => &self.config.primary_store,
        };
        let store = self.caches.open(store_name).await.ok()?;
        match store.lookup(request).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Cache read for {} failed: {}", request.url, e);
                None
            }
        }
    }

    /// Answer an intercepted request according to its route.
    pub async fn handle_fetch(
        &self,
        request: &ResourceRequest,
    ) -> Result<ResourceResponse, FetchError> {
        match self.config.route(&request.url) {
            Route::Api => Ok(self.fetch_live(request).await),
            _ if !request.is_get() => self.network.fetch(request).await,
            Route::CrossOrigin => {
                self.cache_first(&self.config.external_store, request, true)
                    .await
            }
            Route::SameOrigin => {
                self.cache_first(&self.config.primary_store, request, false)
                    .await
            }
        }
    }

    async fn fetch_live(&self, request: &ResourceRequest) -> ResourceResponse {
        match self.network.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("API request to {} failed, answering offline: {}", request.url, e);
                offline_response(&self.config.offline_message)
            }
        }
    }

    async fn cache_first(
        &self,
        store_name: &str,
        request: &ResourceRequest,
        store_fresh: bool,
    ) -> Result<ResourceResponse, FetchError> {
        let store = match self.caches.open(store_name).await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!("Could not open {}: {}", store_name, e);
                None
            }
        };

        if let Some(store) = &store {
            match store.lookup(request).await {
                Ok(Some(hit)) => {
                    debug!("Served {} from {}", request.url, store_name);
                    return Ok(hit);
                }
                Ok(None) => {}
                Err(e) => warn!("Cache read for {} failed: {}", request.url, e),
            }
        }

        let response = self.network.fetch(request).await?;

        if store_fresh && response.status == 200 {
            if let Some(store) = &store {
                if let Err(e) = store.put(request, &response).await {
                    warn!("Could not cache {}: {}", request.url, e);
                }
            }
        }

        Ok(response)
    }
}

impl<C, N, H> Fetch for OfflineWorker<C, N, H>
where
    C: CacheStorage,
    N: Fetch,
    H: WorkerHost,
{
    async fn fetch(&self, request: &ResourceRequest) -> Result<ResourceResponse, FetchError> {
        self.handle_fetch(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use futures::executor::block_on;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    const APP: &str = "https://palabras.example.com/";

    /// Network double: answers per URL, fails for unknown URLs, counts calls.
    #[derive(Default)]
    struct ScriptedNetwork {
        routes: RefCell<HashMap<String, ResourceResponse>>,
        calls: RefCell<Vec<String>>,
        offline: Cell<bool>,
    }

    impl ScriptedNetwork {
        fn serve(&self, url: &str, status: u16, body: &str) {
            self.routes
                .borrow_mut()
                .insert(url.to_string(), ResourceResponse::new(status, body));
        }

        fn calls_to(&self, url: &str) -> usize {
            self.calls.borrow().iter().filter(|u| *u == url).count()
        }
    }

    impl Fetch for ScriptedNetwork {
        async fn fetch(&self, request: &ResourceRequest) -> Result<ResourceResponse, FetchError> {
            let url = request.url.to_string();
            self.calls.borrow_mut().push(url.clone());
            if self.offline.get() {
                return Err(FetchError("offline".into()));
            }
            self.routes
                .borrow()
                .get(&url)
                .cloned()
                .ok_or_else(|| FetchError(format!("no route to {}", url)))
        }
    }

    fn settings(version: &str) -> OfflineSettings {
        OfflineSettings {
            version: version.to_string(),
            precache: vec!["/".into(), "/index.html".into(), "/app.js".into()],
            external_precache: vec![
                "https://cdn.example.net/lib.css".into(),
                "https://fonts.example.net/font.css".into(),
            ],
            ..OfflineSettings::default()
        }
    }

    fn serve_assets(network: &ScriptedNetwork) {
        network.serve(APP, 200, "<html>");
        network.serve("https://palabras.example.com/index.html", 200, "<html>");
        network.serve("https://palabras.example.com/app.js", 200, "js");
        network.serve("https://cdn.example.net/lib.css", 200, "css");
        network.serve("https://fonts.example.net/font.css", 200, "font");
    }

    type TestWorker = OfflineWorker<MemoryCacheStorage, Rc<ScriptedNetwork>, HeadlessHost>;

    fn worker(
        version: &str,
        caches: &MemoryCacheStorage,
        network: &Rc<ScriptedNetwork>,
    ) -> TestWorker {
        let config = OfflineConfig::new(APP, settings(version)).unwrap();
        OfflineWorker::new(config, caches.clone(), network.clone(), HeadlessHost::default())
    }

    fn get(url: &str) -> ResourceRequest {
        ResourceRequest::get(Url::parse(url).unwrap())
    }

    #[test]
    fn routes_by_api_marker_host_and_origin() {
        let config = OfflineConfig::for_app(APP).unwrap();
        let route = |u: &str| config.route(&Url::parse(u).unwrap());

        assert_eq!(route("https://palabras.example.com/api/buscar?letras=A"), Route::Api);
        assert_eq!(route("https://api.example.org/words"), Route::Api);
        assert_eq!(route("https://cdn.example.net/lib.css"), Route::CrossOrigin);
        assert_eq!(route("http://palabras.example.com/app.js"), Route::CrossOrigin);
        assert_eq!(route("https://palabras.example.com/app.js"), Route::SameOrigin);
        assert_eq!(route("https://palabras.example.com/apiary.png"), Route::SameOrigin);
    }

    #[test]
    fn store_names_follow_version() {
        let config = OfflineConfig::new(APP, settings("v7")).unwrap();
        assert_eq!(config.primary_store(), "primary@v7");
        assert_eq!(config.external_store(), "external@v7");
    }

    #[test]
    fn settings_from_json_keep_defaults_for_missing_fields() {
        let settings = OfflineSettings::from_json(r#"{"version":"2025-01"}"#).unwrap();
        assert_eq!(settings.version, "2025-01");
        assert_eq!(settings.api_path_marker, API_PATH_MARKER);
        assert_eq!(settings.precache.len(), PRECACHE_URLS.len());
    }

    #[test]
    fn rejects_bad_settings() {
        let mut bad = settings("");
        assert!(matches!(OfflineConfig::new(APP, bad.clone()), Err(ConfigError::EmptyVersion)));

        bad.version = "v1".into();
        bad.api_host_pattern = "(".into();
        assert!(matches!(
            OfflineConfig::new(APP, bad),
            Err(ConfigError::ApiHostPattern(_))
        ));

        assert!(matches!(
            OfflineConfig::for_app("not a url"),
            Err(ConfigError::Url { .. })
        ));
        assert!(OfflineSettings::from_json("{").is_err());
    }

    #[test]
    fn install_precaches_both_manifests() {
        let caches = MemoryCacheStorage::new();
        let network = Rc::new(ScriptedNetwork::default());
        serve_assets(&network);
        let worker = worker("v1", &caches, &network);

        let report = block_on(worker.install()).unwrap();
        assert_eq!(report.precached, 3);
        assert_eq!(report.external_cached, 2);
        assert!(report.external_failed.is_empty());
        assert_eq!(worker.state(), LifecycleState::Waiting);
        assert_eq!(caches.store("primary@v1").unwrap().len(), 3);
        assert_eq!(caches.store("external@v1").unwrap().len(), 2);
        assert!(caches
            .store("primary@v1")
            .unwrap()
            .contains(&get("https://palabras.example.com/index.html")));
    }

    #[test]
    fn missing_same_origin_asset_fails_install() {
        let caches = MemoryCacheStorage::new();
        let network = Rc::new(ScriptedNetwork::default());
        serve_assets(&network);
        network.serve("https://palabras.example.com/app.js", 404, "gone");
        let worker = worker("v1", &caches, &network);

        let err = block_on(worker.install()).unwrap_err();
        assert!(matches!(err, CacheError::Precache { ref url, .. } if url.ends_with("/app.js")));
        assert_eq!(worker.state(), LifecycleState::Redundant);
        assert!(caches.store("primary@v1").map_or(true, |s| s.is_empty()));
        assert!(block_on(worker.activate()).is_err());
    }

    #[test]
    fn third_party_failures_do_not_fail_install() {
        let caches = MemoryCacheStorage::new();
        let network = Rc::new(ScriptedNetwork::default());
        serve_assets(&network);
        network.routes.borrow_mut().remove("https://fonts.example.net/font.css");
        let worker = worker("v1", &caches, &network);

        let report = block_on(worker.install()).unwrap();
        assert_eq!(report.external_cached, 1);
        assert_eq!(report.external_failed, vec!["https://fonts.example.net/font.css".to_string()]);
        assert_eq!(worker.state(), LifecycleState::Waiting);
    }

    #[test]
    fn activation_sweeps_previous_version() {
        let caches = MemoryCacheStorage::new();
        let network = Rc::new(ScriptedNetwork::default());
        serve_assets(&network);

        let v1 = worker("v1", &caches, &network);
        block_on(v1.install()).unwrap();
        block_on(v1.activate()).unwrap();
        assert!(caches.has_store("primary@v1"));

        let v2 = worker("v2", &caches, &network);
        block_on(v2.install()).unwrap();
        let mut deleted = block_on(v2.activate()).unwrap();
        deleted.sort();

        assert_eq!(deleted, vec!["external@v1".to_string(), "primary@v1".to_string()]);
        assert_eq!(
            caches.store_names(),
            vec!["external@v2".to_string(), "primary@v2".to_string()]
        );
        assert_eq!(v2.state(), LifecycleState::Active);
        assert_eq!(v2.host().claims(), 1);
    }

    #[test]
    fn activate_requires_installed_worker() {
        let caches = MemoryCacheStorage::new();
        let network = Rc::new(ScriptedNetwork::default());
        let worker = worker("v1", &caches, &network);
        assert_eq!(
            block_on(worker.activate()).unwrap_err(),
            CacheError::InvalidState {
                operation: "activate",
                state: "new"
            }
        );
    }

    #[test]
    fn restarted_worker_can_activate_without_reinstall() {
        let caches = MemoryCacheStorage::new();
        let network = Rc::new(ScriptedNetwork::default());
        let worker = worker("v1", &caches, &network);

        worker.mark_installed();
        assert_eq!(worker.state(), LifecycleState::Waiting);
        block_on(worker.activate()).unwrap();

        worker.mark_installed();
        assert_eq!(worker.state(), LifecycleState::Active);
        assert!(network.calls.borrow().is_empty());
    }

    #[test]
    fn cross_origin_200_is_cached_after_one_fetch() {
        let caches = MemoryCacheStorage::new();
        let network = Rc::new(ScriptedNetwork::default());
        let url = "https://cdn.example.net/icons.svg";
        network.serve(url, 200, "<svg/>");
        let worker = worker("v1", &caches, &network);

        let first = block_on(worker.handle_fetch(&get(url))).unwrap();
        let second = block_on(worker.handle_fetch(&get(url))).unwrap();

        assert_eq!(first, second);
        assert_eq!(network.calls_to(url), 1);
        assert!(caches.store("external@v1").unwrap().contains(&get(url)));
    }

    #[test]
    fn cross_origin_404_is_never_cached() {
        let caches = MemoryCacheStorage::new();
        let network = Rc::new(ScriptedNetwork::default());
        let url = "https://cdn.example.net/missing.js";
        network.serve(url, 404, "not found");
        let worker = worker("v1", &caches, &network);

        let first = block_on(worker.handle_fetch(&get(url))).unwrap();
        assert_eq!(first.status, 404);
        block_on(worker.handle_fetch(&get(url))).unwrap();

        assert_eq!(network.calls_to(url), 2);
        assert!(!caches.store("external@v1").unwrap().contains(&get(url)));
    }

    #[test]
    fn same_origin_is_served_from_precache() {
        let caches = MemoryCacheStorage::new();
        let network = Rc::new(ScriptedNetwork::default());
        serve_assets(&network);
        let worker = worker("v1", &caches, &network);
        block_on(worker.install()).unwrap();

        network.offline.set(true);
        let hit = block_on(worker.handle_fetch(&get("https://palabras.example.com/app.js"))).unwrap();
        assert_eq!(hit.body, b"js".to_vec());
        assert!(block_on(worker.handle_fetch(&get("https://palabras.example.com/other.png"))).is_err());
    }

    #[test]
    fn same_origin_miss_is_not_stored() {
        let caches = MemoryCacheStorage::new();
        let network = Rc::new(ScriptedNetwork::default());
        let url = "https://palabras.example.com/help.html";
        network.serve(url, 200, "help");
        let worker = worker("v1", &caches, &network);

        block_on(worker.handle_fetch(&get(url))).unwrap();
        block_on(worker.handle_fetch(&get(url))).unwrap();
        assert_eq!(network.calls_to(url), 2);
    }

    #[test]
    fn offline_api_request_gets_rejection_body() {
        let caches = MemoryCacheStorage::new();
        let network = Rc::new(ScriptedNetwork::default());
        network.offline.set(true);
        let worker = worker("v1", &caches, &network);

        let response = block_on(
            worker.handle_fetch(&get("https://palabras.example.com/api/buscar?ronda=1")),
        )
        .unwrap();

        assert_eq!(response.status, 200);
        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["success"], Value::Bool(false));
        assert!(!body["mensaje"].as_str().unwrap().is_empty());
    }

    #[test]
    fn api_responses_are_never_cached() {
        let caches = MemoryCacheStorage::new();
        let network = Rc::new(ScriptedNetwork::default());
        let url = "https://api.example.org/palabras";
        network.serve(url, 200, r#"{"success":true}"#);
        let worker = worker("v1", &caches, &network);

        block_on(worker.handle_fetch(&get(url))).unwrap();
        block_on(worker.handle_fetch(&get(url))).unwrap();
        assert_eq!(network.calls_to(url), 2);
        assert!(caches.store_names().is_empty());
    }

    #[test]
    fn non_get_requests_bypass_cache() {
        let caches = MemoryCacheStorage::new();
        let network = Rc::new(ScriptedNetwork::default());
        let url = "https://cdn.example.net/collect";
        network.serve(url, 200, "ok");
        let worker = worker("v1", &caches, &network);

        let mut post = get(url);
        post.method = "POST".into();
        block_on(worker.handle_fetch(&post)).unwrap();
        block_on(worker.handle_fetch(&post)).unwrap();
        assert_eq!(network.calls_to(url), 2);
        assert!(!caches.has_store("external@v1"));
    }

    #[test]
    fn skip_waiting_message_allows_early_activation() {
        let caches = MemoryCacheStorage::new();
        let network = Rc::new(ScriptedNetwork::default());
        serve_assets(&network);
        let worker = worker("v2", &caches, &network);
        block_on(worker.install()).unwrap();

        assert!(!worker.ready_to_activate(2));
        assert!(worker.ready_to_activate(0));

        let handled = worker.handle_message(&json!({ "type": "SKIP_WAITING" }));
        assert_eq!(handled, Some(ControlMessage::SkipWaiting));
        assert_eq!(worker.host().skip_requests(), 1);
        assert!(worker.ready_to_activate(2));
    }

    #[test]
    fn cached_lookup_never_touches_network() {
        let caches = MemoryCacheStorage::new();
        let network = Rc::new(ScriptedNetwork::default());
        serve_assets(&network);
        let worker = worker("v1", &caches, &network);
        block_on(worker.install()).unwrap();
        let calls = network.calls.borrow().len();

        let hit = block_on(worker.cached(&get("https://cdn.example.net/lib.css"))).unwrap();
        assert_eq!(hit.body, b"css".to_vec());
        assert!(block_on(worker.cached(&get("https://cdn.example.net/other.css"))).is_none());
        assert!(block_on(worker.cached(&get("https://palabras.example.com/api/buscar"))).is_none());

        let mut post = get("https://palabras.example.com/app.js");
        post.method = "POST".into();
        assert!(block_on(worker.cached(&post)).is_none());
        assert_eq!(network.calls.borrow().len(), calls);
    }

    #[test]
    fn unknown_messages_are_ignored() {
        let caches = MemoryCacheStorage::new();
        let network = Rc::new(ScriptedNetwork::default());
        let worker = worker("v1", &caches, &network);

        assert_eq!(worker.handle_message(&json!({ "type": "RELOAD" })), None);
        assert_eq!(worker.handle_message(&json!("SKIP_WAITING")), None);
        assert_eq!(worker.host().skip_requests(), 0);
    }

    /// Storage double that fails on demand, on top of the in-memory storage.
    #[derive(Default)]
    struct Faults {
        unopenable: RefCell<Vec<String>>,
        unwritable: RefCell<Vec<String>>,
        unreadable: Cell<bool>,
        unlistable: Cell<bool>,
        // Puts that succeed before every later put fails
        writes_allowed: Cell<Option<usize>>,
    }

    #[derive(Clone, Default)]
    struct FaultyStorage {
        inner: MemoryCacheStorage,
        faults: Rc<Faults>,
    }

    struct FaultyStore {
        name: String,
        inner: crate::cache::MemoryCache,
        faults: Rc<Faults>,
    }

    impl CacheStore for FaultyStore {
        async fn lookup(
            &self,
            request: &ResourceRequest,
        ) -> Result<Option<ResourceResponse>, CacheError> {
            if self.faults.unreadable.get() {
                return Err(CacheError::Storage("read failed".into()));
            }
            self.inner.lookup(request).await
        }

        async fn put(
            &self,
            request: &ResourceRequest,
            response: &ResourceResponse,
        ) -> Result<(), CacheError> {
            if self.faults.unwritable.borrow().contains(&self.name) {
                return Err(CacheError::Storage("quota exceeded".into()));
            }
            match self.faults.writes_allowed.get() {
                Some(0) => return Err(CacheError::Storage("quota exceeded".into())),
                Some(n) => self.faults.writes_allowed.set(Some(n - 1)),
                None => {}
            }
            self.inner.put(request, response).await
        }
    }

    impl CacheStorage for FaultyStorage {
        type Store = FaultyStore;

        async fn open(&self, name: &str) -> Result<FaultyStore, CacheError> {
            if self.faults.unopenable.borrow().iter().any(|n| n == name) {
                return Err(CacheError::Storage(format!("cannot open {}", name)));
            }
            Ok(FaultyStore {
                name: name.to_string(),
                inner: self.inner.open(name).await?,
                faults: self.faults.clone(),
            })
        }

        async fn keys(&self) -> Result<Vec<String>, CacheError> {
            if self.faults.unlistable.get() {
                return Err(CacheError::Storage("keys failed".into()));
            }
            self.inner.keys().await
        }

        async fn delete(&self, name: &str) -> Result<bool, CacheError> {
            self.inner.delete(name).await
        }
    }

    fn faulty_worker(
        version: &str,
        caches: &FaultyStorage,
        network: &Rc<ScriptedNetwork>,
    ) -> OfflineWorker<FaultyStorage, Rc<ScriptedNetwork>, HeadlessHost> {
        let config = OfflineConfig::new(APP, settings(version)).unwrap();
        OfflineWorker::new(config, caches.clone(), network.clone(), HeadlessHost::default())
    }

    #[test]
    fn broken_store_falls_through_to_network() {
        let caches = FaultyStorage::default();
        caches.faults.unreadable.set(true);
        caches.faults.unwritable.borrow_mut().push("external@v1".into());
        let network = Rc::new(ScriptedNetwork::default());
        let url = "https://cdn.example.net/lib.css";
        network.serve(url, 200, "css");
        let worker = faulty_worker("v1", &caches, &network);

        let first = block_on(worker.handle_fetch(&get(url))).unwrap();
        let second = block_on(worker.handle_fetch(&get(url))).unwrap();

        assert_eq!(first.status, 200);
        assert_eq!(second.body, b"css".to_vec());
        assert_eq!(network.calls_to(url), 2);
        assert!(caches.inner.store("external@v1").unwrap().is_empty());
    }

    #[test]
    fn unopenable_store_falls_through_to_network() {
        let caches = FaultyStorage::default();
        caches.faults.unopenable.borrow_mut().push("primary@v1".into());
        let network = Rc::new(ScriptedNetwork::default());
        let url = "https://palabras.example.com/app.js";
        network.serve(url, 200, "js");
        let worker = faulty_worker("v1", &caches, &network);

        let response = block_on(worker.handle_fetch(&get(url))).unwrap();
        assert_eq!(response.body, b"js".to_vec());
        assert_eq!(network.calls_to(url), 1);
    }

    #[test]
    fn unwritable_external_store_does_not_fail_install() {
        let caches = FaultyStorage::default();
        caches.faults.unwritable.borrow_mut().push("external@v1".into());
        let network = Rc::new(ScriptedNetwork::default());
        serve_assets(&network);
        let worker = faulty_worker("v1", &caches, &network);

        let report = block_on(worker.install()).unwrap();
        assert_eq!(report.precached, 3);
        assert_eq!(report.external_cached, 0);
        let mut failed = report.external_failed;
        failed.sort();
        assert_eq!(
            failed,
            vec![
                "https://cdn.example.net/lib.css".to_string(),
                "https://fonts.example.net/font.css".to_string()
            ]
        );
        assert_eq!(worker.state(), LifecycleState::Waiting);
    }

    #[test]
    fn unopenable_external_store_lists_every_third_party_url() {
        let caches = FaultyStorage::default();
        caches.faults.unopenable.borrow_mut().push("external@v1".into());
        let network = Rc::new(ScriptedNetwork::default());
        serve_assets(&network);
        let worker = faulty_worker("v1", &caches, &network);

        let report = block_on(worker.install()).unwrap();
        assert_eq!(report.external_failed.len(), 2);
        assert_eq!(network.calls_to("https://cdn.example.net/lib.css"), 0);
    }

    #[test]
    fn failed_primary_write_leaves_no_partial_store() {
        let caches = FaultyStorage::default();
        caches.faults.writes_allowed.set(Some(1));
        let network = Rc::new(ScriptedNetwork::default());
        serve_assets(&network);
        let worker = faulty_worker("v1", &caches, &network);

        let err = block_on(worker.install()).unwrap_err();
        assert!(matches!(err, CacheError::Storage(_)));
        assert_eq!(worker.state(), LifecycleState::Redundant);
        assert!(!caches.inner.has_store("primary@v1"));
    }

    #[test]
    fn activation_completes_when_stores_cannot_be_listed() {
        let caches = FaultyStorage::default();
        let network = Rc::new(ScriptedNetwork::default());
        serve_assets(&network);
        let old = faulty_worker("v1", &caches, &network);
        block_on(old.install()).unwrap();

        let worker = faulty_worker("v2", &caches, &network);
        block_on(worker.install()).unwrap();
        caches.faults.unlistable.set(true);

        let deleted = block_on(worker.activate()).unwrap();
        assert!(deleted.is_empty());
        assert_eq!(worker.state(), LifecycleState::Active);
        assert_eq!(worker.host().claims(), 1);
        assert!(caches.inner.has_store("primary@v1"));
    }
}
