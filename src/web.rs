//! Browser bindings: the global `fetch` and the Cache API behind the
//! crate's [`Fetch`] and [`CacheStorage`] traits, plus the page-facing
//! exports.

use js_sys::{Array, Object, Promise, Uint8Array};
use log::warn;
use serde::Serialize;
use url::Url;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Headers, Request, RequestInit, Response, ResponseInit};

use crate::cache::{CacheStorage, CacheStore};
use crate::config::DEFAULT_ENDPOINT;
use crate::error::{CacheError, FetchError, InputError, SearchError};
use crate::net::{Fetch, ResourceRequest, ResourceResponse};
use crate::offline::ControlMessage;
use crate::ranking::RankedResult;
use crate::validation::round_from_f64;
use crate::{search, SearchResponse, WordSourceClient};

/// Best-effort text for a thrown JS value.
pub fn js_error_text(value: &JsValue) -> String {
    if let Some(text) = value.as_string() {
        return text;
    }
    match value.dyn_ref::<js_sys::Error>() {
        Some(error) => String::from(error.message()),
        None => format!("{:?}", value),
    }
}

/// `fetch` on whichever global scope is running, window or worker.
pub fn global_fetch(request: &Request) -> Result<Promise, JsValue> {
    let global = js_sys::global();
    if let Some(scope) = global.dyn_ref::<web_sys::WorkerGlobalScope>() {
        Ok(scope.fetch_with_request(request))
    } else if let Some(window) = global.dyn_ref::<web_sys::Window>() {
        Ok(window.fetch_with_request(request))
    } else {
        Err(JsValue::from_str("fetch is not available in this scope"))
    }
}

fn global_caches() -> Result<web_sys::CacheStorage, JsValue> {
    let global = js_sys::global();
    if let Some(scope) = global.dyn_ref::<web_sys::WorkerGlobalScope>() {
        scope.caches()
    } else if let Some(window) = global.dyn_ref::<web_sys::Window>() {
        window.caches()
    } else {
        Err(JsValue::from_str("caches are not available in this scope"))
    }
}

fn header_pairs(headers: &Headers) -> Result<Vec<(String, String)>, JsValue> {
    let mut pairs = Vec::new();
    if let Some(entries) = js_sys::try_iter(headers)? {
        for entry in entries {
            let entry: Array = entry?.dyn_into()?;
            if let (Some(name), Some(value)) = (entry.get(0).as_string(), entry.get(1).as_string())
            {
                pairs.push((name, value));
            }
        }
    }
    Ok(pairs)
}

fn to_headers(pairs: &[(String, String)]) -> Result<Headers, JsValue> {
    let headers = Headers::new()?;
    for (name, value) in pairs {
        headers.append(name, value)?;
    }
    Ok(headers)
}

pub fn to_web_request(request: &ResourceRequest) -> Result<Request, JsValue> {
    let init = RequestInit::new();
    init.set_method(&request.method);
    init.set_headers(&to_headers(&request.headers)?);
    if let Some(body) = &request.body {
        init.set_body(&Uint8Array::from(body.as_slice()));
    }
    Request::new_with_str_and_init(request.url.as_str(), &init)
}

/// Copy an intercepted request. Reads the body of anything but GET/HEAD.
pub async fn from_web_request(request: &Request) -> Result<ResourceRequest, JsValue> {
    let url = Url::parse(&request.url()).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let method = request.method();
    let body = if method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD") {
        None
    } else {
        let buffer = JsFuture::from(request.array_buffer()?).await?;
        Some(Uint8Array::new(&buffer).to_vec())
    };
    Ok(ResourceRequest {
        method,
        url,
        headers: header_pairs(&request.headers())?,
        body,
    })
}

pub async fn from_web_response(response: Response) -> Result<ResourceResponse, JsValue> {
    let status = response.status();
    let headers = header_pairs(&response.headers())?;
    let buffer = JsFuture::from(response.array_buffer()?).await?;
    Ok(ResourceResponse {
        status,
        headers,
        body: Uint8Array::new(&buffer).to_vec(),
    })
}

pub fn to_web_response(response: &ResourceResponse) -> Result<Response, JsValue> {
    let init = ResponseInit::new();
    init.set_status(response.status);
    init.set_headers(&to_headers(&response.headers)?);
    if response.body.is_empty() {
        return Response::new_with_opt_buffer_source_and_init(None, &init);
    }
    let body = Uint8Array::from(response.body.as_slice());
    let body: &Object = &body;
    Response::new_with_opt_buffer_source_and_init(Some(body), &init)
}

fn fetch_error(value: JsValue) -> FetchError {
    FetchError(js_error_text(&value))
}

fn cache_error(value: JsValue) -> CacheError {
    CacheError::Storage(js_error_text(&value))
}

/// The global scope's `fetch`, in a window or a worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebFetch;

impl Fetch for WebFetch {
    async fn fetch(&self, request: &ResourceRequest) -> Result<ResourceResponse, FetchError> {
        let web_request = to_web_request(request).map_err(fetch_error)?;
        let promise = global_fetch(&web_request).map_err(fetch_error)?;
        let response: Response = JsFuture::from(promise)
            .await
            .and_then(|value| value.dyn_into())
            .map_err(fetch_error)?;
        from_web_response(response).await.map_err(fetch_error)
    }
}

/// The browser's `caches` object.
#[derive(Debug, Clone)]
pub struct WebCacheStorage {
    inner: web_sys::CacheStorage,
}

impl WebCacheStorage {
    pub fn from_global() -> Result<Self, JsValue> {
        Ok(Self {
            inner: global_caches()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct WebCache {
    inner: web_sys::Cache,
}

impl CacheStorage for WebCacheStorage {
    type Store = WebCache;

    async fn open(&self, name: &str) -> Result<WebCache, CacheError> {
        let inner: web_sys::Cache = JsFuture::from(self.inner.open(name))
            .await
            .and_then(|value| value.dyn_into())
            .map_err(cache_error)?;
        Ok(WebCache { inner })
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let names: Array = JsFuture::from(self.inner.keys())
            .await
            .and_then(|value| value.dyn_into())
            .map_err(cache_error)?;
        Ok(names.iter().filter_map(|name| name.as_string()).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let existed = JsFuture::from(self.inner.delete(name))
            .await
            .map_err(cache_error)?;
        Ok(existed.as_bool().unwrap_or(false))
    }
}

impl CacheStore for WebCache {
    async fn lookup(
        &self,
        request: &ResourceRequest,
    ) -> Result<Option<ResourceResponse>, CacheError> {
        let web_request = to_web_request(request).map_err(cache_error)?;
        let found = JsFuture::from(self.inner.match_with_request(&web_request))
            .await
            .map_err(cache_error)?;
        if found.is_undefined() || found.is_null() {
            return Ok(None);
        }
        let response: Response = found.dyn_into().map_err(cache_error)?;
        from_web_response(response)
            .await
            .map(Some)
            .map_err(cache_error)
    }

    async fn put(
        &self,
        request: &ResourceRequest,
        response: &ResourceResponse,
    ) -> Result<(), CacheError> {
        let web_request = to_web_request(request).map_err(cache_error)?;
        let web_response = to_web_response(response).map_err(cache_error)?;
        JsFuture::from(self.inner.put_with_request(&web_request, &web_response))
            .await
            .map_err(cache_error)?;
        Ok(())
    }
}

fn page_url() -> Result<Url, SearchError> {
    let href = web_sys::window()
        .and_then(|window| window.location().href().ok())
        .ok_or(SearchError::SourceUnavailable)?;
    Url::parse(&href).map_err(|_| SearchError::SourceUnavailable)
}

async fn run_search(
    letters: JsValue,
    bonus_rows: JsValue,
    round: f64,
    endpoint: Option<String>,
) -> Result<RankedResult, SearchError> {
    let letters: Vec<String> = serde_wasm_bindgen::from_value(letters)
        .map_err(|_| InputError::Malformed { field: "letters" })?;
    let bonus_rows: Vec<Vec<String>> = serde_wasm_bindgen::from_value(bonus_rows)
        .map_err(|_| InputError::Malformed { field: "bonus table" })?;
    let round = round_from_f64(round)?;

    let endpoint = endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
    let endpoint = page_url()?.join(endpoint).map_err(|e| {
        warn!("Invalid word source endpoint {:?}: {}", endpoint, e);
        SearchError::SourceUnavailable
    })?;

    let client = WordSourceClient::new(endpoint, WebFetch);
    search(&client, &letters, &bonus_rows, round).await
}

/// JS entry: `searchWords(letters: string[], bonusRows: string[][], round: number, endpoint?: string)`.
///
/// Always resolves, to either the success or the failure envelope of
/// [`SearchResponse`].
#[wasm_bindgen(js_name = searchWords)]
pub async fn search_words(
    letters: JsValue,
    bonus_rows: JsValue,
    round: f64,
    endpoint: Option<String>,
) -> JsValue {
    console_error_panic_hook::set_once();
    let response = SearchResponse::from(run_search(letters, bonus_rows, round, endpoint).await);
    response
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .unwrap_or(JsValue::NULL)
}

/// JS entry: tell a waiting service worker to take over without a reload cycle.
#[wasm_bindgen(js_name = requestUpdate)]
pub fn request_update(worker: &web_sys::ServiceWorker) -> Result<(), JsValue> {
    let message = ControlMessage::SkipWaiting
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())?;
    worker.post_message(&message)
}
