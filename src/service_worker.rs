//! Service-worker event wiring for the offline layer.
//!
//! `install` and `activate` are held open with `waitUntil`, every `fetch`
//! is answered through [`OfflineWorker::handle_fetch`], and page messages
//! are parsed as [`ControlMessage`](crate::offline::ControlMessage)s.

use std::rc::Rc;

use log::{debug, info, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, spawn_local, JsFuture};
use web_sys::{
    ExtendableEvent, ExtendableMessageEvent, FetchEvent, RequestMode, ServiceWorkerGlobalScope,
};

use crate::error::CacheError;
use crate::offline::{OfflineConfig, OfflineWorker, WorkerHost};
use crate::web::{
    from_web_request, global_fetch, js_error_text, to_web_response, WebCacheStorage, WebFetch,
};

pub struct ServiceWorkerHost {
    scope: ServiceWorkerGlobalScope,
}

impl WorkerHost for ServiceWorkerHost {
    fn skip_waiting(&self) {
        match self.scope.skip_waiting() {
            Ok(promise) => spawn_local(async move {
                if let Err(e) = JsFuture::from(promise).await {
                    warn!("skipWaiting was rejected: {}", js_error_text(&e));
                }
            }),
            Err(e) => warn!("skipWaiting failed: {}", js_error_text(&e)),
        }
    }

    async fn claim_clients(&self) -> Result<(), CacheError> {
        JsFuture::from(self.scope.clients().claim())
            .await
            .map(|_| ())
            .map_err(|e| CacheError::Host(js_error_text(&e)))
    }
}

type WebWorker = OfflineWorker<WebCacheStorage, WebFetch, ServiceWorkerHost>;

fn to_js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Install the event handlers on the current service-worker global scope.
pub fn register() -> Result<(), JsValue> {
    let scope: ServiceWorkerGlobalScope = js_sys::global().dyn_into()?;
    let config = OfflineConfig::for_app(&scope.location().href()).map_err(to_js_error)?;
    let host = ServiceWorkerHost {
        scope: scope.clone(),
    };
    let worker: Rc<WebWorker> = Rc::new(OfflineWorker::new(
        config,
        WebCacheStorage::from_global()?,
        WebFetch,
        host,
    ));
    info!(
        "Registering offline layer version {}",
        worker.config().version()
    );

    let on_install = {
        let worker = worker.clone();
        Closure::<dyn Fn(ExtendableEvent)>::new(move |event: ExtendableEvent| {
            let worker = worker.clone();
            let promise = future_to_promise(async move {
                worker.install().await.map_err(to_js_error)?;
                Ok(JsValue::UNDEFINED)
            });
            if let Err(e) = event.wait_until(&promise) {
                warn!("install waitUntil failed: {}", js_error_text(&e));
            }
        })
    };

    let on_activate = {
        let worker = worker.clone();
        Closure::<dyn Fn(ExtendableEvent)>::new(move |event: ExtendableEvent| {
            let worker = worker.clone();
            // The browser may have restarted the script since install
            worker.mark_installed();
            let promise = future_to_promise(async move {
                worker.activate().await.map_err(to_js_error)?;
                Ok(JsValue::UNDEFINED)
            });
            if let Err(e) = event.wait_until(&promise) {
                warn!("activate waitUntil failed: {}", js_error_text(&e));
            }
        })
    };

    let on_fetch = {
        let worker = worker.clone();
        Closure::<dyn Fn(FetchEvent)>::new(move |event: FetchEvent| {
            let web_request = event.request();
            // Leave extension and data URLs to the browser
            if !web_request.url().starts_with("http") {
                return;
            }
            let opaque = web_request.mode() == RequestMode::NoCors;
            // An opaque body cannot be rebuilt, so only no-cors GETs are intercepted
            if opaque && !web_request.method().eq_ignore_ascii_case("GET") {
                return;
            }
            let worker = worker.clone();
            let promise = future_to_promise(async move {
                let request = from_web_request(&web_request).await?;
                if opaque {
                    if let Some(hit) = worker.cached(&request).await {
                        return to_web_response(&hit).map(JsValue::from);
                    }
                    // Status 0 never qualifies for the runtime cache
                    return JsFuture::from(global_fetch(&web_request)?).await;
                }
                let response = worker.handle_fetch(&request).await.map_err(to_js_error)?;
                to_web_response(&response).map(JsValue::from)
            });
            if let Err(e) = event.respond_with(&promise) {
                warn!("respondWith failed: {}", js_error_text(&e));
            }
        })
    };

    let on_message = {
        let worker = worker.clone();
        Closure::<dyn Fn(ExtendableMessageEvent)>::new(move |event: ExtendableMessageEvent| {
            match serde_wasm_bindgen::from_value::<serde_json::Value>(event.data()) {
                Ok(data) => {
                    worker.handle_message(&data);
                }
                Err(_) => debug!("Ignoring a message that is not plain data"),
            }
        })
    };

    scope.set_oninstall(Some(on_install.as_ref().unchecked_ref()));
    scope.set_onactivate(Some(on_activate.as_ref().unchecked_ref()));
    scope.set_onfetch(Some(on_fetch.as_ref().unchecked_ref()));
    scope.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

    // Handlers live as long as the worker
    on_install.forget();
    on_activate.forget();
    on_fetch.forget();
    on_message.forget();

    Ok(())
}
