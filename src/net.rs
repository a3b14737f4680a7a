//! Request/response model shared by the word-source client and the offline layer.

use std::rc::Rc;

use url::Url;

use crate::error::FetchError;

/// Identity of a cached request: (method, absolute URL).
pub type RequestKey = (String, String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl ResourceRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: "GET".to_string(),
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }

    pub fn key(&self) -> RequestKey {
        (self.method.to_ascii_uppercase(), self.url.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ResourceResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// A `200 OK` JSON response carrying `body`.
    pub fn json(body: &serde_json::Value) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.to_string().into_bytes(),
        }
    }

    /// Any 2xx status.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Anything that can turn a request into a response: the browser's global
/// `fetch`, the offline layer's interception, or a test double.
#[allow(async_fn_in_trait)]
pub trait Fetch {
    async fn fetch(&self, request: &ResourceRequest) -> Result<ResourceResponse, FetchError>;
}

impl<F: Fetch + ?Sized> Fetch for &F {
    async fn fetch(&self, request: &ResourceRequest) -> Result<ResourceResponse, FetchError> {
        (**self).fetch(request).await
    }
}

impl<F: Fetch + ?Sized> Fetch for Rc<F> {
    async fn fetch(&self, request: &ResourceRequest) -> Result<ResourceResponse, FetchError> {
        (**self).fetch(request).await
    }
}
