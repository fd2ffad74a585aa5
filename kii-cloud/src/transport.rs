//! Transport layer abstraction.
//!
//! Entity operations describe what they need as an [`ApiRequest`] (method,
//! resource path, payload) and hand it to a [`Transport`]. The transport owns
//! the wire: base URL, application headers, TLS, and turning non-2xx answers
//! into [`TransportError::Status`].

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{KiiResult, TransportError};
use crate::progress::Progress;

/// HTTP method of an API request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// Payload of an API request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// Raw bytes, e.g. a file body or a plain-text value.
    Bytes { content_type: String, data: Vec<u8> },
}

/// Which credentials accompany a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    /// Application headers only.
    None,
    /// The session's access token, when one is set.
    Session,
    /// An explicit access token (used while a login is in flight).
    Token(String),
}

/// An abstract request against the REST API.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Path below the site base URL, starting with `/`.
    pub path: String,
    /// Overrides the default `application/json` content type of JSON bodies.
    pub content_type: Option<String>,
    pub body: RequestBody,
    pub auth: Auth,
}

impl ApiRequest {
    /// A request with no body, authenticated with the session token.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            content_type: None,
            body: RequestBody::Empty,
            auth: Auth::Session,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    /// A request carrying a JSON body.
    pub fn json(method: HttpMethod, path: impl Into<String>, body: Value) -> Self {
        Self {
            body: RequestBody::Json(body),
            ..Self::new(method, path)
        }
    }

    /// A request carrying raw bytes.
    pub fn bytes(
        method: HttpMethod,
        path: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            body: RequestBody::Bytes {
                content_type: content_type.into(),
                data,
            },
            ..Self::new(method, path)
        }
    }

    /// Sets a vendor content type for a JSON body.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Parses the body as JSON. An empty body reads as an empty object.
    pub fn json(&self) -> KiiResult<Value> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Object(Map::new()));
        }
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Sends API requests.
///
/// `access_token` is already resolved from the request's [`Auth`]. When
/// `progress` is given and the request carries a byte body, the transport
/// reports upload progress; otherwise it reports download progress of the
/// response body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: ApiRequest,
        access_token: Option<&str>,
        progress: Option<&Progress>,
    ) -> Result<ApiResponse, TransportError>;
}
