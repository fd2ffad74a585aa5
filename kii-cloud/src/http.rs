//! reqwest-backed [`Transport`].

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::KiiConfig;
use crate::error::{KiiError, KiiResult, TransportError};
use crate::progress::Progress;
use crate::transport::{ApiRequest, ApiResponse, HttpMethod, RequestBody, Transport};

/// Upload chunk size.
const CHUNK_SIZE: usize = 64 * 1024;

const APP_ID_HEADER: &str = "X-Kii-AppID";
const APP_KEY_HEADER: &str = "X-Kii-AppKey";

/// Talks to the REST API over HTTPS.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    app_id: String,
    app_key: String,
}

impl HttpTransport {
    /// Creates a transport for the configured site and application.
    pub fn new(config: &KiiConfig) -> KiiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| KiiError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            app_id: config.app_id.clone(),
            app_key: config.app_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

/// Builds a [`TransportError::Status`] from an error response body.
///
/// The backend answers errors as `{"errorCode": .., "message": ..}`; anything
/// else is kept verbatim as the message.
pub(crate) fn status_error(status: u16, text: &str) -> TransportError {
    let details: Option<Value> = serde_json::from_str(text).ok();
    let error_code = details
        .as_ref()
        .and_then(|d| d.get("errorCode"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let message = details
        .as_ref()
        .and_then(|d| d.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            if text.is_empty() {
                format!("HTTP {status}")
            } else {
                text.to_string()
            }
        });

    TransportError::Status {
        status,
        error_code,
        message,
        details,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: ApiRequest,
        access_token: Option<&str>,
        progress: Option<&Progress>,
    ) -> Result<ApiResponse, TransportError> {
        let request_id = Uuid::new_v4();
        let url = format!("{}{}", self.base_url, request.path);
        debug!(%request_id, method = %request.method, path = %request.path, "sending request");

        let mut builder = self
            .client
            .request(request.method.into(), &url)
            .header(APP_ID_HEADER, &self.app_id)
            .header(APP_KEY_HEADER, &self.app_key);
        if let Some(token) = access_token {
            builder = builder.bearer_auth(token);
        }

        let uploading = matches!(request.body, RequestBody::Bytes { .. });
        match request.body {
            RequestBody::Empty => {}
            RequestBody::Json(body) => {
                if let Some(content_type) = &request.content_type {
                    builder = builder.header(CONTENT_TYPE, content_type.as_str());
                }
                builder = builder.json(&body);
            }
            RequestBody::Bytes { content_type, data } => {
                builder = builder.header(CONTENT_TYPE, content_type);
                match progress {
                    Some(progress) => {
                        let total = data.len() as u64;
                        let progress = progress.clone();
                        let chunks: Vec<Vec<u8>> =
                            data.chunks(CHUNK_SIZE).map(<[u8]>::to_vec).collect();
                        let mut sent = 0u64;
                        let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
                            sent += chunk.len() as u64;
                            progress.report_bytes(sent, total);
                            Ok::<_, std::io::Error>(chunk)
                        }));
                        builder = builder
                            .header(CONTENT_LENGTH, total)
                            .body(reqwest::Body::wrap_stream(stream));
                    }
                    None => builder = builder.body(data),
                }
            }
        }
        if !uploading {
            builder = builder.header(ACCEPT, "*/*");
        }

        let mut response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let error = status_error(status.as_u16(), &text);
            warn!(%request_id, status = status.as_u16(), error = %error, "request failed");
            return Err(error);
        }

        let expected = response.content_length();
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            if let (false, Some(progress), Some(total)) = (uploading, progress, expected) {
                progress.report_bytes(body.len() as u64, total);
            }
        }
        if let Some(progress) = progress {
            progress.report(1.0);
        }

        debug!(%request_id, status = status.as_u16(), bytes = body.len(), "request completed");
        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }
}
