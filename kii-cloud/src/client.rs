//! The application client.

use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Handle;

use kii_types::{validate_bucket_name, EntityId, ObjectUri, Scope};

use crate::bucket::KiiBucket;
use crate::config::KiiConfig;
use crate::error::{KiiError, KiiResult};
use crate::file::KiiFile;
use crate::file_bucket::KiiFileBucket;
use crate::http::HttpTransport;
use crate::invocation::{Invoker, Remote};
use crate::object::KiiObject;
use crate::progress::Progress;
use crate::session::{Session, TokenStore};
use crate::transport::{ApiRequest, ApiResponse, Auth, Transport};

struct ClientInner {
    config: KiiConfig,
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
    invoker: Arc<Invoker>,
}

/// Entry point of the SDK: one application on one site.
///
/// Cheap to clone; clones share the transport, the session and the runtime
/// behind the blocking call form. Every entity keeps a clone of the client
/// it was created from.
#[derive(Clone)]
pub struct KiiClient {
    inner: Arc<ClientInner>,
}

/// Builder for [`KiiClient`].
pub struct KiiClientBuilder {
    config: KiiConfig,
    transport: Option<Arc<dyn Transport>>,
    session: Option<Arc<Session>>,
}

impl KiiClientBuilder {
    /// Uses `transport` instead of the HTTPS transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Persists the session token in `store`.
    #[must_use]
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.session = Some(Arc::new(Session::with_store(store)));
        self
    }

    pub fn build(self) -> KiiResult<KiiClient> {
        self.config.validate()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config)?),
        };
        let invoker = Arc::new(Invoker::new(self.config.blocking_worker_threads));
        Ok(KiiClient {
            inner: Arc::new(ClientInner {
                config: self.config,
                transport,
                session: self.session.unwrap_or_default(),
                invoker,
            }),
        })
    }
}

impl KiiClient {
    /// Creates a client talking HTTPS to the configured site.
    pub fn new(config: KiiConfig) -> KiiResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: KiiConfig) -> KiiClientBuilder {
        KiiClientBuilder {
            config,
            transport: None,
            session: None,
        }
    }

    pub fn config(&self) -> &KiiConfig {
        &self.inner.config
    }

    pub fn app_id(&self) -> &str {
        &self.inner.config.app_id
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    pub(crate) fn invoker(&self) -> Arc<Invoker> {
        Arc::clone(&self.inner.invoker)
    }

    /// Handle of the client's own runtime, for use as a background worker.
    pub fn worker(&self) -> KiiResult<Handle> {
        self.inner.invoker.handle()
    }

    /// Path prefix of `scope` in this application.
    pub(crate) fn scope_path(&self, scope: &Scope) -> String {
        scope.path_prefix(self.app_id())
    }

    pub(crate) async fn send(&self, request: ApiRequest) -> KiiResult<ApiResponse> {
        self.send_with_progress(request, None).await
    }

    pub(crate) async fn send_with_progress(
        &self,
        request: ApiRequest,
        progress: Option<&Progress>,
    ) -> KiiResult<ApiResponse> {
        let token = match &request.auth {
            Auth::None => None,
            Auth::Session => self.inner.session.access_token(),
            Auth::Token(token) => Some(token.clone()),
        };
        Ok(self
            .inner
            .transport
            .send(request, token.as_deref(), progress)
            .await?)
    }

    pub(crate) async fn send_json(&self, request: ApiRequest) -> KiiResult<Value> {
        self.send(request).await?.json()
    }

    /// An application-scope object bucket.
    pub fn bucket(&self, name: &str) -> KiiResult<KiiBucket> {
        validate_bucket_name(name)?;
        Ok(KiiBucket::new(self.clone(), Scope::App, name))
    }

    /// An application-scope file bucket.
    pub fn file_bucket(&self, name: &str) -> KiiResult<KiiFileBucket> {
        validate_bucket_name(name)?;
        Ok(KiiFileBucket::new(self.clone(), Scope::App, name))
    }

    /// An existing object, addressed by URI. No request is made.
    pub fn object_with_uri(&self, uri: &str) -> KiiResult<KiiObject> {
        match uri.parse::<ObjectUri>()? {
            ObjectUri::Object { scope, bucket, id } => {
                Ok(KiiObject::with_id(self.clone(), scope, bucket, id))
            }
            other => Err(KiiError::Validation(format!("not an object URI: {other}"))),
        }
    }

    /// An existing file, addressed by URI. No request is made.
    pub fn file_with_uri(&self, uri: &str) -> KiiResult<KiiFile> {
        match uri.parse::<ObjectUri>()? {
            ObjectUri::File { scope, bucket, id } => {
                Ok(KiiFile::with_id(self.clone(), scope, bucket, id))
            }
            other => Err(KiiError::Validation(format!("not a file URI: {other}"))),
        }
    }

    /// Id of the signed-in user, or a precondition error.
    pub(crate) fn require_user_id(&self, operation: &str) -> KiiResult<EntityId> {
        self.inner.session.user_id().ok_or_else(|| {
            KiiError::Precondition(format!("{operation} requires a signed-in user"))
        })
    }
}

impl Remote for KiiClient {
    fn client(&self) -> &KiiClient {
        self
    }
}

impl std::fmt::Debug for KiiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiiClient")
            .field("app_id", &self.app_id())
            .field("base_url", &self.inner.config.base_url())
            .field("session", &self.inner.session)
            .finish()
    }
}
