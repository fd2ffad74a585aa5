//! Files: metadata records with a binary body and a trash lifecycle.
//!
//! A file's metadata follows the common entity lifecycle. Its body is
//! uploaded and downloaded separately, and it moves through
//! `Active -> Trashed -> Shredded`; shredding is the permanent delete.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use kii_types::{EntityId, EntityKind, ObjectUri, Scope, ServerTime};

use crate::acl::KiiAcl;
use crate::client::KiiClient;
use crate::entity::{Entity, EntityCore, Fields};
use crate::error::{KiiError, KiiResult};
use crate::hydrate::{bool_field, string_field, ServerMetadata};
use crate::invocation::Remote;
use crate::progress::Progress;
use crate::transport::{ApiRequest, HttpMethod};

const TITLE: &str = "title";
const OPTIONAL: &str = "optional";
const MIME_TYPE: &str = "mimeType";
const FILE_SIZE: &str = "fileSize";
const TRASHED: &str = "trashed";
const HAS_BODY: &str = "hasBody";

const OCTET_STREAM: &str = "application/octet-stream";

/// Where a file stands in the trash lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrashState {
    Active,
    Trashed,
    /// Permanently deleted.
    Shredded,
}

impl fmt::Display for TrashState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrashState::Active => "active",
            TrashState::Trashed => "trashed",
            TrashState::Shredded => "shredded",
        })
    }
}

/// A file in a file bucket.
#[derive(Debug, Clone)]
pub struct KiiFile {
    client: KiiClient,
    scope: Scope,
    bucket: String,
    core: EntityCore,
    local_path: Option<PathBuf>,
    mime_type: Option<String>,
    file_size: Option<u64>,
    has_body: bool,
    trash_state: TrashState,
}

impl KiiFile {
    pub(crate) fn new(client: KiiClient, scope: Scope, bucket: impl Into<String>) -> Self {
        Self {
            client,
            scope,
            bucket: bucket.into(),
            core: EntityCore::new(EntityKind::File),
            local_path: None,
            mime_type: None,
            file_size: None,
            has_body: false,
            trash_state: TrashState::Active,
        }
    }

    /// A new file whose body will come from `path`. The MIME type is guessed
    /// from the extension.
    pub(crate) fn with_local_path(
        client: KiiClient,
        scope: Scope,
        bucket: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        let path = path.into();
        let mut file = Self::new(client, scope, bucket);
        file.mime_type = Some(guess_mime(&path));
        file.local_path = Some(path);
        file
    }

    pub(crate) fn with_id(client: KiiClient, scope: Scope, bucket: impl Into<String>, id: EntityId) -> Self {
        let mut file = Self::new(client, scope, bucket);
        file.core = EntityCore::with_id(EntityKind::File, id);
        file
    }

    pub(crate) fn from_remote(client: KiiClient, scope: Scope, bucket: &str, body: &Value) -> Self {
        let mut file = Self::new(client, scope, bucket);
        file.apply_remote(body);
        file
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn title(&self) -> Option<&str> {
        self.core.get(TITLE).and_then(Value::as_str)
    }

    pub fn set_title(&mut self, title: &str) -> KiiResult<()> {
        self.core.ensure_live()?;
        self.core.put(TITLE, json!(title));
        Ok(())
    }

    pub fn optional(&self) -> Option<&str> {
        self.core.get(OPTIONAL).and_then(Value::as_str)
    }

    pub fn set_optional(&mut self, optional: &str) -> KiiResult<()> {
        self.core.ensure_live()?;
        self.core.put(OPTIONAL, json!(optional));
        Ok(())
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    /// Points the body at another local file.
    pub fn set_local_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.core.uuid().is_none() {
            self.mime_type = Some(guess_mime(&path));
        }
        self.local_path = Some(path);
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn file_size(&self) -> Option<u64> {
        self.file_size
    }

    pub fn has_body(&self) -> bool {
        self.has_body
    }

    pub fn trash_state(&self) -> TrashState {
        self.trash_state
    }

    fn collection_path(&self) -> String {
        format!("{}/filebuckets/{}/files", self.client.scope_path(&self.scope), self.bucket)
    }

    fn require_trash_state(&self, operation: &'static str, expected: TrashState) -> KiiResult<()> {
        if self.trash_state != expected {
            return Err(KiiError::InvalidState {
                operation,
                state: self.trash_state,
            });
        }
        Ok(())
    }

    /// ACL of this file. The file must have been saved.
    pub fn acl(&self) -> KiiResult<KiiAcl> {
        let id = self.core.require_id("edit the ACL of")?;
        Ok(KiiAcl::new(self.client.clone(), &self.resource_path(id)))
    }

    /// Saves metadata only.
    pub async fn save_metadata(&mut self) -> KiiResult<()> {
        self.save().await
    }

    /// Saves metadata, then uploads the body from the local path.
    ///
    /// If the file was created by this call and only the upload failed, the
    /// error is [`KiiError::PartialFailure`]: the file exists remotely
    /// without a body and this value holds its id.
    pub async fn save_file(&mut self, progress: Option<&Progress>) -> KiiResult<()> {
        self.core.ensure_live()?;
        let Some(path) = &self.local_path else {
            return Err(KiiError::Precondition("file has no local path to upload".into()));
        };
        // Checked before creating metadata so an unreadable body leaves no
        // record behind on the server.
        let local = tokio::fs::metadata(path).await?;
        if !local.is_file() {
            return Err(KiiError::Precondition(format!("{} is not a regular file", path.display())));
        }
        let creating = self.core.uuid().is_none();
        self.save().await?;

        match self.save_body(progress).await {
            Ok(()) => Ok(()),
            Err(source) if creating => {
                let file_id = self.core.uuid().map(EntityId::to_string).unwrap_or_default();
                Err(KiiError::PartialFailure {
                    file_id,
                    source: Box::new(source),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Uploads the body from the local path.
    pub async fn save_body(&mut self, progress: Option<&Progress>) -> KiiResult<()> {
        let id = self.core.require_id("upload the body of")?.clone();
        let path = self
            .local_path
            .clone()
            .ok_or_else(|| KiiError::Precondition("file has no local path to upload".into()))?;
        let data = tokio::fs::read(&path).await?;
        let size = data.len() as u64;
        let content_type = self.mime_type.clone().unwrap_or_else(|| OCTET_STREAM.to_string());

        let request = ApiRequest::bytes(
            HttpMethod::Put,
            format!("{}/body", self.resource_path(&id)),
            content_type,
            data,
        );
        let response = self.client.send_with_progress(request, progress).await?.json()?;

        if let Some(modified) = response
            .get("modifiedAt")
            .or_else(|| response.get("_modified"))
            .and_then(ServerTime::from_json)
        {
            self.core.apply_metadata(&ServerMetadata {
                modified: Some(modified),
                ..Default::default()
            });
        }
        self.file_size = Some(size);
        self.has_body = true;
        info!(%id, bytes = size, "file body uploaded");
        Ok(())
    }

    /// Downloads the body into `to_path`.
    pub async fn get_body(&mut self, to_path: impl AsRef<Path>, progress: Option<&Progress>) -> KiiResult<()> {
        let id = self.core.require_id("download the body of")?.clone();
        let request = ApiRequest::get(format!("{}/body", self.resource_path(&id)));
        let response = self.client.send_with_progress(request, progress).await?;
        tokio::fs::write(to_path.as_ref(), &response.body).await?;
        debug!(%id, bytes = response.body.len(), path = %to_path.as_ref().display(), "file body downloaded");
        Ok(())
    }

    /// Moves an active file to the trash.
    ///
    /// A file in the trash fails with [`KiiError::InvalidState`]. A shredded
    /// file is deleted, so it fails with [`KiiError::StaleEntity`] before its
    /// trash state is looked at; the same holds for restore and shred.
    pub async fn move_to_trash(&mut self) -> KiiResult<()> {
        let id = self.core.require_id("move to trash")?.clone();
        self.require_trash_state("move to trash", TrashState::Active)?;
        self.client
            .send(ApiRequest::new(HttpMethod::Post, format!("{}/trash", self.resource_path(&id))))
            .await?;
        self.trash_state = TrashState::Trashed;
        info!(%id, "file moved to trash");
        Ok(())
    }

    pub async fn restore_from_trash(&mut self) -> KiiResult<()> {
        let id = self.core.require_id("restore")?.clone();
        self.require_trash_state("restore", TrashState::Trashed)?;
        self.client
            .send(ApiRequest::delete(format!("{}/trash", self.resource_path(&id))))
            .await?;
        self.trash_state = TrashState::Active;
        info!(%id, "file restored from trash");
        Ok(())
    }

    /// Permanently deletes a trashed file.
    pub async fn shred(&mut self) -> KiiResult<()> {
        let id = self.core.require_id("shred")?.clone();
        self.require_trash_state("shred", TrashState::Trashed)?;
        self.client.send(ApiRequest::delete(self.resource_path(&id))).await?;
        self.trash_state = TrashState::Shredded;
        self.core.mark_deleted();
        info!(%id, "file shredded");
        Ok(())
    }

    /// Publishes the body at a public URL, optionally expiring.
    pub async fn publish(&mut self, expires_at: Option<chrono::DateTime<chrono::Utc>>) -> KiiResult<String> {
        let id = self.core.require_id("publish")?.clone();
        self.require_trash_state("publish", TrashState::Active)?;
        if !self.has_body {
            return Err(KiiError::NoBody(id.to_string()));
        }

        let mut body = Map::new();
        if let Some(at) = expires_at {
            body.insert("expiresAt".into(), json!(at.timestamp_millis()));
        }
        let request = ApiRequest::json(
            HttpMethod::Post,
            format!("{}/publish", self.resource_path(&id)),
            Value::Object(body),
        );
        let response = self.client.send_json(request).await?;
        let url = string_field(&response, "url")
            .ok_or_else(|| KiiError::MalformedResponse("publish response carries no url".into()))?;
        info!(%id, "file published");
        Ok(url)
    }

    pub fn save_file_blocking(&mut self) -> KiiResult<()> {
        self.run_blocking(|file| Box::pin(file.save_file(None)))
    }

    pub fn get_body_blocking(&mut self, to_path: impl Into<PathBuf>) -> KiiResult<()> {
        let to_path = to_path.into();
        self.run_blocking(move |file| Box::pin(async move { file.get_body(&to_path, None).await }))
    }

    pub fn move_to_trash_blocking(&mut self) -> KiiResult<()> {
        self.run_blocking(|file| Box::pin(file.move_to_trash()))
    }

    pub fn restore_from_trash_blocking(&mut self) -> KiiResult<()> {
        self.run_blocking(|file| Box::pin(file.restore_from_trash()))
    }

    pub fn shred_blocking(&mut self) -> KiiResult<()> {
        self.run_blocking(|file| Box::pin(file.shred()))
    }

    pub fn publish_blocking(
        &mut self,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> KiiResult<String> {
        self.run_blocking(move |file| Box::pin(file.publish(expires_at)))
    }

    /// Runs [`save_file`](Self::save_file) on `worker`. `progress` follows
    /// the upload; `done` gets the file back with the result.
    pub fn save_file_in_background<F>(
        self,
        worker: &tokio::runtime::Handle,
        progress: Option<Progress>,
        done: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce(Self, KiiResult<()>) + Send + 'static,
    {
        self.run_in_background(
            worker,
            move |file| Box::pin(async move { file.save_file(progress.as_ref()).await }),
            done,
        )
    }

    pub fn save_body_in_background<F>(
        self,
        worker: &tokio::runtime::Handle,
        progress: Option<Progress>,
        done: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce(Self, KiiResult<()>) + Send + 'static,
    {
        self.run_in_background(
            worker,
            move |file| Box::pin(async move { file.save_body(progress.as_ref()).await }),
            done,
        )
    }

    /// Downloads the body into `to_path` on `worker`, reporting to `progress`.
    pub fn get_body_in_background<F>(
        self,
        worker: &tokio::runtime::Handle,
        to_path: impl Into<PathBuf>,
        progress: Option<Progress>,
        done: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce(Self, KiiResult<()>) + Send + 'static,
    {
        let to_path = to_path.into();
        self.run_in_background(
            worker,
            move |file| Box::pin(async move { file.get_body(&to_path, progress.as_ref()).await }),
            done,
        )
    }
}

impl Remote for KiiFile {
    fn client(&self) -> &KiiClient {
        &self.client
    }
}

#[async_trait]
impl Entity for KiiFile {
    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn resource_path(&self, id: &EntityId) -> String {
        format!("{}/{id}", self.collection_path())
    }

    fn uri_for(&self, id: &EntityId) -> ObjectUri {
        ObjectUri::File {
            scope: self.scope.clone(),
            bucket: self.bucket.clone(),
            id: id.clone(),
        }
    }

    fn create_request(&self) -> KiiResult<ApiRequest> {
        let mut payload = self.core.fields().clone();
        if let Some(mime) = &self.mime_type {
            payload.insert(MIME_TYPE.into(), json!(mime));
        }
        Ok(ApiRequest::json(HttpMethod::Post, self.collection_path(), Value::Object(payload)))
    }

    fn builtin_keys(&self) -> &'static [&'static str] {
        &[TITLE, OPTIONAL]
    }

    fn read_only_keys(&self) -> &'static [&'static str] {
        &[MIME_TYPE, FILE_SIZE, TRASHED, HAS_BODY]
    }

    fn apply_read_only(&mut self, body: &Value) {
        if let Some(mime) = string_field(body, MIME_TYPE) {
            self.mime_type = Some(mime);
        }
        if let Some(size) = body.get(FILE_SIZE).and_then(Value::as_u64) {
            self.file_size = Some(size);
        }
        if let Some(has_body) = bool_field(body, HAS_BODY) {
            self.has_body = has_body;
        } else if let Some(size) = self.file_size {
            self.has_body = size > 0;
        }
        if let Some(trashed) = bool_field(body, TRASHED) {
            self.trash_state = if trashed {
                TrashState::Trashed
            } else {
                TrashState::Active
            };
        }
    }

    fn describe_extra(&self) -> Vec<(&'static str, String)> {
        let mut extra = vec![
            ("bucket", format!("{}{}", self.scope.uri_prefix(), self.bucket)),
            ("trash state", self.trash_state.to_string()),
        ];
        if let Some(mime) = &self.mime_type {
            extra.push(("mime type", mime.clone()));
        }
        if let Some(size) = self.file_size {
            extra.push(("size", size.to_string()));
        }
        if let Some(path) = &self.local_path {
            extra.push(("local path", path.display().to_string()));
        }
        extra
    }

    /// Files are deleted by shredding; the file must be in the trash.
    async fn delete(&mut self) -> KiiResult<()> {
        self.shred().await
    }
}

impl Fields for KiiFile {}

fn guess_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
