//! Shared lifecycle of syncable entities.
//!
//! An entity is a local mirror of a server record. It starts `Local` (no
//! server id), becomes `Synced` after its first successful save, turns
//! `Dirty` when fields change, and ends `Deleted` once removed on the server.
//! A deleted entity rejects every further operation.
//!
//! Saves are incremental: a synced entity only sends the keys changed since
//! the last save, with removed keys as `null` (JSON merge-patch). A save with
//! nothing to send makes no request.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use kii_types::{validate_custom_key, EntityId, EntityKind, ObjectUri, ServerTime};

use crate::error::{KiiError, KiiResult};
use crate::hydrate::{writable_fields, ServerMetadata};
use crate::invocation::Remote;
use crate::transport::{ApiRequest, HttpMethod};

pub(crate) const MERGE_PATCH: &str = "application/merge-patch+json";

/// Where an entity stands relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// Never saved; has no server id.
    Local,
    /// Matches the server as of the last save or refresh.
    Synced,
    /// Saved before, with unsaved local changes.
    Dirty,
    /// Removed on the server.
    Deleted,
}

/// Identity, timestamps and fields common to every entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCore {
    kind: EntityKind,
    uuid: Option<EntityId>,
    fields: Map<String, Value>,
    dirty: BTreeSet<String>,
    created: Option<ServerTime>,
    modified: Option<ServerTime>,
    deleted: bool,
}

impl EntityCore {
    pub(crate) fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            uuid: None,
            fields: Map::new(),
            dirty: BTreeSet::new(),
            created: None,
            modified: None,
            deleted: false,
        }
    }

    /// A reference to an existing server record whose fields are not loaded.
    pub(crate) fn with_id(kind: EntityKind, id: EntityId) -> Self {
        Self {
            uuid: Some(id),
            ..Self::new(kind)
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn uuid(&self) -> Option<&EntityId> {
        self.uuid.as_ref()
    }

    pub fn created(&self) -> Option<ServerTime> {
        self.created
    }

    pub fn modified(&self) -> Option<ServerTime> {
        self.modified
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Keys changed or removed since the last save or refresh.
    pub fn dirty_keys(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub(crate) fn ensure_live(&self) -> KiiResult<()> {
        if self.deleted {
            let id = self.uuid.as_ref().map_or("(unsaved)", EntityId::as_str);
            return Err(KiiError::StaleEntity(format!("{} {id}", self.kind)));
        }
        Ok(())
    }

    /// The server id, for operations that need the entity to exist remotely.
    pub(crate) fn require_id(&self, operation: &str) -> KiiResult<&EntityId> {
        self.ensure_live()?;
        self.uuid.as_ref().ok_or_else(|| {
            KiiError::Precondition(format!("cannot {operation} a {} that has not been saved", self.kind))
        })
    }

    pub(crate) fn put(&mut self, key: &str, value: Value) {
        self.fields.insert(key.to_string(), value);
        self.dirty.insert(key.to_string());
    }

    /// Sets a value the server already holds, without marking it dirty.
    pub(crate) fn put_synced(&mut self, key: &str, value: Value) {
        self.fields.insert(key.to_string(), value);
    }

    /// Removes a field and marks it dirty even when it was never loaded, so
    /// the next delta carries a `null` for it.
    pub(crate) fn take(&mut self, key: &str) -> Option<Value> {
        self.dirty.insert(key.to_string());
        self.fields.remove(key)
    }

    /// Changed keys with their new values; removed keys map to `null`.
    pub(crate) fn delta(&self) -> Map<String, Value> {
        self.dirty
            .iter()
            .map(|key| (key.clone(), self.fields.get(key).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    pub(crate) fn mark_synced(&mut self) {
        self.dirty.clear();
    }

    pub(crate) fn apply_metadata(&mut self, meta: &ServerMetadata) {
        if let Some(id) = &meta.id {
            self.uuid = Some(id.clone());
        }
        if meta.created.is_some() {
            self.created = meta.created;
        }
        if meta.modified.is_some() {
            self.modified = meta.modified;
        }
    }

    /// Replaces all fields with a server representation and clears the dirty set.
    pub(crate) fn replace_fields(&mut self, fields: Map<String, Value>) {
        self.fields = fields;
        self.dirty.clear();
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.deleted = true;
        self.dirty.clear();
    }
}

/// A syncable entity.
///
/// Implementors supply their identity plumbing (paths, URIs, create
/// requests); the trait provides the lifecycle in all three call forms.
#[async_trait]
pub trait Entity: Remote + Sync {
    fn core(&self) -> &EntityCore;
    fn core_mut(&mut self) -> &mut EntityCore;

    /// REST path of the record with server id `id`.
    fn resource_path(&self, id: &EntityId) -> String;

    /// `kiicloud://` URI of the record with server id `id`.
    fn uri_for(&self, id: &EntityId) -> ObjectUri;

    /// Request that creates the record from the full local payload.
    fn create_request(&self) -> KiiResult<ApiRequest>;

    /// Request that applies `delta` to the record at `path`.
    fn update_request(&self, path: String, delta: Map<String, Value>) -> ApiRequest {
        ApiRequest::json(HttpMethod::Patch, path, Value::Object(delta)).with_content_type(MERGE_PATCH)
    }

    /// Keys exposed through typed accessors; `set_field` rejects them.
    fn builtin_keys(&self) -> &'static [&'static str] {
        &[]
    }

    /// Server-only attributes. They never enter the field map.
    fn read_only_keys(&self) -> &'static [&'static str] {
        &[]
    }

    /// Picks read-only attributes out of a server representation.
    fn apply_read_only(&mut self, _body: &Value) {}

    /// Lines appended to [`Entity::describe`].
    fn describe_extra(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    /// Whether a save has anything to send.
    fn has_pending_changes(&self) -> bool {
        self.core().is_dirty()
    }

    /// Replaces local state with a server representation.
    fn apply_remote(&mut self, body: &Value) {
        let kind = self.core().kind();
        let meta = ServerMetadata::parse(kind, body);
        let fields = writable_fields(kind, body, self.read_only_keys());
        self.apply_read_only(body);
        let core = self.core_mut();
        core.apply_metadata(&meta);
        core.replace_fields(fields);
    }

    fn uuid(&self) -> Option<&EntityId> {
        self.core().uuid()
    }

    fn created(&self) -> Option<ServerTime> {
        self.core().created()
    }

    fn modified(&self) -> Option<ServerTime> {
        self.core().modified()
    }

    fn state(&self) -> SyncState {
        let core = self.core();
        if core.is_deleted() {
            SyncState::Deleted
        } else if core.uuid().is_none() {
            SyncState::Local
        } else if self.has_pending_changes() {
            SyncState::Dirty
        } else {
            SyncState::Synced
        }
    }

    /// URI of the saved record.
    fn object_uri(&self) -> KiiResult<ObjectUri> {
        let id = self.core().require_id("build a URI for")?;
        Ok(self.uri_for(id))
    }

    /// Human-readable dump of identity, state and fields. Changed keys are
    /// marked with `*`.
    fn describe(&self) -> String {
        let core = self.core();
        let mut lines = vec![format!(
            "{} {} [{:?}]",
            core.kind(),
            core.uuid().map_or("(unsaved)", EntityId::as_str),
            self.state()
        )];
        if let Some(created) = core.created() {
            lines.push(format!("  created: {created}"));
        }
        if let Some(modified) = core.modified() {
            lines.push(format!("  modified: {modified}"));
        }
        for (label, value) in self.describe_extra() {
            lines.push(format!("  {label}: {value}"));
        }
        for (key, value) in core.fields() {
            let marker = if core.dirty.contains(key) { "*" } else { "" };
            lines.push(format!("  {key}{marker} = {value}"));
        }
        for key in core.dirty_keys().filter(|k| !core.fields().contains_key(*k)) {
            lines.push(format!("  {key}* = (removed)"));
        }
        lines.join("\n")
    }

    /// Creates the record, or sends the changes made since the last save.
    async fn save(&mut self) -> KiiResult<()> {
        save_fields(self).await.map(|_| ())
    }

    /// Reloads every field from the server, discarding local changes.
    async fn refresh(&mut self) -> KiiResult<()> {
        refresh_fields(self).await.map(|_| ())
    }

    /// Removes the record on the server.
    async fn delete(&mut self) -> KiiResult<()> {
        delete_record(self).await
    }

    fn save_blocking(&mut self) -> KiiResult<()> {
        self.run_blocking(|e| e.save())
    }

    fn refresh_blocking(&mut self) -> KiiResult<()> {
        self.run_blocking(|e| e.refresh())
    }

    fn delete_blocking(&mut self) -> KiiResult<()> {
        self.run_blocking(|e| e.delete())
    }

    fn save_in_background<F>(self, worker: &Handle, done: F) -> JoinHandle<()>
    where
        F: FnOnce(Self, KiiResult<()>) + Send + 'static,
    {
        self.run_in_background(worker, |e| e.save(), done)
    }

    fn refresh_in_background<F>(self, worker: &Handle, done: F) -> JoinHandle<()>
    where
        F: FnOnce(Self, KiiResult<()>) + Send + 'static,
    {
        self.run_in_background(worker, |e| e.refresh(), done)
    }

    fn delete_in_background<F>(self, worker: &Handle, done: F) -> JoinHandle<()>
    where
        F: FnOnce(Self, KiiResult<()>) + Send + 'static,
    {
        self.run_in_background(worker, |e| e.delete(), done)
    }
}

/// Create-or-patch of the field map. Returns the response body, or `None`
/// when nothing was sent.
pub(crate) async fn save_fields<E: Entity>(entity: &mut E) -> KiiResult<Option<Value>> {
    entity.core().ensure_live()?;
    let client = entity.client().clone();
    let kind = entity.core().kind();

    let Some(id) = entity.core().uuid().cloned() else {
        let request = entity.create_request()?;
        let body = client.send_json(request).await?;
        let mut meta = ServerMetadata::parse(kind, &body);
        let id = meta.id.clone().ok_or_else(|| {
            KiiError::MalformedResponse(format!("create response for {kind} carries no id"))
        })?;
        meta.modified = meta.modified.or(meta.created);
        entity.apply_read_only(&body);
        let core = entity.core_mut();
        core.apply_metadata(&meta);
        core.mark_synced();
        info!(%kind, %id, "entity created");
        return Ok(Some(body));
    };

    let delta = entity.core().delta();
    if delta.is_empty() {
        debug!(%kind, %id, "no changes to save");
        return Ok(None);
    }

    let request = entity.update_request(entity.resource_path(&id), delta);
    let body = client.send_json(request).await?;
    let meta = ServerMetadata::parse(kind, &body);
    let core = entity.core_mut();
    core.apply_metadata(&meta);
    core.mark_synced();
    debug!(%kind, %id, "entity updated");
    Ok(Some(body))
}

/// GET of the record, replacing local state.
pub(crate) async fn refresh_fields<E: Entity>(entity: &mut E) -> KiiResult<Value> {
    let id = entity.core().require_id("refresh")?.clone();
    let client = entity.client().clone();
    let body = client.send_json(ApiRequest::get(entity.resource_path(&id))).await?;
    entity.apply_remote(&body);
    debug!(kind = %entity.core().kind(), %id, "entity refreshed");
    Ok(body)
}

/// DELETE of the record.
pub(crate) async fn delete_record<E: Entity>(entity: &mut E) -> KiiResult<()> {
    let id = entity.core().require_id("delete")?.clone();
    let client = entity.client().clone();
    client.send(ApiRequest::delete(entity.resource_path(&id))).await?;
    entity.core_mut().mark_deleted();
    info!(kind = %entity.core().kind(), %id, "entity deleted");
    Ok(())
}

/// Arbitrary custom fields.
pub trait Fields: Entity {
    /// Sets a custom field. Reserved and SDK-managed keys are rejected, as
    /// are values that do not serialize to non-null JSON.
    fn set_field<V: Serialize>(&mut self, key: &str, value: V) -> KiiResult<()> {
        self.core().ensure_live()?;
        check_custom_key(self, key)?;
        let value = serde_json::to_value(value).map_err(|e| KiiError::InvalidFieldType {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        if value.is_null() {
            return Err(KiiError::InvalidFieldType {
                key: key.to_string(),
                reason: "null cannot be stored; use remove_field".into(),
            });
        }
        self.core_mut().put(key, value);
        Ok(())
    }

    fn get_field(&self, key: &str) -> Option<&Value> {
        self.core().get(key)
    }

    /// Reads a field as `T`; `None` when absent or of another type.
    fn get_field_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.core()
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    fn has_field(&self, key: &str) -> bool {
        self.core().get(key).is_some()
    }

    /// Removes a custom field; the next save deletes it on the server.
    fn remove_field(&mut self, key: &str) -> KiiResult<()> {
        self.core().ensure_live()?;
        check_custom_key(self, key)?;
        self.core_mut().take(key);
        Ok(())
    }

    /// Fields other than the SDK-managed ones.
    fn custom_fields(&self) -> Vec<(&str, &Value)> {
        let builtin = self.builtin_keys();
        self.core()
            .fields()
            .iter()
            .filter(|(k, _)| !builtin.contains(&k.as_str()))
            .map(|(k, v)| (k.as_str(), v))
            .collect()
    }
}

fn check_custom_key<E: Entity + ?Sized>(entity: &E, key: &str) -> KiiResult<()> {
    validate_custom_key(key).map_err(|e| KiiError::Validation(e.to_string()))?;
    if entity.builtin_keys().contains(&key) || entity.read_only_keys().contains(&key) {
        return Err(KiiError::Validation(format!(
            "field key {key:?} is managed by the SDK and has a dedicated accessor"
        )));
    }
    Ok(())
}
