//! Objects: schemaless JSON records in a bucket.

use serde_json::Value;

use kii_types::{EntityId, EntityKind, ObjectUri, Scope};

use crate::acl::KiiAcl;
use crate::client::KiiClient;
use crate::entity::{Entity, EntityCore, Fields};
use crate::error::KiiResult;
use crate::invocation::Remote;
use crate::transport::{ApiRequest, HttpMethod};

/// A record in an object bucket.
#[derive(Debug, Clone)]
pub struct KiiObject {
    client: KiiClient,
    scope: Scope,
    bucket: String,
    core: EntityCore,
}

impl KiiObject {
    pub(crate) fn new(client: KiiClient, scope: Scope, bucket: impl Into<String>) -> Self {
        Self {
            client,
            scope,
            bucket: bucket.into(),
            core: EntityCore::new(EntityKind::Object),
        }
    }

    pub(crate) fn with_id(client: KiiClient, scope: Scope, bucket: impl Into<String>, id: EntityId) -> Self {
        Self {
            client,
            scope,
            bucket: bucket.into(),
            core: EntityCore::with_id(EntityKind::Object, id),
        }
    }

    /// An object hydrated from a query result or listing.
    pub(crate) fn from_remote(client: KiiClient, scope: Scope, bucket: &str, body: &Value) -> Self {
        let mut object = Self::new(client, scope, bucket);
        object.apply_remote(body);
        object
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    fn collection_path(&self) -> String {
        format!("{}/buckets/{}/objects", self.client.scope_path(&self.scope), self.bucket)
    }

    /// ACL of this object. The object must have been saved.
    pub fn acl(&self) -> KiiResult<KiiAcl> {
        let id = self.core.require_id("edit the ACL of")?;
        Ok(KiiAcl::new(self.client.clone(), &self.resource_path(id)))
    }
}

impl Remote for KiiObject {
    fn client(&self) -> &KiiClient {
        &self.client
    }
}

impl Entity for KiiObject {
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
        ObjectUri::Object {
            scope: self.scope.clone(),
            bucket: self.bucket.clone(),
            id: id.clone(),
        }
    }

    fn create_request(&self) -> KiiResult<ApiRequest> {
        Ok(ApiRequest::json(
            HttpMethod::Post,
            self.collection_path(),
            Value::Object(self.core.fields().clone()),
        ))
    }

    fn describe_extra(&self) -> Vec<(&'static str, String)> {
        vec![("bucket", format!("{}{}", self.scope.uri_prefix(), self.bucket))]
    }
}

impl Fields for KiiObject {}
