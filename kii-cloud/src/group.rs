//! User groups.
//!
//! Membership changes are staged like ACL entries and sent by `save`. A
//! local group is created with its name, owner and initial members in a
//! single request; an existing group sends a rename when the name changed,
//! then one request per added or removed member.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::{info, warn};

use kii_types::{validate_bucket_name, EntityId, EntityKind, ObjectUri, Scope};

use crate::bucket::KiiBucket;
use crate::client::KiiClient;
use crate::entity::{refresh_fields, save_fields, Entity, EntityCore};
use crate::error::{KiiError, KiiResult};
use crate::file_bucket::KiiFileBucket;
use crate::hydrate::string_field;
use crate::invocation::Remote;
use crate::transport::{ApiRequest, HttpMethod};
use crate::user::KiiUser;

const NAME: &str = "name";
const OWNER: &str = "owner";
const NOT_FOUND_USERS: &str = "notFoundUsers";

const GROUP_CREATION_REQUEST: &str = "application/vnd.kii.GroupCreationRequest+json";

/// A named set of users.
#[derive(Debug, Clone)]
pub struct KiiGroup {
    client: KiiClient,
    core: EntityCore,
    owner: Option<EntityId>,
    members: BTreeSet<EntityId>,
    pending_additions: BTreeSet<EntityId>,
    pending_removals: BTreeSet<EntityId>,
}

fn validate_group_name(name: &str) -> KiiResult<()> {
    if name.trim().is_empty() {
        return Err(KiiError::Validation("group name must not be empty".into()));
    }
    Ok(())
}

impl KiiGroup {
    fn new(client: KiiClient) -> Self {
        Self {
            client,
            core: EntityCore::new(EntityKind::Group),
            owner: None,
            members: BTreeSet::new(),
            pending_additions: BTreeSet::new(),
            pending_removals: BTreeSet::new(),
        }
    }

    pub(crate) fn with_id(client: KiiClient, id: EntityId) -> Self {
        let mut group = Self::new(client);
        group.core = EntityCore::with_id(EntityKind::Group, id);
        group
    }

    pub(crate) fn from_remote(client: KiiClient, body: &Value) -> Self {
        let mut group = Self::new(client);
        group.apply_remote(body);
        group
    }

    pub fn name(&self) -> Option<&str> {
        self.core.get(NAME).and_then(Value::as_str)
    }

    /// Renames the group on the next save.
    pub fn set_name(&mut self, name: &str) -> KiiResult<()> {
        self.core.ensure_live()?;
        validate_group_name(name)?;
        self.core.put(NAME, json!(name));
        Ok(())
    }

    pub fn owner(&self) -> Option<&EntityId> {
        self.owner.as_ref()
    }

    /// Members as of the last save or refresh.
    pub fn members(&self) -> &BTreeSet<EntityId> {
        &self.members
    }

    pub fn pending_additions(&self) -> &BTreeSet<EntityId> {
        &self.pending_additions
    }

    pub fn pending_removals(&self) -> &BTreeSet<EntityId> {
        &self.pending_removals
    }

    /// Stages adding a registered user.
    pub fn add_user(&mut self, user: &KiiUser) -> KiiResult<()> {
        let id = user.core().require_id("add to a group")?.clone();
        self.add_member(id)
    }

    /// Stages removing a registered user.
    pub fn remove_user(&mut self, user: &KiiUser) -> KiiResult<()> {
        let id = user.core().require_id("remove from a group")?.clone();
        self.remove_member(id)
    }

    /// Stages adding the user with id `id`.
    pub fn add_member(&mut self, id: EntityId) -> KiiResult<()> {
        self.core.ensure_live()?;
        self.pending_removals.remove(&id);
        if !self.members.contains(&id) {
            self.pending_additions.insert(id);
        }
        Ok(())
    }

    /// Stages removing the user with id `id`.
    pub fn remove_member(&mut self, id: EntityId) -> KiiResult<()> {
        self.core.ensure_live()?;
        self.pending_additions.remove(&id);
        if self.core.uuid().is_some() {
            self.pending_removals.insert(id);
        }
        Ok(())
    }

    /// A bucket owned by this group.
    pub fn bucket(&self, name: &str) -> KiiResult<KiiBucket> {
        let id = self.core.require_id("open a bucket of")?;
        validate_bucket_name(name)?;
        Ok(KiiBucket::new(self.client.clone(), Scope::Group(id.clone()), name))
    }

    /// A file bucket owned by this group.
    pub fn file_bucket(&self, name: &str) -> KiiResult<KiiFileBucket> {
        let id = self.core.require_id("open a file bucket of")?;
        validate_bucket_name(name)?;
        Ok(KiiFileBucket::new(self.client.clone(), Scope::Group(id.clone()), name))
    }

    fn member_path(&self, id: &EntityId, member: &EntityId) -> String {
        format!("{}/members/{member}", self.resource_path(id))
    }

    /// Sends the rename and staged membership changes of a saved group.
    ///
    /// Each change is recorded as soon as the server accepts it, so after a
    /// failure only the unsent changes remain staged.
    async fn push_changes(&mut self, id: &EntityId) -> KiiResult<()> {
        if self.core.is_dirty() {
            let name = self.name().unwrap_or_default().to_string();
            let request = ApiRequest::bytes(
                HttpMethod::Put,
                format!("{}/name", self.resource_path(id)),
                "text/plain",
                name.into_bytes(),
            );
            self.client.send(request).await?;
            self.core.mark_synced();
        }

        for member in self.pending_additions.clone() {
            let request = ApiRequest::new(HttpMethod::Put, self.member_path(id, &member));
            self.client.send(request).await?;
            self.pending_additions.remove(&member);
            self.members.insert(member);
        }

        for member in self.pending_removals.clone() {
            self.client
                .send(ApiRequest::delete(self.member_path(id, &member)))
                .await?;
            self.pending_removals.remove(&member);
            self.members.remove(&member);
        }
        Ok(())
    }
}

impl Remote for KiiGroup {
    fn client(&self) -> &KiiClient {
        &self.client
    }
}

#[async_trait]
impl Entity for KiiGroup {
    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn resource_path(&self, id: &EntityId) -> String {
        format!("/apps/{}/groups/{id}", self.client.app_id())
    }

    fn uri_for(&self, id: &EntityId) -> ObjectUri {
        ObjectUri::Group(id.clone())
    }

    fn create_request(&self) -> KiiResult<ApiRequest> {
        let owner = self.client.require_user_id("creating a group")?;
        let name = self
            .name()
            .ok_or_else(|| KiiError::Precondition("a group needs a name to be created".into()))?;
        let members: Vec<&str> = self.pending_additions.iter().map(EntityId::as_str).collect();
        Ok(ApiRequest::json(
            HttpMethod::Post,
            format!("/apps/{}/groups", self.client.app_id()),
            json!({ "name": name, "owner": owner.as_str(), "members": members }),
        )
        .with_content_type(GROUP_CREATION_REQUEST))
    }

    fn read_only_keys(&self) -> &'static [&'static str] {
        &[OWNER, NOT_FOUND_USERS]
    }

    fn apply_read_only(&mut self, body: &Value) {
        if let Some(owner) = string_field(body, OWNER).and_then(|o| EntityId::parse(&o).ok()) {
            self.owner = Some(owner);
        }
    }

    fn has_pending_changes(&self) -> bool {
        self.core.is_dirty() || !self.pending_additions.is_empty() || !self.pending_removals.is_empty()
    }

    fn describe_extra(&self) -> Vec<(&'static str, String)> {
        let mut extra = vec![("members", self.members.len().to_string())];
        if let Some(owner) = &self.owner {
            extra.push(("owner", owner.to_string()));
        }
        if !self.pending_additions.is_empty() || !self.pending_removals.is_empty() {
            extra.push((
                "pending",
                format!("+{} -{}", self.pending_additions.len(), self.pending_removals.len()),
            ));
        }
        extra
    }

    async fn save(&mut self) -> KiiResult<()> {
        self.core.ensure_live()?;
        if let Some(id) = self.core.uuid().cloned() {
            return self.push_changes(&id).await;
        }

        let owner = self.client.session().user_id();
        let Some(body) = save_fields(self).await? else {
            return Ok(());
        };
        let not_found: BTreeSet<EntityId> = body
            .get(NOT_FOUND_USERS)
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .filter_map(|id| EntityId::parse(id).ok())
            .collect();
        if !not_found.is_empty() {
            warn!(count = not_found.len(), "group created without unknown members");
        }
        self.members = std::mem::take(&mut self.pending_additions)
            .into_iter()
            .filter(|id| !not_found.contains(id))
            .collect();
        self.pending_removals.clear();
        if self.owner.is_none() {
            self.owner = owner;
        }
        info!(group_id = ?self.core.uuid(), members = self.members.len(), "group created");
        Ok(())
    }

    /// Reloads name, owner and member list; drops staged changes.
    async fn refresh(&mut self) -> KiiResult<()> {
        refresh_fields(self).await?;
        let id = self.core.require_id("refresh")?.clone();
        let body = self
            .client
            .send_json(ApiRequest::get(format!("{}/members", self.resource_path(&id))))
            .await?;
        self.members = body
            .get("members")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|m| m.get("userID").and_then(Value::as_str))
            .filter_map(|id| EntityId::parse(id).ok())
            .collect();
        self.pending_additions.clear();
        self.pending_removals.clear();
        Ok(())
    }
}

impl KiiClient {
    /// A local group; saving it creates it with the signed-in user as owner.
    pub fn group_with_name(&self, name: &str) -> KiiResult<KiiGroup> {
        validate_group_name(name)?;
        let mut group = KiiGroup::new(self.clone());
        group.core.put(NAME, json!(name));
        Ok(group)
    }

    /// A local group with initial members, all of which must be registered.
    pub fn group_with_name_and_members(&self, name: &str, members: &[KiiUser]) -> KiiResult<KiiGroup> {
        let mut group = self.group_with_name(name)?;
        for member in members {
            group.add_user(member)?;
        }
        Ok(group)
    }

    /// An existing group, addressed by `kiicloud://groups/{id}`.
    pub fn group_with_uri(&self, uri: &str) -> KiiResult<KiiGroup> {
        match uri.parse::<ObjectUri>()? {
            ObjectUri::Group(id) => Ok(KiiGroup::with_id(self.clone(), id)),
            other => Err(KiiError::Validation(format!("not a group URI: {other}"))),
        }
    }

    pub fn group_with_id(&self, id: &str) -> KiiResult<KiiGroup> {
        Ok(KiiGroup::with_id(self.clone(), EntityId::parse(id)?))
    }
}
