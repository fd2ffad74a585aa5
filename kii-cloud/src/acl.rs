//! Access control lists of buckets, objects and files.
//!
//! Changes are staged locally with [`KiiAcl::add_entry`] and
//! [`KiiAcl::revoke_entry`] and sent in one batch by [`KiiAcl::save`]. An
//! entry staged both ways is revoked. The batch applies atomically on the
//! server; on failure nothing local changes, so the same batch can be
//! retried.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use kii_types::EntityId;

use crate::client::KiiClient;
use crate::error::{KiiError, KiiResult, TransportError};
use crate::invocation::Remote;
use crate::transport::{ApiRequest, HttpMethod};

const ANY_AUTHENTICATED_USER: &str = "ANY_AUTHENTICATED_USER";
const ANONYMOUS_USER: &str = "ANONYMOUS_USER";

/// Who an ACL entry applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AclSubject {
    User(EntityId),
    Group(EntityId),
    AnyAuthenticatedUser,
    AnonymousUser,
}

impl AclSubject {
    /// Wire form, e.g. `UserID:abc` or `GroupID:xyz`.
    pub fn to_wire(&self) -> String {
        match self {
            AclSubject::User(id) => format!("UserID:{id}"),
            AclSubject::Group(id) => format!("GroupID:{id}"),
            AclSubject::AnyAuthenticatedUser => format!("UserID:{ANY_AUTHENTICATED_USER}"),
            AclSubject::AnonymousUser => format!("UserID:{ANONYMOUS_USER}"),
        }
    }

    /// Parses the wire form.
    pub fn from_wire(s: &str) -> Option<Self> {
        let (prefix, id) = s.split_once(':')?;
        match prefix {
            "UserID" => Self::from_user_id(id),
            "GroupID" => EntityId::parse(id).ok().map(AclSubject::Group),
            _ => None,
        }
    }

    fn from_user_id(id: &str) -> Option<Self> {
        match id {
            ANY_AUTHENTICATED_USER => Some(AclSubject::AnyAuthenticatedUser),
            ANONYMOUS_USER => Some(AclSubject::AnonymousUser),
            id => EntityId::parse(id).ok().map(AclSubject::User),
        }
    }

    /// Parses a subject as listed by a GET of the ACL: `{"userID": ..}` or
    /// `{"groupID": ..}`.
    fn from_listing(value: &Value) -> Option<Self> {
        if let Some(id) = value.get("userID").and_then(Value::as_str) {
            return Self::from_user_id(id);
        }
        value
            .get("groupID")
            .and_then(Value::as_str)
            .and_then(|id| EntityId::parse(id).ok())
            .map(AclSubject::Group)
    }
}

impl fmt::Display for AclSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// Permission an ACL entry grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AclAction {
    CreateObjectsInBucket,
    QueryObjectsInBucket,
    DropBucketWithAllContent,
    ReadExistingObject,
    WriteExistingObject,
}

impl AclAction {
    pub const ALL: [AclAction; 5] = [
        AclAction::CreateObjectsInBucket,
        AclAction::QueryObjectsInBucket,
        AclAction::DropBucketWithAllContent,
        AclAction::ReadExistingObject,
        AclAction::WriteExistingObject,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            AclAction::CreateObjectsInBucket => "CREATE_OBJECTS_IN_BUCKET",
            AclAction::QueryObjectsInBucket => "QUERY_OBJECTS_IN_BUCKET",
            AclAction::DropBucketWithAllContent => "DROP_BUCKET_WITH_ALL_CONTENT",
            AclAction::ReadExistingObject => "READ_EXISTING_OBJECT",
            AclAction::WriteExistingObject => "WRITE_EXISTING_OBJECT",
        }
    }
}

impl fmt::Display for AclAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AclAction {
    type Err = KiiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AclAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| KiiError::Validation(format!("unknown ACL action: {s}")))
    }
}

/// One (subject, action) permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AclEntry {
    pub subject: AclSubject,
    pub action: AclAction,
}

impl AclEntry {
    pub fn new(subject: AclSubject, action: AclAction) -> Self {
        Self { subject, action }
    }

    fn to_wire(&self) -> Value {
        json!({ "subject": self.subject.to_wire(), "action": self.action.as_str() })
    }

    fn from_wire(value: &Value) -> Option<Self> {
        let action = value.get("action")?.as_str()?.parse().ok()?;
        let subject = AclSubject::from_wire(value.get("subject")?.as_str()?)?;
        Some(Self { subject, action })
    }
}

impl fmt::Display for AclEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for {}", self.action, self.subject)
    }
}

/// The ACL of one resource.
#[derive(Debug, Clone)]
pub struct KiiAcl {
    client: KiiClient,
    path: String,
    entries: BTreeSet<AclEntry>,
    pending_additions: BTreeSet<AclEntry>,
    pending_revocations: BTreeSet<AclEntry>,
}

impl KiiAcl {
    /// ACL of the resource at `resource_path`.
    pub(crate) fn new(client: KiiClient, resource_path: &str) -> Self {
        Self {
            client,
            path: format!("{resource_path}/acl"),
            entries: BTreeSet::new(),
            pending_additions: BTreeSet::new(),
            pending_revocations: BTreeSet::new(),
        }
    }

    /// REST path of the ACL.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Stages a grant.
    pub fn add_entry(&mut self, subject: AclSubject, action: AclAction) {
        self.pending_additions.insert(AclEntry::new(subject, action));
    }

    /// Stages a revocation. Wins over a grant of the same entry.
    pub fn revoke_entry(&mut self, subject: AclSubject, action: AclAction) {
        self.pending_revocations.insert(AclEntry::new(subject, action));
    }

    /// Entries known to be in effect on the server.
    pub fn entries(&self) -> &BTreeSet<AclEntry> {
        &self.entries
    }

    pub fn contains(&self, subject: &AclSubject, action: AclAction) -> bool {
        self.entries.contains(&AclEntry::new(subject.clone(), action))
    }

    pub fn pending_additions(&self) -> &BTreeSet<AclEntry> {
        &self.pending_additions
    }

    pub fn pending_revocations(&self) -> &BTreeSet<AclEntry> {
        &self.pending_revocations
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending_additions.is_empty() || !self.pending_revocations.is_empty()
    }

    /// Drops every staged change.
    pub fn discard_pending(&mut self) {
        self.pending_additions.clear();
        self.pending_revocations.clear();
    }

    /// The batch `save` would send: grants minus revocations, and revocations.
    pub fn batch(&self) -> (Vec<AclEntry>, Vec<AclEntry>) {
        let grant = self
            .pending_additions
            .difference(&self.pending_revocations)
            .cloned()
            .collect();
        let revoke = self.pending_revocations.iter().cloned().collect();
        (grant, revoke)
    }

    /// Sends the staged changes as one batch.
    ///
    /// An empty batch makes no request. When the server rejects an entry the
    /// error names it, and the staged changes stay in place.
    pub async fn save(&mut self) -> KiiResult<()> {
        let (grant, revoke) = self.batch();
        if grant.is_empty() && revoke.is_empty() {
            debug!(path = %self.path, "no ACL changes to save");
            return Ok(());
        }

        let body = json!({
            "grant": grant.iter().map(AclEntry::to_wire).collect::<Vec<_>>(),
            "revoke": revoke.iter().map(AclEntry::to_wire).collect::<Vec<_>>(),
        });
        let request = ApiRequest::json(HttpMethod::Post, self.path.clone(), body);

        match self.client.send(request).await {
            Ok(_) => {}
            Err(KiiError::Transport(source @ TransportError::Status { .. })) => {
                let entry = rejected_entry(&source);
                warn!(path = %self.path, entry = ?entry, "ACL batch rejected");
                return Err(KiiError::AclRejected { entry, source });
            }
            Err(e) => return Err(e),
        }

        for entry in &revoke {
            self.entries.remove(entry);
        }
        self.entries.extend(grant.iter().cloned());
        self.discard_pending();
        info!(path = %self.path, granted = grant.len(), revoked = revoke.len(), "ACL saved");
        Ok(())
    }

    /// Reloads the entries in effect. Staged changes are kept.
    pub async fn refresh(&mut self) -> KiiResult<()> {
        let body = self.client.send_json(ApiRequest::get(self.path.clone())).await?;
        let Some(listing) = body.as_object() else {
            return Err(KiiError::MalformedResponse("ACL listing is not an object".into()));
        };

        let mut entries = BTreeSet::new();
        for (action, subjects) in listing {
            let Ok(action) = action.parse::<AclAction>() else {
                debug!(action = %action, "skipping unknown ACL action");
                continue;
            };
            for subject in subjects.as_array().into_iter().flatten() {
                if let Some(subject) = AclSubject::from_listing(subject) {
                    entries.insert(AclEntry::new(subject, action));
                }
            }
        }
        self.entries = entries;
        Ok(())
    }

    pub fn save_blocking(&mut self) -> KiiResult<()> {
        self.run_blocking(|acl| Box::pin(acl.save()))
    }

    pub fn refresh_blocking(&mut self) -> KiiResult<()> {
        self.run_blocking(|acl| Box::pin(acl.refresh()))
    }
}

impl Remote for KiiAcl {
    fn client(&self) -> &KiiClient {
        &self.client
    }
}

/// The entry a failed batch names, from `{"rejectedEntry": {..}}`.
fn rejected_entry(error: &TransportError) -> Option<AclEntry> {
    match error {
        TransportError::Status {
            details: Some(details),
            ..
        } => details.get("rejectedEntry").and_then(AclEntry::from_wire),
        _ => None,
    }
}
