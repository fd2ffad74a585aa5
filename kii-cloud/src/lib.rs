//! Client SDK for the Kii Cloud backend.
//!
//! Mirrors server records (users, groups, objects, files) as local entities
//! that track their own changes and push them incrementally.
//!
//! # Architecture
//!
//! - **Client**: one application on one site; owns the transport, the
//!   session and the runtime behind blocking calls
//! - **Entities**: [`KiiUser`], [`KiiGroup`], [`KiiObject`], [`KiiFile`],
//!   sharing the lifecycle in [`Entity`] (`Local -> Synced <-> Dirty -> Deleted`)
//! - **Buckets**: [`KiiBucket`] and [`KiiFileBucket`] create entities and run
//!   queries built with `kii-query`
//! - **ACLs**: [`KiiAcl`] stages grants and revocations and saves them as one
//!   batch
//! - **Transport**: [`Transport`] turns abstract requests into HTTP;
//!   [`HttpTransport`] is the reqwest implementation
//!
//! Every remote operation is an `async fn`. The [`Remote`] trait derives a
//! blocking form and a background form (run on a caller-supplied worker,
//! result handed to a completion closure) from it.
//!
//! # Example
//!
//! ```no_run
//! use kii_cloud::{Entity, Fields, KiiClient, KiiConfig};
//!
//! # async fn run() -> kii_cloud::KiiResult<()> {
//! let client = KiiClient::new(KiiConfig::new("my-app", "my-key"))?;
//! client.authenticate("alice123", "abc123$$").await?;
//!
//! let mut score = client.bucket("scores")?.create_object();
//! score.set_field("points", 42)?;
//! score.save().await?;
//! # Ok(())
//! # }
//! ```

pub mod acl;
pub mod bucket;
mod client;
pub mod config;
pub mod entity;
mod error;
pub mod file;
pub mod file_bucket;
pub mod group;
mod http;
mod hydrate;
mod invocation;
pub mod object;
mod progress;
pub mod session;
pub mod transport;
pub mod user;

pub use acl::{AclAction, AclEntry, AclSubject, KiiAcl};
pub use bucket::{KiiBucket, QueryPage};
pub use client::{KiiClient, KiiClientBuilder};
pub use config::{KiiConfig, Site};
pub use entity::{Entity, EntityCore, Fields, SyncState};
pub use error::{KiiError, KiiResult, TransportError};
pub use file::{KiiFile, TrashState};
pub use file_bucket::KiiFileBucket;
pub use group::KiiGroup;
pub use http::HttpTransport;
pub use invocation::Remote;
pub use object::KiiObject;
pub use progress::Progress;
pub use session::{AuthState, FileTokenStore, MemoryTokenStore, Session, TokenStore};
pub use transport::{ApiRequest, ApiResponse, Auth, HttpMethod, RequestBody, Transport};
pub use user::{validate_email, validate_password, validate_phone, validate_username, KiiUser};

pub use kii_query::{Clause, FieldType, Query};
pub use kii_types::{EntityId, EntityKind, ObjectUri, Scope, ServerTime};
