//! Object buckets and query execution.

use serde_json::Value;
use tracing::{debug, info};

use kii_query::{Query, QueryTarget};
use kii_types::{EntityId, Scope};

use crate::acl::KiiAcl;
use crate::client::KiiClient;
use crate::error::{KiiError, KiiResult};
use crate::invocation::Remote;
use crate::object::KiiObject;
use crate::transport::{ApiRequest, HttpMethod};

pub(crate) const QUERY_REQUEST: &str = "application/vnd.kii.QueryRequest+json";

/// One page of query results.
#[derive(Debug, Clone)]
pub struct QueryPage<T> {
    pub results: Vec<T>,
    /// Pass back to fetch the following page; `None` on the last page.
    pub next_pagination_key: Option<String>,
}

impl<T> QueryPage<T> {
    pub fn has_next(&self) -> bool {
        self.next_pagination_key.is_some()
    }
}

/// Runs `query` bound to `target` against `path`/query and returns the raw
/// result bodies plus the next pagination key.
pub(crate) async fn run_query(
    client: &KiiClient,
    path: &str,
    target: QueryTarget,
    query: &Query,
    pagination_key: Option<&str>,
) -> KiiResult<(Vec<Value>, Option<String>)> {
    let body = query.bind(target)?.to_request_body(pagination_key)?;
    let request = ApiRequest::json(HttpMethod::Post, format!("{path}/query"), body)
        .with_content_type(QUERY_REQUEST);
    let response = client.send_json(request).await?;

    let results = match response.get("results") {
        Some(Value::Array(results)) => results.clone(),
        None => Vec::new(),
        Some(_) => return Err(KiiError::MalformedResponse("query results are not an array".into())),
    };
    let next = response
        .get("nextPaginationKey")
        .and_then(Value::as_str)
        .map(str::to_string);
    debug!(path = %path, count = results.len(), more = next.is_some(), "query page received");
    Ok((results, next))
}

/// A named object bucket in one scope.
///
/// Buckets come into existence with their first object; there is no create
/// call.
#[derive(Debug, Clone)]
pub struct KiiBucket {
    client: KiiClient,
    scope: Scope,
    name: String,
}

impl KiiBucket {
    pub(crate) fn new(client: KiiClient, scope: Scope, name: &str) -> Self {
        Self {
            client,
            scope,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub(crate) fn path(&self) -> String {
        format!("{}/buckets/{}", self.client.scope_path(&self.scope), self.name)
    }

    /// A new, unsaved object in this bucket.
    pub fn create_object(&self) -> KiiObject {
        KiiObject::new(self.client.clone(), self.scope.clone(), &self.name)
    }

    /// A reference to an existing object. No request is made.
    pub fn object_with_id(&self, id: &str) -> KiiResult<KiiObject> {
        let id = EntityId::parse(id)?;
        Ok(KiiObject::with_id(self.client.clone(), self.scope.clone(), &self.name, id))
    }

    /// ACL of the bucket itself.
    pub fn acl(&self) -> KiiAcl {
        KiiAcl::new(self.client.clone(), &self.path())
    }

    /// Fetches one page of matching objects.
    ///
    /// The query may leave its target unset or name this bucket; any other
    /// target, an out-of-range limit or a malformed clause fails before a
    /// request is sent.
    pub async fn execute_query(
        &self,
        query: &Query,
        pagination_key: Option<&str>,
    ) -> KiiResult<QueryPage<KiiObject>> {
        let target = QueryTarget::Collection(self.name.clone());
        let (results, next_pagination_key) =
            run_query(&self.client, &self.path(), target, query, pagination_key).await?;
        let results = results
            .iter()
            .map(|body| KiiObject::from_remote(self.client.clone(), self.scope.clone(), &self.name, body))
            .collect();
        Ok(QueryPage {
            results,
            next_pagination_key,
        })
    }

    /// Follows pagination to the end and returns every match.
    pub async fn execute_query_all(&self, query: &Query) -> KiiResult<Vec<KiiObject>> {
        let mut all = Vec::new();
        let mut key: Option<String> = None;
        loop {
            let page = self.execute_query(query, key.as_deref()).await?;
            all.extend(page.results);
            match page.next_pagination_key {
                Some(next) => key = Some(next),
                None => break,
            }
        }
        Ok(all)
    }

    /// Deletes the bucket with everything in it.
    pub async fn delete(&self) -> KiiResult<()> {
        self.client.send(ApiRequest::delete(self.path())).await?;
        info!(bucket = %self.name, "bucket deleted");
        Ok(())
    }

    pub fn execute_query_blocking(
        &mut self,
        query: &Query,
        pagination_key: Option<&str>,
    ) -> KiiResult<QueryPage<KiiObject>> {
        let query = query.clone();
        let key = pagination_key.map(str::to_string);
        self.run_blocking(move |bucket| {
            Box::pin(async move { bucket.execute_query(&query, key.as_deref()).await })
        })
    }

    pub fn delete_blocking(&mut self) -> KiiResult<()> {
        self.run_blocking(|bucket| Box::pin(bucket.delete()))
    }
}

impl Remote for KiiBucket {
    fn client(&self) -> &KiiClient {
        &self.client
    }
}
