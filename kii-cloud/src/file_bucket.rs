use std::path::PathBuf;
use tracing::info;

use kii_query::{Query, QueryTarget};
use kii_types::{EntityId, Scope};

use crate::acl::KiiAcl;
use crate::bucket::{run_query, QueryPage};
use crate::client::KiiClient;
use crate::error::KiiResult;
use crate::file::KiiFile;
use crate::invocation::Remote;
use crate::transport::ApiRequest;

/// A named file bucket in one scope.
#[derive(Debug, Clone)]
pub struct KiiFileBucket {
    client: KiiClient,
    scope: Scope,
    name: String,
}

impl KiiFileBucket {
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
        format!("{}/filebuckets/{}", self.client.scope_path(&self.scope), self.name)
    }

    /// A new, unsaved file with no local body.
    pub fn file(&self) -> KiiFile {
        KiiFile::new(self.client.clone(), self.scope.clone(), &self.name)
    }

    /// A new, unsaved file whose body is read from `path`.
    pub fn file_with_local_path(&self, path: impl Into<PathBuf>) -> KiiFile {
        KiiFile::with_local_path(self.client.clone(), self.scope.clone(), &self.name, path)
    }

    /// A reference to an existing file. No request is made.
    pub fn file_with_id(&self, id: &str) -> KiiResult<KiiFile> {
        let id = EntityId::parse(id)?;
        Ok(KiiFile::with_id(self.client.clone(), self.scope.clone(), &self.name, id))
    }

    pub fn acl(&self) -> KiiAcl {
        KiiAcl::new(self.client.clone(), &self.path())
    }

    /// Fetches one page of matching files.
    pub async fn execute_query(
        &self,
        query: &Query,
        pagination_key: Option<&str>,
    ) -> KiiResult<QueryPage<KiiFile>> {
        let target = QueryTarget::Container(self.name.clone());
        let (results, next_pagination_key) =
            run_query(&self.client, &self.path(), target, query, pagination_key).await?;
        let results = results
            .iter()
            .map(|body| KiiFile::from_remote(self.client.clone(), self.scope.clone(), &self.name, body))
            .collect();
        Ok(QueryPage {
            results,
            next_pagination_key,
        })
    }

    /// Deletes the bucket with every file in it.
    pub async fn delete(&self) -> KiiResult<()> {
        self.client.send(ApiRequest::delete(self.path())).await?;
        info!(bucket = %self.name, "file bucket deleted");
        Ok(())
    }

    pub fn execute_query_blocking(
        &mut self,
        query: &Query,
        pagination_key: Option<&str>,
    ) -> KiiResult<QueryPage<KiiFile>> {
        let query = query.clone();
        let key = pagination_key.map(str::to_string);
        self.run_blocking(move |bucket| {
            Box::pin(async move { bucket.execute_query(&query, key.as_deref()).await })
        })
    }
}

impl Remote for KiiFileBucket {
    fn client(&self) -> &KiiClient {
        &self.client
    }
}
