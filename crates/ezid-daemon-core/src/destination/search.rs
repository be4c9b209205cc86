use super::{send, send_accepting, trim_base};
use crate::{Disposition, Error, Handler, Result};
use async_trait::async_trait;
use ezid::{Destination, RefIdentifier, SearchDocument, Store};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::StatusCode;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub url: String,
    pub index: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Search index client.
///
/// The index and the local mirror row must agree. The row is written first;
/// if the index call then fails the row is put back the way it was, and the
/// queue row stays retryable.
pub struct SearchIndexClient {
    http: reqwest::Client,
    url: String,
    index: String,
    username: Option<String>,
    password: Option<String>,
    store: Arc<dyn Store>,
}

impl SearchIndexClient {
    pub fn new(http: reqwest::Client, config: &SearchConfig, store: Arc<dyn Store>) -> Self {
        Self {
            http,
            url: trim_base(&config.url),
            index: config.index.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            store,
        }
    }

    fn document_url(&self, identifier: &str) -> String {
        format!(
            "{}/{}/_doc/{}",
            self.url,
            self.index,
            utf8_percent_encode(identifier, NON_ALPHANUMERIC)
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_ref()),
            None => request,
        }
    }

    async fn put_remote(&self, document: &SearchDocument) -> Result<()> {
        let body = serde_json::to_vec(document).map_err(Error::local)?;
        let request = self
            .authorize(self.http.put(self.document_url(&document.identifier)))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        send(Destination::SearchIndexer, request).await.map(drop)
    }

    async fn delete_remote(&self, identifier: &str) -> Result<()> {
        let request = self.authorize(self.http.delete(self.document_url(identifier)));
        // A missing document is already deleted.
        send_accepting(Destination::SearchIndexer, request, |status| {
            status.is_success() || status == StatusCode::NOT_FOUND
        })
        .await
        .map(drop)
    }

    /// Puts the mirror row back to `previous`.
    fn restore(&self, identifier: &str, previous: Option<SearchDocument>) -> Result<()> {
        match previous {
            Some(document) => self.store.put_search_document(&document)?,
            None => {
                self.store.delete_search_document(identifier)?;
            }
        }
        Ok(())
    }

    async fn upsert(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        let record = &snapshot.record;
        let previous = self.store.get_search_document(&record.identifier)?;
        if record.is_anonymous() {
            // An identifier that went anonymous must drop out of the index.
            return match previous {
                Some(document) => self.remove(&record.identifier, Some(document)).await,
                None => Ok(Disposition::ignored("anonymous identifiers are not indexed")),
            };
        }
        let document = SearchDocument::from_identifier(record);
        self.store.put_search_document(&document)?;

        if let Err(e) = self.put_remote(&document).await {
            tracing::warn!(
                identifier = %record.identifier,
                error = %e,
                "search index write failed"
            );
            self.restore(&record.identifier, previous)?;
            return Err(e);
        }
        Ok(Disposition::Success)
    }

    /// Drops the mirror row and the index document, restoring the row if the
    /// remote delete fails.
    async fn remove(
        &self,
        identifier: &str,
        previous: Option<SearchDocument>,
    ) -> Result<Disposition> {
        self.store.delete_search_document(identifier)?;

        if let Err(e) = self.delete_remote(identifier).await {
            tracing::warn!(identifier = %identifier, error = %e, "search index delete failed");
            self.restore(identifier, previous)?;
            return Err(e);
        }
        Ok(Disposition::Success)
    }
}

#[async_trait]
impl Handler for SearchIndexClient {
    fn destination(&self) -> Destination {
        Destination::SearchIndexer
    }

    async fn create(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        self.upsert(snapshot).await
    }

    async fn update(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        self.upsert(snapshot).await
    }

    async fn delete(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        let identifier = &snapshot.record.identifier;
        let previous = self.store.get_search_document(identifier)?;
        self.remove(identifier, previous).await
    }
}
