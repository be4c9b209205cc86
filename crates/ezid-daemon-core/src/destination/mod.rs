//! Clients for the services identifier state is propagated to.
//!
//! Each destination implements [`Handler`]; the daemon owns one handler per
//! enabled destination and routes every claimed queue row through
//! [`dispatch`].

mod binder;
mod crossref;
mod datacite;
mod search;

pub use binder::*;
pub use crossref::*;
pub use datacite::*;
pub use search::*;

use crate::{Disposition, Error, Result, classify_status, transport_error};
use async_trait::async_trait;
use ezid::{Destination, Operation, QueueEntry, RefIdentifier};
use reqwest::StatusCode;
use std::time::Duration;

/// One external destination.
///
/// Implementations must be idempotent: a row can be delivered more than once
/// if a worker dies between the remote call and the status write.
#[async_trait]
pub trait Handler: Send + Sync {
    fn destination(&self) -> Destination;

    async fn create(&self, snapshot: &RefIdentifier) -> Result<Disposition>;

    async fn update(&self, snapshot: &RefIdentifier) -> Result<Disposition>;

    async fn delete(&self, snapshot: &RefIdentifier) -> Result<Disposition>;

    /// Whether rows may come back as [`Disposition::AwaitingResult`].
    fn polls(&self) -> bool {
        false
    }

    /// Asks the destination for the outcome of a row left awaiting a result.
    /// Returning [`Disposition::AwaitingResult`] again keeps it waiting.
    async fn poll(&self, entry: &QueueEntry, _snapshot: &RefIdentifier) -> Result<Disposition> {
        Err(Error::local(format!(
            "{} row {} awaits a result but {} does not poll",
            entry.destination,
            entry.seq,
            self.destination()
        )))
    }
}

/// Runs `operation` against `handler`.
pub async fn dispatch(
    handler: &dyn Handler,
    operation: Operation,
    snapshot: &RefIdentifier,
) -> Result<Disposition> {
    match operation {
        Operation::Create => handler.create(snapshot).await,
        Operation::Update => handler.update(snapshot).await,
        Operation::Delete => handler.delete(snapshot).await,
    }
}

/// A client with the daemon's user agent and a whole-request timeout.
pub fn build_client(timeout: Duration, user_agent: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(Error::local)
}

/// Sends `request` and returns the response body if the status is 2xx.
pub(crate) async fn send(
    destination: Destination,
    request: reqwest::RequestBuilder,
) -> Result<String> {
    send_accepting(destination, request, |status| status.is_success()).await
}

/// Like [`send`], with the caller deciding which statuses count as success.
pub(crate) async fn send_accepting(
    destination: Destination,
    request: reqwest::RequestBuilder,
    accept: fn(StatusCode) -> bool,
) -> Result<String> {
    let resp = request
        .send()
        .await
        .map_err(|e| transport_error(destination, &e))?;
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if accept(status) {
        Ok(body)
    } else {
        Err(classify_status(destination, status, &body))
    }
}

/// `base` without trailing slashes.
pub(crate) fn trim_base(base: &str) -> String {
    base.trim_end_matches('/').to_owned()
}

#[cfg(test)]
pub(crate) mod testing {
    use ezid::{Identifier, IdentifierName, OwnerId, RefIdentifier};

    pub fn snapshot(identifier: &str) -> RefIdentifier {
        let name = IdentifierName::parse(identifier).unwrap();
        let mut record = Identifier::new(&name, 1_000);
        record.owner = Some(OwnerId::new("user"));
        record.target = "http://example.com/a".into();
        record.default_target = format!("https://ezid.example/id/{name}");
        RefIdentifier { id: 1, record }
    }
}
