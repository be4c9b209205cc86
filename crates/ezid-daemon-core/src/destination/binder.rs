use super::{send, trim_base};
use crate::{Disposition, Error, Handler, Result};
use async_trait::async_trait;
use ezid::{Destination, Identifier, RefIdentifier};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

/// Bytes escaped in egg command tokens. Non-ASCII is always escaped.
const EGG_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'%');

/// Marker the binder prints after a fully applied command batch.
const EGG_SUCCESS: &str = "egg-status: 0";

#[derive(Clone, Debug)]
pub struct BinderConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// N2T binder client speaking the "egg" command protocol.
pub struct BinderClient {
    http: reqwest::Client,
    url: String,
    username: String,
    password: String,
}

impl BinderClient {
    pub fn new(http: reqwest::Client, config: &BinderConfig) -> Self {
        Self {
            http,
            url: trim_base(&config.url),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    async fn submit(&self, identifier: &str, commands: String) -> Result<Disposition> {
        tracing::debug!(url = %self.url, identifier, "binder egg request");
        let request = self
            .http
            .post(&self.url)
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=UTF-8")
            .body(commands);
        let body = send(Destination::Binder, request).await?;
        if body.contains(EGG_SUCCESS) {
            Ok(Disposition::Success)
        } else {
            Err(Error::permanent(
                Destination::Binder,
                format!("no `{EGG_SUCCESS}` in response: {}", crate::excerpt(body.trim())),
            ))
        }
    }

    async fn bind(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        let record = &snapshot.record;
        if record.is_reserved() {
            return Ok(Disposition::ignored("reserved identifiers are not bound"));
        }
        self.submit(&record.identifier, bind_commands(record)).await
    }
}

fn escape(token: &str) -> String {
    utf8_percent_encode(token, EGG_ESCAPE).to_string()
}

fn purge_command(identifier: &str) -> String {
    format!(":hx% ezid.purge {}\n", escape(identifier))
}

/// Purges the binding, then sets every element from the record. Running the
/// batch twice leaves the same binding.
pub fn bind_commands(record: &Identifier) -> String {
    let id = escape(&record.identifier);
    let mut out = purge_command(&record.identifier);
    let mut set = |key: &str, value: &str| {
        out.push_str(&format!(":hx% ezid.set {id} {} {}\n", escape(key), escape(value)));
    };

    set("_t", &record.target);
    set("_s", &record.status.code());
    set("_p", record.profile.as_str());
    if let Some(owner) = &record.owner {
        set("_o", owner.as_str());
    }
    if let Some(group) = &record.owner_group {
        set("_g", group.as_str());
    }
    set("_c", &record.create_time.to_string());
    set("_u", &record.update_time.to_string());
    set("_x", if record.export { "yes" } else { "no" });
    for (key, value) in &record.metadata {
        set(key, value);
    }
    out
}

#[async_trait]
impl Handler for BinderClient {
    fn destination(&self) -> Destination {
        Destination::Binder
    }

    async fn create(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        self.bind(snapshot).await
    }

    async fn update(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        self.bind(snapshot).await
    }

    async fn delete(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        let identifier = &snapshot.record.identifier;
        self.submit(identifier, purge_command(identifier)).await
    }
}
