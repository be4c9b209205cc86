use super::{send, trim_base};
use crate::{Disposition, Error, Handler, Result};
use async_trait::async_trait;
use ezid::{
    CrossrefStatus, Destination, Identifier, QueueEntry, RefIdentifier, Store, TimeSource,
};
use quick_xml::{Reader, escape::escape, events::Event};
use reqwest::multipart::{Form, Part};
use std::sync::Arc;

const SCHEMA_VERSION: &str = "4.4.2";

/// Placeholder the stored deposit body uses for the DOI and the target URL.
const TBA: &str = "(:tba)";

#[derive(Clone, Debug)]
pub struct CrossrefConfig {
    pub deposit_url: String,
    pub results_url: String,
    pub username: String,
    pub password: String,
    pub depositor_name: String,
    pub depositor_email: String,
}

/// Crossref deposit client.
///
/// A deposit is accepted synchronously and processed later, so rows are left
/// awaiting a result and polled by batch id. Poll outcomes are also written to
/// the live identifier's Crossref status.
pub struct CrossrefClient {
    http: reqwest::Client,
    config: CrossrefConfig,
    store: Arc<dyn Store>,
    clock: Arc<dyn TimeSource>,
}

/// What the submission log says about one deposit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DepositResult {
    /// Unknown, queued or in process.
    Pending,
    Success(String),
    Warning(String),
    Failure(String),
}

impl CrossrefClient {
    pub fn new(
        http: reqwest::Client,
        config: &CrossrefConfig,
        store: Arc<dyn Store>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        let mut config = config.clone();
        config.deposit_url = trim_base(&config.deposit_url);
        config.results_url = trim_base(&config.results_url);
        Self {
            http,
            config,
            store,
            clock,
        }
    }

    fn skip_reason(record: &Identifier) -> Option<&'static str> {
        if !record.is_doi() {
            Some("not a DOI")
        } else if !record.is_crossref() {
            Some("not registered with Crossref")
        } else if record.is_test {
            Some("test identifier")
        } else if record.is_reserved() {
            Some("reserved identifier")
        } else {
            None
        }
    }

    async fn deposit(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        let record = &snapshot.record;
        if let Some(reason) = Self::skip_reason(record) {
            return Ok(Disposition::ignored(reason));
        }

        let now = self.clock.now_secs();
        let batch_id = format!("ezid-{}-{now}", snapshot.id);
        let document = deposit_document(&self.config, &batch_id, now, record)?;
        let file = Part::text(document)
            .file_name(format!("{batch_id}.xml"))
            .mime_str("application/xml")
            .map_err(Error::local)?;
        let form = Form::new()
            .text("operation", "doMDUpload")
            .text("login_id", self.config.username.clone())
            .text("login_passwd", self.config.password.clone())
            .part("fname", file);

        tracing::debug!(
            identifier = %record.identifier,
            batch_id = %batch_id,
            "depositing with Crossref"
        );
        let request = self.http.post(&self.config.deposit_url).multipart(form);
        send(Destination::Crossref, request).await?;
        Ok(Disposition::AwaitingResult {
            batch_id,
            message: "deposit submitted".to_owned(),
        })
    }

    /// Copies a finished deposit's outcome onto the live identifier, unless it
    /// has been deleted since.
    fn record_outcome(
        &self,
        identifier: &str,
        status: CrossrefStatus,
        message: &str,
    ) -> Result<()> {
        self.store.update_identifier_with(identifier, &mut |record| {
            if record.crossref_status.is_none() {
                return false;
            }
            record.crossref_status = Some(status);
            record.crossref_message = message.to_owned();
            record.refresh_has_issues();
            true
        })?;
        Ok(())
    }
}

/// Wraps the stored Crossref body in a deposit envelope, filling the DOI and
/// resource placeholders.
pub fn deposit_document(
    config: &CrossrefConfig,
    batch_id: &str,
    timestamp: u64,
    record: &Identifier,
) -> Result<String> {
    let body = record
        .metadata
        .get("crossref")
        .filter(|b| !b.trim().is_empty())
        .ok_or_else(|| Error::local(format!("{} has no Crossref metadata", record.identifier)))?;
    let target = if record.is_unavailable() {
        &record.default_target
    } else {
        &record.target
    };
    let body = body
        .replacen(
            &format!("<doi>{TBA}</doi>"),
            &format!("<doi>{}</doi>", escape(record.scheme_less())),
            1,
        )
        .replacen(
            &format!("<resource>{TBA}</resource>"),
            &format!("<resource>{}</resource>", escape(target.as_str())),
            1,
        );
    let registrant = record.owner.as_ref().map_or("", |o| o.as_str());

    Ok(format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
            "<doi_batch version=\"{version}\" xmlns=\"http://www.crossref.org/schema/{version}\">",
            "<head>",
            "<doi_batch_id>{batch}</doi_batch_id>",
            "<timestamp>{timestamp}</timestamp>",
            "<depositor><depositor_name>{name}</depositor_name>",
            "<email_address>{email}</email_address></depositor>",
            "<registrant>{registrant}</registrant>",
            "</head>",
            "<body>{body}</body>",
            "</doi_batch>"
        ),
        version = SCHEMA_VERSION,
        batch = escape(batch_id),
        timestamp = timestamp,
        name = escape(config.depositor_name.as_str()),
        email = escape(config.depositor_email.as_str()),
        registrant = escape(registrant),
        body = body,
    ))
}

/// Parses a `doi_batch_diagnostic` submission log.
pub fn parse_deposit_result(xml: &str) -> Result<DepositResult> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut batch_status: Option<String> = None;
    let mut record_status: Option<String> = None;
    let mut in_msg = false;
    let mut messages: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"doi_batch_diagnostic" => {
                    batch_status = attribute(e, b"status")?;
                }
                b"record_diagnostic" => {
                    let status = attribute(e, b"status")?;
                    // The worst record decides the batch outcome.
                    if rank(status.as_deref()) > rank(record_status.as_deref()) {
                        record_status = status;
                    }
                }
                b"msg" => in_msg = true,
                _ => {}
            },
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"msg" {
                    in_msg = false;
                }
            }
            Ok(Event::Text(ref e)) => {
                if in_msg {
                    let text = e.unescape().map_err(Error::local)?;
                    messages.push(text.trim().to_owned());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::local(format!("Crossref result XML: {e}"))),
            _ => {}
        }
    }

    if batch_status.as_deref() != Some("completed") {
        return Ok(DepositResult::Pending);
    }
    let message = messages.join("; ");
    Ok(match record_status.as_deref() {
        Some("Success") => DepositResult::Success(message),
        Some("Warning") => DepositResult::Warning(message),
        Some("Failure") => DepositResult::Failure(message),
        _ => DepositResult::Failure(format!("completed without a record status: {message}")),
    })
}

fn attribute(e: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    let attr = e
        .try_get_attribute(name)
        .map_err(|err| Error::local(format!("Crossref result XML: {err}")))?;
    attr.map(|a| {
        a.unescape_value()
            .map(|v| v.into_owned())
            .map_err(|err| Error::local(format!("Crossref result XML: {err}")))
    })
    .transpose()
}

fn rank(status: Option<&str>) -> u8 {
    match status {
        Some("Failure") => 3,
        Some("Warning") => 2,
        Some("Success") => 1,
        _ => 0,
    }
}

#[async_trait]
impl Handler for CrossrefClient {
    fn destination(&self) -> Destination {
        Destination::Crossref
    }

    async fn create(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        self.deposit(snapshot).await
    }

    async fn update(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        self.deposit(snapshot).await
    }

    /// Crossref DOIs can only be deleted while reserved, and reserved DOIs
    /// were never deposited.
    async fn delete(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        let reason = Self::skip_reason(&snapshot.record).unwrap_or("Crossref keeps deposited DOIs");
        Ok(Disposition::ignored(reason))
    }

    fn polls(&self) -> bool {
        true
    }

    async fn poll(&self, entry: &QueueEntry, snapshot: &RefIdentifier) -> Result<Disposition> {
        let Some(batch_id) = entry.batch_id.as_deref() else {
            return Err(Error::local(format!("crossref row {} has no batch id", entry.seq)));
        };
        let file_name = format!("{batch_id}.xml");
        let request = self.http.get(&self.config.results_url).query(&[
            ("usr", self.config.username.as_str()),
            ("pwd", self.config.password.as_str()),
            ("file_name", file_name.as_str()),
            ("type", "result"),
        ]);
        let body = send(Destination::Crossref, request).await?;

        let identifier = &snapshot.record.identifier;
        match parse_deposit_result(&body)? {
            DepositResult::Pending => Ok(Disposition::AwaitingResult {
                batch_id: batch_id.to_owned(),
                message: entry.message.clone(),
            }),
            DepositResult::Success(message) => {
                self.record_outcome(identifier, CrossrefStatus::Success, &message)?;
                Ok(Disposition::Success)
            }
            DepositResult::Warning(message) => {
                self.record_outcome(identifier, CrossrefStatus::Warning, &message)?;
                Ok(Disposition::Warning(message))
            }
            DepositResult::Failure(message) => {
                self.record_outcome(identifier, CrossrefStatus::Failure, &message)?;
                Err(Error::permanent(Destination::Crossref, message))
            }
        }
    }
}
