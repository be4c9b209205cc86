use super::{send, trim_base};
use crate::{Disposition, Error, Handler, Result};
use async_trait::async_trait;
use ezid::{Destination, Identifier, RefIdentifier};
use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use std::{collections::BTreeMap, io::Write};

const KERNEL_NAMESPACE: &str = "http://datacite.org/schema/kernel-4";
const KERNEL_SCHEMA: &str =
    "http://datacite.org/schema/kernel-4 http://schema.datacite.org/meta/kernel-4/metadata.xsd";
const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Placeholder for required values a record does not carry.
const UNAVAILABLE: &str = "(:unav)";

#[derive(Clone, Debug)]
pub struct DataciteConfig {
    pub url: String,
    /// Allocator symbol to MDS password.
    pub allocator_passwords: BTreeMap<String, String>,
}

/// DataCite MDS client.
///
/// Requests authenticate as the record's datacenter, using the password of the
/// allocator that datacenter belongs to.
pub struct DataciteClient {
    http: reqwest::Client,
    url: String,
    passwords: BTreeMap<String, String>,
}

struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

impl DataciteClient {
    pub fn new(http: reqwest::Client, config: &DataciteConfig) -> Self {
        Self {
            http,
            url: trim_base(&config.url),
            passwords: config
                .allocator_passwords
                .iter()
                .map(|(k, v)| (k.to_ascii_uppercase(), v.clone()))
                .collect(),
        }
    }

    /// Reason the record is not propagated to DataCite, if any.
    fn skip_reason(record: &Identifier) -> Option<&'static str> {
        if !record.is_doi() {
            Some("not a DOI")
        } else if record.is_test {
            Some("test identifier")
        } else if record.datacenter.is_none() {
            Some("not registered with DataCite")
        } else if record.is_reserved() {
            Some("reserved identifier")
        } else {
            None
        }
    }

    fn credentials<'a>(&'a self, record: &'a Identifier) -> Result<Credentials<'a>> {
        let datacenter = record
            .datacenter
            .as_ref()
            .ok_or_else(|| Error::local(format!("{} has no datacenter", record.identifier)))?;
        let allocator = datacenter.allocator().to_ascii_uppercase();
        let password = self
            .passwords
            .get(&allocator)
            .ok_or_else(|| Error::local(format!("no MDS password for allocator {allocator}")))?;
        Ok(Credentials {
            username: datacenter.as_str(),
            password,
        })
    }

    async fn upload_metadata(&self, record: &Identifier, auth: &Credentials<'_>) -> Result<()> {
        let document = metadata_document(record)?;
        tracing::debug!(identifier = %record.identifier, "uploading DataCite metadata");
        let request = self
            .http
            .post(format!("{}/metadata", self.url))
            .basic_auth(auth.username, Some(auth.password))
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/xml;charset=UTF-8",
            )
            .body(document);
        send(Destination::Datacite, request).await.map(drop)
    }

    async fn set_target(&self, doi: &str, target: &str, auth: &Credentials<'_>) -> Result<()> {
        let request = self
            .http
            .put(format!("{}/doi/{doi}", self.url))
            .basic_auth(auth.username, Some(auth.password))
            .header(reqwest::header::CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(format!("doi={doi}\nurl={target}"));
        send(Destination::Datacite, request).await.map(drop)
    }

    async fn deactivate(&self, doi: &str, auth: &Credentials<'_>) -> Result<()> {
        let request = self
            .http
            .delete(format!("{}/metadata/{doi}", self.url))
            .basic_auth(auth.username, Some(auth.password));
        send(Destination::Datacite, request).await.map(drop)
    }

    /// Registers or refreshes a DOI. Unavailable DOIs keep resolving, to
    /// their default target, but are hidden from DataCite search.
    async fn register(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        let record = &snapshot.record;
        if let Some(reason) = Self::skip_reason(record) {
            return Ok(Disposition::ignored(reason));
        }
        let auth = self.credentials(record)?;
        let doi = record.scheme_less();

        self.upload_metadata(record, &auth).await?;
        if record.is_unavailable() {
            self.set_target(doi, &record.default_target, &auth).await?;
            self.deactivate(doi, &auth).await?;
        } else {
            self.set_target(doi, &record.target, &auth).await?;
        }
        Ok(Disposition::Success)
    }
}

fn xml_error(e: impl core::fmt::Display) -> Error {
    Error::local(format!("DataCite XML: {e}"))
}

fn open<W: Write>(writer: &mut Writer<W>, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
    let start = BytesStart::new(name).with_attributes(attrs.iter().copied());
    writer.write_event(Event::Start(start)).map_err(xml_error)
}

fn close<W: Write>(writer: &mut Writer<W>, name: &str) -> Result<()> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_error)
}

fn text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    attrs: &[(&str, &str)],
    text: &str,
) -> Result<()> {
    open(writer, name, attrs)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_error)?;
    close(writer, name)
}

/// The document sent to `/metadata`: the stored `datacite` document
/// unchanged, or a minimal kernel-4 resource built from `datacite.*` fields.
pub fn metadata_document(record: &Identifier) -> Result<String> {
    if let Some(document) = record.metadata.get("datacite") {
        return Ok(document.clone());
    }

    let field = |key: &str| {
        record
            .metadata
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .unwrap_or(UNAVAILABLE)
    };
    let (general, specific) = match record.metadata.get("datacite.resourcetype") {
        Some(value) => match value.split_once('/') {
            Some((general, specific)) => (general.trim(), specific.trim()),
            None => (value.trim(), ""),
        },
        None => ("Other", ""),
    };

    let mut w = Writer::new(Vec::new());
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;
    open(
        &mut w,
        "resource",
        &[
            ("xmlns", KERNEL_NAMESPACE),
            ("xmlns:xsi", XSI_NAMESPACE),
            ("xsi:schemaLocation", KERNEL_SCHEMA),
        ],
    )?;
    text_element(
        &mut w,
        "identifier",
        &[("identifierType", "DOI")],
        record.scheme_less(),
    )?;
    open(&mut w, "creators", &[])?;
    open(&mut w, "creator", &[])?;
    text_element(&mut w, "creatorName", &[], field("datacite.creator"))?;
    close(&mut w, "creator")?;
    close(&mut w, "creators")?;
    open(&mut w, "titles", &[])?;
    text_element(&mut w, "title", &[], field("datacite.title"))?;
    close(&mut w, "titles")?;
    text_element(&mut w, "publisher", &[], field("datacite.publisher"))?;
    text_element(
        &mut w,
        "publicationYear",
        &[],
        field("datacite.publicationyear"),
    )?;
    text_element(
        &mut w,
        "resourceType",
        &[("resourceTypeGeneral", general)],
        specific,
    )?;
    close(&mut w, "resource")?;

    String::from_utf8(w.into_inner()).map_err(xml_error)
}

#[async_trait]
impl Handler for DataciteClient {
    fn destination(&self) -> Destination {
        Destination::Datacite
    }

    async fn create(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        self.register(snapshot).await
    }

    async fn update(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        self.register(snapshot).await
    }

    /// Registered DOIs cannot be removed from DataCite; deleting one only
    /// deactivates its metadata.
    async fn delete(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        let record = &snapshot.record;
        if let Some(reason) = Self::skip_reason(record) {
            return Ok(Disposition::ignored(reason));
        }
        let auth = self.credentials(record)?;
        self.deactivate(record.scheme_less(), &auth).await?;
        Ok(Disposition::Success)
    }
}
