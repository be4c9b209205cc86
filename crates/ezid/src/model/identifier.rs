use crate::{IdentifierName, Scheme, ValidationError};
use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

macro_rules! define_reference {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

define_reference!(
    /// Stable reference to a user account.
    OwnerId
);
define_reference!(
    /// Stable reference to a group of users.
    GroupId
);
define_reference!(
    /// Stable reference to a metadata profile (`erc`, `datacite`, ...).
    ProfileId
);
define_reference!(
    /// DataCite datacenter symbol, `ALLOCATOR.DATACENTER`.
    DatacenterId
);

impl DatacenterId {
    /// The allocator part of the symbol.
    pub fn allocator(&self) -> &str {
        self.0.split_once('.').map_or(self.as_str(), |(a, _)| a)
    }
}

/// Publication status of an identifier.
///
/// Stored as `P`, `R`, `U` or `U|<reason>`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum IdentifierStatus {
    #[default]
    Public,
    Reserved,
    Unavailable(Option<String>),
}

impl IdentifierStatus {
    pub fn code(&self) -> String {
        match self {
            Self::Public => "P".to_owned(),
            Self::Reserved => "R".to_owned(),
            Self::Unavailable(None) => "U".to_owned(),
            Self::Unavailable(Some(reason)) => format!("U|{reason}"),
        }
    }

    pub fn from_code(code: &str) -> Result<Self, ValidationError> {
        match code {
            "P" => Ok(Self::Public),
            "R" => Ok(Self::Reserved),
            "U" => Ok(Self::Unavailable(None)),
            _ => match code.strip_prefix("U|") {
                Some(reason) => Ok(Self::Unavailable(Some(reason.to_owned()))),
                None => Err(ValidationError::UnknownCode {
                    kind: "identifier status",
                    code: code.to_owned(),
                }),
            },
        }
    }
}

impl From<IdentifierStatus> for String {
    fn from(status: IdentifierStatus) -> Self {
        status.code()
    }
}

impl TryFrom<String> for IdentifierStatus {
    type Error = ValidationError;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        Self::from_code(&code)
    }
}

/// Registration state of a Crossref DOI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrossrefStatus {
    #[serde(rename = "R")]
    Reserved,
    #[serde(rename = "B")]
    Working,
    #[serde(rename = "S")]
    Success,
    #[serde(rename = "W")]
    Warning,
    #[serde(rename = "F")]
    Failure,
}

/// Metadata keys a public DataCite DOI must carry when no pre-rendered
/// `datacite` document is present.
pub const DATACITE_REQUIRED_FIELDS: [&str; 4] = [
    "datacite.creator",
    "datacite.title",
    "datacite.publisher",
    "datacite.publicationyear",
];

/// The authoritative record of one identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    /// Normalized identifier string, e.g. `ark:/99999/fk44w2s`.
    pub identifier: String,
    /// `None` for identifiers created anonymously.
    pub owner: Option<OwnerId>,
    pub owner_group: Option<GroupId>,
    pub profile: ProfileId,
    pub datacenter: Option<DatacenterId>,
    pub target: String,
    pub default_target: String,
    pub metadata: BTreeMap<String, String>,
    pub status: IdentifierStatus,
    pub export: bool,
    pub is_test: bool,
    pub crossref_status: Option<CrossrefStatus>,
    pub crossref_message: String,
    pub create_time: u64,
    pub update_time: u64,
    #[serde(default)]
    pub link_is_broken: bool,
    #[serde(default)]
    pub has_issues: bool,
}

impl Identifier {
    /// A public record with no owner, no metadata and no target yet.
    pub fn new(name: &IdentifierName, now: u64) -> Self {
        let profile = match name.scheme() {
            Scheme::Ark => "erc",
            Scheme::Doi => "datacite",
        };
        Self {
            identifier: name.to_string(),
            owner: None,
            owner_group: None,
            profile: ProfileId::new(profile),
            datacenter: None,
            target: String::new(),
            default_target: String::new(),
            metadata: BTreeMap::new(),
            status: IdentifierStatus::Public,
            export: true,
            is_test: false,
            crossref_status: None,
            crossref_message: String::new(),
            create_time: now,
            update_time: now,
            link_is_broken: false,
            has_issues: false,
        }
    }

    pub fn name(&self) -> Result<IdentifierName, ValidationError> {
        IdentifierName::parse(&self.identifier)
    }

    pub fn is_ark(&self) -> bool {
        self.identifier.starts_with("ark:/")
    }

    pub fn is_doi(&self) -> bool {
        self.identifier.starts_with("doi:")
    }

    /// The identifier without its scheme (`10.5072/FK2X`, `99999/fk4x`).
    pub fn scheme_less(&self) -> &str {
        self.identifier
            .strip_prefix("ark:/")
            .or_else(|| self.identifier.strip_prefix("doi:"))
            .unwrap_or(&self.identifier)
    }

    pub fn is_public(&self) -> bool {
        self.status == IdentifierStatus::Public
    }

    pub fn is_reserved(&self) -> bool {
        self.status == IdentifierStatus::Reserved
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self.status, IdentifierStatus::Unavailable(_))
    }

    pub fn is_anonymous(&self) -> bool {
        self.owner.is_none()
    }

    pub fn is_datacite(&self) -> bool {
        self.is_doi() && self.datacenter.is_some()
    }

    pub fn is_crossref(&self) -> bool {
        self.is_doi() && self.crossref_status.is_some()
    }

    pub fn uses_default_target(&self) -> bool {
        self.target == self.default_target
    }

    /// Human-readable reasons this identifier needs attention. Empty when
    /// nothing is wrong.
    pub fn issue_reasons(&self) -> Vec<&'static str> {
        let mut reasons = Vec::new();
        if self.link_is_broken {
            reasons.push("broken link");
        }
        match self.crossref_status {
            Some(CrossrefStatus::Warning) => reasons.push("Crossref registration warning"),
            Some(CrossrefStatus::Failure) => reasons.push("Crossref registration failure"),
            _ => {}
        }
        if self.is_datacite()
            && self.is_public()
            && !self.metadata.contains_key("datacite")
            && DATACITE_REQUIRED_FIELDS
                .iter()
                .any(|k| self.metadata.get(*k).is_none_or(|v| v.trim().is_empty()))
        {
            reasons.push("missing DataCite metadata");
        }
        reasons
    }

    /// Recomputes `has_issues`; returns true if it changed.
    pub fn refresh_has_issues(&mut self) -> bool {
        let has_issues = !self.issue_reasons().is_empty();
        let changed = has_issues != self.has_issues;
        self.has_issues = has_issues;
        changed
    }
}

/// Immutable snapshot of an [`Identifier`] taken when work was enqueued.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefIdentifier {
    pub id: u64,
    pub record: Identifier,
}
