use crate::ValidationError;
use core::{fmt, str::FromStr};
use serde::{Deserialize, Serialize};

/// Identifier scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Ark,
    Doi,
}

impl Scheme {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ark => "ark",
            Self::Doi => "doi",
        }
    }

    /// Text between the scheme and the authority: `:/` for ARKs, `:` for DOIs.
    pub const fn separator(self) -> &'static str {
        match self {
            Self::Ark => ":/",
            Self::Doi => ":",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized ARK or DOI.
///
/// ARKs are `ark:/<naan>/<suffix>` and are lowercased throughout. DOIs are
/// `doi:10.<prefix>/<suffix>` and are uppercased after `10.`. The authority is
/// the NAAN for ARKs and `10.<prefix>` for DOIs.
///
/// ```
/// use ezid::IdentifierName;
///
/// let doi: IdentifierName = "doi:10.5072/fk2abc".parse().unwrap();
/// assert_eq!(doi.to_string(), "doi:10.5072/FK2ABC");
/// assert_eq!(doi.authority(), "10.5072");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentifierName {
    scheme: Scheme,
    authority: String,
    suffix: String,
}

impl IdentifierName {
    /// Parses and normalizes an identifier string. The suffix must not be
    /// empty.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let name = Self::parse_namespace(s)?;
        if name.suffix.is_empty() {
            return Err(malformed(s, "empty suffix"));
        }
        Ok(name)
    }

    /// Like [`IdentifierName::parse`] but accepts an empty suffix, as in
    /// shoulders (`ark:/13030/`).
    pub fn parse_namespace(s: &str) -> Result<Self, ValidationError> {
        if let Some(c) = s.chars().find(|c| !c.is_ascii_graphic()) {
            return Err(malformed(s, &format!("unexpected character {c:?}")));
        }
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| malformed(s, "missing scheme"))?;

        match scheme.to_ascii_lowercase().as_str() {
            "ark" => {
                let rest = rest
                    .strip_prefix('/')
                    .ok_or_else(|| malformed(s, "ARK must start with ark:/"))?;
                let (naan, suffix) = rest
                    .split_once('/')
                    .ok_or_else(|| malformed(s, "missing '/' after NAAN"))?;
                if naan.is_empty() || !naan.bytes().all(|b| b.is_ascii_alphanumeric()) {
                    return Err(malformed(s, "NAAN must be alphanumeric"));
                }
                Ok(Self {
                    scheme: Scheme::Ark,
                    authority: naan.to_ascii_lowercase(),
                    suffix: suffix.to_ascii_lowercase(),
                })
            }
            "doi" => {
                let rest = rest
                    .strip_prefix("10.")
                    .ok_or_else(|| malformed(s, "DOI must start with doi:10."))?;
                let (prefix, suffix) = rest
                    .split_once('/')
                    .ok_or_else(|| malformed(s, "missing '/' after DOI prefix"))?;
                if prefix.is_empty()
                    || !prefix.bytes().all(|b| b.is_ascii_digit() || b == b'.')
                    || prefix.starts_with('.')
                    || prefix.ends_with('.')
                {
                    return Err(malformed(s, "DOI prefix must be numeric"));
                }
                Ok(Self {
                    scheme: Scheme::Doi,
                    authority: format!("10.{prefix}"),
                    suffix: suffix.to_ascii_uppercase(),
                })
            }
            _ => Err(malformed(s, "scheme must be ark or doi")),
        }
    }

    pub(crate) fn from_parts(scheme: Scheme, authority: String, suffix: String) -> Self {
        Self {
            scheme,
            authority,
            suffix,
        }
    }

    pub const fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn is_ark(&self) -> bool {
        self.scheme == Scheme::Ark
    }

    pub fn is_doi(&self) -> bool {
        self.scheme == Scheme::Doi
    }

    /// NAAN for ARKs, `10.<prefix>` for DOIs.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Everything after the authority's `/`.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// The scheme-less form used by minters and resolvers
    /// (`99999/fk4...`, `10.5072/FK2...`).
    pub fn path(&self) -> String {
        format!("{}/{}", self.authority, self.suffix)
    }

    /// True if `self` lies under `namespace` (compared after normalization).
    pub fn is_under(&self, namespace: &Self) -> bool {
        self.scheme == namespace.scheme
            && self.authority == namespace.authority
            && self.suffix.starts_with(&namespace.suffix)
    }
}

impl fmt::Display for IdentifierName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}/{}",
            self.scheme,
            self.scheme.separator(),
            self.authority,
            self.suffix
        )
    }
}

impl FromStr for IdentifierName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parses and normalizes an identifier string.
pub fn parse_identifier(s: &str) -> Result<IdentifierName, ValidationError> {
    IdentifierName::parse(s)
}

/// The resolver page used as target when the caller supplies none.
pub fn default_target(resolver_base: &str, identifier: &str) -> String {
    format!("{}/id/{}", resolver_base.trim_end_matches('/'), identifier)
}

fn malformed(identifier: &str, reason: &str) -> ValidationError {
    ValidationError::MalformedIdentifier {
        identifier: identifier.to_owned(),
        reason: reason.to_owned(),
    }
}
