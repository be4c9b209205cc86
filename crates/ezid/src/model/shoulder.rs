use crate::{DEFAULT_MASK, DatacenterId, IdentifierName, Scheme, ValidationError, doi_to_shadow_ark};
use serde::{Deserialize, Serialize};

/// Who an identifier under a shoulder is registered with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationAgency {
    Ezid,
    Datacite,
    Crossref,
}

/// A namespace under which identifiers are minted or assigned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shoulder {
    /// Normalized namespace, e.g. `ark:/99999/fk4` or `doi:10.5072/FK2`.
    pub prefix: String,
    pub name: String,
    pub active: bool,
    pub is_test: bool,
    /// Super-shoulders have no minter; identifiers under them are assigned
    /// explicitly.
    pub is_super_shoulder: bool,
    pub agency: RegistrationAgency,
    pub datacenter: Option<DatacenterId>,
    pub datacenter_sharing: bool,
    /// Accepting NAANs in the lossy shadow range for DOI shoulders.
    #[serde(default)]
    pub allow_lossy_shadow: bool,
    #[serde(default = "default_mask")]
    pub mask: String,
}

fn default_mask() -> String {
    DEFAULT_MASK.to_owned()
}

impl Shoulder {
    pub fn new(prefix: &str, name: impl Into<String>) -> Result<Self, ValidationError> {
        let namespace = IdentifierName::parse_namespace(prefix)?;
        let agency = match namespace.scheme() {
            Scheme::Ark => RegistrationAgency::Ezid,
            Scheme::Doi => RegistrationAgency::Datacite,
        };
        Ok(Self {
            prefix: namespace.to_string(),
            name: name.into(),
            active: true,
            is_test: false,
            is_super_shoulder: false,
            agency,
            datacenter: None,
            datacenter_sharing: false,
            allow_lossy_shadow: false,
            mask: default_mask(),
        })
    }

    pub fn namespace(&self) -> Result<IdentifierName, ValidationError> {
        IdentifierName::parse_namespace(&self.prefix)
    }

    pub fn scheme(&self) -> Result<Scheme, ValidationError> {
        Ok(self.namespace()?.scheme())
    }

    pub const fn can_mint(&self) -> bool {
        self.active && !self.is_super_shoulder
    }

    /// Key of the minter backing this shoulder: `99999/fk4` for ARKs, the
    /// shadow-ARK path (`b5072/fk2`) for DOIs.
    pub fn minter_key(&self) -> Result<String, ValidationError> {
        let namespace = self.namespace()?;
        let ark = match namespace.scheme() {
            Scheme::Ark => namespace,
            Scheme::Doi => doi_to_shadow_ark(&namespace, self.allow_lossy_shadow)?,
        };
        Ok(ark.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minter_keys() {
        let ark = Shoulder::new("ark:/99999/fk4", "Test ARKs").unwrap();
        assert_eq!(ark.minter_key().unwrap(), "99999/fk4");
        assert_eq!(ark.agency, RegistrationAgency::Ezid);

        let doi = Shoulder::new("doi:10.5072/fk2", "Test DOIs").unwrap();
        assert_eq!(doi.prefix, "doi:10.5072/FK2");
        assert_eq!(doi.minter_key().unwrap(), "b5072/fk2");
        assert_eq!(doi.agency, RegistrationAgency::Datacite);
    }

    #[test]
    fn super_shoulders_and_inactive_shoulders_do_not_mint() {
        let mut shoulder = Shoulder::new("ark:/13030/", "Org").unwrap();
        assert!(shoulder.can_mint());
        shoulder.is_super_shoulder = true;
        assert!(!shoulder.can_mint());
        shoulder.is_super_shoulder = false;
        shoulder.active = false;
        assert!(!shoulder.can_mint());
    }

    #[test]
    fn lossy_doi_prefixes_need_opt_in() {
        let mut shoulder = Shoulder::new("doi:10.123456/X", "Big prefix").unwrap();
        assert_eq!(
            shoulder.minter_key(),
            Err(ValidationError::LossyDoiPrefix(123_456))
        );
        shoulder.allow_lossy_shadow = true;
        assert_eq!(shoulder.minter_key().unwrap(), "p3456/x");
    }
}
