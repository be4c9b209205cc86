use crate::{
    CrossrefStatus, DatacenterId, GroupId, Identifier, IdentifierName, IdentifierStatus,
    MintSession, MinterStore, Operation, OwnerId, ProfileId, Result, Scheme, Shoulder, Store,
    SystemClock, TimeSource, ValidationError, default_target, parse_identifier,
};
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};

/// Settings the boundary service applies to every record it writes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Base URL of the resolver, used to build default targets.
    pub resolver_base: String,
    /// Identifiers starting with any of these are test identifiers.
    pub test_prefixes: Vec<String>,
}

impl ServiceConfig {
    pub fn is_test(&self, identifier: &str) -> bool {
        self.test_prefixes
            .iter()
            .any(|p| identifier.starts_with(p.as_str()))
    }
}

/// Caller-supplied fields for a create or update. `None` leaves a field as
/// it is (or at its default, on create).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentifierRequest {
    pub owner: Option<OwnerId>,
    pub owner_group: Option<GroupId>,
    pub profile: Option<ProfileId>,
    pub datacenter: Option<DatacenterId>,
    /// An empty string resets the target to the default target.
    pub target: Option<String>,
    /// Merged into the record's metadata. An empty value removes the key.
    pub metadata: BTreeMap<String, String>,
    pub status: Option<IdentifierStatus>,
    pub export: Option<bool>,
    /// Turns Crossref registration on or off. Ignored for ARKs.
    pub crossref: Option<bool>,
}

impl IdentifierRequest {
    fn apply(self, record: &mut Identifier) {
        if let Some(owner) = self.owner {
            record.owner = Some(owner);
        }
        if let Some(group) = self.owner_group {
            record.owner_group = Some(group);
        }
        if let Some(profile) = self.profile {
            record.profile = profile;
        }
        if let Some(datacenter) = self.datacenter {
            record.datacenter = Some(datacenter);
        }
        if let Some(target) = self.target {
            record.target = if target.is_empty() {
                record.default_target.clone()
            } else {
                target
            };
        }
        for (key, value) in self.metadata {
            if value.is_empty() {
                record.metadata.remove(&key);
            } else {
                record.metadata.insert(key, value);
            }
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(export) = self.export {
            record.export = export;
        }
        match self.crossref {
            Some(true) if record.is_doi() => {
                record.crossref_status.get_or_insert(CrossrefStatus::Working);
            }
            Some(false) => {
                record.crossref_status = None;
                record.crossref_message.clear();
            }
            _ => {}
        }

        // Reserved DOIs are held back from Crossref; anything else is
        // (re)deposited.
        if record.crossref_status.is_some() {
            record.crossref_status = Some(if record.is_reserved() {
                CrossrefStatus::Reserved
            } else {
                CrossrefStatus::Working
            });
        }
    }
}

/// Create, update, delete and mint identifiers.
///
/// Every write is one store call, so the record, its snapshot and its queue
/// rows land together or not at all.
pub struct IdentifierService<M, C = SystemClock> {
    store: Arc<dyn Store>,
    minters: M,
    clock: C,
    config: ServiceConfig,
    mint_lock: Mutex<()>,
}

impl<M: MinterStore, C: TimeSource> IdentifierService<M, C> {
    pub fn new(store: Arc<dyn Store>, minters: M, clock: C, config: ServiceConfig) -> Self {
        Self {
            store,
            minters,
            clock,
            config,
            mint_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub const fn minters(&self) -> &M {
        &self.minters
    }

    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn create(&self, identifier: &str, request: IdentifierRequest) -> Result<Identifier> {
        let name = parse_identifier(identifier)?;
        let now = self.clock.now_secs();

        let mut record = Identifier::new(&name, now);
        record.default_target = default_target(&self.config.resolver_base, &record.identifier);
        record.target.clone_from(&record.default_target);
        record.is_test = self.config.is_test(&record.identifier);
        request.apply(&mut record);
        record.refresh_has_issues();

        self.store
            .insert_identifier_and_enqueue_all(&record, Operation::Create, now)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(identifier = %record.identifier, "created identifier");
        Ok(record)
    }

    pub fn update(&self, identifier: &str, request: IdentifierRequest) -> Result<Identifier> {
        let name = parse_identifier(identifier)?.to_string();
        let mut record = self
            .store
            .get_identifier(&name)?
            .ok_or(ValidationError::NotFound(name))?;

        request.apply(&mut record);
        record.update_time = self.clock.now_secs();
        record.refresh_has_issues();

        self.store.insert_identifier_and_enqueue_all(
            &record,
            Operation::Update,
            record.update_time,
        )?;

        #[cfg(feature = "tracing")]
        tracing::debug!(identifier = %record.identifier, "updated identifier");
        Ok(record)
    }

    /// Deletes the identifier and returns the id of the snapshot handed to
    /// the destinations.
    pub fn delete(&self, identifier: &str) -> Result<u64> {
        let name = parse_identifier(identifier)?.to_string();
        let now = self.clock.now_secs();
        let ref_id = self
            .store
            .delete_identifier_and_enqueue_all(&name, now)?
            .ok_or(ValidationError::NotFound(name))?;

        #[cfg(feature = "tracing")]
        tracing::debug!(identifier, ref_id, "deleted identifier");
        Ok(ref_id)
    }

    /// Mints the next free identifier on a shoulder and creates it.
    ///
    /// Minted strings that are unusable or already taken are skipped; the
    /// minter state is saved before the record is created, so a failed
    /// create never hands the same identifier out twice.
    pub fn mint_and_create(
        &self,
        shoulder_prefix: &str,
        request: IdentifierRequest,
    ) -> Result<Identifier> {
        let prefix = IdentifierName::parse_namespace(shoulder_prefix)?.to_string();
        let shoulder = self
            .store
            .get_shoulder(&prefix)?
            .ok_or_else(|| ValidationError::UnknownShoulder(prefix.clone()))?;
        if !shoulder.can_mint() {
            return Err(ValidationError::NotMintable(prefix).into());
        }
        let key = shoulder.minter_key()?;

        let identifier = {
            let _guard = self.mint_lock.lock();
            let mut session = MintSession::open(&self.minters, &key, false)?;
            let identifier = loop {
                let minted = session.next_id()?;
                let Some(name) = minted_name(&shoulder, &minted)? else {
                    continue;
                };
                let name = name.to_string();
                if self.store.get_identifier(&name)?.is_none() {
                    break name;
                }
            };
            session.commit()?;
            identifier
        };

        self.create(&identifier, request)
    }
}

/// Turns a minted `naan/shoulder+suffix` string into an identifier under
/// `shoulder`. `None` for strings the mask rendered empty.
fn minted_name(shoulder: &Shoulder, minted: &str) -> Result<Option<IdentifierName>> {
    let Some((_, suffix)) = minted.split_once('/') else {
        return Ok(None);
    };
    let namespace = shoulder.namespace()?;
    let raw = match namespace.scheme() {
        Scheme::Ark => format!("ark:/{minted}"),
        Scheme::Doi => format!("doi:{}/{suffix}", namespace.authority()),
    };
    Ok(Some(parse_identifier(&raw)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Destination, Error, ManualClock, MemoryMinterStore, MemoryStore, MinterStore,
        create_minter,
    };

    fn service() -> IdentifierService<MemoryMinterStore, Arc<ManualClock>> {
        let store = Arc::new(MemoryStore::new());
        for (prefix, name) in [
            ("ark:/99999/fk4", "Test ARKs"),
            ("doi:10.5072/FK2", "Test DOIs"),
        ] {
            let mut shoulder = Shoulder::new(prefix, name).unwrap();
            shoulder.is_test = true;
            store.put_shoulder(&shoulder).unwrap();
        }
        let minters = MemoryMinterStore::new();
        create_minter(&minters, "99999/fk4", "eedk").unwrap();
        create_minter(&minters, "b5072/fk2", "eedk").unwrap();

        IdentifierService::new(
            store,
            minters,
            Arc::new(ManualClock::new(1_000)),
            ServiceConfig {
                resolver_base: "https://ezid.example.org/".into(),
                test_prefixes: vec!["ark:/99999/fk4".into(), "doi:10.5072/FK2".into()],
            },
        )
    }

    #[test]
    fn create_fills_defaults_and_enqueues() {
        let service = service();
        let record = service
            .create(
                "ARK:/99999/FK4Abc",
                IdentifierRequest {
                    owner: Some(OwnerId::new("alice")),
                    ..IdentifierRequest::default()
                },
            )
            .unwrap();

        assert_eq!(record.identifier, "ark:/99999/fk4abc");
        assert_eq!(
            record.target,
            "https://ezid.example.org/id/ark:/99999/fk4abc"
        );
        assert!(record.uses_default_target());
        assert!(record.is_test);
        assert_eq!(record.create_time, 1_000);

        let store = service.store();
        assert_eq!(store.get_identifier("ark:/99999/fk4abc").unwrap(), Some(record));
        for destination in Destination::ALL {
            assert_eq!(store.list_queue(destination).unwrap().len(), 1);
        }

        assert_eq!(
            service.create("ark:/99999/fk4abc", IdentifierRequest::default()),
            Err(Error::Store(crate::StoreError::Validation(
                ValidationError::AlreadyExists("ark:/99999/fk4abc".into())
            )))
        );
        assert!(matches!(
            service.create("ark:/99999/", IdentifierRequest::default()),
            Err(Error::Validation(ValidationError::MalformedIdentifier { .. }))
        ));
    }

    #[test]
    fn update_merges_and_keeps_create_time() {
        let service = service();
        let mut metadata = BTreeMap::new();
        metadata.insert("erc.who".to_owned(), "Someone".to_owned());
        metadata.insert("erc.what".to_owned(), "Something".to_owned());
        service
            .create(
                "ark:/13030/x1",
                IdentifierRequest {
                    target: Some("http://example.org/a".into()),
                    metadata,
                    ..IdentifierRequest::default()
                },
            )
            .unwrap();

        service.clock.advance(50);
        let mut changes = BTreeMap::new();
        changes.insert("erc.who".to_owned(), String::new());
        changes.insert("erc.when".to_owned(), "2020".to_owned());
        let record = service
            .update(
                "ark:/13030/x1",
                IdentifierRequest {
                    metadata: changes,
                    target: Some(String::new()),
                    ..IdentifierRequest::default()
                },
            )
            .unwrap();

        assert!(!record.is_test);
        assert_eq!(record.create_time, 1_000);
        assert_eq!(record.update_time, 1_050);
        assert!(record.uses_default_target());
        assert_eq!(
            record.metadata.keys().map(String::as_str).collect::<Vec<_>>(),
            ["erc.what", "erc.when"]
        );
        let queue = service.store().list_queue(Destination::Binder).unwrap();
        assert_eq!(queue[1].operation, Operation::Update);
        assert_eq!(queue[1].enqueue_time, 1_050);

        assert!(matches!(
            service.update("ark:/13030/missing", IdentifierRequest::default()),
            Err(Error::Validation(ValidationError::NotFound(_)))
        ));
    }

    #[test]
    fn crossref_status_follows_reservation() {
        let service = service();
        let record = service
            .create(
                "doi:10.5072/fk2cr",
                IdentifierRequest {
                    status: Some(IdentifierStatus::Reserved),
                    crossref: Some(true),
                    ..IdentifierRequest::default()
                },
            )
            .unwrap();
        assert_eq!(record.crossref_status, Some(CrossrefStatus::Reserved));

        let record = service
            .update(
                "doi:10.5072/FK2CR",
                IdentifierRequest {
                    status: Some(IdentifierStatus::Public),
                    ..IdentifierRequest::default()
                },
            )
            .unwrap();
        assert_eq!(record.crossref_status, Some(CrossrefStatus::Working));

        let ark = service
            .create(
                "ark:/13030/x2",
                IdentifierRequest {
                    crossref: Some(true),
                    ..IdentifierRequest::default()
                },
            )
            .unwrap();
        assert_eq!(ark.crossref_status, None);
    }

    #[test]
    fn delete_enqueues_and_removes() {
        let service = service();
        service
            .create("ark:/99999/fk4gone", IdentifierRequest::default())
            .unwrap();
        let ref_id = service.delete("ark:/99999/fk4gone").unwrap();

        let store = service.store();
        assert_eq!(store.get_identifier("ark:/99999/fk4gone").unwrap(), None);
        let snapshot = store.get_ref_identifier(ref_id).unwrap().unwrap();
        assert_eq!(snapshot.record.identifier, "ark:/99999/fk4gone");
        let ops: Vec<Operation> = store
            .list_queue(Destination::SearchIndexer)
            .unwrap()
            .iter()
            .map(|e| e.operation)
            .collect();
        assert_eq!(ops, [Operation::Create, Operation::Delete]);

        assert!(matches!(
            service.delete("ark:/99999/fk4gone"),
            Err(Error::Validation(ValidationError::NotFound(_)))
        ));
    }

    #[test]
    fn mints_on_ark_shoulders_and_skips_taken_ids() {
        let service = service();
        service
            .create("ark:/99999/fk44w2s", IdentifierRequest::default())
            .unwrap();

        let record = service
            .mint_and_create("ark:/99999/fk4", IdentifierRequest::default())
            .unwrap();
        assert_eq!(record.identifier, "ark:/99999/fk4159p");
        let record = service
            .mint_and_create("ark:/99999/FK4", IdentifierRequest::default())
            .unwrap();
        assert_eq!(record.identifier, "ark:/99999/fk4wc7r");
        assert_eq!(service.minters().load("99999/fk4").unwrap().oacounter(), 3);
    }

    #[test]
    fn mints_dois_through_the_shadow_ark() {
        let service = service();
        let record = service
            .mint_and_create("doi:10.5072/FK2", IdentifierRequest::default())
            .unwrap();

        let suffix = record.identifier.strip_prefix("doi:10.5072/FK2").unwrap();
        assert_eq!(suffix.len(), 4);
        assert_eq!(suffix, suffix.to_ascii_uppercase());
        assert!(record.is_test);
        assert_eq!(service.minters().load("b5072/fk2").unwrap().oacounter(), 1);
    }

    #[test]
    fn refuses_unknown_and_super_shoulders() {
        let service = service();
        assert!(matches!(
            service.mint_and_create("ark:/12345/x", IdentifierRequest::default()),
            Err(Error::Validation(ValidationError::UnknownShoulder(_)))
        ));

        let mut shoulder = Shoulder::new("ark:/13030/", "Org").unwrap();
        shoulder.is_super_shoulder = true;
        service.store().put_shoulder(&shoulder).unwrap();
        assert!(matches!(
            service.mint_and_create("ark:/13030/", IdentifierRequest::default()),
            Err(Error::Validation(ValidationError::NotMintable(_)))
        ));

        let orphan = Shoulder::new("ark:/99999/fk9", "No minter").unwrap();
        service.store().put_shoulder(&orphan).unwrap();
        assert!(matches!(
            service.mint_and_create("ark:/99999/fk9", IdentifierRequest::default()),
            Err(Error::Minter(crate::MinterError::NotFound(_)))
        ));
    }
}
