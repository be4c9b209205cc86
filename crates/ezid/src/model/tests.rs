use crate::{
    CrossrefStatus, DatacenterId, Destination, Identifier, IdentifierName, IdentifierStatus,
    Operation, QueueStatus, ValidationError,
};

fn record(id: &str) -> Identifier {
    Identifier::new(&IdentifierName::parse(id).unwrap(), 1_000)
}

#[test]
fn status_codes() {
    for (status, code) in [
        (IdentifierStatus::Public, "P"),
        (IdentifierStatus::Reserved, "R"),
        (IdentifierStatus::Unavailable(None), "U"),
        (
            IdentifierStatus::Unavailable(Some("withdrawn by author".into())),
            "U|withdrawn by author",
        ),
    ] {
        assert_eq!(status.code(), code);
        assert_eq!(IdentifierStatus::from_code(code).unwrap(), status);
    }
    assert!(matches!(
        IdentifierStatus::from_code("X"),
        Err(ValidationError::UnknownCode { .. })
    ));

    let json = serde_json::to_string(&IdentifierStatus::Unavailable(Some("gone".into()))).unwrap();
    assert_eq!(json, "\"U|gone\"");
}

#[test]
fn queue_codes() {
    for op in [Operation::Create, Operation::Update, Operation::Delete] {
        assert_eq!(Operation::from_code(op.code()).unwrap(), op);
    }
    for status in [
        QueueStatus::Unsubmitted,
        QueueStatus::Submitted,
        QueueStatus::Warning,
        QueueStatus::Failure,
        QueueStatus::Ignored,
        QueueStatus::Success,
    ] {
        assert_eq!(QueueStatus::from_code(status.code()).unwrap(), status);
    }
    assert_eq!(QueueStatus::Success.code(), "O");
    assert_eq!("search".parse::<Destination>().unwrap(), Destination::SearchIndexer);
    assert_eq!("DataCite".parse::<Destination>().unwrap(), Destination::Datacite);
    assert!("oai".parse::<Destination>().is_err());
}

#[test]
fn queue_transitions_only_move_forward() {
    use QueueStatus::*;

    assert!(Unsubmitted.can_transition(Submitted));
    assert!(Failure.can_transition(Submitted));
    for to in [Success, Warning, Failure, Ignored, Submitted] {
        assert!(Submitted.can_transition(to), "{to}");
    }
    assert!(!Submitted.can_transition(Unsubmitted));
    for from in [Success, Ignored, Warning] {
        for to in [Unsubmitted, Submitted, Failure, Success] {
            assert!(!from.can_transition(to), "{from} -> {to}");
        }
    }
    assert!(!Unsubmitted.can_transition(Success));
}

#[test]
fn registration_predicates() {
    let mut doi = record("doi:10.5072/FK2A");
    assert!(doi.is_doi());
    assert!(!doi.is_datacite());
    doi.datacenter = Some(DatacenterId::new("CDL.CDL"));
    assert!(doi.is_datacite());
    assert_eq!(doi.datacenter.as_ref().unwrap().allocator(), "CDL");
    assert!(!doi.is_crossref());
    doi.crossref_status = Some(CrossrefStatus::Reserved);
    assert!(doi.is_crossref());

    let ark = record("ark:/99999/fk4a");
    assert!(ark.is_ark());
    assert!(ark.is_anonymous());
    assert_eq!(ark.scheme_less(), "99999/fk4a");
    assert_eq!(ark.profile.as_str(), "erc");
}

#[test]
fn issue_reasons() {
    let mut doi = record("doi:10.5072/FK2A");
    doi.datacenter = Some(DatacenterId::new("CDL.CDL"));
    assert_eq!(doi.issue_reasons(), ["missing DataCite metadata"]);

    for key in crate::DATACITE_REQUIRED_FIELDS {
        doi.metadata.insert(key.into(), "x".into());
    }
    assert!(doi.issue_reasons().is_empty());
    assert!(!doi.refresh_has_issues());

    doi.link_is_broken = true;
    doi.crossref_status = Some(CrossrefStatus::Warning);
    assert_eq!(
        doi.issue_reasons(),
        ["broken link", "Crossref registration warning"]
    );
    assert!(doi.refresh_has_issues());
    assert!(doi.has_issues);

    let mut reserved = record("doi:10.5072/FK2B");
    reserved.datacenter = Some(DatacenterId::new("CDL.CDL"));
    reserved.status = IdentifierStatus::Reserved;
    assert!(reserved.issue_reasons().is_empty());
}

#[test]
fn records_survive_json() {
    let mut doi = record("doi:10.5072/FK2A");
    doi.crossref_status = Some(CrossrefStatus::Working);
    doi.metadata.insert("datacite.title".into(), "A title".into());
    let json = serde_json::to_string(&doi).unwrap();
    let back: Identifier = serde_json::from_str(&json).unwrap();
    assert_eq!(back, doi);
}
