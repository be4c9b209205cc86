use crate::{IdentifierName, Scheme, ValidationError, default_target, parse_identifier};

#[test]
fn arks_are_lowercased() {
    let id = parse_identifier("ARK:/99999/FK4ABC").unwrap();
    assert_eq!(id.scheme(), Scheme::Ark);
    assert_eq!(id.to_string(), "ark:/99999/fk4abc");
    assert_eq!(id.authority(), "99999");
    assert_eq!(id.suffix(), "fk4abc");
    assert_eq!(id.path(), "99999/fk4abc");
}

#[test]
fn dois_are_uppercased_after_the_prefix() {
    let id = parse_identifier("doi:10.5072/fk2.test/x").unwrap();
    assert_eq!(id.scheme(), Scheme::Doi);
    assert_eq!(id.to_string(), "doi:10.5072/FK2.TEST/X");
    assert_eq!(id.path(), "10.5072/FK2.TEST/X");

    let nested = parse_identifier("doi:10.1000.10/abc").unwrap();
    assert_eq!(nested.authority(), "10.1000.10");
}

#[test]
fn malformed_identifiers_are_rejected() {
    for bad in [
        "",
        "ark:99999/x",
        "ark:/99999",
        "ark:/99999/",
        "ark://x",
        "ark:/99 999/x",
        "doi:11.5072/X",
        "doi:10.5072",
        "doi:10./X",
        "doi:10.ab/X",
        "urn:uuid:123",
        "ark:/99999/a\tb",
    ] {
        assert!(
            matches!(
                parse_identifier(bad),
                Err(ValidationError::MalformedIdentifier { .. })
            ),
            "{bad:?}"
        );
    }
}

#[test]
fn namespaces_may_have_an_empty_suffix() {
    let shoulder = IdentifierName::parse_namespace("ark:/13030/").unwrap();
    assert_eq!(shoulder.suffix(), "");
    let id = parse_identifier("ark:/13030/c7x").unwrap();
    assert!(id.is_under(&shoulder));

    let fk4 = IdentifierName::parse_namespace("ark:/99999/fk4").unwrap();
    assert!(parse_identifier("ark:/99999/fk4zz").unwrap().is_under(&fk4));
    assert!(!parse_identifier("ark:/99999/fk5zz").unwrap().is_under(&fk4));
    assert!(!parse_identifier("doi:10.5072/FK4ZZ").unwrap().is_under(&fk4));
}

#[test]
fn default_targets_point_at_the_resolver() {
    assert_eq!(
        default_target("https://ezid.example.org/", "ark:/99999/fk4x"),
        "https://ezid.example.org/id/ark:/99999/fk4x"
    );
}
