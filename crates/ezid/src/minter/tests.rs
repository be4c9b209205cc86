use crate::{
    Error, FileMinterStore, MemoryMinterStore, MintSession, Minter, MinterError, MinterState,
    MinterStore, ValidationError, create_minter, import_legacy, mint, verify_check_char,
};
use proptest::prelude::*;
use std::collections::HashSet;

const FK4: &str = "99999/fk4";

fn fresh() -> Minter {
    Minter::create(FK4, "eedk").unwrap()
}

fn mint_all(minter: &mut Minter, n: usize) -> Vec<String> {
    minter.mint(n).collect::<Result<_, _>>().unwrap()
}

fn corrupt(f: impl FnOnce(&mut MinterState)) -> MinterError {
    let mut state = fresh().to_state();
    f(&mut state);
    Minter::from_state(&state).unwrap_err()
}

#[test]
fn fresh_minter_layout() {
    let minter = fresh();
    assert_eq!(minter.template(), "99999/fk4{eedk}");
    assert_eq!(minter.oatop(), 8410);
    assert_eq!(minter.percounter(), 29);
    assert_eq!(minter.active_subcounters().len(), 290);
    assert!(minter.inactive_subcounters().is_empty());
    assert_eq!(minter.lifetime_count(), 0);
}

#[test]
fn first_identifiers_follow_the_reference_draws() {
    let mut minter = fresh();
    assert_eq!(
        mint_all(&mut minter, 5),
        [
            "99999/fk44w2s",
            "99999/fk4159p",
            "99999/fk4wc7r",
            "99999/fk4rp4j",
            "99999/fk4mw2m",
        ]
    );
    assert_eq!(minter.oacounter(), 5);

    // The often quoted `fk42t0f` cannot come out of this minter: the check
    // character of `99999/fk42t0` is `h`.
    assert!(!verify_check_char("99999/fk42t0f"));
    assert!(verify_check_char("99999/fk42t0h"));
}

#[test]
fn each_draw_bumps_one_subcounter() {
    let mut minter = fresh();
    mint_all(&mut minter, 3);
    for number in [12, 49, 264] {
        assert_eq!(minter.subcounter(number).unwrap().value, 1, "c{number}");
    }
    assert_eq!(minter.subcounter(0).unwrap().value, 0);
}

#[test]
fn whole_space_is_distinct_before_extension() {
    let mut minter = fresh();
    let ids = mint_all(&mut minter, 8410);

    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), 8410);
    for id in &ids {
        assert!(id.starts_with(FK4), "{id}");
        assert_eq!(id.len(), FK4.len() + 4, "{id}");
        assert!(verify_check_char(id), "{id}");
    }
    assert_eq!(minter.oacounter(), minter.oatop());
    assert!(minter.active_subcounters().is_empty());
    assert_eq!(minter.inactive_subcounters().len(), 290);

    assert_eq!(
        mint_all(&mut minter, 2),
        ["99999/fk44x54g1g", "99999/fk4154dn7s"]
    );
    assert_eq!(minter.template(), "99999/fk4{eedeedk}");
    assert_eq!(minter.basecount(), 8410);
    assert_eq!(minter.oacounter(), 2);
    assert_eq!(minter.oatop(), 70_728_100);
    assert_eq!(minter.percounter(), 241_393);
    assert_eq!(minter.active_subcounters().len(), 293);
    assert_eq!(minter.lifetime_count(), 8412);
}

#[test]
fn exhausted_state_extends_before_minting() {
    let mut exhausted = fresh();
    mint_all(&mut exhausted, 8410);
    let state = exhausted.to_state();
    assert_eq!(state.get("oacounter"), Some("8410"));
    assert_eq!(state.get("oatop"), Some("8410"));
    assert_eq!(state.get("saclist"), Some(""));

    let mut reloaded = Minter::from_state(&state).unwrap();
    assert_eq!(mint_all(&mut reloaded, 1), ["99999/fk44x54g1g"]);
    assert_eq!(reloaded.basecount(), 8410);
    assert_eq!(reloaded.oacounter(), 1);
    assert_eq!(reloaded.mask().to_string(), "eedeedk");
}

#[test]
fn small_masks_extend_by_their_whole_length() {
    let mut minter = Minter::create("x/y", "dd").unwrap();
    assert_eq!(
        mint_all(&mut minter, 5),
        ["x/y18", "x/y05", "x/y92", "x/y78", "x/y65"]
    );
    mint_all(&mut minter, 95);
    assert_eq!(
        mint_all(&mut minter, 3),
        ["x/y1681", "x/y0386", "x/y9101"]
    );
    assert_eq!(minter.mask().to_string(), "dddd");
    assert_eq!(minter.basecount(), 100);
}

#[test]
fn letter_positions_never_render_digits() {
    let mut minter = Minter::create("t/u", "f").unwrap();
    let ids = mint_all(&mut minter, 29);
    assert_eq!(ids[0], "");
    assert_eq!(ids[2], "t/ux");
    assert_eq!(ids.iter().filter(|id| id.is_empty()).count(), 10);
    let letters: HashSet<_> = ids.iter().filter(|id| !id.is_empty()).collect();
    assert_eq!(letters.len(), 19);
    assert_eq!(minter.oacounter(), 29);
}

#[test]
fn state_round_trips_through_the_map() {
    let mut minter = fresh();
    mint_all(&mut minter, 300);
    let mut state = minter.to_state();
    state.insert("generator", "nog");

    let reloaded = Minter::from_state(&state).unwrap();
    assert_eq!(reloaded.to_state(), state);

    let mut a = reloaded.clone();
    let mut b = Minter::from_state(&state).unwrap();
    assert_eq!(mint_all(&mut a, 50), mint_all(&mut b, 50));
}

#[test]
fn legacy_dumps_are_imported_without_key_prefix() {
    let mut minter = fresh();
    mint_all(&mut minter, 10);
    let legacy: Vec<(String, String)> = minter
        .to_state()
        .iter()
        .map(|(k, v)| (format!(":/{k}"), v.to_owned()))
        .chain([(":/saclist".to_owned(), format!("{} ", minter.to_state().get("saclist").unwrap()))])
        .collect();

    let imported = import_legacy(legacy).unwrap();
    assert_eq!(imported, minter);
}

#[test]
fn corrupt_states_are_rejected() {
    assert_eq!(
        corrupt(|s| {
            s.insert("mask", "eexk");
            s.insert("template", "99999/fk4{eexk}");
        }),
        MinterError::InvalidMask("eexk".into())
    );
    assert!(matches!(
        corrupt(|s| s.insert("template", "99999/fk4{eedek}")),
        MinterError::TemplateMismatch { .. }
    ));
    assert!(matches!(
        corrupt(|s| s.insert("template", "99999/fk4")),
        MinterError::TemplateMismatch { .. }
    ));
    assert_eq!(
        corrupt(|s| s.insert("atlast", "addx")),
        MinterError::InvalidAtlast("addx".into())
    );
    assert_eq!(
        corrupt(|s| s.insert("atlast", "3")),
        MinterError::InvalidAtlast("3".into())
    );
    assert_eq!(
        corrupt(|s| s.insert("oacounter", "9000")),
        MinterError::CounterOverflow {
            oacounter: 9000,
            oatop: 8410
        }
    );
    assert_eq!(
        corrupt(|s| s.insert("oacounter", "ten")),
        MinterError::InvalidInteger {
            field: "oacounter".into(),
            value: "ten".into()
        }
    );
    assert_eq!(
        corrupt(|s| {
            s.remove("percounter");
        }),
        MinterError::MissingField("percounter".into())
    );
    assert_eq!(
        corrupt(|s| {
            s.remove("c5/top");
        }),
        MinterError::MissingSubcounter("c5".into())
    );
    assert!(matches!(
        corrupt(|s| s.insert("siclist", "c5")),
        MinterError::InconsistentSubcounters(_)
    ));
    assert!(matches!(
        corrupt(|s| s.insert("c900/top", "1")),
        MinterError::InconsistentSubcounters(_)
    ));
    assert!(matches!(
        corrupt(|s| s.insert("c0/value", "29")),
        MinterError::InconsistentSubcounters(_)
    ));
}

#[test]
fn create_rejects_unsupported_masks() {
    assert_eq!(
        Minter::create(FK4, "eexk").unwrap_err(),
        Error::Validation(ValidationError::UnsupportedMask {
            mask: "eexk".into(),
            ch: 'x'
        })
    );
    assert!(matches!(
        Minter::create(FK4, "ekd").unwrap_err(),
        Error::Validation(ValidationError::UnsupportedMask { ch: 'k', .. })
    ));
    assert_eq!(
        Minter::create(FK4, "k").unwrap_err(),
        Error::Validation(ValidationError::InvalidMaskLength("k".into()))
    );
    assert!(matches!(
        Minter::create("../fk4", "eedk").unwrap_err(),
        Error::Validation(ValidationError::InvalidMinterKey(_))
    ));
}

#[test]
fn dry_runs_never_advance_the_stored_state() {
    let store = MemoryMinterStore::new();
    create_minter(&store, FK4, "eedk").unwrap();

    let dry = mint(&store, FK4, 20, true).unwrap();
    let wet = mint(&store, FK4, 20, false).unwrap();
    assert_eq!(dry, wet);
    assert_eq!(store.load(FK4).unwrap().oacounter(), 20);

    let mut reference = fresh();
    let expected = mint_all(&mut reference, 25);
    assert_eq!(mint(&store, FK4, 5, true).unwrap(), expected[20..]);
}

#[test]
fn dropped_sessions_are_discarded() {
    let store = MemoryMinterStore::new();
    create_minter(&store, FK4, "eedk").unwrap();
    {
        let mut session = MintSession::open(&store, FK4, false).unwrap();
        assert_eq!(session.next_id().unwrap(), "99999/fk44w2s");
    }
    assert_eq!(store.load(FK4).unwrap().oacounter(), 0);

    let mut session = MintSession::open(&store, FK4, false).unwrap();
    assert_eq!(session.next_id().unwrap(), "99999/fk44w2s");
    session.commit().unwrap();
    assert_eq!(store.load(FK4).unwrap().oacounter(), 1);
}

#[test]
fn corrupt_stored_state_is_surfaced() {
    let store = MemoryMinterStore::new();
    let mut state = fresh().to_state();
    state.insert("oacounter", "-1");
    store.insert_state(FK4, state);
    assert!(matches!(
        mint(&store, FK4, 1, false),
        Err(MinterError::InvalidInteger { .. })
    ));
    assert_eq!(
        mint(&store, "99999/zz9", 1, false),
        Err(MinterError::NotFound("99999/zz9".into()))
    );
}

#[test]
fn file_store_persists_one_document_per_shoulder() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileMinterStore::new(dir.path());

    create_minter(&store, FK4, "eedk").unwrap();
    let path = dir.path().join("99999").join("fk4.json");
    assert!(path.is_file());
    assert!(store.exists(FK4).unwrap());

    assert_eq!(
        mint(&store, FK4, 3, false).unwrap(),
        ["99999/fk44w2s", "99999/fk4159p", "99999/fk4wc7r"]
    );
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"oacounter\": \"3\""), "{raw}");
    assert_eq!(store.load(FK4).unwrap().oacounter(), 3);

    assert_eq!(
        create_minter(&store, FK4, "eedk").unwrap_err(),
        Error::Minter(MinterError::AlreadyExists(FK4.into()))
    );
    assert_eq!(
        store.load("99999/fk5").unwrap_err(),
        MinterError::NotFound("99999/fk5".into())
    );
}

#[test]
fn file_store_rejects_keys_that_escape_the_root() {
    let store = FileMinterStore::new("/tmp/minters");
    assert!(store.path_for("../etc/passwd").is_err());
    assert!(store.path_for("99999//fk4").is_err());
    assert!(store.path_for("").is_err());
    assert_eq!(
        store.path_for("b5072/fk2").unwrap(),
        std::path::Path::new("/tmp/minters/b5072/fk2.json")
    );
}

#[test]
fn file_store_reports_undecodable_documents() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("99999")).unwrap();
    std::fs::write(dir.path().join("99999").join("fk4.json"), "[1, 2]").unwrap();
    let store = FileMinterStore::new(dir.path());
    assert!(matches!(
        store.load(FK4),
        Err(MinterError::Encoding { .. })
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn minted_identifiers_are_distinct_and_well_formed(
        mask in prop::sample::select(vec!["d", "dd", "e", "ed", "dk", "edk", "eek"]),
        n in 1_usize..1500,
    ) {
        let mut minter = Minter::create("x/y", mask).unwrap();
        let ids = mint_all(&mut minter, n);
        let unique: HashSet<_> = ids.iter().collect();
        prop_assert_eq!(unique.len(), n);
        for id in &ids {
            prop_assert!(id.starts_with("x/y"));
            if mask.ends_with('k') {
                prop_assert!(verify_check_char(id), "{}", id);
            }
        }
        prop_assert_eq!(minter.lifetime_count(), n as u64);
    }
}
