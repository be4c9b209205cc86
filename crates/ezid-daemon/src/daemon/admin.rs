//! One-shot administrative subcommands. Output goes to stdout, one item per
//! line, so it can be piped.

use crate::daemon::telemetry::increment_identifiers_minted;
use anyhow::{Context, bail};
use ezid::{
    Destination, FileMinterStore, IdentifierName, MinterStore, Scheme, Shoulder, Store,
    TimeSource, create_minter, import_legacy, mint, shadow_ark_to_doi,
};
use std::{collections::BTreeMap, fs, io::Write, path::Path};

/// Creates the minter backing `shoulder`.
pub fn minter_create(minters: &FileMinterStore, shoulder: &str, mask: &str) -> anyhow::Result<()> {
    let shoulder = Shoulder::new(shoulder, "")?;
    let key = shoulder.minter_key()?;
    let minter = create_minter(minters, &key, mask)?;
    tracing::info!(shoulder = %shoulder.prefix, key, template = %minter.template(), "minter created");
    println!("{}", minter.template());
    Ok(())
}

/// Mints `count` identifiers on `shoulder` and writes them to `out`.
pub fn minter_mint(
    minters: &FileMinterStore,
    shoulder: &str,
    count: usize,
    dry_run: bool,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let shoulder = Shoulder::new(shoulder, "")?;
    let key = shoulder.minter_key()?;
    let minted = mint(minters, &key, count, dry_run)?;
    if !dry_run {
        increment_identifiers_minted(minted.len() as u64);
    }
    for raw in &minted {
        writeln!(out, "{}", display_name(&shoulder, raw)?)?;
    }
    Ok(())
}

/// Renders a minted `naan/shoulder+suffix` string as a full identifier.
/// DOI shoulders mint on their shadow ARK.
fn display_name(shoulder: &Shoulder, minted: &str) -> anyhow::Result<String> {
    let ark = IdentifierName::parse(&format!("ark:/{minted}"))?;
    Ok(match shoulder.scheme()? {
        Scheme::Ark => ark.to_string(),
        Scheme::Doi => shadow_ark_to_doi(&ark)?.to_string(),
    })
}

/// Imports a legacy JSON minter dump for `shoulder`, replacing any existing
/// state.
pub fn minter_import(minters: &FileMinterStore, path: &Path, shoulder: &str) -> anyhow::Result<()> {
    let shoulder = Shoulder::new(shoulder, "")?;
    let key = shoulder.minter_key()?;
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let entries: BTreeMap<String, String> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let minter = import_legacy(entries)?;
    if minter.key() != key {
        bail!(
            "dump is for minter {}, not {key} ({})",
            minter.key(),
            shoulder.prefix
        );
    }
    minters.save(&minter)?;
    tracing::info!(key, oacounter = minter.oacounter(), "minter imported");
    Ok(())
}

/// Prints every row of `destination`'s queue.
pub fn queue_list(
    store: &dyn Store,
    destination: Destination,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    for row in store.list_queue(destination)? {
        let detail = if row.error.is_empty() {
            &row.message
        } else {
            &row.error
        };
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}{}",
            row.seq,
            row.identifier,
            row.operation,
            row.status,
            if row.error_is_permanent { "permanent: " } else { "" },
            detail
        )?;
    }
    Ok(())
}

/// Makes a permanently failed row retryable again.
pub fn queue_clear(
    store: &dyn Store,
    clock: &dyn TimeSource,
    destination: Destination,
    seq: u64,
) -> anyhow::Result<()> {
    if !store.clear_permanent_failure(destination, seq, clock.now_secs())? {
        bail!("{destination} row {seq} is not a permanent failure");
    }
    tracing::info!(%destination, seq, "permanent failure cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezid::{
        ClaimPolicy, Identifier, ManualClock, MemoryStore, Operation, QueueStatus, StatusUpdate,
    };

    fn minted(minters: &FileMinterStore, shoulder: &str, count: usize, dry_run: bool) -> Vec<String> {
        let mut out = Vec::new();
        minter_mint(minters, shoulder, count, dry_run, &mut out).unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn create_and_mint_ark() {
        let dir = tempfile::tempdir().unwrap();
        let minters = FileMinterStore::new(dir.path());
        minter_create(&minters, "ark:/99999/fk4", "eedk").unwrap();
        assert!(minter_create(&minters, "ark:/99999/fk4", "eedk").is_err());

        let dry = minted(&minters, "ark:/99999/fk4", 2, true);
        assert_eq!(dry, ["ark:/99999/fk44w2s", "ark:/99999/fk4159p"]);
        assert_eq!(minted(&minters, "ark:/99999/fk4", 2, false), dry);
        assert_eq!(minted(&minters, "ark:/99999/fk4", 1, false), ["ark:/99999/fk4wc7r"]);
    }

    #[test]
    fn doi_shoulders_print_dois() {
        let dir = tempfile::tempdir().unwrap();
        let minters = FileMinterStore::new(dir.path());
        minter_create(&minters, "doi:10.5072/FK2", "eedk").unwrap();
        let ids = minted(&minters, "doi:10.5072/FK2", 3, false);
        assert_eq!(ids.len(), 3);
        for id in &ids {
            let suffix = id.strip_prefix("doi:10.5072/").unwrap();
            assert!(suffix.starts_with("FK2"));
            assert_eq!(suffix, suffix.to_ascii_uppercase());
        }
    }

    #[test]
    fn import_checks_the_shoulder() {
        let dir = tempfile::tempdir().unwrap();
        let minters = FileMinterStore::new(dir.path().join("minters"));
        let source = ezid::Minter::create("99999/fk4", "eedk").unwrap();
        let dump: BTreeMap<String, String> = source
            .to_state()
            .iter()
            .map(|(k, v)| (format!(":/{k}"), v.to_owned()))
            .collect();
        let path = dir.path().join("dump.json");
        fs::write(&path, serde_json::to_string(&dump).unwrap()).unwrap();

        assert!(minter_import(&minters, &path, "ark:/99999/fk5").is_err());
        minter_import(&minters, &path, "ark:/99999/fk4").unwrap();
        assert_eq!(minters.load("99999/fk4").unwrap(), source);
    }

    #[test]
    fn clear_only_touches_permanent_failures() {
        let store = MemoryStore::new();
        let name = IdentifierName::parse("ark:/99999/fk4a").unwrap();
        store
            .insert_identifier_and_enqueue_all(&Identifier::new(&name, 1_000), Operation::Create, 1_000)
            .unwrap();
        let clock = ManualClock::new(5_000);
        let entry = store
            .claim_batch(Destination::Binder, &ClaimPolicy::default(), 1_000, 1)
            .unwrap()
            .entries
            .remove(0);

        assert!(queue_clear(&store, &clock, Destination::Binder, entry.seq).is_err());
        store
            .update_status(
                Destination::Binder,
                entry.seq,
                &StatusUpdate::failure(1_000, "400 Bad Request", true),
            )
            .unwrap();

        let mut out = Vec::new();
        queue_list(&store, Destination::Binder, &mut out).unwrap();
        let listing = String::from_utf8(out).unwrap();
        assert!(listing.contains("ark:/99999/fk4a"));
        assert!(listing.contains("permanent: 400 Bad Request"));

        queue_clear(&store, &clock, Destination::Binder, entry.seq).unwrap();
        let row = &store.list_queue(Destination::Binder).unwrap()[0];
        assert_eq!(row.status, QueueStatus::Failure);
        assert!(!row.error_is_permanent);
    }
}
