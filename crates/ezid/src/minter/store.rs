use crate::{Error, Mint, Minter, MinterError, MinterState};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Persistence for minter state, keyed by shoulder namespace (`99999/fk4`).
pub trait MinterStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Minter, MinterError>;

    /// Replaces the stored state atomically.
    fn save(&self, minter: &Minter) -> Result<(), MinterError>;

    fn exists(&self, key: &str) -> Result<bool, MinterError>;
}

/// Creates and stores a new minter. Fails if one already exists for `key`.
pub fn create_minter<S>(store: &S, key: &str, mask: &str) -> Result<Minter, Error>
where
    S: MinterStore + ?Sized,
{
    if store.exists(key)? {
        return Err(MinterError::AlreadyExists(key.to_owned()).into());
    }
    let minter = Minter::create(key, mask)?;
    store.save(&minter)?;
    Ok(minter)
}

/// Loads the minter for `key`, mints `n` identifiers and saves the advanced
/// state, unless `dry_run` is set.
///
/// Nothing is written if any step fails, so a failed or dry call leaves the
/// next call producing the same sequence.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip(store)))]
pub fn mint<S>(store: &S, key: &str, n: usize, dry_run: bool) -> Result<Vec<String>, MinterError>
where
    S: MinterStore + ?Sized,
{
    let mut session = MintSession::open(store, key, dry_run)?;
    let ids = session.mint(n).collect::<Result<Vec<_>, _>>()?;
    session.commit()?;
    Ok(ids)
}

/// A minter loaded for one caller.
///
/// Minting only mutates the in-memory copy; the store sees the new state when
/// [`MintSession::commit`] is called. Dropping the session discards it.
pub struct MintSession<'s, S: ?Sized> {
    store: &'s S,
    minter: Minter,
    dry_run: bool,
}

impl<'s, S: MinterStore + ?Sized> MintSession<'s, S> {
    pub fn open(store: &'s S, key: &str, dry_run: bool) -> Result<Self, MinterError> {
        Ok(Self {
            store,
            minter: store.load(key)?,
            dry_run,
        })
    }

    pub fn mint(&mut self, n: usize) -> Mint<'_> {
        self.minter.mint(n)
    }

    pub fn next_id(&mut self) -> Result<String, MinterError> {
        self.minter.next_id()
    }

    pub const fn minter(&self) -> &Minter {
        &self.minter
    }

    /// Persists the advanced state. A no-op for dry runs.
    pub fn commit(self) -> Result<(), MinterError> {
        if self.dry_run {
            return Ok(());
        }
        self.store.save(&self.minter)
    }
}

/// One JSON document per minter at `<root>/<naan>/<shoulder>.json`.
#[derive(Clone, Debug)]
pub struct FileMinterStore {
    root: PathBuf,
}

impl FileMinterStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, MinterError> {
        crate::minter::generator::validate_key(key).map_err(|e| io_error(key, e))?;
        let mut path = self.root.clone();
        path.extend(key.split('/'));
        path.set_extension(match path.extension() {
            Some(ext) => format!("{}.json", ext.to_string_lossy()),
            None => "json".to_owned(),
        });
        Ok(path)
    }
}

impl MinterStore for FileMinterStore {
    fn load(&self, key: &str) -> Result<Minter, MinterError> {
        let path = self.path_for(key)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MinterError::NotFound(key.to_owned()));
            }
            Err(e) => return Err(io_error(key, e)),
        };
        let state: MinterState =
            serde_json::from_str(&raw).map_err(|e| MinterError::Encoding {
                key: key.to_owned(),
                reason: e.to_string(),
            })?;
        Minter::from_state(&state)
    }

    fn save(&self, minter: &Minter) -> Result<(), MinterError> {
        let key = minter.key();
        let path = self.path_for(key)?;
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(|e| io_error(key, e))?;

        let body = serde_json::to_vec_pretty(&minter.to_state()).map_err(|e| {
            MinterError::Encoding {
                key: key.to_owned(),
                reason: e.to_string(),
            }
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| io_error(key, e))?;
        tmp.write_all(&body).map_err(|e| io_error(key, e))?;
        tmp.as_file().sync_all().map_err(|e| io_error(key, e))?;
        tmp.persist(&path).map_err(|e| io_error(key, e.error))?;
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, MinterError> {
        Ok(self.path_for(key)?.is_file())
    }
}

/// Keeps serialized minter state in memory.
#[derive(Debug, Default)]
pub struct MemoryMinterStore {
    states: Mutex<HashMap<String, MinterState>>,
}

impl MemoryMinterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores raw state without validating it.
    pub fn insert_state(&self, key: impl Into<String>, state: MinterState) {
        self.states.lock().insert(key.into(), state);
    }

    pub fn state(&self, key: &str) -> Option<MinterState> {
        self.states.lock().get(key).cloned()
    }
}

impl MinterStore for MemoryMinterStore {
    fn load(&self, key: &str) -> Result<Minter, MinterError> {
        let states = self.states.lock();
        let state = states
            .get(key)
            .ok_or_else(|| MinterError::NotFound(key.to_owned()))?;
        Minter::from_state(state)
    }

    fn save(&self, minter: &Minter) -> Result<(), MinterError> {
        self.states
            .lock()
            .insert(minter.key().to_owned(), minter.to_state());
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, MinterError> {
        Ok(self.states.lock().contains_key(key))
    }
}

fn io_error(key: &str, e: impl ToString) -> MinterError {
    MinterError::Io {
        key: key.to_owned(),
        reason: e.to_string(),
    }
}
