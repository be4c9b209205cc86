//! Owners excluded from link checking.
//!
//! The file holds one `owner permanent|temporary` pair per line; blank lines
//! and `#` comments are ignored. A permanently excluded owner's rows are
//! dropped from the link check table. A temporarily excluded owner keeps its
//! rows but is skipped when worksets are built.

use anyhow::{Context, bail};
use ezid::OwnerId;
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exclusion {
    Permanent,
    Temporary,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExclusionList {
    owners: HashMap<String, Exclusion>,
}

impl ExclusionList {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut owners = HashMap::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(owner), Some(kind), None) = (fields.next(), fields.next(), fields.next())
            else {
                bail!("line {}: expected `owner permanent|temporary`", n + 1);
            };
            let kind = match kind.to_ascii_lowercase().as_str() {
                "permanent" => Exclusion::Permanent,
                "temporary" => Exclusion::Temporary,
                other => bail!("line {}: unknown exclusion `{other}`", n + 1),
            };
            owners.insert(owner.to_owned(), kind);
        }
        Ok(Self { owners })
    }

    pub fn get(&self, owner: &OwnerId) -> Option<Exclusion> {
        self.owners.get(owner.as_str()).copied()
    }

    pub fn is_permanent(&self, owner: &OwnerId) -> bool {
        self.get(owner) == Some(Exclusion::Permanent)
    }

    /// True for either kind of exclusion.
    pub fn is_excluded(&self, owner: &OwnerId) -> bool {
        self.get(owner).is_some()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// An exclusion file reloaded whenever its modification time changes.
#[derive(Debug, Default)]
pub struct ExclusionFile {
    path: Option<PathBuf>,
    modified: Option<SystemTime>,
    list: ExclusionList,
}

impl ExclusionFile {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }

    pub const fn list(&self) -> &ExclusionList {
        &self.list
    }

    /// Reloads the file if it changed since the last call. Returns whether
    /// the list was replaced.
    ///
    /// A missing file means no exclusions. On a parse error the previous
    /// list stays in force.
    pub fn refresh(&mut self) -> anyhow::Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let modified = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => Some(modified),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| format!("cannot stat {}", path.display()));
            }
        };
        if modified == self.modified {
            return Ok(false);
        }

        let list = match modified {
            Some(_) => load(path)?,
            None => ExclusionList::default(),
        };
        tracing::info!(path = %path.display(), owners = list.len(), "loaded link check exclusions");
        self.list = list;
        self.modified = modified;
        Ok(true)
    }
}

fn load(path: &Path) -> anyhow::Result<ExclusionList> {
    let text =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    ExclusionList::parse(&text).with_context(|| format!("invalid exclusion file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parses_owner_kinds_and_comments() {
        let list = ExclusionList::parse(
            "# owners\nalice permanent\n\n  bob   Temporary # flaky host\n",
        )
        .unwrap();
        assert!(list.is_permanent(&OwnerId::new("alice")));
        assert_eq!(list.get(&OwnerId::new("bob")), Some(Exclusion::Temporary));
        assert!(list.is_excluded(&OwnerId::new("bob")));
        assert!(!list.is_excluded(&OwnerId::new("carol")));

        assert!(ExclusionList::parse("alice").is_err());
        assert!(ExclusionList::parse("alice forever").is_err());
        assert!(ExclusionList::parse("alice permanent extra").is_err());
    }

    #[test]
    fn reloads_on_mtime_change_and_keeps_list_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exclusions.txt");
        let mut file = ExclusionFile::new(Some(path.clone()));

        // Not there yet: nothing to load.
        assert!(!file.refresh().unwrap());
        assert!(file.list().is_empty());

        fs::write(&path, "alice permanent\n").unwrap();
        assert!(file.refresh().unwrap());
        assert!(file.list().is_permanent(&OwnerId::new("alice")));
        assert!(!file.refresh().unwrap());

        fs::write(&path, "alice nonsense\n").unwrap();
        touch(&path, 10);
        assert!(file.refresh().is_err());
        assert!(file.list().is_permanent(&OwnerId::new("alice")));

        fs::write(&path, "bob temporary\n").unwrap();
        touch(&path, 20);
        assert!(file.refresh().unwrap());
        assert!(!file.list().is_excluded(&OwnerId::new("alice")));
        assert!(file.list().is_excluded(&OwnerId::new("bob")));

        fs::remove_file(&path).unwrap();
        assert!(file.refresh().unwrap());
        assert!(file.list().is_empty());
    }

    fn touch(path: &Path, secs_ahead: u64) {
        let when = SystemTime::now() + Duration::from_secs(secs_ahead);
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(when)
            .unwrap();
    }
}
