// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Journaled multi-file operations.

Moving or deleting a queue item touches several files. Before touching any of
them, the full operation is recorded in a journal file in the work directory.
The journal is removed once every file has been handled. If the process dies
part way through, [replay_pending] completes the operation on the next run,
so an item is never left split between two directories.
*/

use {
    crate::error::{BuildQueueError, Result},
    log::{debug, error, warn},
    serde::{Deserialize, Serialize},
    std::{
        io::{ErrorKind, Write},
        path::{Path, PathBuf},
    },
};

const JOURNAL_EXTENSION: &str = "journal";
const TEMP_SUFFIX: &str = ".journal.tmp";

/// The file operation a journal records.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum JournalAction {
    /// Rename files from one directory to another.
    Move {
        source: PathBuf,
        destination: PathBuf,
    },
    /// Delete files from a directory.
    Remove { directory: PathBuf },
}

/// A pending operation on an ordered list of files.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Journal {
    /// Filename of the descriptor the operation belongs to.
    pub descriptor: String,

    /// The operation to perform.
    pub operation: JournalAction,

    /// Files to operate on, in order.
    pub files: Vec<String>,
}

impl Journal {
    /// Path of the journal file for this operation inside `work_dir`.
    pub fn path(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(format!("{}.{}", self.descriptor, JOURNAL_EXTENSION))
    }

    /// Persist the journal into `work_dir`, returning the path written.
    ///
    /// Content is written to a temporary file, flushed to disk and renamed into
    /// place so a torn journal is never observed.
    pub fn write(&self, work_dir: &Path) -> Result<PathBuf> {
        let path = self.path(work_dir);
        let temp_path = work_dir.join(format!(".{}{}", self.descriptor, TEMP_SUFFIX));

        let data = serde_yaml::to_string(self)?;
        {
            let mut fh = std::fs::File::create(&temp_path)?;
            fh.write_all(data.as_bytes())?;
            fh.sync_all()?;
        }
        std::fs::rename(&temp_path, &path)?;
        sync_directory(work_dir)?;

        debug!("wrote journal {}", path.display());

        Ok(path)
    }

    /// Read a journal from a file.
    pub fn read(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .map_err(|e| BuildQueueError::FileUnreadable(path.to_path_buf(), e))?;

        Ok(serde_yaml::from_slice(&data)?)
    }

    /// Perform the recorded operation.
    ///
    /// This is idempotent. Moves skip files already present at the destination and
    /// removals skip files that no longer exist. Returns the names of files that
    /// could be found in neither location of a move.
    pub fn apply(&self) -> Result<Vec<String>> {
        let mut missing = vec![];

        match &self.operation {
            JournalAction::Move {
                source,
                destination,
            } => {
                for name in &self.files {
                    let from = source.join(name);
                    let to = destination.join(name);

                    match std::fs::rename(&from, &to) {
                        Ok(()) => {
                            debug!("moved {} -> {}", from.display(), to.display());
                        }
                        Err(e) if e.kind() == ErrorKind::NotFound => {
                            if !to.exists() {
                                missing.push(name.clone());
                            }
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            JournalAction::Remove { directory } => {
                for name in &self.files {
                    let path = directory.join(name);

                    match std::fs::remove_file(&path) {
                        Ok(()) => {
                            debug!("removed {}", path.display());
                        }
                        Err(e) if e.kind() == ErrorKind::NotFound => {
                            debug!("{} already removed", path.display());
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        Ok(missing)
    }

    /// Write the journal, apply it, and remove it.
    ///
    /// If files of a move are missing, the journal is left in place and
    /// [BuildQueueError::JournalIncomplete] is returned.
    pub fn execute(&self, work_dir: &Path) -> Result<()> {
        let path = self.write(work_dir)?;

        let missing = self.apply()?;
        if !missing.is_empty() {
            return Err(BuildQueueError::JournalIncomplete(path, missing));
        }

        std::fs::remove_file(&path)?;

        Ok(())
    }
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> Result<()> {
    std::fs::File::open(dir)?.sync_all()?;

    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> Result<()> {
    Ok(())
}

fn replay(path: &Path) -> Result<()> {
    let journal = Journal::read(path)?;
    warn!(
        "replaying interrupted operation for {} from {}",
        journal.descriptor,
        path.display()
    );

    let missing = journal.apply()?;
    if !missing.is_empty() {
        warn!(
            "files of {} missing from both locations: {}",
            journal.descriptor,
            missing.join(", ")
        );
    }

    std::fs::remove_file(path)?;

    Ok(())
}

/// Complete every journaled operation left behind in `work_dir`.
///
/// Journals are processed in filename order. A journal that cannot be read or
/// applied is logged and left in place for an operator to inspect. Temporary
/// files from interrupted journal writes are deleted.
///
/// Returns the number of journals replayed.
pub fn replay_pending(work_dir: &Path) -> Result<usize> {
    let mut paths = vec![];

    for entry in std::fs::read_dir(work_dir)? {
        let path = entry?.path();

        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };

        if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
            debug!("removing stale {}", path.display());
            std::fs::remove_file(&path)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(JOURNAL_EXTENSION) {
            paths.push(path);
        }
    }

    paths.sort();

    let mut count = 0;

    for path in &paths {
        match replay(path) {
            Ok(()) => count += 1,
            Err(e) => {
                error!("unable to replay {}: {}; leaving in place", path.display(), e);
            }
        }
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    struct Dirs {
        _td: TempDir,
        a: PathBuf,
        b: PathBuf,
        work: PathBuf,
    }

    fn dirs() -> Result<Dirs> {
        let td = tempfile::Builder::new().prefix("dbq-journal").tempdir()?;
        let a = td.path().join("a");
        let b = td.path().join("b");
        let work = td.path().join("work");
        for p in [&a, &b, &work] {
            std::fs::create_dir(p)?;
        }

        Ok(Dirs { _td: td, a, b, work })
    }

    fn move_journal(d: &Dirs) -> Journal {
        Journal {
            descriptor: "pkg.dsc".to_string(),
            operation: JournalAction::Move {
                source: d.a.clone(),
                destination: d.b.clone(),
            },
            files: vec!["pkg.tar.gz".to_string(), "pkg.dsc".to_string()],
        }
    }

    #[test]
    fn execute_move() -> Result<()> {
        let d = dirs()?;
        std::fs::write(d.a.join("pkg.tar.gz"), b"tar")?;
        std::fs::write(d.a.join("pkg.dsc"), b"dsc")?;

        move_journal(&d).execute(&d.work)?;

        assert!(!d.a.join("pkg.tar.gz").exists());
        assert!(!d.a.join("pkg.dsc").exists());
        assert_eq!(std::fs::read(d.b.join("pkg.tar.gz"))?, b"tar");
        assert_eq!(std::fs::read(d.b.join("pkg.dsc"))?, b"dsc");
        assert_eq!(std::fs::read_dir(&d.work)?.count(), 0);

        Ok(())
    }

    #[test]
    fn execute_move_missing_file_keeps_journal() -> Result<()> {
        let d = dirs()?;
        std::fs::write(d.a.join("pkg.dsc"), b"dsc")?;

        let journal = move_journal(&d);
        let res = journal.execute(&d.work);

        match res {
            Err(BuildQueueError::JournalIncomplete(path, missing)) => {
                assert_eq!(path, journal.path(&d.work));
                assert_eq!(missing, vec!["pkg.tar.gz".to_string()]);
            }
            res => panic!("unexpected result: {:?}", res),
        }
        assert!(journal.path(&d.work).exists());

        Ok(())
    }

    #[test]
    fn replay_interrupted_move() -> Result<()> {
        let d = dirs()?;

        // Simulate a crash after the first file moved.
        std::fs::write(d.b.join("pkg.tar.gz"), b"tar")?;
        std::fs::write(d.a.join("pkg.dsc"), b"dsc")?;
        move_journal(&d).write(&d.work)?;

        assert_eq!(replay_pending(&d.work)?, 1);

        assert!(d.b.join("pkg.tar.gz").exists());
        assert!(d.b.join("pkg.dsc").exists());
        assert!(!d.a.join("pkg.dsc").exists());
        assert_eq!(std::fs::read_dir(&d.work)?.count(), 0);

        // Nothing left to do.
        assert_eq!(replay_pending(&d.work)?, 0);

        Ok(())
    }

    #[test]
    fn replay_interrupted_remove() -> Result<()> {
        let d = dirs()?;

        // The descriptor was removed before the crash; the tarball was not.
        std::fs::write(d.b.join("pkg.tar.gz"), b"tar")?;
        let journal = Journal {
            descriptor: "pkg.dsc".to_string(),
            operation: JournalAction::Remove {
                directory: d.b.clone(),
            },
            files: vec!["pkg.dsc".to_string(), "pkg.tar.gz".to_string()],
        };
        journal.write(&d.work)?;

        assert_eq!(replay_pending(&d.work)?, 1);
        assert_eq!(std::fs::read_dir(&d.b)?.count(), 0);

        Ok(())
    }

    #[test]
    fn replay_leaves_unreadable_journals() -> Result<()> {
        let d = dirs()?;

        std::fs::write(d.b.join("pkg.tar.gz"), b"tar")?;
        std::fs::write(d.a.join("pkg.dsc"), b"dsc")?;
        move_journal(&d).write(&d.work)?;

        let bad = d.work.join("broken.dsc.journal");
        std::fs::write(&bad, b"")?;

        assert_eq!(replay_pending(&d.work)?, 1);
        assert!(d.b.join("pkg.dsc").exists());
        assert!(bad.exists());
        assert_eq!(std::fs::read_dir(&d.work)?.count(), 1);

        Ok(())
    }

    #[test]
    fn replay_removes_stale_temp_files() -> Result<()> {
        let d = dirs()?;
        let stale = d.work.join(".pkg.dsc.journal.tmp");
        std::fs::write(&stale, b"action: mo")?;

        assert_eq!(replay_pending(&d.work)?, 0);
        assert!(!stale.exists());

        Ok(())
    }

    #[test]
    fn journal_yaml_round_trips() -> Result<()> {
        let d = dirs()?;
        let journal = move_journal(&d);
        let path = journal.write(&d.work)?;

        let data = std::fs::read_to_string(&path)?;
        assert!(data.contains("action: move"));
        assert_eq!(Journal::read(&path)?, journal);

        Ok(())
    }
}
