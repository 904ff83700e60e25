// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Items in the build queue.

A [QueueItem] is a descriptor plus the files it lists, sitting in either the
incoming or the queued directory. Items move from incoming to queued with
[QueueItem::queue] and are consumed by [QueueItem::finish].
*/

use {
    crate::{
        config::QueueLayout,
        descriptor::DescriptorRecord,
        digest::{ChecksumType, ContentDigest},
        error::{BuildQueueError, Result},
        journal::{Journal, JournalAction},
    },
    log::{debug, info},
    once_cell::unsync::OnceCell,
    std::path::PathBuf,
};

/// The directory an item currently resides in.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum QueueLocation {
    /// Dropped off, not yet validated.
    Incoming,
    /// Validated and awaiting a build.
    Queued,
}

impl std::fmt::Display for QueueLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Incoming => "incoming",
            Self::Queued => "queued",
        })
    }
}

/// A descriptor and its files at a specific stage of the queue.
///
/// Equality is defined by the digest of the descriptor file, independent of location
/// or filename.
#[derive(Debug)]
pub struct QueueItem {
    layout: QueueLayout,
    descriptor_filename: String,
    location: QueueLocation,
    digest: ContentDigest,
    descriptor: OnceCell<DescriptorRecord>,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for QueueItem {}

impl std::fmt::Display for QueueItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.descriptor.get() {
            Some(record) => write!(f, "{} \"{}\"", self.path().display(), record.source()),
            None => write!(f, "{}", self.path().display()),
        }
    }
}

impl QueueItem {
    /// Load the item for a descriptor at a location.
    ///
    /// The digest of the descriptor file is computed immediately. Fails with
    /// [BuildQueueError::FileUnreadable] if the descriptor cannot be read.
    pub fn load(
        layout: &QueueLayout,
        descriptor_filename: impl ToString,
        location: QueueLocation,
    ) -> Result<Self> {
        let descriptor_filename = descriptor_filename.to_string();
        let path = layout.directory(location).join(&descriptor_filename);
        let digest = ContentDigest::compute_path(ChecksumType::Md5, &path)?;

        Ok(Self {
            layout: layout.clone(),
            descriptor_filename,
            location,
            digest,
            descriptor: OnceCell::new(),
        })
    }

    /// The filename of the descriptor.
    pub fn descriptor_filename(&self) -> &str {
        &self.descriptor_filename
    }

    /// Where this item currently resides.
    pub fn location(&self) -> QueueLocation {
        self.location
    }

    /// Full path to the descriptor at the current location.
    pub fn path(&self) -> PathBuf {
        self.directory().join(&self.descriptor_filename)
    }

    fn directory(&self) -> PathBuf {
        self.layout.directory(self.location).to_path_buf()
    }

    /// The MD5 digest of the descriptor file.
    pub fn digest(&self) -> &ContentDigest {
        &self.digest
    }

    /// The parsed descriptor.
    ///
    /// Parsed on first access. Fails with [BuildQueueError::FileUnreadable] if the
    /// descriptor cannot be read or [BuildQueueError::MalformedDescriptor] if it
    /// cannot be parsed.
    pub fn descriptor(&self) -> Result<&DescriptorRecord> {
        self.descriptor.get_or_try_init(|| {
            let path = self.path();
            let data =
                std::fs::read(&path).map_err(|e| BuildQueueError::FileUnreadable(path, e))?;

            DescriptorRecord::parse(&data)
        })
    }

    /// Whether the descriptor and every file it lists are present with matching checksums.
    ///
    /// A missing or unreadable file, or any checksum mismatch, makes the item invalid.
    /// Every checksum field of the descriptor is verified.
    ///
    /// Returns an error only if the descriptor cannot be parsed.
    pub fn validate(&self) -> Result<bool> {
        debug!("validating {}", self.path().display());

        if let Err(e) = std::fs::File::open(self.path()) {
            debug!("descriptor {} unreadable: {}", self.path().display(), e);
            return Ok(false);
        }

        let record = match self.descriptor() {
            Ok(record) => record,
            Err(BuildQueueError::FileUnreadable(path, e)) => {
                debug!("descriptor {} unreadable: {}", path.display(), e);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let directory = self.directory();

        for entry in record.iter_digests() {
            let path = directory.join(&entry.filename);

            match ContentDigest::compute_path(entry.digest.checksum_type(), &path) {
                Ok(digest) if digest == entry.digest => {}
                Ok(digest) => {
                    debug!(
                        "{} checksum mismatch: expected {:?}, got {:?}",
                        path.display(),
                        entry.digest,
                        digest
                    );
                    return Ok(false);
                }
                Err(e) => {
                    debug!("{}", e);
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    /// Move the descriptor and its files from incoming to queued.
    ///
    /// Files are moved first and the descriptor last, through a journal in the work
    /// directory. The digest is recomputed from the new location.
    ///
    /// Fails with [BuildQueueError::DestinationExists] without touching any file if
    /// a file of the same name is already in the queued directory.
    pub fn queue(&mut self) -> Result<()> {
        if self.location != QueueLocation::Incoming {
            return Err(BuildQueueError::InvalidTransition {
                operation: "queue",
                location: self.location,
            });
        }

        debug!("queuing {}", self);

        let mut files = self
            .descriptor()?
            .filenames()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        files.push(self.descriptor_filename.clone());

        for name in &files {
            let destination = self.layout.queued.join(name);
            if destination.symlink_metadata().is_ok() {
                return Err(BuildQueueError::DestinationExists(destination));
            }
        }

        Journal {
            descriptor: self.descriptor_filename.clone(),
            operation: JournalAction::Move {
                source: self.layout.incoming.clone(),
                destination: self.layout.queued.clone(),
            },
            files,
        }
        .execute(&self.layout.work)?;

        self.location = QueueLocation::Queued;
        self.digest = ContentDigest::compute_path(ChecksumType::Md5, self.path())?;

        Ok(())
    }

    /// Delete the descriptor and its files from the queued directory.
    ///
    /// This consumes the item. The descriptor is removed first so an interrupted
    /// finish never leaves a descriptor whose files are gone.
    pub fn finish(self) -> Result<()> {
        if self.location != QueueLocation::Queued {
            return Err(BuildQueueError::InvalidTransition {
                operation: "finish",
                location: self.location,
            });
        }

        debug!("finishing {}", self);

        let mut files = vec![self.descriptor_filename.clone()];
        files.extend(self.descriptor()?.filenames().map(|s| s.to_string()));

        Journal {
            descriptor: self.descriptor_filename.clone(),
            operation: JournalAction::Remove {
                directory: self.layout.queued.clone(),
            },
            files,
        }
        .execute(&self.layout.work)?;

        info!("removed {} from queue", self.descriptor_filename);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testutil::{write_package, TestQueue},
    };

    #[test]
    fn load_missing_descriptor() -> Result<()> {
        let tq = TestQueue::new()?;

        let res = QueueItem::load(&tq.layout, "missing.dsc", QueueLocation::Incoming);
        assert!(matches!(res, Err(BuildQueueError::FileUnreadable(_, _))));

        Ok(())
    }

    #[test]
    fn digest_is_stable() -> Result<()> {
        let tq = TestQueue::new()?;
        write_package(&tq.layout.incoming, "pkg1", b"content")?;

        let item = QueueItem::load(&tq.layout, "pkg1.dsc", QueueLocation::Incoming)?;
        let first = item.digest().clone();
        assert_eq!(item.digest(), &first);
        assert_eq!(item.digest(), &first);

        let data = std::fs::read(tq.layout.incoming.join("pkg1.dsc"))?;
        assert_eq!(first, ContentDigest::compute(ChecksumType::Md5, &data));

        Ok(())
    }

    #[test]
    fn validate_detects_any_byte_change() -> Result<()> {
        let tq = TestQueue::new()?;
        write_package(&tq.layout.incoming, "pkg1", b"some package content")?;

        let item = QueueItem::load(&tq.layout, "pkg1.dsc", QueueLocation::Incoming)?;
        assert!(item.validate()?);

        let tarball = tq.layout.incoming.join("pkg1.tar.gz");
        let original = std::fs::read(&tarball)?;

        for i in 0..original.len() {
            let mut mutated = original.clone();
            mutated[i] ^= 0x01;
            std::fs::write(&tarball, &mutated)?;

            assert!(!item.validate()?, "mutating byte {} should invalidate", i);
        }

        std::fs::write(&tarball, &original)?;
        assert!(item.validate()?);

        std::fs::remove_file(&tarball)?;
        assert!(!item.validate()?);

        Ok(())
    }

    #[test]
    fn validate_missing_descriptor_is_invalid() -> Result<()> {
        let tq = TestQueue::new()?;
        write_package(&tq.layout.incoming, "pkg1", b"content")?;

        let item = QueueItem::load(&tq.layout, "pkg1.dsc", QueueLocation::Incoming)?;
        std::fs::remove_file(tq.layout.incoming.join("pkg1.dsc"))?;

        assert!(!item.validate()?);

        Ok(())
    }

    #[test]
    fn validate_checks_sha256_when_present() -> Result<()> {
        let tq = TestQueue::new()?;
        let data = b"content";
        std::fs::write(tq.layout.incoming.join("pkg1.tar.gz"), data)?;

        let md5 = ContentDigest::compute(ChecksumType::Md5, data);
        std::fs::write(
            tq.layout.incoming.join("pkg1.dsc"),
            format!(
                "Source: pkg1\nVersion: 1.0\nChecksums-Sha256:\n {} {} pkg1.tar.gz\nFiles:\n {} {} pkg1.tar.gz\n",
                "00".repeat(32),
                data.len(),
                md5,
                data.len()
            ),
        )?;

        let item = QueueItem::load(&tq.layout, "pkg1.dsc", QueueLocation::Incoming)?;
        assert!(!item.validate()?);

        Ok(())
    }

    #[test]
    fn validate_malformed_descriptor_errors() -> Result<()> {
        let tq = TestQueue::new()?;
        std::fs::write(tq.layout.incoming.join("bad.dsc"), b"Source: bad\n")?;

        let item = QueueItem::load(&tq.layout, "bad.dsc", QueueLocation::Incoming)?;
        assert!(matches!(
            item.validate(),
            Err(BuildQueueError::MalformedDescriptor(_))
        ));

        Ok(())
    }

    #[test]
    fn queue_and_finish() -> Result<()> {
        let tq = TestQueue::new()?;
        write_package(&tq.layout.incoming, "pkg1", b"content")?;

        let mut item = QueueItem::load(&tq.layout, "pkg1.dsc", QueueLocation::Incoming)?;
        let digest = item.digest().clone();
        item.queue()?;

        assert_eq!(item.location(), QueueLocation::Queued);
        assert_eq!(item.path(), tq.layout.queued.join("pkg1.dsc"));
        assert_eq!(item.digest(), &digest);
        assert!(!tq.layout.incoming.join("pkg1.dsc").exists());
        assert!(!tq.layout.incoming.join("pkg1.tar.gz").exists());
        assert!(tq.layout.queued.join("pkg1.dsc").exists());
        assert!(tq.layout.queued.join("pkg1.tar.gz").exists());
        assert!(item.validate()?);
        assert_eq!(item.to_string(), format!("{} \"pkg1\"", item.path().display()));

        item.finish()?;

        assert_eq!(std::fs::read_dir(&tq.layout.queued)?.count(), 0);
        assert_eq!(std::fs::read_dir(&tq.layout.work)?.count(), 0);

        Ok(())
    }

    #[test]
    fn transition_guards() -> Result<()> {
        let tq = TestQueue::new()?;
        write_package(&tq.layout.incoming, "pkg1", b"content")?;
        write_package(&tq.layout.incoming, "pkg2", b"other content")?;

        let item = QueueItem::load(&tq.layout, "pkg1.dsc", QueueLocation::Incoming)?;
        assert!(matches!(
            item.finish(),
            Err(BuildQueueError::InvalidTransition {
                operation: "finish",
                location: QueueLocation::Incoming,
            })
        ));
        // A failed finish touches nothing.
        assert!(tq.layout.incoming.join("pkg1.dsc").exists());
        assert!(tq.layout.incoming.join("pkg1.tar.gz").exists());

        let mut item = QueueItem::load(&tq.layout, "pkg2.dsc", QueueLocation::Incoming)?;
        item.queue()?;
        assert!(matches!(
            item.queue(),
            Err(BuildQueueError::InvalidTransition {
                operation: "queue",
                location: QueueLocation::Queued,
            })
        ));

        Ok(())
    }

    #[test]
    fn queue_refuses_to_overwrite() -> Result<()> {
        let tq = TestQueue::new()?;
        write_package(&tq.layout.queued, "pkg1", b"waiting")?;
        write_package(&tq.layout.incoming, "pkg1", b"newer upload")?;

        let mut item = QueueItem::load(&tq.layout, "pkg1.dsc", QueueLocation::Incoming)?;
        assert!(matches!(
            item.queue(),
            Err(BuildQueueError::DestinationExists(path)) if path == tq.layout.queued.join("pkg1.tar.gz")
        ));

        assert_eq!(item.location(), QueueLocation::Incoming);
        assert_eq!(
            std::fs::read(tq.layout.queued.join("pkg1.tar.gz"))?,
            b"waiting"
        );
        assert_eq!(
            std::fs::read(tq.layout.incoming.join("pkg1.tar.gz"))?,
            b"newer upload"
        );
        assert_eq!(std::fs::read_dir(&tq.layout.work)?.count(), 0);

        Ok(())
    }

    #[test]
    fn equality_by_digest() -> Result<()> {
        let tq = TestQueue::new()?;
        write_package(&tq.layout.incoming, "pkg1", b"content")?;
        write_package(&tq.layout.incoming, "pkg2", b"other content")?;
        std::fs::copy(
            tq.layout.incoming.join("pkg1.dsc"),
            tq.layout.queued.join("copy.dsc"),
        )?;

        let a = QueueItem::load(&tq.layout, "pkg1.dsc", QueueLocation::Incoming)?;
        let b = QueueItem::load(&tq.layout, "pkg2.dsc", QueueLocation::Incoming)?;
        let c = QueueItem::load(&tq.layout, "copy.dsc", QueueLocation::Queued)?;

        assert_ne!(a, b);
        assert_eq!(a, c);

        Ok(())
    }
}
