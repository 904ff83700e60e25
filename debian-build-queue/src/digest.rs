// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Content digests and file hashing. */

use {
    crate::error::{BuildQueueError, Result},
    digest::DynDigest,
    std::{
        fmt::Formatter,
        io::Read,
        path::Path,
    },
};

/// Checksum flavors found in `.dsc` files.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChecksumType {
    /// MD5, used by the `Files` field.
    Md5,

    /// SHA-1, used by the `Checksums-Sha1` field.
    Sha1,

    /// SHA-256, used by the `Checksums-Sha256` field.
    Sha256,
}

impl ChecksumType {
    /// Name of the `.dsc` control field holding file entries of this flavor.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "Files",
            Self::Sha1 => "Checksums-Sha1",
            Self::Sha256 => "Checksums-Sha256",
        }
    }

    /// Obtain a new hasher for this checksum flavor.
    pub fn new_hasher(&self) -> Box<dyn DynDigest> {
        match self {
            Self::Md5 => Box::new(md5::Md5::default()),
            Self::Sha1 => Box::new(sha1::Sha1::default()),
            Self::Sha256 => Box::new(sha2::Sha256::default()),
        }
    }
}

/// Represents a content digest.
#[derive(Clone, Eq, Hash, PartialEq)]
pub enum ContentDigest {
    /// An MD5 digest.
    Md5(Vec<u8>),
    /// A SHA-1 digest.
    Sha1(Vec<u8>),
    /// A SHA-256 digest.
    Sha256(Vec<u8>),
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5(data) => write!(f, "Md5({})", hex::encode(data)),
            Self::Sha1(data) => write!(f, "Sha1({})", hex::encode(data)),
            Self::Sha256(data) => write!(f, "Sha256({})", hex::encode(data)),
        }
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.digest_hex())
    }
}

impl ContentDigest {
    /// Create a new MD5 instance by parsing a hex digest.
    pub fn md5_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Md5, digest)
    }

    /// Create a new SHA-1 instance by parsing a hex digest.
    pub fn sha1_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Sha1, digest)
    }

    /// Create a new SHA-256 instance by parsing a hex digest.
    pub fn sha256_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Sha256, digest)
    }

    /// Obtain an instance by parsing a hex string as a [ChecksumType].
    pub fn from_hex_digest(checksum: ChecksumType, digest: &str) -> Result<Self> {
        let bytes = hex::decode(digest)
            .map_err(|e| BuildQueueError::ContentDigestBadHex(digest.to_string(), e))?;

        Ok(Self::from_bytes(checksum, bytes))
    }

    fn from_bytes(checksum: ChecksumType, bytes: Vec<u8>) -> Self {
        match checksum {
            ChecksumType::Md5 => Self::Md5(bytes),
            ChecksumType::Sha1 => Self::Sha1(bytes),
            ChecksumType::Sha256 => Self::Sha256(bytes),
        }
    }

    /// Compute the digest of in-memory content.
    pub fn compute(checksum: ChecksumType, data: &[u8]) -> Self {
        let mut hasher = checksum.new_hasher();
        hasher.update(data);

        Self::from_bytes(checksum, hasher.finalize().to_vec())
    }

    /// Compute the digest of content produced by a reader.
    pub fn compute_reader(checksum: ChecksumType, mut reader: impl Read) -> std::io::Result<Self> {
        let mut hasher = checksum.new_hasher();
        let mut buffer = [0u8; 32768];

        loop {
            let count = reader.read(&mut buffer)?;
            if count == 0 {
                break;
            }

            hasher.update(&buffer[0..count]);
        }

        Ok(Self::from_bytes(checksum, hasher.finalize().to_vec()))
    }

    /// Compute the digest of a file on the filesystem.
    ///
    /// Any failure to open or read the file is reported as [BuildQueueError::FileUnreadable].
    pub fn compute_path(checksum: ChecksumType, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        std::fs::File::open(path)
            .and_then(|fh| Self::compute_reader(checksum, std::io::BufReader::new(fh)))
            .map_err(|e| BuildQueueError::FileUnreadable(path.to_path_buf(), e))
    }

    /// Obtain the digest bytes for this content digest.
    pub fn digest_bytes(&self) -> &[u8] {
        match self {
            Self::Md5(x) => x,
            Self::Sha1(x) => x,
            Self::Sha256(x) => x,
        }
    }

    /// Obtain the hex encoded content digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest_bytes())
    }

    /// Obtain the [ChecksumType] for this digest.
    pub fn checksum_type(&self) -> ChecksumType {
        match self {
            Self::Md5(_) => ChecksumType::Md5,
            Self::Sha1(_) => ChecksumType::Sha1,
            Self::Sha256(_) => ChecksumType::Sha256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_known_digests() -> Result<()> {
        assert_eq!(
            ContentDigest::compute(ChecksumType::Md5, b""),
            ContentDigest::md5_hex("d41d8cd98f00b204e9800998ecf8427e")?
        );
        assert_eq!(
            ContentDigest::compute(ChecksumType::Sha1, b"abc"),
            ContentDigest::sha1_hex("a9993e364706816aba3e25717850c26c9cd0d89d")?
        );
        assert_eq!(
            ContentDigest::compute(ChecksumType::Sha256, b"abc").digest_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        Ok(())
    }

    #[test]
    fn digest_type_is_part_of_equality() -> Result<()> {
        let md5 = ContentDigest::md5_hex("abc123")?;
        let sha1 = ContentDigest::sha1_hex("abc123")?;

        assert_ne!(md5, sha1);
        assert_eq!(md5.to_string(), "abc123");
        assert_eq!(format!("{:?}", md5), "Md5(abc123)");

        Ok(())
    }

    #[test]
    fn bad_hex() {
        assert!(matches!(
            ContentDigest::md5_hex("xyz"),
            Err(BuildQueueError::ContentDigestBadHex(_, _))
        ));
    }

    #[test]
    fn compute_path_missing_file() -> Result<()> {
        let td = tempfile::Builder::new().prefix("dbq-test").tempdir()?;

        let res = ContentDigest::compute_path(ChecksumType::Md5, td.path().join("missing"));
        assert!(matches!(res, Err(BuildQueueError::FileUnreadable(_, _))));

        let path = td.path().join("present");
        std::fs::write(&path, b"abc")?;
        assert_eq!(
            ContentDigest::compute_path(ChecksumType::Md5, &path)?.digest_hex(),
            "900150983cd24fb0d6963f7d28e17f72"
        );

        Ok(())
    }
}
