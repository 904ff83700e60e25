// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Source package descriptors (`.dsc` files).

A descriptor names a source package, its version, and the files making up the
package along with their checksums. The fields are defined at
<https://www.debian.org/doc/debian-policy/ch-controlfields.html#debian-source-control-files-dsc>.
*/

use {
    crate::{
        control::{strip_pgp_armor, ControlParagraph, ControlParagraphReader},
        digest::{ChecksumType, ContentDigest},
        error::{BuildQueueError, Result},
    },
    std::{collections::HashSet, str::FromStr},
};

/// A file listed by a descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DescriptorFileEntry {
    /// Filename, relative to the directory holding the descriptor.
    pub filename: String,

    /// The expected content digest of the file.
    pub digest: ContentDigest,

    /// The size in bytes of the file.
    pub size: u64,
}

/// A parsed source package descriptor.
///
/// Instances are immutable once parsed and are guaranteed to list at least one file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DescriptorRecord {
    source: String,
    version: String,
    format: Option<String>,
    binaries: Vec<String>,
    architecture: Vec<String>,
    files: Vec<DescriptorFileEntry>,
    checksums_sha1: Vec<DescriptorFileEntry>,
    checksums_sha256: Vec<DescriptorFileEntry>,
}

impl DescriptorRecord {
    /// Parse descriptor content.
    ///
    /// Content may be wrapped in a PGP cleartext signature, which is discarded without
    /// verification.
    ///
    /// Any failure to decode the content is reported as
    /// [BuildQueueError::MalformedDescriptor].
    pub fn parse(content: &[u8]) -> Result<Self> {
        Self::parse_inner(content).map_err(|e| match e {
            BuildQueueError::MalformedDescriptor(_) => e,
            e => BuildQueueError::MalformedDescriptor(e.to_string()),
        })
    }

    fn parse_inner(content: &[u8]) -> Result<Self> {
        let content = std::str::from_utf8(content)
            .map_err(|e| BuildQueueError::MalformedDescriptor(format!("not UTF-8: {}", e)))?;
        let content = strip_pgp_armor(content)?;

        let paragraphs = ControlParagraphReader::new(std::io::Cursor::new(content.as_bytes()))
            .collect::<Result<Vec<_>>>()?;

        if paragraphs.len() != 1 {
            return Err(BuildQueueError::MalformedDescriptor(format!(
                "expected 1 paragraph; got {}",
                paragraphs.len()
            )));
        }

        let paragraph = &paragraphs[0];

        let files = parse_entries(paragraph, ChecksumType::Md5)?.ok_or_else(|| {
            BuildQueueError::MalformedDescriptor("required field missing: Files".to_string())
        })?;

        if files.is_empty() {
            return Err(BuildQueueError::MalformedDescriptor(
                "Files field lists no files".to_string(),
            ));
        }

        let checksums_sha1 = parse_entries(paragraph, ChecksumType::Sha1)?.unwrap_or_default();
        let checksums_sha256 =
            parse_entries(paragraph, ChecksumType::Sha256)?.unwrap_or_default();

        for entry in checksums_sha1.iter().chain(checksums_sha256.iter()) {
            if !files.iter().any(|f| f.filename == entry.filename) {
                return Err(BuildQueueError::MalformedDescriptor(format!(
                    "{} is not listed in the Files field",
                    entry.filename
                )));
            }
        }

        Ok(Self {
            source: paragraph.required_field_str("Source")?.to_string(),
            version: paragraph.required_field_str("Version")?.to_string(),
            format: paragraph.field_str("Format").map(|s| s.to_string()),
            binaries: paragraph
                .iter_field_comma_delimited("Binary")
                .map(|iter| iter.map(|s| s.to_string()).collect())
                .unwrap_or_default(),
            architecture: paragraph
                .field("Architecture")
                .map(|f| f.iter_words().map(|s| s.to_string()).collect())
                .unwrap_or_default(),
            files,
            checksums_sha1,
            checksums_sha256,
        })
    }

    /// The name of the source package.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The version string of the source package.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The source package format, if declared.
    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    /// Binary packages this source package produces.
    pub fn binaries(&self) -> &[String] {
        &self.binaries
    }

    /// Architectures this source package builds for.
    pub fn architecture(&self) -> &[String] {
        &self.architecture
    }

    /// Files listed in the `Files` field, in order.
    pub fn files(&self) -> &[DescriptorFileEntry] {
        &self.files
    }

    /// Files listed in the `Checksums-Sha1` field.
    pub fn checksums_sha1(&self) -> &[DescriptorFileEntry] {
        &self.checksums_sha1
    }

    /// Files listed in the `Checksums-Sha256` field.
    pub fn checksums_sha256(&self) -> &[DescriptorFileEntry] {
        &self.checksums_sha256
    }

    /// Iterate over the filenames of every file making up the package.
    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|entry| entry.filename.as_str())
    }

    /// Iterate over every recorded digest, across all checksum fields.
    ///
    /// A file may be emitted more than once, once per checksum flavor.
    pub fn iter_digests(&self) -> impl Iterator<Item = &DescriptorFileEntry> {
        self.files
            .iter()
            .chain(self.checksums_sha1.iter())
            .chain(self.checksums_sha256.iter())
    }
}

fn parse_entries(
    paragraph: &ControlParagraph,
    checksum: ChecksumType,
) -> Result<Option<Vec<DescriptorFileEntry>>> {
    let field = checksum.field_name();

    let lines = match paragraph.iter_field_lines(field) {
        Some(lines) => lines,
        None => return Ok(None),
    };

    let entries = lines
        .map(|line| {
            // Values are of form: <digest> <size> <filename>
            let mut parts = line.split_ascii_whitespace();

            let (digest, size, filename) = match (parts.next(), parts.next(), parts.next()) {
                (Some(digest), Some(size), Some(filename)) => (digest, size, filename),
                _ => {
                    return Err(BuildQueueError::MalformedDescriptor(format!(
                        "{} entry is not <digest> <size> <filename>: {}",
                        field, line
                    )))
                }
            };

            if parts.next().is_some() {
                return Err(BuildQueueError::MalformedDescriptor(format!(
                    "{} entry has trailing content: {}",
                    field, line
                )));
            }

            if filename.contains('/') || filename == "." || filename == ".." {
                return Err(BuildQueueError::MalformedDescriptor(format!(
                    "{} entry does not name a plain file: {}",
                    field, filename
                )));
            }

            let size = u64::from_str(size).map_err(|e| {
                BuildQueueError::MalformedDescriptor(format!("bad size in {}: {}", field, e))
            })?;

            Ok(DescriptorFileEntry {
                filename: filename.to_string(),
                digest: ContentDigest::from_hex_digest(checksum, digest)?,
                size,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut seen = HashSet::new();
    for entry in &entries {
        if !seen.insert(entry.filename.as_str()) {
            return Err(BuildQueueError::MalformedDescriptor(format!(
                "{} lists {} more than once",
                field, entry.filename
            )));
        }
    }

    Ok(Some(entries))
}
