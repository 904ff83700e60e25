// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Control file primitives needed to read `.dsc` descriptors.

Control files are series of *paragraphs*, each an ordered set of `Name: value`
fields. Values may continue onto following lines that begin with whitespace.
See <https://www.debian.org/doc/debian-policy/ch-controlfields.html>.
*/

use {
    crate::error::{BuildQueueError, Result},
    std::io::BufRead,
};

const PGP_SIGNED_MESSAGE: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
const PGP_SIGNATURE: &str = "-----BEGIN PGP SIGNATURE-----";

/// A single `Name: value` field in a paragraph.
///
/// Continuation lines are kept in `value` separated by `\n`, with their
/// leading whitespace intact.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControlField {
    name: String,
    value: String,
}

impl ControlField {
    /// Construct an instance from a field name and value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// The name of this field, in its original case.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw value, including continuation lines.
    pub fn value_str(&self) -> &str {
        &self.value
    }

    /// Iterate over whitespace delimited words in the value.
    pub fn iter_words(&self) -> impl Iterator<Item = &str> {
        self.value.split_ascii_whitespace()
    }

    /// Iterate over non-empty lines of the value with leading whitespace trimmed.
    ///
    /// Multiline fields like `Files` begin with an empty first line, which is skipped.
    pub fn iter_lines(&self) -> impl Iterator<Item = &str> {
        self.value
            .lines()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
    }
}

/// A paragraph in a control file.
///
/// Field names are case insensitive on read. A repeated field replaces the earlier one.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ControlParagraph {
    fields: Vec<ControlField>,
}

impl ControlParagraph {
    /// Whether the paragraph has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Set a field, replacing any existing field of the same name.
    pub fn set_field(&mut self, field: ControlField) {
        self.fields
            .retain(|existing| !existing.name.eq_ignore_ascii_case(&field.name));
        self.fields.push(field);
    }

    /// Iterate over fields in insertion order.
    pub fn iter_fields(&self) -> impl Iterator<Item = &ControlField> {
        self.fields.iter()
    }

    /// Obtain the field with the given name.
    pub fn field(&self, name: &str) -> Option<&ControlField> {
        self.fields
            .iter()
            .find(|field| field.name.eq_ignore_ascii_case(name))
    }

    /// Obtain the raw string value of the named field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(|field| field.value_str())
    }

    /// Obtain the value of a field that must be present.
    pub fn required_field_str(&self, name: &'static str) -> Result<&str> {
        self.field_str(name).ok_or_else(|| {
            BuildQueueError::ControlParseError(format!("required field missing: {}", name))
        })
    }

    /// Iterate over comma delimited values of the named field.
    pub fn iter_field_comma_delimited(&self, name: &str) -> Option<impl Iterator<Item = &str>> {
        self.field_str(name).map(|value| {
            value
                .split(',')
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        })
    }

    /// Iterate over lines of the named field.
    pub fn iter_field_lines(&self, name: &str) -> Option<impl Iterator<Item = &str>> {
        self.field(name).map(|field| field.iter_lines())
    }
}

/// Line oriented control file parser.
///
/// Lines are fed in via [Self::write_line]. A completed paragraph is emitted when a
/// blank line terminates it or when [Self::finish] is called.
#[derive(Clone, Debug, Default)]
pub struct ControlFileParser {
    paragraph: ControlParagraph,
    field: Option<String>,
}

impl ControlFileParser {
    /// Feed a line to the parser.
    ///
    /// Returns a paragraph if this line terminated one.
    pub fn write_line(&mut self, line: &str) -> Result<Option<ControlParagraph>> {
        let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');

        if line.trim().is_empty() {
            self.flush_field()?;

            return Ok(if self.paragraph.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut self.paragraph))
            });
        }

        // Comment lines are permitted anywhere and are not part of the paragraph.
        if line.starts_with('#') {
            return Ok(None);
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            match self.field.as_mut() {
                Some(field) => {
                    field.push('\n');
                    field.push_str(line);
                }
                None => {
                    return Err(BuildQueueError::ControlParseError(format!(
                        "continuation line without a field: '{}'",
                        line
                    )));
                }
            }
        } else {
            self.flush_field()?;
            self.field = Some(line.to_string());
        }

        Ok(None)
    }

    /// Finish parsing, returning any paragraph still in progress.
    pub fn finish(mut self) -> Result<Option<ControlParagraph>> {
        self.flush_field()?;

        Ok(if self.paragraph.is_empty() {
            None
        } else {
            Some(self.paragraph)
        })
    }

    fn flush_field(&mut self) -> Result<()> {
        if let Some(raw) = self.field.take() {
            let (name, value) = raw.split_once(':').ok_or_else(|| {
                BuildQueueError::ControlParseError(format!(
                    "error parsing line '{}'; missing colon",
                    raw
                ))
            })?;

            let name = name.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(BuildQueueError::ControlParseError(format!(
                    "invalid field name in line '{}'",
                    raw
                )));
            }

            self.paragraph
                .set_field(ControlField::new(name, value.trim()));
        }

        Ok(())
    }
}

/// Iterator of [ControlParagraph] read from a [BufRead].
pub struct ControlParagraphReader<R: BufRead> {
    reader: R,
    parser: Option<ControlFileParser>,
}

impl<R: BufRead> ControlParagraphReader<R> {
    /// Create a new instance bound to a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: Some(ControlFileParser::default()),
        }
    }

    fn read_paragraph(&mut self) -> Result<Option<ControlParagraph>> {
        let mut parser = match self.parser.take() {
            Some(parser) => parser,
            None => return Ok(None),
        };

        loop {
            let mut line = String::new();

            if self.reader.read_line(&mut line)? == 0 {
                return parser.finish();
            }

            if let Some(paragraph) = parser.write_line(&line)? {
                self.parser.replace(parser);
                return Ok(Some(paragraph));
            }
        }
    }
}

impl<R: BufRead> Iterator for ControlParagraphReader<R> {
    type Item = Result<ControlParagraph>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_paragraph().transpose()
    }
}

/// Remove PGP cleartext signature armor from control file content.
///
/// Content that does not start with a signed message header is returned as-is.
/// Signatures are discarded without verification. Dash-escaped lines (`- `) are
/// unescaped as described in RFC 4880 section 7.1.
pub fn strip_pgp_armor(content: &str) -> Result<String> {
    let trimmed = content.trim_start();

    if !trimmed.starts_with(PGP_SIGNED_MESSAGE) {
        return Ok(content.to_string());
    }

    let mut lines = trimmed.lines().skip(1);

    // Armor headers (e.g. `Hash: SHA256`) run until the first blank line.
    for line in lines.by_ref() {
        if line.trim().is_empty() {
            break;
        }
    }

    let mut body = String::new();
    let mut terminated = false;

    for line in lines {
        if line.trim_end() == PGP_SIGNATURE {
            terminated = true;
            break;
        }

        body.push_str(line.strip_prefix("- ").unwrap_or(line));
        body.push('\n');
    }

    if terminated {
        Ok(body)
    } else {
        Err(BuildQueueError::ControlParseError(
            "PGP signed message lacks a signature block".to_string(),
        ))
    }
}
