// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Defines primitives in control files.

See <https://www.debian.org/doc/debian-policy/ch-controlfields.html>
for the canonical source of truth for how control files work.

Only the subset of the control file syntax used by `.changes` files is implemented
here: a single paragraph, optionally wrapped in an OpenPGP cleartext signature, made of
`Name: value` lines where some fields have a value spanning the following lines that
start with whitespace.
*/

use {
    once_cell::sync::Lazy,
    regex::Regex,
    std::{
        borrow::Cow,
        fmt::{Display, Formatter},
        io::Write,
        iter::Peekable,
        str::Lines,
    },
};

const PGP_SIGNED_MESSAGE_BEGIN: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
const PGP_SIGNATURE_BEGIN: &str = "-----BEGIN PGP SIGNATURE-----";

static FIELD_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([\w-]+):\s*(.*)$").expect("field line regex should compile"));

/// A line that could not be interpreted, along with the reason why.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RejectedLine {
    pub reason: String,
    pub line: String,
}

impl RejectedLine {
    pub fn new(reason: impl ToString, line: impl ToString) -> Self {
        Self {
            reason: reason.to_string(),
            line: line.to_string(),
        }
    }
}

impl Display for RejectedLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.reason, self.line)
    }
}

/// Split a `Name: value` line into its name and value.
///
/// Trailing whitespace is removed from the value. Returns `None` if the line doesn't
/// define a field.
pub fn parse_field_line(line: &str) -> Option<(&str, &str)> {
    let caps = FIELD_LINE_RE.captures(line)?;

    match (caps.get(1), caps.get(2)) {
        (Some(name), Some(value)) => Some((name.as_str(), value.as_str().trim_end())),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ArmorState {
    /// Not within a cleartext signature.
    Unsigned,
    /// Within the armor headers following the signed message marker.
    Headers,
    /// Within the signed content.
    Signed,
    /// The signature was reached. Nothing else is content.
    Finished,
}

/// Reads the content lines of a control file.
///
/// OpenPGP cleartext signature framing is removed: the signed message marker and its
/// armor headers are skipped and reading stops at the signature. Blank lines are skipped.
///
/// Multiline values are consumed with [Self::take_text_block], which only consumes lines
/// belonging to the value, leaving the next field line to be returned by
/// [Self::next_line].
pub struct ControlLineReader<'a> {
    lines: Peekable<Lines<'a>>,
    state: ArmorState,
}

impl<'a> ControlLineReader<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().peekable(),
            state: ArmorState::Unsigned,
        }
    }

    /// Obtain the next content line.
    pub fn next_line(&mut self) -> Option<&'a str> {
        loop {
            if self.state == ArmorState::Finished {
                return None;
            }

            let line = self.lines.next()?;

            if line.contains(PGP_SIGNED_MESSAGE_BEGIN) {
                self.state = ArmorState::Headers;
                continue;
            }

            if line.contains(PGP_SIGNATURE_BEGIN) {
                self.state = ArmorState::Finished;
                return None;
            }

            match self.state {
                ArmorState::Headers => {
                    if line.trim().is_empty() {
                        self.state = ArmorState::Signed;
                    }
                }
                _ if line.trim().is_empty() => {}
                ArmorState::Signed => {
                    return Some(line.strip_prefix("- ").unwrap_or(line));
                }
                _ => {
                    return Some(line);
                }
            }
        }
    }

    /// Consume the continuation lines of a multiline value.
    ///
    /// Continuation lines start with a space or tab. A single leading whitespace
    /// character is removed from each returned line.
    pub fn take_text_block(&mut self) -> Vec<&'a str> {
        let mut block = vec![];

        if self.state == ArmorState::Finished {
            return block;
        }

        while let Some(line) = self
            .lines
            .next_if(|line| line.starts_with(' ') || line.starts_with('\t'))
        {
            block.push(&line[1..]);
        }

        block
    }
}

/// A field value in a control file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ControlFieldValue<'a> {
    /// A value on the same line as the field name.
    Simple(Cow<'a, str>),
    /// A value held in the lines following the field name.
    ///
    /// Lines are stored without their leading whitespace.
    Multiline(Vec<Cow<'a, str>>),
}

/// A field in a control file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControlField<'a> {
    name: Cow<'a, str>,
    value: ControlFieldValue<'a>,
}

impl<'a> ControlField<'a> {
    /// Construct an instance holding a single line value.
    pub fn new(name: impl Into<Cow<'a, str>>, value: impl Into<Cow<'a, str>>) -> Self {
        Self {
            name: name.into(),
            value: ControlFieldValue::Simple(value.into()),
        }
    }

    /// Construct an instance from an iterable of lines.
    ///
    /// Each line should not have leading whitespace.
    pub fn from_lines<L>(name: impl Into<Cow<'a, str>>, lines: impl IntoIterator<Item = L>) -> Self
    where
        L: Into<Cow<'a, str>>,
    {
        Self {
            name: name.into(),
            value: ControlFieldValue::Multiline(lines.into_iter().map(|l| l.into()).collect()),
        }
    }

    /// The name of this field.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    pub fn value(&self) -> &ControlFieldValue<'a> {
        &self.value
    }

    /// Write the contents of this field to a writer.
    ///
    /// Empty lines in multiline values are written as ` .`.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(self.name.as_bytes())?;
        writer.write_all(b":")?;

        match &self.value {
            ControlFieldValue::Simple(value) => {
                if !value.is_empty() {
                    writer.write_all(b" ")?;
                    writer.write_all(value.as_bytes())?;
                }
                writer.write_all(b"\n")
            }
            ControlFieldValue::Multiline(lines) => {
                writer.write_all(b"\n")?;
                for line in lines {
                    writer.write_all(b" ")?;
                    if line.is_empty() {
                        writer.write_all(b".")?;
                    } else {
                        writer.write_all(line.as_bytes())?;
                    }
                    writer.write_all(b"\n")?;
                }

                Ok(())
            }
        }
    }
}

impl<'a> Display for ControlField<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut buffer = vec![];
        self.write(&mut buffer).map_err(|_| std::fmt::Error)?;

        f.write_str(&String::from_utf8_lossy(&buffer))
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    #[test]
    fn field_lines() {
        assert_eq!(parse_field_line("Source: foo"), Some(("Source", "foo")));
        assert_eq!(parse_field_line("Changed-By:bar  "), Some(("Changed-By", "bar")));
        assert_eq!(parse_field_line("Description: "), Some(("Description", "")));
        assert_eq!(parse_field_line(" indented: value"), None);
        assert_eq!(parse_field_line("no colon here"), None);
        assert_eq!(parse_field_line("bad key: x"), None);
    }

    #[test]
    fn reader_blocks() {
        let text = indoc! {"
            Description:
             first
              second

            Source: foo
             orphan
        "};

        let mut reader = ControlLineReader::new(text);
        assert_eq!(reader.next_line(), Some("Description:"));
        assert_eq!(reader.take_text_block(), vec!["first", " second"]);
        assert_eq!(reader.next_line(), Some("Source: foo"));
        assert_eq!(reader.next_line(), Some(" orphan"));
        assert_eq!(reader.next_line(), None);
    }

    #[test]
    fn reader_strips_signature() {
        let text = indoc! {"
            -----BEGIN PGP SIGNED MESSAGE-----
            Hash: SHA256

            Source: foo
            - -----dash escaped
            Files:
             abc

            -----BEGIN PGP SIGNATURE-----

            iQEcBAEBAgAGBQJS
            -----END PGP SIGNATURE-----
        "};

        let mut reader = ControlLineReader::new(text);
        assert_eq!(reader.next_line(), Some("Source: foo"));
        assert_eq!(reader.next_line(), Some("-----dash escaped"));
        assert_eq!(reader.next_line(), Some("Files:"));
        assert_eq!(reader.take_text_block(), vec!["abc"]);
        assert_eq!(reader.next_line(), None);
        assert_eq!(reader.next_line(), None);
        assert!(reader.take_text_block().is_empty());
    }

    #[test]
    fn write_fields() {
        assert_eq!(ControlField::new("Source", "foo").to_string(), "Source: foo\n");
        assert_eq!(ControlField::new("Urgency", "").to_string(), "Urgency:\n");
        assert_eq!(
            ControlField::from_lines("Changes", ["pkg (1.0) unstable", "", "  * Fix."])
                .to_string(),
            "Changes:\n pkg (1.0) unstable\n .\n   * Fix.\n"
        );
    }
}
