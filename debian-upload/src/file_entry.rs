// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Files referenced by `.changes` files.

A `.changes` file describes each file it ships in up to 3 fields. `Files` lines carry the MD5,
size, section, priority, and name. `Checksums-Sha1` and `Checksums-Sha256` lines carry a
digest, size, and name. [FileEntryRegistry] merges these partial views into a single
[FileEntry] per file name.
*/

use {
    crate::io::{ChecksumType, ContentDigest},
    log::warn,
    once_cell::sync::Lazy,
    regex::Regex,
    std::{collections::HashMap, str::FromStr},
    strum::{Display, EnumString},
    thiserror::Error,
};

static FILE_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\S+)\s+(\S+)\s+(\S+)(?:\s+(\S+)\s+(\S+))?\s*$")
        .expect("file line regex should compile")
});

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FileEntryError {
    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    #[error("invalid section: {0:?}")]
    InvalidSection(String),

    #[error("invalid priority: {0:?}")]
    InvalidPriority(String),

    #[error("invalid size: {0:?}")]
    InvalidSize(String),

    #[error("invalid {0} digest: {1:?}")]
    InvalidDigest(ChecksumType, String),

    #[error("cannot determine checksum flavor of digest: {0:?}")]
    UnknownDigestFlavor(String),

    #[error("file entry has no name")]
    MissingName,

    #[error("unrecognized file line: {0:?}")]
    UnrecognizedLine(String),
}

pub type Result<T> = std::result::Result<T, FileEntryError>;

/// Archive priority of a file.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, Hash, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    Required,
    Important,
    Standard,
    Optional,
    Extra,
}

fn is_printable(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| (0x20..=0x7e).contains(&b))
}

/// A file referenced by a `.changes` file.
///
/// All fields are optional so partially described files can be represented. Setters
/// validate their input and leave the existing value alone on error.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileEntry {
    name: Option<String>,
    size: Option<u64>,
    md5: Option<ContentDigest>,
    sha1: Option<ContentDigest>,
    sha256: Option<ContentDigest>,
    section: Option<String>,
    priority: Option<Priority>,
}

impl FileEntry {
    /// Construct an entry having only a name.
    pub fn new(name: &str) -> Result<Self> {
        let mut entry = Self::default();
        entry.set_name(name)?;

        Ok(entry)
    }

    /// Parse a line from a `Files`, `Checksums-Sha1`, or `Checksums-Sha256` field.
    ///
    /// Lines have the form `<digest> <size> <section> <priority> <name>` or
    /// `<digest> <size> <name>`. `checksum` names the flavor of the digest. If `None`,
    /// the flavor is derived from the length of the digest.
    pub fn parse_line(line: &str, checksum: Option<ChecksumType>) -> Result<Self> {
        let caps = FILE_LINE_RE
            .captures(line)
            .ok_or_else(|| FileEntryError::UnrecognizedLine(line.to_string()))?;

        let digest = &caps[1];
        let size = &caps[2];

        let (name, section_priority) = match (caps.get(4), caps.get(5)) {
            (Some(priority), Some(name)) => (name.as_str(), Some((&caps[3], priority.as_str()))),
            _ => (&caps[3], None),
        };

        let checksum = match checksum {
            Some(checksum) => checksum,
            None => ChecksumType::from_hex_len(digest.len())
                .ok_or_else(|| FileEntryError::UnknownDigestFlavor(digest.to_string()))?,
        };

        let mut entry = Self::default();
        entry.set_digest(checksum, Some(digest))?;
        entry.set_size_str(size)?;
        if let Some((section, priority)) = section_priority {
            entry.set_section(section)?;
            entry.set_priority_str(priority)?;
        }
        entry.set_name(name)?;

        Ok(entry)
    }

    /// The file name, relative to the directory holding the `.changes` file.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: &str) -> Result<()> {
        if name == "."
            || name == ".."
            || name.contains('/')
            || name.contains(' ')
            || !is_printable(name)
        {
            return Err(FileEntryError::InvalidName(name.to_string()));
        }

        self.name = Some(name.to_string());
        Ok(())
    }

    /// Size of the file in bytes.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = Some(size);
    }

    /// Set the size from its textual representation.
    pub fn set_size_str(&mut self, size: &str) -> Result<()> {
        let value =
            u64::from_str(size).map_err(|_| FileEntryError::InvalidSize(size.to_string()))?;
        self.size = Some(value);

        Ok(())
    }

    pub fn section(&self) -> Option<&str> {
        self.section.as_deref()
    }

    pub fn set_section(&mut self, section: &str) -> Result<()> {
        if !is_printable(section) {
            return Err(FileEntryError::InvalidSection(section.to_string()));
        }

        self.section = Some(section.to_string());
        Ok(())
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = Some(priority);
    }

    /// Set the priority from its textual representation.
    pub fn set_priority_str(&mut self, priority: &str) -> Result<()> {
        let value = Priority::from_str(priority)
            .map_err(|_| FileEntryError::InvalidPriority(priority.to_string()))?;
        self.priority = Some(value);

        Ok(())
    }

    /// Obtain the recorded digest of a given flavor.
    pub fn digest(&self, checksum: ChecksumType) -> Option<&ContentDigest> {
        match checksum {
            ChecksumType::Md5 => self.md5.as_ref(),
            ChecksumType::Sha1 => self.sha1.as_ref(),
            ChecksumType::Sha256 => self.sha256.as_ref(),
        }
    }

    /// Set or clear the digest of a given flavor from a hex string.
    pub fn set_digest(&mut self, checksum: ChecksumType, hex_digest: Option<&str>) -> Result<()> {
        let value = match hex_digest {
            Some(hex_digest) => Some(
                ContentDigest::from_hex_digest(checksum, hex_digest)
                    .map_err(|_| FileEntryError::InvalidDigest(checksum, hex_digest.to_string()))?,
            ),
            None => None,
        };

        match checksum {
            ChecksumType::Md5 => self.md5 = value,
            ChecksumType::Sha1 => self.sha1 = value,
            ChecksumType::Sha256 => self.sha256 = value,
        }

        Ok(())
    }

    pub fn set_md5(&mut self, hex_digest: Option<&str>) -> Result<()> {
        self.set_digest(ChecksumType::Md5, hex_digest)
    }

    pub fn set_sha1(&mut self, hex_digest: Option<&str>) -> Result<()> {
        self.set_digest(ChecksumType::Sha1, hex_digest)
    }

    pub fn set_sha256(&mut self, hex_digest: Option<&str>) -> Result<()> {
        self.set_digest(ChecksumType::Sha256, hex_digest)
    }

    /// Fill fields that are unset in this instance from another entry.
    ///
    /// Fields already set are kept. Returns the names of fields where both entries had
    /// differing values.
    pub fn merge_from(&mut self, other: FileEntry) -> Vec<&'static str> {
        let mut conflicts = vec![];

        fn fill<T: PartialEq>(
            dest: &mut Option<T>,
            source: Option<T>,
            field: &'static str,
            conflicts: &mut Vec<&'static str>,
        ) {
            if let Some(source) = source {
                if dest.is_none() {
                    *dest = Some(source);
                } else if dest.as_ref() != Some(&source) {
                    conflicts.push(field);
                }
            }
        }

        fill(&mut self.name, other.name, "name", &mut conflicts);
        fill(&mut self.size, other.size, "size", &mut conflicts);
        fill(&mut self.md5, other.md5, "md5", &mut conflicts);
        fill(&mut self.sha1, other.sha1, "sha1", &mut conflicts);
        fill(&mut self.sha256, other.sha256, "sha256", &mut conflicts);
        fill(&mut self.section, other.section, "section", &mut conflicts);
        fill(&mut self.priority, other.priority, "priority", &mut conflicts);

        conflicts
    }

    /// Render the line for this entry in the field holding a given checksum flavor.
    ///
    /// Returns `None` if the entry lacks the digest, size, or name needed for the line.
    /// `Files` lines use the 5 field form when section and priority are known.
    pub fn field_line(&self, checksum: ChecksumType) -> Option<String> {
        let digest = self.digest(checksum)?;
        let size = self.size?;
        let name = self.name.as_deref()?;

        Some(match (checksum, &self.section, &self.priority) {
            (ChecksumType::Md5, Some(section), Some(priority)) => format!(
                "{} {} {} {} {}",
                digest.digest_hex(),
                size,
                section,
                priority,
                name
            ),
            _ => format!("{} {} {}", digest.digest_hex(), size, name),
        })
    }
}

/// Whether merging an entry created a new record or updated an existing one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MergeOutcome {
    Inserted,
    Merged,
}

/// An insertion ordered collection of [FileEntry] keyed by file name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileEntryRegistry {
    entries: Vec<FileEntry>,
    index: HashMap<String, usize>,
}

impl FileEntryRegistry {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter()
    }

    /// Obtain the entry for a file name.
    pub fn get(&self, name: &str) -> Option<&FileEntry> {
        self.index.get(name).map(|i| &self.entries[*i])
    }

    /// Add an entry, merging it into an existing entry having the same name.
    ///
    /// When merging, only fields unset in the existing entry are filled. Entries without
    /// a name are refused.
    pub fn merge_entry_by_name(&mut self, entry: FileEntry) -> Result<MergeOutcome> {
        let name = entry.name().ok_or(FileEntryError::MissingName)?.to_string();

        if let Some(i) = self.index.get(&name) {
            let conflicts = self.entries[*i].merge_from(entry);
            if !conflicts.is_empty() {
                warn!(
                    "conflicting values for {} in {}; keeping first seen",
                    conflicts.join(", "),
                    name
                );
            }

            Ok(MergeOutcome::Merged)
        } else {
            self.index.insert(name, self.entries.len());
            self.entries.push(entry);

            Ok(MergeOutcome::Inserted)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SHA1: &str = "c6f698f19f2a2d3b6bfd40b3e8f7c7c6b5f9e2a1";
    const SHA256: &str = "5f4a6f6e0b1d2c3e4f5a6b7c8d9e0f1a2b3c4d5e6f7a8b9c0d1e2f3a4b5c6d7e";
    const MD5: &str = "53adc6a8a1d7ef8e3cd9e0b3c6a5f1d2";

    #[test]
    fn parse_files_line() -> Result<()> {
        let entry = FileEntry::parse_line(
            &format!(" {} 1138 net optional pkg_1.0_amd64.deb", MD5),
            Some(ChecksumType::Md5),
        )?;

        assert_eq!(entry.name(), Some("pkg_1.0_amd64.deb"));
        assert_eq!(entry.size(), Some(1138));
        assert_eq!(entry.section(), Some("net"));
        assert_eq!(entry.priority(), Some(Priority::Optional));
        assert_eq!(
            entry.digest(ChecksumType::Md5).map(|d| d.digest_hex()),
            Some(MD5.to_string())
        );
        assert!(entry.digest(ChecksumType::Sha1).is_none());

        Ok(())
    }

    #[test]
    fn parse_checksum_line_whitespace() -> Result<()> {
        let entry = FileEntry::parse_line(
            &format!("  {}  571925   example_1.2.orig.tar.gz  ", SHA1),
            Some(ChecksumType::Sha1),
        )?;

        assert_eq!(entry.name(), Some("example_1.2.orig.tar.gz"));
        assert_eq!(entry.size(), Some(571925));
        assert!(entry.section().is_none());
        assert!(entry.digest(ChecksumType::Sha1).is_some());

        Ok(())
    }

    #[test]
    fn parse_infers_flavor_from_length() -> Result<()> {
        let entry = FileEntry::parse_line(&format!("{} 10 a.dsc", SHA256), None)?;
        assert!(entry.digest(ChecksumType::Sha256).is_some());

        let entry = FileEntry::parse_line(&format!("{} 10 a.dsc", SHA1), None)?;
        assert!(entry.digest(ChecksumType::Sha1).is_some());

        assert_eq!(
            FileEntry::parse_line("abcd 10 a.dsc", None),
            Err(FileEntryError::UnknownDigestFlavor("abcd".to_string()))
        );

        Ok(())
    }

    #[test]
    fn parse_line_errors() {
        assert!(matches!(
            FileEntry::parse_line("abc 10", Some(ChecksumType::Md5)),
            Err(FileEntryError::UnrecognizedLine(_))
        ));
        assert!(matches!(
            FileEntry::parse_line(&format!("{} 10 net optional", MD5), Some(ChecksumType::Md5)),
            Err(FileEntryError::UnrecognizedLine(_))
        ));
        assert!(matches!(
            FileEntry::parse_line(&format!("{} -1 a.deb", MD5), Some(ChecksumType::Md5)),
            Err(FileEntryError::InvalidSize(_))
        ));
        assert!(matches!(
            FileEntry::parse_line(&format!("{} 1 a.deb", SHA1), Some(ChecksumType::Md5)),
            Err(FileEntryError::InvalidDigest(ChecksumType::Md5, _))
        ));
        assert!(matches!(
            FileEntry::parse_line(&format!("{} 1 net urgent a.deb", MD5), None),
            Err(FileEntryError::InvalidPriority(_))
        ));
    }

    #[test]
    fn setters_validate() -> Result<()> {
        let mut entry = FileEntry::new("a.deb")?;

        for bad in ["", ".", "..", "dir/a.deb", "tab\there", "a b.deb", "caf\u{e9}"] {
            assert!(entry.set_name(bad).is_err(), "{:?}", bad);
        }
        assert_eq!(entry.name(), Some("a.deb"));

        entry.set_name("valid:'`()$#%^!@.,;<>|\\-+*")?;

        entry.set_md5(Some(MD5))?;
        assert!(entry.set_md5(Some("abc")).is_err());
        assert!(entry.set_md5(Some(&format!("{}0", MD5))).is_err());
        assert_eq!(
            entry.digest(ChecksumType::Md5).map(|d| d.digest_hex()),
            Some(MD5.to_string())
        );
        entry.set_md5(None)?;
        assert!(entry.digest(ChecksumType::Md5).is_none());

        assert!(entry.set_section("").is_err());
        assert!(entry.set_section("bad\u{7}").is_err());
        entry.set_section("contrib/net")?;

        assert!(entry.set_priority_str("Optional").is_err());
        entry.set_priority_str("extra")?;
        assert_eq!(entry.priority(), Some(Priority::Extra));

        assert!(entry.set_size_str("x").is_err());
        entry.set_size_str("0")?;
        assert_eq!(entry.size(), Some(0));

        Ok(())
    }

    #[test]
    fn field_lines() -> Result<()> {
        let mut entry = FileEntry::new("pkg.deb")?;
        assert_eq!(entry.field_line(ChecksumType::Md5), None);

        entry.set_size(42);
        entry.set_md5(Some(MD5))?;
        entry.set_sha1(Some(SHA1))?;
        assert_eq!(
            entry.field_line(ChecksumType::Md5),
            Some(format!("{} 42 pkg.deb", MD5))
        );

        entry.set_section("utils")?;
        entry.set_priority(Priority::Standard);
        assert_eq!(
            entry.field_line(ChecksumType::Md5),
            Some(format!("{} 42 utils standard pkg.deb", MD5))
        );
        assert_eq!(
            entry.field_line(ChecksumType::Sha1),
            Some(format!("{} 42 pkg.deb", SHA1))
        );
        assert_eq!(entry.field_line(ChecksumType::Sha256), None);

        Ok(())
    }

    #[test]
    fn registry_merge_by_name() -> Result<()> {
        let mut registry = FileEntryRegistry::default();

        assert_eq!(
            registry.merge_entry_by_name(FileEntry::default()),
            Err(FileEntryError::MissingName)
        );

        assert_eq!(
            registry.merge_entry_by_name(FileEntry::parse_line(
                &format!("{} 1138 pkg_1.0.dsc", SHA1),
                Some(ChecksumType::Sha1)
            )?)?,
            MergeOutcome::Inserted
        );
        assert_eq!(
            registry.merge_entry_by_name(FileEntry::parse_line(
                &format!("{} 1138 other.deb", SHA1),
                Some(ChecksumType::Sha1)
            )?)?,
            MergeOutcome::Inserted
        );
        assert_eq!(
            registry.merge_entry_by_name(FileEntry::parse_line(
                &format!("{} 1138 pkg_1.0.dsc", SHA256),
                Some(ChecksumType::Sha256)
            )?)?,
            MergeOutcome::Merged
        );
        assert_eq!(
            registry.merge_entry_by_name(FileEntry::parse_line(
                &format!("{} 1139 net optional pkg_1.0.dsc", MD5),
                Some(ChecksumType::Md5)
            )?)?,
            MergeOutcome::Merged
        );

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.iter().filter_map(|e| e.name()).collect::<Vec<_>>(),
            vec!["pkg_1.0.dsc", "other.deb"]
        );

        let entry = registry.get("pkg_1.0.dsc").expect("entry should exist");
        assert!(entry.digest(ChecksumType::Md5).is_some());
        assert!(entry.digest(ChecksumType::Sha1).is_some());
        assert!(entry.digest(ChecksumType::Sha256).is_some());
        assert_eq!(entry.section(), Some("net"));
        assert_eq!(entry.priority(), Some(Priority::Optional));
        // The first recorded size wins.
        assert_eq!(entry.size(), Some(1138));

        Ok(())
    }
}
