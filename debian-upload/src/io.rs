// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Content digests and hashing. */

use {
    crate::error::{DebianError, Result},
    digest::Digest,
    std::{fmt::Formatter, io::Read, path::Path},
};

/// A checksum flavor recognized in `.changes` files.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChecksumType {
    /// MD5.
    Md5,

    /// SHA-1.
    Sha1,

    /// SHA-256.
    Sha256,
}

impl ChecksumType {
    /// All variants, in the order their fields appear in a `.changes` file.
    pub fn all() -> impl Iterator<Item = ChecksumType> {
        [Self::Md5, Self::Sha1, Self::Sha256].into_iter()
    }

    /// Name of the control field in `.changes` files holding this variant type.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "Files",
            Self::Sha1 => "Checksums-Sha1",
            Self::Sha256 => "Checksums-Sha256",
        }
    }

    /// Length in bytes of digests of this flavor.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Resolve the flavor of a hex digest from its length.
    pub fn from_hex_len(len: usize) -> Option<Self> {
        Self::all().find(|c| c.digest_len() * 2 == len)
    }

    /// Resolve the flavor whose field has the given name, case insensitively.
    pub fn from_field_name(name: &str) -> Option<Self> {
        Self::all().find(|c| c.field_name().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        })
    }
}

/// Represents a content digest.
#[derive(Clone, Eq, PartialEq, PartialOrd)]
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
    ///
    /// The decoded digest must have the length of the checksum flavor.
    pub fn from_hex_digest(checksum: ChecksumType, digest: &str) -> Result<Self> {
        let digest = hex::decode(digest)?;

        if digest.len() != checksum.digest_len() {
            return Err(DebianError::ContentDigestBadLength(
                checksum.to_string(),
                digest.len(),
                checksum.digest_len(),
            ));
        }

        Ok(match checksum {
            ChecksumType::Md5 => Self::Md5(digest),
            ChecksumType::Sha1 => Self::Sha1(digest),
            ChecksumType::Sha256 => Self::Sha256(digest),
        })
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

/// Computes content digests and file sizes.
///
/// Validation of `.changes` files goes through this trait so alternate implementations
/// can be plugged in.
pub trait ContentHasher {
    /// Hex encoded MD5 of some content.
    fn md5_hex(&self, data: &[u8]) -> String;

    /// Hex encoded SHA-1 of some content.
    fn sha1_hex(&self, data: &[u8]) -> String;

    /// Hex encoded SHA-256 of some content.
    fn sha256_hex(&self, data: &[u8]) -> String;

    /// Size in bytes of the file at a path.
    fn size(&self, path: &Path) -> std::io::Result<u64>;

    /// Hex encoded digest of a given flavor.
    fn digest_hex(&self, checksum: ChecksumType, data: &[u8]) -> String {
        match checksum {
            ChecksumType::Md5 => self.md5_hex(data),
            ChecksumType::Sha1 => self.sha1_hex(data),
            ChecksumType::Sha256 => self.sha256_hex(data),
        }
    }

    /// Hex encoded digests of the content of a file, one per requested flavor.
    ///
    /// The default implementation reads the whole file into memory.
    fn file_digests_hex(
        &self,
        path: &Path,
        checksums: &[ChecksumType],
    ) -> std::io::Result<Vec<String>> {
        let data = std::fs::read(path)?;

        Ok(checksums
            .iter()
            .map(|checksum| self.digest_hex(*checksum, &data))
            .collect())
    }
}

/// Holds multiple flavors of content digests.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MultiContentDigest {
    pub md5: ContentDigest,
    pub sha1: ContentDigest,
    pub sha256: ContentDigest,
}

impl MultiContentDigest {
    /// Obtain the [ContentDigest] for a given [ChecksumType].
    pub fn digest_from_checksum(&self, checksum: ChecksumType) -> &ContentDigest {
        match checksum {
            ChecksumType::Md5 => &self.md5,
            ChecksumType::Sha1 => &self.sha1,
            ChecksumType::Sha256 => &self.sha256,
        }
    }
}

/// A content digester that simultaneously computes every digest flavor.
#[derive(Clone, Default)]
pub struct MultiDigester {
    md5: md5::Md5,
    sha1: sha1::Sha1,
    sha256: sha2::Sha256,
}

impl MultiDigester {
    /// Write content into the digesters.
    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
        self.sha256.update(data);
    }

    /// Feed everything a reader produces into the digesters.
    pub fn update_from_reader(&mut self, mut reader: impl Read) -> std::io::Result<u64> {
        let mut buffer = [0u8; 65536];
        let mut total = 0;

        loop {
            let count = reader.read(&mut buffer)?;
            if count == 0 {
                return Ok(total);
            }

            self.update(&buffer[..count]);
            total += count as u64;
        }
    }

    /// Finish digesting content.
    pub fn finish(self) -> MultiContentDigest {
        MultiContentDigest {
            md5: ContentDigest::Md5(self.md5.finalize().to_vec()),
            sha1: ContentDigest::Sha1(self.sha1.finalize().to_vec()),
            sha256: ContentDigest::Sha256(self.sha256.finalize().to_vec()),
        }
    }
}

/// A [ContentHasher] backed by the RustCrypto hash implementations and the filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultContentHasher;

impl ContentHasher for DefaultContentHasher {
    fn md5_hex(&self, data: &[u8]) -> String {
        hex::encode(md5::Md5::digest(data))
    }

    fn sha1_hex(&self, data: &[u8]) -> String {
        hex::encode(sha1::Sha1::digest(data))
    }

    fn sha256_hex(&self, data: &[u8]) -> String {
        hex::encode(sha2::Sha256::digest(data))
    }

    fn size(&self, path: &Path) -> std::io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    /// Streams the file through a [MultiDigester] instead of buffering it.
    fn file_digests_hex(
        &self,
        path: &Path,
        checksums: &[ChecksumType],
    ) -> std::io::Result<Vec<String>> {
        let mut digester = MultiDigester::default();
        digester.update_from_reader(std::fs::File::open(path)?)?;
        let digests = digester.finish();

        Ok(checksums
            .iter()
            .map(|checksum| digests.digest_from_checksum(*checksum).digest_hex())
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_hasher() {
        let hasher = DefaultContentHasher::default();

        assert_eq!(hasher.md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            hasher.sha1_hex(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            hasher.digest_hex(ChecksumType::Sha256, b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hasher_size() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = td.path().join("file");
        std::fs::write(&path, b"hello")?;

        assert_eq!(DefaultContentHasher::default().size(&path)?, 5);

        Ok(())
    }

    #[test]
    fn file_digests_streamed() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = td.path().join("large");
        let data = (0..200_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        std::fs::write(&path, &data)?;

        let hasher = DefaultContentHasher::default();
        let checksums = [ChecksumType::Sha256, ChecksumType::Md5, ChecksumType::Sha1];

        assert_eq!(
            hasher.file_digests_hex(&path, &checksums)?,
            vec![
                hasher.sha256_hex(&data),
                hasher.md5_hex(&data),
                hasher.sha1_hex(&data),
            ]
        );
        assert!(hasher.file_digests_hex(&td.path().join("missing"), &checksums).is_err());

        let mut digester = MultiDigester::default();
        assert_eq!(digester.update_from_reader(data.as_slice())?, 200_000);
        assert_eq!(
            digester.finish().digest_from_checksum(ChecksumType::Md5).digest_hex(),
            hasher.md5_hex(&data)
        );

        Ok(())
    }

    #[test]
    fn digest_from_hex() -> Result<()> {
        let digest = ContentDigest::md5_hex("D41D8CD98F00B204E9800998ECF8427E")?;
        assert_eq!(digest.checksum_type(), ChecksumType::Md5);
        assert_eq!(digest.digest_hex(), "d41d8cd98f00b204e9800998ecf8427e");

        assert!(matches!(
            ContentDigest::sha1_hex("d41d8cd98f00b204e9800998ecf8427e"),
            Err(DebianError::ContentDigestBadLength(_, 16, 20))
        ));
        assert!(matches!(
            ContentDigest::sha256_hex("zz"),
            Err(DebianError::Hex(_))
        ));

        Ok(())
    }

    #[test]
    fn checksum_lookup() {
        assert_eq!(ChecksumType::from_hex_len(32), Some(ChecksumType::Md5));
        assert_eq!(ChecksumType::from_hex_len(40), Some(ChecksumType::Sha1));
        assert_eq!(ChecksumType::from_hex_len(64), Some(ChecksumType::Sha256));
        assert_eq!(ChecksumType::from_hex_len(33), None);
        assert_eq!(
            ChecksumType::from_field_name("checksums-sha256"),
            Some(ChecksumType::Sha256)
        );
        assert_eq!(ChecksumType::from_field_name("files"), Some(ChecksumType::Md5));
    }
}
