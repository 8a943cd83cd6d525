use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::error::{PipelineError, Result};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Algorithms a journal may declare for its deposit.
    pub fn from_declared(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "md5" => Ok(Self::Md5),
            _ => Err(PipelineError::UnknownAlgorithm(name.to_string())),
        }
    }

    /// Algorithms recognised in BagIt manifest file names.
    pub fn from_manifest(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "md5" => Some(Self::Md5),
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

/// Hash `path` with a declared algorithm name. Unknown names fail before the
/// file is opened.
pub fn hash_file(algorithm: &str, path: &Path) -> Result<String> {
    let algorithm = ChecksumAlgorithm::from_declared(algorithm)?;
    hash_file_with(algorithm, path)
}

/// Upper-case hex digest of the file, read in 64 KiB chunks.
pub fn hash_file_with(algorithm: ChecksumAlgorithm, path: &Path) -> Result<String> {
    let file = File::open(path)?;
    match algorithm {
        ChecksumAlgorithm::Md5 => digest_reader::<Md5, _>(file),
        ChecksumAlgorithm::Sha1 => digest_reader::<Sha1, _>(file),
        ChecksumAlgorithm::Sha256 => digest_reader::<Sha256, _>(file),
        ChecksumAlgorithm::Sha512 => digest_reader::<Sha512, _>(file),
    }
}

fn digest_reader<D: Digest, R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = D::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect())
}

pub fn checksums_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_names_are_case_insensitive() {
        assert_eq!(
            ChecksumAlgorithm::from_declared("SHA-1").unwrap(),
            ChecksumAlgorithm::Sha1
        );
        assert_eq!(
            ChecksumAlgorithm::from_declared("Md5").unwrap(),
            ChecksumAlgorithm::Md5
        );
        assert!(ChecksumAlgorithm::from_declared("sha256").is_err());
    }

    #[test]
    fn digest_of_empty_input() {
        let digest = digest_reader::<Sha1, _>(&b""[..]).unwrap();
        assert_eq!(digest, "DA39A3EE5E6B4B0D3255BFEF95601890AFD80709");
    }

    #[test]
    fn comparison_ignores_case() {
        assert!(checksums_match("abc123", "ABC123"));
        assert!(!checksums_match("abc123", "ABC124"));
    }
}
