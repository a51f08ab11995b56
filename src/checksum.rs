//! Content Checksums
//!
//! Checksums are computed client side and attached to uploads so the
//! service can verify integrity on receipt. Downloads can recompute the
//! same digest over the received bytes.

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha1,
    Crc32,
}

impl ChecksumAlgorithm {
    /// Compute the checksum of a complete payload
    pub fn compute(self, data: &[u8]) -> Checksum {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Incremental hasher for streamed data
    pub fn hasher(self) -> ChecksumHasher {
        match self {
            ChecksumAlgorithm::Sha256 => ChecksumHasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha1 => ChecksumHasher::Sha1(Sha1::new()),
            ChecksumAlgorithm::Crc32 => ChecksumHasher::Crc32(crc32fast::Hasher::new()),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "SHA256",
            ChecksumAlgorithm::Sha1 => "SHA1",
            ChecksumAlgorithm::Crc32 => "CRC32",
        }
    }
}

/// A computed digest.
///
/// `part_count` is set for composite checksums of multipart uploads, where
/// the digest covers the part digests rather than the object bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub digest: Vec<u8>,
    pub part_count: Option<u32>,
}

impl Checksum {
    /// Composite checksum over the digests of each part, in order
    pub fn composite(algorithm: ChecksumAlgorithm, parts: &[Checksum]) -> Checksum {
        let mut hasher = algorithm.hasher();
        for part in parts {
            hasher.update(&part.digest);
        }
        let mut checksum = hasher.finalize();
        checksum.part_count = Some(parts.len() as u32);
        checksum
    }

    pub fn is_composite(&self) -> bool {
        self.part_count.is_some()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.digest)
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm.name(), self.to_hex())?;
        if let Some(parts) = self.part_count {
            write!(f, "-{}", parts)?;
        }
        Ok(())
    }
}

/// Streaming checksum state
pub enum ChecksumHasher {
    Sha256(Sha256),
    Sha1(Sha1),
    Crc32(crc32fast::Hasher),
}

impl ChecksumHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            ChecksumHasher::Sha256(h) => h.update(data),
            ChecksumHasher::Sha1(h) => h.update(data),
            ChecksumHasher::Crc32(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Checksum {
        let (algorithm, digest) = match self {
            ChecksumHasher::Sha256(h) => (ChecksumAlgorithm::Sha256, h.finalize().to_vec()),
            ChecksumHasher::Sha1(h) => (ChecksumAlgorithm::Sha1, h.finalize().to_vec()),
            // big-endian, as the service encodes CRC32 checksums
            ChecksumHasher::Crc32(h) => (ChecksumAlgorithm::Crc32, h.finalize().to_be_bytes().to_vec()),
        };
        Checksum {
            algorithm,
            digest,
            part_count: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        let checksum = ChecksumAlgorithm::Sha256.compute(b"abc");
        assert_eq!(
            checksum.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_crc32_known_vector() {
        let checksum = ChecksumAlgorithm::Crc32.compute(b"123456789");
        assert_eq!(checksum.to_hex(), "cbf43926");
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        for algorithm in [
            ChecksumAlgorithm::Sha256,
            ChecksumAlgorithm::Sha1,
            ChecksumAlgorithm::Crc32,
        ] {
            let mut hasher = algorithm.hasher();
            hasher.update(b"hello ");
            hasher.update(b"world");
            assert_eq!(hasher.finalize(), algorithm.compute(b"hello world"));
        }
    }

    #[test]
    fn test_composite_records_part_count() {
        let parts = vec![
            ChecksumAlgorithm::Sha256.compute(b"part-1"),
            ChecksumAlgorithm::Sha256.compute(b"part-2"),
        ];
        let composite = Checksum::composite(ChecksumAlgorithm::Sha256, &parts);
        assert!(composite.is_composite());
        assert!(composite.to_string().ends_with("-2"));
        assert_ne!(composite, ChecksumAlgorithm::Sha256.compute(b"part-1part-2"));
    }
}
