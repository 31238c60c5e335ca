//! Digest verification for content-addressed blobs.

use std::io::Read;

use ocmr_core::error::{OcmError, Result};
use sha2::{Digest, Sha256};

/// Split a digest string into `(algorithm, encoded)` parts.
///
/// Accepts `sha256:<hex>`; a bare hex string is treated as sha256 the way
/// the rest of the ecosystem does.
pub fn parse_digest(digest: &str) -> (&str, &str) {
    match digest.split_once(':') {
        Some((algorithm, encoded)) => (algorithm, encoded),
        None => ("sha256", digest),
    }
}

/// A reader that recomputes the sha256 digest and byte count of everything
/// read through it.
pub struct DigestReader<R> {
    inner: R,
    hasher: Sha256,
    count: u64,
}

impl<R: Read> DigestReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            count: 0,
        }
    }

    /// Bytes read so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Finish, returning the `sha256:<hex>` digest and byte count.
    pub fn finalize(self) -> (String, u64) {
        let digest = format!("sha256:{}", hex::encode(self.hasher.finalize()));
        (digest, self.count)
    }

    /// Verify the stream against a declared descriptor digest and size.
    ///
    /// Consumes the reader; a mismatch is data corruption and fails the
    /// surrounding operation.
    pub fn verify(self, expected_digest: &str, expected_size: u64) -> Result<()> {
        let (actual, count) = self.finalize();
        if count != expected_size {
            return Err(OcmError::DigestMismatch {
                expected: format!("{} ({} bytes)", expected_digest, expected_size),
                actual: format!("{} ({} bytes)", actual, count),
            });
        }
        if actual != expected_digest {
            return Err(OcmError::DigestMismatch {
                expected: expected_digest.to_string(),
                actual,
            });
        }
        Ok(())
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

/// Compute the `sha256:<hex>` digest of a byte slice.
pub fn digest_bytes(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_digest() {
        assert_eq!(parse_digest("sha256:abc123"), ("sha256", "abc123"));
        assert_eq!(parse_digest("abc123"), ("sha256", "abc123"));
        assert_eq!(parse_digest("sha512:def"), ("sha512", "def"));
    }

    #[test]
    fn test_digest_reader_matches_digest_bytes() {
        let data = b"hello world";
        let mut reader = DigestReader::new(&data[..]);
        let mut sink = Vec::new();
        std::io::copy(&mut reader, &mut sink).unwrap();
        let (digest, count) = reader.finalize();
        assert_eq!(count, data.len() as u64);
        assert_eq!(digest, digest_bytes(data));
        assert_eq!(sink, data);
    }

    #[test]
    fn test_verify_success() {
        let data = b"content";
        let expected = digest_bytes(data);
        let mut reader = DigestReader::new(&data[..]);
        std::io::copy(&mut reader, &mut std::io::sink()).unwrap();
        assert!(reader.verify(&expected, data.len() as u64).is_ok());
    }

    #[test]
    fn test_verify_digest_mismatch() {
        let data = b"content";
        let mut reader = DigestReader::new(&data[..]);
        std::io::copy(&mut reader, &mut std::io::sink()).unwrap();
        let result = reader.verify("sha256:0000", data.len() as u64);
        assert!(matches!(result, Err(OcmError::DigestMismatch { .. })));
    }

    #[test]
    fn test_verify_size_mismatch() {
        let data = b"content";
        let expected = digest_bytes(data);
        let mut reader = DigestReader::new(&data[..]);
        std::io::copy(&mut reader, &mut std::io::sink()).unwrap();
        let result = reader.verify(&expected, 1);
        assert!(matches!(result, Err(OcmError::DigestMismatch { .. })));
    }
}
