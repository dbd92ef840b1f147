use std::io::{self, Read};

use sha2::{Digest, Sha256};

/// Reader adapter that feeds every byte it hands out into a sha256 state.
///
/// Whatever the consumer reads (and therefore writes into the archive) is
/// exactly what gets hashed.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }

    /// Consume the adapter, returning the inner reader, the hex digest and
    /// the number of bytes that passed through.
    pub fn finish(self) -> (R, String, u64) {
        let digest = hex::encode(self.hasher.finalize());
        (self.inner, digest, self.bytes)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
            self.bytes += n as u64;
        }
        Ok(n)
    }
}
