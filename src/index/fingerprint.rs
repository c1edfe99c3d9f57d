//! File identity used to bind an index to the file it was built from.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Error, ErrorKind, ErrorSubkind, Result};

/// Bytes hashed at each end of the file.
pub const FINGERPRINT_SPAN: u64 = 1024 * 1024;

/// Size plus a SHA-256 over the head and tail of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileFingerprint {
    pub file_size: u64,
    pub digest: [u8; 32],
}

impl FileFingerprint {
    pub fn compute<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .map_err(|e| Error::open_failed(ErrorKind::Index, &path.display().to_string(), &e))?;
        Self::from_reader(&mut file)
            .map_err(|e| Error::new(ErrorKind::Index, ErrorSubkind::FileRead, format!("{:?}: {}", path, e)))
    }

    pub fn from_reader<R: Read + Seek>(reader: &mut R) -> std::io::Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        let span = file_size.min(FINGERPRINT_SPAN);

        let mut hasher = Sha256::new();
        hasher.update(file_size.to_le_bytes());

        let mut buf = vec![0u8; span as usize];
        reader.seek(SeekFrom::Start(0))?;
        reader.read_exact(&mut buf)?;
        hasher.update(&buf);

        reader.seek(SeekFrom::Start(file_size - span))?;
        reader.read_exact(&mut buf)?;
        hasher.update(&buf);

        Ok(Self {
            file_size,
            digest: hasher.finalize().into(),
        })
    }

    /// Lowercase hex of the digest, for logs.
    pub fn hex(&self) -> String {
        self.digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
