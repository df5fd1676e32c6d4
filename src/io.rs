//! Positioned file I/O over a shared handle.
//!
//! A [`Descriptor`] wraps an `Arc<File>` and performs exact positioned reads
//! and writes, mapping short reads to `UnexpectedEof` and zero-length writes
//! to `WriteZero`. Descriptors are cheap to clone and are pooled by
//! [`crate::pool::DescriptorPool`].

use std::{
    fs::{File, OpenOptions},
    io::ErrorKind,
    path::Path,
    sync::Arc,
};

use crate::error::Result;

#[cfg(unix)]
mod backend {
    use std::fs::File;
    use std::io::{self, ErrorKind};
    use std::os::unix::fs::FileExt;

    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.read_at(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "read_at reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.write_at(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "write_at wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

#[cfg(windows)]
mod backend {
    use std::fs::File;
    use std::io::{self, ErrorKind};
    use std::os::windows::fs::FileExt;

    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.seek_read(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "seek_read reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.seek_write(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "seek_write wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

/// An open handle on the backing file supporting positioned exact I/O.
#[derive(Clone)]
pub struct Descriptor {
    inner: Arc<File>,
}

impl Descriptor {
    /// Opens the backing file, creating it when writable and missing.
    pub fn open(path: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        let file = if read_only {
            OpenOptions::new().read(true).open(path)?
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?
        };
        Ok(Self {
            inner: Arc::new(file),
        })
    }

    /// Opens the backing file truncated to zero length, for store creation.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            inner: Arc::new(file),
        })
    }

    fn file(&self) -> &File {
        &self.inner
    }

    /// Reads exactly `dst.len()` bytes at `off`.
    pub fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        backend::read_exact(self.file(), off, dst)?;
        Ok(())
    }

    /// Writes all of `src` at `off`.
    pub fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        backend::write_all(self.file(), off, src)?;
        Ok(())
    }

    /// Synchronizes file data and metadata to disk.
    pub fn sync_all(&self) -> Result<()> {
        self.file().sync_all()?;
        Ok(())
    }

    /// Current length of the backing file in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file().metadata()?.len())
    }

    /// Returns true if the backing file is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Maps an `UnexpectedEof` I/O error to the given corruption failure; other
/// errors pass through unchanged.
pub(crate) fn eof_as_corruption(
    result: Result<()>,
    message: &'static str,
) -> Result<()> {
    match result {
        Err(crate::error::StoreError::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => {
            Err(crate::error::StoreError::Corruption(message))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use tempfile::tempdir;

    #[test]
    fn write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("io.bin");
        let io = Descriptor::open(&path, false).unwrap();

        let payload = b"pages all the way down";
        io.write_at(64, payload).unwrap();
        io.sync_all().unwrap();

        let mut buf = vec![0u8; payload.len()];
        io.read_at(64, &mut buf).unwrap();
        assert_eq!(&buf, payload);
        assert!(io.len().unwrap() >= 64 + payload.len() as u64);
    }

    #[test]
    fn read_past_eof_returns_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("io.bin");
        let io = Descriptor::open(&path, false).unwrap();
        let mut buf = [0u8; 8];
        let err = io.read_at(0, &mut buf).unwrap_err();
        match err {
            StoreError::Io(inner) => assert_eq!(inner.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn create_truncates_existing_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("io.bin");
        {
            let io = Descriptor::open(&path, false).unwrap();
            io.write_at(0, &[7u8; 128]).unwrap();
        }
        let io = Descriptor::create(&path).unwrap();
        assert!(io.is_empty().unwrap());
    }

    #[test]
    fn read_only_descriptor_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("io.bin");
        {
            let io = Descriptor::open(&path, false).unwrap();
            io.write_at(0, &[1u8; 16]).unwrap();
        }
        let ro = Descriptor::open(&path, true).unwrap();
        let mut buf = [0u8; 16];
        ro.read_at(0, &mut buf).unwrap();
        assert!(ro.write_at(0, &[2u8; 16]).is_err());
    }
}
