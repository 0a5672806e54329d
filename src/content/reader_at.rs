//! Random-access byte source for index readers.
//!
//! Index files are write-once and immutable after flush, so readers hold
//! them open through a `ReaderAt` and navigate by absolute offset. Short
//! reads are errors: every successful `read_at` fills the whole buffer.
//!
//! In-memory buffers and memory maps satisfy the trait zero-copy; plain
//! files use positioned reads and need no seek state, so one reader can
//! serve concurrent lookups.

use std::fs::File;
use std::io;

use memmap2::Mmap;

/// Random-access reads at absolute offsets.
pub trait ReaderAt: Send + Sync {
    /// Reads exactly `buf.len()` bytes starting at `offset`.
    ///
    /// # Errors
    /// Returns an error if the range is out of bounds or the underlying
    /// source fails; partial fills are reported as
    /// [`io::ErrorKind::UnexpectedEof`].
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;

    /// Releases resources held by the reader.
    ///
    /// Sources without an explicit close succeed trivially; dropping the
    /// reader releases whatever remains.
    fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

fn read_slice_at(data: &[u8], buf: &mut [u8], offset: u64) -> io::Result<()> {
    let start = usize::try_from(offset)
        .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "offset beyond end of data"))?;
    let end = start.checked_add(buf.len()).filter(|&end| end <= data.len());

    match end {
        Some(end) => {
            buf.copy_from_slice(&data[start..end]);
            Ok(())
        }
        None => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "read past end of data",
        )),
    }
}

impl ReaderAt for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        read_slice_at(self, buf, offset)
    }
}

impl ReaderAt for Mmap {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        read_slice_at(self, buf, offset)
    }
}

#[cfg(unix)]
impl ReaderAt for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        use std::os::unix::fs::FileExt;

        self.read_exact_at(buf, offset)
    }
}

impl<R: ReaderAt + ?Sized> ReaderAt for Box<R> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        (**self).read_at(buf, offset)
    }

    fn close(&self) -> io::Result<()> {
        (**self).close()
    }
}
