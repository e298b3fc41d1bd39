use log::debug;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use zip::ZipArchive;
use zip::result::ZipError;

use super::ArchiveEntry;
use crate::error::ArchiveError;

/// Local file header and empty-archive end-of-central-directory signatures.
const LOCAL_FILE_SIGNATURE: [u8; 4] = *b"PK\x03\x04";
const EMPTY_ARCHIVE_SIGNATURE: [u8; 4] = *b"PK\x05\x06";
const CENTRAL_HEADER_SIGNATURE: [u8; 4] = *b"PK\x01\x02";
const CENTRAL_HEADER_LEN: usize = 46;

/// Largest text member (`WHEEL`, `METADATA`, `entry_points.txt`) read into memory.
pub const MAX_TEXT_MEMBER: u64 = 16 * 1024 * 1024;

fn unreadable(path: &Path, reason: impl ToString) -> ArchiveError {
    ArchiveError::Unreadable {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn corrupt(path: &Path, reason: impl ToString) -> ArchiveError {
    ArchiveError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Open `path` and check that it starts with a zip signature.
fn open_container(path: &Path) -> Result<File, ArchiveError> {
    let mut file = File::open(path).map_err(|e| unreadable(path, e))?;

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)
        .map_err(|_| unreadable(path, "file is too short to be a zip container"))?;
    if magic != LOCAL_FILE_SIGNATURE && magic != EMPTY_ARCHIVE_SIGNATURE {
        return Err(unreadable(path, "missing zip signature"));
    }

    Ok(file)
}

fn open_zip(path: &Path) -> Result<ZipArchive<File>, ArchiveError> {
    let file = open_container(path)?;
    ZipArchive::new(file).map_err(|e| match e {
        ZipError::Io(io) => corrupt(path, format!("failed to read central directory: {}", io)),
        other => corrupt(path, other),
    })
}

/// The zip reader keys entries by name, so a repeated name hides the earlier
/// entry. Walk the central directory records themselves to catch that.
fn reject_duplicate_names(path: &Path, start: u64) -> Result<(), ArchiveError> {
    let broken = |e: io::Error| corrupt(path, format!("failed to read central directory: {}", e));
    let file = File::open(path).map_err(|e| unreadable(path, e))?;
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(start)).map_err(broken)?;

    let mut seen = HashSet::new();
    let mut header = [0u8; CENTRAL_HEADER_LEN];
    loop {
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(broken(e)),
        }
        if header[..4] != CENTRAL_HEADER_SIGNATURE {
            break;
        }

        let field = |at: usize| u16::from_le_bytes([header[at], header[at + 1]]) as usize;
        let (name_len, extra_len, comment_len) = (field(28), field(30), field(32));
        let mut name = vec![0u8; name_len];
        reader.read_exact(&mut name).map_err(broken)?;
        reader
            .seek_relative((extra_len + comment_len) as i64)
            .map_err(broken)?;

        if seen.contains(&name) {
            return Err(corrupt(
                path,
                format!("duplicate entry {:?}", String::from_utf8_lossy(&name)),
            ));
        }
        seen.insert(name);
    }
    Ok(())
}

/// Parsed zip container: the ordered entry index plus the open handle it
/// was read from.
pub(super) struct ZipIndex {
    pub entries: Vec<ArchiveEntry>,
    zip: ZipArchive<File>,
    path: PathBuf,
}

impl ZipIndex {
    pub fn parse(path: &Path) -> Result<Self, ArchiveError> {
        let mut zip = open_zip(path)?;
        reject_duplicate_names(path, zip.central_directory_start())?;
        let mut entries = Vec::with_capacity(zip.len());

        for index in 0..zip.len() {
            let file = zip
                .by_index_raw(index)
                .map_err(|e| corrupt(path, format!("failed to read entry {}: {}", index, e)))?;

            entries.push(ArchiveEntry {
                index,
                recorded_path: file.name().to_string(),
                size: file.size(),
                is_dir: file.is_dir(),
                unix_mode: file.unix_mode(),
            });
        }

        debug!("Indexed {} entries in {:?}", entries.len(), path);
        Ok(ZipIndex {
            entries,
            zip,
            path: path.to_path_buf(),
        })
    }

    /// Read a whole member as UTF-8 text using the handle the index was parsed from.
    pub fn read_text(&mut self, entry: &ArchiveEntry) -> Result<String, ArchiveError> {
        let path = self.path.clone();
        let file = self
            .zip
            .by_index(entry.index)
            .map_err(|e| corrupt(&path, format!("{}: {}", entry.recorded_path, e)))?;
        EntryStream::new(path, entry, file).read_text()
    }
}

/// An independent handle onto the archive. Each worker owns one, so entries
/// can be streamed concurrently without a shared cursor.
pub struct EntryReader {
    zip: ZipArchive<File>,
    path: PathBuf,
}

impl EntryReader {
    pub(super) fn open(path: &Path) -> Result<Self, ArchiveError> {
        Ok(EntryReader {
            zip: open_zip(path)?,
            path: path.to_path_buf(),
        })
    }

    /// Stream the content of `entry`.
    pub fn read(
        &mut self,
        entry: &ArchiveEntry,
    ) -> Result<EntryStream<Box<dyn Read + '_>>, ArchiveError> {
        let file = self
            .zip
            .by_index(entry.index)
            .map_err(|e| corrupt(&self.path, format!("{}: {}", entry.recorded_path, e)))?;
        Ok(EntryStream::new(
            self.path.clone(),
            entry,
            Box::new(file) as Box<dyn Read + '_>,
        ))
    }
}

/// Content of a single entry, checked against the size the index declares.
pub struct EntryStream<R> {
    archive: PathBuf,
    entry: String,
    expected: u64,
    consumed: u64,
    inner: R,
}

impl<R: Read> EntryStream<R> {
    pub(crate) fn new(archive: PathBuf, entry: &ArchiveEntry, inner: R) -> Self {
        EntryStream {
            archive,
            entry: entry.recorded_path.clone(),
            expected: entry.size,
            consumed: 0,
            inner,
        }
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    fn truncated(&self) -> ArchiveError {
        ArchiveError::Truncated {
            entry: self.entry.clone(),
            expected: self.expected,
            actual: self.consumed,
        }
    }

    fn oversized(&self, size: u64) -> ArchiveError {
        corrupt(
            &self.archive,
            format!(
                "{} holds {} bytes, more than the {} allowed for a text member",
                self.entry, size, MAX_TEXT_MEMBER
            ),
        )
    }

    /// Read the next chunk. Returns `Ok(0)` only once the declared size has
    /// been delivered.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, ArchiveError> {
        loop {
            match self.inner.read(buf) {
                Ok(0) if !buf.is_empty() && self.consumed < self.expected => {
                    return Err(self.truncated());
                }
                Ok(n) => {
                    self.consumed += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(self.truncated());
                }
                Err(e) => {
                    return Err(corrupt(&self.archive, format!("{}: {}", self.entry, e)));
                }
            }
        }
    }

    /// Copy the remaining content into `writer`. Write failures are reported
    /// separately from archive failures.
    pub fn copy_into<W: Write + ?Sized>(
        &mut self,
        writer: &mut W,
    ) -> Result<u64, CopyError> {
        let mut buf = [0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = self.read_chunk(&mut buf).map_err(CopyError::Archive)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).map_err(CopyError::Write)?;
            total += n as u64;
        }
        writer.flush().map_err(CopyError::Write)?;
        Ok(total)
    }

    /// Read the whole entry as UTF-8. Entries larger than [`MAX_TEXT_MEMBER`],
    /// declared or actual, are `Corrupt`.
    pub fn read_text(mut self) -> Result<String, ArchiveError> {
        if self.expected > MAX_TEXT_MEMBER {
            return Err(self.oversized(self.expected));
        }
        let mut bytes = Vec::with_capacity(self.expected.min(64 * 1024) as usize);
        let mut buf = [0u8; 8 * 1024];
        loop {
            let n = self.read_chunk(&mut buf)?;
            if n == 0 {
                break;
            }
            if (bytes.len() + n) as u64 > MAX_TEXT_MEMBER {
                return Err(self.oversized(self.consumed));
            }
            bytes.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(bytes)
            .map_err(|_| corrupt(&self.archive, format!("{} is not valid UTF-8", self.entry)))
    }
}

impl<R: Read> Read for EntryStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_chunk(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Failure while copying an entry to its destination.
#[derive(Debug)]
pub enum CopyError {
    Archive(ArchiveError),
    Write(io::Error),
}
