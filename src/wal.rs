use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// File header: magic bytes followed by a format version.
const MAGIC: &[u8; 4] = b"INKW";
const VERSION: u8 = 1;
const HEADER_LEN: u64 = 5;

/// Write one `[u32 len][bincode event][u32 crc32]` record.
fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read into `buf`, reporting a clean or torn end of file as `Ok(false)`.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact record and its length on disk, or `None` at end of log. A
/// torn tail, a checksum mismatch or an undecodable payload all end the log
/// there.
fn read_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !read_full(reader, &mut word)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    let consumed = 8 + payload.len() as u64;
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, consumed)))
}

fn write_header(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_all(&[VERSION])
}

/// Intact events at `path` and the byte offset where the last of them ends.
/// A missing or header-less file yields no events and offset 0.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    if file.metadata()?.len() < HEADER_LEN {
        return Ok((Vec::new(), 0));
    }
    let mut reader = BufReader::new(file);
    let mut header = [0u8; HEADER_LEN as usize];
    reader.read_exact(&mut header)?;
    if &header[..4] != MAGIC || header[4] != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} is not an innkeep WAL (v{VERSION})", path.display()),
        ));
    }

    let mut events = Vec::new();
    let mut end = HEADER_LEN;
    while let Some((event, len)) = read_record(&mut reader)? {
        events.push(event);
        end += len;
    }
    Ok((events, end))
}

/// Open `path` for appending after its last intact record. A damaged tail
/// is cut off first so new records are never written behind garbage.
fn open_for_append(path: &Path) -> io::Result<BufWriter<File>> {
    let (_, end) = scan(path)?;
    let file = OpenOptions::new().create(true).write(true).truncate(false).open(path)?;
    let len = file.metadata()?.len();
    if len != end {
        tracing::warn!(
            "dropping {} damaged bytes at the end of {}",
            len.saturating_sub(end),
            path.display()
        );
        file.set_len(end)?;
    }
    let mut writer = BufWriter::new(file);
    writer.seek(SeekFrom::End(0))?;
    if end == 0 {
        write_header(&mut writer)?;
    }
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(writer)
}

/// Append-only event log for one hotel.
///
/// Layout: `INKW` + version byte, then records of
/// `[u32 len][bincode Event][u32 crc32]`, little endian. Only the tail can
/// be torn by a crash; replay stops at the first damaged record.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: open_for_append(path)?,
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffer a record. Nothing is durable until [`Wal::flush_sync`].
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn snapshot_path(path: &Path) -> PathBuf {
        path.with_extension("wal.snapshot")
    }

    /// Write a complete replacement log next to the live one and fsync it.
    /// Slow; does not touch the live log.
    pub fn stage_snapshot(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::snapshot_path(path))?);
        write_header(&mut writer)?;
        for event in events {
            write_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the staged snapshot over the live log and continue appending
    /// to it.
    pub fn install_snapshot(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::snapshot_path(&self.path), &self.path)?;
        self.writer = open_for_append(&self.path)?;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::stage_snapshot(&self.path, events)?;
        self.install_snapshot()
    }

    /// Every intact event in the log at `path`. A missing or empty file is
    /// an empty log; a foreign header is an error.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }
}
