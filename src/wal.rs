use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Write one frame: `[u32 le: payload len][bincode payload][u32 le: crc32 of payload]`.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event larger than 4 GiB"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read one frame. `Ok(None)` marks the end of the usable log: clean EOF,
/// a torn tail from a crash, or a checksum mismatch.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut word = [0u8; 4];
    if !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !read_or_eof(reader, &mut payload)? {
        return Ok(None);
    }
    if !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only write-ahead log backing the journaled store.
///
/// Appends are buffered; durability comes from `flush_sync`, which the
/// store's writer task calls once per batch (group commit). A batch that
/// fails is undone with `rollback`, so the file only ever holds whole,
/// acknowledged frames.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length and append count as of the last successful `flush_sync`.
    committed_len: u64,
    committed_appends: u64,
    /// Set while bytes past `committed_len` may be on disk.
    torn: bool,
    /// Appends left before an injected failure.
    #[cfg(test)]
    fail_after: Option<u32>,
}

impl Wal {
    /// Open (or create) the log at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            committed_len,
            committed_appends: 0,
            torn: false,
            #[cfg(test)]
            fail_after: None,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.torn {
            self.rollback()?;
        }
        #[cfg(test)]
        if let Some(left) = self.fail_after {
            if left == 0 {
                self.fail_after = None;
                // Half a frame, as a short write would leave it.
                self.writer.write_all(&[200, 0, 0, 0, 1, 2, 3])?;
                return Err(io::Error::other("injected append failure"));
            }
            self.fail_after = Some(left - 1);
        }
        write_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Let `frames` more appends through, then leave a torn frame and fail.
    #[cfg(test)]
    pub fn fail_append_after(&mut self, frames: u32) {
        self.fail_after = Some(frames);
    }

    /// Flush buffered frames and fsync.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len = self.writer.get_ref().metadata()?.len();
        self.committed_appends = self.appends_since_compact;
        Ok(())
    }

    /// Drop everything written since the last successful `flush_sync`:
    /// buffered bytes are discarded and the file is truncated back to its
    /// committed length. Until this succeeds every append retries it first.
    pub fn rollback(&mut self) -> io::Result<()> {
        self.torn = true;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        // into_parts hands back the unflushed buffer instead of writing it.
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let (_old_file, _discarded) = stale.into_parts();
        self.writer.get_ref().set_len(self.committed_len)?;
        self.writer.get_ref().sync_all()?;
        self.appends_since_compact = self.committed_appends;
        self.torn = false;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write a snapshot of events to `<log>.wal.tmp` and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path.with_extension("wal.tmp"))?);
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the log and reopen it for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.committed_appends = 0;
        self.torn = false;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Read every intact event. A missing file is an empty log; replay stops
    /// quietly at the first torn or corrupt frame.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::recover(path)?.0)
    }

    /// Like `replay`, also returning the byte length of the intact prefix.
    pub fn recover(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;
        while let Some(payload) = read_frame(&mut reader)? {
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
            valid_len += 8 + payload.len() as u64;
        }
        Ok((events, valid_len))
    }

    /// Open the log for appending after cutting it to `valid_len` bytes, so
    /// new frames never land behind a torn tail.
    pub fn open_truncated(path: &Path, valid_len: u64) -> io::Result<Self> {
        let mut wal = Self::open(path)?;
        if wal.committed_len > valid_len {
            warn!(
                path = %path.display(),
                discarded = wal.committed_len - valid_len,
                "truncating torn tail of booking log"
            );
            wal.committed_len = valid_len;
            wal.rollback()?;
        }
        Ok(wal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Booking, BookingStatus, Room, Span};
    use rust_decimal_macros::dec;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomdesk_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn room_added(id: &str) -> Event {
        Event::RoomAdded {
            room: Room {
                id: id.into(),
                name: format!("Room {id}"),
                base_hourly_rate: dec!(500),
                capacity: 4,
            },
        }
    }

    fn booking_created(room_id: &str) -> Event {
        Event::BookingCreated {
            booking: Booking {
                id: Ulid::new(),
                room_id: room_id.into(),
                user_name: "alice".into(),
                span: Span::new(1_000, 2_000),
                total_price: dec!(0.14),
                status: BookingStatus::Confirmed,
                created_at: 500,
                cancelled_at: None,
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![room_added("101"), booking_created("101")];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let event = room_added("101");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        // Torn second frame: length prefix plus a couple of bytes.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[40, 0, 0, 0, 1, 2]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let good = room_added("101");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&room_added("102")).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn compact_shrinks_and_keeps_appending() {
        let path = tmp_path("compact.wal");
        let room = room_added("101");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&room).unwrap();
            for _ in 0..20 {
                wal.append(&booking_created("101")).unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let later = booking_created("101");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(std::slice::from_ref(&room)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&later).unwrap();
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted log should be smaller: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), vec![room, later]);
    }

    #[test]
    fn rollback_truncates_failed_batch() {
        let path = tmp_path("rollback.wal");
        let first = room_added("101");
        let ghost = room_added("102");
        let later = room_added("103");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();

            // One frame lands in the buffer, the next tears and fails.
            wal.append_buffered(&ghost).unwrap();
            wal.fail_append_after(0);
            assert!(wal.append_buffered(&later).is_err());
            wal.rollback().unwrap();
            assert_eq!(wal.appends_since_compact(), 1);

            wal.append(&later).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, later]);
    }

    #[test]
    fn reopen_cuts_torn_tail_before_appending() {
        let path = tmp_path("reopen_torn.wal");
        let first = room_added("101");
        let later = room_added("102");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[200, 0, 0, 0, 1, 2, 3]).unwrap();
        }

        let (events, valid_len) = Wal::recover(&path).unwrap();
        assert_eq!(events, vec![first.clone()]);
        assert_eq!(valid_len, fs::metadata(&path).unwrap().len() - 7);
        {
            let mut wal = Wal::open_truncated(&path, valid_len).unwrap();
            wal.append(&later).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, later]);
    }

    #[test]
    fn append_buffered_counts_until_flush() {
        let path = tmp_path("buffered_flush.wal");
        let events: Vec<Event> = (0..5).map(|i| room_added(&format!("{i}"))).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }
}
