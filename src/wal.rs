use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Frame one record as `[len][bincode][crc32]`.
fn encode_record<R: Serialize>(writer: &mut impl Write, record: &R) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` means the log ended mid-frame.
fn read_frame_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only write-ahead log of `R` records.
///
/// Format per entry: `[u32: len][bincode: R][u32: crc32]`, little-endian.
/// A torn or corrupt tail (crash mid-append) is dropped on replay; everything
/// before it is kept.
pub struct Wal<R> {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    _record: PhantomData<fn(R)>,
}

impl<R: Serialize + DeserializeOwned> Wal<R> {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            _record: PhantomData,
        })
    }

    /// Buffer a record. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, record: &R) -> io::Result<()> {
        encode_record(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    #[cfg(test)]
    pub fn append(&mut self, record: &R) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Rewrite the log with exactly `records`: write a temp file, fsync, rename over.
    pub fn compact(&mut self, records: &[R]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for record in records {
                encode_record(&mut writer, record)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Every intact record on disk, in append order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<R>> {
        Ok(Self::read_intact(path)?.0)
    }

    /// Replay, then cut a torn or corrupt tail off the file so that later
    /// appends land directly after the last intact frame.
    pub fn recover(path: &Path) -> io::Result<Vec<R>> {
        let (records, intact_len) = Self::read_intact(path)?;
        let on_disk = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e),
        };
        if on_disk > intact_len {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = on_disk - intact_len,
                "truncating WAL tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(intact_len)?;
            file.sync_all()?;
        }
        Ok(records)
    }

    /// Intact records plus the byte length they occupy from the start of the file.
    fn read_intact(path: &Path) -> io::Result<(Vec<R>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut intact_len = 0u64;

        loop {
            let mut len_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut len_buf)? {
                break;
            }
            let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
            if !read_frame_part(&mut reader, &mut payload)? {
                break;
            }
            let mut crc_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!(path = %path.display(), "corrupt WAL record, stopping replay");
                break;
            }
            match bincode::deserialize::<R>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "undecodable WAL record: {e}");
                    break;
                }
            }
            intact_len += 8 + payload.len() as u64;
        }

        Ok((records, intact_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, Tenant};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotguard_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn tenant(id: u64) -> Event {
        Event::TenantRegistered {
            tenant: Tenant {
                id,
                name: format!("tenant-{id}"),
                shared_calendar: "primary".into(),
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![
            tenant(1),
            Event::BookingCancelled {
                id: Ulid::new(),
                resource_id: 4,
            },
        ];
        {
            let mut wal = Wal::<Event>::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 2);
        }
        assert_eq!(Wal::<Event>::replay(&path).unwrap(), events);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("never_written.wal");
        assert!(Wal::<Event>::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn torn_tail_is_discarded() {
        let path = tmp_path("torn_tail.wal");
        {
            let mut wal = Wal::<Event>::open(&path).unwrap();
            wal.append(&tenant(1)).unwrap();
            wal.append(&tenant(2)).unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();

        assert_eq!(Wal::<Event>::replay(&path).unwrap(), vec![tenant(1)]);
    }

    #[test]
    fn corrupt_crc_stops_replay() {
        let path = tmp_path("corrupt_crc.wal");
        {
            let mut wal = Wal::<Event>::open(&path).unwrap();
            wal.append(&tenant(1)).unwrap();
            wal.append(&tenant(2)).unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        assert_eq!(Wal::<Event>::replay(&path).unwrap(), vec![tenant(1)]);
    }

    #[test]
    fn compact_replaces_contents_and_keeps_appending() {
        let path = tmp_path("compact.wal");
        let mut wal = Wal::<Event>::open(&path).unwrap();
        for id in 0..5 {
            wal.append(&tenant(id)).unwrap();
        }
        wal.compact(&[tenant(9)]).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        wal.append(&tenant(10)).unwrap();

        assert_eq!(Wal::<Event>::replay(&path).unwrap(), vec![tenant(9), tenant(10)]);
    }

    #[test]
    fn recover_truncates_torn_tail_before_new_appends() {
        let path = tmp_path("recover_torn.wal");
        {
            let mut wal = Wal::<Event>::open(&path).unwrap();
            wal.append(&tenant(1)).unwrap();
        }
        let intact = fs::metadata(&path).unwrap().len();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0x2a, 0x00, 0x00]).unwrap();
        }

        assert_eq!(Wal::<Event>::recover(&path).unwrap(), vec![tenant(1)]);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact);

        {
            let mut wal = Wal::<Event>::open(&path).unwrap();
            wal.append(&tenant(2)).unwrap();
        }
        assert_eq!(Wal::<Event>::replay(&path).unwrap(), vec![tenant(1), tenant(2)]);
    }

    #[test]
    fn recover_missing_file_is_empty() {
        let path = tmp_path("recover_missing.wal");
        assert!(Wal::<Event>::recover(&path).unwrap().is_empty());
        assert!(!path.exists());
    }
}
