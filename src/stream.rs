//! File stream (C6): a byte-oriented reader over a file's data payload,
//! with real-time vs non-real-time semantics.

use crate::error::Result;
use crate::file::{Blocks, FileRecord};
use crate::sector::{CdImage, Sector};

/// Byte-oriented reader over a file's sectors.
///
/// Non-real-time streams (no record/channel restriction) are size-bounded
/// by the file record's on-disc byte length; real-time streams (a record
/// and/or channel given) have no defined size and run until the
/// underlying block sequence is exhausted.
pub struct FileStream<'a> {
    blocks: Blocks<'a>,
    current: Option<Sector<'a>>,
    block_pos: usize,
    file_pos: u64,
    file_size: Option<u64>,
}

impl<'a> FileStream<'a> {
    /// Open a stream over `file`'s data, optionally restricted to a
    /// record index and/or channel number. `start_index` is the sector
    /// index the volume layer resolved from `file.first_lbn`.
    pub fn open(
        image: &'a CdImage,
        file: &FileRecord,
        start_index: u64,
        record: Option<usize>,
        channel: Option<u8>,
    ) -> Result<Self> {
        let real_time = record.is_some() || channel.is_some();
        let blocks = file.blocks(image, start_index, record, channel);

        let mut stream = Self {
            blocks,
            current: None,
            block_pos: 0,
            file_pos: 0,
            file_size: if real_time { None } else { Some(file.size as u64) },
        };
        stream.advance_block()?;
        Ok(stream)
    }

    fn advance_block(&mut self) -> Result<()> {
        match self.blocks.next() {
            Some(Ok(sector)) => {
                self.current = Some(sector);
                self.block_pos = 0;
            }
            Some(Err(e)) => return Err(e),
            None => self.current = None,
        }
        Ok(())
    }

    /// Whether the stream has no more data to yield.
    pub fn is_eof(&self) -> bool {
        match self.file_size {
            Some(size) => self.file_pos >= size,
            None => self.current.is_none(),
        }
    }

    /// Read up to `n` bytes (or, if `n` is `None`, all remaining bytes),
    /// concatenating payloads across sector boundaries as needed. In
    /// non-real-time mode the read is clamped to the file's remaining
    /// declared size.
    pub fn read(&mut self, n: Option<u64>) -> Result<Vec<u8>> {
        let mut remaining = match (n, self.file_size) {
            (Some(n), Some(size)) => Some(n.min(size.saturating_sub(self.file_pos))),
            (Some(n), None) => Some(n),
            (None, Some(size)) => Some(size.saturating_sub(self.file_pos)),
            (None, None) => None,
        };

        let mut out = Vec::new();
        loop {
            if let Some(0) = remaining {
                break;
            }
            let current = match self.current {
                Some(s) => s,
                None => break,
            };
            if self.file_size.is_some() && self.is_eof() {
                break;
            }

            let available = current.data_size() - self.block_pos;
            let take = match remaining {
                Some(r) => (r as usize).min(available),
                None => available,
            };

            out.extend_from_slice(current.data(self.block_pos..self.block_pos + take));
            self.block_pos += take;
            self.file_pos += take as u64;
            if let Some(r) = remaining.as_mut() {
                *r -= take as u64;
            }

            if self.block_pos >= current.data_size() {
                self.advance_block()?;
            }
        }

        Ok(out)
    }

    /// Read the remainder of the current sector only.
    pub fn read_block(&mut self) -> Result<Vec<u8>> {
        let current = match self.current {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };
        let data = current.data(self.block_pos..current.data_size()).to_vec();
        self.file_pos += (current.data_size() - self.block_pos) as u64;
        self.block_pos = current.data_size();
        self.advance_block()?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_reader::RecordDate;
    use crate::file::{FileAttributes, FileFlags};
    use crate::sector::RAW_SECTOR_SIZE;
    use std::io::Write;

    fn make_record(size: u32, file_number: u8) -> FileRecord {
        FileRecord {
            record_size: 0,
            first_lbn: 0,
            size,
            creation_date: RecordDate {
                year: 1993,
                month: 1,
                day: 1,
                hour: 0,
                minute: 0,
                second: 0,
            },
            flags: FileFlags::empty(),
            interleave_a: 0,
            interleave_b: 0,
            album_idx: 0,
            name: "TEST".into(),
            owner_group: 0,
            owner_user: 0,
            attributes: FileAttributes::empty(),
            file_number,
        }
    }

    fn build_image(data_fill: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for &b in data_fill {
            let mut sector = vec![b; RAW_SECTOR_SIZE];
            sector[0] = 0;
            sector[2] = 0x08; // data bit, form1
            sector[4] = 0;
            sector[6] = 0x08;
            file.write_all(&sector).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn non_rt_read_clamps_to_file_size() {
        let file = build_image(&[0xAB, 0xCD]);
        let image = CdImage::open(file.path()).unwrap();
        let record = make_record(2048 + 10, 0);
        let mut stream = FileStream::open(&image, &record, 0, None, None).unwrap();

        let data = stream.read(None).unwrap();
        assert_eq!(data.len(), 2048 + 10);
        assert!(stream.is_eof());
    }

    #[test]
    fn read_block_returns_sector_remainder() {
        let file = build_image(&[0x11, 0x22]);
        let image = CdImage::open(file.path()).unwrap();
        let record = make_record(4096, 0);
        let mut stream = FileStream::open(&image, &record, 0, None, None).unwrap();

        let first = stream.read_block().unwrap();
        assert_eq!(first.len(), 2048);
        assert!(first.iter().all(|&b| b == 0x11));
    }
}
