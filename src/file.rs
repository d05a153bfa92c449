//! File model (C4): a directory file record, the sectors belonging to it,
//! and its record/channel map for real-time playback.

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::byte_reader::{number_be, parse_record_date, raw_string, RecordDate};
use crate::error::{CdiError, Result};
use crate::sector::{CdImage, Sector};
use crate::volume::PathTable;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileFlags: u8 {
        const HIDDEN = 0x01;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u16 {
        const OWNER_READ = 1 << 0;
        const OWNER_EXEC = 1 << 2;
        const GROUP_READ = 1 << 4;
        const GROUP_EXEC = 1 << 6;
        const WORLD_READ = 1 << 8;
        const WORLD_EXEC = 1 << 10;
        const CDDA      = 1 << 14;
        const DIRECTORY = 1 << 15;
    }
}

/// A directory file record (§6 "Directory file record").
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub record_size: usize,
    pub first_lbn: u32,
    pub size: u32,
    pub creation_date: RecordDate,
    pub flags: FileFlags,
    pub interleave_a: u8,
    pub interleave_b: u8,
    pub album_idx: u16,
    pub name: String,
    pub owner_group: u16,
    pub owner_user: u16,
    pub attributes: FileAttributes,
    pub file_number: u8,
}

impl FileRecord {
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self> {
        let record_size = bytes[0] as usize;
        let ear_size = bytes[1];
        if ear_size != 0 {
            return Err(CdiError::InvalidImage(format!(
                "non-zero EAR size ({ear_size}) is not supported"
            )));
        }

        let first_lbn = number_be(&bytes[6..10]) as u32;
        let size = number_be(&bytes[14..18]) as u32;
        let creation_date = parse_record_date(&bytes[18..24]);
        let flags = FileFlags::from_bits_truncate(bytes[25]);
        let interleave_a = bytes[26];
        let interleave_b = bytes[27];
        let album_idx = number_be(&bytes[30..32]) as u16;
        let name_size = bytes[32] as usize;
        let name = raw_string(&bytes[33..33 + name_size]);

        let n_prime = name_size + (name_size % 2);
        let owner_group = number_be(&bytes[33 + n_prime..35 + n_prime]) as u16;
        let owner_user = number_be(&bytes[35 + n_prime..37 + n_prime]) as u16;
        let attributes =
            FileAttributes::from_bits_truncate(number_be(&bytes[37 + n_prime..39 + n_prime]) as u16);
        let file_number = bytes[41 + n_prime];

        Ok(Self {
            record_size,
            first_lbn,
            size,
            creation_date,
            flags,
            interleave_a,
            interleave_b,
            album_idx,
            name,
            owner_group,
            owner_user,
            attributes,
            file_number,
        })
    }

    /// Whether this record names a directory. Determined by matching
    /// `first_lbn` against the Path Table rather than trusting the
    /// (often-wrong) attribute bit, per §3.
    pub fn is_directory(&self, path_table: &PathTable) -> bool {
        path_table.is_directory_lbn(self.first_lbn)
    }

    /// Sectors belonging to this file, starting at `start_index` (the
    /// sector index corresponding to `first_lbn`). When `file_number != 0`
    /// only sectors whose sub-header file-number matches are yielded
    /// (interleaved files); otherwise every sector from `start_index`
    /// onward is yielded. Stops after yielding a sector with the EOF bit.
    pub fn sectors_of<'a>(&self, image: &'a CdImage, start_index: u64) -> SectorsOf<'a> {
        SectorsOf {
            image,
            next: start_index,
            file_number: self.file_number,
            done: false,
        }
    }

    /// Same enumeration as `sectors_of`, optionally restricted to a given
    /// record index and/or channel number (§4.4).
    pub fn blocks<'a>(
        &self,
        image: &'a CdImage,
        start_index: u64,
        record: Option<usize>,
        channel: Option<u8>,
    ) -> Blocks<'a> {
        Blocks {
            inner: self.sectors_of(image, start_index),
            record_filter: record,
            channel_filter: channel,
            current_record: 0,
            done: false,
        }
    }

    /// Compute the record/channel map by scanning `sectors_of` once (§4.4).
    pub fn records(&self, image: &CdImage, start_index: u64) -> Result<Vec<RecordInfo>> {
        let mut records = Vec::new();
        let mut current: Option<RecordInfo> = None;

        for sector in self.sectors_of(image, start_index) {
            let sector = sector?;
            let sub_header = sector.sub_header();

            let record = current.get_or_insert_with(|| RecordInfo {
                start_sector_index: sector.index(),
                channels: BTreeMap::new(),
            });
            let info = record.channels.entry(sub_header.channel_number).or_default();
            if sub_header.submode.is_audio() {
                info.n_audio += 1;
            } else if sub_header.submode.is_video() {
                info.n_video += 1;
            } else if sub_header.submode.is_data() {
                info.n_data += 1;
            } else {
                info.n_empty += 1;
            }

            if sub_header.submode.is_end_of_record() || sub_header.submode.is_end_of_file() {
                records.push(current.take().expect("record just inserted above"));
            }
        }

        if let Some(record) = current.take() {
            records.push(record);
        }

        Ok(records)
    }
}

/// Per-channel sector tallies within one record.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelInfo {
    pub n_audio: u32,
    pub n_video: u32,
    pub n_data: u32,
    pub n_empty: u32,
}

/// One record: a run of sectors from the file's start (or the sector
/// after the previous EOR) up to and including the next EOR-or-EOF.
#[derive(Debug, Clone)]
pub struct RecordInfo {
    pub start_sector_index: u64,
    pub channels: BTreeMap<u8, ChannelInfo>,
}

/// Lazy sector sequence for a file, filtered by file-number.
pub struct SectorsOf<'a> {
    image: &'a CdImage,
    next: u64,
    file_number: u8,
    done: bool,
}

impl<'a> SectorsOf<'a> {
    pub(crate) fn new(image: &'a CdImage, start: u64, file_number: u8) -> Self {
        Self {
            image,
            next: start,
            file_number,
            done: false,
        }
    }
}

impl<'a> Iterator for SectorsOf<'a> {
    type Item = Result<Sector<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            if self.next >= self.image.sector_count() {
                self.done = true;
                return None;
            }

            let sector = match self.image.sector(self.next) {
                Ok(s) => s,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            self.next += 1;

            if self.file_number != 0 && sector.sub_header().file_number != self.file_number {
                continue;
            }

            if sector.sub_header().submode.is_end_of_file() {
                self.done = true;
            }
            return Some(Ok(sector));
        }
    }
}

/// Sector sequence restricted to a given record index and/or channel.
pub struct Blocks<'a> {
    inner: SectorsOf<'a>,
    record_filter: Option<usize>,
    channel_filter: Option<u8>,
    current_record: usize,
    done: bool,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = Result<Sector<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let sector = match self.inner.next() {
                Some(Ok(s)) => s,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return None;
                }
            };

            let sub_header = sector.sub_header();
            let record_idx = self.current_record;
            let is_boundary = sub_header.submode.is_end_of_record() || sub_header.submode.is_end_of_file();

            if let Some(r) = self.record_filter {
                if record_idx > r {
                    self.done = true;
                    return None;
                }
            }

            if is_boundary {
                self.current_record += 1;
            }

            let matches_record = self.record_filter.map_or(true, |r| r == record_idx);
            let matches_channel = self
                .channel_filter
                .map_or(true, |c| c == sub_header.channel_number);

            if matches_record && matches_channel {
                if let Some(r) = self.record_filter {
                    if record_idx == r && is_boundary {
                        self.done = true;
                    }
                }
                return Some(Ok(sector));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector::RAW_SECTOR_SIZE;
    use std::io::Write;

    fn build_image(subheaders: &[(u8, u8, u8)]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for &(file_number, channel, submode) in subheaders {
            let mut sector = vec![0u8; RAW_SECTOR_SIZE];
            sector[0] = file_number;
            sector[1] = channel;
            sector[2] = submode;
            sector[4] = file_number;
            sector[5] = channel;
            sector[6] = submode;
            file.write_all(&sector).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn make_record(file_number: u8) -> FileRecord {
        FileRecord {
            record_size: 0,
            first_lbn: 0,
            size: 0,
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
            name: "TEST".to_string(),
            owner_group: 0,
            owner_user: 0,
            attributes: FileAttributes::empty(),
            file_number,
        }
    }

    #[test]
    fn interleaved_file_demux_boundary_scenario() {
        // [3,4,3,3,4,3,4,4,3,3] with EOF on the last.
        const EOF: u8 = 0x80;
        let numbers = [3u8, 4, 3, 3, 4, 3, 4, 4, 3, 3];
        let subheaders: Vec<(u8, u8, u8)> = numbers
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                let submode = if i == numbers.len() - 1 { EOF } else { 0 };
                (n, 0, submode)
            })
            .collect();
        let file = build_image(&subheaders);
        let image = CdImage::open(file.path()).unwrap();

        let record = make_record(3);
        let indices: Vec<u64> = record
            .sectors_of(&image, 0)
            .map(|s| s.unwrap().index())
            .collect();
        assert_eq!(indices, vec![0, 2, 3, 5, 8, 9]);
    }

    #[test]
    fn file_number_zero_yields_every_sector() {
        let file = build_image(&[(1, 0, 0), (2, 0, 0), (3, 0, 0x80)]);
        let image = CdImage::open(file.path()).unwrap();
        let record = make_record(0);
        let indices: Vec<u64> = record
            .sectors_of(&image, 0)
            .map(|s| s.unwrap().index())
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn records_close_on_eor_or_eof() {
        const EOR: u8 = 0x01;
        const EOF: u8 = 0x80;
        let file = build_image(&[(0, 0, EOR), (0, 0, 0), (0, 0, EOF)]);
        let image = CdImage::open(file.path()).unwrap();
        let record = make_record(0);
        let records = record.records(&image, 0).unwrap();
        assert_eq!(records.len(), 2);
    }
}
