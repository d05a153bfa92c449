//! Volume layer (C3): Disc Label (Standard + Terminator), Path Table and
//! Directory parsing.

use tracing::debug;

use crate::byte_reader::{number_be, padded_string, parse_disc_date, raw_string, DiscDate};
use crate::error::{CdiError, Result};
use crate::file::FileRecord;
use crate::sector::CdImage;

/// Sector index of the first Disc Label, relative to the first data sector.
pub const FIRST_DISCLABEL_IDX: u64 = 16;

const DISC_LABEL_TYPE_STANDARD: u8 = 1;
const DISC_LABEL_TYPE_CODED: u8 = 2;
const DISC_LABEL_TYPE_TERMINATOR: u8 = 255;

/// A parsed Standard Disc Label (§6).
#[derive(Debug, Clone)]
pub struct StandardDiscLabel {
    pub standard_id: String,
    pub version: u8,
    pub volume_flags: u8,
    pub system_id: String,
    pub volume_id: String,
    pub volume_size: u32,
    pub charset: String,
    pub album_size: u16,
    pub album_idx: u16,
    pub block_size: u16,
    pub path_table_size: u32,
    pub path_table_address: u32,
    pub album_id: String,
    pub publisher_id: String,
    pub data_preparer: String,
    pub app_id: String,
    pub copyright_file: String,
    pub abstract_file: String,
    pub biblio_file: String,
    pub created_date: Option<DiscDate>,
    pub modified_date: Option<DiscDate>,
    pub expires_date: Option<DiscDate>,
    pub effective_date: Option<DiscDate>,
    pub fs_version: u8,
}

impl StandardDiscLabel {
    fn parse(data: &[u8]) -> Result<Self> {
        let field = |start: usize, len: usize| -> &[u8] { &data[start..start + len] };

        Ok(Self {
            standard_id: padded_string(field(1, 5)),
            version: data[6],
            volume_flags: data[7],
            system_id: padded_string(field(8, 32)),
            volume_id: padded_string(field(40, 32)),
            volume_size: number_be(field(84, 4)) as u32,
            charset: padded_string(field(88, 32)),
            album_size: number_be(field(122, 2)) as u16,
            album_idx: number_be(field(126, 2)) as u16,
            block_size: number_be(field(130, 2)) as u16,
            path_table_size: number_be(field(136, 4)) as u32,
            path_table_address: number_be(field(148, 4)) as u32,
            album_id: padded_string(field(190, 128)),
            publisher_id: padded_string(field(318, 128)),
            data_preparer: padded_string(field(446, 128)),
            app_id: padded_string(field(574, 128)),
            copyright_file: padded_string(field(702, 32)),
            abstract_file: padded_string(field(739, 32)),
            biblio_file: padded_string(field(776, 32)),
            created_date: parse_disc_date(field(813, 16)),
            modified_date: parse_disc_date(field(830, 16)),
            expires_date: parse_disc_date(field(847, 16)),
            effective_date: parse_disc_date(field(864, 16)),
            fs_version: data[881],
        })
    }
}

/// A parsed Terminator Disc Label.
#[derive(Debug, Clone)]
pub struct TerminatorDiscLabel {
    pub standard_id: String,
    pub version: u8,
}

impl TerminatorDiscLabel {
    fn parse(data: &[u8]) -> Self {
        Self {
            standard_id: padded_string(&data[1..6]),
            version: data[6],
        }
    }
}

/// A disc label record, dispatched on its type byte.
#[derive(Debug, Clone)]
pub enum DiscLabel {
    Standard(StandardDiscLabel),
    Terminator(TerminatorDiscLabel),
}

impl DiscLabel {
    /// Parse a disc label from a 2048-byte data-sector payload, dispatching
    /// on the type byte at offset 0.
    pub fn parse(data: &[u8]) -> Result<Self> {
        match data[0] {
            DISC_LABEL_TYPE_STANDARD => Ok(DiscLabel::Standard(StandardDiscLabel::parse(data)?)),
            DISC_LABEL_TYPE_CODED => Err(CdiError::UnsupportedDiscLabel(DISC_LABEL_TYPE_CODED)),
            DISC_LABEL_TYPE_TERMINATOR => Ok(DiscLabel::Terminator(TerminatorDiscLabel::parse(data))),
            other => Err(CdiError::UnsupportedDiscLabel(other)),
        }
    }
}

/// One entry in the flat Path Table.
#[derive(Debug, Clone)]
pub struct PathTableEntry {
    /// 1-based position of this entry within the table; also the value
    /// other entries' `parent_index` refers to.
    pub own_index: u16,
    pub ear_size: u8,
    pub dir_addr_lbn: u32,
    pub parent_index: u16,
    name: Vec<u8>,
}

impl PathTableEntry {
    pub fn name(&self) -> String {
        raw_string(&self.name)
    }

    /// Entry 1 is always the root; its name is a single NUL byte.
    pub fn is_root(&self) -> bool {
        self.name.len() == 1 && self.name[0] == 0
    }

    /// On-disc size of this entry: `8 + name_size + (name_size % 2)`.
    fn on_disk_size(&self) -> usize {
        8 + self.name.len() + (self.name.len() % 2)
    }
}

/// The flat directory path table referenced by the Standard Disc Label.
#[derive(Debug, Clone)]
pub struct PathTable {
    entries: Vec<PathTableEntry>,
}

impl PathTable {
    fn parse(image: &CdImage, block_offset: i64, lbn: u32, size: u32) -> Result<Self> {
        let sector_index = lbn_to_index(block_offset, lbn);
        let sector = image.sector(sector_index)?;
        let data = sector.full_data();

        let mut entries = Vec::new();
        let mut offset = 0usize;
        let size = size as usize;

        while offset < size {
            if offset + 8 > data.len() {
                break;
            }
            let name_size = data[offset] as usize;
            let ear_size = data[offset + 1];
            let dir_addr_lbn = number_be(&data[offset + 2..offset + 6]) as u32;
            let parent_index = number_be(&data[offset + 6..offset + 8]) as u16;
            let name_start = offset + 8;
            let name_end = name_start + name_size;
            let name = data[name_start..name_end].to_vec();

            let entry = PathTableEntry {
                own_index: (entries.len() + 1) as u16,
                ear_size,
                dir_addr_lbn,
                parent_index,
                name,
            };
            offset += entry.on_disk_size();
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[PathTableEntry] {
        &self.entries
    }

    /// Look up an entry by its 1-based index.
    pub fn get(&self, own_index: u16) -> Option<&PathTableEntry> {
        if own_index == 0 {
            return None;
        }
        self.entries.get(own_index as usize - 1)
    }

    pub fn root(&self) -> &PathTableEntry {
        &self.entries[0]
    }

    pub fn parent_of<'a>(&'a self, entry: &PathTableEntry) -> Option<&'a PathTableEntry> {
        if entry.is_root() {
            return None;
        }
        self.get(entry.parent_index)
    }

    /// Full slash-separated path to `entry`, e.g. `/MDIR`.
    pub fn full_name(&self, entry: &PathTableEntry) -> String {
        if entry.is_root() {
            return "/".to_string();
        }
        match self.parent_of(entry) {
            Some(parent) if parent.is_root() => format!("/{}", entry.name()),
            Some(parent) => format!("{}/{}", self.full_name(parent), entry.name()),
            None => format!("/{}", entry.name()),
        }
    }

    /// Whether `lbn` names a directory file (used by `FileRecord::is_directory`).
    pub fn is_directory_lbn(&self, lbn: u32) -> bool {
        self.entries.iter().any(|e| e.dir_addr_lbn == lbn)
    }
}

/// A parsed directory block: the sequence of file records at a Path Table
/// entry's LBN, terminated by a zero-length record.
#[derive(Debug, Clone)]
pub struct Directory {
    /// All records including the leading `.` and `..` entries.
    all_entries: Vec<FileRecord>,
}

impl Directory {
    pub(crate) fn parse(image: &CdImage, block_offset: i64, lbn: u32) -> Result<Self> {
        let sector_index = lbn_to_index(block_offset, lbn);
        let sector = image.sector(sector_index)?;
        let data = sector.full_data();

        let mut all_entries = Vec::new();
        let mut offset = 0usize;
        while offset < data.len() {
            let record_size = data[offset] as usize;
            if record_size == 0 {
                break;
            }
            if offset + record_size > data.len() {
                return Err(CdiError::InvalidImage(
                    "directory record extends past end of block".into(),
                ));
            }
            let record = FileRecord::parse(&data[offset..offset + record_size])?;
            offset += record_size;
            all_entries.push(record);
        }

        Ok(Self { all_entries })
    }

    /// All entries, including `.` and `..`.
    pub fn all_entries(&self) -> &[FileRecord] {
        &self.all_entries
    }

    /// User-visible contents: `.` and `..` filtered out.
    pub fn contents(&self) -> &[FileRecord] {
        if self.all_entries.len() >= 2 {
            &self.all_entries[2..]
        } else {
            &[]
        }
    }
}

fn lbn_to_index(block_offset: i64, lbn: u32) -> u64 {
    (lbn as i64 + block_offset).max(0) as u64
}

/// The parsed volume: disc labels, path table, and the means to resolve
/// directories and files by LBN.
pub struct Volume<'a> {
    image: &'a CdImage,
    standard_labels: Vec<StandardDiscLabel>,
    block_offset: i64,
    path_table: PathTable,
}

impl<'a> Volume<'a> {
    /// Scan disc labels from sector 0, resolve the path table, per §4.2.
    pub fn open(image: &'a CdImage) -> Result<Self> {
        let mut standard_labels = Vec::new();
        let mut first_label_index = None;
        let mut seen_terminator = false;

        for sector in image.sectors() {
            if !sector.sub_header().submode.is_data() {
                continue;
            }

            let label = DiscLabel::parse(sector.full_data())?;
            if first_label_index.is_none() {
                first_label_index = Some(sector.index());
            }

            match label {
                DiscLabel::Standard(standard) => standard_labels.push(standard),
                DiscLabel::Terminator(_) => {
                    seen_terminator = true;
                    break;
                }
            }
        }

        let first_label_index = first_label_index.ok_or(CdiError::MissingDiscLabel)?;
        if standard_labels.is_empty() {
            return Err(CdiError::MissingDiscLabel);
        }
        if !seen_terminator {
            return Err(CdiError::MissingTerminator);
        }

        let block_offset = first_label_index as i64 - FIRST_DISCLABEL_IDX as i64;
        debug!(block_offset, label_count = standard_labels.len(), "volume scan complete");

        let primary = &standard_labels[0];
        let path_table = PathTable::parse(
            image,
            block_offset,
            primary.path_table_address,
            primary.path_table_size,
        )?;

        Ok(Self {
            image,
            standard_labels,
            block_offset,
            path_table,
        })
    }

    pub fn standard_label(&self) -> &StandardDiscLabel {
        &self.standard_labels[0]
    }

    pub fn standard_labels(&self) -> &[StandardDiscLabel] {
        &self.standard_labels
    }

    pub fn path_table(&self) -> &PathTable {
        &self.path_table
    }

    pub fn block_offset(&self) -> i64 {
        self.block_offset
    }

    pub fn lbn_to_sector_index(&self, lbn: u32) -> u64 {
        lbn_to_index(self.block_offset, lbn)
    }

    /// Parse the directory block for a given Path Table entry.
    pub fn directory(&self, entry: &PathTableEntry) -> Result<Directory> {
        Directory::parse(self.image, self.block_offset, entry.dir_addr_lbn)
    }

    pub fn root_directory(&self) -> Result<Directory> {
        self.directory(self.path_table.root())
    }

    pub fn image(&self) -> &'a CdImage {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard_label_bytes() -> Vec<u8> {
        let mut data = vec![0u8; 2048];
        data[0] = 1;
        data[1..6].copy_from_slice(b"CD-I ");
        data[6] = 1;
        data[148..152].copy_from_slice(&17u32.to_be_bytes());
        data[136..140].copy_from_slice(&30u32.to_be_bytes());
        data
    }

    #[test]
    fn standard_disc_label_parses_fields() {
        let data = standard_label_bytes();
        let label = DiscLabel::parse(&data).unwrap();
        match label {
            DiscLabel::Standard(s) => {
                assert_eq!(s.standard_id, "CD-I");
                assert_eq!(s.path_table_address, 17);
                assert_eq!(s.path_table_size, 30);
            }
            _ => panic!("expected Standard"),
        }
    }

    #[test]
    fn terminator_label_parses() {
        let mut data = vec![0u8; 2048];
        data[0] = 255;
        data[1..6].copy_from_slice(b"CD-I ");
        let label = DiscLabel::parse(&data).unwrap();
        assert!(matches!(label, DiscLabel::Terminator(_)));
    }

    #[test]
    fn coded_label_is_unsupported() {
        let mut data = vec![0u8; 2048];
        data[0] = 2;
        assert!(matches!(
            DiscLabel::parse(&data),
            Err(CdiError::UnsupportedDiscLabel(2))
        ));
    }

    #[test]
    fn path_table_walk_boundary_scenario() {
        // Boundary scenario 2: root + MDIR (parent=1, dir_addr=19).
        let mut data = vec![0u8; 64];
        // root entry
        data[0] = 1; // name_size
        data[1] = 0; // ear_size
        data[2..6].copy_from_slice(&1u32.to_be_bytes()); // dir_addr
        data[6..8].copy_from_slice(&1u16.to_be_bytes()); // parent
        data[8] = 0; // name byte (NUL), padded to 2 bytes total name field
        // entry size = 8 + 1 + 1(pad) = 10
        let mut offset = 10;
        data[offset] = 4; // name_size
        data[offset + 1] = 0;
        data[offset + 2..offset + 6].copy_from_slice(&19u32.to_be_bytes());
        data[offset + 6..offset + 8].copy_from_slice(&1u16.to_be_bytes());
        data[offset + 8..offset + 12].copy_from_slice(b"MDIR");
        offset += 8 + 4;
        assert_eq!(offset, 22);

        // Build a minimal fake image via direct parsing of the table bytes,
        // bypassing CdImage/sector machinery (path table parsing logic is
        // exercised directly here).
        let mut entries = Vec::new();
        let mut pos = 0usize;
        let size = 22usize;
        while pos < size {
            let name_size = data[pos] as usize;
            let ear_size = data[pos + 1];
            let dir_addr_lbn = number_be(&data[pos + 2..pos + 6]) as u32;
            let parent_index = number_be(&data[pos + 6..pos + 8]) as u16;
            let name = data[pos + 8..pos + 8 + name_size].to_vec();
            let entry = PathTableEntry {
                own_index: (entries.len() + 1) as u16,
                ear_size,
                dir_addr_lbn,
                parent_index,
                name,
            };
            pos += entry.on_disk_size();
            entries.push(entry);
        }
        let table = PathTable { entries };

        assert_eq!(table.get(2).unwrap().name(), "MDIR");
        assert!(table.parent_of(table.get(2).unwrap()).unwrap().is_root());
        assert_eq!(table.full_name(table.get(2).unwrap()), "/MDIR");
    }
}
