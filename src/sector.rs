//! Sector-level read engine (C2): locates, indexes and caches sectors,
//! and decodes each sector's 8-byte sub-header and coding byte.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::ops::Range;
use std::path::Path;

use bitflags::bitflags;
use memmap2::Mmap;
use tracing::{debug, trace, warn};

use crate::error::{CdiError, Result};

/// Raw, unframed sector size: 8 sub-header bytes + 2328 payload/ECC bytes.
pub const RAW_SECTOR_SIZE: usize = 2336;
/// 16-byte sync/address/mode prefix used when an image is framed with CD headers.
pub const CD_HEADER_SIZE: usize = 16;
/// Framed sector size: `CD_HEADER_SIZE + RAW_SECTOR_SIZE`.
pub const FRAMED_SECTOR_SIZE: usize = CD_HEADER_SIZE + RAW_SECTOR_SIZE;

const SUB_HEADER_SIZE: usize = 8;
const FORM1_DATA_SIZE: usize = 2048;
const FORM2_DATA_SIZE: usize = 2324;

/// Sync pattern identifying a CD-header-framed image: `00 FF*10 00`.
const SYNC_PATTERN: [u8; 12] = [
    0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00,
];

bitflags! {
    /// Sub-mode bit flags (sector offset 2, or 6 for the redundant copy).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SubMode: u8 {
        const END_OF_RECORD = 0x01;
        const VIDEO         = 0x02;
        const AUDIO         = 0x04;
        const DATA          = 0x08;
        const TRIGGER       = 0x10;
        const FORM2         = 0x20;
        const REAL_TIME     = 0x40;
        const END_OF_FILE   = 0x80;
    }
}

impl SubMode {
    pub fn is_end_of_record(&self) -> bool {
        self.contains(SubMode::END_OF_RECORD)
    }
    pub fn is_video(&self) -> bool {
        self.contains(SubMode::VIDEO)
    }
    pub fn is_audio(&self) -> bool {
        self.contains(SubMode::AUDIO)
    }
    pub fn is_data(&self) -> bool {
        self.contains(SubMode::DATA)
    }
    pub fn is_trigger(&self) -> bool {
        self.contains(SubMode::TRIGGER)
    }
    pub fn is_form2(&self) -> bool {
        self.contains(SubMode::FORM2)
    }
    pub fn is_form1(&self) -> bool {
        !self.is_form2()
    }
    pub fn is_real_time(&self) -> bool {
        self.contains(SubMode::REAL_TIME)
    }
    pub fn is_end_of_file(&self) -> bool {
        self.contains(SubMode::END_OF_FILE)
    }
    /// Neither video, audio nor data: an empty sector.
    pub fn is_empty_sector(&self) -> bool {
        !self.is_video() && !self.is_audio() && !self.is_data()
    }
}

/// An 8-byte CD-I sub-header, with its redundant copy already reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubHeader {
    pub file_number: u8,
    pub channel_number: u8,
    pub submode: SubMode,
    pub coding: u8,
}

impl SubHeader {
    /// Parse from an 8-byte slice (bytes 0..3 primary, 4..7 redundant).
    /// A mismatch between the two halves is tolerated (§3) unless `strict`
    /// is set, in which case it is a hard `InvalidImage` error. The caller
    /// always passes `strict = true` for the header sector (index 0).
    fn parse(bytes: &[u8; 8], strict: bool) -> Result<(Self, bool)> {
        let primary = Self {
            file_number: bytes[0],
            channel_number: bytes[1],
            submode: SubMode::from_bits_truncate(bytes[2]),
            coding: bytes[3],
        };
        let redundant_matches =
            bytes[0] == bytes[4] && bytes[1] == bytes[5] && bytes[2] == bytes[6] && bytes[3] == bytes[7];

        if !redundant_matches && strict {
            return Err(CdiError::InvalidImage(
                "sub-header redundant copy does not match primary copy".into(),
            ));
        }

        Ok((primary, redundant_matches))
    }

    /// Interpret the coding byte as audio coding information.
    pub fn audio_coding(&self) -> AudioCoding {
        AudioCoding(self.coding)
    }

    /// Interpret the coding byte as video coding information.
    pub fn video_coding(&self) -> VideoCoding {
        VideoCoding(self.coding)
    }
}

/// Audio interpretation of the coding byte (valid when `submode.is_audio()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioCoding(pub u8);

impl AudioCoding {
    /// Raw 2-bit channel-layout field (0=mono, 1=stereo; 2,3 reserved).
    pub fn channel_layout_bits(&self) -> u8 {
        self.0 & 0x03
    }
    pub fn is_stereo(&self) -> Result<bool> {
        match self.channel_layout_bits() {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CdiError::InvalidCoding(format!(
                "reserved audio channel-layout value {other}"
            ))),
        }
    }
    pub fn sample_rate_hz(&self) -> Result<u32> {
        match (self.0 >> 2) & 0x03 {
            0 => Ok(37_800),
            1 => Ok(18_900),
            other => Err(CdiError::InvalidCoding(format!(
                "reserved audio sample-rate value {other}"
            ))),
        }
    }
    /// Sample depth in bits (4 = Level B/C, 8 = Level A).
    pub fn sample_depth_bits(&self) -> Result<u8> {
        match (self.0 >> 4) & 0x03 {
            0 => Ok(4),
            1 => Ok(8),
            other => Err(CdiError::InvalidCoding(format!(
                "reserved audio sample-depth value {other}"
            ))),
        }
    }
    pub fn has_emphasis(&self) -> bool {
        self.0 & 0x40 != 0
    }
}

/// The ten video encodings a CD-I coding byte may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEncoding {
    Clut4,
    Clut7,
    Clut8,
    Rl3,
    Rl7,
    Dyuv,
    Rgb555Lower,
    Rgb555Upper,
    Qhy,
    Mpeg,
}

impl VideoEncoding {
    fn from_bits(bits: u8) -> Result<Self> {
        Ok(match bits {
            0 => VideoEncoding::Clut4,
            1 => VideoEncoding::Clut7,
            2 => VideoEncoding::Clut8,
            3 => VideoEncoding::Rl3,
            4 => VideoEncoding::Rl7,
            5 => VideoEncoding::Dyuv,
            6 => VideoEncoding::Rgb555Lower,
            7 => VideoEncoding::Rgb555Upper,
            8 => VideoEncoding::Qhy,
            15 => VideoEncoding::Mpeg,
            other => {
                return Err(CdiError::InvalidCoding(format!(
                    "reserved video encoding value {other}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoResolution {
    Normal,
    Double,
    High,
}

/// Video interpretation of the coding byte (valid when `submode.is_video()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoCoding(pub u8);

impl VideoCoding {
    /// Bit 7: application-specific coding, in which case the remaining
    /// bits carry no defined meaning.
    pub fn is_application_specific(&self) -> bool {
        self.0 & 0x80 != 0
    }
    pub fn encoding(&self) -> Result<VideoEncoding> {
        if self.is_application_specific() {
            return Err(CdiError::InvalidCoding(
                "coding byte is application-specific; encoding is undefined".into(),
            ));
        }
        VideoEncoding::from_bits(self.0 & 0x0F)
    }
    pub fn resolution(&self) -> Result<VideoResolution> {
        match (self.0 >> 4) & 0x03 {
            0 => Ok(VideoResolution::Normal),
            1 => Ok(VideoResolution::Double),
            3 => Ok(VideoResolution::High),
            other => Err(CdiError::InvalidCoding(format!(
                "reserved video resolution value {other}"
            ))),
        }
    }
    pub fn odd_lines(&self) -> bool {
        self.0 & 0x40 != 0
    }
}

#[derive(Debug, Clone, Copy)]
struct SectorMeta {
    sub_header: SubHeader,
    data_size: usize,
    data_offset: usize,
}

/// Controls framing detection and tolerance when opening an image.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    with_cd_headers: Option<bool>,
    strict_subheader: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force sector framing instead of autodetecting from the sync pattern.
    pub fn with_cd_headers(mut self, value: Option<bool>) -> Self {
        self.with_cd_headers = value;
        self
    }

    /// When true, a mismatched redundant sub-header copy on any sector is a
    /// hard `InvalidImage` error instead of a logged warning. Default false,
    /// matching real-world discs that violate the redundancy invariant —
    /// except on the header sector (index 0), whose redundancy is always
    /// enforced regardless of this setting (§4.1/§7).
    pub fn strict_subheader(mut self, value: bool) -> Self {
        self.strict_subheader = value;
        self
    }

    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<CdImage> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let framed = match self.with_cd_headers {
            Some(v) => v,
            None => mmap.len() >= 12 && mmap[0..12] == SYNC_PATTERN,
        };

        let stride = if framed {
            FRAMED_SECTOR_SIZE
        } else {
            RAW_SECTOR_SIZE
        };
        let sub_header_offset = if framed { CD_HEADER_SIZE } else { 0 };

        debug!(framed, stride, "opened CD-I image");

        let image = CdImage {
            mmap,
            stride,
            sub_header_offset,
            strict_subheader: self.strict_subheader,
            cache: RefCell::new(HashMap::new()),
        };

        // Validate the first sector eagerly, per §4.1: a corrupt or
        // mis-detected framing should fail at open time, not on first use.
        if image.sector_count() > 0 {
            image.sector(0)?;
        }

        Ok(image)
    }
}

/// A memory-mapped CD-I disc image.
pub struct CdImage {
    mmap: Mmap,
    stride: usize,
    sub_header_offset: usize,
    strict_subheader: bool,
    cache: RefCell<HashMap<u64, SectorMeta>>,
}

impl CdImage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        OpenOptions::new().open(path)
    }

    pub fn with_cd_headers(&self) -> bool {
        self.stride == FRAMED_SECTOR_SIZE
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn sector_count(&self) -> u64 {
        (self.mmap.len() / self.stride) as u64
    }

    fn compute_meta(&self, index: u64) -> Result<SectorMeta> {
        let start = index as usize * self.stride;
        let sub_header_start = start + self.sub_header_offset;
        let sub_header_end = sub_header_start + SUB_HEADER_SIZE;
        if sub_header_end > self.mmap.len() {
            return Err(CdiError::Eof {
                index,
                total: self.sector_count(),
            });
        }

        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.mmap[sub_header_start..sub_header_end]);
        // The header sector's redundancy is always enforced (§4.1/§7); only
        // sectors beyond it fall back to the opt-in `strict_subheader` (§8).
        let strict = index == 0 || self.strict_subheader;
        let (sub_header, redundant_matches) = SubHeader::parse(&raw, strict)?;

        if !redundant_matches {
            warn!(index, "sub-header redundant copy mismatch");
        }

        let data_size = if sub_header.submode.is_form1() {
            FORM1_DATA_SIZE
        } else {
            FORM2_DATA_SIZE
        };
        let data_offset = sub_header_end;

        Ok(SectorMeta {
            sub_header,
            data_size,
            data_offset,
        })
    }

    /// Fetch (and memoize) the sector at `index`.
    pub fn sector(&self, index: u64) -> Result<Sector<'_>> {
        if let Some(meta) = self.cache.borrow().get(&index) {
            trace!(index, "sector cache hit");
            return Ok(Sector {
                index,
                meta: *meta,
                image: self,
            });
        }

        let meta = self.compute_meta(index)?;
        trace!(index, "sector cache miss, parsed sub-header");
        self.cache.borrow_mut().insert(index, meta);

        Ok(Sector {
            index,
            meta,
            image: self,
        })
    }

    /// A lazy sequence of every sector in the image, from index 0.
    pub fn sectors(&self) -> SectorIter<'_> {
        SectorIter {
            image: self,
            next: 0,
        }
    }

    /// A lazy sequence of every sector in the image, starting at `start`.
    pub fn sectors_from(&self, start: u64) -> SectorIter<'_> {
        SectorIter {
            image: self,
            next: start,
        }
    }
}

/// A view onto one sector's sub-header and payload.
#[derive(Clone, Copy)]
pub struct Sector<'a> {
    index: u64,
    meta: SectorMeta,
    image: &'a CdImage,
}

impl<'a> Sector<'a> {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn sub_header(&self) -> SubHeader {
        self.meta.sub_header
    }

    /// Usable data size: 2048 (Form 1) or 2324 (Form 2).
    pub fn data_size(&self) -> usize {
        self.meta.data_size
    }

    /// Slice of the sector's payload data in `range`, relative to the
    /// start of the payload (not the sector).
    pub fn data(&self, range: Range<usize>) -> &'a [u8] {
        let start = self.meta.data_offset + range.start;
        let end = self.meta.data_offset + range.end;
        &self.image.mmap[start..end]
    }

    /// The entire usable payload.
    pub fn full_data(&self) -> &'a [u8] {
        self.data(0..self.meta.data_size)
    }
}

impl<'a> std::fmt::Debug for Sector<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sector")
            .field("index", &self.index)
            .field("sub_header", &self.meta.sub_header)
            .field("data_size", &self.meta.data_size)
            .finish()
    }
}

/// Lazy iterator over every sector in an image, from index 0 until EOF.
pub struct SectorIter<'a> {
    image: &'a CdImage,
    next: u64,
}

impl<'a> Iterator for SectorIter<'a> {
    type Item = Sector<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.image.sector_count() {
            return None;
        }
        let sector = self.image.sector(self.next).ok()?;
        self.next += 1;
        Some(sector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_raw_image(sectors: &[(u8, u8, u8, u8)]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for &(file_number, channel, submode, coding) in sectors {
            let mut sector = vec![0u8; RAW_SECTOR_SIZE];
            sector[0] = file_number;
            sector[1] = channel;
            sector[2] = submode;
            sector[3] = coding;
            sector[4] = file_number;
            sector[5] = channel;
            sector[6] = submode;
            sector[7] = coding;
            file.write_all(&sector).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn raw_framing_is_detected_when_sync_absent() {
        let file = write_raw_image(&[(0, 0, 0x08, 0)]);
        let image = CdImage::open(file.path()).unwrap();
        assert!(!image.with_cd_headers());
        assert_eq!(image.sector_count(), 1);
    }

    #[test]
    fn framed_detection_via_sync_pattern() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for _ in 0..2 {
            let mut sector = vec![0u8; FRAMED_SECTOR_SIZE];
            sector[0..12].copy_from_slice(&SYNC_PATTERN);
            sector[12] = 0x00;
            sector[13] = 0x02;
            sector[14] = 0x00;
            sector[15] = 0x20; // mode
            sector[16] = 0;
            sector[17] = 0;
            sector[18] = 0x08; // data submode
            sector[19] = 0;
            sector[20] = 0;
            sector[21] = 0;
            sector[22] = 0x08;
            sector[23] = 0;
            file.write_all(&sector).unwrap();
        }
        file.flush().unwrap();

        let image = CdImage::open(file.path()).unwrap();
        assert!(image.with_cd_headers());
        assert_eq!(image.sector_count(), 2);
    }

    #[test]
    fn form1_vs_form2_data_size() {
        let file = write_raw_image(&[(0, 0, 0x08, 0), (0, 0, 0x08 | 0x20, 0)]);
        let image = CdImage::open(file.path()).unwrap();
        let s0 = image.sector(0).unwrap();
        let s1 = image.sector(1).unwrap();
        assert_eq!(s0.data_size(), 2048);
        assert!(s0.sub_header().submode.is_form1());
        assert_eq!(s1.data_size(), 2324);
        assert!(s1.sub_header().submode.is_form2());
    }

    #[test]
    fn header_sector_redundant_mismatch_is_invalid_image() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut sector = vec![0u8; RAW_SECTOR_SIZE];
        sector[0] = 1;
        sector[4] = 2; // mismatch
        file.write_all(&sector).unwrap();
        file.flush().unwrap();

        let image = CdImage::open(file.path());
        assert!(matches!(image, Err(CdiError::InvalidImage(_))));
    }

    #[test]
    fn later_sector_redundant_mismatch_is_tolerated_by_default() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; RAW_SECTOR_SIZE]).unwrap(); // header sector, clean
        let mut mismatched = vec![0u8; RAW_SECTOR_SIZE];
        mismatched[0] = 1;
        mismatched[4] = 2; // mismatch
        file.write_all(&mismatched).unwrap();
        file.flush().unwrap();

        let image = CdImage::open(file.path()).unwrap();
        assert!(image.sector(1).is_ok());
    }

    #[test]
    fn audio_coding_decodes_rate_and_depth() {
        // stereo(1) | rate=18900(1<<2) | depth=8bit(1<<4)
        let coding = AudioCoding(0b0001_0101);
        assert!(coding.is_stereo().unwrap());
        assert_eq!(coding.sample_rate_hz().unwrap(), 18_900);
        assert_eq!(coding.sample_depth_bits().unwrap(), 8);
    }

    #[test]
    fn video_coding_decodes_encoding_kind() {
        let coding = VideoCoding(0x05); // DYUV
        assert_eq!(coding.encoding().unwrap(), VideoEncoding::Dyuv);
        assert_eq!(coding.resolution().unwrap(), VideoResolution::Normal);
    }
}
