//! CDFM demuxer (C5): the Compact Disc File Manager playback primitive —
//! seek/play over a file's (or the whole image's) sector sequence,
//! filtering by channel mask and counting records.

use crate::error::{CdiError, Result};
use crate::file::{FileRecord, SectorsOf};
use crate::sector::{CdImage, Sector, SectorIter};

const BYTES_PER_SEEK_UNIT: u64 = 2048;

/// What a `Cdfm` plays back: a single file's sector sequence (filtered by
/// file-number), or the whole image. Modeled as a sealed variant instead
/// of runtime type inspection (§9).
enum Source {
    File { file_number: u8, start_index: u64 },
    WholeImage,
}

impl Source {
    fn start_index(&self) -> u64 {
        match self {
            Source::File { start_index, .. } => *start_index,
            Source::WholeImage => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CdfmState {
    Idle,
    Playing,
    Exhausted,
}

/// Inner sector iterator, over either a file or the whole image.
enum Inner<'a> {
    File(SectorsOf<'a>),
    WholeImage(SectorIter<'a>),
}

impl<'a> Iterator for Inner<'a> {
    type Item = Result<Sector<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Inner::File(it) => it.next(),
            Inner::WholeImage(it) => it.next().map(Ok),
        }
    }
}

fn make_inner<'a>(image: &'a CdImage, source: &Source, start: u64) -> Inner<'a> {
    match source {
        Source::File { file_number, .. } => Inner::File(SectorsOf::new(image, start, *file_number)),
        Source::WholeImage => Inner::WholeImage(image.sectors_from(start)),
    }
}

/// Seek/play primitive over a source's sector sequence.
pub struct Cdfm<'a> {
    image: &'a CdImage,
    source: Source,
    inner: Inner<'a>,
    state: CdfmState,
}

impl<'a> Cdfm<'a> {
    /// Play back `file`, whose `first_lbn` has already been resolved to
    /// `start_index` by the volume layer.
    pub fn for_file(image: &'a CdImage, file: &FileRecord, start_index: u64) -> Self {
        let source = Source::File {
            file_number: file.file_number,
            start_index,
        };
        let inner = make_inner(image, &source, source.start_index());
        Self {
            image,
            source,
            inner,
            state: CdfmState::Idle,
        }
    }

    /// Play back every sector of the image, unfiltered by file-number.
    pub fn for_whole_image(image: &'a CdImage) -> Self {
        let source = Source::WholeImage;
        let inner = make_inner(image, &source, 0);
        Self {
            image,
            source,
            inner,
            state: CdfmState::Idle,
        }
    }

    /// Rewind the sector iterator to the source's first sector.
    pub fn reset(&mut self) {
        let start = self.source.start_index();
        self.inner = make_inner(self.image, &self.source, start);
        self.state = CdfmState::Idle;
    }

    /// Rewind, then advance `position / 2048` sectors (positions are
    /// measured in logical bytes, 2048 per sector regardless of Form).
    pub fn seek(&mut self, position: u64) -> Result<()> {
        self.reset();
        let sectors_to_advance = position / BYTES_PER_SEEK_UNIT;
        for _ in 0..sectors_to_advance {
            match self.inner.next() {
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
                None => {
                    self.state = CdfmState::Exhausted;
                    return Err(CdiError::SeekPastEnd(position));
                }
            }
        }
        Ok(())
    }

    /// Yield sectors in order, skipping any whose channel number is not
    /// set in `channel_mask`; decrement `num_records` on the EOR bit of a
    /// *yielded* sector; stop when it reaches 0. `num_records = -1` means
    /// "until exhaustion".
    pub fn play(&mut self, channel_mask: u32, num_records: i64) -> PlayIter<'_, 'a> {
        self.state = CdfmState::Playing;
        PlayIter {
            cdfm: self,
            channel_mask,
            remaining: num_records,
        }
    }
}

/// Iterator returned by [`Cdfm::play`].
pub struct PlayIter<'c, 'a> {
    cdfm: &'c mut Cdfm<'a>,
    channel_mask: u32,
    remaining: i64,
}

impl<'c, 'a> Iterator for PlayIter<'c, 'a> {
    type Item = Result<Sector<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            self.cdfm.state = CdfmState::Exhausted;
            return None;
        }

        loop {
            match self.cdfm.inner.next() {
                Some(Ok(sector)) => {
                    let channel_number = sector.sub_header().channel_number;
                    let in_mask = (channel_number as u32) < 32
                        && (self.channel_mask >> channel_number) & 1 != 0;
                    if !in_mask {
                        continue;
                    }

                    if self.remaining > 0 && sector.sub_header().submode.is_end_of_record() {
                        self.remaining -= 1;
                    }

                    self.cdfm.state = CdfmState::Playing;
                    return Some(Ok(sector));
                }
                Some(Err(e)) => {
                    self.cdfm.state = CdfmState::Exhausted;
                    return Some(Err(e));
                }
                None => {
                    self.cdfm.state = CdfmState::Exhausted;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector::RAW_SECTOR_SIZE;
    use std::io::Write;

    fn build_image(channels: &[(u8, bool)]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for &(channel, eor) in channels {
            let mut sector = vec![0u8; RAW_SECTOR_SIZE];
            let submode = if eor { 0x01 } else { 0x00 };
            sector[1] = channel;
            sector[2] = submode;
            sector[5] = channel;
            sector[6] = submode;
            file.write_all(&sector).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn channel_mask_filters_and_counts_records() {
        // channels [0,1,2,0,2,0], EOR only on the channel-2 sector (index 2).
        let file = build_image(&[(0, false), (1, false), (2, true), (0, false), (2, false), (0, false)]);
        let image = CdImage::open(file.path()).unwrap();
        let mut cdfm = Cdfm::for_whole_image(&image);

        // mask = 0b101 => channels 0 and 2 allowed, channel 1 excluded.
        let yielded: Vec<u64> = cdfm
            .play(0b101, 1)
            .map(|s| s.unwrap().index())
            .collect();
        assert_eq!(yielded, vec![0, 2]);
    }

    #[test]
    fn seek_past_end_errors() {
        let file = build_image(&[(0, false)]);
        let image = CdImage::open(file.path()).unwrap();
        let mut cdfm = Cdfm::for_whole_image(&image);
        assert!(matches!(cdfm.seek(4096), Err(CdiError::SeekPastEnd(4096))));
    }

    #[test]
    fn num_records_minus_one_plays_until_exhaustion() {
        let file = build_image(&[(0, true), (0, true), (0, false)]);
        let image = CdImage::open(file.path()).unwrap();
        let mut cdfm = Cdfm::for_whole_image(&image);
        let yielded: Vec<u64> = cdfm.play(u32::MAX, -1).map(|s| s.unwrap().index()).collect();
        assert_eq!(yielded, vec![0, 1, 2]);
    }
}
