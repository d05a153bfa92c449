//! Image decoder harness (C10): pulls bytes across a filtered sector
//! sequence for the video codecs, tracking the current sector's
//! remaining payload and sector-alignment for packed vs unpacked images.

use crate::error::{CdiError, Result};
use crate::sector::Sector;

/// Pulls bytes on demand from a sector iterator, buffering the current
/// sector's remaining payload. Used by the video codecs so they don't
/// each reimplement sector-boundary bookkeeping.
pub struct ImageDecoderHarness<'a> {
    sectors: Box<dyn Iterator<Item = Result<Sector<'a>>> + 'a>,
    current: Option<Sector<'a>>,
    pos: usize,
}

impl<'a> ImageDecoderHarness<'a> {
    pub fn new(sectors: impl Iterator<Item = Result<Sector<'a>>> + 'a) -> Result<Self> {
        let mut harness = Self {
            sectors: Box::new(sectors),
            current: None,
            pos: 0,
        };
        harness.advance()?;
        Ok(harness)
    }

    fn advance(&mut self) -> Result<()> {
        match self.sectors.next() {
            Some(Ok(sector)) => {
                self.current = Some(sector);
                self.pos = 0;
            }
            Some(Err(e)) => return Err(e),
            None => self.current = None,
        }
        Ok(())
    }

    /// Pull exactly `n` bytes, crossing sector boundaries as needed.
    /// Running out of sectors mid-read is fatal.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let current = self.current.ok_or_else(|| {
                CdiError::TruncatedImage(format!(
                    "image data exhausted with {} bytes still needed",
                    n - out.len()
                ))
            })?;
            let available = current.data_size() - self.pos;
            let take = (n - out.len()).min(available);
            out.extend_from_slice(current.data(self.pos..self.pos + take));
            self.pos += take;
            if self.pos >= current.data_size() {
                self.advance()?;
            }
        }
        Ok(out)
    }

    /// Whether the harness is positioned partway through a sector.
    pub fn is_mid_sector(&self) -> bool {
        self.pos != 0
    }

    /// Whether the underlying sector sequence is exhausted.
    pub fn is_eof(&self) -> bool {
        self.current.is_none()
    }

    /// Call once a decoder has finished one image. When `packed` is
    /// false, a harness left mid-sector advances to the next sector
    /// boundary before the next image starts; when `packed` is true,
    /// the position is preserved so the next image can begin immediately
    /// after this one within the same sector.
    pub fn finish_image(&mut self, packed: bool) -> Result<()> {
        if !packed && self.is_mid_sector() {
            self.advance()?;
        }
        Ok(())
    }
}
