//! CLUT / run-length palettized image decoders (C9): CLUT4/7/8 raw pixel
//! layouts and RL3/RL7 run-length coding over a shared palette.

use bytemuck::{Pod, Zeroable};

use crate::codec::image::ImageDecoderHarness;
use crate::error::{CdiError, Result};
use crate::sector::Sector;

/// One 3-byte RGB palette entry, laid out exactly as it appears on disc
/// so a palette block can be cast directly from raw bytes (matching the
/// fixed-size on-disc slab idiom used for the volume layer's records).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct RgbEntry {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// An ordered palette. Entry count depends on the encoding: 16 (CLUT4),
/// 8 (RL3), 128 (CLUT7/RL7) or 256 (CLUT8).
#[derive(Debug, Clone)]
pub struct Palette(Vec<RgbEntry>);

impl Palette {
    /// Parse a palette of exactly `len` entries from consecutive 3-byte
    /// RGB triples.
    pub fn parse(bytes: &[u8], len: usize) -> Result<Self> {
        if bytes.len() < len * 3 {
            return Err(CdiError::TruncatedImage(format!(
                "palette needs {} bytes, got {}",
                len * 3,
                bytes.len()
            )));
        }
        let entries = bytemuck::cast_slice::<u8, RgbEntry>(&bytes[..len * 3]).to_vec();
        Ok(Self(entries))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<RgbEntry> {
        self.0.get(index).copied()
    }

    pub fn entries(&self) -> &[RgbEntry] {
        &self.0
    }
}

/// The palettized raw and run-length encoding kinds this decoder covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaletteEncoding {
    Clut4,
    Clut7,
    Clut8,
    Rl3,
    Rl7,
}

impl PaletteEncoding {
    /// Palette size for this encoding, per §4.8 (and the RL3 Open
    /// Question in §9: treated as required with 8 entries).
    pub fn palette_len(&self) -> usize {
        match self {
            PaletteEncoding::Rl3 => 8,
            PaletteEncoding::Clut4 => 16,
            PaletteEncoding::Clut7 | PaletteEncoding::Rl7 => 128,
            PaletteEncoding::Clut8 => 256,
        }
    }

    /// Whether decoding a line needs run-length parsing rather than a
    /// fixed number of raw bytes.
    pub fn is_run_length(&self) -> bool {
        matches!(self, PaletteEncoding::Rl3 | PaletteEncoding::Rl7)
    }
}

/// A decoded palettized image: indices into `palette`, one per pixel,
/// row-major.
#[derive(Debug, Clone)]
pub struct IndexedImage {
    pub width: usize,
    pub height: usize,
    pub indices: Vec<u8>,
    pub palette: Palette,
}

impl IndexedImage {
    /// Compose indices with the palette into RGB triples. Colour-space
    /// conversion beyond this (e.g. YCbCr output containers) is left to
    /// the caller, per §4.8.
    pub fn to_rgb(&self) -> Result<Vec<RgbEntry>> {
        self.indices
            .iter()
            .map(|&idx| {
                self.palette.get(idx as usize).ok_or_else(|| {
                    CdiError::Corrupt(format!("palette index {idx} out of range"))
                })
            })
            .collect()
    }
}

/// Decodes CLUT4/7/8 and RL3/7 images from a sector stream, given a
/// pre-parsed palette.
pub struct ClutDecoder<'a> {
    harness: ImageDecoderHarness<'a>,
    encoding: PaletteEncoding,
    palette: Palette,
}

impl<'a> ClutDecoder<'a> {
    pub fn new(
        sectors: impl Iterator<Item = Result<Sector<'a>>> + 'a,
        encoding: PaletteEncoding,
        palette: Palette,
    ) -> Result<Self> {
        if palette.len() != encoding.palette_len() {
            return Err(CdiError::InvalidCoding(format!(
                "{:?} needs a {}-entry palette, got {}",
                encoding,
                encoding.palette_len(),
                palette.len()
            )));
        }
        Ok(Self {
            harness: ImageDecoderHarness::new(sectors)?,
            encoding,
            palette,
        })
    }

    /// Decode one `width`x`height` image. `packed` controls whether the
    /// harness preserves a mid-sector position for a tightly packed next
    /// image, or advances to the next sector boundary (§4.9).
    pub fn decode_image(&mut self, width: usize, height: usize, packed: bool) -> Result<IndexedImage> {
        let mut indices = Vec::with_capacity(width * height);
        for _ in 0..height {
            let row = self.decode_line(width)?;
            indices.extend_from_slice(&row);
        }
        self.harness.finish_image(packed)?;
        Ok(IndexedImage {
            width,
            height,
            indices,
            palette: self.palette.clone(),
        })
    }

    fn decode_line(&mut self, width: usize) -> Result<Vec<u8>> {
        match self.encoding {
            PaletteEncoding::Clut8 => self.harness.read(width),
            PaletteEncoding::Clut7 => {
                let raw = self.harness.read(width)?;
                Ok(raw.iter().map(|&b| b & 0x7F).collect())
            }
            PaletteEncoding::Clut4 => {
                let raw = self.harness.read((width + 1) / 2)?;
                let mut out = Vec::with_capacity(width);
                for byte in raw {
                    out.push((byte >> 4) & 0x0F);
                    if out.len() < width {
                        out.push(byte & 0x0F);
                    }
                }
                out.truncate(width);
                Ok(out)
            }
            PaletteEncoding::Rl3 => self.decode_rl_line(width, true),
            PaletteEncoding::Rl7 => self.decode_rl_line(width, false),
        }
    }

    /// RL3/RL7 run-length parse of one scanline, per §4.8's grammar.
    /// RL3 decodes two pixels per byte (nibbles); RL7 decodes one.
    fn decode_rl_line(&mut self, width: usize, two_pixels_per_byte: bool) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(width);
        while out.len() < width {
            let b = self.harness.read(1)?[0];
            let pixels: Vec<u8> = if two_pixels_per_byte {
                vec![(b >> 4) & 0x07, b & 0x07]
            } else {
                vec![b & 0x7F]
            };

            if b & 0x80 == 0 {
                for p in pixels {
                    if out.len() < width {
                        out.push(p);
                    }
                }
                continue;
            }

            let count_byte = self.harness.read(1)?[0];
            if count_byte == 1 {
                return Err(CdiError::Corrupt(
                    "run-length count byte 1 is reserved".into(),
                ));
            }

            if count_byte == 0 {
                // Repeat to fill the remainder of the line.
                while out.len() < width {
                    for &p in &pixels {
                        if out.len() < width {
                            out.push(p);
                        }
                    }
                }
            } else {
                for _ in 0..count_byte {
                    for &p in &pixels {
                        if out.len() < width {
                            out.push(p);
                        } else {
                            return Err(CdiError::Corrupt(
                                "run-length run overshoots line width".into(),
                            ));
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}
