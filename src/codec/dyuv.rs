//! DYUV (delta-YUV) video decoder (C8): DPCM luma/chroma decode with
//! half-resolution chroma planes linearly interpolated back to full width.

use crate::codec::image::ImageDecoderHarness;
use crate::error::Result;
use crate::sector::Sector;

/// DPCM quantization table, indexed by a 4-bit delta nibble.
const QUANT_TABLE: [u8; 16] = [
    0, 1, 4, 9, 16, 27, 44, 79, 128, 177, 212, 229, 240, 247, 252, 255,
];

fn dpcm(prev: u8, delta: u8) -> u8 {
    prev.wrapping_add(QUANT_TABLE[delta as usize])
}

/// Decoded frame: a full-resolution Y plane and full-width-interpolated
/// U/V planes.
#[derive(Debug, Clone)]
pub struct YuvImage {
    pub width: usize,
    pub height: usize,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct DyuvOptions {
    pub width: usize,
    pub height: usize,
    /// CD-I encoders commonly emit a leading `0x00 0x00` pair before the
    /// first real data pair of an image; skip it when present.
    pub skip_leading_zero_pairs: bool,
}

impl Default for DyuvOptions {
    fn default() -> Self {
        Self {
            width: 384,
            height: 240,
            skip_leading_zero_pairs: true,
        }
    }
}

pub struct DyuvDecoder<'a> {
    harness: ImageDecoderHarness<'a>,
    options: DyuvOptions,
    pending: Option<[u8; 2]>,
}

impl<'a> DyuvDecoder<'a> {
    pub fn new(
        sectors: impl Iterator<Item = Result<Sector<'a>>> + 'a,
        options: DyuvOptions,
    ) -> Result<Self> {
        Ok(Self {
            harness: ImageDecoderHarness::new(sectors)?,
            options,
            pending: None,
        })
    }

    fn next_pair(&mut self) -> Result<[u8; 2]> {
        if let Some(pair) = self.pending.take() {
            return Ok(pair);
        }
        let bytes = self.harness.read(2)?;
        Ok([bytes[0], bytes[1]])
    }

    /// Decode one image. `initial_values(row)` supplies the (Y, U, V)
    /// predictor seed for each line, per §4.7.
    pub fn decode_image(
        &mut self,
        mut initial_values: impl FnMut(usize) -> (u8, u8, u8),
    ) -> Result<YuvImage> {
        self.harness.finish_image(false)?;

        if self.options.skip_leading_zero_pairs {
            loop {
                let pair = self.next_pair()?;
                if pair != [0, 0] {
                    self.pending = Some(pair);
                    break;
                }
            }
        }

        let width = self.options.width;
        let height = self.options.height;
        let half_width = width / 2;

        let mut y_plane = vec![0u8; width * height];
        let mut u_half = vec![0u8; half_width * height];
        let mut v_half = vec![0u8; half_width * height];

        for row in 0..height {
            let (mut y_prev, mut u_prev, mut v_prev) = initial_values(row);
            for col in 0..half_width {
                let [b0, b1] = self.next_pair()?;
                let d_u = (b0 >> 4) & 0x0F;
                let d_y0 = b0 & 0x0F;
                let d_v = (b1 >> 4) & 0x0F;
                let d_y1 = b1 & 0x0F;

                y_prev = dpcm(y_prev, d_y0);
                y_plane[row * width + col * 2] = y_prev;
                u_prev = dpcm(u_prev, d_u);
                u_half[row * half_width + col] = u_prev;
                y_prev = dpcm(y_prev, d_y1);
                y_plane[row * width + col * 2 + 1] = y_prev;
                v_prev = dpcm(v_prev, d_v);
                v_half[row * half_width + col] = v_prev;
            }
        }

        let u = upsample(&u_half, half_width, height);
        let v = upsample(&v_half, half_width, height);

        Ok(YuvImage {
            width,
            height,
            y: y_plane,
            u,
            v,
        })
    }
}

/// Linearly interpolate a half-width plane back to full width. The last
/// column replicates since there's no successor sample to interpolate
/// toward.
fn upsample(half: &[u8], half_width: usize, height: usize) -> Vec<u8> {
    let width = half_width * 2;
    let mut full = vec![0u8; width * height];
    for row in 0..height {
        for x in 0..half_width {
            let v0 = half[row * half_width + x] as u16;
            let v1 = if x + 1 < half_width {
                half[row * half_width + x + 1] as u16
            } else {
                v0
            };
            full[row * width + 2 * x] = v0 as u8;
            full[row * width + 2 * x + 1] = ((v0 + v1) / 2) as u8;
        }
    }
    full
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector::{CdImage, RAW_SECTOR_SIZE};
    use std::io::Write;

    fn build_image(data: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut sector = vec![0u8; RAW_SECTOR_SIZE];
        sector[2] = 0x08;
        sector[6] = 0x08;
        sector[16..16 + data.len()].copy_from_slice(data);
        file.write_all(&sector).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn one_line_delta_decode() {
        // width=4, initial (0,0,0), bytes [0x10,0x00,0x10,0x00].
        let file = build_image(&[0x10, 0x00, 0x10, 0x00]);
        let image = CdImage::open(file.path()).unwrap();
        let options = DyuvOptions {
            width: 4,
            height: 1,
            skip_leading_zero_pairs: false,
        };
        let mut decoder = DyuvDecoder::new(image.sectors().map(Ok), options).unwrap();
        let frame = decoder.decode_image(|_| (0, 0, 0)).unwrap();

        assert_eq!(frame.y, vec![0, 0, 0, 0]);
        assert_eq!(frame.v, vec![0, 0, 0, 0]);
        // u_half = [1, 2] -> interpolated [1, 1, 2, 2] (last column replicates).
        assert_eq!(frame.u, vec![1, 1, 2, 2]);
    }

    #[test]
    fn all_zero_deltas_hold_initial_value() {
        let file = build_image(&[0x00, 0x00, 0x00, 0x00]);
        let image = CdImage::open(file.path()).unwrap();
        let options = DyuvOptions {
            width: 4,
            height: 1,
            skip_leading_zero_pairs: false,
        };
        let mut decoder = DyuvDecoder::new(image.sectors().map(Ok), options).unwrap();
        let frame = decoder.decode_image(|_| (0, 0, 0)).unwrap();
        assert!(frame.y.iter().all(|&b| b == 0));
        assert!(frame.u.iter().all(|&b| b == 0));
        assert!(frame.v.iter().all(|&b| b == 0));
    }

    #[test]
    fn leading_zero_pair_is_skipped() {
        let file = build_image(&[0x00, 0x00, 0x10, 0x00, 0x10, 0x00]);
        let image = CdImage::open(file.path()).unwrap();
        let options = DyuvOptions {
            width: 4,
            height: 1,
            skip_leading_zero_pairs: true,
        };
        let mut decoder = DyuvDecoder::new(image.sectors().map(Ok), options).unwrap();
        let frame = decoder.decode_image(|_| (0, 0, 0)).unwrap();
        assert_eq!(frame.u, vec![1, 1, 2, 2]);
    }
}
