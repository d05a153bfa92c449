//! ADPCM audio decoder (C7): per-sector CD-I ADPCM decoding with
//! per-channel delay-line filter state.

use crate::error::{CdiError, Result};

/// Bytes per sound group (16-byte parameter header + 112 data bytes).
pub const GROUP_SIZE: usize = 128;
/// Sound groups per audio sector.
pub const SOUND_GROUPS_PER_SECTOR: usize = 18;
/// Samples decoded per unit's 28-sample run.
pub const SAMPLES_PER_UNIT: usize = 28;
/// Total audio payload size of a sector: `SOUND_GROUPS_PER_SECTOR * GROUP_SIZE`.
pub const AUDIO_DATA_SIZE: usize = SOUND_GROUPS_PER_SECTOR * GROUP_SIZE;

const HEADER_SIZE: usize = 16;
const DATA_SIZE: usize = GROUP_SIZE - HEADER_SIZE;

/// Filter-coefficient table indexed by the parameter byte's high nibble (F).
const FILTER_TABLE: [(f64, f64); 4] = [
    (0.0, 0.0),
    (0.9375, 0.0),
    (1.796875, -0.8125),
    (1.53125, -0.859375),
];

/// Per-channel ADPCM delay-line filter.
#[derive(Debug, Clone, Copy)]
pub struct AdpcmFilter {
    d1: i32,
    d2: i32,
    g: i32,
    k0: f64,
    k1: f64,
}

impl AdpcmFilter {
    pub fn new() -> Self {
        Self {
            d1: 0,
            d2: 0,
            g: 0,
            k0: 0.0,
            k1: 0.0,
        }
    }

    /// Select gain `g` and filter coefficients from the 4-entry table
    /// indexed by `f`.
    pub fn set_params(&mut self, g: i32, f: u8) -> Result<()> {
        let (k0, k1) = *FILTER_TABLE
            .get(f as usize)
            .ok_or_else(|| CdiError::InvalidCoding(format!("reserved ADPCM filter value F={f}")))?;
        self.g = g;
        self.k0 = k0;
        self.k1 = k1;
        Ok(())
    }

    /// `output = clip(d * 2^G + d1*K0 + d2*K1)`, then shift the delay line.
    /// Truncates toward zero rather than rounding, matching the reference
    /// decoder's `int(output)` (`original_source/cdi/formats/audio.py`).
    pub fn propagate(&mut self, d: i32) -> i16 {
        let scaled = d as f64 * 2f64.powi(self.g);
        let predicted = scaled + self.d1 as f64 * self.k0 + self.d2 as f64 * self.k1;
        let clipped = predicted.trunc().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        self.d2 = self.d1;
        self.d1 = clipped;
        clipped
    }
}

impl Default for AdpcmFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn sign_extend_nibble(n: u8) -> i32 {
    if n >= 8 {
        n as i32 - 16
    } else {
        n as i32
    }
}

/// Decodes CD-I ADPCM audio sectors into per-channel PCM samples.
///
/// A sound group's 8 (4-bit) or 4 (8-bit) units are each an independent
/// 28-sample run with its own gain/filter parameters; in stereo, even
/// units feed the left decoder and odd units the right, mirroring each
/// unit's own persistent delay-line state across sectors.
pub struct AudioDecoder {
    channels: Vec<AdpcmFilter>,
    stereo: bool,
    sample_depth: u8,
}

impl AudioDecoder {
    pub fn new(stereo: bool, sample_depth: u8) -> Result<Self> {
        if sample_depth != 4 && sample_depth != 8 {
            return Err(CdiError::InvalidCoding(format!(
                "unsupported ADPCM sample depth {sample_depth}"
            )));
        }
        let channel_count = if stereo { 2 } else { 1 };
        Ok(Self {
            channels: (0..channel_count).map(|_| AdpcmFilter::new()).collect(),
            stereo,
            sample_depth,
        })
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Decode one sector's audio payload (18 sound groups of 128 bytes)
    /// into one PCM sample vector per channel.
    pub fn decode_sector(&mut self, data: &[u8]) -> Result<Vec<Vec<i16>>> {
        if data.len() < AUDIO_DATA_SIZE {
            return Err(CdiError::TruncatedImage(format!(
                "ADPCM sector payload too short: {} < {AUDIO_DATA_SIZE}",
                data.len()
            )));
        }

        let mut out: Vec<Vec<i16>> = (0..self.channels.len()).map(|_| Vec::new()).collect();
        for group_idx in 0..SOUND_GROUPS_PER_SECTOR {
            let group = &data[group_idx * GROUP_SIZE..(group_idx + 1) * GROUP_SIZE];
            self.decode_group(group, &mut out)?;
        }
        Ok(out)
    }

    fn decode_group(&mut self, group: &[u8], out: &mut [Vec<i16>]) -> Result<()> {
        let header = &group[0..HEADER_SIZE];
        let data = &group[HEADER_SIZE..HEADER_SIZE + DATA_SIZE];

        let params = self.extract_params(header)?;
        let num_units = params.len();

        for (u, &param) in params.iter().enumerate() {
            let f = (param >> 4) & 0x0F;
            let r = (param & 0x0F) as i32;
            let g = if self.sample_depth == 8 { 8 - r } else { 12 - r };

            let channel_idx = if self.stereo { u % 2 } else { 0 };
            self.channels[channel_idx].set_params(g, f)?;

            for k in 0..SAMPLES_PER_UNIT {
                let d = if self.sample_depth == 8 {
                    data[4 * k + u] as i32
                } else {
                    let byte_group = u / 2;
                    let byte = data[4 * k + byte_group];
                    let nibble = if u % 2 == 0 { byte & 0x0F } else { (byte >> 4) & 0x0F };
                    sign_extend_nibble(nibble)
                };
                let sample = self.channels[channel_idx].propagate(d);
                out[channel_idx].push(sample);
            }
        }

        let _ = num_units;
        Ok(())
    }

    fn extract_params(&self, header: &[u8]) -> Result<Vec<u8>> {
        let mut params = Vec::new();
        if self.sample_depth == 8 {
            for u in 0..4 {
                let primary = header[u];
                for &dup in &[4 + u, 8 + u, 12 + u] {
                    if header[dup] != primary {
                        return Err(CdiError::Corrupt(format!(
                            "ADPCM parameter byte redundancy mismatch at unit {u}"
                        )));
                    }
                }
                params.push(primary);
            }
        } else {
            for u in 0..8 {
                let primary = header[4 + u];
                let redundant_idx = if u < 4 { u } else { 8 + u };
                if header[redundant_idx] != primary {
                    return Err(CdiError::Corrupt(format!(
                        "ADPCM parameter byte redundancy mismatch at unit {u}"
                    )));
                }
                params.push(primary);
            }
        }
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_decodes_to_zero_samples() {
        let group = vec![0u8; GROUP_SIZE];
        let mut sector = Vec::with_capacity(AUDIO_DATA_SIZE);
        for _ in 0..SOUND_GROUPS_PER_SECTOR {
            sector.extend_from_slice(&group);
        }

        let mut decoder = AudioDecoder::new(false, 8).unwrap();
        let channels = decoder.decode_sector(&sector).unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].len(), SOUND_GROUPS_PER_SECTOR * 4 * SAMPLES_PER_UNIT);
        assert!(channels[0].iter().all(|&s| s == 0));
    }

    #[test]
    fn reserved_filter_value_is_invalid_coding() {
        let mut filter = AdpcmFilter::new();
        assert!(matches!(filter.set_params(8, 4), Err(CdiError::InvalidCoding(_))));
    }

    #[test]
    fn redundancy_mismatch_is_corrupt() {
        let mut header = [0u8; HEADER_SIZE];
        header[0] = 0x01;
        header[4] = 0x02; // mismatch for unit 0
        let mut group = vec![0u8; GROUP_SIZE];
        group[0..HEADER_SIZE].copy_from_slice(&header);

        let mut sector = Vec::with_capacity(AUDIO_DATA_SIZE);
        sector.extend_from_slice(&group);
        for _ in 1..SOUND_GROUPS_PER_SECTOR {
            sector.extend_from_slice(&vec![0u8; GROUP_SIZE]);
        }

        let mut decoder = AudioDecoder::new(false, 8).unwrap();
        assert!(matches!(decoder.decode_sector(&sector), Err(CdiError::Corrupt(_))));
    }

    #[test]
    fn stereo_level_b_assigns_even_odd_units_to_channels() {
        let mut decoder = AudioDecoder::new(true, 4).unwrap();
        assert_eq!(decoder.channel_count(), 2);

        let group = vec![0u8; GROUP_SIZE];
        let mut sector = Vec::with_capacity(AUDIO_DATA_SIZE);
        for _ in 0..SOUND_GROUPS_PER_SECTOR {
            sector.extend_from_slice(&group);
        }
        let channels = decoder.decode_sector(&sector).unwrap();
        assert_eq!(channels.len(), 2);
        // 4 units per channel (of 8) * 28 samples * 18 groups.
        assert_eq!(channels[0].len(), SOUND_GROUPS_PER_SECTOR * 4 * SAMPLES_PER_UNIT);
        assert_eq!(channels[1].len(), SOUND_GROUPS_PER_SECTOR * 4 * SAMPLES_PER_UNIT);
    }
}
