//! Extracts every real-time audio channel found on a disc image to raw
//! WAV files, one per (file, channel) pair, alongside a JSON manifest.

use cdiutils::cdfm::Cdfm;
use cdiutils::codec::adpcm::AudioDecoder;
use cdiutils::error::Result as CdiResult;
use cdiutils::file::FileRecord;
use cdiutils::sector::CdImage;
use cdiutils::volume::Volume;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::BTreeSet;
use std::error::Error;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct ExtractedTrack {
    source_file: String,
    channel: u8,
    sample_rate: u32,
    stereo: bool,
    wav_path: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let disc_path = std::env::args().nth(1).unwrap_or_else(|| "disc.cdi".into());
    let output_dir = std::env::args().nth(2).unwrap_or_else(|| "/tmp/extracted_audio".into());

    println!("Opening disc: {}", disc_path);
    let image = CdImage::open(&disc_path)?;
    let volume = Volume::open(&image)?;

    std::fs::create_dir_all(&output_dir)?;

    let mut files = Vec::new();
    collect_audio_files(&volume, &mut files)?;

    let progress = ProgressBar::new(files.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}").unwrap(),
    );

    let mut manifest = Vec::new();
    for (file, start_index) in &files {
        progress.set_message(file.name.clone());
        let tracks = extract_file(&image, file, *start_index, &output_dir)?;
        manifest.extend(tracks);
        progress.inc(1);
    }
    progress.finish_with_message("done");

    let manifest_path = Path::new(&output_dir).join("manifest.json");
    let mut manifest_file = File::create(&manifest_path)?;
    manifest_file.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;

    println!("\nExtracted {} tracks to {}", manifest.len(), output_dir);
    println!("Manifest: {}", manifest_path.display());

    Ok(())
}

/// Walk every directory in the path table and collect files that carry at
/// least one audio sector.
fn collect_audio_files<'a>(
    volume: &Volume<'a>,
    out: &mut Vec<(FileRecord, u64)>,
) -> CdiResult<()> {
    for entry in volume.path_table().entries() {
        let directory = volume.directory(entry)?;
        for file in directory.contents() {
            if file.is_directory(volume.path_table()) {
                continue;
            }
            let start_index = volume.lbn_to_sector_index(file.first_lbn);
            let has_audio = file
                .sectors_of(volume.image(), start_index)
                .take(32)
                .filter_map(|s| s.ok())
                .any(|s| s.sub_header().submode.is_audio());
            if has_audio {
                out.push((file.clone(), start_index));
            }
        }
    }
    Ok(())
}

fn extract_file(
    image: &CdImage,
    file: &FileRecord,
    start_index: u64,
    output_dir: &str,
) -> Result<Vec<ExtractedTrack>, Box<dyn Error>> {
    let channels = audio_channels(image, file, start_index)?;
    let mut tracks = Vec::new();

    for channel in channels {
        let mut cdfm = Cdfm::for_file(image, file, start_index);
        let mut decoder: Option<AudioDecoder> = None;
        let mut pcm_channels: Vec<Vec<i16>> = Vec::new();
        let mut sample_rate = 0u32;
        let mut stereo = false;

        for sector in cdfm.play(1u32 << channel, -1) {
            let sector = sector?;
            let sub_header = sector.sub_header();
            if !sub_header.submode.is_audio() {
                continue;
            }

            let audio_coding = sub_header.audio_coding();
            if decoder.is_none() {
                stereo = audio_coding.is_stereo()?;
                sample_rate = audio_coding.sample_rate_hz()?;
                let depth = audio_coding.sample_depth_bits()?;
                decoder = Some(AudioDecoder::new(stereo, depth)?);
                pcm_channels = (0..if stereo { 2 } else { 1 }).map(|_| Vec::new()).collect();
            }

            let decoded = decoder.as_mut().unwrap().decode_sector(sector.full_data())?;
            for (dst, src) in pcm_channels.iter_mut().zip(decoded) {
                dst.extend(src);
            }
        }

        if pcm_channels.is_empty() {
            continue;
        }

        let interleaved = interleave(&pcm_channels);
        let base_name = file.name.trim_end_matches('.').to_lowercase();
        let wav_filename = format!("{base_name}_ch{channel}.wav");
        let wav_path = PathBuf::from(output_dir).join(&wav_filename);
        write_wav(&wav_path, &interleaved, sample_rate, stereo)?;

        tracks.push(ExtractedTrack {
            source_file: file.name.clone(),
            channel,
            sample_rate,
            stereo,
            wav_path: wav_path.display().to_string(),
        });
    }

    Ok(tracks)
}

/// Scan the file's sectors once to find which channel numbers carry audio.
fn audio_channels(image: &CdImage, file: &FileRecord, start_index: u64) -> CdiResult<Vec<u8>> {
    let mut channels = BTreeSet::new();
    for sector in file.sectors_of(image, start_index) {
        let sector = sector?;
        if sector.sub_header().submode.is_audio() {
            channels.insert(sector.sub_header().channel_number);
        }
    }
    Ok(channels.into_iter().collect())
}

fn interleave(channels: &[Vec<i16>]) -> Vec<i16> {
    if channels.len() == 1 {
        return channels[0].clone();
    }
    let len = channels.iter().map(|c| c.len()).min().unwrap_or(0);
    let mut out = Vec::with_capacity(len * channels.len());
    for i in 0..len {
        for c in channels {
            out.push(c[i]);
        }
    }
    out
}

fn write_wav(path: &Path, pcm: &[i16], sample_rate: u32, stereo: bool) -> Result<(), Box<dyn Error>> {
    let mut file = File::create(path)?;

    let num_channels: u16 = if stereo { 2 } else { 1 };
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * num_channels as u32 * bits_per_sample as u32 / 8;
    let block_align: u16 = num_channels * bits_per_sample / 8;
    let data_size = (pcm.len() * 2) as u32;

    file.write_all(b"RIFF")?;
    file.write_all(&(36 + data_size).to_le_bytes())?;
    file.write_all(b"WAVE")?;

    file.write_all(b"fmt ")?;
    file.write_all(&16u32.to_le_bytes())?;
    file.write_all(&1u16.to_le_bytes())?;
    file.write_all(&num_channels.to_le_bytes())?;
    file.write_all(&sample_rate.to_le_bytes())?;
    file.write_all(&byte_rate.to_le_bytes())?;
    file.write_all(&block_align.to_le_bytes())?;
    file.write_all(&bits_per_sample.to_le_bytes())?;

    file.write_all(b"data")?;
    file.write_all(&data_size.to_le_bytes())?;
    for &sample in pcm {
        file.write_all(&sample.to_le_bytes())?;
    }

    Ok(())
}
