//! Extracts DYUV real-time video frames to PNG files. Colour-space
//! conversion from YUV to RGB is a container-writer concern (§4.8), so
//! it lives here rather than in the library's decoder.

use cdiutils::codec::dyuv::{DyuvDecoder, DyuvOptions, YuvImage};
use cdiutils::error::Result as CdiResult;
use cdiutils::file::FileRecord;
use cdiutils::sector::CdImage;
use cdiutils::volume::Volume;
use image::{Rgb, RgbImage};
use rayon::prelude::*;
use std::error::Error;
use std::path::{Path, PathBuf};

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let disc_path = std::env::args().nth(1).unwrap_or_else(|| "disc.cdi".into());
    let output_dir = std::env::args().nth(2).unwrap_or_else(|| "/tmp/extracted_video".into());

    println!("Opening disc: {}", disc_path);
    let image = CdImage::open(&disc_path)?;
    let volume = Volume::open(&image)?;
    std::fs::create_dir_all(&output_dir)?;

    for entry in volume.path_table().entries() {
        let directory = volume.directory(entry)?;
        for file in directory.contents() {
            if file.is_directory(volume.path_table()) {
                continue;
            }
            let start_index = volume.lbn_to_sector_index(file.first_lbn);
            if !carries_dyuv(&image, file, start_index)? {
                continue;
            }
            println!("Decoding {} ...", file.name);
            let frames = decode_frames(&image, file, start_index)?;
            println!("  {} frame(s) decoded, encoding PNGs in parallel", frames.len());

            frames
                .par_iter()
                .enumerate()
                .try_for_each(|(i, frame)| -> Result<(), Box<dyn Error + Send + Sync>> {
                    let path = PathBuf::from(&output_dir).join(format!(
                        "{}_{:04}.png",
                        file.name.to_lowercase(),
                        i
                    ));
                    write_png(&path, frame)?;
                    Ok(())
                })
                .map_err(|e| -> Box<dyn Error> { e.to_string().into() })?;
        }
    }

    Ok(())
}

fn carries_dyuv(image: &CdImage, file: &FileRecord, start_index: u64) -> CdiResult<bool> {
    for sector in file.sectors_of(image, start_index).take(64) {
        let sector = sector?;
        let sub_header = sector.sub_header();
        if sub_header.submode.is_video() {
            if let Ok(encoding) = sub_header.video_coding().encoding() {
                if matches!(encoding, cdiutils::sector::VideoEncoding::Dyuv) {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

fn decode_frames(image: &CdImage, file: &FileRecord, start_index: u64) -> CdiResult<Vec<YuvImage>> {
    let video_sectors = file
        .sectors_of(image, start_index)
        .filter(|s| s.as_ref().map(|s| s.sub_header().submode.is_video()).unwrap_or(true));

    let mut decoder = DyuvDecoder::new(video_sectors, DyuvOptions::default())?;
    let mut frames = Vec::new();
    loop {
        match decoder.decode_image(|_| (16, 128, 128)) {
            Ok(frame) => frames.push(frame),
            Err(_) => break,
        }
    }
    Ok(frames)
}

fn write_png(path: &Path, frame: &YuvImage) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut img = RgbImage::new(frame.width as u32, frame.height as u32);
    for y in 0..frame.height {
        for x in 0..frame.width {
            let idx = y * frame.width + x;
            let (r, g, b) = yuv_to_rgb(frame.y[idx], frame.u[idx], frame.v[idx]);
            img.put_pixel(x as u32, y as u32, Rgb([r, g, b]));
        }
    }
    img.save(path)?;
    Ok(())
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y = y as f32;
    let cb = u as f32 - 128.0;
    let cr = v as f32 - 128.0;
    let r = y + 1.402 * cr;
    let g = y - 0.344136 * cb - 0.714136 * cr;
    let b = y + 1.772 * cb;
    (clamp(r), clamp(g), clamp(b))
}

fn clamp(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
