//! Codec decoders (C7–C10): audio, video and palettized image decoding
//! that consume a demuxed sector stream.

pub mod adpcm;
pub mod clut;
pub mod dyuv;
pub mod image;

pub use adpcm::AudioDecoder;
pub use clut::{ClutDecoder, IndexedImage, Palette, PaletteEncoding, RgbEntry};
pub use dyuv::{DyuvDecoder, DyuvOptions, YuvImage};
pub use image::ImageDecoderHarness;
