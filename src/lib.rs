//! # cdiutils
//!
//! A reader and media-codec library for CD-I (Green Book / ISO 9660-
//! derived) disc image files.
//!
//! ## Layers
//!
//! - [`sector`]: the physical sector grid — framing detection, sub-header
//!   and coding-byte decoding, and a memoizing sector cache.
//! - [`volume`]: the Disc Label, Path Table and directory tree built on
//!   top of the sector grid.
//! - [`file`]: a directory file's sector sequence and record/channel map.
//! - [`cdfm`]: the CDFM playback primitive — seek/play filtered by
//!   channel mask and record count.
//! - [`stream`]: a byte-oriented reader over a file's data payload.
//! - [`codec`]: ADPCM audio, DYUV video, and CLUT/RL palettized image
//!   decoders that consume a demuxed sector stream.
//!
//! ## Example
//!
//! ```no_run
//! use cdiutils::sector::CdImage;
//! use cdiutils::volume::Volume;
//!
//! let image = CdImage::open("game.cdi")?;
//! let volume = Volume::open(&image)?;
//!
//! for entry in volume.root_directory()?.contents() {
//!     println!("{}", entry.name);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod byte_reader;
pub mod cdfm;
pub mod codec;
pub mod error;
pub mod file;
pub mod sector;
pub mod stream;
pub mod volume;

pub use error::{CdiError, Result};
pub use sector::CdImage;
pub use volume::Volume;
