//! Codec backends implementing [`crate::converter::ConverterFactory`]

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg::{FfmpegConverter, FfmpegFactory};
