//! Side-band codec configuration
//!
//! The codec's magic cookie is an MPEG-4 ES descriptor tree. The decoder
//! needs the AudioSpecificConfig in its DecoderSpecificInfo leaf:
//!
//! ```text
//! ES_Descriptor (0x03)
//!   ES_ID, flags [dependsOn ES_ID] [URL] [OCR ES_ID]
//!   DecoderConfigDescriptor (0x04)
//!     objectType, streamType, bufferSizeDB(3), maxBitrate(4), avgBitrate(4)
//!     DecoderSpecificInfo (0x05)
//!       AudioSpecificConfig
//! ```

use crate::converter::AudioConverter;
use crate::error::{MediaError, MediaResult};
use tracing::{error, warn};

/// ES_Descriptor tag
pub const ES_DESCRIPTOR_TAG: u8 = 0x03;
/// DecoderConfigDescriptor tag
pub const DECODER_CONFIG_TAG: u8 = 0x04;
/// DecoderSpecificInfo tag
pub const DECODER_SPECIFIC_INFO_TAG: u8 = 0x05;
/// SLConfigDescriptor tag
pub const SL_CONFIG_TAG: u8 = 0x06;

/// objectTypeIndication for MPEG-4 audio
pub const OBJECT_TYPE_MPEG4_AUDIO: u8 = 0x40;
/// streamType byte for an audio stream: type 0x05, upstream 0, reserved 1
pub const STREAM_TYPE_AUDIO: u8 = (0x05 << 2) | 0x01;

const STREAM_DEPENDENCE_FLAG: u8 = 0x80;
const URL_FLAG: u8 = 0x40;
const OCR_STREAM_FLAG: u8 = 0x20;

const MAX_DESCRIPTOR_LEN: usize = (1 << 28) - 1;

/// Query the converter's magic cookie and extract the AudioSpecificConfig
///
/// Returns an empty buffer when the configuration is unavailable.
pub fn get_config(converter: &dyn AudioConverter) -> Vec<u8> {
    let size = match converter.magic_cookie_size() {
        Ok(size) => size as usize,
        Err(status) => {
            error!("AudioConverterGetPropertyInfo(magic_cookie) returned {}", status);
            return Vec::new();
        }
    };

    if size == 0 {
        warn!("Got 0 data size info for magic_cookie");
        return Vec::new();
    }

    let mut cookie = Vec::new();
    if cookie.try_reserve_exact(size).is_err() {
        warn!("Could not allocate extra data buffer");
        return Vec::new();
    }
    cookie.resize(size, 0);

    let written = match converter.magic_cookie(&mut cookie) {
        Ok(written) => written,
        Err(status) => {
            error!("AudioConverterGetProperty(magic_cookie) returned {}", status);
            return Vec::new();
        }
    };

    if written == 0 {
        warn!("Got 0 data size for magic_cookie");
        return Vec::new();
    }
    cookie.truncate(written);

    match parse_decoder_specific_info(&cookie) {
        Some(config) => config.to_vec(),
        None => {
            warn!("magic_cookie of {} bytes has no DecoderSpecificInfo", cookie.len());
            Vec::new()
        }
    }
}

/// Extract the DecoderSpecificInfo payload from a descriptor tree
///
/// The tree may be rooted at an ES_Descriptor or directly at a
/// DecoderConfigDescriptor. Truncated or mis-tagged input yields `None`.
pub fn parse_decoder_specific_info(blob: &[u8]) -> Option<&[u8]> {
    let mut reader = DescriptorReader::new(blob);

    let (mut tag, _) = reader.read_descriptor()?;
    if tag == ES_DESCRIPTOR_TAG {
        reader.skip(2)?;
        let flags = reader.read_u8()?;
        if flags & STREAM_DEPENDENCE_FLAG != 0 {
            reader.skip(2)?;
        }
        if flags & URL_FLAG != 0 {
            let url_len = reader.read_u8()?;
            reader.skip(url_len as usize)?;
        }
        if flags & OCR_STREAM_FLAG != 0 {
            reader.skip(2)?;
        }
        tag = reader.read_descriptor()?.0;
    }

    if tag != DECODER_CONFIG_TAG {
        return None;
    }
    // objectType, streamType, bufferSizeDB, maxBitrate, avgBitrate
    reader.skip(1 + 1 + 3 + 4 + 4)?;

    let (tag, len) = reader.read_descriptor()?;
    if tag != DECODER_SPECIFIC_INFO_TAG {
        return None;
    }
    reader.take(len)
}

/// Extract the DecoderSpecificInfo payload from the body of an `esds` box,
/// which starts with a 4-byte version and flags field
pub fn parse_esds_box(body: &[u8]) -> Option<&[u8]> {
    parse_decoder_specific_info(body.get(4..)?)
}

struct DescriptorReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> DescriptorReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_u8(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    /// Tag byte followed by a length of at most four 7-bit groups
    fn read_descriptor(&mut self) -> Option<(u8, usize)> {
        let tag = self.read_u8()?;
        let mut len = 0usize;
        for _ in 0..4 {
            let byte = self.read_u8()?;
            len = (len << 7) | (byte & 0x7f) as usize;
            if byte & 0x80 == 0 {
                break;
            }
        }
        Some((tag, len))
    }
}

/// Serialises an ES descriptor tree around a decoder-specific payload
#[derive(Debug, Clone)]
pub struct EsDescriptorBuilder {
    es_id: u16,
    object_type: u8,
    stream_type: u8,
    buffer_size: u32,
    max_bitrate: u32,
    avg_bitrate: u32,
}

impl Default for EsDescriptorBuilder {
    fn default() -> Self {
        Self {
            es_id: 0,
            object_type: OBJECT_TYPE_MPEG4_AUDIO,
            stream_type: STREAM_TYPE_AUDIO,
            buffer_size: 0,
            max_bitrate: 0,
            avg_bitrate: 0,
        }
    }
}

impl EsDescriptorBuilder {
    /// Builder for an MPEG-4 audio stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ES_ID
    pub fn es_id(mut self, es_id: u16) -> Self {
        self.es_id = es_id;
        self
    }

    /// Set the decoder buffer size; only the low 24 bits are kept
    pub fn buffer_size(mut self, buffer_size: u32) -> Self {
        self.buffer_size = buffer_size & 0x00ff_ffff;
        self
    }

    /// Set the maximum and average bitrates
    pub fn bitrate(mut self, max_bitrate: u32, avg_bitrate: u32) -> Self {
        self.max_bitrate = max_bitrate;
        self.avg_bitrate = avg_bitrate;
        self
    }

    /// Serialise the tree with `decoder_specific_info` as its leaf
    pub fn build(&self, decoder_specific_info: &[u8]) -> MediaResult<Vec<u8>> {
        let mut specific = Vec::with_capacity(decoder_specific_info.len() + 5);
        write_descriptor(&mut specific, DECODER_SPECIFIC_INFO_TAG, decoder_specific_info)?;

        let mut config = Vec::with_capacity(13 + specific.len());
        config.push(self.object_type);
        config.push(self.stream_type);
        config.extend_from_slice(&self.buffer_size.to_be_bytes()[1..]);
        config.extend_from_slice(&self.max_bitrate.to_be_bytes());
        config.extend_from_slice(&self.avg_bitrate.to_be_bytes());
        config.extend_from_slice(&specific);

        let mut es = Vec::with_capacity(3 + config.len() + 5 + 3);
        es.extend_from_slice(&self.es_id.to_be_bytes());
        es.push(0);
        write_descriptor(&mut es, DECODER_CONFIG_TAG, &config)?;
        // predefined SL config for MP4 files
        write_descriptor(&mut es, SL_CONFIG_TAG, &[0x02])?;

        let mut out = Vec::with_capacity(es.len() + 5);
        write_descriptor(&mut out, ES_DESCRIPTOR_TAG, &es)?;
        Ok(out)
    }
}

fn write_descriptor(out: &mut Vec<u8>, tag: u8, body: &[u8]) -> MediaResult<()> {
    let len = body.len();
    if len > MAX_DESCRIPTOR_LEN {
        return Err(MediaError::InvalidConfiguration {
            message: format!("descriptor body of {} bytes exceeds {}", len, MAX_DESCRIPTOR_LEN),
        });
    }

    out.push(tag);
    let groups = match len {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        _ => 4,
    };
    for i in (0..groups).rev() {
        let mut byte = ((len >> (7 * i)) & 0x7f) as u8;
        if i > 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
    out.extend_from_slice(body);
    Ok(())
}
