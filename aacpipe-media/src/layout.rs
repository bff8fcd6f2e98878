//! Channel order fix-ups
//!
//! Interleaved input arrives in WAV/FFmpeg order (L, R, C, LFE, ...) while
//! the codec expects the center channel first. The table assumes 2.1, 4.0,
//! 4.1, 5.1 and 7.1 for 3, 4, 5, 6 and 8 channels.

use crate::converter::{AudioConverter, ChannelLayoutTag};
use tracing::warn;

static MAP_2_1: [i32; 3] = [2, 0, 1];
static MAP_4_0: [i32; 4] = [2, 0, 1, 3];
static MAP_4_1: [i32; 5] = [2, 0, 1, 3, 4];
static MAP_5_1: [i32; 6] = [2, 0, 1, 4, 5, 3];
static MAP_7_1: [i32; 8] = [2, 0, 1, 6, 7, 4, 5, 3];

/// Channel map for `channels`, if the count needs one
pub fn channel_map(channels: u32) -> Option<&'static [i32]> {
    match channels {
        3 => Some(&MAP_2_1[..]),
        4 => Some(&MAP_4_0[..]),
        5 => Some(&MAP_4_1[..]),
        6 => Some(&MAP_5_1[..]),
        8 => Some(&MAP_7_1[..]),
        _ => None,
    }
}

/// Explicit layout for `channels`, where the codec default is wrong
///
/// Four channels default to quad in the codec; 4.0 is forced on both sides.
pub fn channel_layout(channels: u32) -> Option<ChannelLayoutTag> {
    match channels {
        4 => Some(ChannelLayoutTag::MPEG_4_0_B),
        _ => None,
    }
}

/// Apply the layout and map for `channels` to `converter`
///
/// Failures are logged and otherwise ignored.
pub fn apply_channel_remap(converter: &mut dyn AudioConverter, channels: u32) {
    if let Some(tag) = channel_layout(channels) {
        if let Err(status) = converter.set_input_channel_layout(tag) {
            warn!("Failed to set input channel layout: {}", status);
        }
        if let Err(status) = converter.set_output_channel_layout(tag) {
            warn!("Failed to set output channel layout: {}", status);
        }
    }

    if let Some(map) = channel_map(channels) {
        if let Err(status) = converter.set_channel_map(map) {
            warn!("Failed to set {}-channel map: {}", channels, status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_are_permutations() {
        for channels in 1..=8u32 {
            if let Some(map) = channel_map(channels) {
                assert_eq!(map.len(), channels as usize);
                let mut sorted = map.to_vec();
                sorted.sort_unstable();
                assert_eq!(sorted, (0..channels as i32).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn test_only_surround_counts_are_remapped() {
        assert!(channel_map(1).is_none());
        assert!(channel_map(2).is_none());
        assert!(channel_map(7).is_none());
        assert_eq!(channel_map(6), Some(&[2, 0, 1, 4, 5, 3][..]));
        assert_eq!(channel_map(8), Some(&[2, 0, 1, 6, 7, 4, 5, 3][..]));
    }

    #[test]
    fn test_layout_only_for_four_channels() {
        assert_eq!(channel_layout(4), Some(ChannelLayoutTag((116 << 16) | 4)));
        for channels in [1, 2, 3, 5, 6, 8] {
            assert!(channel_layout(channels).is_none());
        }
    }
}
