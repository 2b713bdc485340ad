// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For encoding PCM samples to FLAC streams

use crate::audio::Block;
use crate::crc::{Crc16, CrcWriter};
use crate::metadata::{Streaminfo, write_streaminfo};
use crate::stream::{FrameHeader, FrameNumber, SubframeHeader, SubframeHeaderType};
use crate::{Counter, Error};
use arrayvec::ArrayVec;
use bitstream_io::{BigEndian, BitCount, BitWrite, BitWriter, SignedBitCount};
use std::num::NonZero;

const MAX_CHANNELS: usize = 8;

/// FLAC encoding options
#[derive(Clone, Debug)]
pub struct Options {
    block_size: u16,
}

impl Default for Options {
    fn default() -> Self {
        Self { block_size: 4096 }
    }
}

impl Options {
    /// The smallest supported block size, in samples
    pub const MIN_BLOCK_SIZE: u16 = 16;

    /// Sets new block size
    ///
    /// The default is 4096 samples per block.
    ///
    /// # Errors
    ///
    /// Returns an error if the block size is smaller
    /// than [`Options::MIN_BLOCK_SIZE`].
    pub fn block_size(self, block_size: u16) -> Result<Self, Error> {
        (block_size >= Self::MIN_BLOCK_SIZE)
            .then_some(Self { block_size })
            .ok_or(Error::InvalidBlockSize)
    }
}

/// A FLAC encoder for whole in-memory sets of samples
///
/// Construction validates the stream parameters once;
/// [`Encoder::encode`] may then be called any number of times,
/// each call producing one complete, self-contained FLAC stream.
///
/// # Example
///
/// ```
/// use flacenc::encode::{Encoder, Options};
/// use std::num::NonZero;
///
/// let encoder = Encoder::new(
///     Options::default(),          // default encoding options
///     44100,                       // sample rate
///     16,                          // bits-per-sample
///     NonZero::new(2).unwrap(),    // channel count
/// )
/// .unwrap();
///
/// // 1000 interleaved stereo samples
/// let samples = (0..1000).flat_map(|i| [i, i]).collect::<Vec<i32>>();
///
/// let mut flac = Vec::new();
/// encoder.encode(&mut flac, &samples).unwrap();
///
/// assert!(flac.starts_with(b"fLaC"));
/// ```
pub struct Encoder {
    block_size: u16,
    sample_rate: u32,
    bits_per_sample: SignedBitCount<32>,
    channels: NonZero<u8>,
}

impl Encoder {
    const SUPPORTED_BITS_PER_SAMPLE: [u32; 6] = [8, 12, 16, 20, 24, 32];

    /// Creates new FLAC encoder with the given parameters
    ///
    /// `sample_rate` must be between 1 and 1,048,575 (a 20 bit field).
    ///
    /// `bits_per_sample` must be one of 8, 12, 16, 20, 24 or 32.
    ///
    /// `channels` must be between 1 and 8.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the encoding parameters
    /// are invalid.
    pub fn new(
        options: Options,
        sample_rate: u32,
        bits_per_sample: u32,
        channels: NonZero<u8>,
    ) -> Result<Self, Error> {
        Ok(Self {
            block_size: options.block_size,
            sample_rate: (1..=Streaminfo::MAX_SAMPLE_RATE)
                .contains(&sample_rate)
                .then_some(sample_rate)
                .ok_or(Error::InvalidSampleRate)?,
            bits_per_sample: Self::SUPPORTED_BITS_PER_SAMPLE
                .contains(&bits_per_sample)
                .then_some(bits_per_sample)
                .and_then(|b| b.try_into().ok())
                .ok_or(Error::InvalidBitsPerSample)?,
            channels: (channels <= Streaminfo::MAX_CHANNELS)
                .then_some(channels)
                .ok_or(Error::ExcessiveChannels)?,
        })
    }

    /// Encodes a whole stream of channel-interleaved samples
    ///
    /// Frames are encoded to an in-memory staging buffer first,
    /// so that the STREAMINFO block can be written with its final
    /// frame size extrema before any frame reaches the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the sample count does not divide evenly
    /// between the channels, if there are more samples per channel
    /// than STREAMINFO can indicate, or if an I/O error occurs
    /// writing to the sink.
    pub fn encode<W: std::io::Write>(&self, mut writer: W, samples: &[i32]) -> Result<(), Error> {
        use std::io::Write;

        let channels = usize::from(self.channels.get());
        if samples.len() % channels != 0 {
            return Err(Error::SampleCountMismatch);
        }

        let total_samples = (samples.len() / channels) as u64;
        if total_samples > Streaminfo::MAX_TOTAL_SAMPLES.get() {
            return Err(Error::ExcessiveTotalSamples);
        }

        let bytes_per_sample = u32::from(self.bits_per_sample).div_ceil(8) as usize;

        let mut streaminfo = Streaminfo {
            minimum_block_size: self.block_size,
            maximum_block_size: self.block_size,
            minimum_frame_size: None,
            maximum_frame_size: None,
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
            total_samples: NonZero::new(total_samples),
            md5: Some(pcm_md5(samples, bytes_per_sample)),
        };

        let mut frames = Vec::new();
        let mut frame_number = FrameNumber::default();
        let mut block = Block::default();
        let mut scratch = FixedScratch::default();

        for chunk in samples.chunks(usize::from(self.block_size) * channels) {
            block.fill_from_interleaved(chunk, channels);

            let block_size = block.pcm_frames() as u16;
            streaminfo.minimum_block_size = streaminfo.minimum_block_size.min(block_size);
            streaminfo.maximum_block_size = streaminfo.maximum_block_size.max(block_size);

            encode_frame(
                &mut scratch,
                &mut frames,
                &mut streaminfo,
                &mut frame_number,
                block.channels().collect(),
            )?;
        }

        write_streaminfo(writer.by_ref(), &streaminfo)?;
        writer.write_all(&frames).map_err(Error::Io)
    }
}

/// Encodes a whole stream of channel-interleaved samples in one call
///
/// This is a convenience wrapper around [`Encoder::new`] and
/// [`Encoder::encode`].
///
/// # Errors
///
/// Returns an error if any encoding parameter is invalid,
/// if the samples do not divide evenly between the channels,
/// or if an I/O error occurs writing to the sink.
pub fn encode<W: std::io::Write>(
    writer: W,
    options: Options,
    sample_rate: u32,
    bits_per_sample: u32,
    channels: NonZero<u8>,
    samples: &[i32],
) -> Result<(), Error> {
    Encoder::new(options, sample_rate, bits_per_sample, channels)?.encode(writer, samples)
}

/// Encodes a whole stream of channel-interleaved 16-bit samples
///
/// # Errors
///
/// Returns an error if any encoding parameter is invalid,
/// if the samples do not divide evenly between the channels,
/// or if an I/O error occurs writing to the sink.
pub fn encode_i16<W: std::io::Write>(
    writer: W,
    options: Options,
    sample_rate: u32,
    channels: NonZero<u8>,
    samples: &[i16],
) -> Result<(), Error> {
    let samples = samples.iter().map(|s| i32::from(*s)).collect::<Vec<_>>();
    Encoder::new(options, sample_rate, 16, channels)?.encode(writer, &samples)
}

/// Hashes raw PCM as it would appear in a file of the given depth
///
/// Samples are taken little-endian at the declared container size;
/// 12 and 20 bit depths pack into 16 and 24 bit containers.
fn pcm_md5(samples: &[i32], bytes_per_sample: usize) -> [u8; 16] {
    let mut md5 = md5::Context::new();

    match bytes_per_sample {
        1 => {
            for s in samples {
                md5.consume([*s as u8]);
            }
        }
        2 => {
            for s in samples {
                md5.consume((*s as i16).to_le_bytes());
            }
        }
        3 => {
            for s in samples {
                md5.consume(&(*s as u32).to_le_bytes()[0..3]);
            }
        }
        4 => {
            for s in samples {
                md5.consume(s.to_le_bytes());
            }
        }
        _ => unreachable!("bits-per-sample is validated at construction"),
    }

    md5.compute().0
}

// Residuals for each FIXED predictor order, order 0 first
//
// Order 0 is the block's samples themselves; each higher order is the
// successive difference of the order below, which matches the fixed
// polynomial predictors up to order 4. All residuals are widened to
// i64 so that no depth up to 32 bits can overflow.
#[derive(Default)]
struct FixedScratch {
    orders: [Vec<i64>; 5],
}

impl FixedScratch {
    // Computes residuals for every order the block length allows
    // and returns the number of usable orders
    fn compute(&mut self, channel: &[i32]) -> usize {
        self.orders[0].clear();
        self.orders[0].extend(channel.iter().copied().map(i64::from));

        for order in 1..self.orders.len() {
            let (lower, higher) = self.orders.split_at_mut(order);
            let prev = &lower[order - 1];
            if prev.len() < 2 {
                // not enough samples left to difference again
                return order;
            }
            higher[0].clear();
            higher[0].extend(prev.windows(2).map(|w| w[1] - w[0]));
        }

        self.orders.len()
    }
}

fn encode_frame<W: std::io::Write>(
    scratch: &mut FixedScratch,
    mut writer: W,
    streaminfo: &mut Streaminfo,
    frame_number: &mut FrameNumber,
    channels: ArrayVec<&[i32], MAX_CHANNELS>,
) -> Result<(), Error> {
    use std::io::Write;

    debug_assert!(!channels.is_empty());
    debug_assert_eq!(channels.len(), usize::from(streaminfo.channels.get()));

    let size = Counter::new(writer.by_ref());
    let mut w: CrcWriter<_, Crc16> = CrcWriter::new(size);

    FrameHeader {
        frame_number: *frame_number,
        block_size: channels[0].len() as u16,
        sample_rate: streaminfo.sample_rate,
        channels: streaminfo.channels,
        bits_per_sample: streaminfo.bits_per_sample,
    }
    .write(&mut w)?;

    let mut bw = BitWriter::endian(w, BigEndian);

    for channel in channels {
        encode_subframe(scratch, &mut bw, channel, streaminfo.bits_per_sample)?;
    }

    // byte-align the frame, then close it with the CRC-16
    // of everything before the checksum itself
    let crc16: u16 = bw.aligned_writer()?.checksum().into();
    bw.write_from(crc16)?;

    frame_number.try_increment()?;

    // update minimum and maximum frame size values
    if let Some(size) = u32::try_from(bw.into_writer().into_writer().count)
        .ok()
        .filter(|size| *size < Streaminfo::MAX_FRAME_SIZE)
        .and_then(NonZero::new)
    {
        streaminfo.minimum_frame_size =
            Some(streaminfo.minimum_frame_size.map_or(size, |min| min.min(size)));
        streaminfo.maximum_frame_size =
            Some(streaminfo.maximum_frame_size.map_or(size, |max| max.max(size)));
    }

    Ok(())
}

fn encode_subframe<W: BitWrite>(
    scratch: &mut FixedScratch,
    writer: &mut W,
    channel: &[i32],
    bits_per_sample: SignedBitCount<32>,
) -> Result<(), Error> {
    // subframe header plus Rice coding method, partition order
    // and parameter fields
    const FIXED_OVERHEAD: u64 = 8 + 2 + 4 + 4;
    const VERBATIM_OVERHEAD: u64 = 8;

    debug_assert!(!channel.is_empty());

    let bps = u64::from(u32::from(bits_per_sample));

    let orders = scratch.compute(channel);

    // estimate every order's cost, with ties broken
    // toward the smallest order
    let (order, fixed_bits) = (0..orders)
        .map(|order| {
            (
                order,
                FIXED_OVERHEAD + order as u64 * bps + estimate_rice_bits(&scratch.orders[order]),
            )
        })
        .min_by_key(|(_, bits)| *bits)
        .expect("order 0 is always available");

    // the winner must also beat storing the samples raw
    if fixed_bits <= VERBATIM_OVERHEAD + channel.len() as u64 * bps {
        encode_fixed_subframe(
            writer,
            channel,
            &scratch.orders[order],
            order as u8,
            bits_per_sample,
        )
    } else {
        encode_verbatim_subframe(writer, channel, bits_per_sample)
    }
}

fn encode_verbatim_subframe<W: BitWrite>(
    writer: &mut W,
    channel: &[i32],
    bits_per_sample: SignedBitCount<32>,
) -> Result<(), Error> {
    writer.build(&SubframeHeader {
        type_: SubframeHeaderType::Verbatim,
    })?;

    channel
        .iter()
        .try_for_each(|sample| writer.write_signed_counted(bits_per_sample, *sample))?;

    Ok(())
}

fn encode_fixed_subframe<W: BitWrite>(
    writer: &mut W,
    channel: &[i32],
    residuals: &[i64],
    order: u8,
    bits_per_sample: SignedBitCount<32>,
) -> Result<(), Error> {
    writer.build(&SubframeHeader {
        type_: SubframeHeaderType::Fixed { order },
    })?;

    // warm-up samples precede the predictor's defined domain
    channel[..usize::from(order)]
        .iter()
        .try_for_each(|sample| writer.write_signed_counted(bits_per_sample, *sample))?;

    write_residuals(writer, residuals)
}

/// Maps a residual onto the non-negative integers,
/// with small magnitudes staying small
fn zigzag(residual: i64) -> u64 {
    if residual >= 0 {
        (residual as u64) << 1
    } else {
        ((-residual - 1) as u64) << 1 | 1
    }
}

// Picks the Rice parameter from the mean residual magnitude,
// clamped to what a 4-bit parameter field can hold
fn rice_parameter(residuals: &[i64]) -> u32 {
    debug_assert!(!residuals.is_empty());

    let sum = residuals
        .iter()
        .map(|r| if *r >= 0 { *r as u64 } else { (-r - 1) as u64 })
        .sum::<u64>();
    let mean = sum / residuals.len() as u64;

    let mut k = 0u32;
    while (1u64 << k) < mean {
        k += 1;
    }
    k.min(14)
}

// Sums the exact cost of Rice-coding the residuals
// with the parameter `rice_parameter` would pick
fn estimate_rice_bits(residuals: &[i64]) -> u64 {
    let k = rice_parameter(residuals);

    residuals
        .iter()
        .map(|r| (zigzag(*r) >> k) + 1 + u64::from(k))
        .sum()
}

fn write_residuals<W: BitWrite>(writer: &mut W, residuals: &[i64]) -> Result<(), Error> {
    let k = rice_parameter(residuals);
    let rice = BitCount::<0b1111>::try_from(k).expect("Rice parameter always fits its field");

    writer.write::<2, u8>(0)?; // coding method: Rice, 4-bit parameters
    writer.write::<4, u8>(0)?; // partition order: a single partition
    writer.write::<4, _>(k)?;

    residuals.iter().try_for_each(|residual| {
        let unsigned = zigzag(*residual);
        // quotients stay word-sized because subframes whose cost
        // estimate exceeds the verbatim cost are never Rice-coded
        writer.write_unary::<1>((unsigned >> k) as u32)?;
        writer.write_counted(rice, (unsigned & ((1 << k) - 1)) as u32)
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_residuals() {
        let mut scratch = FixedScratch::default();

        // a linear ramp differences to a constant at order 1
        // and to nothing at all above that
        assert_eq!(scratch.compute(&[100, 102, 104, 106, 108]), 5);
        assert_eq!(scratch.orders[0], [100, 102, 104, 106, 108]);
        assert_eq!(scratch.orders[1], [2, 2, 2, 2]);
        assert_eq!(scratch.orders[2], [0, 0, 0]);
        assert_eq!(scratch.orders[3], [0, 0]);
        assert_eq!(scratch.orders[4], [0]);

        // a quadratic ramp vanishes at order 3
        assert_eq!(scratch.compute(&[0, 1, 4, 9, 16, 25]), 5);
        assert_eq!(scratch.orders[2], [1, 1, 1, 1]);
        assert_eq!(scratch.orders[3], [0, 0, 0]);
    }

    #[test]
    fn test_fixed_residuals_short_blocks() {
        let mut scratch = FixedScratch::default();

        assert_eq!(scratch.compute(&[7]), 1);
        assert_eq!(scratch.orders[0], [7]);

        assert_eq!(scratch.compute(&[7, 9, 13]), 3);
        assert_eq!(scratch.orders[1], [2, 4]);
        assert_eq!(scratch.orders[2], [2]);
    }

    #[test]
    fn test_fixed_residuals_no_overflow() {
        let mut scratch = FixedScratch::default();

        // full-scale 32-bit alternation overflows 32-bit
        // difference arithmetic but not ours
        let samples = [i32::MAX, i32::MIN, i32::MAX, i32::MIN, i32::MAX, i32::MIN];
        assert_eq!(scratch.compute(&samples), 5);
        assert_eq!(
            scratch.orders[1],
            [
                -(u32::MAX as i64),
                u32::MAX as i64,
                -(u32::MAX as i64),
                u32::MAX as i64,
                -(u32::MAX as i64),
            ],
        );
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag(0), 0);
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
        assert_eq!(zigzag(-2), 3);
        assert_eq!(zigzag(2), 4);
        assert_eq!(zigzag(-100), 199);
        assert_eq!(zigzag(100), 200);
    }

    #[test]
    fn test_rice_parameter() {
        // all-zero residuals take the smallest parameter
        assert_eq!(rice_parameter(&[0; 16]), 0);

        // near-geometric residuals land near log2 of the mean
        assert_eq!(rice_parameter(&[8, -8, 8, -8]), 3);

        // enormous residuals clamp at the field maximum
        assert_eq!(rice_parameter(&[1 << 36, -(1 << 36)]), 14);
    }

    #[test]
    fn test_rice_estimate_tracks_magnitude() {
        let small = [0, 1, -1, 2, -2, 1, 0, -1];
        let large = [1000, -1000, 2000, -2000, 1000, -1000, 2000, -2000];

        assert!(estimate_rice_bits(&small) < estimate_rice_bits(&large));
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(
            Options::default().block_size(15),
            Err(Error::InvalidBlockSize),
        ));
        assert!(matches!(
            Encoder::new(Options::default(), 0, 16, NonZero::new(1).unwrap()),
            Err(Error::InvalidSampleRate),
        ));
        assert!(matches!(
            Encoder::new(Options::default(), 1 << 20, 16, NonZero::new(1).unwrap()),
            Err(Error::InvalidSampleRate),
        ));
        assert!(matches!(
            Encoder::new(Options::default(), 44100, 17, NonZero::new(1).unwrap()),
            Err(Error::InvalidBitsPerSample),
        ));
        assert!(matches!(
            Encoder::new(Options::default(), 44100, 16, NonZero::new(9).unwrap()),
            Err(Error::ExcessiveChannels),
        ));
    }

    #[test]
    fn test_uneven_sample_count() {
        let encoder =
            Encoder::new(Options::default(), 44100, 16, NonZero::new(2).unwrap()).unwrap();

        assert!(matches!(
            encoder.encode(&mut Vec::new(), &[0; 999]),
            Err(Error::SampleCountMismatch),
        ));
    }

    #[test]
    fn test_md5_packing() {
        // 16-bit samples hash as little-endian pairs
        assert_eq!(
            pcm_md5(&[0x0102, -2], 2),
            md5::compute([0x02, 0x01, 0xFE, 0xFF]).0,
        );

        // 24-bit samples hash as their low three bytes
        assert_eq!(
            pcm_md5(&[0x010203, -2], 3),
            md5::compute([0x03, 0x02, 0x01, 0xFE, 0xFF, 0xFF]).0,
        );
    }
}
