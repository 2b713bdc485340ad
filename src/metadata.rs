// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The FLAC STREAMINFO metadata block

use crate::Error;
use bitstream_io::{
    BigEndian, BitRead, BitWrite, BitWriter, FromBitStream, SignedBitCount, ToBitStream,
};
use std::num::NonZero;

/// The initial tag at the start of all FLAC streams
pub const FLAC_TAG: &[u8; 4] = b"fLaC";

/// A metadata block header
///
/// | Bits | Field | Meaning |
/// |-----:|------:|---------|
/// | 1    | `last` | whether this is the final metadata block |
/// | 7    | `block_type` | the block type (0 for STREAMINFO) |
/// | 24   | `size` | the size of the block to follow, in bytes |
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BlockHeader {
    /// Whether this is the last metadata block before the frames
    pub last: bool,
    /// The block's type
    pub block_type: u8,
    /// The size of the block's body, in bytes
    pub size: u32,
}

impl ToBitStream for BlockHeader {
    type Error = std::io::Error;

    fn to_writer<W: BitWrite + ?Sized>(&self, w: &mut W) -> Result<(), Self::Error> {
        w.write_bit(self.last)?;
        w.write::<7, _>(self.block_type)?;
        w.write::<24, _>(self.size)
    }
}

impl FromBitStream for BlockHeader {
    type Error = std::io::Error;

    fn from_reader<R: BitRead + ?Sized>(r: &mut R) -> Result<Self, Self::Error> {
        Ok(Self {
            last: r.read_bit()?,
            block_type: r.read::<7, _>()?,
            size: r.read::<24, _>()?,
        })
    }
}

/// The STREAMINFO metadata block
///
/// The block carries the stream's global parameters along with the
/// frame and block size extrema learned while encoding, and the MD5
/// hash of the stream's raw little-endian PCM.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Streaminfo {
    /// The minimum block size (in samples) used in the stream
    pub minimum_block_size: u16,
    /// The maximum block size (in samples) used in the stream
    pub maximum_block_size: u16,
    /// The minimum frame size (in bytes) used in the stream.
    ///
    /// `None` indicates the value is unknown.
    pub minimum_frame_size: Option<NonZero<u32>>,
    /// The maximum frame size (in bytes) used in the stream.
    ///
    /// `None` indicates the value is unknown.
    pub maximum_frame_size: Option<NonZero<u32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels, from 1 to 8
    pub channels: NonZero<u8>,
    /// Number of bits-per-sample, from 4 to 32
    pub bits_per_sample: SignedBitCount<32>,
    /// Total number of interchannel samples in stream.
    ///
    /// `None` indicates the value is unknown.
    pub total_samples: Option<NonZero<u64>>,
    /// MD5 hash of unencoded audio data.
    ///
    /// `None` indicates the value is unknown.
    pub md5: Option<[u8; 16]>,
}

impl Streaminfo {
    /// The maximum size of a frame, in bytes (2²⁴ - 1)
    pub const MAX_FRAME_SIZE: u32 = (1 << 24) - 1;

    /// The maximum sample rate, in Hz (2²⁰ - 1)
    pub const MAX_SAMPLE_RATE: u32 = (1 << 20) - 1;

    /// The maximum number of channels (8)
    pub const MAX_CHANNELS: NonZero<u8> = NonZero::new(8).unwrap();

    /// The maximum number of total samples (2³⁶ - 1)
    pub const MAX_TOTAL_SAMPLES: NonZero<u64> = NonZero::new((1 << 36) - 1).unwrap();

    /// Defined size of the STREAMINFO block body, in bytes
    pub const SIZE: u32 = 0x22;
}

impl ToBitStream for Streaminfo {
    type Error = std::io::Error;

    fn to_writer<W: BitWrite + ?Sized>(&self, w: &mut W) -> Result<(), Self::Error> {
        w.write_from(self.minimum_block_size)?;
        w.write_from(self.maximum_block_size)?;
        w.write::<24, _>(self.minimum_frame_size)?;
        w.write::<24, _>(self.maximum_frame_size)?;
        w.write::<20, _>(self.sample_rate)?;
        w.write::<3, _>(self.channels)?;
        w.write::<5, _>(u32::from(self.bits_per_sample) - 1)?;
        w.write::<36, _>(self.total_samples)?;
        w.write_from(self.md5.unwrap_or([0; 16]))?;
        Ok(())
    }
}

impl FromBitStream for Streaminfo {
    type Error = std::io::Error;

    fn from_reader<R: BitRead + ?Sized>(r: &mut R) -> Result<Self, Self::Error> {
        Ok(Self {
            minimum_block_size: r.read_to()?,
            maximum_block_size: r.read_to()?,
            minimum_frame_size: r.read::<24, _>()?,
            maximum_frame_size: r.read::<24, _>()?,
            sample_rate: r.read::<20, _>()?,
            channels: r.read::<3, _>()?,
            bits_per_sample: (r.read::<5, u32>()? + 1)
                .try_into()
                .map_err(|_| std::io::Error::other("invalid bits-per-sample"))?,
            total_samples: r.read::<36, _>()?,
            md5: r
                .read_to()
                .map(|md5: [u8; 16]| md5.iter().any(|b| *b != 0).then_some(md5))?,
        })
    }
}

/// Writes the stream tag and STREAMINFO metadata block
///
/// This emits the whole metadata prefix of a FLAC stream:
/// the `fLaC` tag, a block header with the last-metadata-block
/// flag set, and the 34-byte STREAMINFO body.
///
/// # Errors
///
/// Passes along any I/O error from the underlying stream.
pub fn write_streaminfo<W: std::io::Write>(mut w: W, streaminfo: &Streaminfo) -> Result<(), Error> {
    w.write_all(FLAC_TAG).map_err(Error::Io)?;

    let mut w = BitWriter::endian(w, BigEndian);
    w.build(&BlockHeader {
        last: true,
        block_type: 0,
        size: Streaminfo::SIZE,
    })?;
    w.build(streaminfo)?;
    Ok(())
}
