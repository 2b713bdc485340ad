// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For handling common FLAC stream items

use crate::Error;
use bitstream_io::{BitWrite, SignedBitCount, ToBitStream};
use std::num::NonZero;

/// A FLAC frame header
///
/// This encoder always uses the fixed blocking strategy and
/// independent channel assignment, so neither is a field here.
#[derive(Debug)]
pub struct FrameHeader {
    /// The frame's number in the stream
    pub frame_number: FrameNumber,
    /// The block size, in samples
    pub block_size: u16,
    /// The sample rate, in Hz
    pub sample_rate: u32,
    /// The number of independent channels
    pub channels: NonZero<u8>,
    /// The number of bits per sample
    pub bits_per_sample: SignedBitCount<32>,
}

impl FrameHeader {
    // sync code plus the reserved bit which follows it
    const SYNC_CODE: u32 = 0b111111111111100;

    /// Builds header to the given writer, followed by its CRC-8
    pub fn write<W: std::io::Write>(&self, writer: &mut W) -> Result<(), Error> {
        use crate::crc::{Crc8, CrcWriter};
        use bitstream_io::{BigEndian, BitWriter};
        use std::io::Write;

        let mut crc8: CrcWriter<_, Crc8> = CrcWriter::new(writer.by_ref());
        BitWriter::endian(crc8.by_ref(), BigEndian).build(self)?;
        let crc8 = crc8.into_checksum().into();
        writer.write_all(std::slice::from_ref(&crc8))?;
        Ok(())
    }
}

impl ToBitStream for FrameHeader {
    type Error = Error;

    fn to_writer<W: BitWrite + ?Sized>(&self, w: &mut W) -> Result<(), Self::Error> {
        let block_size_code = block_size_code(self.block_size);
        let sample_rate_code = sample_rate_code(self.sample_rate);

        w.write_const::<15, { Self::SYNC_CODE }>()?;
        w.write_bit(false)?; // fixed block size stream
        w.write::<4, _>(block_size_code)?;
        w.write::<4, _>(sample_rate_code)?;
        w.write::<4, _>(self.channels)?; // independent channels
        w.write::<3, _>(sample_size_code(self.bits_per_sample.into()))?;
        w.pad(1)?;

        w.build(&self.frame_number)?;

        // uncommon block size
        match block_size_code {
            0b0110 => w.write::<8, _>(self.block_size - 1)?,
            0b0111 => w.write::<16, _>(self.block_size - 1)?,
            _ => { /* block size implied by its code */ }
        }

        // uncommon sample rate
        match sample_rate_code {
            0b1100 => w.write::<8, _>(self.sample_rate / 1000)?,
            0b1101 => w.write::<16, _>(self.sample_rate)?,
            0b1110 => w.write::<16, _>(self.sample_rate / 10)?,
            _ => { /* sample rate implied by its code */ }
        }

        Ok(())
    }
}

fn block_size_code(block_size: u16) -> u8 {
    match block_size {
        192 => 0b0001,
        576 => 0b0010,
        1152 => 0b0011,
        2304 => 0b0100,
        4608 => 0b0101,
        256 => 0b1000,
        512 => 0b1001,
        1024 => 0b1010,
        2048 => 0b1011,
        4096 => 0b1100,
        8192 => 0b1101,
        16384 => 0b1110,
        32768 => 0b1111,
        size if size <= 256 => 0b0110,
        _ => 0b0111,
    }
}

fn sample_rate_code(sample_rate: u32) -> u8 {
    match sample_rate {
        88200 => 0b0001,
        176400 => 0b0010,
        192000 => 0b0011,
        8000 => 0b0100,
        16000 => 0b0101,
        22050 => 0b0110,
        24000 => 0b0111,
        32000 => 0b1000,
        44100 => 0b1001,
        48000 => 0b1010,
        96000 => 0b1011,
        rate if rate % 1000 == 0 && rate / 1000 <= 255 => 0b1100,
        rate if rate <= 65535 => 0b1101,
        _ => 0b1110,
    }
}

fn sample_size_code(bits_per_sample: u32) -> u8 {
    match bits_per_sample {
        8 => 0b001,
        12 => 0b010,
        16 => 0b100,
        20 => 0b101,
        24 => 0b110,
        // other depths are read from STREAMINFO
        _ => 0b000,
    }
}

/// A frame's number in the stream
///
/// Frame numbers are written UTF-8 style: values up to 0x7F take a
/// single byte, larger ones a leading byte whose run of high one bits
/// gives the total byte count, followed by `10xxxxxx` continuation
/// bytes of six value bits each.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FrameNumber(pub u64);

impl FrameNumber {
    /// The maximum coded frame number (36 bits)
    pub const MAX: u64 = 0xF_FFFF_FFFF;

    /// Advances to the next frame number
    ///
    /// # Errors
    ///
    /// Returns an error if the next number would be too
    /// large to code.
    pub fn try_increment(&mut self) -> Result<(), Error> {
        match self.0 {
            v if v < Self::MAX => {
                self.0 = v + 1;
                Ok(())
            }
            _ => Err(Error::InvalidFrameNumber),
        }
    }
}

impl ToBitStream for FrameNumber {
    type Error = Error;

    fn to_writer<W: BitWrite + ?Sized>(&self, w: &mut W) -> Result<(), Self::Error> {
        match self.0 {
            v @ 0..=0x7F => Ok(w.write::<8, _>(v)?),
            v @ 0x80..=Self::MAX => {
                // a value of b bits fits in the smallest byte count
                // whose payload capacity 5 * bytes + 1 covers it
                let bits = 64 - v.leading_zeros();
                let bytes = (2..=7)
                    .find(|b| bits <= 5 * b + 1)
                    .expect("36-bit value always fits in 7 bytes");

                // a run of ones the length of the byte count,
                // a zero, then the value's highest bits
                w.write::<8, _>(0xFFu8 << (8 - bytes) | (v >> (6 * (bytes - 1))) as u8)?;
                (0..bytes - 1).rev().try_for_each(|b| {
                    w.write::<8, _>(0b1000_0000 | ((v >> (6 * b)) & 0b111111) as u8)
                })?;
                Ok(())
            }
            _ => Err(Error::InvalidFrameNumber),
        }
    }
}

/// A subframe header
#[derive(Debug)]
pub struct SubframeHeader {
    /// The subframe's type
    pub type_: SubframeHeaderType,
}

impl ToBitStream for SubframeHeader {
    type Error = std::io::Error;

    fn to_writer<W: BitWrite + ?Sized>(&self, w: &mut W) -> Result<(), Self::Error> {
        w.write_const::<1, 0>()?;
        w.build(&self.type_)?;
        // the wasted bits-per-sample flag, always empty
        w.write_bit(false)
    }
}

/// A subframe header's type
#[derive(Debug)]
pub enum SubframeHeaderType {
    /// All samples are stored verbatim, without prediction
    Verbatim,
    /// Samples are stored as residuals of a fixed-coefficient
    /// polynomial predictor
    Fixed {
        /// The predictor order, from 0 to 4
        order: u8,
    },
}

impl ToBitStream for SubframeHeaderType {
    type Error = std::io::Error;

    fn to_writer<W: BitWrite + ?Sized>(&self, w: &mut W) -> Result<(), Self::Error> {
        w.write::<6, u8>(match self {
            Self::Verbatim => 0b000001,
            Self::Fixed { order } => 0b001000 | order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitstream_io::{BigEndian, BitWriter};

    fn coded(num: FrameNumber) -> Vec<u8> {
        let mut buf = Vec::new();
        BitWriter::endian(&mut buf, BigEndian).build(&num).unwrap();
        buf
    }

    #[test]
    fn test_frame_number_bytes() {
        assert_eq!(coded(FrameNumber(0)), [0x00]);
        assert_eq!(coded(FrameNumber(0x7F)), [0x7F]);
        assert_eq!(coded(FrameNumber(0x80)), [0xC2, 0x80]);
        assert_eq!(coded(FrameNumber(0x7FF)), [0xDF, 0xBF]);
        assert_eq!(coded(FrameNumber(0x800)), [0xE0, 0xA0, 0x80]);
        assert_eq!(coded(FrameNumber(0xFFFF)), [0xEF, 0xBF, 0xBF]);
        assert_eq!(coded(FrameNumber(0x1_0000)), [0xF0, 0x90, 0x80, 0x80]);
        assert_eq!(
            coded(FrameNumber(FrameNumber::MAX)),
            [0xFE, 0xBF, 0xBF, 0xBF, 0xBF, 0xBF, 0xBF],
        );
    }

    #[test]
    fn test_frame_number_limits() {
        let mut buf = Vec::new();
        assert!(matches!(
            BitWriter::endian(&mut buf, BigEndian).build(&FrameNumber(FrameNumber::MAX + 1)),
            Err(Error::InvalidFrameNumber),
        ));

        let mut number = FrameNumber(FrameNumber::MAX - 1);
        assert!(number.try_increment().is_ok());
        assert_eq!(number, FrameNumber(FrameNumber::MAX));
        assert!(matches!(
            number.try_increment(),
            Err(Error::InvalidFrameNumber),
        ));
    }

    #[test]
    fn test_block_size_codes() {
        assert_eq!(block_size_code(192), 1);
        assert_eq!(block_size_code(1024), 10);
        assert_eq!(block_size_code(4096), 12);
        assert_eq!(block_size_code(32768), 15);
        assert_eq!(block_size_code(100), 6);
        assert_eq!(block_size_code(256), 8);
        assert_eq!(block_size_code(1000), 7);
        assert_eq!(block_size_code(65535), 7);
    }

    #[test]
    fn test_sample_rate_codes() {
        assert_eq!(sample_rate_code(22050), 6);
        assert_eq!(sample_rate_code(44100), 9);
        assert_eq!(sample_rate_code(48000), 10);
        assert_eq!(sample_rate_code(96000), 11);
        assert_eq!(sample_rate_code(123000), 12);
        assert_eq!(sample_rate_code(11025), 13);
        assert_eq!(sample_rate_code(768000), 14);
    }

    #[test]
    fn test_sample_size_codes() {
        assert_eq!(sample_size_code(8), 1);
        assert_eq!(sample_size_code(12), 2);
        assert_eq!(sample_size_code(16), 4);
        assert_eq!(sample_size_code(20), 5);
        assert_eq!(sample_size_code(24), 6);
        assert_eq!(sample_size_code(32), 0);
    }

    #[test]
    fn test_frame_header_bytes() {
        let mut header = Vec::new();
        FrameHeader {
            frame_number: FrameNumber(0),
            block_size: 4096,
            sample_rate: 44100,
            channels: NonZero::new(2).unwrap(),
            bits_per_sample: 16u32.try_into().unwrap(),
        }
        .write(&mut header)
        .unwrap();

        // sync + reserved + blocking strategy, block size and rate
        // codes, channels - 1, sample size code, reserved, frame 0
        assert_eq!(&header[0..5], &[0xFF, 0xF8, 0xC9, 0x18, 0x00]);

        // trailing CRC-8 over everything before it
        let crc8 = header[0..5].iter().fold(0u8, |crc, byte| {
            (0..8).fold(crc ^ byte, |crc, _| {
                if crc & 0x80 != 0 {
                    (crc << 1) ^ 0x07
                } else {
                    crc << 1
                }
            })
        });
        assert_eq!(header.len(), 6);
        assert_eq!(header[5], crc8);
    }

    #[test]
    fn test_uncommon_block_size_field() {
        let mut header = Vec::new();
        FrameHeader {
            frame_number: FrameNumber(0),
            block_size: 1000,
            sample_rate: 44100,
            channels: NonZero::new(1).unwrap(),
            bits_per_sample: 16u32.try_into().unwrap(),
        }
        .write(&mut header)
        .unwrap();

        // block size code 7, then block size - 1 in 16 bits
        // after the frame number
        assert_eq!(&header[0..7], &[0xFF, 0xF8, 0x79, 0x08, 0x00, 0x03, 0xE7]);
    }
}
