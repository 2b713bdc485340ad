// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Storage for one block of PCM samples

/// One block of samples, stacked by channel
///
/// The buffer is reused from block to block, so a whole encoding pass
/// performs only one allocation per channel length increase.
#[derive(Clone, Default, Debug)]
pub struct Block {
    // all samples, stacked by channel
    samples: Vec<i32>,

    // length of each channel in samples
    channel_len: usize,
}

impl Block {
    /// Refills block from interleaved samples
    ///
    /// `interleaved` must hold a whole number of PCM frames.
    pub fn fill_from_interleaved(&mut self, interleaved: &[i32], channels: usize) {
        debug_assert!(channels > 0);
        debug_assert!(interleaved.len() % channels == 0);

        self.channel_len = interleaved.len() / channels;
        self.samples.clear();
        self.samples.resize(interleaved.len(), 0);

        for (i, sample) in interleaved.iter().enumerate() {
            let (sample_index, channel) = (i / channels, i % channels);
            self.samples[channel * self.channel_len + sample_index] = *sample;
        }
    }

    /// Returns PCM frame count
    #[inline]
    pub fn pcm_frames(&self) -> usize {
        self.channel_len
    }

    /// Iterates over each channel's samples in channel order
    pub fn channels(&self) -> impl Iterator<Item = &[i32]> {
        self.samples.chunks_exact(self.channel_len)
    }
}
