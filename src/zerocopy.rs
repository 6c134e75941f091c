//! The zero-copy stream facade: decode straight into the stream's input buffer.

use crate::{engine::Engine, error::Error};

// -------------------------------------------------------------------------------------------------

/// A streaming processor that lets producers decode directly into its input buffer.
///
/// [`ZeroCopyStream::process`] borrows an uninitialized region at the input buffer's
/// tail, hands it to the caller's fill closure (an audio decoder, typically), commits
/// it, and returns up to the same number of processed frames. While all parameters
/// sit at their neutral values the stream bypasses the DSP chain entirely and serves
/// reads straight from the input buffer, cross-fading once over any processed frames
/// still pending from earlier parameter changes so the handoff stays free of clicks.
///
/// When the buffers together hold fewer frames than requested, reads return an empty
/// slice. That is the idle signal of a fixed-frame streaming loop, not an error.
pub struct ZeroCopyStream {
    engine: Engine,
}

impl ZeroCopyStream {
    /// Creates a stream for interleaved audio with the given sample rate and channel
    /// count. The sample rate must be at least twice [`MAX_PITCH`](crate::MAX_PITCH).
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            engine: Engine::new(sample_rate, channels),
        }
    }

    /// Borrows `frames` frames at the input buffer's tail, fills them in place via
    /// `fill`, commits them, and reads up to `frames` processed frames back.
    ///
    /// The returned slice must be consumed before the next call on this stream, as
    /// later processing may overwrite it.
    pub fn process<F>(&mut self, frames: usize, fill: F) -> Result<&[i16], Error>
    where
        F: FnOnce(&mut [i16]) -> Result<(), Error>,
    {
        {
            let region = self.engine.input.borrow_raw_slice(frames)?;
            fill(region)?;
        }
        self.engine.input.commit_raw_slice(frames)?;
        self.engine.update_input_playtime();

        self.read_frames(frames)
    }

    /// Reads up to `frames` processed frames; empty when not enough is buffered.
    pub fn read(&mut self, frames: usize) -> Result<&[i16], Error> {
        self.read_frames(frames)
    }

    /// Reads processed frames into `dest`, as many whole frames as fit. Returns the
    /// number of copied samples.
    pub fn read_to(&mut self, dest: &mut [i16]) -> Result<usize, Error> {
        let frames = dest.len() / self.engine.channels();
        let samples = self.read_frames(frames)?;
        dest[..samples.len()].copy_from_slice(samples);
        Ok(samples.len())
    }

    /// Forces the stream to produce output from everything it still buffers.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.engine.flush()
    }

    /// Clears all buffered samples and processing state, keeping the parameters.
    pub fn reset(&mut self) {
        self.engine.reset();
    }

    /// Number of unprocessed frames in the input buffer.
    pub fn num_input_samples(&self) -> usize {
        self.engine.input.len()
    }

    /// Number of processed frames waiting in the output buffer.
    pub fn num_output_samples(&self) -> usize {
        self.engine.output.len()
    }

    /// The stream's sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.engine.sample_rate()
    }

    /// The stream's interleaved channel count.
    pub fn channels(&self) -> usize {
        self.engine.channels()
    }

    /// The playback speed factor; 2.0 plays twice as fast at unchanged pitch.
    pub fn speed(&self) -> f64 {
        self.engine.speed()
    }

    /// Sets the playback speed factor.
    pub fn set_speed(&mut self, speed: f64) {
        self.engine.set_speed(speed);
    }

    /// The pitch scale factor; 1.3 plays 30% higher at unchanged speed.
    pub fn pitch(&self) -> f64 {
        self.engine.pitch()
    }

    /// Sets the pitch scale factor.
    pub fn set_pitch(&mut self, pitch: f64) {
        self.engine.set_pitch(pitch);
    }

    /// The playback rate factor; 2.0 plays twice as fast at twice the pitch.
    pub fn rate(&self) -> f64 {
        self.engine.rate()
    }

    /// Sets the playback rate factor, which scales speed and pitch together.
    pub fn set_rate(&mut self, rate: f64) {
        self.engine.set_rate(rate);
    }

    /// The volume scale factor; 2.0 plays twice as loud, saturating at full scale.
    pub fn volume(&self) -> f64 {
        self.engine.volume()
    }

    /// Sets the volume scale factor.
    pub fn set_volume(&mut self, volume: f64) {
        self.engine.set_volume(volume);
    }

    /// Whether the full-resolution pitch search is enabled.
    pub fn quality(&self) -> bool {
        self.engine.quality()
    }

    /// Enables the full-resolution pitch search. The default (false) is virtually as
    /// good, but very much faster.
    pub fn set_quality(&mut self, quality: bool) {
        self.engine.set_quality(quality);
    }

    /// Whether the overlap-add stage uses a sine ramp instead of a linear one.
    pub fn use_sin_overlap(&self) -> bool {
        self.engine.use_sin_overlap()
    }

    /// Selects a sine ramp instead of a linear one for the overlap-add stage.
    pub fn set_use_sin_overlap(&mut self, use_sin_overlap: bool) {
        self.engine.set_use_sin_overlap(use_sin_overlap);
    }

    /// Serves a read of `frames` frames, bypassing the DSP chain while no
    /// adjustments are active.
    fn read_frames(&mut self, frames: usize) -> Result<&[i16], Error> {
        if frames == 0 {
            return Ok(&[]);
        }

        let input_len = self.engine.input.len();
        let output_len = self.engine.output.len();
        let rate = self.engine.effective_rate();
        let speed = self.engine.effective_speed();

        if speed > 0.99999 && speed < 1.00001 && rate == 1.0 && self.engine.volume() == 1.0 {
            if input_len >= frames || output_len >= frames {
                if output_len == 0 {
                    // nothing pending from earlier processing: serve the input as is
                    self.engine.book_input_playtime(input_len - frames);
                    return self.engine.input.read_slice(frames);
                } else if output_len >= frames {
                    return self.engine.output.read_slice(frames);
                } else if input_len >= output_len {
                    // hand over from processed leftovers to pass-through input,
                    // cross-fading the boundary to avoid a click
                    self.engine.book_input_playtime(input_len - frames);
                    let (input, output) = self.engine.buffers_mut();
                    let fresh = input.read_slice_mut(frames)?;
                    let pending = output.read_slice(output_len)?;
                    cross_fade(fresh, pending);
                    return Ok(fresh);
                }
            }
        } else {
            self.engine.process_stream_input()?;
            if self.engine.output.len() >= frames {
                return self.engine.output.read_slice(frames);
            }
        }

        Ok(&[])
    }
}

// -------------------------------------------------------------------------------------------------

/// Cross-fades `pending` into the start of `fresh`: the pending tail ramps down
/// while the fresh samples ramp up.
fn cross_fade(fresh: &mut [i16], pending: &[i16]) {
    let len = pending.len() as i32;
    for (i, (sample, &tail)) in fresh.iter_mut().zip(pending).enumerate() {
        let up = i as i32;
        *sample = ((i32::from(tail) * (len - up) + i32::from(*sample) * up) / len) as i16;
    }
}

// -------------------------------------------------------------------------------------------------
