//! The copying stream facade: push sample slices in, pull processed frames out.

use crate::{engine::Engine, error::Error};

// -------------------------------------------------------------------------------------------------

/// A streaming speed, pitch, rate and volume processor for 16-bit PCM audio.
///
/// Samples pushed with one of the write calls are copied into the stream's input
/// buffer, processed immediately, and accumulate in the output buffer until read.
/// Output frames come out in strict FIFO order of the input frames that produced
/// them. Parameters may change between any two calls and apply to all input that is
/// still buffered.
///
/// Reads hand out slices borrowed from the output buffer, so draining does not copy;
/// a returned slice stays valid until the stream is used again. Reading from an
/// empty stream returns [`Error::EndOfStream`], the regular end-of-drain signal.
///
/// ```
/// use presto::Stream;
///
/// # fn main() -> Result<(), presto::Error> {
/// let mut stream = Stream::new(8000, 1);
/// stream.set_speed(1.5);
/// stream.write(&vec![0i16; 3200])?;
/// stream.flush()?;
/// let faster = stream.read_all()?;
/// assert!(faster.len() < 3200);
/// # Ok(())
/// # }
/// ```
pub struct Stream {
    engine: Engine,
}

impl Stream {
    /// Creates a stream for interleaved audio with the given sample rate and channel
    /// count. The sample rate must be at least twice [`MAX_PITCH`](crate::MAX_PITCH).
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            engine: Engine::new(sample_rate, channels),
        }
    }

    /// Appends interleaved `i16` samples and processes them.
    pub fn write(&mut self, samples: &[i16]) -> Result<(), Error> {
        self.engine.add_samples(samples)?;
        self.engine.process_stream_input()
    }

    /// Appends interleaved `f64` samples in `[-1, 1]` and processes them.
    pub fn write_floats(&mut self, samples: &[f64]) -> Result<(), Error> {
        self.engine.add_float_samples(samples)?;
        self.engine.process_stream_input()
    }

    /// Appends interleaved unsigned 8-bit samples and processes them.
    pub fn write_bytes(&mut self, samples: &[u8]) -> Result<(), Error> {
        self.engine.add_byte_samples(samples)?;
        self.engine.process_stream_input()
    }

    /// Reads up to `frames` processed frames.
    pub fn read(&mut self, frames: usize) -> Result<&[i16], Error> {
        self.engine.output.read_slice(frames)
    }

    /// Reads all processed frames, emptying the output buffer.
    pub fn read_all(&mut self) -> Result<&[i16], Error> {
        self.engine.output.read_all()
    }

    /// Reads processed frames into `dest`, as many whole frames as fit. Returns the
    /// number of copied samples.
    pub fn read_to(&mut self, dest: &mut [i16]) -> Result<usize, Error> {
        let frames = dest.len() / self.engine.channels();
        if frames == 0 {
            return Ok(0);
        }
        let samples = self.engine.output.read_slice(frames)?;
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
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_round_trip_preserves_samples() {
        let mut stream = Stream::new(8000, 2);
        let input: Vec<i16> = (0..4000).map(|i| (i % 1000) as i16).collect();
        let mut output = Vec::new();
        for chunk in input.chunks(500) {
            stream.write(chunk).unwrap();
            while let Ok(read) = stream.read(100) {
                output.extend_from_slice(read);
            }
        }
        // with all parameters at 1 the stream is a plain FIFO
        assert_eq!(output, input);
    }

    #[test]
    fn flush_and_drain_empties_the_stream() {
        let mut stream = Stream::new(8000, 1);
        stream.set_speed(1.4);
        stream.write(&[1000; 6000]).unwrap();
        stream.flush().unwrap();
        while stream.read(512).is_ok() {}
        assert_eq!(stream.num_input_samples(), 0);
        assert_eq!(stream.num_output_samples(), 0);
    }

    #[test]
    fn read_to_fills_whole_frames() {
        let mut stream = Stream::new(8000, 2);
        stream.write(&[1, 2, 3, 4, 5, 6]).unwrap();
        let mut dest = [0i16; 5];
        // only two whole stereo frames fit into five samples
        let copied = stream.read_to(&mut dest).unwrap();
        assert_eq!(copied, 4);
        assert_eq!(&dest[..copied], &[1, 2, 3, 4]);
        assert_eq!(stream.num_output_samples(), 1);
    }

    #[test]
    fn invalid_parameters_are_ignored() {
        let mut stream = Stream::new(8000, 1);
        stream.set_speed(1.5);
        stream.set_speed(-1.0);
        assert_eq!(stream.speed(), 1.5);
        stream.set_volume(-0.5);
        assert_eq!(stream.volume(), 1.0);
    }

    #[test]
    fn write_rejects_partial_frames() {
        let mut stream = Stream::new(8000, 2);
        assert_eq!(stream.write(&[1, 2, 3]), Err(Error::InvalidChannels));
    }
}
