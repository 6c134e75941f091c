//! The inner DSP engine shared by all stream facades.

use std::f64::consts::PI;

use crate::{error::Error, samples::SampleBuffer};

pub(crate) mod pitch;
pub(crate) mod rate;

use pitch::PitchDetector;
use rate::RateConverter;

// -------------------------------------------------------------------------------------------------

/// Lowest voice pitch the period search tries to match, in Hz. Going lower than 65
/// could overflow the 32-bit interpolation accumulators.
pub const MIN_PITCH: usize = 65;

/// Highest voice pitch the period search tries to match, in Hz.
pub const MAX_PITCH: usize = 400;

/// Inputs above this sample rate are down-sampled for the coarse period search.
pub const AMDF_FREQ: usize = 4000;

/// Effective speeds closer to 1.0 than this pass the input through unmodified.
const SPEED_EPSILON: f64 = 1e-5;

// -------------------------------------------------------------------------------------------------

/// Time-domain speed, pitch, rate and volume processor for 16-bit PCM speech.
///
/// The engine owns the staged buffers of one stream and runs the processing chain
/// over them: the speed stage inserts or removes whole pitch periods (or fractions of
/// one at high speed-up factors) with an overlap-add ramp, a time-error accumulator
/// deciding between period operations and copying input through unmodified so the
/// effective speed stays exact. When the combined rate factor differs from 1, the
/// speed stage's output is then resampled, and finally the volume scaler runs in
/// place over whatever the call appended.
///
/// Speed and pitch interact: pushed samples are booked with an expected playtime of
/// `frames * sample_period * pitch / speed`, and each processing call re-derives the
/// effective speed from that booking, so parameter changes apply to buffered input
/// exactly once.
pub(crate) struct Engine {
    sample_rate: u32,
    channels: usize,

    /// Length of one frame in seconds.
    sample_period: f64,
    /// Frames needed in the input buffer to run one pitch operation.
    max_required: usize,

    speed: f64,
    pitch: f64,
    rate: f64,
    volume: f64,
    use_sin_overlap: bool,

    pub(crate) input: SampleBuffer,
    pub(crate) output: SampleBuffer,
    detector: PitchDetector,
    converter: RateConverter,

    /// Expected playtime of the current input buffer content, in seconds.
    input_playtime: f64,
    /// Accumulated playtime deviation of the produced output, in seconds. Replaces
    /// PICOLA's count of samples to play unmodified after a period insertion or
    /// deletion: once the error crosses zero, the next period operation runs.
    time_error: f64,
}

impl Engine {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        debug_assert!(channels >= 1, "invalid channel layout");
        debug_assert!(
            sample_rate as usize >= 2 * MAX_PITCH,
            "sample rate too low for the pitch search range"
        );
        let detector = PitchDetector::new(sample_rate, channels);
        let max_required = 2 * detector.max_period();
        let buffer_size = max_required + (max_required >> 2);
        Self {
            sample_rate,
            channels,
            sample_period: 1.0 / f64::from(sample_rate),
            max_required,
            speed: 1.0,
            pitch: 1.0,
            rate: 1.0,
            volume: 1.0,
            use_sin_overlap: false,
            input: SampleBuffer::new(channels, buffer_size),
            output: SampleBuffer::new(channels, buffer_size),
            detector,
            converter: RateConverter::new(sample_rate, channels, buffer_size),
            input_playtime: 0.0,
            time_error: 0.0,
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: f64) {
        if speed <= 0.0 {
            log::warn!("Ignoring invalid playback speed factor: {speed}");
            return;
        }
        self.speed = speed;
    }

    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    pub fn set_pitch(&mut self, pitch: f64) {
        if pitch <= 0.0 {
            log::warn!("Ignoring invalid pitch scale factor: {pitch}");
            return;
        }
        self.pitch = pitch;
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Sets the playback rate, which scales pitch and speed at the same time.
    pub fn set_rate(&mut self, rate: f64) {
        if rate <= 0.0 {
            log::warn!("Ignoring invalid playback rate factor: {rate}");
            return;
        }
        self.rate = rate;
        self.converter.reset_positions();
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f64) {
        if volume < 0.0 {
            log::warn!("Ignoring invalid volume scale factor: {volume}");
            return;
        }
        self.volume = volume;
    }

    pub fn quality(&self) -> bool {
        self.detector.quality()
    }

    /// Enables the full-resolution pitch search. The default (false) is virtually as
    /// good, but very much faster.
    pub fn set_quality(&mut self, quality: bool) {
        self.detector.set_quality(quality);
    }

    pub fn use_sin_overlap(&self) -> bool {
        self.use_sin_overlap
    }

    /// Selects a sine ramp for the overlap-add stage, which can improve quality
    /// slightly at the expense of floating point math per sample.
    pub fn set_use_sin_overlap(&mut self, use_sin_overlap: bool) {
        self.use_sin_overlap = use_sin_overlap;
    }

    /// Clears all buffered samples and processing state, readying the engine for a
    /// new source. The configured parameters are kept.
    pub fn reset(&mut self) {
        self.input.reset();
        self.output.reset();
        self.detector.reset();
        self.converter.reset();
        self.input_playtime = 0.0;
        self.time_error = 0.0;
    }

    /// Appends interleaved `i16` samples to the input buffer.
    pub fn add_samples(&mut self, samples: &[i16]) -> Result<(), Error> {
        self.input.add_samples(samples)?;
        self.update_input_playtime();
        Ok(())
    }

    /// Converts `f64` samples in `[-1, 1]` and appends them to the input buffer.
    pub fn add_float_samples(&mut self, samples: &[f64]) -> Result<(), Error> {
        self.input.add_float_samples(samples)?;
        self.update_input_playtime();
        Ok(())
    }

    /// Converts unsigned 8-bit samples and appends them to the input buffer.
    pub fn add_byte_samples(&mut self, samples: &[u8]) -> Result<(), Error> {
        self.input.add_byte_samples(samples)?;
        self.update_input_playtime();
        Ok(())
    }

    /// Appends `n` silent frames to the input buffer.
    pub fn add_empty_samples(&mut self, n: usize) -> Result<(), Error> {
        self.input.write_empty(n)?;
        self.update_input_playtime();
        Ok(())
    }

    /// Re-books the expected playtime of the input buffer content after its length
    /// changed. Must be called after any outside mutation of the input buffer, such
    /// as committing a raw borrow.
    pub fn update_input_playtime(&mut self) {
        self.book_input_playtime(self.input.len());
    }

    /// Books the expected playtime for `frames` buffered input frames. Used when the
    /// buffer length is about to change but the slice borrow is still pending.
    pub fn book_input_playtime(&mut self, frames: usize) {
        self.input_playtime = frames as f64 * self.sample_period / (self.speed / self.pitch);
    }

    /// Mutable access to the input and output buffer at once, for callers that
    /// shuffle samples between the two.
    pub fn buffers_mut(&mut self) -> (&mut SampleBuffer, &mut SampleBuffer) {
        (&mut self.input, &mut self.output)
    }

    /// Effective playback rate applied by the resampling stage.
    pub fn effective_rate(&self) -> f64 {
        self.rate * self.pitch
    }

    /// Effective speed of the currently buffered input, derived from its booked
    /// playtime.
    pub fn effective_speed(&self) -> f64 {
        self.input.len() as f64 * self.sample_period / self.input_playtime
    }

    /// Runs the processing chain over the buffered input, appending to the output
    /// buffer. Frames already in the output buffer are never touched again.
    pub fn process_stream_input(&mut self) -> Result<(), Error> {
        if self.input.is_empty() {
            return Ok(());
        }
        let output_len = self.output.len();

        let rate = self.effective_rate();
        let speed = self.effective_speed();

        if (speed - 1.0).abs() >= SPEED_EPSILON {
            self.change_speed(speed)?;
        } else {
            self.move_input_to_output()?;
        }

        if rate != 1.0 && self.output.len() > output_len {
            {
                let tail = self.output.read_slice_at(output_len)?;
                self.converter.stage(tail)?;
            }
            self.converter.process(rate, &mut self.output)?;
        }

        if self.volume != 1.0 && self.output.len() > output_len {
            let fixed_volume = (self.volume * 256.0) as i32;
            self.output.scale(output_len, fixed_volume)?;
        }

        Ok(())
    }

    /// Forces the engine to produce output from whatever it still buffers. No extra
    /// delay is added, but flushing in the middle of a word can distort it. A flush
    /// with nothing buffered only clears the accumulators, so flushing twice in a
    /// row emits nothing new.
    pub fn flush(&mut self) -> Result<(), Error> {
        if self.input.is_empty() && self.converter.buffered() == 0 {
            self.input_playtime = 0.0;
            self.time_error = 0.0;
            return Ok(());
        }

        let speed = self.speed / self.pitch;
        let rate = self.effective_rate();
        let expected = self.output.len()
            + ((self.input.len() as f64 / speed + self.converter.buffered() as f64) / rate + 0.5)
                .round() as usize;

        // Pad the input so the processing chain runs through all real frames.
        self.add_empty_samples(2 * self.max_required * self.channels)?;
        self.process_stream_input()?;

        if self.output.len() > expected {
            self.output.truncate(expected);
        }
        self.input.reset();
        self.converter.reset();
        self.input_playtime = 0.0;
        self.time_error = 0.0;
        Ok(())
    }

    /// Moves the entire input buffer through unmodified.
    fn move_input_to_output(&mut self) -> Result<(), Error> {
        self.input_playtime = 0.0;
        self.input.move_all_to(&mut self.output)
    }

    /// Runs pitch period operations over the input until fewer than `max_required`
    /// frames remain, keeping the time error around zero by copying stretches of
    /// input through unmodified in between.
    fn change_speed(&mut self, speed: f64) -> Result<(), Error> {
        if self.input.len() < self.max_required {
            return Ok(());
        }
        let playtime = self.input_playtime;
        let total_frames = self.input.len();

        loop {
            if (speed > 1.0 && speed < 2.0 && self.time_error < 0.0)
                || (speed < 1.0 && speed > 0.5 && self.time_error > 0.0)
            {
                // PICOLA is still copying input samples to the output unmodified.
                self.move_unmodified_samples(speed)?;
            } else {
                // Insert or remove one pitch period, or a portion of one for
                // speeds beyond 2.0X.
                let period = self.detector.find_period(&self.input, true)?;
                let new_samples = if speed > 1.0 {
                    let emitted = self.skip_pitch_period(speed, period)?;
                    if speed < 2.0 {
                        self.time_error += emitted as f64 * self.sample_period
                            - (period + emitted) as f64 * playtime / total_frames as f64;
                    }
                    emitted
                } else {
                    let emitted = self.insert_pitch_period(speed, period)?;
                    if speed > 0.5 {
                        self.time_error += (period + emitted) as f64 * self.sample_period
                            - emitted as f64 * playtime / total_frames as f64;
                    }
                    emitted
                };
                if new_samples == 0 {
                    // An extreme factor shrank the period operation to nothing;
                    // without forward progress the loop cannot continue.
                    return Ok(());
                }
            }

            if self.input.len() < self.max_required {
                break;
            }
        }

        self.input_playtime = playtime * self.input.len() as f64 / total_frames as f64;
        Ok(())
    }

    /// Copies input frames to the output unmodified until the time error catches up
    /// with the next period operation.
    fn move_unmodified_samples(&mut self, speed: f64) -> Result<(), Error> {
        let wanted = (1.0 - self.time_error * speed / (self.sample_period * (speed - 1.0))).round();

        let moved;
        if wanted > self.input.len() as f64 {
            moved = self.input.len() as f64;
            self.input.move_all_to(&mut self.output)?;
        } else {
            moved = wanted;
            self.input.move_to(&mut self.output, wanted as usize)?;
        }
        self.time_error += moved * self.sample_period * (speed - 1.0) / speed;
        Ok(())
    }

    /// Removes one pitch period from the input (or overlaps a fraction of one for
    /// speeds of 2.0X and beyond). Returns the number of frames appended.
    fn skip_pitch_period(&mut self, speed: f64, period: usize) -> Result<usize, Error> {
        let new_samples = if speed >= 2.0 {
            (period as f64 / (speed - 1.0)).round() as usize
        } else {
            period
        };
        self.overlap_add(new_samples, period)?;
        self.input.drop_slice(new_samples + period)?;
        Ok(new_samples)
    }

    /// Duplicates one pitch period in the output. Returns the number of frames the
    /// input advanced.
    fn insert_pitch_period(&mut self, speed: f64, period: usize) -> Result<usize, Error> {
        let new_samples = if speed <= 0.5 {
            (period as f64 * speed / (1.0 - speed)) as usize
        } else {
            period
        };
        self.input.copy_to(&mut self.output, period)?;
        self.overlap_add(new_samples, period)?;
        self.input.drop_slice(new_samples)?;
        Ok(new_samples)
    }

    /// Overlaps the two input segments one pitch period apart, ramping the first
    /// down while ramping the second up, and appends the blend to the output.
    fn overlap_add(&mut self, num_samples: usize, period: usize) -> Result<(), Error> {
        let frame = self.output.write_empty(num_samples)?;
        for i in 0..num_samples {
            for channel in 0..self.channels {
                let down = self.input.get_channel(i, channel)?;
                let up = self.input.get_channel(i + period, channel)?;
                let value = if self.use_sin_overlap {
                    let ratio = (i as f64 * PI / (2.0 * num_samples as f64)).sin();
                    (f64::from(down) * (1.0 - ratio) + f64::from(up) * ratio) as i16
                } else {
                    ((i32::from(down) * (num_samples - i) as i32 + i32::from(up) * i as i32)
                        / num_samples as i32) as i16
                };
                self.output.set_channel(frame + i, channel, value);
            }
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine_frames(sample_rate: u32, freq: f64, amplitude: f64, frames: usize) -> Vec<i16> {
        (0..frames)
            .map(|i| (amplitude * (2.0 * PI * freq * i as f64 / sample_rate as f64).sin()) as i16)
            .collect()
    }

    /// Magnitude of the signal's correlation with a probe tone at `freq`.
    fn tone_magnitude(samples: &[i16], sample_rate: u32, freq: f64) -> f64 {
        let mut re = 0.0;
        let mut im = 0.0;
        for (i, &sample) in samples.iter().enumerate() {
            let phase = 2.0 * PI * freq * i as f64 / f64::from(sample_rate);
            re += f64::from(sample) * phase.cos();
            im += f64::from(sample) * phase.sin();
        }
        (re * re + im * im).sqrt() / samples.len() as f64
    }

    fn drain(engine: &mut Engine) -> Vec<i16> {
        match engine.output.read_all() {
            Ok(samples) => samples.to_vec(),
            Err(Error::EndOfStream) => Vec::new(),
            Err(err) => panic!("unexpected drain error: {err}"),
        }
    }

    #[test]
    fn unity_parameters_pass_input_through() {
        let mut engine = Engine::new(8000, 1);
        let input = sine_frames(8000, 200.0, 10000.0, 3000);
        for chunk in input.chunks(480) {
            engine.add_samples(chunk).unwrap();
            engine.process_stream_input().unwrap();
        }
        assert_eq!(drain(&mut engine), input);
        assert_eq!(engine.input.len(), 0);
    }

    #[test]
    fn speed_up_shortens_by_the_expected_ratio() {
        // 16000 frames of a 200 Hz tone at 1.5X come out at 10667 frames, give or
        // take the final pitch period, with the tone itself unchanged
        let mut engine = Engine::new(8000, 1);
        engine.set_speed(1.5);
        engine
            .add_samples(&sine_frames(8000, 200.0, 10000.0, 16000))
            .unwrap();
        engine.process_stream_input().unwrap();
        engine.flush().unwrap();
        let output = drain(&mut engine);
        assert!(
            (10600..=10800).contains(&output.len()),
            "unexpected output length {}",
            output.len()
        );

        let peak = tone_magnitude(&output, 8000, 200.0);
        for off_freq in [190.0, 195.0, 205.0, 210.0] {
            assert!(
                tone_magnitude(&output, 8000, off_freq) < peak / 2.0,
                "off-peak tone at {off_freq} Hz rivals the 200 Hz peak"
            );
        }
    }

    #[test]
    fn slow_down_lengthens_by_the_expected_ratio() {
        let mut engine = Engine::new(8000, 1);
        engine.set_speed(0.75);
        engine
            .add_samples(&sine_frames(8000, 150.0, 10000.0, 16000))
            .unwrap();
        engine.process_stream_input().unwrap();
        engine.flush().unwrap();
        let produced = engine.output.len() as f64;
        let expected = 16000.0 / 0.75;
        let max_period = (8000 / MIN_PITCH) as f64;
        assert!(
            (produced - expected).abs() <= max_period,
            "{produced} frames, expected {expected}"
        );
    }

    #[test]
    fn flush_output_matches_the_predicted_bound() {
        let mut engine = Engine::new(8000, 1);
        engine.set_speed(1.5);
        engine
            .add_samples(&sine_frames(8000, 200.0, 10000.0, 4000))
            .unwrap();
        engine.process_stream_input().unwrap();

        let expected =
            engine.output.len() + ((engine.input.len() as f64 / 1.5) + 0.5).round() as usize;
        engine.flush().unwrap();
        assert!(engine.output.len() <= expected);
        assert!(engine.output.len() + 1 >= expected);
        assert_eq!(engine.input.len(), 0);
    }

    #[test]
    fn flush_on_empty_input_is_a_no_op() {
        let mut engine = Engine::new(8000, 1);
        engine.set_speed(1.3);
        engine
            .add_samples(&sine_frames(8000, 200.0, 10000.0, 4000))
            .unwrap();
        engine.process_stream_input().unwrap();
        engine.flush().unwrap();
        drain(&mut engine);

        engine.flush().unwrap();
        assert_eq!(engine.output.len(), 0);
        assert_eq!(engine.input.len(), 0);
    }

    #[test]
    fn rate_halving_doubles_length_and_halves_the_tone() {
        let mut engine = Engine::new(16000, 1);
        engine.set_rate(0.5);
        engine
            .add_samples(&sine_frames(16000, 880.0, 10000.0, 16000))
            .unwrap();
        engine.process_stream_input().unwrap();
        engine.flush().unwrap();
        let output = drain(&mut engine);
        assert!(
            (output.len() as i64 - 32000).abs() <= 1,
            "unexpected output length {}",
            output.len()
        );

        let peak = tone_magnitude(&output, 16000, 440.0);
        for off_freq in [425.0, 433.0, 447.0, 455.0, 880.0] {
            assert!(
                tone_magnitude(&output, 16000, off_freq) < peak / 2.0,
                "off-peak tone at {off_freq} Hz rivals the 440 Hz peak"
            );
        }
    }

    #[test]
    fn unity_rate_skips_the_resampling_stage() {
        let mut engine = Engine::new(8000, 1);
        let input = sine_frames(8000, 200.0, 10000.0, 2000);
        engine.add_samples(&input).unwrap();
        engine.process_stream_input().unwrap();
        assert_eq!(engine.converter.buffered(), 0);
        assert_eq!(drain(&mut engine), input);
    }

    #[test]
    fn volume_scales_and_saturates_new_output() {
        let mut engine = Engine::new(8000, 1);
        engine.set_volume(2.0);
        engine.add_samples(&[20000; 256]).unwrap();
        engine.process_stream_input().unwrap();
        assert!(drain(&mut engine).iter().all(|&sample| sample == 32767));

        engine.set_volume(0.5);
        engine.add_samples(&[20000; 256]).unwrap();
        engine.process_stream_input().unwrap();
        assert!(drain(&mut engine).iter().all(|&sample| sample == 10000));
    }

    #[test]
    fn mid_stream_speed_change_settles_on_the_new_ratio() {
        let mut engine = Engine::new(8000, 1);
        let tone = sine_frames(8000, 200.0, 10000.0, 16000);
        for chunk in tone.chunks(800).take(10) {
            engine.add_samples(chunk).unwrap();
            engine.process_stream_input().unwrap();
        }
        drain(&mut engine);

        engine.set_speed(1.5);
        let mut produced = 0usize;
        for chunk in tone.chunks(800).skip(10) {
            engine.add_samples(chunk).unwrap();
            engine.process_stream_input().unwrap();
            produced += drain(&mut engine).len();
        }
        engine.flush().unwrap();
        produced += drain(&mut engine).len();

        let consumed = 8000.0;
        let expected = consumed / 1.5;
        assert!(
            (produced as f64 - expected).abs() <= expected * 0.01,
            "{produced} frames for {consumed} input frames at 1.5X"
        );
    }

    #[test]
    fn stereo_pitch_shift_keeps_duration_and_channel_balance() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut engine = Engine::new(44100, 2);
        engine.set_pitch(1.2);
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let input: Vec<i16> = (0..44100 * 2)
            .map(|_| rng.gen_range(-10000..10000))
            .collect();
        engine.add_samples(&input).unwrap();
        engine.process_stream_input().unwrap();
        engine.flush().unwrap();

        let output = drain(&mut engine);
        let frames = output.len() / 2;
        assert!(
            (44090..=44110).contains(&frames),
            "unexpected output length {frames}"
        );

        let rms = |channel: usize| {
            let sum: f64 = output
                .iter()
                .skip(channel)
                .step_by(2)
                .map(|&sample| f64::from(sample) * f64::from(sample))
                .sum();
            (sum / frames as f64).sqrt()
        };
        let (left, right) = (rms(0), rms(1));
        assert!(
            (left - right).abs() <= left * 0.01,
            "channel imbalance: {left} vs {right}"
        );
    }

    #[test]
    fn overlap_add_with_zero_length_emits_nothing() {
        let mut engine = Engine::new(8000, 1);
        engine.add_samples(&[500; 300]).unwrap();
        engine.overlap_add(0, 50).unwrap();
        assert_eq!(engine.output.len(), 0);
    }

    #[test]
    fn reset_clears_state_but_keeps_parameters() {
        let mut engine = Engine::new(8000, 1);
        engine.set_speed(1.5);
        engine
            .add_samples(&sine_frames(8000, 200.0, 10000.0, 4000))
            .unwrap();
        engine.process_stream_input().unwrap();
        engine.reset();
        assert_eq!(engine.input.len(), 0);
        assert_eq!(engine.output.len(), 0);
        assert_eq!(engine.speed(), 1.5);
    }
}
