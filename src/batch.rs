//! One-shot conveniences for processing a complete clip at once.

use crate::{error::Error, stream::Stream};

// -------------------------------------------------------------------------------------------------

/// Processes a complete clip of interleaved `i16` samples with the given speed,
/// pitch, rate and volume factors, returning the processed clip.
pub fn change_speed(
    sample_rate: u32,
    channels: usize,
    speed: f64,
    pitch: f64,
    rate: f64,
    volume: f64,
    samples: &[i16],
) -> Result<Vec<i16>, Error> {
    let mut stream = configured_stream(sample_rate, channels, speed, pitch, rate, volume);
    stream.write(samples)?;
    stream.flush()?;
    Ok(stream.read_all()?.to_vec())
}

/// Same as [`change_speed`], for `f64` samples in `[-1, 1]`.
pub fn change_float_speed(
    sample_rate: u32,
    channels: usize,
    speed: f64,
    pitch: f64,
    rate: f64,
    volume: f64,
    samples: &[f64],
) -> Result<Vec<f64>, Error> {
    let mut stream = configured_stream(sample_rate, channels, speed, pitch, rate, volume);
    stream.write_floats(samples)?;
    stream.flush()?;
    let output = stream.read_all()?;
    Ok(output
        .iter()
        .map(|&sample| f64::from(sample) / 32767.0)
        .collect())
}

/// Same as [`change_speed`], for unsigned 8-bit samples.
pub fn change_byte_speed(
    sample_rate: u32,
    channels: usize,
    speed: f64,
    pitch: f64,
    rate: f64,
    volume: f64,
    samples: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut stream = configured_stream(sample_rate, channels, speed, pitch, rate, volume);
    stream.write_bytes(samples)?;
    stream.flush()?;
    let output = stream.read_all()?;
    Ok(output.iter().map(|&sample| ((sample >> 8) + 128) as u8).collect())
}

// -------------------------------------------------------------------------------------------------

fn configured_stream(
    sample_rate: u32,
    channels: usize,
    speed: f64,
    pitch: f64,
    rate: f64,
    volume: f64,
) -> Stream {
    let mut stream = Stream::new(sample_rate, channels);
    stream.set_speed(speed);
    stream.set_pitch(pitch);
    stream.set_rate(rate);
    stream.set_volume(volume);
    stream
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

    #[test]
    fn speed_up_returns_the_complete_shortened_clip() {
        let input = sine_frames(8000, 200.0, 10000.0, 16000);
        let output = change_speed(8000, 1, 1.5, 1.0, 1.0, 1.0, &input).unwrap();
        assert!(
            (10600..=10800).contains(&output.len()),
            "unexpected output length {}",
            output.len()
        );
    }

    #[test]
    fn neutral_factors_round_trip_floats() {
        let input: Vec<f64> = (0..4000)
            .map(|i| (2.0 * PI * 220.0 * i as f64 / 8000.0).sin() * 0.5)
            .collect();
        let output = change_float_speed(8000, 1, 1.0, 1.0, 1.0, 1.0, &input).unwrap();
        assert_eq!(output.len(), input.len());
        for (produced, original) in output.iter().zip(&input) {
            // one 16-bit quantization step of tolerance
            assert!((produced - original).abs() <= 1.0 / 32767.0);
        }
    }

    #[test]
    fn byte_samples_survive_a_neutral_pass() {
        let input: Vec<u8> = (0..4000).map(|i| (i % 256) as u8).collect();
        let output = change_byte_speed(8000, 1, 1.0, 1.0, 1.0, 1.0, &input).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn volume_only_processing_saturates() {
        let output = change_speed(8000, 1, 1.0, 1.0, 1.0, 2.0, &[20000i16; 2000]).unwrap();
        assert_eq!(output.len(), 2000);
        assert!(output.iter().all(|&sample| sample == 32767));
    }
}
