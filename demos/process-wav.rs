//! Reads a 16-bit PCM WAV file, runs it through a presto [`Stream`] and writes the
//! result to another WAV file.
//!
//! ```sh
//! cargo run --example process-wav -- -i speech.wav -s 1.5 -o faster.wav
//! ```

use std::path::PathBuf;

use arg::{parse_args, Args};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use presto::Stream;

// -------------------------------------------------------------------------------------------------

const DEFAULT_LOG_LEVEL: log::Level = if cfg!(debug_assertions) {
    log::Level::Debug
} else {
    log::Level::Warn
};

/// Frames pushed through the stream per chunk.
const CHUNK_FRAMES: usize = 4096;

// -------------------------------------------------------------------------------------------------

/// Program arguments of the WAV processing demo.
#[derive(Args, Debug, Default)]
struct Arguments {
    #[arg(short = "s", long = "speed")]
    /// Set speed up factor. 2.0 means 2X faster.
    speed: Option<f64>,
    #[arg(short = "p", long = "pitch")]
    /// Set pitch scaling factor. 1.3 means 30% higher.
    pitch: Option<f64>,
    #[arg(short = "r", long = "rate")]
    /// Set playback rate. 2.0 means 2X faster, and 2X pitch.
    rate: Option<f64>,
    #[arg(short = "v", long = "volume")]
    /// Set volume scale factor. 2.0 means 2X louder.
    volume: Option<f64>,
    #[arg(short = "i", long = "input")]
    /// Input WAV filename.
    input: Option<PathBuf>,
    #[arg(short = "o", long = "output")]
    /// Output WAV filename.
    output: Option<PathBuf>,
}

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args::<Arguments>();

    simple_logger::SimpleLogger::new()
        .with_level(DEFAULT_LOG_LEVEL.to_level_filter())
        .init()
        .expect("Failed to set logger");

    let Some(input_path) = &args.input else {
        return Err("No input WAV file given (pass one with -i)".into());
    };
    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from("out.wav"));

    let mut reader = WavReader::open(input_path)?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample > 16 {
        return Err(format!(
            "Unsupported bit depth: {} bit {:?} (only 16-bit PCM is supported)",
            spec.bits_per_sample, spec.sample_format
        )
        .into());
    }
    log::info!(
        "Processing {} ({} Hz, {} channels)",
        input_path.display(),
        spec.sample_rate,
        spec.channels
    );

    let mut stream = Stream::new(spec.sample_rate, spec.channels as usize);
    stream.set_speed(args.speed.unwrap_or(1.0));
    stream.set_pitch(args.pitch.unwrap_or(1.0));
    stream.set_rate(args.rate.unwrap_or(1.0));
    stream.set_volume(args.volume.unwrap_or(1.0));

    let mut writer = WavWriter::create(
        &output_path,
        WavSpec {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        },
    )?;

    let chunk_size = CHUNK_FRAMES * spec.channels as usize;
    let mut chunk = Vec::with_capacity(chunk_size);
    for sample in reader.samples::<i16>() {
        chunk.push(sample?);
        if chunk.len() == chunk_size {
            stream.write(&chunk)?;
            drain(&mut stream, &mut writer)?;
            chunk.clear();
        }
    }
    if !chunk.is_empty() {
        stream.write(&chunk)?;
        drain(&mut stream, &mut writer)?;
    }

    stream.flush()?;
    drain(&mut stream, &mut writer)?;
    writer.finalize()?;

    log::info!("Wrote {}", output_path.display());
    Ok(())
}

// -------------------------------------------------------------------------------------------------

/// Writes all processed frames the stream currently holds to the WAV file.
fn drain(
    stream: &mut Stream,
    writer: &mut WavWriter<std::io::BufWriter<std::fs::File>>,
) -> Result<(), Box<dyn std::error::Error>> {
    while let Ok(frames) = stream.read(CHUNK_FRAMES) {
        for &sample in frames {
            writer.write_sample(sample)?;
        }
    }
    Ok(())
}
