//! **presto** changes the speed, pitch, playback rate and volume of 16-bit PCM
//! speech in the time domain. Speeding up or slowing down works by removing or
//! inserting whole pitch periods with an overlap-add ramp, so the perceived pitch
//! stays put even at large factors; pitch and rate changes resample the result with
//! a fixed windowed-sinc filter.
//!
//! ### Overview
//!
//! - **[`Stream`]** is the regular streaming interface. Push interleaved `i16`,
//!   `f64` or `u8` samples, pull processed `i16` frames, change parameters whenever
//!   you like in between.
//!
//! - **[`ZeroCopyStream`]** feeds decoders that can write straight into the
//!   stream's input buffer: [`ZeroCopyStream::process`] borrows the buffer tail,
//!   lets a closure fill it in place and returns processed frames, bypassing the
//!   DSP chain entirely while all parameters are neutral.
//!
//! - **[`change_speed`]**, **[`change_float_speed`]** and **[`change_byte_speed`]**
//!   process a complete clip in one call.
//!
//! - **[`RingBuffer`]** and **[`SampleBuffer`]** are the buffers underneath, usable
//!   on their own for staging interleaved PCM.
//!
//! ### Getting started
//!
//! ```
//! use presto::Stream;
//!
//! fn main() -> Result<(), presto::Error> {
//!     // Speech sampled at 16 kHz, mono, played at 1.4X without getting squeaky.
//!     let mut stream = Stream::new(16000, 1);
//!     stream.set_speed(1.4);
//!
//!     let recording = vec![0i16; 16000];
//!     for chunk in recording.chunks(3200) {
//!         stream.write(chunk)?;
//!         while let Ok(frames) = stream.read(1024) {
//!             // hand the processed frames to a sink
//!             let _ = frames;
//!         }
//!     }
//!
//!     // Push out everything still buffered at the end of the recording.
//!     stream.flush()?;
//!     let _tail = stream.read_all();
//!     Ok(())
//! }
//! ```
//!
//! The engine processes speech-like signals best: the pitch period search is bounded
//! to the 65..400 Hz range of human voices. Music passes through fine but may warble
//! at large speed factors.

mod batch;
mod buffer;
mod engine;
mod error;
mod samples;
mod stream;
mod zerocopy;

pub use batch::{change_byte_speed, change_float_speed, change_speed};
pub use buffer::RingBuffer;
pub use error::Error;
pub use samples::SampleBuffer;
pub use stream::Stream;
pub use zerocopy::ZeroCopyStream;

pub use engine::{AMDF_FREQ, MAX_PITCH, MIN_PITCH};
pub use engine::rate::{SINC_FILTER_POINTS, SINC_TABLE_SIZE};
