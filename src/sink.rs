//! Output sinks (spec.md §4.7): the engine writes blocks of interleaved
//! stereo int16 to one or more of these. A WAV file sink is always cheap
//! to attach; a live device sink is attached for the `play` subcommand.
//! Both can be attached at once (SPEC_FULL.md §10, "Dual sink fan-out").

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, warn};

use crate::error::{Diagnostic, ErrorKind};

fn io_err(message: impl Into<String>) -> Diagnostic {
    Diagnostic::new(ErrorKind::Io, 0, 0, message.into())
}

/// `open` may reduce the requested sample rate to the nearest one the sink
/// actually supports; callers must use the value it writes back.
pub trait Sink {
    fn open(&mut self, channels: u16, sample_rate: &mut u32) -> Result<(), Diagnostic>;
    fn write(&mut self, frames: &[i16]) -> Result<(), Diagnostic>;
    fn close(&mut self) -> Result<(), Diagnostic>;
}

/// Standard RIFF/WAVE, 16-bit PCM, written via `hound` (spec.md §6, "WAV
/// file layout"). The header is patched on `close` by `hound` itself.
pub struct WavSink {
    path: std::path::PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
}

impl WavSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf(), writer: None }
    }
}

impl Sink for WavSink {
    fn open(&mut self, channels: u16, sample_rate: &mut u32) -> Result<(), Diagnostic> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: *sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&self.path, spec)
            .map_err(|e| io_err(format!("cannot create WAV file {}: {e}", self.path.display())))?;
        info!(path = %self.path.display(), %sample_rate, "opened WAV sink");
        self.writer = Some(writer);
        Ok(())
    }

    fn write(&mut self, frames: &[i16]) -> Result<(), Diagnostic> {
        let writer = self.writer.as_mut().ok_or_else(|| io_err("WAV sink written before open"))?;
        for &s in frames {
            writer.write_sample(s).map_err(|e| io_err(format!("WAV write failed: {e}")))?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), Diagnostic> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|e| io_err(format!("WAV finalize failed: {e}")))?;
        }
        Ok(())
    }
}

/// Queue shared between the render thread (producer) and the `cpal`
/// output callback (consumer). Grounded on `phonon::audio::AudioEngine`'s
/// `Arc<Mutex<Mixer>>` pattern: a plain mutex-guarded queue, since the
/// engine has no real-time deadline of its own to protect (spec.md §5).
struct DeviceQueue {
    samples: VecDeque<i16>,
    underruns: u64,
    /// Underruns since the last successful sample pop; reset on any
    /// non-empty pop, checked by `write` against `MAX_CONSECUTIVE_UNDERRUNS`.
    consecutive_underruns: u64,
}

/// A single underrun is recovered transparently (the callback pads with
/// silence); this many in a row means the producer has stopped keeping up
/// in a way that won't recover on its own, so `write` gives up rather than
/// spinning forever (spec.md §4.7, "on any other write error the engine
/// terminates rendering").
const MAX_CONSECUTIVE_UNDERRUNS: u64 = 200;

/// Live audio device output via `cpal` (spec.md §4.7, "platform audio
/// device"). On underrun the callback pads with silence and keeps
/// running rather than stalling or panicking.
pub struct DeviceSink {
    queue: Arc<Mutex<DeviceQueue>>,
    stream: Option<cpal::Stream>,
    channels: u16,
    high_water: usize,
}

impl DeviceSink {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(DeviceQueue {
                samples: VecDeque::new(),
                underruns: 0,
                consecutive_underruns: 0,
            })),
            stream: None,
            channels: 2,
            high_water: 0,
        }
    }
}

impl Default for DeviceSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for DeviceSink {
    fn open(&mut self, channels: u16, sample_rate: &mut u32) -> Result<(), Diagnostic> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| io_err("no audio output device found"))?;
        let supported = device
            .default_output_config()
            .map_err(|e| io_err(format!("no output config available: {e}")))?;

        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(*sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        self.channels = channels;
        self.high_water = *sample_rate as usize * channels as usize; // ~1s of backpressure cap

        let queue = self.queue.clone();
        let sample_format = supported.sample_format();
        let stream = match sample_format {
            cpal::SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| fill::<i16>(&queue, data),
                |err| error!("audio stream error: {err}"),
                None,
            ),
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| fill::<f32>(&queue, data),
                |err| error!("audio stream error: {err}"),
                None,
            ),
            other => return Err(io_err(format!("unsupported sample format: {other:?}"))),
        }
        .map_err(|e| io_err(format!("cannot build output stream: {e}")))?;

        stream.play().map_err(|e| io_err(format!("cannot start output stream: {e}")))?;
        info!(device = %device.name().unwrap_or_default(), %sample_rate, "opened device sink");
        self.stream = Some(stream);
        Ok(())
    }

    fn write(&mut self, frames: &[i16]) -> Result<(), Diagnostic> {
        loop {
            let mut q = self.queue.lock().unwrap();
            if q.consecutive_underruns >= MAX_CONSECUTIVE_UNDERRUNS {
                let total = q.underruns;
                return Err(io_err(format!(
                    "device sink starved for {MAX_CONSECUTIVE_UNDERRUNS} consecutive callbacks \
                     ({total} underruns total); aborting playback"
                )));
            }
            if q.samples.len() < self.high_water {
                q.samples.extend(frames.iter().copied());
                return Ok(());
            }
            drop(q);
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
    }

    fn close(&mut self) -> Result<(), Diagnostic> {
        let underruns = self.queue.lock().unwrap().underruns;
        if underruns > 0 {
            warn!(underruns, "device sink underran during playback");
        }
        self.stream = None;
        Ok(())
    }
}

/// Drains the shared queue into the callback's output buffer; pads with
/// silence (and counts an underrun) when the queue runs dry.
fn fill<T>(queue: &Arc<Mutex<DeviceQueue>>, data: &mut [T])
where
    T: cpal::Sample + cpal::FromSample<i16>,
{
    let mut q = queue.lock().unwrap();
    for slot in data.iter_mut() {
        *slot = match q.samples.pop_front() {
            Some(s) => {
                q.consecutive_underruns = 0;
                T::from_sample(s)
            }
            None => {
                q.underruns += 1;
                q.consecutive_underruns += 1;
                T::from_sample(0i16)
            }
        };
    }
}
