//! Mikrofon-Capture
//!
//! cpal liefert PCM im Takt des Geräts. Der Callback mischt auf Mono,
//! resampled auf 8kHz und legt die Samples in einen Ring-Buffer. Ein
//! Tokio-Task holt alle 20ms einen Frame, encodiert ihn als G.711 µ-law
//! und schreibt ihn in den Audio-Track.

use super::devices::select_best_config;
use super::media::{MediaError, MediaTrack, PCMU_CLOCK_RATE};
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Frame-Dauer (20ms)
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Samples pro Frame (20ms @ 8kHz = 160 samples)
pub const FRAME_SIZE: usize = (PCMU_CLOCK_RATE / 50) as usize;

/// Buffer Size für den Capture-Ring-Buffer
const RING_BUFFER_SIZE: usize = FRAME_SIZE * 10;

// ============================================================================
// ENCODING
// ============================================================================

/// Encodiert ein Sample (-1.0..=1.0) nach G.711 µ-law
pub fn encode_mulaw(sample: f32) -> u8 {
    const BIAS: i32 = 0x84;
    const CLIP: i32 = 32635;

    let mut pcm = (sample.clamp(-1.0, 1.0) * 32767.0) as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    pcm = pcm.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;

    !(sign | (exponent << 4) | mantissa) as u8
}

// ============================================================================
// CAPTURE BUFFER
// ============================================================================

struct BufferState {
    ring: HeapRb<f32>,
    /// Position im nächsten Block, in Geräte-Frames
    phase: f32,
}

/// Ring-Buffer zwischen Audio-Callback und Sende-Task
pub struct CaptureBuffer {
    source_rate: u32,
    channels: usize,
    state: Mutex<BufferState>,
}

impl CaptureBuffer {
    pub fn new(source_rate: u32, channels: u16) -> Self {
        Self {
            source_rate,
            channels: usize::from(channels.max(1)),
            state: Mutex::new(BufferState {
                ring: HeapRb::new(RING_BUFFER_SIZE),
                phase: 0.0,
            }),
        }
    }

    /// Nimmt einen interleaved Block vom Gerät entgegen
    pub fn push_block(&self, data: &[f32]) {
        let mono: Vec<f32> = data
            .chunks(self.channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        if mono.is_empty() {
            return;
        }

        let step = self.source_rate as f32 / PCMU_CLOCK_RATE as f32;
        let len = mono.len() as f32;
        let mut state = self.state.lock();
        let mut pos = state.phase;

        while pos < len {
            // Mittelwert über das Fenster eines Ziel-Samples
            let start = pos as usize;
            let end = ((pos + step) as usize).clamp(start + 1, mono.len());
            let window = &mono[start..end];
            let sample = window.iter().sum::<f32>() / window.len() as f32;

            // Voller Buffer: neue Samples verwerfen
            let _ = state.ring.try_push(sample);
            pos += step;
        }
        state.phase = pos - len;
    }

    /// Nächster µ-law Frame, falls genug Samples vorliegen
    pub fn read_frame(&self) -> Option<Bytes> {
        let mut state = self.state.lock();
        if state.ring.occupied_len() < FRAME_SIZE {
            return None;
        }

        let frame: Vec<u8> = (0..FRAME_SIZE)
            .filter_map(|_| state.ring.try_pop())
            .map(encode_mulaw)
            .collect();
        Some(Bytes::from(frame))
    }
}

/// Schreibt alle 20ms die fertigen Frames in den Track, bis er gestoppt wird
pub async fn pump_frames(buffer: &CaptureBuffer, track: &MediaTrack) {
    let mut ticker = tokio::time::interval(FRAME_DURATION);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = track.stopped() => break,
            _ = ticker.tick() => {
                while let Some(frame) = buffer.read_frame() {
                    if let Err(e) = track.write_sample(frame, FRAME_DURATION).await {
                        tracing::warn!("Failed to write audio frame: {}", e);
                    }
                }
            }
        }
    }
}

// ============================================================================
// MICROPHONE
// ============================================================================

/// Laufende Aufnahme vom Standard-Mikrofon
///
/// `cpal::Stream` ist nicht `Send`. Er lebt auf einem eigenen Thread, bis
/// dieser Handle gedroppt wird.
pub struct MicrophoneCapture {
    buffer: Arc<CaptureBuffer>,
    _stop: mpsc::Sender<()>,
}

impl MicrophoneCapture {
    /// Öffnet das Standard-Mikrofon; blockiert, bis der Stream läuft
    pub fn start() -> Result<Self, MediaError> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel();

        std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || {
                let (stream, buffer) = match open_default_input() {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(buffer));

                // Kehrt zurück, sobald der Handle gedroppt ist
                let _ = stop_rx.recv();
                drop(stream);
                tracing::info!("Audio capture stopped");
            })
            .map_err(|e| MediaError::Capture(e.to_string()))?;

        let buffer = ready_rx
            .recv()
            .map_err(|e| MediaError::Capture(e.to_string()))??;

        Ok(Self {
            buffer,
            _stop: stop_tx,
        })
    }

    /// Speist den Track, bis er gestoppt wird; danach endet die Aufnahme
    pub async fn run(self, track: Arc<MediaTrack>) {
        pump_frames(&self.buffer, &track).await;
    }
}

fn open_default_input() -> Result<(Stream, Arc<CaptureBuffer>), MediaError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| MediaError::DeviceNotFound("no audio input device".to_string()))?;

    let configs = device.supported_input_configs().map_err(|e| {
        // Auf macOS/Linux meldet das Backend fehlende Rechte hier
        MediaError::PermissionDenied(e.to_string())
    })?;

    let supported = select_best_config(configs.collect())?;
    let format = supported.sample_format();
    let config: StreamConfig = supported.into();

    tracing::info!(
        "Starting audio capture: {} Hz, {} channel(s), {:?}",
        config.sample_rate.0,
        config.channels,
        format
    );

    let buffer = Arc::new(CaptureBuffer::new(config.sample_rate.0, config.channels));
    let stream = match format {
        SampleFormat::F32 => build_input::<f32>(&device, &config, Arc::clone(&buffer)),
        SampleFormat::I16 => build_input::<i16>(&device, &config, Arc::clone(&buffer)),
        SampleFormat::U16 => build_input::<u16>(&device, &config, Arc::clone(&buffer)),
        other => Err(MediaError::Capture(format!(
            "unsupported sample format {:?}",
            other
        ))),
    }?;

    stream
        .play()
        .map_err(|e| MediaError::Capture(e.to_string()))?;

    Ok((stream, buffer))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    buffer: Arc<CaptureBuffer>,
) -> Result<Stream, MediaError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|s| s.to_sample::<f32>()).collect();
                buffer.push_block(&samples);
            },
            |err| {
                tracing::error!("Audio capture error: {}", err);
            },
            None,
        )
        .map_err(|e| MediaError::Capture(e.to_string()))
}
