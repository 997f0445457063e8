//! Geräte-Zugriff über cpal
//!
//! Geräteliste, Auswahl der Capture-Konfiguration und `DeviceMedia`, das
//! beim Anruf die Aufnahme vom Standard-Mikrofon startet.

use super::capture::MicrophoneCapture;
use super::media::{MediaConstraints, MediaDevices, MediaError, MediaStream, SAMPLE_RATE};
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, SupportedStreamConfig, SupportedStreamConfigRange};
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioDevice {
    pub name: String,
    pub is_default: bool,
}

/// Gibt alle Audio-Geräte zurück (Eingänge, Ausgänge)
pub fn list_audio_devices() -> Result<(Vec<AudioDevice>, Vec<AudioDevice>), MediaError> {
    let host = cpal::default_host();

    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    let input_devices: Vec<AudioDevice> = host
        .input_devices()
        .map_err(|e| MediaError::Capture(e.to_string()))?
        .filter_map(|d| {
            d.name().ok().map(|name| AudioDevice {
                is_default: Some(&name) == default_input.as_ref(),
                name,
            })
        })
        .collect();

    let output_devices: Vec<AudioDevice> = host
        .output_devices()
        .map_err(|e| MediaError::Capture(e.to_string()))?
        .filter_map(|d| {
            d.name().ok().map(|name| AudioDevice {
                is_default: Some(&name) == default_output.as_ref(),
                name,
            })
        })
        .collect();

    Ok((input_devices, output_devices))
}

// ============================================================================
// DEVICE MEDIA
// ============================================================================

/// `MediaDevices` auf Basis der Standard-Geräte des Systems
///
/// Das Mikrofon wird über cpal aufgenommen und als PCMU gesendet. Eine
/// Kamera-Quelle gibt es nicht, Videoanrufe scheitern daher mit
/// `MediaError::DeviceNotFound`.
#[derive(Debug, Default, Clone)]
pub struct DeviceMedia;

impl DeviceMedia {
    pub fn new() -> Self {
        Self
    }
}

impl MediaDevices for DeviceMedia {
    fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> BoxFuture<'_, Result<MediaStream, MediaError>> {
        Box::pin(async move {
            if constraints.video {
                return Err(MediaError::DeviceNotFound(
                    "no camera capture source".to_string(),
                ));
            }

            let capture = if constraints.audio {
                // cpal-Aufrufe blockieren
                let capture = tokio::task::spawn_blocking(MicrophoneCapture::start)
                    .await
                    .map_err(|e| MediaError::Capture(e.to_string()))??;
                Some(capture)
            } else {
                None
            };

            let stream = MediaStream::from_constraints(constraints);
            if let (Some(capture), Some(track)) = (capture, stream.audio_tracks().next()) {
                tokio::spawn(capture.run(Arc::clone(track)));
            }
            Ok(stream)
        })
    }
}

/// Wählt die beste Konfiguration aus einer Liste
///
/// Priorität: 48kHz > andere, F32 > andere
pub(crate) fn select_best_config(
    configs: Vec<SupportedStreamConfigRange>,
) -> Result<SupportedStreamConfig, MediaError> {
    let target_rate = cpal::SampleRate(SAMPLE_RATE);
    let supports_target =
        |c: &SupportedStreamConfigRange| c.min_sample_rate() <= target_rate && c.max_sample_rate() >= target_rate;

    if let Some(config) = configs
        .iter()
        .find(|c| supports_target(c) && c.sample_format() == SampleFormat::F32)
    {
        return Ok(config.clone().with_sample_rate(target_rate));
    }

    if let Some(config) = configs.iter().find(|c| c.sample_format() == SampleFormat::F32) {
        return Ok(config.clone().with_max_sample_rate());
    }

    if let Some(config) = configs.first() {
        return Ok(config.clone().with_max_sample_rate());
    }

    Err(MediaError::DeviceNotFound(
        "no suitable audio configuration".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::{SampleRate, SupportedBufferSize};

    fn range(min: u32, max: u32, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            1,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn prefers_48k_float() {
        let config = select_best_config(vec![
            range(8000, 16000, SampleFormat::I16),
            range(44100, 96000, SampleFormat::F32),
        ])
        .unwrap();
        assert_eq!(config.sample_rate().0, 48000);
        assert_eq!(config.sample_format(), SampleFormat::F32);
    }

    #[test]
    fn falls_back_to_first_config() {
        let config = select_best_config(vec![range(8000, 16000, SampleFormat::I16)]).unwrap();
        assert_eq!(config.sample_rate().0, 16000);
        assert_eq!(config.sample_format(), SampleFormat::I16);
    }

    #[tokio::test]
    async fn video_without_camera_is_refused() {
        let result = DeviceMedia::new()
            .acquire(MediaConstraints {
                audio: true,
                video: true,
            })
            .await;
        assert!(matches!(result, Err(MediaError::DeviceNotFound(_))));
    }

    #[test]
    fn no_config_means_no_device() {
        assert!(matches!(
            select_best_config(Vec::new()),
            Err(MediaError::DeviceNotFound(_))
        ));
    }
}
