//! Speech-output device abstraction.
//!
//! The engine drives exactly one [`SpeechDevice`] and reacts to its
//! asynchronous start/end/error notifications. Two backends ship here: the
//! OS synthesizer via the `tts` crate (behind the `system-tts` feature) and
//! a simulated device that logs text with realistic timing, used for
//! headless builds and development.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
#[cfg(feature = "system-tts")]
use log::warn;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::platform::QuirkTable;
use crate::settings::VoiceSettings;

/// One text segment to speak, with the voice parameters frozen at enqueue
/// time.
#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceRequest {
    pub text: String,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub lang: String,
    pub voice: Option<String>,
}

impl UtteranceRequest {
    pub fn from_settings(text: impl Into<String>, settings: &VoiceSettings) -> Self {
        Self {
            text: text.into(),
            rate: settings.rate,
            pitch: settings.pitch,
            volume: settings.volume,
            lang: settings.lang.clone(),
            voice: settings.voice.clone(),
        }
    }

    /// Pull rate and pitch into the bounds the current platform tolerates.
    pub fn clamp_for(&mut self, quirks: &QuirkTable) {
        self.rate = self
            .rate
            .clamp(*quirks.rate_clamp.start(), *quirks.rate_clamp.end());
        self.pitch = self
            .pitch
            .clamp(*quirks.pitch_clamp.start(), *quirks.pitch_clamp.end());
    }
}

/// Why an utterance failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceErrorKind {
    /// The utterance was cancelled underneath us — expected after `stop()`.
    Interrupted,
    Other(String),
}

/// Asynchronous notifications from the device, one stream per utterance.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Started,
    Ended,
    Error(DeviceErrorKind),
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("speech backend error: {0}")]
    Backend(String),
}

/// A single shared speech-output slot. Implementations accept one utterance
/// at a time and report progress on the supplied event sender.
pub trait SpeechDevice: Send {
    /// Hand an utterance to the device. Progress arrives asynchronously on
    /// `events`; an `Ok` return only means the device accepted the request.
    fn speak(
        &mut self,
        request: &UtteranceRequest,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Result<(), DeviceError>;

    /// Best-effort cancellation of the in-flight utterance. Safe to call
    /// when nothing is speaking.
    fn cancel(&mut self);

    /// Whether the device considers itself busy (speaking or about to).
    fn is_speaking(&self) -> bool;
}

/// Whether any speech-output backend can be constructed on this host.
pub fn output_available() -> bool {
    #[cfg(feature = "system-tts")]
    {
        system::SystemDevice::available()
    }
    #[cfg(not(feature = "system-tts"))]
    {
        true
    }
}

/// Pick the best available backend.
pub fn default_device() -> Box<dyn SpeechDevice + Send> {
    #[cfg(feature = "system-tts")]
    {
        match system::SystemDevice::new() {
            Ok(device) => return Box::new(device),
            Err(e) => warn!("system TTS unavailable ({e}), using simulated output"),
        }
    }
    Box::new(SimulatedDevice::new())
}

/// Fallback device: prints the utterance and emits start/end events on a
/// schedule derived from text length. Keeps the whole client exercisable
/// on machines without a synthesizer.
pub struct SimulatedDevice {
    speaking: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
}

/// Rough speaking pace for the simulation.
const SIM_START_LATENCY: Duration = Duration::from_millis(80);
const SIM_MILLIS_PER_CHAR: u64 = 60;
const SIM_MIN_UTTERANCE: Duration = Duration::from_millis(400);

impl SimulatedDevice {
    pub fn new() -> Self {
        Self {
            speaking: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn utterance_duration(request: &UtteranceRequest) -> Duration {
        let chars = request.text.chars().count() as u64;
        let rate = request.rate.max(0.1);
        let millis = (chars * SIM_MILLIS_PER_CHAR) as f32 / rate;
        SIM_MIN_UTTERANCE.max(Duration::from_millis(millis as u64))
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechDevice for SimulatedDevice {
    fn speak(
        &mut self,
        request: &UtteranceRequest,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Result<(), DeviceError> {
        debug!("simulated speech: {}", request.text);
        self.speaking.store(true, Ordering::SeqCst);
        let generation = self.generation.load(Ordering::SeqCst);

        let speaking = Arc::clone(&self.speaking);
        let gen_counter = Arc::clone(&self.generation);
        let duration = Self::utterance_duration(request);

        tokio::spawn(async move {
            tokio::time::sleep(SIM_START_LATENCY).await;
            if gen_counter.load(Ordering::SeqCst) != generation {
                let _ = events.send(DeviceEvent::Error(DeviceErrorKind::Interrupted));
                return;
            }
            let _ = events.send(DeviceEvent::Started);

            tokio::time::sleep(duration).await;
            if gen_counter.load(Ordering::SeqCst) != generation {
                let _ = events.send(DeviceEvent::Error(DeviceErrorKind::Interrupted));
                return;
            }
            speaking.store(false, Ordering::SeqCst);
            let _ = events.send(DeviceEvent::Ended);
        });
        Ok(())
    }

    fn cancel(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.speaking.store(false, Ordering::SeqCst);
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }
}

#[cfg(feature = "system-tts")]
mod system {
    //! OS synthesizer backend (Speech Dispatcher / SAPI / AVFoundation).

    use std::sync::Mutex;

    use super::*;

    type EventSlot = Arc<Mutex<Option<mpsc::UnboundedSender<DeviceEvent>>>>;

    pub struct SystemDevice {
        tts: tts::Tts,
        /// Sender for the utterance currently in flight; the callbacks
        /// registered on the synthesizer route through this slot.
        events: EventSlot,
    }

    impl SystemDevice {
        pub fn available() -> bool {
            tts::Tts::default().is_ok()
        }

        pub fn new() -> Result<Self, DeviceError> {
            let mut tts = tts::Tts::default().map_err(|e| DeviceError::Backend(e.to_string()))?;
            let events: EventSlot = Arc::new(Mutex::new(None));

            let features = tts.supported_features();
            if features.utterance_callbacks {
                let slot = Arc::clone(&events);
                tts.on_utterance_begin(Some(Box::new(move |_id| {
                    if let Some(tx) = slot.lock().unwrap().as_ref() {
                        let _ = tx.send(DeviceEvent::Started);
                    }
                })))
                .map_err(|e| DeviceError::Backend(e.to_string()))?;

                let slot = Arc::clone(&events);
                tts.on_utterance_end(Some(Box::new(move |_id| {
                    if let Some(tx) = slot.lock().unwrap().as_ref() {
                        let _ = tx.send(DeviceEvent::Ended);
                    }
                })))
                .map_err(|e| DeviceError::Backend(e.to_string()))?;

                let slot = Arc::clone(&events);
                tts.on_utterance_stop(Some(Box::new(move |_id| {
                    if let Some(tx) = slot.lock().unwrap().as_ref() {
                        let _ = tx.send(DeviceEvent::Error(DeviceErrorKind::Interrupted));
                    }
                })))
                .map_err(|e| DeviceError::Backend(e.to_string()))?;
            } else {
                warn!("synthesizer lacks utterance callbacks; progress events degrade");
            }

            Ok(Self { tts, events })
        }

        fn apply_parameters(&mut self, request: &UtteranceRequest) {
            let features = self.tts.supported_features();
            if features.rate {
                let rate = scale_parameter(
                    request.rate,
                    self.tts.min_rate(),
                    self.tts.normal_rate(),
                    self.tts.max_rate(),
                );
                if let Err(e) = self.tts.set_rate(rate) {
                    warn!("failed to set speech rate: {e}");
                }
            }
            if features.pitch {
                let pitch = scale_parameter(
                    request.pitch,
                    self.tts.min_pitch(),
                    self.tts.normal_pitch(),
                    self.tts.max_pitch(),
                );
                if let Err(e) = self.tts.set_pitch(pitch) {
                    warn!("failed to set speech pitch: {e}");
                }
            }
            if features.volume {
                let volume = scale_parameter(
                    request.volume,
                    self.tts.min_volume(),
                    self.tts.normal_volume(),
                    self.tts.max_volume(),
                );
                if let Err(e) = self.tts.set_volume(volume) {
                    warn!("failed to set speech volume: {e}");
                }
            }
            if features.voice {
                self.apply_voice(request);
            }
        }

        /// Prefer an explicitly named voice, otherwise the first one for the
        /// requested language.
        fn apply_voice(&mut self, request: &UtteranceRequest) {
            let Ok(voices) = self.tts.voices() else {
                return;
            };
            let wanted_lang = request.lang.to_lowercase();
            let by_name = request.voice.as_ref().and_then(|name| {
                let needle = name.to_lowercase();
                voices
                    .iter()
                    .find(|v| v.name().to_lowercase().contains(&needle))
            });
            let chosen = by_name.or_else(|| {
                voices
                    .iter()
                    .find(|v| v.language().to_string().to_lowercase().starts_with(&wanted_lang))
            });
            if let Some(voice) = chosen {
                if let Err(e) = self.tts.set_voice(voice) {
                    warn!("failed to set voice {}: {e}", voice.name());
                }
            }
        }
    }

    impl SpeechDevice for SystemDevice {
        fn speak(
            &mut self,
            request: &UtteranceRequest,
            events: mpsc::UnboundedSender<DeviceEvent>,
        ) -> Result<(), DeviceError> {
            *self.events.lock().unwrap() = Some(events);
            self.apply_parameters(request);
            self.tts
                .speak(request.text.clone(), false)
                .map(|_| ())
                .map_err(|e| DeviceError::Backend(e.to_string()))
        }

        fn cancel(&mut self) {
            if let Err(e) = self.tts.stop() {
                warn!("failed to stop synthesizer: {e}");
            }
        }

        fn is_speaking(&self) -> bool {
            self.tts.is_speaking().unwrap_or(false)
        }
    }

    /// Map a settings multiplier (1.0 = normal) onto the synthesizer's own
    /// parameter range.
    pub(super) fn scale_parameter(multiplier: f32, min: f32, normal: f32, max: f32) -> f32 {
        if multiplier >= 1.0 {
            let t = ((multiplier - 1.0) / 1.0).min(1.0);
            normal + (max - normal) * t
        } else {
            let t = ((multiplier - 0.1) / 0.9).max(0.0);
            min + (normal - min) * t
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{QuirkLevel, QuirkTable};

    fn request(text: &str) -> UtteranceRequest {
        UtteranceRequest::from_settings(text, &VoiceSettings::default())
    }

    #[test]
    fn request_snapshots_settings() {
        let mut settings = VoiceSettings::default();
        settings.set_rate(1.2);
        let req = UtteranceRequest::from_settings("안녕", &settings);
        assert_eq!(req.rate, 1.2);
        assert_eq!(req.lang, "ko-KR");
    }

    #[test]
    fn clamp_for_narrows_on_quirky_platforms() {
        let quirks = QuirkTable::for_level(QuirkLevel::MobileRestricted);
        let mut req = request("안녕");
        req.rate = 1.9;
        req.pitch = 0.2;
        req.clamp_for(&quirks);
        assert_eq!(req.rate, 1.5);
        assert_eq!(req.pitch, 0.8);
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_device_emits_start_then_end() {
        let mut device = SimulatedDevice::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        device.speak(&request("안녕하세요"), tx).unwrap();
        assert!(device.is_speaking());

        assert_eq!(rx.recv().await.unwrap(), DeviceEvent::Started);
        assert_eq!(rx.recv().await.unwrap(), DeviceEvent::Ended);
        assert!(!device.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_device_cancel_interrupts() {
        let mut device = SimulatedDevice::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        device.speak(&request("긴 문장을 말하는 중입니다"), tx).unwrap();
        device.cancel();

        assert_eq!(
            rx.recv().await.unwrap(),
            DeviceEvent::Error(DeviceErrorKind::Interrupted)
        );
        assert!(!device.is_speaking());
    }
}
