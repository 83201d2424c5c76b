//! Startup capability detection and the platform quirk table.
//!
//! Some mobile platforms ship an audio device whose cancel/speak calls are
//! asynchronous and lossy; the compensating delays and parameter clamps for
//! that family live here so the speech engine itself stays free of platform
//! conditionals.

use std::ops::RangeInclusive;
use std::time::Duration;

use log::info;

/// Environment override so desktop builds can exercise the mobile
/// compensation timing: set to `1` or `true`.
pub const FORCE_QUIRKY_ENV: &str = "AVATAR_FORCE_QUIRKY";

/// Classification of the runtime environment's audio-device behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuirkLevel {
    /// Speak/cancel behave synchronously enough; no compensation needed.
    None,
    /// Mobile family with asynchronous cancel semantics and withheld
    /// speech input.
    MobileRestricted,
}

/// What the running environment supports, computed once at startup.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityProfile {
    pub speech_input: bool,
    pub speech_output: bool,
    pub quirk: QuirkLevel,
}

impl CapabilityProfile {
    /// Probe the environment. Never fails; missing capabilities degrade to
    /// `false` and the affected features stay disabled.
    pub fn detect() -> Self {
        let quirk = detect_quirk_level();
        let speech_output = crate::speech::device::output_available();
        // The restricted mobile family withholds speech input entirely.
        let speech_input =
            crate::listen::input_available() && quirk != QuirkLevel::MobileRestricted;

        let profile = Self {
            speech_input,
            speech_output,
            quirk,
        };
        info!(
            "capabilities: speech_input={} speech_output={} quirk={:?}",
            profile.speech_input, profile.speech_output, profile.quirk
        );
        profile
    }
}

fn detect_quirk_level() -> QuirkLevel {
    if let Ok(v) = std::env::var(FORCE_QUIRKY_ENV) {
        if v == "1" || v.eq_ignore_ascii_case("true") {
            return QuirkLevel::MobileRestricted;
        }
    }
    if cfg!(any(target_os = "ios", target_os = "android")) {
        QuirkLevel::MobileRestricted
    } else {
        QuirkLevel::None
    }
}

/// Compensation delays and parameter bounds keyed by quirk level.
///
/// These values are carried over from field testing against the restricted
/// platform family; they are design constants, not incidental sleeps.
#[derive(Debug, Clone)]
pub struct QuirkTable {
    /// Wait after cancelling an in-flight utterance before issuing the next
    /// one. Re-issuing immediately can silently drop the new utterance.
    pub cancel_settle: Duration,
    /// Extra wait before handing any utterance to the device.
    pub pre_speak_delay: Duration,
    /// Gap between one utterance ending and the next being issued.
    pub end_gap: Duration,
    /// Backoff before resuming the queue after an interruption error.
    pub interrupted_backoff: Duration,
    /// Delay before the verification re-cancel issued by `stop()`; a single
    /// cancel is not always honored on the quirky family.
    pub recancel_delay: Duration,
    /// Settle window before declaring the avatar idle, so an utterance
    /// racing in doesn't flick the visual state.
    pub idle_settle: Duration,
    /// Safe speech-rate bounds for the device.
    pub rate_clamp: RangeInclusive<f32>,
    /// Safe pitch bounds for the device.
    pub pitch_clamp: RangeInclusive<f32>,
}

impl QuirkTable {
    pub fn for_level(level: QuirkLevel) -> Self {
        match level {
            QuirkLevel::None => Self {
                cancel_settle: Duration::ZERO,
                pre_speak_delay: Duration::ZERO,
                end_gap: Duration::from_millis(300),
                interrupted_backoff: Duration::from_millis(800),
                recancel_delay: Duration::ZERO,
                idle_settle: Duration::from_millis(200),
                rate_clamp: 0.1..=2.0,
                pitch_clamp: 0.0..=2.0,
            },
            QuirkLevel::MobileRestricted => Self {
                cancel_settle: Duration::from_millis(150),
                pre_speak_delay: Duration::from_millis(100),
                end_gap: Duration::from_millis(500),
                interrupted_backoff: Duration::from_millis(800),
                recancel_delay: Duration::from_millis(100),
                idle_settle: Duration::from_millis(200),
                // The same parameters that work elsewhere can produce
                // garbled or failed playback here.
                rate_clamp: 0.5..=1.5,
                pitch_clamp: 0.8..=1.2,
            },
        }
    }
}
