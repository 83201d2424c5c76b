//! Utterance queue and avatar-state synchronization.
//!
//! A dedicated engine task owns the speech device and the FIFO queue of
//! pending utterances; everything else holds a cheap [`Speaker`] handle and
//! interacts only through enqueue/stop/query. The device is a shared
//! singleton with asynchronous start/end/error notifications, so correctness
//! lives in an explicit state machine here rather than in ad hoc callbacks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::platform::{CapabilityProfile, QuirkTable};
use crate::settings::VoiceSettings;
use crate::speech::device::{
    DeviceErrorKind, DeviceEvent, SpeechDevice, UtteranceRequest,
};
use crate::ui::{AvatarState, UiNotifier};

enum SpeakerCmd {
    Enqueue(String),
    UpdateSettings(VoiceSettings),
    Stop { ack: Option<oneshot::Sender<()>> },
}

/// Observable playback state, written only by the engine task.
#[derive(Debug, Default)]
pub struct SpeakerStatus {
    pub is_speaking: AtomicBool,
    /// Queue being consumed: currently speaking or about to speak the next
    /// item (including the idle-settle window).
    pub is_draining: AtomicBool,
    /// Number of utterances waiting behind the in-flight one.
    pub queued_count: AtomicUsize,
}

/// Handle to the speech engine. Clones share the same queue and device.
#[derive(Clone)]
pub struct Speaker {
    tx: mpsc::UnboundedSender<SpeakerCmd>,
    status: Arc<SpeakerStatus>,
}

impl Speaker {
    /// Spawn the engine task around `device` and return the handle.
    pub fn spawn(
        device: Box<dyn SpeechDevice + Send>,
        profile: &CapabilityProfile,
        settings: VoiceSettings,
        notifier: UiNotifier,
    ) -> Self {
        let (tx, cmd_rx) = mpsc::unbounded_channel();
        let (dev_tx, dev_rx) = mpsc::unbounded_channel();
        let status = Arc::new(SpeakerStatus::default());

        let engine = Engine {
            device,
            quirks: QuirkTable::for_level(profile.quirk),
            output_supported: profile.speech_output,
            settings,
            queue: VecDeque::new(),
            speaking: false,
            draining: false,
            avatar: AvatarState::Idle,
            pending: None,
            status: Arc::clone(&status),
            notifier,
            cmd_rx,
            dev_rx,
            dev_tx,
        };
        tokio::spawn(engine.run());

        Self { tx, status }
    }

    /// Queue `text` for speaking with a snapshot of the current settings.
    /// Silently ignored when speech output is unsupported.
    pub fn enqueue(&self, text: impl Into<String>) {
        let _ = self.tx.send(SpeakerCmd::Enqueue(text.into()));
    }

    /// Interrupt: cancel the in-flight utterance and discard the queue.
    /// Idempotent, safe from any state.
    pub fn stop(&self) {
        let _ = self.tx.send(SpeakerCmd::Stop { ack: None });
    }

    /// Like [`stop`](Self::stop), but resolves once the engine has processed
    /// the interruption. Callers that publish their own state right after a
    /// stop use this to keep notifications ordered.
    pub async fn stop_and_wait(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(SpeakerCmd::Stop { ack: Some(ack) }).is_ok() {
            let _ = done.await;
        }
    }

    /// Replace the settings used for future utterances. Does not affect
    /// anything already queued or speaking.
    pub fn update_settings(&self, settings: VoiceSettings) {
        let _ = self.tx.send(SpeakerCmd::UpdateSettings(settings));
    }

    pub fn is_speaking(&self) -> bool {
        self.status.is_speaking.load(Ordering::SeqCst)
    }

    pub fn is_draining(&self) -> bool {
        self.status.is_draining.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.status.queued_count.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        !self.is_speaking() && !self.is_draining() && self.queued() == 0
    }
}

/// Deferred engine action; at most one timer is armed at a time because the
/// states that need one are mutually exclusive.
enum Pending {
    /// Re-check emptiness before declaring idle.
    SettleIdle,
    /// Gap between utterances before draining the next one.
    DrainAfterGap,
    /// Backoff after an interruption error with work still queued.
    RetryAfterBackoff,
    /// Quirky platforms: wait out an asynchronous cancel before speaking.
    SpeakAfterCancel(UtteranceRequest),
    /// Quirky platforms: extra wait before handing text to the device.
    Dispatch(UtteranceRequest),
    /// Quirky platforms: verification re-cancel after `stop()`.
    ReCancel,
}

struct Engine {
    device: Box<dyn SpeechDevice + Send>,
    quirks: QuirkTable,
    output_supported: bool,
    settings: VoiceSettings,
    queue: VecDeque<UtteranceRequest>,
    speaking: bool,
    draining: bool,
    /// Last avatar state published, to suppress duplicate notifications.
    avatar: AvatarState,
    pending: Option<(Instant, Pending)>,
    status: Arc<SpeakerStatus>,
    notifier: UiNotifier,
    cmd_rx: mpsc::UnboundedReceiver<SpeakerCmd>,
    dev_rx: mpsc::UnboundedReceiver<DeviceEvent>,
    /// Kept so the device event channel never closes between utterances.
    dev_tx: mpsc::UnboundedSender<DeviceEvent>,
}

impl Engine {
    async fn run(mut self) {
        loop {
            let deadline = self.pending.as_ref().map(|(at, _)| *at);
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(SpeakerCmd::Enqueue(text)) => self.on_enqueue(text),
                    Some(SpeakerCmd::UpdateSettings(settings)) => self.settings = settings,
                    Some(SpeakerCmd::Stop { ack }) => self.on_stop(ack),
                    // Every handle dropped: cancel and wind down.
                    None => {
                        self.device.cancel();
                        break;
                    }
                },
                ev = self.dev_rx.recv() => {
                    if let Some(ev) = ev {
                        self.on_device_event(ev);
                    }
                },
                _ = wait_until(deadline) => self.on_timer(),
            }
        }
    }

    fn on_enqueue(&mut self, text: String) {
        if !self.output_supported {
            debug!("speech output unsupported, dropping utterance");
            return;
        }
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.queue
            .push_back(UtteranceRequest::from_settings(text, &self.settings));
        self.publish_queue_len();

        match self.pending {
            // A sentence raced into the settle window: abandon it and keep
            // draining, so the avatar never flickers to idle.
            Some((_, Pending::SettleIdle)) => {
                self.pending = None;
                self.drain_next();
            }
            // A fresh enqueue supersedes the post-stop verification cancel;
            // the speak path below re-cancels if the device is still busy.
            Some((_, Pending::ReCancel)) => {
                self.pending = None;
                self.start_drain();
            }
            _ => self.start_drain(),
        }
    }

    fn start_drain(&mut self) {
        if !self.draining {
            self.drain_next();
        }
    }

    /// Advance the queue: speak the head, or settle toward idle.
    fn drain_next(&mut self) {
        if let Some(request) = self.queue.pop_front() {
            self.set_draining(true);
            self.publish_queue_len();
            self.speak(request);
        } else {
            self.set_draining(true);
            self.schedule(self.quirks.idle_settle, Pending::SettleIdle);
        }
    }

    fn speak(&mut self, request: UtteranceRequest) {
        if self.device.is_speaking() {
            self.device.cancel();
            // The cancel is asynchronous on quirky platforms; speaking into
            // it silently drops the new utterance.
            if self.quirks.cancel_settle > Duration::ZERO {
                self.schedule(self.quirks.cancel_settle, Pending::SpeakAfterCancel(request));
                return;
            }
        }
        self.issue(request);
    }

    fn issue(&mut self, mut request: UtteranceRequest) {
        request.clamp_for(&self.quirks);
        if self.quirks.pre_speak_delay > Duration::ZERO {
            self.schedule(self.quirks.pre_speak_delay, Pending::Dispatch(request));
        } else {
            self.dispatch(request);
        }
    }

    fn dispatch(&mut self, request: UtteranceRequest) {
        debug!("speaking: {}", request.text);
        if let Err(e) = self.device.speak(&request, self.dev_tx.clone()) {
            warn!("device rejected utterance: {e}");
            self.set_speaking(false);
            self.schedule(self.quirks.end_gap, Pending::DrainAfterGap);
        }
    }

    fn on_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Started => {
                self.set_speaking(true);
                self.publish_avatar(AvatarState::Speaking);
            }
            DeviceEvent::Ended => {
                if !self.speaking && !self.draining {
                    // Stray end after stop/idle.
                    return;
                }
                self.set_speaking(false);
                self.schedule(self.quirks.end_gap, Pending::DrainAfterGap);
            }
            DeviceEvent::Error(kind) => {
                self.set_speaking(false);
                match kind {
                    DeviceErrorKind::Interrupted if !self.queue.is_empty() => {
                        warn!(
                            "utterance interrupted with {} pending, retrying",
                            self.queue.len()
                        );
                        self.schedule(
                            self.quirks.interrupted_backoff,
                            Pending::RetryAfterBackoff,
                        );
                    }
                    DeviceErrorKind::Interrupted => {
                        debug!("utterance interrupted, queue empty");
                        if self.draining {
                            self.schedule(self.quirks.end_gap, Pending::DrainAfterGap);
                        }
                    }
                    DeviceErrorKind::Other(reason) => {
                        warn!("speech device error: {reason}");
                        self.schedule(self.quirks.end_gap, Pending::DrainAfterGap);
                    }
                }
            }
        }
    }

    fn on_timer(&mut self) {
        let Some((_, action)) = self.pending.take() else {
            return;
        };
        match action {
            Pending::SettleIdle => {
                if self.speaking {
                    // An utterance raced in; its end event resumes the drain.
                    return;
                }
                if self.queue.is_empty() {
                    self.set_draining(false);
                    self.publish_avatar(AvatarState::Idle);
                } else {
                    self.drain_next();
                }
            }
            Pending::DrainAfterGap | Pending::RetryAfterBackoff => {
                if !self.speaking {
                    self.drain_next();
                }
            }
            Pending::SpeakAfterCancel(request) => self.issue(request),
            Pending::Dispatch(request) => self.dispatch(request),
            Pending::ReCancel => {
                if self.device.is_speaking() {
                    self.device.cancel();
                }
            }
        }
    }

    fn on_stop(&mut self, ack: Option<oneshot::Sender<()>>) {
        debug!("speech stop requested");
        self.pending = None;
        self.device.cancel();
        // One cancel is not always honored on quirky platforms.
        if self.quirks.recancel_delay > Duration::ZERO {
            self.schedule(self.quirks.recancel_delay, Pending::ReCancel);
        }
        self.queue.clear();
        self.set_speaking(false);
        self.set_draining(false);
        self.publish_queue_len();
        self.publish_avatar(AvatarState::Idle);
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    fn schedule(&mut self, delay: Duration, action: Pending) {
        self.pending = Some((Instant::now() + delay, action));
    }

    fn set_speaking(&mut self, speaking: bool) {
        self.speaking = speaking;
        self.status.is_speaking.store(speaking, Ordering::SeqCst);
    }

    fn set_draining(&mut self, draining: bool) {
        self.draining = draining;
        self.status.is_draining.store(draining, Ordering::SeqCst);
    }

    fn publish_queue_len(&self) {
        self.status
            .queued_count
            .store(self.queue.len(), Ordering::SeqCst);
    }

    fn publish_avatar(&mut self, state: AvatarState) {
        if self.avatar == state {
            return;
        }
        self.avatar = state;
        match state {
            AvatarState::Idle => self.notifier.idle(),
            AvatarState::Speaking => self.notifier.speaking(),
            AvatarState::Listening => self.notifier.listening(),
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::QuirkLevel;
    use crate::speech::device::DeviceError;
    use crate::ui::{self, UiEvent};
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    /// Device double that emits start/end on a script and records every
    /// interaction in order.
    #[derive(Clone)]
    struct ScriptedDevice {
        log: Arc<Mutex<Vec<String>>>,
        speaking: Arc<AtomicBool>,
        generation: Arc<AtomicU64>,
        cancels: Arc<AtomicUsize>,
        start_delay: Duration,
        /// None: never ends on its own (events injected by the test).
        speak_time: Option<Duration>,
        last_events: Arc<Mutex<Option<mpsc::UnboundedSender<DeviceEvent>>>>,
    }

    impl ScriptedDevice {
        fn new(start_delay: Duration, speak_time: Option<Duration>) -> Self {
            Self {
                log: Arc::new(Mutex::new(Vec::new())),
                speaking: Arc::new(AtomicBool::new(false)),
                generation: Arc::new(AtomicU64::new(0)),
                cancels: Arc::new(AtomicUsize::new(0)),
                start_delay,
                speak_time,
                last_events: Arc::new(Mutex::new(None)),
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn starts(&self) -> Vec<String> {
            self.log()
                .into_iter()
                .filter_map(|entry| entry.strip_prefix("start:").map(str::to_string))
                .collect()
        }

        fn speak_calls(&self) -> usize {
            self.log()
                .iter()
                .filter(|entry| entry.starts_with("speak:"))
                .count()
        }

        fn inject(&self, event: DeviceEvent) {
            let tx = self.last_events.lock().unwrap().clone().unwrap();
            let _ = tx.send(event);
        }
    }

    impl SpeechDevice for ScriptedDevice {
        fn speak(
            &mut self,
            request: &UtteranceRequest,
            events: mpsc::UnboundedSender<DeviceEvent>,
        ) -> Result<(), DeviceError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("speak:{}", request.text));
            *self.last_events.lock().unwrap() = Some(events.clone());
            self.speaking.store(true, Ordering::SeqCst);

            let generation = self.generation.load(Ordering::SeqCst);
            let gen_counter = Arc::clone(&self.generation);
            let speaking = Arc::clone(&self.speaking);
            let log = Arc::clone(&self.log);
            let text = request.text.clone();
            let start_delay = self.start_delay;
            let speak_time = self.speak_time;

            tokio::spawn(async move {
                tokio::time::sleep(start_delay).await;
                if gen_counter.load(Ordering::SeqCst) != generation {
                    let _ = events.send(DeviceEvent::Error(DeviceErrorKind::Interrupted));
                    return;
                }
                log.lock().unwrap().push(format!("start:{text}"));
                let _ = events.send(DeviceEvent::Started);

                let Some(speak_time) = speak_time else { return };
                tokio::time::sleep(speak_time).await;
                if gen_counter.load(Ordering::SeqCst) != generation {
                    let _ = events.send(DeviceEvent::Error(DeviceErrorKind::Interrupted));
                    return;
                }
                log.lock().unwrap().push(format!("end:{text}"));
                speaking.store(false, Ordering::SeqCst);
                let _ = events.send(DeviceEvent::Ended);
            });
            Ok(())
        }

        fn cancel(&mut self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.speaking.store(false, Ordering::SeqCst);
        }

        fn is_speaking(&self) -> bool {
            self.speaking.load(Ordering::SeqCst)
        }
    }

    fn profile(quirk: QuirkLevel) -> CapabilityProfile {
        CapabilityProfile {
            speech_input: false,
            speech_output: true,
            quirk,
        }
    }

    fn spawn_engine(
        device: &ScriptedDevice,
        quirk: QuirkLevel,
    ) -> (Speaker, mpsc::UnboundedReceiver<UiEvent>) {
        let (notifier, ui_rx) = ui::channel();
        let speaker = Speaker::spawn(
            Box::new(device.clone()),
            &profile(quirk),
            VoiceSettings::default(),
            notifier,
        );
        (speaker, ui_rx)
    }

    fn avatar_events(rx: &mut mpsc::UnboundedReceiver<UiEvent>) -> Vec<AvatarState> {
        let mut states = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let UiEvent::Avatar(state) = ev {
                states.push(state);
            }
        }
        states
    }

    #[tokio::test(start_paused = true)]
    async fn utterances_speak_in_enqueue_order_without_overlap() {
        let device = ScriptedDevice::new(
            Duration::from_millis(10),
            Some(Duration::from_millis(100)),
        );
        let (speaker, mut ui_rx) = spawn_engine(&device, QuirkLevel::None);

        speaker.enqueue("안녕");
        speaker.enqueue("반갑습니다");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(
            device.log(),
            vec![
                "speak:안녕",
                "start:안녕",
                "end:안녕",
                "speak:반갑습니다",
                "start:반갑습니다",
                "end:반갑습니다",
            ]
        );
        assert!(speaker.is_idle());
        // Speaking once at the first start, idle exactly once at the end.
        assert_eq!(
            avatar_events(&mut ui_rx),
            vec![AvatarState::Speaking, AvatarState::Idle]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_queue_and_reaches_idle() {
        let device =
            ScriptedDevice::new(Duration::from_millis(10), Some(Duration::from_secs(10)));
        let (speaker, mut ui_rx) = spawn_engine(&device, QuirkLevel::None);

        speaker.enqueue("첫 번째 문장");
        speaker.enqueue("두 번째 문장");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(speaker.is_speaking());

        speaker.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;

        // The second utterance never reached the device.
        assert_eq!(device.speak_calls(), 1);
        assert_eq!(device.starts(), vec!["첫 번째 문장"]);
        assert_eq!(device.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(speaker.queued(), 0);
        assert!(speaker.is_idle());
        assert_eq!(
            avatar_events(&mut ui_rx),
            vec![AvatarState::Speaking, AvatarState::Idle]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_start_prevents_any_speech() {
        let device = ScriptedDevice::new(
            Duration::from_millis(500),
            Some(Duration::from_secs(1)),
        );
        let (speaker, mut ui_rx) = spawn_engine(&device, QuirkLevel::None);

        speaker.enqueue("A");
        speaker.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(device.starts().is_empty());
        assert_eq!(speaker.queued(), 0);
        assert!(speaker.is_idle());
        // Avatar never left idle.
        assert!(!avatar_events(&mut ui_rx).contains(&AvatarState::Speaking));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_end_events_notify_idle_once() {
        let device = ScriptedDevice::new(Duration::from_millis(10), None);
        let (speaker, mut ui_rx) = spawn_engine(&device, QuirkLevel::None);

        speaker.enqueue("안녕하세요");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(speaker.is_speaking());

        device.inject(DeviceEvent::Ended);
        device.inject(DeviceEvent::Ended);
        device.inject(DeviceEvent::Ended);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(speaker.is_idle());
        let idles = avatar_events(&mut ui_rx)
            .into_iter()
            .filter(|s| *s == AvatarState::Idle)
            .count();
        assert_eq!(idles, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interruption_with_pending_queue_retries_after_backoff() {
        let device = ScriptedDevice::new(Duration::from_millis(10), None);
        let (speaker, _ui_rx) = spawn_engine(&device, QuirkLevel::None);

        speaker.enqueue("첫 문장");
        speaker.enqueue("둘째 문장");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(device.starts(), vec!["첫 문장"]);

        device.inject(DeviceEvent::Error(DeviceErrorKind::Interrupted));

        // Still backing off at 700ms...
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(device.speak_calls(), 1);

        // ...and drained shortly after the 800ms backoff elapses.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(device.speak_calls(), 2);
        assert_eq!(device.starts(), vec!["첫 문장", "둘째 문장"]);
    }

    #[tokio::test(start_paused = true)]
    async fn device_failure_is_not_fatal_and_drains_continue() {
        let device = ScriptedDevice::new(Duration::from_millis(10), None);
        let (speaker, _ui_rx) = spawn_engine(&device, QuirkLevel::None);

        speaker.enqueue("실패할 문장");
        speaker.enqueue("다음 문장");
        tokio::time::sleep(Duration::from_millis(50)).await;

        device.inject(DeviceEvent::Error(DeviceErrorKind::Other(
            "synthesis failed".to_string(),
        )));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(device.speak_calls(), 2);
        assert!(speaker.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_during_settle_window_keeps_avatar_speaking() {
        let device = ScriptedDevice::new(
            Duration::from_millis(10),
            Some(Duration::from_millis(100)),
        );
        let (speaker, mut ui_rx) = spawn_engine(&device, QuirkLevel::None);

        speaker.enqueue("첫 문장");
        // End fires at ~110ms, gap runs until ~410ms, settle until ~610ms.
        tokio::time::sleep(Duration::from_millis(500)).await;
        speaker.enqueue("늦게 도착한 문장");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(device.starts(), vec!["첫 문장", "늦게 도착한 문장"]);
        // No idle flicker between the two utterances.
        assert_eq!(
            avatar_events(&mut ui_rx),
            vec![AvatarState::Speaking, AvatarState::Idle]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_output_drops_utterances() {
        let device = ScriptedDevice::new(
            Duration::from_millis(10),
            Some(Duration::from_millis(100)),
        );
        let (notifier, _ui_rx) = ui::channel();
        let speaker = Speaker::spawn(
            Box::new(device.clone()),
            &CapabilityProfile {
                speech_input: false,
                speech_output: false,
                quirk: QuirkLevel::None,
            },
            VoiceSettings::default(),
            notifier,
        );

        speaker.enqueue("말하지 않을 문장");
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(device.speak_calls(), 0);
        assert!(speaker.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn quirky_stop_issues_verification_recancel() {
        let device =
            ScriptedDevice::new(Duration::from_millis(10), Some(Duration::from_secs(10)));
        let (speaker, _ui_rx) = spawn_engine(&device, QuirkLevel::MobileRestricted);

        speaker.enqueue("긴 문장");
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(speaker.is_speaking());

        speaker.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(device.cancels.load(Ordering::SeqCst), 1);

        // Second cancel only fires when the device still claims to be busy.
        device.speaking.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(device.cancels.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn quirky_stop_before_dispatch_never_reaches_device() {
        // pre_speak_delay defers the dispatch, so a stop racing in clears it
        // before the device ever sees the text.
        let device = ScriptedDevice::new(
            Duration::from_millis(10),
            Some(Duration::from_millis(100)),
        );
        let (speaker, _ui_rx) = spawn_engine(&device, QuirkLevel::MobileRestricted);

        speaker.enqueue("A");
        speaker.stop();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(device.speak_calls(), 0);
        assert!(speaker.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn quirky_busy_device_waits_for_cancel_to_settle() {
        let device = ScriptedDevice::new(Duration::from_millis(10), None);
        let (speaker, _ui_rx) = spawn_engine(&device, QuirkLevel::MobileRestricted);

        speaker.enqueue("첫 문장");
        speaker.enqueue("둘째 문장");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(device.starts(), vec!["첫 문장"]);

        // Device errors while still claiming to speak; the drain must cancel
        // and wait out cancel_settle + pre_speak_delay before reissuing.
        device.inject(DeviceEvent::Error(DeviceErrorKind::Other(
            "garbled".to_string(),
        )));
        tokio::time::sleep(Duration::from_millis(400)).await;
        let cancels_before = device.cancels.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(cancels_before >= 1);
        assert_eq!(device.speak_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_snapshot_applies_per_utterance() {
        let device = ScriptedDevice::new(
            Duration::from_millis(10),
            Some(Duration::from_millis(50)),
        );
        let (speaker, _ui_rx) = spawn_engine(&device, QuirkLevel::None);

        speaker.enqueue("느리게");
        let mut faster = VoiceSettings::default();
        faster.set_rate(1.5);
        speaker.update_settings(faster);
        speaker.enqueue("빠르게");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(device.starts(), vec!["느리게", "빠르게"]);
    }
}
