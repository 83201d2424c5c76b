//! Speech input: recognizer abstraction and the listening controller.
//!
//! Recognition is push-to-talk. Starting a listen always barges in on the
//! avatar: any in-flight speech is stopped first so the device never records
//! its own voice output.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::speech::Speaker;
use crate::ui::UiNotifier;

#[derive(Error, Debug)]
pub enum ListenError {
    #[error("speech input is not supported on this platform")]
    Unsupported,
    #[error("recognizer failed: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerEvent {
    Transcript { text: String, is_final: bool },
    /// The recognizer stopped on its own (silence timeout, session end).
    Ended,
    Error(String),
}

/// One speech recognition session source.
pub trait Recognizer: Send {
    fn start(
        &mut self,
        events: mpsc::UnboundedSender<RecognizerEvent>,
    ) -> Result<(), ListenError>;
    fn stop(&mut self);
}

/// Stand-in for platforms without a recognition backend.
pub struct NullRecognizer;

impl Recognizer for NullRecognizer {
    fn start(
        &mut self,
        _events: mpsc::UnboundedSender<RecognizerEvent>,
    ) -> Result<(), ListenError> {
        Err(ListenError::Unsupported)
    }

    fn stop(&mut self) {}
}

/// Whether a speech recognition backend exists here. None is wired up yet;
/// transcripts come from typed input instead.
pub fn input_available() -> bool {
    false
}

/// Drives a [`Recognizer`] and forwards final transcripts to the
/// conversation loop.
pub struct SpeechInputController {
    recognizer: Arc<Mutex<Box<dyn Recognizer>>>,
    listening: Arc<AtomicBool>,
    supported: bool,
    speaker: Speaker,
    notifier: UiNotifier,
    event_tx: mpsc::UnboundedSender<RecognizerEvent>,
}

impl SpeechInputController {
    /// Returns the controller and the stream of final transcripts.
    pub fn new(
        recognizer: Box<dyn Recognizer>,
        supported: bool,
        speaker: Speaker,
        notifier: UiNotifier,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (transcript_tx, transcript_rx) = mpsc::unbounded_channel();
        let listening = Arc::new(AtomicBool::new(false));

        let pump_listening = Arc::clone(&listening);
        let pump_notifier = notifier.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    RecognizerEvent::Transcript { text, is_final } => {
                        if !is_final {
                            continue;
                        }
                        let text = text.trim().to_string();
                        if text.is_empty() {
                            continue;
                        }
                        debug!("transcript: {text}");
                        let _ = transcript_tx.send(text);
                    }
                    RecognizerEvent::Ended => {
                        if pump_listening.swap(false, Ordering::SeqCst) {
                            pump_notifier.idle();
                        }
                    }
                    RecognizerEvent::Error(reason) => {
                        warn!("recognizer error: {reason}");
                        if pump_listening.swap(false, Ordering::SeqCst) {
                            pump_notifier.idle();
                        }
                    }
                }
            }
        });

        (
            Self {
                recognizer: Arc::new(Mutex::new(recognizer)),
                listening,
                supported,
                speaker,
                notifier,
                event_tx,
            },
            transcript_rx,
        )
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Begin a listening session. Always interrupts speech output first,
    /// even when a session is already open.
    pub async fn start(&self) -> Result<(), ListenError> {
        if !self.supported {
            return Err(ListenError::Unsupported);
        }
        // Waiting for the interruption keeps the listening notification
        // ordered after the engine's idle one.
        self.speaker.stop_and_wait().await;
        if self.listening.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self
            .recognizer
            .lock()
            .map_err(|_| ListenError::Backend("recognizer lock poisoned".to_string()))?
            .start(self.event_tx.clone());
        if let Err(e) = result {
            self.listening.store(false, Ordering::SeqCst);
            return Err(e);
        }
        self.notifier.listening();
        Ok(())
    }

    /// End the listening session, if any.
    pub fn stop(&self) {
        if let Ok(mut recognizer) = self.recognizer.lock() {
            recognizer.stop();
        }
        if self.listening.swap(false, Ordering::SeqCst) {
            self.notifier.idle();
        }
    }

    pub async fn toggle(&self) -> Result<(), ListenError> {
        if self.is_listening() {
            self.stop();
            Ok(())
        } else {
            self.start().await
        }
    }
}
