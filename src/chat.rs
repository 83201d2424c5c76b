//! Streaming chat client for the conversation server.
//!
//! The server answers `POST /chat` with a line stream in the shape
//! `data: <json>\n`, one event per completed sentence, closed by a
//! `data: [DONE]` marker. Sentences are fanned out to the view layer and the
//! speech queue as they arrive, so the avatar starts talking before the full
//! reply exists.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::emotion::Emotion;
use crate::speech::Speaker;
use crate::ui::UiNotifier;

/// Shown in place of a reply when the server cannot be reached at all.
pub const FALLBACK_REPLY: &str = "죄송합니다. 서버와 연결할 수 없습니다.";
/// Shown when the connection dropped mid-reply.
pub const STREAM_ERROR_REPLY: &str = "죄송합니다. 오류가 발생했습니다.";

/// Quiet period after the stream closes before the avatar may settle back to
/// idle. Gives a final short sentence time to reach the speech queue.
pub const STREAM_END_GRACE: Duration = Duration::from_millis(500);

const DONE_MARKER: &str = "[DONE]";

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {0}")]
    Status(StatusCode),
    #[error("server error: {0}")]
    Server(String),
    #[error("message is empty")]
    EmptyMessage,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

/// One completed assistant sentence with its extracted affordances.
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceEvent {
    pub text: String,
    pub youtube_search: Option<String>,
    pub memory_keywords: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireEvent {
    Sentence {
        content: String,
        #[serde(default)]
        youtube_search: Option<String>,
        #[serde(default)]
        memory_keywords: BTreeMap<String, Vec<String>>,
    },
    Complete {
        #[serde(default)]
        full_response: String,
    },
    Error {
        message: String,
    },
}

/// Reassembles `data: <json>` lines from arbitrary byte chunks.
///
/// Chunk boundaries fall anywhere, including inside a multi-byte Korean
/// character, so the carry buffer stays raw bytes and decoding happens only
/// on complete lines.
#[derive(Default)]
struct EventStreamDecoder {
    carry: Vec<u8>,
}

impl EventStreamDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<WireEvent> {
        self.carry.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.carry.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=pos).collect();
            if let Some(event) = parse_line(&line[..line.len() - 1]) {
                events.push(event);
            }
        }
        events
    }

    /// Parse whatever is left once the stream closes without a newline.
    fn finish(mut self) -> Option<WireEvent> {
        if self.carry.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.carry);
        parse_line(&line)
    }
}

fn parse_line(raw: &[u8]) -> Option<WireEvent> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim(),
        Err(_) => {
            warn!("discarding non-UTF-8 stream line");
            return None;
        }
    };
    let mut payload = line.strip_prefix("data: ")?;
    // The server doubles the prefix on the first event of a reply.
    while let Some(rest) = payload.strip_prefix("data: ") {
        payload = rest;
    }
    let payload = payload.trim();
    if payload.is_empty() || payload == DONE_MARKER {
        return None;
    }
    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("unparseable stream event ({e}): {payload}");
            None
        }
    }
}

/// Summary of one finished reply stream.
#[derive(Debug, Default)]
pub struct ChatOutcome {
    pub sentences: usize,
    pub full_response: Option<String>,
}

pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Send a user message and stream the reply, invoking `on_sentence` for
    /// each completed sentence as it arrives.
    pub async fn send<F>(&self, message: &str, mut on_sentence: F) -> Result<ChatOutcome, ChatError>
    where
        F: FnMut(SentenceEvent),
    {
        let message = message.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let response = self
            .http
            .post(format!("{}/chat", self.base_url))
            .json(&ChatRequest { message })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChatError::Status(response.status()));
        }

        let mut outcome = ChatOutcome::default();
        let mut decoder = EventStreamDecoder::default();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for event in decoder.push(&chunk) {
                Self::apply(event, &mut outcome, &mut on_sentence)?;
            }
        }
        if let Some(event) = decoder.finish() {
            Self::apply(event, &mut outcome, &mut on_sentence)?;
        }
        debug!("reply stream closed after {} sentences", outcome.sentences);
        Ok(outcome)
    }

    fn apply<F>(
        event: WireEvent,
        outcome: &mut ChatOutcome,
        on_sentence: &mut F,
    ) -> Result<(), ChatError>
    where
        F: FnMut(SentenceEvent),
    {
        match event {
            WireEvent::Sentence {
                content,
                youtube_search,
                memory_keywords,
            } => {
                outcome.sentences += 1;
                on_sentence(SentenceEvent {
                    text: content,
                    youtube_search,
                    memory_keywords,
                });
            }
            WireEvent::Complete { full_response } => {
                outcome.full_response = Some(full_response);
            }
            WireEvent::Error { message } => return Err(ChatError::Server(message)),
        }
        Ok(())
    }

    /// Drop the server-side conversation history.
    pub async fn clear_history(&self) -> Result<(), ChatError> {
        let response = self
            .http
            .post(format!("{}/clear_history", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChatError::Status(response.status()));
        }
        Ok(())
    }
}

/// Browser-openable YouTube search URL for an extracted query.
pub fn youtube_search_url(query: &str) -> String {
    format!(
        "https://www.youtube.com/results?search_query={}",
        urlencoding::encode(query)
    )
}

/// Route one sentence to the transcript, the emotion badge, any media
/// affordances, and (when voice output is on) the speech queue.
pub fn fan_out(event: &SentenceEvent, notifier: &UiNotifier, speaker: &Speaker, voice_on: bool) {
    notifier.sentence(&event.text);
    notifier.emotion(Emotion::classify(&event.text));
    if let Some(query) = &event.youtube_search {
        notifier.youtube(query.clone(), youtube_search_url(query));
    }
    if !event.memory_keywords.is_empty() {
        notifier.memory_keywords(event.memory_keywords.clone());
    }
    if voice_on {
        speaker.enqueue(&event.text);
    }
}

/// After the reply stream closes, wait out the grace period and settle the
/// avatar to idle if nothing is speaking or queued. When speech is still in
/// flight the engine publishes idle itself once the queue drains.
pub async fn settle_after_stream(speaker: &Speaker, notifier: &UiNotifier) {
    tokio::time::sleep(STREAM_END_GRACE).await;
    if speaker.is_idle() {
        notifier.idle();
    }
}
