//! Console rendering of notification events.
//!
//! A terminal stand-in for the avatar screen: transcript lines, status
//! changes, and affordances are printed as they arrive. Avatar media
//! switches have no console equivalent and only show up in debug logs.

use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ui::UiEvent;

/// Render events until the channel closes.
pub fn spawn(mut rx: mpsc::UnboundedReceiver<UiEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            render(&event);
        }
    })
}

fn render(event: &UiEvent) {
    match event {
        UiEvent::Avatar(state) => debug!("avatar -> {state:?}"),
        UiEvent::Status { text, .. } => println!("[상태] {text}"),
        UiEvent::Sentence(text) => println!("아바타: {text}"),
        UiEvent::Emotion(emotion) => println!("        ({})", emotion.label()),
        UiEvent::Youtube { query, url } => {
            println!("        \"{query}\" 영상 보기: {url}");
        }
        UiEvent::MemoryKeywords(keywords) => {
            let tags: Vec<String> = keywords
                .iter()
                .map(|(category, words)| format!("{category}: {}", words.join(", ")))
                .collect();
            println!("        [추억 키워드] {}", tags.join(" / "));
        }
    }
}
