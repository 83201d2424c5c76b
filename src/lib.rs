//! Dasom - reminiscence-therapy avatar client
//!
//! Streams replies from a conversation server sentence by sentence, speaks
//! them through the platform TTS queue, and keeps the avatar state (idle,
//! speaking, listening) in sync with what is actually happening.

pub mod chat;
pub mod config;
pub mod emotion;
pub mod listen;
pub mod platform;
pub mod settings;
pub mod speech;
pub mod ui;
pub mod view;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::chat::{ChatClient, ChatError, FALLBACK_REPLY, STREAM_ERROR_REPLY};
use crate::config::AppConfig;
use crate::listen::{NullRecognizer, SpeechInputController};
use crate::platform::CapabilityProfile;
use crate::settings::{SettingsStore, VoiceSettings};
use crate::speech::Speaker;
use crate::ui::UiNotifier;

/// Wire everything together and run the console conversation loop until
/// EOF or `/quit`.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    let profile = CapabilityProfile::detect();
    info!(
        "starting against {} (speech out: {}, speech in: {}, quirk: {:?})",
        config.server_url, profile.speech_output, profile.speech_input, profile.quirk
    );

    let store = SettingsStore::open_default();
    let mut voice_settings = store.load();

    let (notifier, ui_rx) = ui::channel();
    let view = view::spawn(ui_rx);

    let speaker = Speaker::spawn(
        speech::default_device(),
        &profile,
        voice_settings.clone(),
        notifier.clone(),
    );
    let client = Arc::new(ChatClient::new(
        &config.server_url,
        config.connect_timeout,
    )?);
    let voice_on = Arc::new(AtomicBool::new(
        config.voice_output && profile.speech_output,
    ));
    let (mic, mut transcripts) = SpeechInputController::new(
        Box::new(NullRecognizer),
        profile.speech_input,
        speaker.clone(),
        notifier.clone(),
    );

    println!("다솜이와 이야기를 나눠보세요. 명령어는 /help 를 입력하세요.");
    notifier.idle();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(command) = line.strip_prefix('/') {
                    let keep_going = handle_command(
                        command,
                        &client,
                        &speaker,
                        &mic,
                        &store,
                        &mut voice_settings,
                        &voice_on,
                    )
                    .await;
                    if !keep_going {
                        break;
                    }
                } else {
                    dispatch_send(line, &client, &notifier, &speaker, &voice_on);
                }
            },
            transcript = transcripts.recv() => {
                if let Some(text) = transcript {
                    println!("나: {text}");
                    dispatch_send(&text, &client, &notifier, &speaker, &voice_on);
                }
            },
        }
    }

    speaker.stop_and_wait().await;
    view.abort();
    Ok(())
}

/// Fire the request off its own task so the console stays responsive while
/// the reply streams in.
fn dispatch_send(
    message: &str,
    client: &Arc<ChatClient>,
    notifier: &UiNotifier,
    speaker: &Speaker,
    voice_on: &Arc<AtomicBool>,
) {
    let message = message.to_string();
    let client = Arc::clone(client);
    let notifier = notifier.clone();
    let speaker = speaker.clone();
    let voice_on = Arc::clone(voice_on);
    tokio::spawn(async move {
        let result = client
            .send(&message, |sentence| {
                chat::fan_out(
                    &sentence,
                    &notifier,
                    &speaker,
                    voice_on.load(Ordering::SeqCst),
                );
            })
            .await;
        match result {
            Ok(_) => chat::settle_after_stream(&speaker, &notifier).await,
            Err(e) => {
                warn!("chat request failed: {e}");
                let reply = match e {
                    ChatError::Server(_) => STREAM_ERROR_REPLY,
                    _ => FALLBACK_REPLY,
                };
                notifier.sentence(reply);
                notifier.idle();
            }
        }
    });
}

/// Returns false when the loop should exit.
async fn handle_command(
    command: &str,
    client: &Arc<ChatClient>,
    speaker: &Speaker,
    mic: &SpeechInputController,
    store: &SettingsStore,
    voice_settings: &mut VoiceSettings,
    voice_on: &Arc<AtomicBool>,
) -> bool {
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match name {
        "quit" | "exit" => return false,
        "stop" => speaker.stop(),
        "clear" => {
            speaker.stop();
            match client.clear_history().await {
                Ok(()) => println!("대화 기록이 초기화되었습니다."),
                Err(e) => println!("기록 초기화 실패: {e}"),
            }
        }
        "mute" => {
            voice_on.store(false, Ordering::SeqCst);
            speaker.stop();
            println!("음성 출력을 껐습니다.");
        }
        "unmute" => {
            voice_on.store(true, Ordering::SeqCst);
            println!("음성 출력을 켰습니다.");
        }
        "mic" => {
            if let Err(e) = mic.toggle().await {
                println!("음성 인식 오류: {e}");
            }
        }
        "rate" | "pitch" | "volume" => match arg.parse::<f32>() {
            Ok(value) => {
                match name {
                    "rate" => voice_settings.set_rate(value),
                    "pitch" => voice_settings.set_pitch(value),
                    _ => voice_settings.set_volume(value),
                }
                apply_settings(speaker, store, voice_settings);
            }
            Err(_) => println!("숫자를 입력해 주세요: /{name} 0.8"),
        },
        "voice" => {
            voice_settings.voice = if arg.is_empty() {
                None
            } else {
                Some(arg.to_string())
            };
            apply_settings(speaker, store, voice_settings);
        }
        "help" => print_help(),
        other => {
            println!("알 수 없는 명령어입니다: /{other}");
            print_help();
        }
    }
    true
}

fn apply_settings(speaker: &Speaker, store: &SettingsStore, settings: &VoiceSettings) {
    speaker.update_settings(settings.clone());
    if let Err(e) = store.save(settings) {
        warn!("failed to persist voice settings: {e}");
    }
    println!(
        "속도 {:.1} / 음높이 {:.1} / 음량 {:.1}",
        settings.rate, settings.pitch, settings.volume
    );
}

fn print_help() {
    println!("  /stop           말하기를 멈춥니다");
    println!("  /clear          대화 기록을 초기화합니다");
    println!("  /mute /unmute   음성 출력을 끄고 켭니다");
    println!("  /mic            음성 인식을 켜고 끕니다");
    println!("  /rate <값>      말하기 속도 (0.1 ~ 2.0)");
    println!("  /pitch <값>     음높이 (0.0 ~ 2.0)");
    println!("  /volume <값>    음량 (0.0 ~ 1.0)");
    println!("  /voice <이름>   목소리 선택 (이름 없이 입력하면 기본값)");
    println!("  /quit           종료합니다");
}
