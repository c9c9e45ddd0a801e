//! Per-recipient translation fan-out for room transcripts
//!
//! Each recipient is rendered independently and concurrently: a recipient
//! sharing the speaker's language gets the transcript verbatim, everyone
//! else gets a translation. Engine failures degrade the message instead of
//! dropping it, and text plus audio always travel in a single `chat_message`.

use futures::future::join_all;
use tracing::{debug, warn};

use super::Outbox;
use crate::engine::{Synthesizer, Translator};
use crate::error::RelayError;
use crate::protocol::{encode_audio, ConnectionId, ServerMessage};

/// The participant whose transcript is being fanned out
#[derive(Debug, Clone)]
pub struct Speaker {
    pub user_id: String,
    pub language: String,
}

/// Snapshot of one room member, taken when the transcript arrived
#[derive(Clone)]
pub struct Recipient {
    pub connection: ConnectionId,
    pub user_id: String,
    pub language: String,
    pub tts_enabled: bool,
    pub outbox: Outbox,
}

/// Render and deliver `text` to every recipient
pub async fn fan_out(
    translator: &dyn Translator,
    synthesizer: &dyn Synthesizer,
    speaker: &Speaker,
    text: &str,
    recipients: Vec<Recipient>,
) {
    let deliveries = recipients.into_iter().map(|recipient| async move {
        let message = render(translator, synthesizer, speaker, text, &recipient).await;
        if recipient.outbox.send(message).is_err() {
            debug!(connection = %recipient.connection, "Recipient disconnected before delivery");
        }
    });

    join_all(deliveries).await;
}

/// Build the `chat_message` for one recipient
pub async fn render(
    translator: &dyn Translator,
    synthesizer: &dyn Synthesizer,
    speaker: &Speaker,
    text: &str,
    recipient: &Recipient,
) -> ServerMessage {
    let translated = if recipient.language == speaker.language {
        text.to_string()
    } else {
        match translator.translate(text, &recipient.language).await {
            Ok(translated) => translated,
            Err(e) => {
                let err = RelayError::Translation(format!("{:#}", e));
                warn!(
                    recipient = %recipient.user_id,
                    language = %recipient.language,
                    "{}",
                    err
                );
                format!("Translation error: {}", text)
            }
        }
    };

    let audio = if recipient.tts_enabled {
        match synthesizer.synthesize(&translated, &recipient.language).await {
            Ok(Some(audio)) => Some(encode_audio(&audio)),
            Ok(None) => {
                debug!(recipient = %recipient.user_id, "No voice available for {}", recipient.language);
                None
            }
            Err(e) => {
                let err = RelayError::Synthesis(format!("{:#}", e));
                warn!(recipient = %recipient.user_id, "{}", err);
                None
            }
        }
    } else {
        None
    };

    ServerMessage::ChatMessage {
        sender_id: speaker.user_id.clone(),
        original: text.to_string(),
        translated,
        audio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Upper {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Translator for Upper {
        async fn translate(&self, text: &str, target_language: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if target_language == "xx-XX" {
                bail!("unsupported language");
            }
            Ok(format!("[{}] {}", target_language, text.to_uppercase()))
        }
    }

    struct Voice;

    #[async_trait::async_trait]
    impl Synthesizer for Voice {
        async fn synthesize(&self, text: &str, language: &str) -> Result<Option<Vec<u8>>> {
            match language {
                "fr-FR" => bail!("synthesis backend down"),
                "ko-KR" => Ok(None),
                _ => Ok(Some(text.as_bytes().to_vec())),
            }
        }
    }

    fn speaker() -> Speaker {
        Speaker {
            user_id: "alice".to_string(),
            language: "en-US".to_string(),
        }
    }

    fn recipient(user: &str, language: &str, tts: bool) -> (Recipient, mpsc::UnboundedReceiver<ServerMessage>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let recipient = Recipient {
            connection: ConnectionId::new(),
            user_id: user.to_string(),
            language: language.to_string(),
            tts_enabled: tts,
            outbox,
        };
        (recipient, rx)
    }

    #[tokio::test]
    async fn test_same_language_skips_translator() {
        let translator = Upper::default();
        let (bob, _rx) = recipient("bob", "en-US", false);

        let message = render(&translator, &Voice, &speaker(), "hello", &bob).await;

        assert_eq!(translator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            message,
            ServerMessage::ChatMessage {
                sender_id: "alice".to_string(),
                original: "hello".to_string(),
                translated: "hello".to_string(),
                audio: None,
            }
        );
    }

    #[tokio::test]
    async fn test_translation_failure_falls_back_to_original() {
        let (bob, _rx) = recipient("bob", "xx-XX", false);

        let message = render(&Upper::default(), &Voice, &speaker(), "hello", &bob).await;

        let ServerMessage::ChatMessage { translated, .. } = message else {
            panic!("expected chat message");
        };
        assert_eq!(translated, "Translation error: hello");
    }

    #[tokio::test]
    async fn test_synthesis_failure_omits_audio() {
        let (bob, _rx) = recipient("bob", "fr-FR", true);
        let (carol, _rx2) = recipient("carol", "ko-KR", true);

        for r in [&bob, &carol] {
            let message = render(&Upper::default(), &Voice, &speaker(), "hello", r).await;
            let ServerMessage::ChatMessage { audio, translated, .. } = message else {
                panic!("expected chat message");
            };
            assert!(audio.is_none());
            assert!(translated.ends_with("HELLO"));
        }
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_recipient() {
        let (bob, mut bob_rx) = recipient("bob", "zh-TW", true);
        let (carol, mut carol_rx) = recipient("carol", "xx-XX", false);

        fan_out(&Upper::default(), &Voice, &speaker(), "hi", vec![bob, carol]).await;

        let Some(ServerMessage::ChatMessage { translated, audio, .. }) = bob_rx.recv().await else {
            panic!("bob got nothing");
        };
        assert_eq!(translated, "[zh-TW] HI");
        assert!(audio.is_some());

        let Some(ServerMessage::ChatMessage { translated, .. }) = carol_rx.recv().await else {
            panic!("carol got nothing");
        };
        assert_eq!(translated, "Translation error: hi");
    }
}
