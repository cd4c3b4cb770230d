use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use proptest::prelude::*;
use url::Url;

use copilot_stream::protocol::HistoryEntry;
use copilot_stream::{
    ChatSettings, ConnectionError, Connector, Conversation, NoHooks, RawFrame, Role, ServerEvent,
    Wire, normalize, normalize_text,
};

/// Never completes a handshake; sends just queue up.
struct NeverConnects;

impl Connector for NeverConnects {
    fn connect(&self, _url: Url) -> BoxFuture<'static, Result<Wire, ConnectionError>> {
        futures::future::pending().boxed()
    }
}

fn with_conversation<T>(f: impl FnOnce(&mut Conversation) -> T) -> T {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let _guard = rt.enter();
    let settings = ChatSettings::new(Url::parse("ws://backend.test/ws").unwrap())
        .with_greeting("Hello", vec!["Show me recent proposal summaries".into()]);
    let (mut conversation, _signals) =
        Conversation::new(settings, Arc::new(NeverConnects), Arc::new(NoHooks));
    f(&mut conversation)
}

// --- Normalizer ---

const CHUNK_FIELDS: [&str; 4] = ["content", "token", "text", "delta"];

proptest! {
    #[test]
    fn normalize_is_total(raw in any::<String>()) {
        let _ = normalize_text(&raw);
    }

    #[test]
    fn normalize_binary_is_total(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = normalize(&RawFrame::Binary(bytes));
    }

    #[test]
    fn plain_text_becomes_trimmed_token(body in "x[a-zA-Z0-9 ,.?]{0,40}", pad in " {0,3}") {
        let raw = format!("{pad}{body}{pad}");
        prop_assert_eq!(normalize_text(&raw), Some(ServerEvent::token(body.trim())));
    }

    #[test]
    fn whitespace_frames_yield_nothing(raw in "[ \t\r\n]{0,10}") {
        prop_assert_eq!(normalize_text(&raw), None);
    }

    #[test]
    fn untyped_chunk_done_flag_picks_event(
        field in prop::sample::select(CHUNK_FIELDS.to_vec()),
        chunk in "[a-z ]{1,20}",
        done in any::<bool>(),
        sources in proptest::collection::vec("[a-z]{1,8}\\.pdf", 0..3),
    ) {
        let frame = serde_json::json!({ field: chunk, "done": done, "sources": sources });
        let event = normalize_text(&frame.to_string());
        if done {
            prop_assert_eq!(event, Some(ServerEvent::stream_end(sources)));
        } else {
            prop_assert_eq!(event, Some(ServerEvent::token(chunk)));
        }
    }

    #[test]
    fn typed_token_content_is_verbatim(content in any::<String>()) {
        let frame = serde_json::json!({ "type": "token", "content": content });
        prop_assert_eq!(normalize_text(&frame.to_string()), Some(ServerEvent::token(content)));
    }
}

// --- Assembly ---

#[derive(Debug, Clone)]
enum Op {
    Event(ServerEvent),
    Send(String),
    NewConversation,
    Disconnect,
}

fn arb_event() -> impl Strategy<Value = ServerEvent> {
    prop_oneof![
        proptest::collection::vec("[a-z]{1,6}", 0..2).prop_map(|sources| {
            ServerEvent::StreamStart {
                sources,
                kind: None,
            }
        }),
        "[a-z ]{0,8}".prop_map(ServerEvent::token),
        proptest::collection::vec("[a-z]{1,6}", 0..2).prop_map(ServerEvent::stream_end),
        "[a-z ]{0,8}".prop_map(ServerEvent::error),
        Just(ServerEvent::WsClosed),
        "[a-z]{1,8}".prop_map(|content| ServerEvent::ChatHistory {
            messages: vec![HistoryEntry {
                role: Role::Assistant,
                content,
                sources: Vec::new(),
            }],
        }),
        Just(ServerEvent::Unrecognized(serde_json::json!({"status": "ok"}))),
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => arb_event().prop_map(Op::Event),
        2 => "[a-z ]{0,10}".prop_map(Op::Send),
        1 => Just(Op::NewConversation),
        1 => Just(Op::Disconnect),
    ]
}

proptest! {
    #[test]
    fn tokens_concatenate_in_arrival_order(
        chunks in proptest::collection::vec("\\PC{0,12}", 0..20)
    ) {
        with_conversation(|conversation| -> Result<(), TestCaseError> {
            conversation.send_message("Summarise our latest whitepaper").unwrap();
            conversation.handle_event(ServerEvent::StreamStart { sources: Vec::new(), kind: None });
            for chunk in &chunks {
                conversation.handle_event(ServerEvent::token(chunk.clone()));
            }
            conversation.handle_event(ServerEvent::stream_end(Vec::new()));

            let state = conversation.state();
            let answer = state.messages.last().unwrap();
            prop_assert!(!answer.streaming);
            prop_assert_eq!(&answer.text, &chunks.concat());
            Ok(())
        })?;
    }

    #[test]
    fn at_most_one_streaming_message(ops in proptest::collection::vec(arb_op(), 0..60)) {
        with_conversation(|conversation| -> Result<(), TestCaseError> {
            for op in ops {
                match op {
                    Op::Event(event) => conversation.handle_event(event),
                    Op::Send(text) => {
                        let before = conversation.state().messages.len();
                        let waiting = conversation.awaiting_reply();
                        let result = conversation.send_message(&text);
                        if waiting || text.trim().is_empty() {
                            prop_assert!(result.is_err());
                            prop_assert_eq!(conversation.state().messages.len(), before);
                        } else {
                            prop_assert!(result.is_ok());
                            prop_assert!(conversation.state().typing);
                        }
                    }
                    Op::NewConversation => conversation.new_conversation(),
                    Op::Disconnect => conversation.disconnect(),
                }
                let state = conversation.state();
                let streaming = state.messages.iter().filter(|m| m.streaming).count();
                prop_assert!(streaming <= 1, "{} streaming messages", streaming);
            }
            Ok(())
        })?;
    }
}
