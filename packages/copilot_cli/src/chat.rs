use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

use copilot_stream::{
    ChatState, ConversationHandle, ConversationHooks, Feedback, HandleError, MessageId, Role,
    TungsteniteConnector,
};

use crate::api::{ApiClient, ApiHooks, ConversationSummary};
use crate::config::{CopilotConfig, ServerConfig, chat_settings};
use crate::render::Renderer;

/// One line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Send(&'a str),
    New,
    Rate(Feedback),
    Quit,
    Help,
    Unknown(&'a str),
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Some(Input::Send(line));
        };
        Some(match command {
            "new" => Input::New,
            "good" => Input::Rate(Feedback::Helpful),
            "bad" => Input::Rate(Feedback::NotHelpful),
            "quit" | "exit" => Input::Quit,
            "help" => Input::Help,
            _ => Input::Unknown(line),
        })
    }
}

const HELP: &str = "/new starts over, /good and /bad rate the last answer, /quit exits";

/// The answer feedback commands apply to: the latest finished assistant
/// message that replies to something.
fn rateable(state: &ChatState) -> Option<MessageId> {
    let last_user = state.messages.iter().rposition(|m| m.role == Role::User)?;
    state.messages[last_user..]
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant && !m.streaming)
        .map(|m| m.id)
}

fn active_title<'a>(
    state: &ChatState,
    conversations: &'a [ConversationSummary],
) -> Option<&'a str> {
    let active = state.active_conversation.as_deref()?;
    conversations
        .iter()
        .find(|c| c.id == active)
        .map(ConversationSummary::display_title)
}

/// Periodic conversation-list refresh; `None` when polling is off. The
/// first tick comes one full period after start-up.
fn refresh_interval(secs: u64) -> Option<Interval> {
    if secs == 0 {
        return None;
    }
    let period = Duration::from_secs(secs);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn next_refresh(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

pub async fn chat_command(config: &CopilotConfig, query: Option<String>) -> Result<()> {
    let fc = config.load()?;
    let server = ServerConfig::from_file(&fc.server)?;
    let settings = chat_settings(&server, &fc.chat);

    let (hooks, mut conversations) = ApiHooks::new(ApiClient::new(&server.api_url));
    hooks.refresh_conversations();
    let mut refresh = refresh_interval(fc.chat.conversation_refresh_secs);
    let handle =
        ConversationHandle::spawn(settings, Arc::new(TungsteniteConnector), hooks.clone());

    let mut state = handle.subscribe();
    let mut renderer = Renderer::new(std::io::stdout());
    renderer.notice(HELP)?;
    renderer.render(&state.borrow_and_update())?;

    if let Some(query) = query {
        handle.start_conversation(Some(query)).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shown_title: Option<String> = None;

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                renderer.render(&snapshot)?;
                let list = conversations.borrow().clone();
                show_title(&mut renderer, &snapshot, &list, &mut shown_title)?;
            }
            Ok(()) = conversations.changed() => {
                let snapshot = state.borrow().clone();
                let list = conversations.borrow_and_update().clone();
                show_title(&mut renderer, &snapshot, &list, &mut shown_title)?;
            }
            () = next_refresh(&mut refresh) => hooks.refresh_conversations(),
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some(input) = Input::parse(&line) else { continue };
                match input {
                    Input::Send(text) => match handle.send_message(text).await {
                        Ok(id) => renderer.mark_echoed(id),
                        Err(HandleError::Rejected(rejection)) => {
                            renderer.notice(&rejection.to_string())?
                        }
                        Err(e) => return Err(e.into()),
                    },
                    Input::New => {
                        shown_title = None;
                        handle.new_conversation().await?;
                    }
                    Input::Rate(feedback) => match rateable(&handle.snapshot()) {
                        Some(id) => {
                            handle.record_feedback(id, feedback).await?;
                            renderer.notice("thanks for the feedback")?;
                        }
                        None => renderer.notice("nothing to rate yet")?,
                    },
                    Input::Quit => break,
                    Input::Help => renderer.notice(HELP)?,
                    Input::Unknown(command) => {
                        renderer.notice(&format!("unknown command {command}"))?
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    debug!("Leaving chat");
    let _ = handle.shutdown().await;
    Ok(())
}

fn show_title<W: std::io::Write>(
    renderer: &mut Renderer<W>,
    state: &ChatState,
    conversations: &[ConversationSummary],
    shown: &mut Option<String>,
) -> std::io::Result<()> {
    let Some(title) = active_title(state, conversations) else {
        return Ok(());
    };
    if shown.as_deref() == Some(title) {
        return Ok(());
    }
    renderer.title(title)?;
    *shown = Some(title.to_string());
    Ok(())
}
