//! REST side of the backend: the conversation list and feedback.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};
use url::Url;

use copilot_stream::{ConversationHooks, Feedback, MessageId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub message_count: u64,
}

impl ConversationSummary {
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            "Untitled conversation"
        } else {
            &self.title
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(api_url: &Url) -> Self {
        Self {
            base_url: api_url.as_str().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn conversations(&self) -> Result<Vec<ConversationSummary>> {
        let url = self.endpoint("/api/conversations");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Cannot reach {}", url))?;
        if !resp.status().is_success() {
            anyhow::bail!("GET {} returned {}", url, resp.status());
        }
        resp.json()
            .await
            .with_context(|| format!("Unexpected response from {}", url))
    }

    pub async fn submit_feedback(&self, message_id: MessageId, feedback: Feedback) -> Result<()> {
        let url = self.endpoint("/api/feedback");
        let body = serde_json::json!({
            "message_id": message_id,
            "feedback": feedback,
        });
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Cannot reach {}", url))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Failed to submit feedback: {} {}", status, text);
        }
        Ok(())
    }
}

/// Conversation hooks backed by the REST API. Both calls run in the
/// background; the latest conversation list is published on a watch channel.
pub struct ApiHooks {
    client: ApiClient,
    conversations: Arc<watch::Sender<Vec<ConversationSummary>>>,
}

impl ApiHooks {
    pub fn new(client: ApiClient) -> (Arc<Self>, watch::Receiver<Vec<ConversationSummary>>) {
        let (tx, rx) = watch::channel(Vec::new());
        let hooks = Arc::new(Self {
            client,
            conversations: Arc::new(tx),
        });
        (hooks, rx)
    }
}

impl ConversationHooks for ApiHooks {
    fn refresh_conversations(&self) {
        let client = self.client.clone();
        let conversations = self.conversations.clone();
        tokio::spawn(async move {
            match client.conversations().await {
                Ok(list) => {
                    debug!("Loaded {} conversations", list.len());
                    conversations.send_replace(list);
                }
                Err(e) => {
                    warn!("Failed to refresh conversations: {:#}", e);
                    conversations.send_replace(Vec::new());
                }
            }
        });
    }

    fn submit_feedback(&self, message_id: MessageId, feedback: Feedback) {
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(e) = client.submit_feedback(message_id, feedback).await {
                warn!("{:#}", e);
            }
        });
    }
}
