//! WeCom (enterprise WeChat) group robot webhook channel.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::message::Message;
use crate::NotifyChannel;

/// Environment variable for the WeCom webhook URL.
pub const ENV_WECHAT_WEBHOOK_URL: &str = "WECHAT_WEBHOOK_URL";

/// Default request timeout for webhook posts.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// WeCom webhook notification channel.
pub struct WeComChannel {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl WeComChannel {
    /// Create a new WeCom channel from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let webhook_url = std::env::var(ENV_WECHAT_WEBHOOK_URL)
            .ok()
            .filter(|url| !url.trim().is_empty());

        if webhook_url.is_some() {
            debug!("WeCom notifications enabled");
        } else {
            debug!("WeCom notifications disabled (WECHAT_WEBHOOK_URL not set)");
        }

        Self {
            webhook_url,
            client: build_client(DEFAULT_TIMEOUT),
        }
    }

    /// Create a WeCom channel with a specific webhook URL.
    #[must_use]
    pub fn new(webhook_url: String, timeout: Duration) -> Self {
        Self {
            webhook_url: Some(webhook_url),
            client: build_client(timeout),
        }
    }

    fn format_payload(message: &Message) -> WeComPayload<'_> {
        WeComPayload {
            msgtype: "text",
            text: WeComText {
                content: &message.content,
                mentioned_list: &message.mentioned,
            },
        }
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

#[async_trait]
impl NotifyChannel for WeComChannel {
    fn name(&self) -> &'static str {
        "wecom"
    }

    fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let webhook_url = self
            .webhook_url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured(ENV_WECHAT_WEBHOOK_URL.to_string()))?;

        let payload = Self::format_payload(message);

        debug!(
            channel = "wecom",
            chars = message.content.chars().count(),
            mentions = message.mentioned.len(),
            "Sending notification"
        );

        let response = self.client.post(webhook_url).json(&payload).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status != reqwest::StatusCode::OK {
            warn!(
                channel = "wecom",
                status = %status,
                body = %body,
                "WeCom webhook request failed"
            );
            return Err(ChannelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: WeComReply = serde_json::from_str(&body)?;
        if reply.errcode == 0 {
            debug!(channel = "wecom", "Notification sent successfully");
            Ok(())
        } else {
            warn!(
                channel = "wecom",
                errcode = reply.errcode,
                errmsg = %reply.errmsg,
                "WeCom rejected message"
            );
            Err(ChannelError::Rejected {
                errcode: reply.errcode,
                errmsg: reply.errmsg,
            })
        }
    }
}

// =============================================================================
// WeCom API types
// =============================================================================

#[derive(Debug, Serialize)]
struct WeComPayload<'a> {
    msgtype: &'static str,
    text: WeComText<'a>,
}

#[derive(Debug, Serialize)]
struct WeComText<'a> {
    content: &'a str,
    mentioned_list: &'a [String],
}

#[derive(Debug, Deserialize)]
struct WeComReply {
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}
