use std::env;
use std::sync::OnceLock;

use im::hashmap;
use modular_agent_core::{
    Agent, AgentContext, AgentData, AgentError, AgentOutput, AgentSpec, AgentValue, AsAgent,
    ModularAgent, async_trait, modular_agent,
};
use serde::Deserialize;
use tracing::error;

use crate::whatsapp;

static CATEGORY: &str = "WhatsApp";

static PORT_RESULT: &str = "result";
static PORT_MESSAGE: &str = "message";
static PORT_TEXT: &str = "text";

static CONFIG_RECIPIENT: &str = "recipient";
static CONFIG_PHONE_NUMBER_ID: &str = "phone_number_id";
static CONFIG_CONVERT_MARKDOWN: &str = "convert_markdown";
static CONFIG_PREVIEW_URL: &str = "preview_url";
static CONFIG_WHATSAPP_ACCESS_TOKEN: &str = "whatsapp_access_token";

static GRAPH_API_BASE: &str = "https://graph.facebook.com/v21.0";

static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

fn get_client() -> &'static reqwest::Client {
    CLIENT.get_or_init(reqwest::Client::new)
}

fn get_access_token(ma: &ModularAgent) -> Result<String, AgentError> {
    if let Some(global_token) = ma
        .get_global_configs(WhatsAppPostAgent::DEF_NAME)
        .and_then(|cfg| cfg.get_string(CONFIG_WHATSAPP_ACCESS_TOKEN).ok())
        .filter(|key| !key.is_empty())
    {
        Ok(global_token)
    } else {
        env::var("WHATSAPP_ACCESS_TOKEN")
            .map_err(|_| AgentError::InvalidValue("WHATSAPP_ACCESS_TOKEN not set".to_string()))
    }
}

/// Agent for converting Markdown text to WhatsApp formatting.
///
/// # Input
/// - `message`: String message, Message, object with a `text` field, or
///   an array of either
///
/// # Output
/// - `text`: The text rewritten in WhatsApp's formatting syntax
#[modular_agent(
    title = "Format",
    category = CATEGORY,
    inputs = [PORT_MESSAGE],
    outputs = [PORT_TEXT],
)]
struct WhatsAppFormatAgent {
    data: AgentData,
}

#[async_trait]
impl AsAgent for WhatsAppFormatAgent {
    fn new(ma: ModularAgent, id: String, spec: AgentSpec) -> Result<Self, AgentError> {
        Ok(Self {
            data: AgentData::new(ma, id, spec),
        })
    }

    async fn process(
        &mut self,
        ctx: AgentContext,
        _port: String,
        value: AgentValue,
    ) -> Result<(), AgentError> {
        let (text, _) = extract_message_content(&value)?;
        let converted = whatsapp::md_to_whatsapp(&text);
        self.output(ctx, PORT_TEXT, AgentValue::string(converted))
            .await
    }
}

/// Agent for posting messages to a WhatsApp number via the Cloud API.
///
/// # Configuration
/// - `recipient`: Destination phone number in international format
/// - `phone_number_id`: The sending phone number ID of the WhatsApp
///   Business account
/// - `convert_markdown`: Convert Markdown to WhatsApp formatting before
///   sending (default: true)
/// - `preview_url`: Let WhatsApp render a preview for links in the
///   message (default: false)
///
/// # Input
/// - `message`: String message or object with `text` and optional `to`
///   fields; `to` overrides the configured recipient
///
/// # Output
/// - `result`: Object containing `ok`, `message_id`, `recipient` on success
#[modular_agent(
    title = "Post",
    category = CATEGORY,
    inputs = [PORT_MESSAGE],
    outputs = [PORT_RESULT],
    string_config(name = CONFIG_RECIPIENT),
    string_config(name = CONFIG_PHONE_NUMBER_ID),
    boolean_config(name = CONFIG_CONVERT_MARKDOWN, default = true),
    boolean_config(name = CONFIG_PREVIEW_URL, default = false),
    custom_global_config(name = CONFIG_WHATSAPP_ACCESS_TOKEN, type_ = "password", default = AgentValue::string(""), title = "WhatsApp Access Token"),
)]
struct WhatsAppPostAgent {
    data: AgentData,
}

#[derive(Deserialize)]
struct SendMessageResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Deserialize)]
struct SentMessage {
    id: String,
}

#[async_trait]
impl AsAgent for WhatsAppPostAgent {
    fn new(ma: ModularAgent, id: String, spec: AgentSpec) -> Result<Self, AgentError> {
        Ok(Self {
            data: AgentData::new(ma, id, spec),
        })
    }

    async fn process(
        &mut self,
        ctx: AgentContext,
        _port: String,
        value: AgentValue,
    ) -> Result<(), AgentError> {
        let config = self.configs()?;
        let phone_number_id = config.get_string(CONFIG_PHONE_NUMBER_ID)?;
        if phone_number_id.is_empty() {
            return Err(AgentError::InvalidValue(
                "Phone number ID not configured".to_string(),
            ));
        }
        let convert = config.get_bool_or(CONFIG_CONVERT_MARKDOWN, true);
        let preview_url = config.get_bool_or(CONFIG_PREVIEW_URL, false);

        let (text, to) = extract_message_content(&value)?;
        let recipient = match to {
            Some(to) => to,
            None => {
                let recipient = config.get_string(CONFIG_RECIPIENT)?;
                if recipient.is_empty() {
                    return Err(AgentError::InvalidValue(
                        "Recipient not configured".to_string(),
                    ));
                }
                recipient
            }
        };

        let text = if convert {
            whatsapp::md_to_whatsapp(&text)
        } else {
            text
        };

        let token = get_access_token(self.ma())?;
        let client = get_client();

        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": recipient,
            "type": "text",
            "text": {
                "preview_url": preview_url,
                "body": text,
            },
        });

        let response = client
            .post(format!("{}/{}/messages", GRAPH_API_BASE, phone_number_id))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::IoError(format!("WhatsApp API error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!("WhatsApp API request failed: {} {}", status, detail);
            return Err(AgentError::IoError(format!(
                "WhatsApp API error: HTTP {}",
                status
            )));
        }

        let sent: SendMessageResponse = response.json().await.map_err(|e| {
            AgentError::IoError(format!("Failed to parse WhatsApp API response: {}", e))
        })?;

        let message_id = sent
            .messages
            .first()
            .map(|m| m.id.clone())
            .unwrap_or_default();

        let result = AgentValue::object(hashmap! {
            "ok".into() => AgentValue::boolean(true),
            "message_id".into() => AgentValue::string(message_id),
            "recipient".into() => AgentValue::string(recipient),
        });

        self.output(ctx, PORT_RESULT, result).await
    }
}

fn extract_message_content(value: &AgentValue) -> Result<(String, Option<String>), AgentError> {
    match value {
        AgentValue::String(s) => Ok((s.to_string(), None)),
        AgentValue::Message(msg) => Ok((msg.content.clone(), None)),
        AgentValue::Object(obj) => {
            let text = obj
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let to = obj.get("to").and_then(|v| v.as_str()).map(String::from);
            Ok((text, to))
        }
        AgentValue::Array(arr) => {
            let texts: Vec<String> = arr
                .iter()
                .filter_map(|v| {
                    v.as_str()
                        .map(String::from)
                        .or_else(|| v.as_message().map(|m| m.content.clone()))
                })
                .collect();
            Ok((texts.join("\n"), None))
        }
        _ => {
            let json = serde_json::to_string_pretty(&value.to_json()).unwrap_or_default();
            Ok((format!("```\n{}\n```", json), None))
        }
    }
}
