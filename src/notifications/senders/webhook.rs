use async_trait::async_trait;
use reqwest::{Client, Method, header};
use tera::{Context, Tera};

use super::{NotificationSender, SenderError, ensure_success};
use crate::notifications::models::{AlertMessage, ChannelConfig};

/// A sender for pushing notifications via a custom webhook.
pub struct WebhookSender {
    client: Client,
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookSender {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

fn render_body(template: &str, message: &AlertMessage) -> Result<String, SenderError> {
    let mut tera_context = Context::new();
    tera_context.insert("subject", &message.subject);
    tera_context.insert("body", &message.body);
    for (key, value) in &message.context {
        tera_context.insert(key, value);
    }
    Tera::one_off(template, &tera_context, false).map_err(|e| SenderError::TemplatingError(e.to_string()))
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(&self, config: &ChannelConfig, message: &AlertMessage) -> Result<(), SenderError> {
        let ChannelConfig::Webhook {
            url,
            method,
            headers,
            body_template,
        } = config
        else {
            return Err(SenderError::InvalidConfiguration(
                "Expected Webhook config, but found a different type.".to_string(),
            ));
        };

        let http_method = match method.to_uppercase().as_str() {
            "POST" => Method::POST,
            "GET" => Method::GET,
            _ => {
                return Err(SenderError::InvalidConfiguration(format!(
                    "Unsupported HTTP method: {method}"
                )));
            }
        };

        let mut request_builder = self.client.request(http_method.clone(), url);

        if let Some(h) = headers {
            let mut header_map = header::HeaderMap::new();
            for (key, value) in h {
                let header_name = header::HeaderName::from_bytes(key.as_bytes())
                    .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid header name: {e}")))?;
                let header_value = header::HeaderValue::from_str(value)
                    .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid header value: {e}")))?;
                header_map.insert(header_name, header_value);
            }
            request_builder = request_builder.headers(header_map);
        }

        if http_method == Method::POST {
            request_builder = match body_template {
                Some(template) => request_builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(render_body(template, message)?),
                None => request_builder.json(&serde_json::json!({
                    "subject": message.subject,
                    "body": message.body,
                    "context": message.context,
                })),
            };
        } else {
            let mut query: Vec<(&str, &str)> = vec![("subject", message.subject.as_str()), ("body", message.body.as_str())];
            query.extend(message.context.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            request_builder = request_builder.query(&query);
        }

        let response = request_builder.send().await?;
        ensure_success(response, "Webhook").await
    }
}
