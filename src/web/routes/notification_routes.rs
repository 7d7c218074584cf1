use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use std::sync::Arc;
use tracing::info;

use crate::{
    db::services::channel_service,
    notifications::models::{
        ChannelResponse, ChannelTemplate, ChannelTemplateField, ChannelType,
        CreateChannelRequest, TestChannelRequest, UpdateChannelRequest,
    },
    web::{AppError, AppState, models::AuthenticatedUser},
};

const DEFAULT_TEST_MESSAGE: &str = "This is a test message from your monitoring system.";

pub fn create_notification_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/channels", get(get_all_channels).post(create_channel))
        .route("/channels/templates", get(get_channel_templates))
        .route(
            "/channels/{id}",
            get(get_channel_by_id)
                .put(update_channel)
                .delete(delete_channel),
        )
        .route("/channels/{id}/test", post(test_channel))
}

fn field(
    name: &str,
    field_type: &str,
    required: bool,
    label: &str,
    help_text: Option<&str>,
) -> ChannelTemplateField {
    ChannelTemplateField {
        name: name.to_string(),
        field_type: field_type.to_string(),
        required,
        label: label.to_string(),
        help_text: help_text.map(str::to_string),
    }
}

// Field names match the camelCase keys of the channel config JSON.
async fn get_channel_templates() -> Json<Vec<ChannelTemplate>> {
    let templates = vec![
        ChannelTemplate {
            channel_type: ChannelType::Email,
            name: "Email".to_string(),
            fields: vec![field(
                "recipients",
                "list",
                true,
                "Recipients",
                Some("One or more email addresses."),
            )],
        },
        ChannelTemplate {
            channel_type: ChannelType::Sms,
            name: "SMS".to_string(),
            fields: vec![field(
                "recipients",
                "list",
                true,
                "Phone numbers",
                Some("International format, e.g. +15550100."),
            )],
        },
        ChannelTemplate {
            channel_type: ChannelType::Webhook,
            name: "Custom Webhook".to_string(),
            fields: vec![
                field("url", "text", true, "Webhook URL", None),
                field("method", "text", true, "HTTP Method", Some("GET or POST.")),
                field(
                    "headers",
                    "textarea",
                    false,
                    "Headers (JSON)",
                    Some("A JSON object of key-value pairs for headers."),
                ),
                field(
                    "bodyTemplate",
                    "textarea",
                    false,
                    "Body Template (for POST)",
                    Some("Tera template with variables like {{ monitor_name }} and {{ status }}."),
                ),
            ],
        },
        ChannelTemplate {
            channel_type: ChannelType::Slack,
            name: "Slack".to_string(),
            fields: vec![
                field("webhookUrl", "password", true, "Incoming Webhook URL", None),
                field("channel", "text", false, "Channel", Some("Overrides the webhook's default channel.")),
                field("username", "text", false, "Username", None),
            ],
        },
    ];
    Json(templates)
}

async fn create_channel(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Json(payload): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, AppError> {
    let channel = channel_service::create_channel(
        &app_state.db,
        &app_state.encryption,
        authenticated_user.id,
        payload,
    )
    .await?;
    info!(channel_id = channel.id, channel_type = %channel.channel_type(), "Notification channel created.");
    Ok((StatusCode::CREATED, Json(ChannelResponse::from(channel))))
}

async fn get_all_channels(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<ChannelResponse>>, AppError> {
    let channels = channel_service::get_all_channels_for_user(
        &app_state.db,
        &app_state.encryption,
        authenticated_user.id,
    )
    .await?;
    Ok(Json(channels.into_iter().map(ChannelResponse::from).collect()))
}

async fn get_channel_by_id(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<Json<ChannelResponse>, AppError> {
    let channel = channel_service::get_channel_by_id(
        &app_state.db,
        &app_state.encryption,
        authenticated_user.id,
        id,
    )
    .await?;
    Ok(Json(channel.into()))
}

async fn update_channel(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateChannelRequest>,
) -> Result<Json<ChannelResponse>, AppError> {
    let updated_channel = channel_service::update_channel(
        &app_state.db,
        &app_state.encryption,
        authenticated_user.id,
        id,
        payload,
    )
    .await?;
    Ok(Json(updated_channel.into()))
}

async fn delete_channel(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    channel_service::delete_channel(&app_state.db, authenticated_user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn test_channel(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
    Json(payload): Json<TestChannelRequest>,
) -> Result<impl IntoResponse, AppError> {
    let channel = channel_service::get_channel_by_id(
        &app_state.db,
        &app_state.encryption,
        authenticated_user.id,
        id,
    )
    .await?;
    let message = payload
        .message
        .unwrap_or_else(|| DEFAULT_TEST_MESSAGE.to_string());
    app_state.notifier.send_test(&channel, &message).await?;

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({"message": "Test notification sent successfully."})),
    ))
}
