//! Intake routes, one per channel.
//!
//! Every route persists the request as pending deliveries and schedules them;
//! the response carries the identifiers to follow them with the status routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::request::{
    DigitalInvoiceRequest, EmailRequest, MessageRequest, Request, SlackRequest, SmsRequest,
    SnailMailRequest, WebMessageRequest,
};
use herald_engine::intake::{BatchReceipt, DigitalMailBatchRequest, LetterBatchRequest, Receipt};

use crate::middleware::attribution::Attributed;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{municipality}/send/sms", post(send_sms))
        .route("/{municipality}/send/email", post(send_email))
        .route("/{municipality}/send/webmessage", post(send_web_message))
        .route("/{municipality}/send/digital-invoice", post(send_digital_invoice))
        .route("/{municipality}/send/slack", post(send_slack))
        .route("/{municipality}/send/snail-mail", post(send_snail_mail))
        .route("/{municipality}/send/message", post(send_message))
        .route("/{municipality}/send/messages", post(send_messages))
        .route("/{municipality}/send/digital-mail", post(send_digital_mail))
        .route("/{municipality}/send/letter", post(send_letter))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchQuery {
    pub batch_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesBody {
    pub messages: Vec<MessageRequest>,
}

type Created<T> = Result<(StatusCode, Json<T>), AppError>;

fn require(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} must not be blank", field)));
    }
    Ok(())
}

async fn accept(
    state: &AppState,
    municipality: &str,
    request: Request,
    batch_id: Option<Uuid>,
    attributed: Attributed,
) -> Created<Receipt> {
    let receipt = state
        .intake
        .create_delivery(municipality, request, batch_id, &attributed.0)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /:municipality/send/sms
async fn send_sms(
    State(state): State<AppState>,
    Path(municipality): Path<String>,
    attributed: Attributed,
    Json(sms): Json<SmsRequest>,
) -> Created<Receipt> {
    require(&sms.mobile_number, "mobileNumber")?;
    require(&sms.message, "message")?;
    accept(&state, &municipality, Request::Sms(sms), None, attributed).await
}

/// POST /:municipality/send/email
async fn send_email(
    State(state): State<AppState>,
    Path(municipality): Path<String>,
    attributed: Attributed,
    Json(email): Json<EmailRequest>,
) -> Created<Receipt> {
    if !email.email_address.contains('@') {
        return Err(AppError::Validation("emailAddress is not an email address".to_string()));
    }
    accept(&state, &municipality, Request::Email(email), None, attributed).await
}

/// POST /:municipality/send/webmessage
async fn send_web_message(
    State(state): State<AppState>,
    Path(municipality): Path<String>,
    attributed: Attributed,
    Json(message): Json<WebMessageRequest>,
) -> Created<Receipt> {
    require(&message.message, "message")?;
    accept(&state, &municipality, Request::WebMessage(message), None, attributed).await
}

/// POST /:municipality/send/digital-invoice
async fn send_digital_invoice(
    State(state): State<AppState>,
    Path(municipality): Path<String>,
    attributed: Attributed,
    Json(invoice): Json<DigitalInvoiceRequest>,
) -> Created<Receipt> {
    if invoice.files.is_empty() {
        return Err(AppError::Validation("An invoice needs at least one file".to_string()));
    }
    accept(&state, &municipality, Request::DigitalInvoice(invoice), None, attributed).await
}

/// POST /:municipality/send/slack
async fn send_slack(
    State(state): State<AppState>,
    Path(municipality): Path<String>,
    attributed: Attributed,
    Json(slack): Json<SlackRequest>,
) -> Created<Receipt> {
    require(&slack.token, "token")?;
    require(&slack.channel, "channel")?;
    accept(&state, &municipality, Request::Slack(slack), None, attributed).await
}

/// POST /:municipality/send/snail-mail?batchId=
async fn send_snail_mail(
    State(state): State<AppState>,
    Path(municipality): Path<String>,
    Query(query): Query<BatchQuery>,
    attributed: Attributed,
    Json(mail): Json<SnailMailRequest>,
) -> Created<Receipt> {
    if mail.party_id.is_none() && mail.address.is_none() {
        return Err(AppError::Validation(
            "Snail mail needs a partyId or an address".to_string(),
        ));
    }
    accept(&state, &municipality, Request::SnailMail(mail), query.batch_id, attributed).await
}

/// POST /:municipality/send/message
async fn send_message(
    State(state): State<AppState>,
    Path(municipality): Path<String>,
    attributed: Attributed,
    Json(message): Json<MessageRequest>,
) -> Created<Receipt> {
    require(&message.message, "message")?;
    accept(&state, &municipality, Request::Message(message), None, attributed).await
}

/// POST /:municipality/send/messages
async fn send_messages(
    State(state): State<AppState>,
    Path(municipality): Path<String>,
    attributed: Attributed,
    Json(body): Json<MessagesBody>,
) -> Created<BatchReceipt> {
    for message in &body.messages {
        require(&message.message, "message")?;
    }
    let receipt = state
        .intake
        .create_messages(&municipality, body.messages, &attributed.0)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /:municipality/send/digital-mail
async fn send_digital_mail(
    State(state): State<AppState>,
    Path(municipality): Path<String>,
    attributed: Attributed,
    Json(mail): Json<DigitalMailBatchRequest>,
) -> Created<BatchReceipt> {
    let receipt = state
        .intake
        .create_digital_mail(&municipality, mail, &attributed.0)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /:municipality/send/letter
async fn send_letter(
    State(state): State<AppState>,
    Path(municipality): Path<String>,
    attributed: Attributed,
    Json(letter): Json<LetterBatchRequest>,
) -> Created<BatchReceipt> {
    if letter.attachments.is_empty() {
        return Err(AppError::Validation("A letter needs at least one attachment".to_string()));
    }
    let receipt = state
        .intake
        .create_letter(&municipality, letter, &attributed.0)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}
