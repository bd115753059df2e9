pub mod outbound;
pub mod threading;

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::llm::classify_focus_area;
use crate::shared::models::{Company, NewMessage, NewProcessedEmail, NewTicket, Profile, Ticket};
use crate::shared::schema::{companies, focus_areas, messages, processed_emails, profiles, tickets};
use crate::shared::state::AppState;
use crate::tickets::{PRIORITY_MEDIUM, STATUS_NEW};
use threading::{
    parse_envelope_recipient, parse_from_field, parse_thread_headers, strip_quoted_reply,
    ThreadHeaders,
};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("no email content provided")]
    MissingContent,
    #[error("missing From header")]
    MissingFrom,
    #[error("invalid sender address: {0}")]
    InvalidAddress(String),
    #[error("no recipient email found")]
    MissingRecipient,
    #[error("no company found for recipient {0}")]
    UnknownRecipient(String),
    #[error("no Message-ID found in headers")]
    MissingMessageId,
    #[error("database error: {0}")]
    Db(#[from] diesel::result::Error),
    #[error("database connection error: {0}")]
    Pool(String),
}

impl IngestError {
    fn status(&self) -> StatusCode {
        match self {
            IngestError::Db(_) | IngestError::Pool(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IngestError::UnknownRecipient(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// What to do with a delivery once the thread lookup and dedup check ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Duplicate,
    Reply(i64),
    NewTicket,
}

/// Ids worth matching against stored messages: In-Reply-To first, then every
/// References entry.
pub fn thread_search_ids(headers: &ThreadHeaders) -> Vec<String> {
    let mut ids: Vec<String> = headers.in_reply_to.iter().cloned().collect();
    ids.extend(headers.references.iter().cloned());
    ids
}

/// The dedup ledger wins: a re-delivery changes nothing even when the thread
/// lookup found a ticket.
pub fn classify_delivery(first_delivery: bool, existing_ticket: Option<i64>) -> Disposition {
    if !first_delivery {
        return Disposition::Duplicate;
    }
    match existing_ticket {
        Some(id) => Disposition::Reply(id),
        None => Disposition::NewTicket,
    }
}

/// Inbound webhook payload: the multipart fields a parse-and-forward mail
/// provider posts for each received email.
#[derive(Debug, Default, Clone)]
pub struct InboundEmail {
    pub from: Option<String>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub headers: Option<String>,
    pub envelope: Option<String>,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/api/inbound-mail", post(inbound_mail))
}

async fn inbound_mail(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, (StatusCode, String)> {
    let mut payload = InboundEmail::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("bad multipart: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = field
            .text()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("bad multipart: {e}")))?;
        match name.as_str() {
            "from" => payload.from = Some(value),
            "subject" => payload.subject = Some(value),
            "text" => payload.text = Some(value),
            "html" => payload.html = Some(value),
            "headers" => payload.headers = Some(value),
            "envelope" => payload.envelope = Some(value),
            _ => {}
        }
    }

    match ingest(&state, payload).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            warn!("inbound email rejected: {e}");
            Err((e.status(), e.to_string()))
        }
    }
}

/// Full ingestion pipeline: parse, resolve tenant, dedup, then append to an
/// existing thread or open a new ticket.
pub async fn ingest(state: &AppState, payload: InboundEmail) -> Result<Value, IngestError> {
    let text = payload.text.as_deref().filter(|t| !t.trim().is_empty());
    let html = payload.html.as_deref().filter(|t| !t.trim().is_empty());
    let content = text.or(html).ok_or(IngestError::MissingContent)?;

    let from = payload.from.as_deref().ok_or(IngestError::MissingFrom)?;
    let sender = parse_from_field(from);
    if !sender.email.contains('@') {
        return Err(IngestError::InvalidAddress(sender.email));
    }

    let to_email = payload
        .envelope
        .as_deref()
        .and_then(parse_envelope_recipient)
        .ok_or(IngestError::MissingRecipient)?;

    let headers = parse_thread_headers(payload.headers.as_deref().unwrap_or(""));
    // Without a Message-Id the dedup ledger cannot vouch for this email.
    let message_id = headers.message_id.clone().ok_or(IngestError::MissingMessageId)?;

    let mut conn = state
        .conn
        .get()
        .map_err(|e| IngestError::Pool(e.to_string()))?;

    let company: Company = companies::table
        .filter(companies::email.eq(&to_email))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| IngestError::UnknownRecipient(to_email.clone()))?;

    // Thread lookup is a pure read; the dedup check below still runs before
    // any write.
    let search_ids = thread_search_ids(&headers);
    let existing_ticket_id: Option<i64> = if search_ids.is_empty() {
        None
    } else {
        messages::table
            .inner_join(tickets::table)
            .filter(tickets::company_id.eq(company.id))
            .filter(messages::email_message_id.eq_any(&search_ids))
            .order(messages::created_at.asc())
            .select(messages::ticket_id)
            .first(&mut conn)
            .optional()?
    };

    let first_delivery = check_and_record_email(&mut conn, company.id, &message_id)?;
    let disposition = classify_delivery(first_delivery, existing_ticket_id);

    if disposition == Disposition::Duplicate {
        info!(
            message_id,
            company = %company.id,
            "duplicate inbound email skipped"
        );
        return Ok(json!({"status": "skipped", "reason": "duplicate"}));
    }

    let customer = find_or_create_customer(&mut conn, &company, &sender.email, &sender.display_name)?;

    if let Disposition::Reply(ticket_id) = disposition {
        let cleaned = strip_quoted_reply(content);
        let cleaned = if cleaned.is_empty() {
            "No content provided".to_string()
        } else {
            cleaned
        };
        diesel::insert_into(messages::table)
            .values(&NewMessage {
                ticket_id,
                sender_id: customer.id,
                content: cleaned,
                message_type: "user".to_string(),
                email_message_id: Some(message_id),
                email_references: Some(headers.references.clone()),
                created_at: Utc::now(),
            })
            .execute(&mut conn)?;
        info!(ticket_id, "appended email reply to existing ticket");
        return Ok(json!({"success": true, "ticket_id": ticket_id, "is_reply": true}));
    }

    let area_names: Vec<String> = focus_areas::table
        .filter(focus_areas::company_id.eq(company.id))
        .select(focus_areas::name)
        .load(&mut conn)?;
    // The model call can take seconds; give the pooled connection back first.
    drop(conn);
    let subject = payload.subject.as_deref().unwrap_or("");
    let chosen = classify_focus_area(state.llm.as_ref(), subject, content, &area_names).await;

    let mut conn = state
        .conn
        .get()
        .map_err(|e| IngestError::Pool(e.to_string()))?;
    let focus_area_id: Option<i64> = match chosen {
        Some(ref name) => focus_areas::table
            .filter(focus_areas::company_id.eq(company.id))
            .filter(focus_areas::name.eq(name))
            .select(focus_areas::id)
            .first(&mut conn)
            .optional()?,
        None => None,
    };
    let team_id = match focus_area_id {
        Some(id) => crate::companies::team_for_focus_area(&mut conn, id)?,
        None => None,
    };

    let first_message = match subject.is_empty() {
        true => content.to_string(),
        false => format!("Subject: {subject}\n\n{content}"),
    };

    let ticket = conn.transaction::<Ticket, diesel::result::Error, _>(|conn| {
        let ticket: Ticket = diesel::insert_into(tickets::table)
            .values(&NewTicket {
                company_id: company.id,
                customer_id: customer.id,
                team_id,
                focus_area_id,
                status: STATUS_NEW.to_string(),
                priority: PRIORITY_MEDIUM.to_string(),
                email: Some(sender.email.clone()),
                created_at: Utc::now(),
            })
            .get_result(conn)?;
        diesel::insert_into(messages::table)
            .values(&NewMessage {
                ticket_id: ticket.id,
                sender_id: customer.id,
                content: first_message,
                message_type: "user".to_string(),
                email_message_id: Some(message_id),
                email_references: Some(headers.references.clone()),
                created_at: Utc::now(),
            })
            .execute(conn)?;
        Ok(ticket)
    })?;

    info!(ticket_id = ticket.id, focus_area = ?chosen, "opened ticket from inbound email");
    Ok(json!({"success": true, "ticket_id": ticket.id, "is_reply": false}))
}

/// At-most-once guard: records (company, message-id) and reports whether this
/// delivery was the first one.
pub fn check_and_record_email(
    conn: &mut PgConnection,
    company_id: Uuid,
    message_id: &str,
) -> Result<bool, diesel::result::Error> {
    let inserted = diesel::insert_into(processed_emails::table)
        .values(&NewProcessedEmail {
            company_id,
            message_id: message_id.to_string(),
            processed_at: Utc::now(),
        })
        .on_conflict_do_nothing()
        .execute(conn)?;
    Ok(inserted == 1)
}

fn find_or_create_customer(
    conn: &mut PgConnection,
    company: &Company,
    email: &str,
    full_name: &str,
) -> Result<Profile, diesel::result::Error> {
    let existing: Option<Profile> = profiles::table
        .filter(profiles::email.eq(email))
        .filter(profiles::company_id.eq(company.id))
        .first(conn)
        .optional()?;
    if let Some(profile) = existing {
        return Ok(profile);
    }
    let profile = Profile {
        id: Uuid::new_v4(),
        company_id: Some(company.id),
        email: Some(email.to_string()),
        full_name: Some(full_name.to_string()),
        role: "customer".to_string(),
        team_id: None,
        last_seen: None,
    };
    diesel::insert_into(profiles::table)
        .values(&profile)
        .execute(conn)?;
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redelivered_email_never_acts_again() {
        // Once the ledger says "seen", nothing is appended or created, even
        // when the thread lookup still matches a ticket.
        assert_eq!(classify_delivery(false, Some(7)), Disposition::Duplicate);
        assert_eq!(classify_delivery(false, None), Disposition::Duplicate);
    }

    #[test]
    fn matching_thread_id_appends_instead_of_creating() {
        assert_eq!(classify_delivery(true, Some(7)), Disposition::Reply(7));
    }

    #[test]
    fn first_delivery_without_a_thread_opens_a_ticket() {
        assert_eq!(classify_delivery(true, None), Disposition::NewTicket);
    }

    #[test]
    fn search_ids_cover_in_reply_to_and_references() {
        let headers = ThreadHeaders {
            message_id: Some("new@mail.test".to_string()),
            in_reply_to: Some("prev@mail.test".to_string()),
            references: vec!["root@mail.test".to_string(), "prev@mail.test".to_string()],
        };
        assert_eq!(
            thread_search_ids(&headers),
            vec!["prev@mail.test", "root@mail.test", "prev@mail.test"]
        );

        let bare = ThreadHeaders {
            message_id: Some("new@mail.test".to_string()),
            ..ThreadHeaders::default()
        };
        assert!(thread_search_ids(&bare).is_empty());
    }
}
