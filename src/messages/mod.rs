use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::email::outbound::{build_threaded_reply, OutboundEmail};
use crate::shared::models::{Company, MessageRow, NewMessage, Profile, Ticket};
use crate::shared::schema::{companies, messages, profiles, tickets};
use crate::shared::state::AppState;
use crate::shared::utils::{bad_request, internal_err, not_found, ApiError};
use crate::tickets::{STATUS_NEW, STATUS_OPEN};

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub sender_id: Uuid,
    pub content: String,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route(
        "/api/tickets/:id/messages",
        get(list_messages).post(post_message),
    )
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<i64>,
) -> Result<Json<Vec<MessageRow>>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;
    let rows: Vec<MessageRow> = messages::table
        .filter(messages::ticket_id.eq(ticket_id))
        .order(messages::created_at.asc())
        .load(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(rows))
}

/// Appends a message to a ticket thread. Agent replies on email-originated
/// tickets also go out over SMTP with full threading headers, and the stored
/// row keeps the ids that were actually sent.
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<i64>,
    Json(req): Json<PostMessageRequest>,
) -> Result<Json<MessageRow>, ApiError> {
    if req.content.trim().is_empty() {
        return Err(bad_request("message content must not be empty"));
    }
    let mut conn = state.conn.get().map_err(internal_err)?;

    let ticket: Ticket = tickets::table
        .filter(tickets::id.eq(ticket_id))
        .first(&mut conn)
        .optional()
        .map_err(internal_err)?
        .ok_or_else(|| not_found("Ticket"))?;
    let sender: Profile = profiles::table
        .filter(profiles::id.eq(req.sender_id))
        .first(&mut conn)
        .optional()
        .map_err(internal_err)?
        .ok_or_else(|| not_found("Sender profile"))?;
    if sender.company_id != Some(ticket.company_id) {
        return Err(bad_request("sender does not belong to this ticket's company"));
    }

    let is_agent = sender.role == "human_agent";
    let mut row: MessageRow = diesel::insert_into(messages::table)
        .values(&NewMessage {
            ticket_id,
            sender_id: sender.id,
            content: req.content.clone(),
            message_type: "user".to_string(),
            email_message_id: None,
            email_references: None,
            created_at: Utc::now(),
        })
        .get_result(&mut conn)
        .map_err(internal_err)?;

    // First agent touch moves the ticket out of the inbox.
    if is_agent && ticket.status == STATUS_NEW {
        diesel::update(
            tickets::table
                .filter(tickets::id.eq(ticket_id))
                .filter(tickets::status.eq(STATUS_NEW)),
        )
        .set(tickets::status.eq(STATUS_OPEN))
        .execute(&mut conn)
        .map_err(internal_err)?;
    }

    if is_agent {
        if let Some(customer_email) = ticket.email.clone() {
            match send_threaded_reply(&state, &mut conn, &ticket, &customer_email, &row).await {
                Ok(Some(updated)) => row = updated,
                Ok(None) => {}
                Err(e) => error!(ticket_id, "failed to send reply email: {e:?}"),
            }
        }
    }

    Ok(Json(row))
}

/// Sends the agent's message to the customer as an email threaded into the
/// original conversation. Returns the updated row, or None when the ticket
/// has no email history to thread into.
async fn send_threaded_reply(
    state: &AppState,
    conn: &mut PgConnection,
    ticket: &Ticket,
    customer_email: &str,
    row: &MessageRow,
) -> Result<Option<MessageRow>, ApiError> {
    // The most recent id in the thread is what we reply to; every id that
    // ever appeared becomes part of References.
    let threaded: Vec<MessageRow> = messages::table
        .filter(messages::ticket_id.eq(ticket.id))
        .filter(messages::email_message_id.is_not_null())
        .order(messages::created_at.asc())
        .load(conn)
        .map_err(internal_err)?;
    let Some(last) = threaded.last() else {
        return Ok(None);
    };
    let in_reply_to = last.email_message_id.clone();

    let mut prior: Vec<String> = Vec::new();
    for m in &threaded {
        if let Some(ref refs) = m.email_references {
            prior.extend(refs.iter().cloned());
        }
        if let Some(ref id) = m.email_message_id {
            prior.push(id.clone());
        }
    }

    let company: Company = companies::table
        .filter(companies::id.eq(ticket.company_id))
        .first(conn)
        .map_err(internal_err)?;

    let (message_id, references) = build_threaded_reply(
        in_reply_to.as_deref(),
        &prior,
        &state.config.smtp.message_id_domain,
    );

    let email = OutboundEmail {
        from: format!("{} <{}>", company.name, company.email),
        to: customer_email.to_string(),
        subject: reply_subject(&threaded, ticket.id),
        content: row.content.clone(),
        message_id: message_id.clone(),
        in_reply_to,
        references: references.clone(),
    };
    state.mailer.send(&email).await.map_err(internal_err)?;
    info!(ticket_id = ticket.id, message_id, "sent threaded reply email");

    let updated: MessageRow = diesel::update(messages::table.filter(messages::id.eq(row.id)))
        .set((
            messages::email_message_id.eq(Some(message_id)),
            messages::email_references.eq(Some(references)),
        ))
        .get_result(conn)
        .map_err(internal_err)?;
    Ok(Some(updated))
}

/// Reuses the subject the customer wrote when the opening message carried
/// one, otherwise falls back to the ticket number.
fn reply_subject(threaded: &[MessageRow], ticket_id: i64) -> String {
    if let Some(first) = threaded.first() {
        if let Some(rest) = first.content.strip_prefix("Subject: ") {
            if let Some(line) = rest.lines().next() {
                let line = line.trim();
                if !line.is_empty() {
                    return format!("Re: {line}");
                }
            }
        }
    }
    format!("Re: Ticket #{ticket_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, content: &str) -> MessageRow {
        MessageRow {
            id,
            ticket_id: 1,
            sender_id: Uuid::new_v4(),
            content: content.to_string(),
            message_type: "user".to_string(),
            email_message_id: Some(format!("m{id}@mail.test")),
            email_references: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn reply_subject_reuses_original_subject() {
        let thread = vec![row(1, "Subject: Printer on fire\n\nHelp!")];
        assert_eq!(reply_subject(&thread, 9), "Re: Printer on fire");
    }

    #[test]
    fn reply_subject_falls_back_to_ticket_number() {
        let thread = vec![row(1, "no subject line here")];
        assert_eq!(reply_subject(&thread, 9), "Re: Ticket #9");
        assert_eq!(reply_subject(&[], 12), "Re: Ticket #12");
    }
}
