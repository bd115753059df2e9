pub mod autoclose;

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::models::{
    InternalNote, MessageRow, NewInternalNote, NewMessage, NewTicket, Ticket,
};
use crate::shared::schema::{internal_notes, messages, tickets};
use crate::shared::state::AppState;
use crate::shared::utils::{internal_err, not_found, ApiError};

pub const STATUS_NEW: &str = "new";
pub const STATUS_OPEN: &str = "open";
pub const STATUS_RESOLVED: &str = "resolved";
pub const STATUS_CLOSED: &str = "closed";

pub const PRIORITY_LOW: &str = "Low";
pub const PRIORITY_MEDIUM: &str = "Medium";
pub const PRIORITY_HIGH: &str = "High";

pub fn is_known_status(status: &str) -> bool {
    matches!(
        status,
        STATUS_NEW | STATUS_OPEN | STATUS_RESOLVED | STATUS_CLOSED
    )
}

pub fn is_known_priority(priority: &str) -> bool {
    matches!(priority, PRIORITY_LOW | PRIORITY_MEDIUM | PRIORITY_HIGH)
}

/// Ticket lifecycle is linear (new → open → resolved → closed); the only step
/// backwards is reopening a resolved ticket, which also cancels auto-close.
pub fn is_valid_transition(from: &str, to: &str) -> bool {
    matches!(
        (from, to),
        (STATUS_NEW, STATUS_OPEN)
            | (STATUS_OPEN, STATUS_RESOLVED)
            | (STATUS_RESOLVED, STATUS_CLOSED)
            | (STATUS_RESOLVED, STATUS_OPEN)
    )
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub company_id: Uuid,
    pub customer_id: Uuid,
    pub focus_area_id: Option<i64>,
    pub priority: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignTicketRequest {
    pub agent_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ChangePriorityRequest {
    pub priority: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateNoteRequest {
    pub human_agent_id: Uuid,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub company_id: Uuid,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub focus_area_id: Option<i64>,
    pub team_id: Option<i64>,
    pub assignee_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CompanyQuery {
    pub company_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct TicketStats {
    pub total_tickets: i64,
    pub new_tickets: i64,
    pub open_tickets: i64,
    pub resolved_tickets: i64,
    pub closed_tickets: i64,
    /// Tickets that arrived by email and are still awaiting a final close.
    pub open_email_threads: i64,
}

#[derive(Debug, Serialize)]
pub struct TicketWithMessages {
    pub ticket: Ticket,
    pub messages: Vec<MessageRow>,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route("/api/tickets/stats", get(get_ticket_stats))
        .route("/api/tickets/:id", get(get_ticket))
        .route("/api/tickets/:id/full", get(get_ticket_with_messages))
        .route("/api/tickets/:id/status", put(change_status))
        .route("/api/tickets/:id/assign", put(assign_ticket))
        .route("/api/tickets/:id/priority", put(change_priority))
        .route("/api/tickets/:id/notes", get(list_notes).post(add_note))
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTicketRequest>,
) -> Result<Json<Ticket>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;

    let priority = req.priority.unwrap_or_else(|| PRIORITY_MEDIUM.to_string());
    if !is_known_priority(&priority) {
        return Err((StatusCode::BAD_REQUEST, format!("unknown priority {priority}")));
    }
    let team_id = match req.focus_area_id {
        Some(id) => crate::companies::team_for_focus_area(&mut conn, id).map_err(internal_err)?,
        None => None,
    };

    let ticket = conn
        .transaction::<Ticket, diesel::result::Error, _>(|conn| {
            let ticket: Ticket = diesel::insert_into(tickets::table)
                .values(&NewTicket {
                    company_id: req.company_id,
                    customer_id: req.customer_id,
                    team_id,
                    focus_area_id: req.focus_area_id,
                    status: STATUS_NEW.to_string(),
                    priority,
                    email: None,
                    created_at: Utc::now(),
                })
                .get_result(conn)?;
            if let Some(ref content) = req.content {
                diesel::insert_into(messages::table)
                    .values(&NewMessage {
                        ticket_id: ticket.id,
                        sender_id: req.customer_id,
                        content: content.clone(),
                        message_type: "user".to_string(),
                        email_message_id: None,
                        email_references: None,
                        created_at: Utc::now(),
                    })
                    .execute(conn)?;
            }
            Ok(ticket)
        })
        .map_err(internal_err)?;

    Ok(Json(ticket))
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Ticket>>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;

    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);

    let mut q = tickets::table
        .filter(tickets::company_id.eq(query.company_id))
        .into_boxed();
    if let Some(status) = query.status {
        q = q.filter(tickets::status.eq(status));
    }
    if let Some(priority) = query.priority {
        q = q.filter(tickets::priority.eq(priority));
    }
    if let Some(focus_area_id) = query.focus_area_id {
        q = q.filter(tickets::focus_area_id.eq(focus_area_id));
    }
    if let Some(team_id) = query.team_id {
        q = q.filter(tickets::team_id.eq(team_id));
    }
    if let Some(assignee_id) = query.assignee_id {
        q = q.filter(tickets::human_agent_id.eq(assignee_id));
    }
    if let Some(customer_id) = query.customer_id {
        q = q.filter(tickets::customer_id.eq(customer_id));
    }

    let rows: Vec<Ticket> = q
        .order(tickets::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(rows))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Ticket>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;
    let ticket: Ticket = tickets::table
        .filter(tickets::id.eq(id))
        .first(&mut conn)
        .map_err(|_| not_found("Ticket"))?;
    Ok(Json(ticket))
}

pub async fn get_ticket_with_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<TicketWithMessages>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;
    let ticket: Ticket = tickets::table
        .filter(tickets::id.eq(id))
        .first(&mut conn)
        .map_err(|_| not_found("Ticket"))?;
    let rows: Vec<MessageRow> = messages::table
        .filter(messages::ticket_id.eq(id))
        .order(messages::created_at.asc())
        .load(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(TicketWithMessages {
        ticket,
        messages: rows,
    }))
}

pub async fn change_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<ChangeStatusRequest>,
) -> Result<Json<Ticket>, ApiError> {
    if !is_known_status(&req.status) {
        return Err((StatusCode::BAD_REQUEST, format!("unknown status {}", req.status)));
    }
    let mut conn = state.conn.get().map_err(internal_err)?;
    let ticket: Ticket = tickets::table
        .filter(tickets::id.eq(id))
        .first(&mut conn)
        .map_err(|_| not_found("Ticket"))?;
    if !is_valid_transition(&ticket.status, &req.status) {
        return Err((
            StatusCode::CONFLICT,
            format!("cannot move ticket from {} to {}", ticket.status, req.status),
        ));
    }

    let now = Utc::now();
    let resolved_at = match req.status.as_str() {
        STATUS_RESOLVED => Some(now),
        STATUS_OPEN => None,
        _ => ticket.resolved_at,
    };
    let closed_at = match req.status.as_str() {
        STATUS_CLOSED => Some(now),
        _ => ticket.closed_at,
    };

    let updated: Ticket = diesel::update(tickets::table.filter(tickets::id.eq(id)))
        .set((
            tickets::status.eq(&req.status),
            tickets::resolved_at.eq(resolved_at),
            tickets::closed_at.eq(closed_at),
        ))
        .get_result(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(updated))
}

pub async fn assign_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<AssignTicketRequest>,
) -> Result<Json<Ticket>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;
    let ticket: Ticket = tickets::table
        .filter(tickets::id.eq(id))
        .first(&mut conn)
        .map_err(|_| not_found("Ticket"))?;

    // Picking up a fresh ticket is the new → open step.
    let status = if ticket.status == STATUS_NEW {
        STATUS_OPEN.to_string()
    } else {
        ticket.status.clone()
    };
    let updated: Ticket = diesel::update(tickets::table.filter(tickets::id.eq(id)))
        .set((
            tickets::human_agent_id.eq(Some(req.agent_id)),
            tickets::status.eq(status),
        ))
        .get_result(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(updated))
}

pub async fn change_priority(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<ChangePriorityRequest>,
) -> Result<Json<Ticket>, ApiError> {
    if !is_known_priority(&req.priority) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("unknown priority {}", req.priority),
        ));
    }
    let mut conn = state.conn.get().map_err(internal_err)?;
    let updated: Ticket = diesel::update(tickets::table.filter(tickets::id.eq(id)))
        .set(tickets::priority.eq(&req.priority))
        .get_result(&mut conn)
        .map_err(|_| not_found("Ticket"))?;
    Ok(Json(updated))
}

pub async fn list_notes(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<i64>,
) -> Result<Json<Vec<InternalNote>>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;
    let notes: Vec<InternalNote> = internal_notes::table
        .filter(internal_notes::ticket_id.eq(ticket_id))
        .order(internal_notes::created_at.asc())
        .load(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(notes))
}

pub async fn add_note(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<i64>,
    Json(req): Json<CreateNoteRequest>,
) -> Result<Json<InternalNote>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;
    let note: InternalNote = diesel::insert_into(internal_notes::table)
        .values(&NewInternalNote {
            ticket_id,
            human_agent_id: req.human_agent_id,
            content: req.content,
            created_at: Utc::now(),
        })
        .get_result(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(note))
}

pub async fn get_ticket_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CompanyQuery>,
) -> Result<Json<TicketStats>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;

    let count_status = |conn: &mut PgConnection, status: &str| -> Result<i64, ApiError> {
        tickets::table
            .filter(tickets::company_id.eq(query.company_id))
            .filter(tickets::status.eq(status))
            .count()
            .get_result(conn)
            .map_err(internal_err)
    };

    let total_tickets: i64 = tickets::table
        .filter(tickets::company_id.eq(query.company_id))
        .count()
        .get_result(&mut conn)
        .map_err(internal_err)?;
    let open_email_threads: i64 = tickets::table
        .filter(tickets::company_id.eq(query.company_id))
        .filter(tickets::email.is_not_null())
        .filter(tickets::status.ne(STATUS_CLOSED))
        .count()
        .get_result(&mut conn)
        .map_err(internal_err)?;

    Ok(Json(TicketStats {
        total_tickets,
        new_tickets: count_status(&mut conn, STATUS_NEW)?,
        open_tickets: count_status(&mut conn, STATUS_OPEN)?,
        resolved_tickets: count_status(&mut conn, STATUS_RESOLVED)?,
        closed_tickets: count_status(&mut conn, STATUS_CLOSED)?,
        open_email_threads,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_is_linear() {
        assert!(is_valid_transition(STATUS_NEW, STATUS_OPEN));
        assert!(is_valid_transition(STATUS_OPEN, STATUS_RESOLVED));
        assert!(is_valid_transition(STATUS_RESOLVED, STATUS_CLOSED));
    }

    #[test]
    fn reopening_is_the_only_backwards_step() {
        assert!(is_valid_transition(STATUS_RESOLVED, STATUS_OPEN));
        assert!(!is_valid_transition(STATUS_CLOSED, STATUS_OPEN));
        assert!(!is_valid_transition(STATUS_OPEN, STATUS_NEW));
    }

    #[test]
    fn skipping_states_is_rejected() {
        assert!(!is_valid_transition(STATUS_NEW, STATUS_RESOLVED));
        assert!(!is_valid_transition(STATUS_NEW, STATUS_CLOSED));
        assert!(!is_valid_transition(STATUS_OPEN, STATUS_CLOSED));
    }

    #[test]
    fn self_transitions_are_rejected() {
        for s in [STATUS_NEW, STATUS_OPEN, STATUS_RESOLVED, STATUS_CLOSED] {
            assert!(!is_valid_transition(s, s));
        }
    }

    #[test]
    fn known_status_and_priority_sets() {
        assert!(is_known_status("resolved"));
        assert!(!is_known_status("pending"));
        assert!(is_known_priority("High"));
        assert!(!is_known_priority("urgent"));
    }
}
