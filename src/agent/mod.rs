use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::llm::{ChatMessage, ToolCall, ToolSpec};
use crate::shared::models::{
    FieldDefinition, FocusArea, NewMessage, NewTicket, Profile, Ticket, TicketField,
};
use crate::shared::schema::{field_definitions, focus_areas, messages, profiles, ticket_fields, tickets};
use crate::shared::state::AppState;
use crate::shared::utils::{bad_request, internal_err, not_found, ApiError};
use crate::tickets::{PRIORITY_MEDIUM, STATUS_NEW};

/// Upper bound on model round-trips per request. The model normally needs one
/// or two tool rounds; anything past this is a runaway conversation.
const MAX_TOOL_ROUNDS: usize = 8;

/// A draft untouched this long is abandoned and gets evicted.
const SESSION_TTL_MINUTES: i64 = 60;

const REAPER_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);

/// The model's choice of focus area for the ticket being drafted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FocusSelection {
    #[default]
    Unset,
    Other,
    Area(i64, String),
}

/// Draft ticket state for one intake conversation. Each browser session gets
/// its own draft; concurrent customers never see each other's answers.
#[derive(Debug, Clone)]
pub struct IntakeSession {
    pub company_id: Uuid,
    pub customer_id: Uuid,
    pub form: HashMap<String, String>,
    pub focus: FocusSelection,
    pub last_active: chrono::DateTime<Utc>,
}

impl IntakeSession {
    pub fn new(company_id: Uuid, customer_id: Uuid) -> Self {
        Self {
            company_id,
            customer_id,
            form: HashMap::new(),
            focus: FocusSelection::Unset,
            last_active: Utc::now(),
        }
    }
}

/// Drops sessions whose last activity is older than the TTL.
pub fn prune_expired(sessions: &mut HashMap<Uuid, IntakeSession>, now: chrono::DateTime<Utc>) {
    let ttl = chrono::Duration::minutes(SESSION_TTL_MINUTES);
    sessions.retain(|_, s| now - s.last_active < ttl);
}

/// Periodic eviction of abandoned drafts, spawned at startup.
pub async fn run_session_reaper(state: Arc<AppState>) {
    loop {
        tokio::time::sleep(REAPER_INTERVAL).await;
        let mut sessions = state.intake_sessions.lock().await;
        let before = sessions.len();
        prune_expired(&mut sessions, Utc::now());
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, "evicted abandoned intake sessions");
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IntakeRequest {
    pub session_id: Option<Uuid>,
    pub customer_id: Uuid,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub struct IntakeResponse {
    pub session_id: Uuid,
    pub messages: Vec<ChatMessage>,
    pub ticket_id: Option<i64>,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/api/ticket-agent", post(ticket_agent))
}

/// Conversational ticket intake: the model fills the company's form through
/// tool calls and submits when everything required is in place.
pub async fn ticket_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IntakeRequest>,
) -> Result<Json<IntakeResponse>, ApiError> {
    // The pooled connection is scoped to the lookups; it must not sit idle
    // through the model round-trips below.
    let (customer, company_id, fields, areas) = {
        let mut conn = state.conn.get().map_err(internal_err)?;
        let customer: Profile = profiles::table
            .filter(profiles::id.eq(req.customer_id))
            .first(&mut conn)
            .optional()
            .map_err(internal_err)?
            .ok_or_else(|| not_found("Customer profile"))?;
        let company_id = customer
            .company_id
            .ok_or_else(|| bad_request("customer has no company"))?;

        let fields: Vec<FieldDefinition> = field_definitions::table
            .filter(field_definitions::company_id.eq(company_id))
            .order(field_definitions::display_order.asc())
            .load(&mut conn)
            .map_err(internal_err)?;
        let areas: Vec<FocusArea> = focus_areas::table
            .filter(focus_areas::company_id.eq(company_id))
            .order(focus_areas::id.asc())
            .load(&mut conn)
            .map_err(internal_err)?;
        (customer, company_id, fields, areas)
    };

    let session_id = req.session_id.unwrap_or_else(Uuid::new_v4);
    let mut session = {
        let sessions = state.intake_sessions.lock().await;
        sessions
            .get(&session_id)
            .cloned()
            .unwrap_or_else(|| IntakeSession::new(company_id, customer.id))
    };
    if session.company_id != company_id || session.customer_id != customer.id {
        return Err(bad_request("session belongs to another customer"));
    }

    let mut transcript = Vec::with_capacity(req.messages.len() + 1);
    transcript.push(ChatMessage::system(system_prompt(&fields, &areas, &session)));
    transcript.extend(req.messages);

    let tools = tool_specs();
    let mut new_messages: Vec<ChatMessage> = Vec::new();
    let mut ticket_id: Option<i64> = None;

    for round in 0..MAX_TOOL_ROUNDS {
        let turn = state
            .llm
            .chat(&transcript, &tools)
            .await
            .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;

        if turn.tool_calls.is_empty() {
            let reply = ChatMessage::assistant(turn.content);
            transcript.push(reply.clone());
            new_messages.push(reply);
            break;
        }

        let assistant = ChatMessage {
            role: "assistant".to_string(),
            content: turn.content,
            tool_call_id: None,
            tool_calls: Some(turn.tool_calls.clone()),
        };
        transcript.push(assistant.clone());
        new_messages.push(assistant);

        for call in &turn.tool_calls {
            let outcome = apply_tool(&state, &fields, &areas, &mut session, call);
            let result = match outcome {
                Ok(ToolOutcome::Ok(text)) => text,
                Ok(ToolOutcome::Submitted(id)) => {
                    ticket_id = Some(id);
                    format!("Ticket #{id} created successfully.")
                }
                Err(e) => {
                    warn!(tool = %call.name, "intake tool failed: {e}");
                    format!("Error: {e}")
                }
            };
            let reply = ChatMessage::tool_result(call.id.clone(), result);
            transcript.push(reply.clone());
            new_messages.push(reply);
        }

        if round == MAX_TOOL_ROUNDS - 1 {
            let reply = ChatMessage::assistant(
                "I ran into trouble processing that. Could you rephrase your request?",
            );
            transcript.push(reply.clone());
            new_messages.push(reply);
        }
    }

    {
        let mut sessions = state.intake_sessions.lock().await;
        if ticket_id.is_some() {
            sessions.remove(&session_id);
        } else {
            session.last_active = Utc::now();
            sessions.insert(session_id, session);
        }
    }

    Ok(Json(IntakeResponse {
        session_id,
        messages: new_messages,
        ticket_id,
    }))
}

enum ToolOutcome {
    Ok(String),
    Submitted(i64),
}

fn apply_tool(
    state: &AppState,
    fields: &[FieldDefinition],
    areas: &[FocusArea],
    session: &mut IntakeSession,
    call: &ToolCall,
) -> Result<ToolOutcome, String> {
    match call.name.as_str() {
        "updateField" => update_field_tool(fields, session, &call.arguments).map(ToolOutcome::Ok),
        "setFocusArea" => set_focus_tool(areas, session, &call.arguments).map(ToolOutcome::Ok),
        "submitTicket" => {
            validate_submission(fields, session)?;
            let mut conn = state.conn.get().map_err(|e| e.to_string())?;
            let ticket = persist_draft(&mut conn, session).map_err(|e| e.to_string())?;
            session.form.clear();
            session.focus = FocusSelection::Unset;
            info!(ticket_id = ticket.id, "intake agent created ticket");
            Ok(ToolOutcome::Submitted(ticket.id))
        }
        other => Err(format!("unknown tool '{other}'")),
    }
}

fn update_field_tool(
    fields: &[FieldDefinition],
    session: &mut IntakeSession,
    arguments: &serde_json::Value,
) -> Result<String, String> {
    let name = arguments["field"]
        .as_str()
        .ok_or("updateField requires a 'field' argument")?;
    let value = arguments["value"]
        .as_str()
        .ok_or("updateField requires a 'value' argument")?;
    let field = fields
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| format!("unknown field '{name}'"))?;
    session.form.insert(field.name.clone(), value.to_string());
    Ok(format!("Field '{}' set.", field.label))
}

fn set_focus_tool(
    areas: &[FocusArea],
    session: &mut IntakeSession,
    arguments: &serde_json::Value,
) -> Result<String, String> {
    let name = arguments["focus_area"]
        .as_str()
        .ok_or("setFocusArea requires a 'focus_area' argument")?;
    session.focus =
        match_focus_area(areas, name).ok_or_else(|| format!("unknown focus area '{name}'"))?;
    Ok("Focus area set.".to_string())
}

/// Everything required must be answered before submission; the error message
/// tells the model exactly what to ask for next.
fn validate_submission(fields: &[FieldDefinition], session: &IntakeSession) -> Result<(), String> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|f| f.is_required)
        .filter(|f| {
            session
                .form
                .get(&f.name)
                .map(|v| v.trim().is_empty())
                .unwrap_or(true)
        })
        .map(|f| f.label.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(format!(
            "cannot submit yet, required fields are missing: {}",
            missing.join(", ")
        ));
    }
    if session.focus == FocusSelection::Unset {
        return Err("cannot submit yet, the focus area has not been set".to_string());
    }
    Ok(())
}

fn match_focus_area(areas: &[FocusArea], name: &str) -> Option<FocusSelection> {
    if name.eq_ignore_ascii_case("other") {
        return Some(FocusSelection::Other);
    }
    areas
        .iter()
        .find(|a| a.name.eq_ignore_ascii_case(name))
        .map(|a| FocusSelection::Area(a.id, a.name.clone()))
}

fn persist_draft(
    conn: &mut PgConnection,
    session: &IntakeSession,
) -> Result<Ticket, diesel::result::Error> {
    let focus_area_id = match session.focus {
        FocusSelection::Area(id, _) => Some(id),
        _ => None,
    };
    let team_id = match focus_area_id {
        Some(id) => crate::companies::team_for_focus_area(conn, id)?,
        None => None,
    };

    let fields: Vec<FieldDefinition> = field_definitions::table
        .filter(field_definitions::company_id.eq(session.company_id))
        .order(field_definitions::display_order.asc())
        .load(conn)?;
    let summary = draft_summary(&fields, &session.form);

    let customer_email: Option<String> = profiles::table
        .filter(profiles::id.eq(session.customer_id))
        .select(profiles::email)
        .first(conn)?;

    conn.transaction::<Ticket, diesel::result::Error, _>(|conn| {
        let ticket: Ticket = diesel::insert_into(tickets::table)
            .values(&NewTicket {
                company_id: session.company_id,
                customer_id: session.customer_id,
                team_id,
                focus_area_id,
                status: STATUS_NEW.to_string(),
                priority: PRIORITY_MEDIUM.to_string(),
                email: customer_email,
                created_at: Utc::now(),
            })
            .get_result(conn)?;
        for field in &fields {
            if let Some(value) = session.form.get(&field.name) {
                diesel::insert_into(ticket_fields::table)
                    .values(&TicketField {
                        ticket_id: ticket.id,
                        field_definition_id: field.id,
                        value: Some(value.clone()),
                    })
                    .execute(conn)?;
            }
        }
        diesel::insert_into(messages::table)
            .values(&NewMessage {
                ticket_id: ticket.id,
                sender_id: session.customer_id,
                content: summary.clone(),
                message_type: "user".to_string(),
                email_message_id: None,
                email_references: None,
                created_at: Utc::now(),
            })
            .execute(conn)?;
        Ok(ticket)
    })
}

/// Opening ticket message: the filled form rendered one "Label: value" line
/// per answered field, in display order.
fn draft_summary(fields: &[FieldDefinition], form: &HashMap<String, String>) -> String {
    let lines: Vec<String> = fields
        .iter()
        .filter_map(|f| form.get(&f.name).map(|v| format!("{}: {v}", f.label)))
        .collect();
    if lines.is_empty() {
        "No details provided".to_string()
    } else {
        lines.join("\n")
    }
}

fn system_prompt(
    fields: &[FieldDefinition],
    areas: &[FocusArea],
    session: &IntakeSession,
) -> String {
    let mut field_lines = String::new();
    for f in fields {
        let current = session
            .form
            .get(&f.name)
            .map(String::as_str)
            .unwrap_or("(empty)");
        field_lines.push_str(&format!(
            "- {} (name: {}, {}{}): currently {current}\n",
            f.label,
            f.name,
            f.field_type,
            if f.is_required { ", required" } else { "" },
        ));
    }
    let area_names: Vec<&str> = areas.iter().map(|a| a.name.as_str()).collect();
    let focus = match &session.focus {
        FocusSelection::Unset => "(not set)".to_string(),
        FocusSelection::Other => "Other".to_string(),
        FocusSelection::Area(_, name) => name.clone(),
    };
    format!(
        "You are a support ticket intake assistant. Interview the customer and \
         fill out the ticket form using the updateField tool, pick a focus area \
         with setFocusArea, and call submitTicket once every required field is \
         answered. Ask one question at a time and keep replies short.\n\n\
         Form fields:\n{field_lines}\n\
         Focus areas (use 'Other' if none fit): {}\n\
         Current focus area: {focus}",
        area_names.join(", "),
    )
}

fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "updateField".to_string(),
            description: "Set the value of one ticket form field.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "field": {"type": "string", "description": "The field's name identifier."},
                    "value": {"type": "string", "description": "The customer's answer."}
                },
                "required": ["field", "value"]
            }),
        },
        ToolSpec {
            name: "setFocusArea".to_string(),
            description: "Choose the focus area the ticket belongs to, or 'Other'.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "focus_area": {"type": "string"}
                },
                "required": ["focus_area"]
            }),
        },
        ToolSpec {
            name: "submitTicket".to_string(),
            description: "Create the ticket from the filled form. Fails if required fields are missing.".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(id: i64, name: &str, label: &str, required: bool) -> FieldDefinition {
        FieldDefinition {
            id,
            company_id: Uuid::nil(),
            name: name.to_string(),
            label: label.to_string(),
            field_type: "text".to_string(),
            is_required: required,
            allows_multiple: false,
            display_order: id as i32,
            options: None,
        }
    }

    fn area(id: i64, name: &str) -> FocusArea {
        FocusArea {
            id,
            company_id: Uuid::nil(),
            name: name.to_string(),
        }
    }

    #[test]
    fn submission_lists_every_missing_required_label() {
        let fields = vec![
            field(1, "subject", "Subject", true),
            field(2, "severity", "Severity", true),
            field(3, "notes", "Notes", false),
        ];
        let mut session = IntakeSession::new(Uuid::nil(), Uuid::nil());
        session.focus = FocusSelection::Other;
        let err = validate_submission(&fields, &session).unwrap_err();
        assert!(err.contains("Subject"));
        assert!(err.contains("Severity"));
        assert!(!err.contains("Notes"));
    }

    #[test]
    fn submission_rejects_blank_required_values() {
        let fields = vec![field(1, "subject", "Subject", true)];
        let mut session = IntakeSession::new(Uuid::nil(), Uuid::nil());
        session.focus = FocusSelection::Other;
        session.form.insert("subject".to_string(), "   ".to_string());
        assert!(validate_submission(&fields, &session).is_err());
    }

    #[test]
    fn submission_requires_a_focus_choice() {
        let fields = vec![field(1, "subject", "Subject", true)];
        let mut session = IntakeSession::new(Uuid::nil(), Uuid::nil());
        session.form.insert("subject".to_string(), "Broken login".to_string());
        let err = validate_submission(&fields, &session).unwrap_err();
        assert!(err.contains("focus area"));

        session.focus = FocusSelection::Other;
        assert!(validate_submission(&fields, &session).is_ok());
    }

    #[test]
    fn focus_matching_is_case_insensitive_with_other_reserved() {
        let areas = vec![area(1, "Billing"), area(2, "Shipping")];
        assert_eq!(
            match_focus_area(&areas, "billing"),
            Some(FocusSelection::Area(1, "Billing".to_string()))
        );
        assert_eq!(match_focus_area(&areas, "OTHER"), Some(FocusSelection::Other));
        assert_eq!(match_focus_area(&areas, "Legal"), None);
    }

    #[test]
    fn draft_summary_follows_display_order() {
        let fields = vec![
            field(1, "subject", "Subject", true),
            field(2, "severity", "Severity", true),
        ];
        let mut form = HashMap::new();
        form.insert("severity".to_string(), "High".to_string());
        form.insert("subject".to_string(), "Printer on fire".to_string());
        assert_eq!(
            draft_summary(&fields, &form),
            "Subject: Printer on fire\nSeverity: High"
        );
    }

    #[test]
    fn update_field_rejects_unknown_names() {
        let fields = vec![field(1, "subject", "Subject", true)];
        let mut session = IntakeSession::new(Uuid::nil(), Uuid::nil());
        let err = update_field_tool(
            &fields,
            &mut session,
            &json!({"field": "color", "value": "red"}),
        )
        .unwrap_err();
        assert!(err.contains("unknown field"));
        assert!(session.form.is_empty());
    }

    #[test]
    fn sessions_do_not_share_form_state() {
        let fields = vec![field(1, "subject", "Subject", true)];
        let mut first = IntakeSession::new(Uuid::nil(), Uuid::nil());
        let mut second = IntakeSession::new(Uuid::nil(), Uuid::nil());
        update_field_tool(
            &fields,
            &mut first,
            &json!({"field": "subject", "value": "Refund"}),
        )
        .unwrap();
        set_focus_tool(&[area(1, "Billing")], &mut first, &json!({"focus_area": "Billing"}))
            .unwrap();
        assert!(second.form.is_empty());
        assert_eq!(second.focus, FocusSelection::Unset);
        assert_eq!(first.form.get("subject").map(String::as_str), Some("Refund"));
    }

    #[test]
    fn abandoned_sessions_are_evicted_and_fresh_ones_kept() {
        let mut sessions = HashMap::new();
        let stale_id = Uuid::new_v4();
        let fresh_id = Uuid::new_v4();
        let mut stale = IntakeSession::new(Uuid::nil(), Uuid::nil());
        stale.last_active = Utc::now() - chrono::Duration::minutes(SESSION_TTL_MINUTES + 1);
        sessions.insert(stale_id, stale);
        sessions.insert(fresh_id, IntakeSession::new(Uuid::nil(), Uuid::nil()));

        prune_expired(&mut sessions, Utc::now());
        assert!(!sessions.contains_key(&stale_id));
        assert!(sessions.contains_key(&fresh_id));
    }

    #[test]
    fn system_prompt_reflects_session_state() {
        let fields = vec![field(1, "subject", "Subject", true)];
        let areas = vec![area(1, "Billing")];
        let mut session = IntakeSession::new(Uuid::nil(), Uuid::nil());
        session.form.insert("subject".to_string(), "Refund".to_string());
        session.focus = FocusSelection::Area(1, "Billing".to_string());
        let prompt = system_prompt(&fields, &areas, &session);
        assert!(prompt.contains("currently Refund"));
        assert!(prompt.contains("Current focus area: Billing"));
    }
}
