use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::schema::{
    companies, field_definitions, focus_areas, internal_notes, messages, processed_emails,
    profiles, team_focus_areas, teams, ticket_fields, tickets,
};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = companies)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = profiles)]
pub struct Profile {
    pub id: Uuid,
    pub company_id: Option<Uuid>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub role: String,
    pub team_id: Option<i64>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Queryable)]
#[diesel(table_name = teams)]
pub struct Team {
    pub id: i64,
    pub company_id: Uuid,
    pub name: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = teams)]
pub struct NewTeam {
    pub company_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = team_focus_areas)]
pub struct TeamFocusArea {
    pub team_id: i64,
    pub focus_area_id: i64,
}

#[derive(Debug, Clone, Serialize, Queryable)]
#[diesel(table_name = focus_areas)]
pub struct FocusArea {
    pub id: i64,
    pub company_id: Uuid,
    pub name: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = focus_areas)]
pub struct NewFocusArea {
    pub company_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Queryable)]
#[diesel(table_name = field_definitions)]
pub struct FieldDefinition {
    pub id: i64,
    pub company_id: Uuid,
    pub name: String,
    pub label: String,
    pub field_type: String,
    pub is_required: bool,
    pub allows_multiple: bool,
    pub display_order: i32,
    pub options: Option<serde_json::Value>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = field_definitions)]
pub struct NewFieldDefinition {
    pub company_id: Uuid,
    pub name: String,
    pub label: String,
    pub field_type: String,
    pub is_required: bool,
    pub allows_multiple: bool,
    pub display_order: i32,
    pub options: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Queryable)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub id: i64,
    pub company_id: Uuid,
    pub customer_id: Uuid,
    pub human_agent_id: Option<Uuid>,
    pub team_id: Option<i64>,
    pub focus_area_id: Option<i64>,
    pub status: String,
    pub priority: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tickets)]
pub struct NewTicket {
    pub company_id: Uuid,
    pub customer_id: Uuid,
    pub team_id: Option<i64>,
    pub focus_area_id: Option<i64>,
    pub status: String,
    pub priority: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = ticket_fields)]
pub struct TicketField {
    pub ticket_id: i64,
    pub field_definition_id: i64,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Queryable)]
#[diesel(table_name = messages)]
pub struct MessageRow {
    pub id: i64,
    pub ticket_id: i64,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: String,
    pub email_message_id: Option<String>,
    pub email_references: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub ticket_id: i64,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: String,
    pub email_message_id: Option<String>,
    pub email_references: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Queryable)]
#[diesel(table_name = internal_notes)]
pub struct InternalNote {
    pub id: i64,
    pub ticket_id: i64,
    pub human_agent_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = internal_notes)]
pub struct NewInternalNote {
    pub ticket_id: i64,
    pub human_agent_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = processed_emails)]
pub struct NewProcessedEmail {
    pub company_id: Uuid,
    pub message_id: String,
    pub processed_at: DateTime<Utc>,
}
