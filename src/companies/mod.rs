use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::shared::models::{
    Company, FieldDefinition, FocusArea, NewFieldDefinition, NewFocusArea, NewTeam, Profile, Team,
    TeamFocusArea,
};
use crate::shared::schema::{
    companies, field_definitions, focus_areas, profiles, team_focus_areas, teams,
};
use crate::shared::state::AppState;
use crate::shared::utils::{bad_request, internal_err, not_found, ApiError};

#[derive(Debug, Deserialize)]
pub struct RegisterCompanyRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFocusAreaRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFieldRequest {
    pub name: String,
    pub label: String,
    pub field_type: String,
    pub is_required: Option<bool>,
    pub allows_multiple: Option<bool>,
    pub display_order: Option<i32>,
    pub options: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTeamRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AttachFocusAreaRequest {
    pub focus_area_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterProfileRequest {
    pub email: String,
    pub full_name: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignTeamRequest {
    pub team_id: i64,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/companies", get(list_companies).post(register_company))
        .route(
            "/api/companies/:id/focus-areas",
            get(list_focus_areas).post(create_focus_area),
        )
        .route(
            "/api/companies/:id/focus-areas/:focus_area_id",
            delete(delete_focus_area),
        )
        .route(
            "/api/companies/:id/fields",
            get(list_fields).post(create_field),
        )
        .route("/api/companies/:id/teams", get(list_teams).post(create_team))
        .route("/api/teams/:id/focus-areas", axum::routing::post(attach_focus_area))
        .route(
            "/api/companies/:id/profiles",
            get(list_profiles).post(register_profile),
        )
        .route("/api/profiles/:id/team", put(assign_agent_to_team))
}

/// Deterministic support address for a new tenant, e.g.
/// "Acme Rockets Ltd" → `acme-rockets-ltd@<domain>`.
pub fn generate_company_email(name: &str, domain: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-');
    let slug = if slug.is_empty() { "company" } else { slug };
    format!("{slug}@{domain}")
}

/// First team covering the focus area, used to route new tickets.
pub fn team_for_focus_area(
    conn: &mut PgConnection,
    focus_area_id: i64,
) -> Result<Option<i64>, diesel::result::Error> {
    team_focus_areas::table
        .filter(team_focus_areas::focus_area_id.eq(focus_area_id))
        .order(team_focus_areas::team_id.asc())
        .select(team_focus_areas::team_id)
        .first(conn)
        .optional()
}

pub async fn register_company(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterCompanyRequest>,
) -> Result<Json<Company>, ApiError> {
    if req.name.trim().is_empty() {
        return Err(bad_request("company name must not be empty"));
    }
    let mut conn = state.conn.get().map_err(internal_err)?;
    let company = Company {
        id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        email: generate_company_email(&req.name, &state.config.smtp.message_id_domain),
    };
    diesel::insert_into(companies::table)
        .values(&company)
        .execute(&mut conn)
        .map_err(|e| match e {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => (
                StatusCode::CONFLICT,
                format!("support address {} already taken", company.email),
            ),
            other => internal_err(other),
        })?;
    Ok(Json(company))
}

pub async fn list_companies(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Company>>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;
    let rows: Vec<Company> = companies::table
        .order(companies::name.asc())
        .load(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(rows))
}

pub async fn list_focus_areas(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<Uuid>,
) -> Result<Json<Vec<FocusArea>>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;
    let rows: Vec<FocusArea> = focus_areas::table
        .filter(focus_areas::company_id.eq(company_id))
        .order(focus_areas::id.asc())
        .load(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(rows))
}

pub async fn create_focus_area(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<Uuid>,
    Json(req): Json<CreateFocusAreaRequest>,
) -> Result<Json<FocusArea>, ApiError> {
    if req.name.trim().is_empty() || req.name.trim().eq_ignore_ascii_case("other") {
        // "Other" is the reserved no-area choice in classification and intake.
        return Err(bad_request("invalid focus area name"));
    }
    let mut conn = state.conn.get().map_err(internal_err)?;
    let area: FocusArea = diesel::insert_into(focus_areas::table)
        .values(&NewFocusArea {
            company_id,
            name: req.name.trim().to_string(),
        })
        .get_result(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(area))
}

pub async fn delete_focus_area(
    State(state): State<Arc<AppState>>,
    Path((company_id, focus_area_id)): Path<(Uuid, i64)>,
) -> Result<StatusCode, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;
    let deleted = diesel::delete(
        focus_areas::table
            .filter(focus_areas::id.eq(focus_area_id))
            .filter(focus_areas::company_id.eq(company_id)),
    )
    .execute(&mut conn)
    .map_err(internal_err)?;
    if deleted == 0 {
        return Err(not_found("Focus area"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_fields(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<Uuid>,
) -> Result<Json<Vec<FieldDefinition>>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;
    let rows: Vec<FieldDefinition> = field_definitions::table
        .filter(field_definitions::company_id.eq(company_id))
        .order(field_definitions::display_order.asc())
        .load(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(rows))
}

pub async fn create_field(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<Uuid>,
    Json(req): Json<CreateFieldRequest>,
) -> Result<Json<FieldDefinition>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;
    let display_order = match req.display_order {
        Some(order) => order,
        None => {
            let max: Option<i32> = field_definitions::table
                .filter(field_definitions::company_id.eq(company_id))
                .select(diesel::dsl::max(field_definitions::display_order))
                .first(&mut conn)
                .map_err(internal_err)?;
            max.unwrap_or(0) + 1
        }
    };
    let field: FieldDefinition = diesel::insert_into(field_definitions::table)
        .values(&NewFieldDefinition {
            company_id,
            name: req.name,
            label: req.label,
            field_type: req.field_type,
            is_required: req.is_required.unwrap_or(false),
            allows_multiple: req.allows_multiple.unwrap_or(false),
            display_order,
            options: req.options,
        })
        .get_result(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(field))
}

pub async fn list_teams(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<Uuid>,
) -> Result<Json<Vec<Team>>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;
    let rows: Vec<Team> = teams::table
        .filter(teams::company_id.eq(company_id))
        .order(teams::name.asc())
        .load(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(rows))
}

pub async fn create_team(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<Uuid>,
    Json(req): Json<CreateTeamRequest>,
) -> Result<Json<Team>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;
    let team: Team = diesel::insert_into(teams::table)
        .values(&NewTeam {
            company_id,
            name: req.name,
        })
        .get_result(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(team))
}

pub async fn attach_focus_area(
    State(state): State<Arc<AppState>>,
    Path(team_id): Path<i64>,
    Json(req): Json<AttachFocusAreaRequest>,
) -> Result<Json<TeamFocusArea>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;
    let link = TeamFocusArea {
        team_id,
        focus_area_id: req.focus_area_id,
    };
    diesel::insert_into(team_focus_areas::table)
        .values(&link)
        .on_conflict_do_nothing()
        .execute(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(link))
}

/// Roles that can be created through the admin API. Customers registered here
/// can use the intake agent without ever having emailed.
pub fn is_registrable_role(role: &str) -> bool {
    matches!(role, "human_agent" | "customer")
}

pub async fn register_profile(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<Uuid>,
    Json(req): Json<RegisterProfileRequest>,
) -> Result<Json<Profile>, ApiError> {
    if !req.email.contains('@') {
        return Err(bad_request("invalid profile email"));
    }
    if !is_registrable_role(&req.role) {
        return Err(bad_request(format!("unknown role {}", req.role)));
    }
    let mut conn = state.conn.get().map_err(internal_err)?;
    let profile = Profile {
        id: Uuid::new_v4(),
        company_id: Some(company_id),
        email: Some(req.email),
        full_name: Some(req.full_name),
        role: req.role,
        team_id: None,
        last_seen: None,
    };
    diesel::insert_into(profiles::table)
        .values(&profile)
        .execute(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(profile))
}

pub async fn list_profiles(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<Uuid>,
) -> Result<Json<Vec<Profile>>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;
    let rows: Vec<Profile> = profiles::table
        .filter(profiles::company_id.eq(company_id))
        .order(profiles::role.asc())
        .load(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(rows))
}

pub async fn assign_agent_to_team(
    State(state): State<Arc<AppState>>,
    Path(profile_id): Path<Uuid>,
    Json(req): Json<AssignTeamRequest>,
) -> Result<Json<Profile>, ApiError> {
    let mut conn = state.conn.get().map_err(internal_err)?;
    let team: Team = teams::table
        .filter(teams::id.eq(req.team_id))
        .first(&mut conn)
        .map_err(|_| not_found("Team"))?;
    let profile: Profile = profiles::table
        .filter(profiles::id.eq(profile_id))
        .first(&mut conn)
        .map_err(|_| not_found("Profile"))?;
    if profile.company_id != Some(team.company_id) {
        return Err(bad_request("profile and team belong to different companies"));
    }
    if profile.role != "human_agent" {
        return Err(bad_request("only human agents can join teams"));
    }
    let updated: Profile = diesel::update(profiles::table.filter(profiles::id.eq(profile_id)))
        .set(profiles::team_id.eq(Some(req.team_id)))
        .get_result(&mut conn)
        .map_err(internal_err)?;
    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn company_email_is_slugified() {
        assert_eq!(
            generate_company_email("Acme Rockets Ltd", "support.example"),
            "acme-rockets-ltd@support.example"
        );
    }

    #[test]
    fn company_email_collapses_punctuation() {
        assert_eq!(
            generate_company_email("  O'Neill & Sons!! ", "support.example"),
            "o-neill-sons@support.example"
        );
    }

    #[test]
    fn customers_and_agents_are_registrable_roles() {
        assert!(is_registrable_role("customer"));
        assert!(is_registrable_role("human_agent"));
        assert!(!is_registrable_role("admin"));
        assert!(!is_registrable_role(""));
    }

    #[test]
    fn company_email_never_empty() {
        assert_eq!(
            generate_company_email("!!!", "support.example"),
            "company@support.example"
        );
    }
}
