diesel::table! {
    companies (id) {
        id -> Uuid,
        name -> Varchar,
        email -> Varchar,
    }
}

diesel::table! {
    profiles (id) {
        id -> Uuid,
        company_id -> Nullable<Uuid>,
        email -> Nullable<Varchar>,
        full_name -> Nullable<Varchar>,
        role -> Varchar,
        team_id -> Nullable<Int8>,
        last_seen -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    teams (id) {
        id -> Int8,
        company_id -> Uuid,
        name -> Varchar,
    }
}

diesel::table! {
    team_focus_areas (team_id, focus_area_id) {
        team_id -> Int8,
        focus_area_id -> Int8,
    }
}

diesel::table! {
    focus_areas (id) {
        id -> Int8,
        company_id -> Uuid,
        name -> Varchar,
    }
}

diesel::table! {
    field_definitions (id) {
        id -> Int8,
        company_id -> Uuid,
        name -> Varchar,
        label -> Varchar,
        field_type -> Varchar,
        is_required -> Bool,
        allows_multiple -> Bool,
        display_order -> Int4,
        options -> Nullable<Jsonb>,
    }
}

diesel::table! {
    tickets (id) {
        id -> Int8,
        company_id -> Uuid,
        customer_id -> Uuid,
        human_agent_id -> Nullable<Uuid>,
        team_id -> Nullable<Int8>,
        focus_area_id -> Nullable<Int8>,
        status -> Varchar,
        priority -> Varchar,
        email -> Nullable<Varchar>,
        created_at -> Timestamptz,
        resolved_at -> Nullable<Timestamptz>,
        closed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    ticket_fields (ticket_id, field_definition_id) {
        ticket_id -> Int8,
        field_definition_id -> Int8,
        value -> Nullable<Text>,
    }
}

diesel::table! {
    messages (id) {
        id -> Int8,
        ticket_id -> Int8,
        sender_id -> Uuid,
        content -> Text,
        #[sql_name = "type"]
        message_type -> Varchar,
        email_message_id -> Nullable<Varchar>,
        email_references -> Nullable<Array<Text>>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    internal_notes (id) {
        id -> Int8,
        ticket_id -> Int8,
        human_agent_id -> Uuid,
        content -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    processed_emails (company_id, message_id) {
        company_id -> Uuid,
        message_id -> Varchar,
        processed_at -> Timestamptz,
    }
}

diesel::joinable!(profiles -> companies (company_id));
diesel::joinable!(teams -> companies (company_id));
diesel::joinable!(focus_areas -> companies (company_id));
diesel::joinable!(field_definitions -> companies (company_id));
diesel::joinable!(team_focus_areas -> teams (team_id));
diesel::joinable!(team_focus_areas -> focus_areas (focus_area_id));
diesel::joinable!(tickets -> companies (company_id));
diesel::joinable!(ticket_fields -> tickets (ticket_id));
diesel::joinable!(ticket_fields -> field_definitions (field_definition_id));
diesel::joinable!(messages -> tickets (ticket_id));
diesel::joinable!(internal_notes -> tickets (ticket_id));
diesel::joinable!(processed_emails -> companies (company_id));

diesel::allow_tables_to_appear_in_same_query!(
    companies,
    profiles,
    teams,
    team_focus_areas,
    focus_areas,
    field_definitions,
    tickets,
    ticket_fields,
    messages,
    internal_notes,
    processed_emails,
);
