use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use tracing::{error, info};

use crate::shared::models::{NewMessage, Ticket};
use crate::shared::schema::{messages, tickets};
use crate::shared::state::AppState;

use super::{STATUS_CLOSED, STATUS_RESOLVED};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Background replacement for the scheduled-job approach: tickets that are
/// still `resolved` past the configured delay get closed with a system
/// message. Reopened tickets are no longer `resolved`, so they are skipped.
pub async fn run_sweeper(state: Arc<AppState>) {
    let delay = chrono::Duration::minutes(state.config.tickets.auto_close_minutes);
    loop {
        tokio::time::sleep(SWEEP_INTERVAL).await;
        let cutoff = Utc::now() - delay;
        match state.conn.get() {
            Ok(mut conn) => match sweep_once(&mut conn, cutoff) {
                Ok(0) => {}
                Ok(n) => info!(closed = n, "auto-closed resolved tickets"),
                Err(e) => error!("auto-close sweep failed: {e}"),
            },
            Err(e) => error!("auto-close sweep could not get connection: {e}"),
        }
    }
}

pub fn sweep_once(
    conn: &mut PgConnection,
    cutoff: DateTime<Utc>,
) -> Result<usize, diesel::result::Error> {
    let due: Vec<Ticket> = tickets::table
        .filter(tickets::status.eq(STATUS_RESOLVED))
        .filter(tickets::resolved_at.lt(cutoff))
        .load(conn)?;

    let mut closed = 0;
    for ticket in due {
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            let updated = diesel::update(
                tickets::table
                    .filter(tickets::id.eq(ticket.id))
                    .filter(tickets::status.eq(STATUS_RESOLVED)),
            )
            .set((
                tickets::status.eq(STATUS_CLOSED),
                tickets::closed_at.eq(Some(Utc::now())),
            ))
            .execute(conn)?;
            // Raced with a reopen; leave the ticket alone.
            if updated == 0 {
                return Ok(());
            }
            diesel::insert_into(messages::table)
                .values(&NewMessage {
                    ticket_id: ticket.id,
                    sender_id: ticket.human_agent_id.unwrap_or(ticket.customer_id),
                    content: "This ticket was closed automatically after resolution.".to_string(),
                    message_type: "system".to_string(),
                    email_message_id: None,
                    email_references: None,
                    created_at: Utc::now(),
                })
                .execute(conn)?;
            closed += 1;
            Ok(())
        })?;
    }
    Ok(closed)
}
