use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::agent::IntakeSession;
use crate::config::AppConfig;
use crate::email::outbound::Mailer;
use crate::llm::ChatProvider;
use crate::shared::utils::DbPool;

pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub llm: Arc<dyn ChatProvider>,
    pub mailer: Arc<dyn Mailer>,
    pub intake_sessions: Arc<Mutex<HashMap<Uuid, IntakeSession>>>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            config: self.config.clone(),
            llm: Arc::clone(&self.llm),
            mailer: Arc::clone(&self.mailer),
            intake_sessions: Arc::clone(&self.intake_sessions),
        }
    }
}
