use anyhow::Context;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub smtp: SmtpConfig,
    pub llm: LlmConfig,
    pub tickets: TicketConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Domain part of generated Message-IDs, e.g. `helpdesk.example.com`.
    pub message_id_domain: String,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct TicketConfig {
    /// Minutes a resolved ticket stays open before the sweeper closes it.
    pub auto_close_minutes: i64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        Ok(AppConfig {
            server: ServerConfig {
                host: env_or("SERVER_HOST", "127.0.0.1"),
                port: env_or("SERVER_PORT", "8080")
                    .parse()
                    .context("SERVER_PORT must be a port number")?,
            },
            database: DatabaseConfig { url: database_url },
            smtp: SmtpConfig {
                server: env_or("SMTP_SERVER", "localhost"),
                port: env_or("SMTP_PORT", "587")
                    .parse()
                    .context("SMTP_PORT must be a port number")?,
                username: env_or("SMTP_USERNAME", ""),
                password: env_or("SMTP_PASSWORD", ""),
                message_id_domain: env_or("MESSAGE_ID_DOMAIN", "helpdesk.localhost"),
            },
            llm: LlmConfig {
                api_key: env_or("LLM_API_KEY", "empty"),
                base_url: env_or("LLM_BASE_URL", "https://api.openai.com/v1"),
                model: env_or("LLM_MODEL", "gpt-4o-mini"),
            },
            tickets: TicketConfig {
                auto_close_minutes: env_or("TICKET_AUTO_CLOSE_MINUTES", "4320")
                    .parse()
                    .context("TICKET_AUTO_CLOSE_MINUTES must be an integer")?,
            },
        })
    }
}
