pub mod agent;
pub mod companies;
pub mod config;
pub mod email;
pub mod llm;
pub mod messages;
pub mod shared;
pub mod tickets;
