pub mod api;
pub mod config;
pub mod error;
pub mod error_payload;
pub mod fetch;
pub mod history;
pub mod job_queue;
pub mod metadata;
pub mod plugin_manager;
pub mod registry;
pub mod source;
pub mod source_github;
pub mod source_modrinth;
pub mod store;
pub mod version;
pub mod worker;

pub fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
