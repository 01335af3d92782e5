//! Server configuration.

use std::path::PathBuf;

/// Configuration for the identity server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (default `3000`; `0` for auto-assign).
    pub port: u16,
    /// Path to the contact database.
    pub db_path: PathBuf,
    /// Resolutions slower than this are logged as slow. A started
    /// resolution is never abandoned, so the response reports what committed.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            db_path: default_db_path(),
            request_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `~/.identity/database/contacts.db`, falling back to `/tmp` without `HOME`.
pub fn default_db_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home)
        .join(".identity")
        .join("database")
        .join("contacts.db")
}
