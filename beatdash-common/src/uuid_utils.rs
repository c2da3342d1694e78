//! UUID utilities

use uuid::Uuid;

/// Generate a new session identifier (UUIDv4)
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Parse a session identifier from a path or query string
pub fn parse(s: &str) -> crate::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| crate::Error::InvalidPayload(format!("Invalid session id '{}': {}", s, e)))
}
