use crate::auth::AuthError;
use crate::marks::MarkError;
use serde_json::json;

const GENERIC_FAILURE: &str = "Une erreur est survenue, veuillez réessayer.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Info,
    Success,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Info => "info",
            Level::Success => "success",
        }
    }
}

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

/// Success carrying a user-facing notice for the UI toast.
pub fn ok_with_notice(
    id: &str,
    result: serde_json::Value,
    level: Level,
    message: impl Into<String>,
) -> serde_json::Value {
    let mut resp = ok(id, result);
    resp["notice"] = json!({
        "level": level.as_str(),
        "message": message.into(),
    });
    resp
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    err_with_level(id, code, Level::Error, message, details)
}

fn err_with_level(
    id: &str,
    code: &str,
    level: Level,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
        "level": level.as_str(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// A failed request, rendered into the response envelope by [`respond`].
#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub level: Level,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            level: Level::Error,
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    /// Non-blocking refusal: nothing changed, the UI just informs the user.
    pub fn info(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            ..Self::new(code, message)
        }
    }

    /// Storage failures are logged with their cause and reported generically.
    pub fn db(code: &'static str, cause: impl std::fmt::Display) -> Self {
        tracing::error!(code, cause = %cause, "database failure");
        Self::new(code, GENERIC_FAILURE)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        tracing::debug!(id, code = self.code, message = %self.message, "request rejected");
        err_with_level(id, self.code, self.level, self.message, self.details)
    }
}

impl From<MarkError> for HandlerErr {
    fn from(e: MarkError) -> Self {
        HandlerErr::new(e.code(), e.to_string())
    }
}

impl From<AuthError> for HandlerErr {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Storage(cause) => HandlerErr::db("db_query_failed", cause),
            AuthError::Hash(cause) => {
                tracing::error!(cause = %cause, "password hashing failed");
                HandlerErr::new("hash_failed", GENERIC_FAILURE)
            }
            other => HandlerErr::new(other.code(), other.to_string()),
        }
    }
}

pub fn respond(id: &str, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => v,
        Err(e) => e.response(id),
    }
}
