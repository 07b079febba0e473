use crate::db;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Role::Teacher => "enseignant",
            Role::Student => "élève",
        }
    }

    fn accounts_table(self) -> &'static str {
        match self {
            Role::Teacher => "teachers",
            Role::Student => "students",
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("vous devez être connecté")]
    MissingToken,

    #[error("session invalide, veuillez vous reconnecter")]
    InvalidToken,

    #[error("session expirée, veuillez vous reconnecter")]
    Expired,

    #[error("accès réservé aux comptes {}", .0.label())]
    Forbidden(Role),

    #[error("identifiants incorrects")]
    BadCredentials,

    #[error("le mot de passe doit contenir au moins 8 caractères")]
    WeakPassword,

    #[error("hachage du mot de passe impossible : {0}")]
    Hash(String),

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "unauthenticated",
            AuthError::InvalidToken => "invalid_session",
            AuthError::Expired => "session_expired",
            AuthError::Forbidden(_) => "forbidden",
            AuthError::BadCredentials => "bad_credentials",
            AuthError::WeakPassword => "weak_password",
            AuthError::Hash(_) => "hash_failed",
            AuthError::Storage(_) => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub role: Role,
    pub account_id: String,
    pub expires_at: String,
}

impl Session {
    pub fn require(&self, role: Role) -> Result<&str, AuthError> {
        if self.role == role {
            Ok(&self.account_id)
        } else {
            Err(AuthError::Forbidden(role))
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword);
    }
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Tokens are never stored; only their SHA-256 digest is.
pub fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Checks `email`/`password` against the accounts of `role`, returning the account id.
pub fn check_credentials(
    conn: &Connection,
    role: Role,
    email: &str,
    password: &str,
) -> Result<String, AuthError> {
    let sql = format!(
        "SELECT id, password_hash FROM {} WHERE lower(email) = lower(?)",
        role.accounts_table()
    );
    let row: Option<(String, Option<String>)> = conn
        .query_row(&sql, [email.trim()], |r| Ok((r.get(0)?, r.get(1)?)))
        .optional()?;
    match row {
        Some((id, Some(hash))) if verify_password(password, &hash) => Ok(id),
        _ => Err(AuthError::BadCredentials),
    }
}

pub fn issue_session(
    conn: &Connection,
    role: Role,
    account_id: &str,
    ttl_hours: i64,
) -> Result<(String, Session), AuthError> {
    let token = Uuid::new_v4().simple().to_string();
    let expires_at = db::timestamp(chrono::Utc::now() + chrono::Duration::hours(ttl_hours));
    conn.execute(
        "INSERT INTO sessions(token_hash, role, account_id, expires_at) VALUES(?, ?, ?, ?)",
        (token_digest(&token), role.as_str(), account_id, &expires_at),
    )?;
    Ok((
        token,
        Session {
            role,
            account_id: account_id.to_string(),
            expires_at,
        },
    ))
}

pub fn resolve_session(conn: &Connection, token: Option<&str>) -> Result<Session, AuthError> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;
    let digest = token_digest(token);
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT role, account_id, expires_at FROM sessions WHERE token_hash = ?",
            [&digest],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((role, account_id, expires_at)) = row else {
        return Err(AuthError::InvalidToken);
    };
    if expires_at <= db::now_rfc3339() {
        conn.execute("DELETE FROM sessions WHERE token_hash = ?", [&digest])?;
        return Err(AuthError::Expired);
    }
    let role = Role::parse(&role).ok_or(AuthError::InvalidToken)?;
    Ok(Session {
        role,
        account_id,
        expires_at,
    })
}

pub fn revoke_session(conn: &Connection, token: &str) -> Result<bool, AuthError> {
    let n = conn.execute(
        "DELETE FROM sessions WHERE token_hash = ?",
        [token_digest(token.trim())],
    )?;
    Ok(n > 0)
}
