//! Authenticated caller extracted from request headers
//!
//! Token verification happens upstream; the gateway forwards the verified
//! identity as `x-user-id` + `x-user-role` and passes the original
//! `Authorization` header through so it can be forwarded to sibling services.

use std::fmt;
use std::str::FromStr;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::error_body;
use crate::{Error, Result};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-user-role";

/// Caller role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Lecturer
    Dosen,
    /// Student
    Mahasiswa,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Dosen => "Dosen",
            Role::Mahasiswa => "Mahasiswa",
            Role::Admin => "Admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Dosen" => Ok(Role::Dosen),
            "Mahasiswa" => Ok(Role::Mahasiswa),
            "Admin" => Ok(Role::Admin),
            other => Err(Error::InvalidInput(format!("Unknown role: {}", other))),
        }
    }
}

/// Validated `{id, role}` of the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: i64,
    pub role: Role,
    /// Raw bearer token, forwarded to sibling services
    pub token: Option<String>,
}

impl Principal {
    pub fn new(id: i64, role: Role) -> Self {
        Self { id, role, token: None }
    }

    pub fn is(&self, role: Role) -> bool {
        self.role == role
    }

    /// Read the principal from request headers
    pub fn from_headers(headers: &HeaderMap) -> std::result::Result<Self, PrincipalRejection> {
        let id = header_str(headers, USER_ID_HEADER)
            .ok_or(PrincipalRejection::Missing)?
            .trim()
            .parse::<i64>()
            .map_err(|_| PrincipalRejection::Invalid("user id is not numeric"))?;

        let role = header_str(headers, ROLE_HEADER)
            .ok_or(PrincipalRejection::Missing)?
            .parse::<Role>()
            .map_err(|_| PrincipalRejection::Invalid("unknown role"))?;

        let token = header_str(headers, AUTHORIZATION.as_str())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Self { id, role, token })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Why a request carried no usable principal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrincipalRejection {
    Missing,
    Invalid(&'static str),
}

impl IntoResponse for PrincipalRejection {
    fn into_response(self) -> Response {
        let message = match self {
            PrincipalRejection::Missing => "Missing authenticated user".to_string(),
            PrincipalRejection::Invalid(reason) => format!("Invalid authenticated user: {}", reason),
        };
        (StatusCode::UNAUTHORIZED, Json(error_body("UNAUTHORIZED", &message))).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = PrincipalRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        Principal::from_headers(&parts.headers)
    }
}
