//! Authentication domain types
//!
//! Requests and responses for the Supabase Auth proxy, plus the company
//! bootstrap performed on registration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::companies::{CompanyResponse, UserRole};

/// Register a new user together with their company
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
    pub company_name: String,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), String> {
        if !self.email.contains('@') || self.email.trim().len() < 3 {
            return Err("A valid email address is required".to_string());
        }
        if self.password.len() < 8 {
            return Err("Password must be at least 8 characters".to_string());
        }
        if self.company_name.trim().is_empty() {
            return Err("Company name is required".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// User info from Supabase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Tokens for signin, refresh or auto-confirmed registration
#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<Uuid>,
}

/// Registration response when email confirmation is required
#[derive(Debug, Clone, Serialize)]
pub struct SignupPendingResponse {
    pub user_id: String,
    pub email: String,
    pub company_id: Uuid,
    pub confirmation_required: bool,
    pub message: String,
}

/// The caller's profile and company
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: UserRole,
    pub company: CompanyResponse,
}

// Supabase Auth API response types

#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseAuthResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub user: SupabaseUser,
}

/// Sign-up response when confirmation is pending: the bare user object
#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseSignupResponse {
    pub id: String,
    pub email: Option<String>,
    pub confirmation_sent_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseUser {
    pub id: String,
    pub email: Option<String>,
    pub created_at: Option<String>,
    pub user_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseErrorResponse {
    pub msg: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub message: Option<String>,
}

impl SupabaseErrorResponse {
    pub fn get_message(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.msg.clone())
            .or_else(|| self.error_description.clone())
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "Unknown authentication error".to_string())
    }
}

impl From<SupabaseUser> for User {
    fn from(su: SupabaseUser) -> Self {
        let name = su
            .user_metadata
            .as_ref()
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Self {
            id: su.id,
            email: su.email,
            name,
            created_at: su.created_at.and_then(|s| s.parse().ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(email: &str, password: &str, company: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: password.into(),
            name: None,
            company_name: company.into(),
        }
    }

    #[test]
    fn register_validation() {
        assert!(register("pat@acme.test", "longenough", "Acme Builders").validate().is_ok());
        assert!(register("not-an-email", "longenough", "Acme").validate().is_err());
        assert!(register("pat@acme.test", "short", "Acme").validate().is_err());
        assert!(register("pat@acme.test", "longenough", "  ").validate().is_err());
    }

    #[test]
    fn supabase_error_message_precedence() {
        let err: SupabaseErrorResponse = serde_json::from_value(serde_json::json!({
            "msg": "User already registered",
            "error": "invalid_request"
        }))
        .unwrap();
        assert_eq!(err.get_message(), "User already registered");
    }

    #[test]
    fn user_name_comes_from_metadata() {
        let user: User = SupabaseUser {
            id: "abc".into(),
            email: Some("pat@acme.test".into()),
            created_at: Some("2024-06-01T12:00:00Z".into()),
            user_metadata: Some(serde_json::json!({ "name": "Pat" })),
        }
        .into();
        assert_eq!(user.name.as_deref(), Some("Pat"));
        assert!(user.created_at.is_some());
    }
}
