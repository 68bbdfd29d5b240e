use super::Claims;
use uuid::Uuid;

/// Caller identity taken from a verified access token
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,

    /// Raw bearer token, forwarded on sign-out
    token: String,
}

impl AuthContext {
    pub fn from_claims_with_token(claims: &Claims, token: &str) -> Result<Self, &'static str> {
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| "Invalid user ID in token")?;

        Ok(Self {
            user_id,
            email: claims.email.clone(),
            display_name: claims.display_name().map(str::to_string),
            token: token.to_string(),
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}
