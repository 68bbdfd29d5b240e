use serde::{Deserialize, Serialize};

/// Claims carried by a Supabase access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Auth user id
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,

    #[serde(default)]
    pub email: Option<String>,

    /// Supabase auth role (`authenticated`), not the company role
    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub user_metadata: Option<serde_json::Value>,
}

impl Claims {
    /// Display name set at sign-up, if any
    pub fn display_name(&self) -> Option<&str> {
        self.user_metadata
            .as_ref()?
            .get("name")?
            .as_str()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_comes_from_user_metadata() {
        let claims: Claims = serde_json::from_value(serde_json::json!({
            "sub": "8d0f3c1e-5b6a-4f7e-9a61-2f4b1c9d7e00",
            "aud": "authenticated",
            "iss": "https://example.supabase.co/auth/v1",
            "iat": 1_700_000_000,
            "exp": 1_700_003_600,
            "email": "pat@acme.test",
            "user_metadata": { "name": " Pat Lee " }
        }))
        .unwrap();
        assert_eq!(claims.display_name(), Some("Pat Lee"));
        assert_eq!(claims.role, None);
    }
}
