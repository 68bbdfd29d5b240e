//! Supabase access-token verification against the project's JWKS.
//!
//! Supabase signs with RS256 on older projects and ES256 on newer ones, so
//! both key types are accepted. The key set is refetched when it is older
//! than the TTL or when a token names an unknown `kid`.

use anyhow::{bail, Context, Result};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::Claims;
use crate::config::Settings;

/// Minimum gap between two fetches of the key set
const REFETCH_COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    #[serde(default, rename = "use")]
    usage: Option<String>,
    // RSA
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
    // EC
    #[serde(default)]
    crv: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
}

impl Jwk {
    /// Decoding key and the only algorithm accepted with it
    fn decoding_key(&self) -> Result<(DecodingKey, Algorithm)> {
        if self.usage.as_deref().is_some_and(|u| u != "sig") {
            bail!("key {} is not a signing key", self.kid);
        }
        match self.kty.as_str() {
            "RSA" => {
                let (n, e) = self.n.as_deref().zip(self.e.as_deref()).context("RSA key missing n/e")?;
                Ok((DecodingKey::from_rsa_components(n, e)?, Algorithm::RS256))
            }
            "EC" if self.crv.as_deref() == Some("P-256") => {
                let (x, y) = self.x.as_deref().zip(self.y.as_deref()).context("EC key missing x/y")?;
                Ok((DecodingKey::from_ec_components(x, y)?, Algorithm::ES256))
            }
            other => bail!("unsupported key type {}", other),
        }
    }
}

#[derive(Default)]
struct KeyRing {
    keys: HashMap<String, (DecodingKey, Algorithm)>,
    fetched_at: Option<Instant>,
}

#[derive(Clone)]
pub struct JwksCache {
    ring: Arc<RwLock<KeyRing>>,
    http: Client,
    jwks_url: String,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl JwksCache {
    pub fn new(http: Client, settings: &Settings) -> Self {
        Self {
            ring: Arc::new(RwLock::new(KeyRing::default())),
            http,
            jwks_url: settings.supabase_jwt_jwks_url.clone(),
            issuer: settings.supabase_jwt_issuer.clone(),
            audience: settings.supabase_jwt_audience.clone(),
            ttl: Duration::from_secs(settings.jwks_cache_ttl_seconds),
        }
    }

    /// Verify signature, expiry, issuer and audience.
    pub async fn verify_token(&self, token: &str) -> Result<Claims> {
        let header = decode_header(token).context("Invalid JWT header")?;
        let kid = header.kid.context("JWT missing kid header")?;
        let (key, algorithm) = self.key_for(&kid).await?;

        if header.alg != algorithm {
            bail!("JWT algorithm {:?} does not match key {}", header.alg, kid);
        }

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let data = decode::<Claims>(token, &key, &validation).context("JWT validation failed")?;
        Ok(data.claims)
    }

    fn cached(&self, kid: &str) -> Option<(DecodingKey, Algorithm)> {
        let ring = self.ring.read();
        let fresh = ring.fetched_at.is_some_and(|at| at.elapsed() < self.ttl);
        if fresh {
            ring.keys.get(kid).cloned()
        } else {
            None
        }
    }

    async fn key_for(&self, kid: &str) -> Result<(DecodingKey, Algorithm)> {
        if let Some(found) = self.cached(kid) {
            return Ok(found);
        }
        self.refresh().await?;
        self.ring
            .read()
            .keys
            .get(kid)
            .cloned()
            .with_context(|| format!("Key {} not found in JWKS", kid))
    }

    async fn refresh(&self) -> Result<()> {
        let recently = self
            .ring
            .read()
            .fetched_at
            .is_some_and(|at| at.elapsed() < REFETCH_COOLDOWN);
        if recently {
            return Ok(());
        }

        tracing::debug!(url = %self.jwks_url, "Fetching JWKS");
        let response = self
            .http
            .get(&self.jwks_url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("Failed to fetch JWKS")?;
        if !response.status().is_success() {
            bail!("JWKS fetch failed with status: {}", response.status());
        }
        let set: JwkSet = response.json().await.context("Failed to parse JWKS")?;

        let keys = load_keys(set);
        let count = keys.len();
        {
            let mut ring = self.ring.write();
            ring.keys = keys;
            ring.fetched_at = Some(Instant::now());
        }

        tracing::info!(keys = count, "JWKS cache refreshed");
        Ok(())
    }

    /// Fetch keys ahead of the first request
    pub async fn warm_cache(&self) -> Result<()> {
        self.refresh().await
    }
}

fn load_keys(set: JwkSet) -> HashMap<String, (DecodingKey, Algorithm)> {
    set.keys
        .into_iter()
        .filter_map(|jwk| match jwk.decoding_key() {
            Ok(key) => Some((jwk.kid, key)),
            Err(e) => {
                tracing::warn!(kid = %jwk.kid, error = %e, "Skipping JWK");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_signing_keys_only() {
        let set: JwkSet = serde_json::from_value(serde_json::json!({
            "keys": [
                {
                    "kid": "ec-1", "kty": "EC", "use": "sig", "crv": "P-256",
                    "x": "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU",
                    "y": "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0"
                },
                { "kid": "enc-1", "kty": "RSA", "use": "enc", "n": "AQAB", "e": "AQAB" },
                { "kid": "oct-1", "kty": "oct" }
            ]
        }))
        .unwrap();

        let keys = load_keys(set);
        assert_eq!(keys.len(), 1);
        assert_eq!(keys.get("ec-1").map(|(_, alg)| *alg), Some(Algorithm::ES256));
    }

    #[test]
    fn rsa_keys_need_modulus_and_exponent() {
        let jwk: Jwk = serde_json::from_value(serde_json::json!({
            "kid": "rsa-1", "kty": "RSA", "e": "AQAB"
        }))
        .unwrap();
        assert!(jwk.decoding_key().is_err());
    }
}
