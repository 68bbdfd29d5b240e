use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Self::Prod,
            "staging" => Self::Staging,
            _ => Self::Dev,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }

    pub fn is_prod(&self) -> bool {
        matches!(self, Self::Prod)
    }
}

/// Outbound mail transport selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailTransport {
    Smtp,
    SendGrid,
    Disabled,
}

impl EmailTransport {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "smtp" => Ok(Self::Smtp),
            "sendgrid" => Ok(Self::SendGrid),
            "disabled" | "none" | "" => Ok(Self::Disabled),
            other => bail!("Unknown EMAIL_TRANSPORT '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub starttls: bool,
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub transport: EmailTransport,
    pub from_address: String,
    pub from_name: String,
    pub smtp: Option<SmtpSettings>,
    pub sendgrid_api_key: Option<String>,
    pub sendgrid_api_url: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: Environment,
    pub server_addr: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,
    pub run_migrations: bool,

    // Redis
    pub redis_url: String,
    pub redis_cache_ttl_seconds: u64,

    // CORS
    pub cors_allow_origins: Vec<String>,

    // Supabase Auth
    pub supabase_jwt_jwks_url: String,
    pub supabase_jwt_issuer: String,
    pub supabase_jwt_audience: String,
    pub jwks_cache_ttl_seconds: u64,

    // Supabase API (for auth proxy)
    pub supabase_url: String,
    pub supabase_anon_key: String,

    // Vision LLM
    pub anthropic_api_key: Option<String>,
    pub anthropic_api_url: String,
    pub anthropic_model: String,
    pub ai_timeout_seconds: u64,
    pub ai_max_retries: u32,
    pub ai_max_tokens: u32,

    // PDF handling
    pub pdf_render_width: i32,
    pub pdfium_library_path: Option<PathBuf>,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,

    // Email
    pub email: EmailSettings,
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn bool_or(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|s| parse_bool(&s))
        .unwrap_or(default)
}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Absolute http(s) URL without a trailing slash
fn http_url(name: &str, raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw.trim()).with_context(|| format!("{} is not a valid URL", name))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("{} must use http or https", name);
    }
    Ok(raw.trim().trim_end_matches('/').to_string())
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let env = Environment::from_str(&env::var("ENV").unwrap_or_else(|_| "dev".to_string()));
        let server_addr = env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        // Database
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 10);
        let run_migrations = bool_or("RUN_MIGRATIONS", true);

        // Redis
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://redis:6379/0".to_string());
        let redis_cache_ttl_seconds = parse_or("REDIS_CACHE_TTL_SECONDS", 3600);

        // CORS
        let cors_allow_origins = split_origins(
            &env::var("CORS_ALLOW_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string()),
        );

        // Supabase Auth
        let supabase_jwt_jwks_url = http_url(
            "SUPABASE_JWT_JWKS_URL",
            &env::var("SUPABASE_JWT_JWKS_URL").context("SUPABASE_JWT_JWKS_URL must be set")?,
        )?;
        let supabase_jwt_issuer =
            env::var("SUPABASE_JWT_ISSUER").context("SUPABASE_JWT_ISSUER must be set")?;
        let supabase_jwt_audience =
            env::var("SUPABASE_JWT_AUDIENCE").unwrap_or_else(|_| "authenticated".to_string());
        let jwks_cache_ttl_seconds = parse_or("JWKS_CACHE_TTL_SECONDS", 1800);

        let supabase_url = http_url(
            "SUPABASE_URL",
            &env::var("SUPABASE_URL").context("SUPABASE_URL must be set")?,
        )?;
        let supabase_anon_key =
            env::var("SUPABASE_ANON_KEY").context("SUPABASE_ANON_KEY must be set")?;

        // Vision LLM (optional: parsing falls back to text extraction)
        let anthropic_api_key = optional("ANTHROPIC_API_KEY");
        let anthropic_api_url = http_url(
            "ANTHROPIC_API_URL",
            &env::var("ANTHROPIC_API_URL").unwrap_or_else(|_| "https://api.anthropic.com".to_string()),
        )?;
        let anthropic_model = env::var("ANTHROPIC_MODEL")
            .unwrap_or_else(|_| "claude-3-5-sonnet-20241022".to_string());
        let ai_timeout_seconds = parse_or("AI_TIMEOUT_SECONDS", 120);
        let ai_max_retries = parse_or("AI_MAX_RETRIES", 3);
        let ai_max_tokens = parse_or("AI_MAX_TOKENS", 4096);

        // PDF handling
        let pdf_render_width = parse_or("PDF_RENDER_WIDTH", 1568);
        let pdfium_library_path = optional("PDFIUM_LIBRARY_PATH").map(PathBuf::from);
        let upload_dir = PathBuf::from(
            env::var("UPLOAD_DIR").unwrap_or_else(|_| "./uploads".to_string()),
        );
        let max_upload_bytes = parse_or("MAX_UPLOAD_BYTES", 50 * 1024 * 1024);

        let email = EmailSettings::from_env()?;

        Ok(Settings {
            env,
            server_addr,
            database_url,
            database_max_connections,
            run_migrations,
            redis_url,
            redis_cache_ttl_seconds,
            cors_allow_origins,
            supabase_jwt_jwks_url,
            supabase_jwt_issuer,
            supabase_jwt_audience,
            jwks_cache_ttl_seconds,
            supabase_url,
            supabase_anon_key,
            anthropic_api_key,
            anthropic_api_url,
            anthropic_model,
            ai_timeout_seconds,
            ai_max_retries,
            ai_max_tokens,
            pdf_render_width,
            pdfium_library_path,
            upload_dir,
            max_upload_bytes,
            email,
        })
    }
}

impl EmailSettings {
    fn from_env() -> Result<Self> {
        let transport =
            EmailTransport::from_str(&env::var("EMAIL_TRANSPORT").unwrap_or_else(|_| "disabled".into()))?;

        let smtp = optional("SMTP_HOST").map(|host| SmtpSettings {
            host,
            port: parse_or("SMTP_PORT", 587),
            username: optional("SMTP_USERNAME"),
            password: optional("SMTP_PASSWORD"),
            starttls: bool_or("SMTP_STARTTLS", true),
        });

        let sendgrid_api_key = optional("SENDGRID_API_KEY");

        match transport {
            EmailTransport::Smtp if smtp.is_none() => {
                bail!("SMTP_HOST must be set when EMAIL_TRANSPORT=smtp")
            }
            EmailTransport::SendGrid if sendgrid_api_key.is_none() => {
                bail!("SENDGRID_API_KEY must be set when EMAIL_TRANSPORT=sendgrid")
            }
            _ => {}
        }

        Ok(Self {
            transport,
            from_address: env::var("EMAIL_FROM_ADDRESS")
                .unwrap_or_else(|_| "quotes@localhost".to_string()),
            from_name: env::var("EMAIL_FROM_NAME")
                .unwrap_or_else(|_| "Bidcraft Estimating".to_string()),
            smtp,
            sendgrid_api_key,
            sendgrid_api_url: env::var("SENDGRID_API_URL")
                .unwrap_or_else(|_| "https://api.sendgrid.com/v3/mail/send".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parsing_is_case_insensitive() {
        assert_eq!(Environment::from_str("PRODUCTION"), Environment::Prod);
        assert_eq!(Environment::from_str("staging"), Environment::Staging);
        assert_eq!(Environment::from_str("anything-else"), Environment::Dev);
        assert!(Environment::from_str("dev").is_dev());
        assert!(Environment::from_str("prod").is_prod());
    }

    #[test]
    fn email_transport_names() {
        assert_eq!(EmailTransport::from_str("SMTP").unwrap(), EmailTransport::Smtp);
        assert_eq!(
            EmailTransport::from_str("sendgrid").unwrap(),
            EmailTransport::SendGrid
        );
        assert_eq!(
            EmailTransport::from_str("none").unwrap(),
            EmailTransport::Disabled
        );
        assert!(EmailTransport::from_str("pigeon").is_err());
    }

    #[test]
    fn service_urls_are_checked_and_trimmed() {
        assert_eq!(
            http_url("SUPABASE_URL", " https://abc.supabase.co/ ").unwrap(),
            "https://abc.supabase.co"
        );
        assert!(http_url("SUPABASE_URL", "abc.supabase.co").is_err());
        assert!(http_url("SUPABASE_URL", "ftp://abc.supabase.co").is_err());
    }

    #[test]
    fn bool_values() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn origins_are_trimmed_and_filtered() {
        assert_eq!(
            split_origins(" http://a.test , ,http://b.test"),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }
}
