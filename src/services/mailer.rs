//! Outbound email.
//!
//! One of three transports is chosen at startup: an SMTP relay, the SendGrid
//! HTTP API, or nothing at all. Every message goes out as plain text with an
//! HTML alternative.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use reqwest::Client;
use serde_json::json;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::{EmailSettings, EmailTransport};
use crate::domain::quote_requests::RequestedItem;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Email delivery is not configured")]
    NotConfigured,

    #[error("Invalid email address '{0}'")]
    InvalidAddress(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Email delivery failed: {0}")]
    Delivery(String),
}

/// A rendered message ready to send
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to_address: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

#[derive(Clone)]
enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    SendGrid {
        client: Client,
        api_key: String,
        url: String,
    },
    Disabled,
}

#[derive(Clone)]
pub struct Mailer {
    transport: Transport,
    from_address: String,
    from_name: String,
}

impl Mailer {
    pub fn from_settings(settings: &EmailSettings, http: Client) -> Result<Self> {
        let transport = match (&settings.transport, &settings.smtp, &settings.sendgrid_api_key) {
            (EmailTransport::Smtp, Some(smtp), _) => {
                let mut builder = if smtp.starttls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
                        .context("Invalid SMTP relay host")?
                } else {
                    AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
                }
                .port(smtp.port);

                if let (Some(user), Some(pass)) = (&smtp.username, &smtp.password) {
                    builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
                }

                info!(host = %smtp.host, port = smtp.port, starttls = smtp.starttls, "SMTP mailer configured");
                Transport::Smtp(builder.build())
            }
            (EmailTransport::SendGrid, _, Some(api_key)) => {
                info!("SendGrid mailer configured");
                Transport::SendGrid {
                    client: http,
                    api_key: api_key.clone(),
                    url: settings.sendgrid_api_url.clone(),
                }
            }
            _ => {
                warn!("Email delivery disabled; quote requests will be recorded as failed");
                Transport::Disabled
            }
        };

        Ok(Self {
            transport,
            from_address: settings.from_address.clone(),
            from_name: settings.from_name.clone(),
        })
    }

    /// A mailer that refuses every message
    #[cfg(test)]
    pub fn disabled() -> Self {
        Self {
            transport: Transport::Disabled,
            from_address: "noreply@localhost".to_string(),
            from_name: String::new(),
        }
    }

    pub fn transport_name(&self) -> &'static str {
        match self.transport {
            Transport::Smtp(_) => "smtp",
            Transport::SendGrid { .. } => "sendgrid",
            Transport::Disabled => "disabled",
        }
    }

    #[instrument(skip(self, email), fields(to = %email.to_address, transport = self.transport_name()))]
    pub async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        match &self.transport {
            Transport::Disabled => Err(MailError::NotConfigured),
            Transport::Smtp(smtp) => {
                let message = self.build_message(email)?;
                smtp.send(message)
                    .await
                    .map_err(|e| MailError::Delivery(e.to_string()))?;
                Ok(())
            }
            Transport::SendGrid {
                client,
                api_key,
                url,
            } => {
                let response = client
                    .post(url)
                    .bearer_auth(api_key)
                    .json(&sendgrid_payload(&self.from_address, &self.from_name, email))
                    .send()
                    .await
                    .map_err(|e| MailError::Delivery(e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(MailError::Delivery(format!("SendGrid returned {}: {}", status, body)));
                }
                Ok(())
            }
        }
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message, MailError> {
        let from = mailbox(Some(&self.from_name), &self.from_address)?;
        let to = mailbox(email.to_name.as_deref(), &email.to_address)?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                email.text_body.clone(),
                email.html_body.clone(),
            ))
            .map_err(|e| MailError::Build(e.to_string()))
    }
}

fn mailbox(name: Option<&str>, address: &str) -> Result<Mailbox, MailError> {
    let address = address
        .trim()
        .parse()
        .map_err(|_| MailError::InvalidAddress(address.to_string()))?;
    let name = name.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string);
    Ok(Mailbox::new(name, address))
}

fn sendgrid_payload(from_address: &str, from_name: &str, email: &OutgoingEmail) -> serde_json::Value {
    let mut to = json!({ "email": email.to_address });
    if let Some(name) = &email.to_name {
        to["name"] = json!(name);
    }
    json!({
        "personalizations": [{ "to": [to] }],
        "from": { "email": from_address, "name": from_name },
        "subject": email.subject,
        "content": [
            { "type": "text/plain", "value": email.text_body },
            { "type": "text/html", "value": email.html_body }
        ]
    })
}

// ============================================================================
// Quote request message
// ============================================================================

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Content of one quote request sent to a vendor
#[derive(Debug, Clone)]
pub struct QuoteRequestEmail<'a> {
    pub vendor_name: &'a str,
    pub project_name: &'a str,
    pub company_name: &'a str,
    pub items: &'a [RequestedItem],
    pub message: Option<&'a str>,
    pub expected_response_date: Option<NaiveDate>,
}

impl QuoteRequestEmail<'_> {
    pub fn subject(&self) -> String {
        format!("Quote Request: {}", self.project_name)
    }

    pub fn text_body(&self) -> String {
        let mut body = String::new();
        let _ = writeln!(body, "Dear {},\n", self.vendor_name);
        let _ = writeln!(
            body,
            "We would like to request a quote for the following items for our project: {}\n",
            self.project_name
        );
        if let Some(message) = self.message.filter(|m| !m.trim().is_empty()) {
            let _ = writeln!(body, "{}\n", message.trim());
        }
        let _ = writeln!(body, "Items to quote:");
        for (idx, item) in self.items.iter().enumerate() {
            let _ = writeln!(body, "  {}. {} - {} {}", idx + 1, item.label, item.qty, item.unit);
        }
        let _ = writeln!(
            body,
            "\nPlease include unit price, total price, lead time and any applicable terms."
        );
        if let Some(date) = self.expected_response_date {
            let _ = writeln!(body, "We would appreciate your response by {}.", date.format("%B %-d, %Y"));
        }
        let _ = write!(body, "\nThank you,\n{}", self.company_name);
        body
    }

    pub fn html_body(&self) -> String {
        let mut rows = String::new();
        for item in self.items {
            let _ = write!(
                rows,
                "<tr><td style=\"padding:8px;border:1px solid #ddd\">{}</td>\
                 <td style=\"padding:8px;border:1px solid #ddd;text-align:center\">{}</td>\
                 <td style=\"padding:8px;border:1px solid #ddd;text-align:center\">{}</td></tr>",
                escape_html(&item.label),
                item.qty,
                escape_html(&item.unit)
            );
        }

        let message = self
            .message
            .filter(|m| !m.trim().is_empty())
            .map(|m| format!("<p>{}</p>", escape_html(m.trim())))
            .unwrap_or_default();

        let deadline = self
            .expected_response_date
            .map(|d| format!("<p>We would appreciate your response by <strong>{}</strong>.</p>", d.format("%B %-d, %Y")))
            .unwrap_or_default();

        format!(
            "<!DOCTYPE html><html><body style=\"font-family:Arial,sans-serif;color:#333\">\
             <h2>Quote Request</h2>\
             <p>Dear {vendor},</p>\
             <p>We would like to request a quote for the following items for our project: <strong>{project}</strong></p>\
             {message}\
             <table style=\"border-collapse:collapse;width:100%\">\
             <thead><tr><th style=\"text-align:left\">Description</th><th>Quantity</th><th>Unit</th></tr></thead>\
             <tbody>{rows}</tbody></table>\
             <p>Please include unit price, total price, lead time and any applicable terms.</p>\
             {deadline}\
             <p>Thank you,<br>{company}</p>\
             </body></html>",
            vendor = escape_html(self.vendor_name),
            project = escape_html(self.project_name),
            company = escape_html(self.company_name),
        )
    }

    pub fn render(&self, to_address: &str) -> OutgoingEmail {
        OutgoingEmail {
            to_address: to_address.to_string(),
            to_name: Some(self.vendor_name.to_string()),
            subject: self.subject(),
            text_body: self.text_body(),
            html_body: self.html_body(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn items() -> Vec<RequestedItem> {
        vec![
            RequestedItem {
                takeoff_item_id: Uuid::new_v4(),
                label: "2x4x8 SPF Stud".into(),
                qty: 1200.0,
                unit: "EA".into(),
            },
            RequestedItem {
                takeoff_item_id: Uuid::new_v4(),
                label: "Anchor bolts <1/2\"> & nuts".into(),
                qty: 2.5,
                unit: "BOX".into(),
            },
        ]
    }

    fn email(items: &[RequestedItem]) -> QuoteRequestEmail<'_> {
        QuoteRequestEmail {
            vendor_name: "Gulf Lumber",
            project_name: "Riverside Clinic",
            company_name: "Acme Builders",
            items,
            message: Some("Delivery to site on Hwy 90."),
            expected_response_date: NaiveDate::from_ymd_opt(2024, 7, 3),
        }
    }

    #[test]
    fn subject_names_the_project() {
        let items = items();
        assert_eq!(email(&items).subject(), "Quote Request: Riverside Clinic");
    }

    #[test]
    fn text_body_lists_items() {
        let items = items();
        let body = email(&items).text_body();
        assert!(body.starts_with("Dear Gulf Lumber,"));
        assert!(body.contains("  1. 2x4x8 SPF Stud - 1200 EA"));
        assert!(body.contains("  2. Anchor bolts <1/2\"> & nuts - 2.5 BOX"));
        assert!(body.contains("Delivery to site on Hwy 90."));
        assert!(body.contains("by July 3, 2024"));
        assert!(body.ends_with("Acme Builders"));
    }

    #[test]
    fn html_body_escapes_user_text() {
        let items = items();
        let html = email(&items).html_body();
        assert!(html.contains("Anchor bolts &lt;1/2&quot;&gt; &amp; nuts"));
        assert!(!html.contains("<1/2"));
        assert!(html.contains("<strong>Riverside Clinic</strong>"));
    }

    #[test]
    fn sendgrid_payload_orders_plain_text_first() {
        let items = items();
        let outgoing = email(&items).render("sales@gulf.test");
        let payload = sendgrid_payload("quotes@acme.test", "Acme", &outgoing);
        assert_eq!(payload["personalizations"][0]["to"][0]["email"], "sales@gulf.test");
        assert_eq!(payload["personalizations"][0]["to"][0]["name"], "Gulf Lumber");
        assert_eq!(payload["content"][0]["type"], "text/plain");
        assert_eq!(payload["content"][1]["type"], "text/html");
    }

    #[tokio::test]
    async fn disabled_mailer_refuses_to_send() {
        let items = items();
        let mailer = Mailer::disabled();
        assert_eq!(mailer.transport_name(), "disabled");
        let result = mailer.send(&email(&items).render("sales@gulf.test")).await;
        assert!(matches!(result, Err(MailError::NotConfigured)));
    }

    #[test]
    fn mailbox_rejects_bad_addresses() {
        assert!(mailbox(Some("Gulf"), "sales@gulf.test").is_ok());
        assert!(matches!(
            mailbox(None, "not an address"),
            Err(MailError::InvalidAddress(_))
        ));
    }
}
