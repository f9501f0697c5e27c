//! Transactional email.
//!
//! Uses SMTP via lettre for delivery with Askama HTML and plain-text
//! templates.

use askama::Template;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;

use crate::config::EmailConfig;

/// HTML body of the sign-in code email.
#[derive(Template)]
#[template(path = "email/two_factor_code.html")]
struct TwoFactorCodeHtml<'a> {
    code: &'a str,
    expires_in_minutes: u64,
}

/// Plain text body of the sign-in code email.
#[derive(Template)]
#[template(path = "email/two_factor_code.txt")]
struct TwoFactorCodeText<'a> {
    code: &'a str,
    expires_in_minutes: u64,
}

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum EmailError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),
}

/// Email service for sending transactional emails.
#[derive(Clone)]
pub struct EmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl EmailService {
    /// Create a new email service from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the SMTP relay cannot be configured.
    pub fn new(config: &EmailConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().to_string(),
        );

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            mailer,
            from_address: config.from_address.clone(),
        })
    }

    /// Send a two-factor sign-in code.
    ///
    /// # Errors
    ///
    /// Returns error if email fails to send or template fails to render.
    pub async fn send_two_factor_code(
        &self,
        to: &str,
        code: &str,
        expires_in_minutes: u64,
    ) -> Result<(), EmailError> {
        let html = TwoFactorCodeHtml {
            code,
            expires_in_minutes,
        }
        .render()?;
        let text = TwoFactorCodeText {
            code,
            expires_in_minutes,
        }
        .render()?;

        self.send_multipart_email(to, "Your Apothecary sign-in code", &text, &html)
            .await
    }

    /// Send a multipart email with both plain text and HTML versions.
    async fn send_multipart_email(
        &self,
        to: &str,
        subject: &str,
        text_body: &str,
        html_body: &str,
    ) -> Result<(), EmailError> {
        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| EmailError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(to
                .parse()
                .map_err(|_| EmailError::InvalidAddress(to.to_string()))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )?;

        self.mailer.send(email).await?;

        tracing::info!(subject = %subject, "Email sent successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_templates_render_code_and_expiry() {
        let html = TwoFactorCodeHtml {
            code: "482913",
            expires_in_minutes: 10,
        }
        .render()
        .expect("html renders");
        assert!(html.contains("482913"));
        assert!(html.contains("10 minutes"));

        let text = TwoFactorCodeText {
            code: "482913",
            expires_in_minutes: 10,
        }
        .render()
        .expect("text renders");
        assert!(text.contains("482913"));
        assert!(text.contains("expires in 10 minutes"));
    }
}
