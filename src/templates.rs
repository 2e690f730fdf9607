//! Mail bodies for the two delivery tiers, rendered with handlebars.
//!
//! Both registries run in strict mode, so a placeholder with no value is a
//! render error. The built-in set can be replaced file by file from a
//! template directory.

use handlebars::{no_escape, Handlebars};
use serde_json::{json, Value};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::model::Role;

pub const VERIFICATION_TEMPLATE_FILE: &str = "verification_email.html";
pub const WELCOME_TEMPLATE_FILE: &str = "welcome_email.txt";

const VERIFICATION_BODY: &str = "verification_body";
const VERIFICATION_SUBJECT: &str = "verification_subject";
const WELCOME_BODY: &str = "welcome_body";
const WELCOME_SUBJECT: &str = "welcome_subject";

const VERIFICATION_SUBJECT_TEXT: &str = "[{{product_name}}] Please verify your email address";
const WELCOME_SUBJECT_TEXT: &str = "Welcome to {{product_name}}, {{display_name}}!";

const VERIFICATION_HTML: &str = r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
  <h2 style="color: #2563eb;">Welcome to {{product_name}}</h2>
  <p>Hello {{display_name}},</p>
  <p>An account has been created for you. Please confirm your email address before signing in.</p>
  <p style="margin: 30px 0;">
    <a href="{{verification_link}}" style="background-color: #2563eb; color: white; padding: 12px 24px; text-decoration: none; border-radius: 6px; display: inline-block;">Verify email address</a>
  </p>
  <div style="background-color: #f3f4f6; padding: 20px; border-radius: 8px; margin: 20px 0;">
    <h3 style="margin-top: 0; color: #374151;">Sign-in details</h3>
    <p><strong>Email:</strong> {{email}}</p>
    <p><strong>Temporary password:</strong> <code>{{temporary_password}}</code></p>
    <p><strong>Role:</strong> {{role_label}}</p>
  </div>
  <ul style="color: #6b7280; font-size: 14px;">
    <li>Change your password after the first sign-in.</li>
    <li>Do not share the temporary password with anyone.</li>
  </ul>
  <p style="color: #6b7280; font-size: 12px;">This message was sent automatically. Please do not reply.</p>
</div>"#;

const WELCOME_TEXT: &str = "Hello {{display_name}},

Your invitation to {{product_name}} is ready.

Sign-in details
- Email: {{email}}
- Temporary password: {{temporary_password}}
- Login URL: {{login_url}}

First sign-in
1. Open the login URL above.
2. Sign in with your email address and the temporary password.
3. Change your password right after signing in.

Your role
- {{role_label}}

Important
- The password above is temporary.
- This message contains credentials. Keep it private and do not forward it.

If you have any questions, contact your administrator.

{{product_name}}";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("invalid template {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: Box<handlebars::TemplateError>,
    },
    #[error("failed to render {name}: {source}")]
    Render {
        name: &'static str,
        #[source]
        source: handlebars::RenderError,
    },
    #[error("failed to read template {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Values a mail body may reference.
#[derive(Debug, Clone)]
pub struct MailContext<'a> {
    pub product_name: &'a str,
    pub display_name: &'a str,
    pub email: &'a str,
    pub temporary_password: &'a str,
    pub role: &'a str,
    /// Verification link for the primary tier, login URL for the fallback.
    pub link: &'a str,
}

impl MailContext<'_> {
    fn data(&self, link_key: &'static str) -> Value {
        let mut data = json!({
            "product_name": self.product_name,
            "display_name": self.display_name,
            "email": self.email,
            "temporary_password": self.temporary_password,
            "role_label": Role::parse(self.role).label(),
        });
        data[link_key] = Value::from(self.link);
        data
    }
}

/// Rendered subject and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMail {
    pub subject: String,
    pub body: String,
}

/// Compiled templates for both tiers. HTML output is escaped; plain text is not.
pub struct TemplateSet {
    html: Handlebars<'static>,
    text: Handlebars<'static>,
}

impl fmt::Debug for TemplateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateSet").finish_non_exhaustive()
    }
}

impl TemplateSet {
    /// The compiled-in templates.
    pub fn builtin() -> Result<Self, TemplateError> {
        Self::new(VERIFICATION_HTML, WELCOME_TEXT)
    }

    pub fn new(verification_html: &str, welcome_text: &str) -> Result<Self, TemplateError> {
        let mut html = Handlebars::new();
        html.set_strict_mode(true);
        register(&mut html, VERIFICATION_BODY, verification_html)?;

        let mut text = Handlebars::new();
        text.set_strict_mode(true);
        text.register_escape_fn(no_escape);
        register(&mut text, VERIFICATION_SUBJECT, VERIFICATION_SUBJECT_TEXT)?;
        register(&mut text, WELCOME_SUBJECT, WELCOME_SUBJECT_TEXT)?;
        register(&mut text, WELCOME_BODY, welcome_text)?;

        Ok(Self { html, text })
    }

    /// Built-in templates, with any file present in `dir` taking precedence.
    pub fn load(dir: Option<&Path>) -> Result<Self, TemplateError> {
        let Some(dir) = dir else {
            return Self::builtin();
        };
        let html = read_override(dir, VERIFICATION_TEMPLATE_FILE)?;
        let text = read_override(dir, WELCOME_TEMPLATE_FILE)?;
        Self::new(
            html.as_deref().unwrap_or(VERIFICATION_HTML),
            text.as_deref().unwrap_or(WELCOME_TEXT),
        )
    }

    /// Primary tier: HTML with the provider-issued verification link.
    pub fn render_verification(&self, ctx: &MailContext<'_>) -> Result<RenderedMail, TemplateError> {
        let data = ctx.data("verification_link");
        Ok(RenderedMail {
            subject: render(&self.text, VERIFICATION_SUBJECT, &data)?,
            body: render(&self.html, VERIFICATION_BODY, &data)?,
        })
    }

    /// Fallback tier: plain text with the static login URL.
    pub fn render_welcome(&self, ctx: &MailContext<'_>) -> Result<RenderedMail, TemplateError> {
        let data = ctx.data("login_url");
        Ok(RenderedMail {
            subject: render(&self.text, WELCOME_SUBJECT, &data)?,
            body: render(&self.text, WELCOME_BODY, &data)?.trim().to_string(),
        })
    }
}

fn register(
    registry: &mut Handlebars<'static>,
    name: &str,
    template: &str,
) -> Result<(), TemplateError> {
    registry
        .register_template_string(name, template)
        .map_err(|source| TemplateError::Parse {
            name: name.to_string(),
            source: Box::new(source),
        })
}

fn render(
    registry: &Handlebars<'static>,
    name: &'static str,
    data: &Value,
) -> Result<String, TemplateError> {
    registry
        .render(name, data)
        .map_err(|source| TemplateError::Render { name, source })
}

fn read_override(dir: &Path, file: &str) -> Result<Option<String>, TemplateError> {
    let path = dir.join(file);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|source| TemplateError::Io {
        path: path.display().to_string(),
        source,
    })?;
    info!(path = %path.display(), "using template override");
    Ok(Some(content))
}
