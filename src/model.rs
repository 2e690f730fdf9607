use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag on a notification record. Only `WelcomeEmail` is acted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationType {
    WelcomeEmail,
    Other(String),
}

impl NotificationType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "welcome_email" => NotificationType::WelcomeEmail,
            other => NotificationType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NotificationType::WelcomeEmail => "welcome_email",
            NotificationType::Other(raw) => raw.as_str(),
        }
    }
}

/// An event row written by an external producer. The dispatcher only ever
/// changes `processed` and `processed_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub subject_user_id: String,
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

impl NotificationRecord {
    /// A fresh, unprocessed welcome notification for `subject_user_id`.
    pub fn welcome(id: impl Into<String>, subject_user_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject_user_id: subject_user_id.into(),
            notification_type: NotificationType::WelcomeEmail,
            title: String::new(),
            body: String::new(),
            created_at: Utc::now(),
            is_read: false,
            read_at: None,
            processed: false,
            processed_at: None,
        }
    }

    pub fn is_welcome(&self) -> bool {
        self.notification_type == NotificationType::WelcomeEmail
    }
}

/// Provisioned account profile. Owned by the provisioning side; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub temporary_password: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Name shown in greetings, family name first. Falls back to the email
    /// address when both name parts are blank.
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.last_name.trim(), self.first_name.trim());
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }
}

/// Fixed role enumeration carried on user records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Root,
    Admin,
    ProductionManager,
    TokenDesigner,
    CustomerSupportManager,
    User,
    Unrecognized,
}

impl Role {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "root" => Role::Root,
            "admin" => Role::Admin,
            "production_manager" => Role::ProductionManager,
            "token_designer" => Role::TokenDesigner,
            "customer_support_manager" => Role::CustomerSupportManager,
            "user" => Role::User,
            _ => Role::Unrecognized,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Root => "Root User",
            Role::Admin => "Brand Administrator",
            Role::ProductionManager => "Production Planning Lead",
            Role::TokenDesigner => "Token Designer",
            Role::CustomerSupportManager => "Customer Support Lead",
            Role::User => "General User",
            Role::Unrecognized => "User",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MailStatus {
    Sent,
    Failed,
}

impl MailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailStatus::Sent => "sent",
            MailStatus::Failed => "failed",
        }
    }

    pub fn parse_status(raw: &str) -> Option<Self> {
        match raw {
            "sent" => Some(MailStatus::Sent),
            "failed" => Some(MailStatus::Failed),
            _ => None,
        }
    }
}

/// One row of the send-history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailHistoryEntry {
    /// Empty until the store assigns an ID.
    pub mail_id: String,
    pub user_id: String,
    pub recipient_id: String,
    pub subject: String,
    pub body: String,
    pub status: MailStatus,
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_labels_cover_the_enumeration() {
        let cases = [
            ("root", "Root User"),
            ("admin", "Brand Administrator"),
            ("production_manager", "Production Planning Lead"),
            ("token_designer", "Token Designer"),
            ("customer_support_manager", "Customer Support Lead"),
            ("user", "General User"),
        ];
        for (raw, label) in cases {
            assert_eq!(Role::parse(raw).label(), label, "role {raw}");
        }
    }

    #[test]
    fn unknown_role_uses_default_label() {
        assert_eq!(Role::parse("superhero").label(), "User");
        assert_eq!(Role::parse("").label(), "User");
        assert_eq!(Role::parse("ADMIN").label(), "User");
    }

    #[test]
    fn notification_type_round_trips_unknown_tags() {
        assert_eq!(
            NotificationType::parse("welcome_email"),
            NotificationType::WelcomeEmail
        );
        let other = NotificationType::parse("password_reset");
        assert_eq!(other.as_str(), "password_reset");
    }

    #[test]
    fn display_name_puts_family_name_first_and_falls_back_to_email() {
        let user = UserRecord {
            id: "u1".into(),
            email: "a@example.com".into(),
            first_name: "  ".into(),
            last_name: String::new(),
            role: "user".into(),
            temporary_password: None,
            created_at: Utc::now(),
        };
        assert_eq!(user.display_name(), "a@example.com");

        let named = UserRecord {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            ..user
        };
        assert_eq!(named.display_name(), "Lovelace Ada");

        let family_only = UserRecord {
            first_name: String::new(),
            ..named
        };
        assert_eq!(family_only.display_name(), "Lovelace");
    }
}
