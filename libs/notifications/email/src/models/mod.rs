use serde::{Deserialize, Serialize};

/// Email message to be sent, one per recipient per dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    /// Unique identifier for the email
    pub id: String,
    /// Recipient email address
    pub to: String,
    /// Email subject
    pub subject: String,
    /// HTML body
    pub body_html: String,
}

impl Email {
    /// Create a new email with required fields
    pub fn new(to: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            to: to.into(),
            subject: subject.into(),
            body_html: String::new(),
        }
    }

    /// Set HTML body
    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.body_html = html.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_email_gets_its_own_id() {
        let a = Email::new("a@example.com", "Hi").with_html("<p>a</p>");
        let b = Email::new("b@example.com", "Hi").with_html("<p>a</p>");

        assert_ne!(a.id, b.id);
        assert_eq!(a.body_html, "<p>a</p>");
    }
}
