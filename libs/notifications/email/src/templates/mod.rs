//! Email templates: loading and flat placeholder substitution.
//!
//! Templates are plain text with `{{name}}` placeholders. Rendering is a single
//! left-to-right pass, so substituted values are never expanded again and
//! unknown placeholders are left as they are.

use crate::config::BrandingConfig;
use crate::events::AnnouncementCreated;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDateTime};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Template rendered for every new announcement.
pub const ANNOUNCEMENT_CREATED_TEMPLATE: &str = "announcement_created.html";

const ANNOUNCEMENT_CREATED_HTML: &str = include_str!("../../templates/announcement_created.html");

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("failed to read template {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Source of raw template text.
#[async_trait]
pub trait TemplateLoader: Send + Sync {
    async fn load(&self, name: &str) -> Result<String, TemplateError>;
}

/// Loads templates from a directory on disk.
#[derive(Debug, Clone)]
pub struct FsTemplateLoader {
    root: PathBuf,
}

impl FsTemplateLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl TemplateLoader for FsTemplateLoader {
    async fn load(&self, name: &str) -> Result<String, TemplateError> {
        // Names are file names, never paths.
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(TemplateError::NotFound(name.to_string()));
        }

        match tokio::fs::read_to_string(self.root.join(name)).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(TemplateError::NotFound(name.to_string()))
            }
            Err(source) => Err(TemplateError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }
}

/// In-memory template store
#[derive(Clone, Default)]
pub struct InMemoryTemplateStore {
    templates: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryTemplateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with the built-in templates
    pub fn with_defaults() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            ANNOUNCEMENT_CREATED_TEMPLATE.to_string(),
            ANNOUNCEMENT_CREATED_HTML.to_string(),
        );
        Self {
            templates: Arc::new(RwLock::new(templates)),
        }
    }

    /// Store a template, replacing any previous text under `name`
    pub async fn set(&self, name: impl Into<String>, text: impl Into<String>) {
        self.templates.write().await.insert(name.into(), text.into());
    }
}

#[async_trait]
impl TemplateLoader for InMemoryTemplateStore {
    async fn load(&self, name: &str) -> Result<String, TemplateError> {
        self.templates
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))
    }
}

/// Replace every known `{{name}}` placeholder in `template` in one pass.
///
/// Each `}}` closes the nearest `{{` before it, so stray braces in front of a
/// placeholder are kept as text. Substituted values are never rescanned.
pub fn render(template: &str, fields: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(close) = rest.find("}}") {
        let head = &rest[..close];
        let value = head
            .rfind("{{")
            .and_then(|open| fields.get(&head[open + 2..]).map(|value| (open, value)));

        match value {
            Some((open, value)) => {
                out.push_str(&head[..open]);
                out.push_str(value);
            }
            None => out.push_str(&rest[..close + 2]),
        }
        rest = &rest[close + 2..];
    }

    out.push_str(rest);
    out
}

/// `dd/mm/yyyy às HH:MM`, or empty when absent.
pub fn format_datetime(value: Option<&NaiveDateTime>) -> String {
    value
        .map(|dt| dt.format("%d/%m/%Y às %H:%M").to_string())
        .unwrap_or_default()
}

/// Placeholder values for the announcement template.
pub fn announcement_fields(
    payload: &AnnouncementCreated,
    branding: &BrandingConfig,
    year: i32,
) -> HashMap<&'static str, String> {
    let text = |value: &Option<String>| value.clone().unwrap_or_default();

    HashMap::from([
        ("type", text(&payload.category)),
        ("title", text(&payload.title)),
        ("content", text(&payload.content)),
        ("createdAt", format_datetime(payload.published_at.as_ref())),
        ("year", year.to_string()),
        ("contact", branding.contact.clone()),
        ("websiteUrl", branding.website_url.clone()),
        ("contactUrl", branding.contact_url.clone()),
    ])
}

/// Render the announcement body using the current local year.
pub fn render_announcement(
    template: &str,
    payload: &AnnouncementCreated,
    branding: &BrandingConfig,
) -> String {
    let year = chrono::Local::now().year();
    render(template, &announcement_fields(payload, branding, year))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn payload() -> AnnouncementCreated {
        AnnouncementCreated {
            id: 1,
            title: Some("Reunião de condomínio".to_string()),
            content: Some("Sexta às 19h no salão.".to_string()),
            category: Some("EVENTO".to_string()),
            published_at: NaiveDate::from_ymd_opt(2024, 3, 15)
                .unwrap()
                .and_hms_opt(10, 30, 0),
            token: "abc".to_string(),
        }
    }

    fn empty_payload() -> AnnouncementCreated {
        AnnouncementCreated {
            id: 2,
            title: None,
            content: None,
            category: None,
            published_at: None,
            token: "abc".to_string(),
        }
    }

    #[test]
    fn test_render_replaces_every_occurrence() {
        let fields = HashMap::from([("name", "Ana".to_string())]);
        assert_eq!(render("{{name}} e {{name}}", &fields), "Ana e Ana");
    }

    #[test]
    fn test_render_keeps_unknown_and_unclosed_tokens() {
        let fields = HashMap::from([("name", "Ana".to_string())]);
        assert_eq!(
            render("{{greeting}}, {{name}} {{oops", &fields),
            "{{greeting}}, Ana {{oops"
        );
    }

    #[test]
    fn test_render_substitutes_after_stray_braces() {
        let fields = HashMap::from([("title", "Aviso".to_string())]);
        assert_eq!(render("{{a {{title}}", &fields), "{{a Aviso");
        assert_eq!(render("{{{title}}}", &fields), "{Aviso}");
        assert_eq!(render("}} {{title}}", &fields), "}} Aviso");
    }

    #[test]
    fn test_render_is_single_pass() {
        let fields = HashMap::from([
            ("title", "{{content}}".to_string()),
            ("content", "secret".to_string()),
        ]);
        assert_eq!(render("{{title}}", &fields), "{{content}}");
    }

    #[test]
    fn test_format_datetime() {
        assert_eq!(
            format_datetime(payload().published_at.as_ref()),
            "15/03/2024 às 10:30"
        );
        assert_eq!(format_datetime(None), "");
    }

    #[test]
    fn test_absent_fields_render_empty() {
        let fields = announcement_fields(&empty_payload(), &BrandingConfig::default(), 2025);
        let body = render("{{type}}|{{title}}|{{content}}|{{createdAt}}|{{year}}", &fields);

        assert_eq!(body, "||||2025");
        assert!(!body.contains("null"));
    }

    #[tokio::test]
    async fn test_default_template_renders_all_fields() {
        let template = InMemoryTemplateStore::with_defaults()
            .load(ANNOUNCEMENT_CREATED_TEMPLATE)
            .await
            .unwrap();
        let body = render_announcement(&template, &payload(), &BrandingConfig::default());

        assert!(body.contains("Reunião de condomínio"));
        assert!(body.contains("Sexta às 19h no salão."));
        assert!(body.contains("EVENTO"));
        assert!(body.contains("15/03/2024 às 10:30"));
        assert!(body.contains(&chrono::Local::now().year().to_string()));
        assert!(body.contains("contato@gmail.com"));
        assert!(body.contains("IrmãosPelluci.com"));
        assert!(!body.contains("{{"));
    }

    #[tokio::test]
    async fn test_in_memory_store_missing_template() {
        let store = InMemoryTemplateStore::new();
        let err = store.load("missing.html").await.unwrap_err();
        assert!(matches!(err, TemplateError::NotFound(name) if name == "missing.html"));

        store.set("missing.html", "<p>{{title}}</p>").await;
        assert_eq!(store.load("missing.html").await.unwrap(), "<p>{{title}}</p>");
    }

    #[tokio::test]
    async fn test_fs_loader_reads_directory() {
        let loader = FsTemplateLoader::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates"));

        let text = loader.load(ANNOUNCEMENT_CREATED_TEMPLATE).await.unwrap();
        assert!(text.contains("{{title}}"));

        assert!(matches!(
            loader.load("nope.html").await,
            Err(TemplateError::NotFound(_))
        ));
        assert!(matches!(
            loader.load("../Cargo.toml").await,
            Err(TemplateError::NotFound(_))
        ));
    }
}
