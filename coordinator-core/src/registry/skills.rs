//! Skill import and repository.
//!
//! Skills are markdown documents with front-matter metadata. Imports accept
//! inline content or a URL, validate size and encoding, and land as
//! `pending` until an operator approves.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::error::{Error, Result};
use crate::types::{SkillRecord, SkillStatus, MAX_SKILL_SIZE};

/// Import request: inline markdown or a URL to fetch it from.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SkillImportRequest {
    pub slug: Option<String>,
    pub url: Option<String>,
    pub content: Option<String>,
    pub name: Option<String>,
    #[serde(default = "default_managed_by")]
    pub managed_by: String,
}

fn default_managed_by() -> String {
    "agent".to_string()
}

/// Reduce arbitrary text to a URL-safe slug.
#[must_use]
pub fn slugify(value: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for ch in value.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "skill".to_string()
    } else {
        slug
    }
}

/// Parsed front-matter fields.
#[derive(Debug, Default)]
struct FrontMatter {
    name: Option<String>,
    description: Option<String>,
    version: Option<String>,
    tags: Vec<String>,
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Parse `key: value` front matter delimited by `---` lines.
///
/// Returns the parsed metadata and the markdown body.
fn parse_front_matter(document: &str) -> (FrontMatter, String) {
    let mut front = FrontMatter::default();
    let trimmed = document.trim_start();
    if !trimmed.starts_with("---") {
        return (front, document.to_string());
    }

    let after_open = &trimmed[3..];
    let Some(close) = after_open.find("\n---") else {
        return (front, document.to_string());
    };
    let header = &after_open[..close];
    let body = after_open[close + 4..].trim_start_matches('\n').to_string();

    for line in header.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim().to_string();
        match key.as_str() {
            "name" | "title" => front.name = Some(value),
            "description" => front.description = Some(value),
            "version" => front.version = Some(value),
            "tags" => {
                front.tags = value
                    .trim_matches(|c| c == '[' || c == ']')
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
            }
            _ => {
                front.extra.insert(key, json!(value));
            }
        }
    }
    (front, body)
}

/// In-memory catalog of imported skills.
#[derive(Debug, Default)]
pub struct SkillRepository {
    skills: RwLock<HashMap<String, SkillRecord>>,
}

impl SkillRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and parse a skill document, persisting it as `pending`.
    ///
    /// # Errors
    ///
    /// Rejects documents over 100 KB, documents with embedded NUL bytes, and
    /// requests carrying neither content nor URL.
    pub async fn import(&self, request: SkillImportRequest) -> Result<SkillRecord> {
        let content = match (&request.content, &request.url) {
            (Some(content), _) => content.clone(),
            (None, Some(url)) => fetch_markdown(url).await?,
            (None, None) => {
                return Err(Error::Validation(
                    "skill import requires content or url".to_string(),
                ))
            }
        };

        if content.len() >= MAX_SKILL_SIZE {
            return Err(Error::Validation(format!(
                "skill document exceeds {MAX_SKILL_SIZE} bytes"
            )));
        }
        if content.contains('\0') {
            return Err(Error::Validation(
                "skill document contains embedded NUL bytes".to_string(),
            ));
        }
        if content.trim().is_empty() {
            return Err(Error::Validation("skill document is empty".to_string()));
        }

        let (front, body) = parse_front_matter(&content);
        let name = request
            .name
            .or(front.name)
            .unwrap_or_else(|| "Unnamed Skill".to_string());
        let slug = request.slug.unwrap_or_else(|| slugify(&name));

        let record = SkillRecord {
            slug: slug.clone(),
            name,
            description: front
                .description
                .unwrap_or_else(|| first_paragraph(&body)),
            version: front.version,
            tags: front.tags,
            content: body,
            metadata: serde_json::Value::Object(front.extra),
            source_url: request.url,
            managed_by: request.managed_by,
            status: SkillStatus::Pending,
            updated_at: Utc::now(),
        };

        info!(slug = %record.slug, "skill imported pending approval");
        self.skills.write().insert(slug, record.clone());
        Ok(record)
    }

    /// List skills, optionally filtered by status.
    #[must_use]
    pub fn list(&self, status: Option<SkillStatus>) -> Vec<SkillRecord> {
        let mut skills: Vec<SkillRecord> = self
            .skills
            .read()
            .values()
            .filter(|s| status.is_none_or(|wanted| s.status == wanted))
            .cloned()
            .collect();
        skills.sort_by(|a, b| a.slug.cmp(&b.slug));
        skills
    }

    /// Fetch one skill by slug.
    pub fn get(&self, slug: &str) -> Result<SkillRecord> {
        self.skills
            .read()
            .get(slug)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("skill {slug}")))
    }

    /// Operator approval/rejection.
    pub fn set_status(&self, slug: &str, status: SkillStatus) -> Result<SkillRecord> {
        let mut skills = self.skills.write();
        let record = skills
            .get_mut(slug)
            .ok_or_else(|| Error::NotFound(format!("skill {slug}")))?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}

fn first_paragraph(body: &str) -> String {
    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .unwrap_or("")
        .chars()
        .take(200)
        .collect()
}

async fn fetch_markdown(url: &str) -> Result<String> {
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        return Err(Error::Upstream {
            service: "skill-import".to_string(),
            message: format!("{url} returned {}", response.status()),
        });
    }
    if let Some(length) = response.content_length() {
        if length as usize >= MAX_SKILL_SIZE {
            return Err(Error::Validation(format!(
                "skill document exceeds {MAX_SKILL_SIZE} bytes"
            )));
        }
    }
    Ok(response.text().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKILL_DOC: &str = "---\nname: Flake Debugging\ndescription: Debug NixOS flake evaluation failures\nversion: 1.2\ntags: nixos, flakes\nauthor: ops\n---\n# Flake Debugging\n\nStart from the evaluation trace.\n";

    #[tokio::test]
    async fn test_import_parses_front_matter() {
        let repo = SkillRepository::new();
        let record = repo
            .import(SkillImportRequest {
                content: Some(SKILL_DOC.to_string()),
                ..SkillImportRequest::default()
            })
            .await
            .expect("import");

        assert_eq!(record.slug, "flake-debugging");
        assert_eq!(record.name, "Flake Debugging");
        assert_eq!(record.version.as_deref(), Some("1.2"));
        assert_eq!(record.tags, vec!["nixos", "flakes"]);
        assert_eq!(record.status, SkillStatus::Pending);
        assert_eq!(record.metadata["author"], "ops");
        assert!(record.content.contains("evaluation trace"));
    }

    #[tokio::test]
    async fn test_import_rejects_oversize_and_binary() {
        let repo = SkillRepository::new();

        let oversize = "x".repeat(MAX_SKILL_SIZE + 1);
        let err = repo
            .import(SkillImportRequest {
                content: Some(oversize),
                ..SkillImportRequest::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let err = repo
            .import(SkillImportRequest {
                content: Some("hello\0world".to_string()),
                ..SkillImportRequest::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_skill_without_front_matter_gets_derived_description() {
        let repo = SkillRepository::new();
        let record = repo
            .import(SkillImportRequest {
                content: Some("# Title\n\nThe body explains things.\n".to_string()),
                name: Some("Plain Skill".to_string()),
                ..SkillImportRequest::default()
            })
            .await
            .expect("import");
        assert_eq!(record.slug, "plain-skill");
        assert_eq!(record.description, "The body explains things.");
    }

    #[tokio::test]
    async fn test_approval_flow() {
        let repo = SkillRepository::new();
        repo.import(SkillImportRequest {
            content: Some(SKILL_DOC.to_string()),
            ..SkillImportRequest::default()
        })
        .await
        .expect("import");

        assert_eq!(repo.list(Some(SkillStatus::Pending)).len(), 1);
        repo.set_status("flake-debugging", SkillStatus::Approved)
            .expect("approve");
        assert!(repo.list(Some(SkillStatus::Pending)).is_empty());
        assert_eq!(
            repo.get("flake-debugging").expect("get").status,
            SkillStatus::Approved
        );
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Flake Debugging!"), "flake-debugging");
        assert_eq!(slugify("  --- "), "skill");
    }
}
