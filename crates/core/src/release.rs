//! Release note parsing
//!
//! Automatically generated notes look like:
//! ```text
//! ## What's Changed
//! * Fix the widget by @octocat in https://github.com/o/r/pull/12
//!
//! ## New Contributors
//! * @hubot made their first contribution in https://github.com/o/r/pull/13
//! ```
//! Anything else is treated as hand-written text.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::data::Release;
use crate::error::Result;

const WHATS_CHANGED: &str = "What's Changed";
const NEW_CONTRIBUTORS: &str = "New Contributors";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    WhatsChanged,
    NewContributors,
    Text,
}

/// `* <title> by @<user> in <url>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub title: String,
    pub author: String,
    pub url: String,
}

/// `* @<user> made their first contribution in <url>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContributor {
    pub login: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSection {
    pub kind: SectionKind,
    pub content: String,
}

/// Structured view of a release body
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReleaseNotes {
    /// True when the body was produced by the hosting platform's generator
    pub generated: bool,
    pub sections: Vec<ReleaseSection>,
    pub changes: Vec<ChangeEntry>,
    pub new_contributors: Vec<NewContributor>,
}

/// Parser for release bodies
pub struct ReleaseNotesParser {
    change_regex: Regex,
    contributor_regex: Regex,
}

impl ReleaseNotesParser {
    pub fn new() -> Result<Self> {
        let change_regex = Regex::new(r"^[*-]\s+(.+?)\s+by\s+@([\w-]+)\s+in\s+(\S+)\s*$")?;
        let contributor_regex =
            Regex::new(r"^[*-]\s+@([\w-]+)\s+made their first contribution in\s+(\S+)\s*$")?;

        Ok(Self {
            change_regex,
            contributor_regex,
        })
    }

    pub fn parse(&self, body: &str) -> ReleaseNotes {
        let body = body.replace("\r\n", "\n");

        if !body.contains(WHATS_CHANGED) {
            let text = body.trim();
            let sections = if text.is_empty() {
                Vec::new()
            } else {
                vec![ReleaseSection {
                    kind: SectionKind::Text,
                    content: text.to_string(),
                }]
            };
            return ReleaseNotes {
                generated: false,
                sections,
                ..ReleaseNotes::default()
            };
        }

        let mut notes = ReleaseNotes {
            generated: true,
            ..ReleaseNotes::default()
        };

        for block in body.split("\n\n") {
            let block = block.trim();
            if block.is_empty() {
                continue;
            }

            let heading = block.trim_start_matches('#').trim_start();
            let kind = if heading.starts_with(WHATS_CHANGED) {
                SectionKind::WhatsChanged
            } else if heading.starts_with(NEW_CONTRIBUTORS) {
                SectionKind::NewContributors
            } else {
                SectionKind::Text
            };

            for line in block.lines().map(str::trim) {
                if let Some(c) = self.contributor_regex.captures(line) {
                    notes.new_contributors.push(NewContributor {
                        login: c[1].to_string(),
                        url: c[2].to_string(),
                    });
                } else if let Some(c) = self.change_regex.captures(line) {
                    notes.changes.push(ChangeEntry {
                        title: c[1].to_string(),
                        author: c[2].to_string(),
                        url: c[3].to_string(),
                    });
                }
            }

            notes.sections.push(ReleaseSection {
                kind,
                content: block.to_string(),
            });
        }

        notes
    }
}

/// `"<tag> - YYYY-MM-DD"`, or just the tag for unpublished drafts
pub fn release_label(release: &Release) -> String {
    match release.published_at {
        Some(ts) => format!("{} - {}", release.tag_name, ts.format("%Y-%m-%d")),
        None => release.tag_name.clone(),
    }
}
