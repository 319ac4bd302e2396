//! Comprehensive Rules document parser.
//!
//! The plain-text Comprehensive Rules are laid out as:
//!
//! ```text
//! <title, effective date, table of contents>
//! Glossary
//!
//! Credits
//!
//! <numbered rules>.
//!
//! Glossary
//!
//! <glossary entries>.
//!
//!
//! Credits
//! ```
//!
//! [`parse`] cuts the document at those markers and turns the rules into
//! retrieval-sized groups: every group is one numbered rule (`100.1.`) with
//! its lettered subrules (`100.1a`, `100.1b`, ...) and is prefixed with the
//! section it sits under, e.g. `...under section 100. General:`. A handful of
//! subrules are long enough on their own that each one becomes its own group
//! (see [`BIG_HEADERS`]).

use anyhow::{anyhow, bail, Result};
use tracing::{debug, info};

const TOC_END_MARKER: &str = "\nGlossary\n\nCredits\n\n";
const RULES_END_MARKER: &str = ".\n\nGlossary\n\n";
const GLOSSARY_END_MARKER: &str = ".\n\n\nCredits";

/// Groups above this size are reported after parsing.
pub const RULE_GROUP_MAX_LENGTH: usize = 4000;

/// Rules whose lettered subrules are each emitted as a separate group.
pub const BIG_HEADERS: &[&str] = &[
    "107.3", "123.6", "205.3", "206.3", "508.1", "509.1", "601.2", "607.2", "608.2", "611.2",
    "702.16", "702.19", "702.26", "704.5", "707.9", "707.10", "800.4", "807.4",
];

#[derive(Debug, Clone, PartialEq)]
pub struct RulesDocument {
    pub toc: String,
    pub rule_groups: Vec<String>,
    pub glossary: Vec<String>,
}

/// Parse the full text of the Comprehensive Rules.
pub fn parse(content: &str) -> Result<RulesDocument> {
    let content = content.replace("\r\n", "\n");

    let toc_end = content
        .find(TOC_END_MARKER)
        .ok_or_else(|| anyhow!("Beginning of TOC document not found."))?;
    let toc = content[..toc_end].trim();
    if toc.is_empty() {
        bail!("Beginning of TOC document content empty.");
    }

    let rules_start = toc_end + TOC_END_MARKER.len();
    let rules_len = content[rules_start..]
        .find(RULES_END_MARKER)
        .ok_or_else(|| anyhow!("Rules part of document not found."))?;
    let rules_text = content[rules_start..rules_start + rules_len].trim();
    if rules_text.is_empty() {
        bail!("Rules part of document content empty.");
    }

    let gloss_start = rules_start + rules_len + RULES_END_MARKER.len();
    let gloss_len = content[gloss_start..]
        .find(GLOSSARY_END_MARKER)
        .ok_or_else(|| anyhow!("Glossary part of document not found."))?;
    let gloss_text = content[gloss_start..gloss_start + gloss_len].trim();
    if gloss_text.is_empty() {
        bail!("Glossary part of document content empty.");
    }

    let rules = split_paragraphs(rules_text);
    debug!(count = rules.len(), "rules paragraphs");
    let rule_groups = group_rules(&rules);

    for group in rule_groups.iter().filter(|g| g.len() > RULE_GROUP_MAX_LENGTH) {
        info!(
            first_rule = first_rule_header(group).unwrap_or("?"),
            len = group.len(),
            "rule group over {} chars",
            RULE_GROUP_MAX_LENGTH
        );
    }

    let glossary = split_paragraphs(gloss_text);
    info!(
        groups = rule_groups.len(),
        glossary_entries = glossary.len(),
        "parsed comprehensive rules"
    );

    Ok(RulesDocument {
        toc: toc.to_string(),
        rule_groups,
        glossary,
    })
}

/// Split on runs of two or more newlines, trimming each piece.
fn split_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Leading rule number: a run of word chars and dots followed by a space.
fn rule_header(rule: &str) -> Option<&str> {
    let end = rule
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_' || *c == '.'))
        .map(|(i, _)| i)?;
    if end == 0 || !rule[end..].starts_with(' ') {
        return None;
    }
    Some(&rule[..end])
}

fn first_rule_header(group: &str) -> Option<&str> {
    group.split("\n\n").nth(1).and_then(rule_header)
}

struct Grouper<'a> {
    groups: Vec<String>,
    current: Vec<&'a str>,
    section: Option<&'a str>,
}

impl<'a> Grouper<'a> {
    fn flush(&mut self) {
        if self.current.is_empty() {
            return;
        }
        self.groups.push(format!(
            "...under section {}:\n\n{}",
            self.section.unwrap_or("None"),
            self.current.join("\n\n")
        ));
        self.current.clear();
    }
}

/// Group rule paragraphs by section and numbered rule.
///
/// - header shorter than 4 (`1.`): chapter title, closes the group
/// - header of length 4 (`100.`): new section, closes the group
/// - header of 6+ ending in `.` (`100.1.`): starts a new group
/// - anything else (`100.1a`): joins the group; for [`BIG_HEADERS`] the
///   group is closed right after
/// - no header at all: joins the group, or opens one if none is open
pub fn group_rules<S: AsRef<str>>(rules: &[S]) -> Vec<String> {
    let mut g = Grouper {
        groups: Vec::new(),
        current: Vec::new(),
        section: None,
    };

    for rule in rules {
        let rule = rule.as_ref();
        let Some(header) = rule_header(rule) else {
            // Unnumbered paragraph, keep it with whatever it follows or open a group
            debug!(paragraph = %rule.chars().take(40).collect::<String>(), "no rule number");
            g.current.push(rule);
            continue;
        };

        let len = header.chars().count();
        if len < 4 {
            g.flush();
        } else if len == 4 {
            g.flush();
            g.section = Some(rule);
        } else if len >= 6 && header.ends_with('.') {
            g.flush();
            g.current.push(rule);
        } else {
            g.current.push(rule);
            if BIG_HEADERS.iter().any(|bh| header.starts_with(bh)) {
                g.flush();
            }
        }
    }
    g.flush();

    g.groups
}
