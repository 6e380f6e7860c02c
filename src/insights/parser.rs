//! Segmentation of free-form generative output into the three insight
//! sections
//!
//! Text is grouped into blocks separated by blank lines. A block whose first
//! line is a header naming one of the sections opens that section; following
//! blocks without a header of their own continue it. When all three sections
//! are found the text is parsed directly, otherwise the degraded fallback
//! keeps the full text as key insights and salvages what it can.

use super::{InsightSections, ParseMode};

/// Appended to recommendations that were cut short
pub const TRUNCATION_MARKER: &str = "... (ver insights completos)";

/// Used when no action items can be found in the text
pub const DEFAULT_ACTION_ITEMS: &str = "Ver recomendaciones para elementos de acción detallados";

/// Phrases after which the degraded parser looks for action bullets
const ACTION_MARKERS: [&str; 4] = [
    "ACCIONES INMEDIATAS",
    "PRÓXIMOS PASOS",
    "IMMEDIATE ACTIONS",
    "NEXT STEPS",
];

const MAX_HEADER_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    Recommendations,
    KeyInsights,
    ActionItems,
}

/// Classify a header by keyword, case-insensitively, in Spanish or English
fn classify(header: &str) -> Option<SectionKind> {
    let upper = header.to_uppercase();
    if upper.contains("RECOMMENDATION") || upper.contains("RECOMENDACI") {
        Some(SectionKind::Recommendations)
    } else if upper.contains("ACTION") || upper.contains("ACCION") || upper.contains("ACCIÓN") {
        Some(SectionKind::ActionItems)
    } else if upper.contains("INSIGHT")
        || upper.contains("ANALYSIS")
        || upper.contains("ANÁLISIS")
        || upper.contains("ANALISIS")
    {
        Some(SectionKind::KeyInsights)
    } else {
        None
    }
}

/// Header text of a line, if the line reads as a header.
///
/// Markdown headings always count. Otherwise, after stripping emphasis and
/// leading numbering, a short line is a header when it ends with a colon or
/// has no lower-case letters.
fn header_text(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.starts_with(['•', '-']) || trimmed.starts_with("* ") {
        return None;
    }
    if let Some(rest) = trimmed.strip_prefix('#') {
        return Some(rest.trim_start_matches('#').trim());
    }

    let stripped = trimmed
        .trim_matches(|c: char| c == '*' || c == '_')
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .trim_start_matches(['.', ')'])
        .trim()
        .trim_matches(|c: char| c == '*' || c == '_')
        .trim();

    if stripped.is_empty() || stripped.chars().count() > MAX_HEADER_CHARS {
        return None;
    }
    if let Some(head) = stripped.strip_suffix(':') {
        return Some(head.trim_end_matches(|c: char| c == '*' || c == '_').trim());
    }
    let letters = stripped.chars().filter(|c| c.is_alphabetic()).count();
    if letters >= 3 && !stripped.chars().any(char::is_lowercase) {
        return Some(stripped);
    }
    None
}

fn is_bullet(line: &str) -> bool {
    let trimmed = line.trim_start();
    if trimmed.starts_with(['•', '-', '*']) {
        return true;
    }
    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && trimmed[digits..].starts_with(['.', ')'])
}

/// Split text into non-empty blocks of lines separated by blank lines
fn blocks(text: &str) -> Vec<Vec<&str>> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Keep the first `max_chars` characters, on a character boundary
fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => (&text[..byte], true),
        None => (text, false),
    }
}

#[derive(Debug, Clone)]
pub struct SectionParser {
    truncation_chars: usize,
    max_action_items: usize,
}

impl Default for SectionParser {
    fn default() -> Self {
        Self::new(300, 5)
    }
}

impl SectionParser {
    pub fn new(truncation_chars: usize, max_action_items: usize) -> Self {
        Self {
            truncation_chars,
            max_action_items,
        }
    }

    /// Parse generative output. Never fails.
    pub fn parse(&self, text: &str) -> (InsightSections, ParseMode) {
        match self.parse_direct(text) {
            Some(sections) => (sections, ParseMode::Direct),
            None => (self.parse_degraded(text), ParseMode::Degraded),
        }
    }

    fn parse_direct(&self, text: &str) -> Option<InsightSections> {
        let mut recommendations: Vec<String> = Vec::new();
        let mut key_insights: Vec<String> = Vec::new();
        let mut action_items: Vec<String> = Vec::new();
        let mut current: Option<SectionKind> = None;

        for block in blocks(text) {
            let header = header_text(block[0]);
            let body = match header {
                Some(h) => match classify(h) {
                    Some(kind) => {
                        current = Some(kind);
                        &block[1..]
                    }
                    None => {
                        // An unrelated header closes the open section
                        current = None;
                        continue;
                    }
                },
                None => &block[..],
            };

            let target = match current {
                Some(SectionKind::Recommendations) => &mut recommendations,
                Some(SectionKind::KeyInsights) => &mut key_insights,
                Some(SectionKind::ActionItems) => &mut action_items,
                None => continue,
            };
            // Push even an empty body so a bare header still counts as found
            target.push(body.join("\n").trim().to_string());
        }

        if recommendations.is_empty() || key_insights.is_empty() || action_items.is_empty() {
            return None;
        }

        let join = |parts: Vec<String>| {
            parts
                .into_iter()
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n")
        };
        Some(InsightSections {
            recommendations: join(recommendations),
            key_insights: join(key_insights),
            action_items: join(action_items),
        })
    }

    fn parse_degraded(&self, text: &str) -> InsightSections {
        let trimmed = text.trim();
        let (head, truncated) = truncate_chars(trimmed, self.truncation_chars);
        let recommendations = if truncated {
            format!("{head}{TRUNCATION_MARKER}")
        } else {
            head.to_string()
        };

        let actions = self.scan_action_items(trimmed);
        let action_items = if actions.is_empty() {
            DEFAULT_ACTION_ITEMS.to_string()
        } else {
            actions.join("\n")
        };

        InsightSections {
            recommendations,
            key_insights: text.to_string(),
            action_items,
        }
    }

    /// Bulleted or numbered lines following the first action marker.
    ///
    /// Collection stops at the item cap, or at a non-indented line without
    /// a bullet once at least one item has been collected.
    fn scan_action_items<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut lines = text.lines();
        let found = lines.by_ref().any(|line| {
            let upper = line.to_uppercase();
            ACTION_MARKERS.iter().any(|m| upper.contains(m))
        });
        if !found {
            return Vec::new();
        }

        let mut items = Vec::new();
        for line in lines {
            if items.len() >= self.max_action_items {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            if is_bullet(line) {
                items.push(line.trim());
            } else if !items.is_empty() && !line.starts_with([' ', '\t']) {
                break;
            }
        }
        items
    }
}
