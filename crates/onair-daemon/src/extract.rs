//! Tolerant field extraction from the upstream status page.
//!
//! Each field is one row of a table: a primary pattern, an optional looser
//! secondary pattern, and a literal default.  Rows are evaluated
//! independently, so a miss on one field never blanks another.
//!
//! Evaluation law for a row:
//!   1. primary matches         -> its trimmed capture (blank means absent)
//!   2. else secondary matches  -> its trimmed capture (blank means absent)
//!   3. else                    -> `ExtractionMiss`
//! Absent values resolve to the row default in [`ExtractionTable::value`].
use regex::Regex;
use tracing::debug;

use crate::fetch::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    StreamTitle,
    StreamGenre,
    CurrentSong,
    Bitrate,
    CurrentListeners,
    MaxListeners,
    PeakListeners,
    AverageListenTime,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StreamTitle => "stream title",
            Self::StreamGenre => "stream genre",
            Self::CurrentSong => "current song",
            Self::Bitrate => "bitrate",
            Self::CurrentListeners => "current listeners",
            Self::MaxListeners => "max listeners",
            Self::PeakListeners => "peak listeners",
            Self::AverageListenTime => "average listen time",
        }
    }
}

pub struct FieldRule {
    pub field: Field,
    primary: Regex,
    secondary: Option<Regex>,
    default: String,
}

impl FieldRule {
    pub fn new(
        field: Field,
        primary: &str,
        secondary: Option<&str>,
        default: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            field,
            primary: Regex::new(primary)?,
            secondary: secondary.map(Regex::new).transpose()?,
            default: default.into(),
        })
    }

    /// A row for a `Label: value` pair.  The primary pattern wants the value
    /// alone in the table cell right after the label; the secondary one
    /// accepts the value anywhere later on the same line, past inline
    /// formatting tags.
    pub fn labelled(field: Field, label: &str, default: impl Into<String>) -> Result<Self, regex::Error> {
        let label = regex::escape(label);
        let strict = format!(r"(?i){label}:?\s*</td>\s*<td[^>]*>([^<]*)</td>");
        let loose = format!(
            r"(?i){label}:?(?:[^\S\r\n]|</?(?:td|font|b|strong|span)\b[^>]*>)*([^<\r\n]*)"
        );
        Self::new(field, &strict, Some(&loose), default)
    }

    pub fn default_value(&self) -> &str {
        &self.default
    }

    /// `Ok(None)` means a pattern matched but captured only whitespace.
    pub fn capture(&self, html: &str) -> Result<Option<String>, FetchError> {
        if let Some(raw) = first_capture(&self.primary, html) {
            return Ok(clean(raw));
        }
        if let Some(raw) = self.secondary.as_ref().and_then(|re| first_capture(re, html)) {
            return Ok(clean(raw));
        }
        Err(FetchError::ExtractionMiss(self.field.name()))
    }
}

fn first_capture<'h>(re: &Regex, html: &'h str) -> Option<&'h str> {
    re.captures(html).and_then(|c| c.get(1)).map(|m| m.as_str())
}

fn clean(raw: &str) -> Option<String> {
    let text = raw.replace("&nbsp;", " ").replace("&amp;", "&");
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// The rows used for the status page.
pub struct ExtractionTable {
    rules: Vec<FieldRule>,
}

impl ExtractionTable {
    /// `station_name` is the fallback stream title.
    pub fn new(station_name: &str) -> Result<Self, regex::Error> {
        let rules = vec![
            FieldRule::labelled(Field::StreamTitle, "Stream Title", station_name)?,
            FieldRule::labelled(Field::StreamGenre, "Stream Genre", "Variados")?,
            FieldRule::labelled(Field::CurrentSong, "Current Song", "Sem informação")?,
            FieldRule::new(
                Field::Bitrate,
                r"(?i)(\d+)\s*kbps",
                Some(r"(?i)bitrate:?\D{0,80}?(\d+)"),
                "128",
            )?,
            FieldRule::new(
                Field::CurrentListeners,
                r"(?i)(\d+) of \d+ listeners",
                Some(r"(?i)current listeners:?\D{0,80}?(\d+)"),
                "0",
            )?,
            FieldRule::new(
                Field::MaxListeners,
                r"(?i)\d+ of (\d+) listeners",
                Some(r"(?i)max(?:imum)? listeners:?\D{0,80}?(\d+)"),
                "1000",
            )?,
            FieldRule::new(
                Field::PeakListeners,
                r"(?i)listener peak:?\D{0,80}?(\d+)",
                Some(r"(?is)peak.*?(\d+)"),
                "0",
            )?,
            FieldRule::new(
                Field::AverageListenTime,
                r"(?is)average listen time.*?<b>([^<]+)<",
                Some(r"(?i)average listen time:?(?:[^\S\r\n]|</?(?:td|font|b)\b[^>]*>)*([^<\r\n]*)"),
                "0:00",
            )?,
        ];
        Ok(Self { rules })
    }

    pub fn rule(&self, field: Field) -> Option<&FieldRule> {
        self.rules.iter().find(|r| r.field == field)
    }

    /// The extracted value, or `None` when nothing usable matched.
    pub fn lookup(&self, html: &str, field: Field) -> Option<String> {
        let rule = self.rule(field)?;
        match rule.capture(html) {
            Ok(value) => value,
            Err(e) => {
                debug!("extract: {}", e);
                None
            }
        }
    }

    /// The extracted value, or the row default.
    pub fn value(&self, html: &str, field: Field) -> String {
        match self.lookup(html, field) {
            Some(v) => v,
            None => self
                .rule(field)
                .map(|r| r.default_value().to_string())
                .unwrap_or_default(),
        }
    }

    /// Numeric fields; unparsable captures fall back to the row default.
    pub fn number(&self, html: &str, field: Field) -> u64 {
        self.value(html, field)
            .parse()
            .ok()
            .or_else(|| self.rule(field).and_then(|r| r.default_value().parse().ok()))
            .unwrap_or(0)
    }
}
