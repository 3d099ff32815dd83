//! Background script execution and result extraction.
//!
//! Scripts that want to hand structured data back print it between
//! [`RESULTS_START`] and [`RESULTS_END`], one JSON value per line.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{BridgeClient, CLIENT_MARGIN};
use crate::bridge::Payload;
use crate::error::{PaletteError, PaletteResult};

pub const RESULTS_START: &str = "###RESULTS###";
pub const RESULTS_END: &str = "###END###";

/// Prefix the instance puts on every line a script prints.
const SCRIPT_OUTPUT_PREFIX: &str = "*** Script: ";

static LINE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("line break pattern is valid"));

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));

static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(?:(amp|lt|gt|quot|apos|nbsp)|#(\d+)|#[xX]([0-9a-fA-F]+));")
        .expect("entity pattern is valid")
});

#[derive(Debug, Clone)]
pub struct ScriptOptions {
    /// Application scope; the bridge uses `global` when unset.
    pub scope: Option<String>,
    /// Overrides the configured script deadline.
    pub timeout: Option<Duration>,
    pub start_marker: String,
    pub end_marker: String,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            scope: None,
            timeout: None,
            start_marker: RESULTS_START.to_string(),
            end_marker: RESULTS_END.to_string(),
        }
    }
}

impl ScriptOptions {
    pub fn scoped(scope: &str) -> Self {
        Self {
            scope: Some(scope.to_string()),
            ..Self::default()
        }
    }
}

/// One line of a script's result block.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptRecord {
    Json(Value),
    /// A line that did not parse as JSON, kept verbatim.
    Raw(String),
}

impl ScriptRecord {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ScriptRecord::Json(value) => Some(value),
            ScriptRecord::Raw(_) => None,
        }
    }
}

impl BridgeClient {
    /// Run a background script and return the raw HTML output page.
    pub async fn run_script(&self, script: &str, options: &ScriptOptions) -> PaletteResult<String> {
        let payload = Payload::RunScript {
            script: script.to_string(),
            scope: options.scope.clone(),
        };
        let wait = options
            .timeout
            .map(|t| t + CLIENT_MARGIN)
            .unwrap_or_else(|| self.script_wait());

        match self.send(payload, wait).await? {
            Payload::RunScriptResponse { error: Some(e), .. } => Err(e.into()),
            Payload::RunScriptResponse { html, .. } => Ok(html.unwrap_or_default()),
            other => Err(PaletteError::MalformedResponse(format!(
                "Unexpected bridge reply: {}",
                other.message_type()
            ))),
        }
    }

    /// Run a script and return the raw text between the markers, or `None`
    /// when they are absent.
    pub async fn run_script_and_extract(
        &self,
        script: &str,
        options: &ScriptOptions,
    ) -> PaletteResult<Option<String>> {
        let html = self.run_script(script, options).await?;
        Ok(extract_between(&html, &options.start_marker, &options.end_marker)
            .map(str::to_string))
    }

    /// Run a script and parse its result block into records.
    pub async fn run_script_and_parse(
        &self,
        script: &str,
        options: &ScriptOptions,
    ) -> PaletteResult<Vec<ScriptRecord>> {
        let html = self.run_script(script, options).await?;
        Ok(parse_records_between(
            &html,
            &options.start_marker,
            &options.end_marker,
        ))
    }
}

/// Text strictly between the first `start` and the next `end` after it.
/// Markers are literal text.
pub fn extract_between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = text.find(start)? + start.len();
    let len = text[from..].find(end)?;
    Some(&text[from..from + len])
}

/// Turn a script output page back into the text the script printed.
pub fn normalize_html(html: &str) -> String {
    let text = LINE_BREAK.replace_all(html, "\n");
    let text = TAG.replace_all(&text, "");
    // Single pass, so `&amp;lt;` decodes to `&lt;` and no further.
    let text = ENTITY.replace_all(&text, decode_entity);

    text.lines()
        .map(|line| line.strip_prefix(SCRIPT_OUTPUT_PREFIX).unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entity(caps: &regex::Captures) -> String {
    if let Some(named) = caps.get(1) {
        return match named.as_str() {
            "amp" => "&",
            "lt" => "<",
            "gt" => ">",
            "quot" => "\"",
            "apos" => "'",
            _ => " ",
        }
        .to_string();
    }

    let code = match (caps.get(2), caps.get(3)) {
        (Some(dec), _) => dec.as_str().parse::<u32>().ok(),
        (_, Some(hex)) => u32::from_str_radix(hex.as_str(), 16).ok(),
        _ => None,
    };
    match code.and_then(char::from_u32) {
        Some(c) => c.to_string(),
        None => caps[0].to_string(),
    }
}

/// Parse the result block of a script output page using the default
/// markers.
pub fn parse_records(html: &str) -> Vec<ScriptRecord> {
    parse_records_between(html, RESULTS_START, RESULTS_END)
}

/// Each non-empty line between the markers is one record; lines that are
/// not JSON are kept as [`ScriptRecord::Raw`].
///
/// Best-effort: a marker printed inside a record, or a JSON value split
/// across lines, will not survive.
pub fn parse_records_between(html: &str, start: &str, end: &str) -> Vec<ScriptRecord> {
    let text = normalize_html(html);
    let Some(block) = extract_between(&text, start, end) else {
        return Vec::new();
    };

    block
        .lines()
        .map(|line| line.trim())
        .map(|line| line.strip_prefix(SCRIPT_OUTPUT_PREFIX.trim_end()).unwrap_or(line).trim())
        .filter(|line| !line.is_empty() && *line != start && *line != end)
        .map(|line| match serde_json::from_str(line) {
            Ok(value) => ScriptRecord::Json(value),
            Err(_) => ScriptRecord::Raw(line.to_string()),
        })
        .collect()
}
