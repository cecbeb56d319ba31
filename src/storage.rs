// SPDX-License-Identifier: GPL-3.0-only

//! Recording and clip filename generation
//!
//! Templates use `{variable}` or `{variable:format}` tokens, matched
//! case-insensitively. Date/time formats accept the `yyyy`/`MM`/`dd`/`HH`/
//! `mm`/`ss` token style the presets are written in. After substitution the
//! result is made filesystem-safe.

use crate::clock::Clock;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

const DEFAULT_DATE_FORMAT: &str = "yyyy-MM-dd";
const DEFAULT_TIME_FORMAT: &str = "HH-mm-ss";
const DEFAULT_DATETIME_FORMAT: &str = "yyyyMMdd_HHmmss";

/// Call-site substitution values
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub preset: String,
    pub timecode: String,
    pub name: String,
    /// Extra variables; keys are matched case-insensitively
    pub custom: HashMap<String, String>,
}

impl TemplateContext {
    pub fn with_preset(preset: impl Into<String>) -> Self {
        Self {
            preset: preset.into(),
            ..Default::default()
        }
    }
}

/// Template-driven filename generator with a process-local counter
pub struct FilenameGenerator {
    clock: Arc<dyn Clock>,
    counter: Mutex<u64>,
}

impl FilenameGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            counter: Mutex::new(0),
        }
    }

    /// Expand `template` and sanitise the result
    pub fn generate(&self, template: &str, ctx: &TemplateContext) -> String {
        let now = self.clock.now_utc();
        let expanded = self.expand(template, ctx, now);
        sanitize_filename(&expanded)
    }

    /// Expand `template` into a path under `dir`, suffixing `_NNN` on
    /// collision and falling back to a random id after 999 attempts
    pub fn generate_unique(
        &self,
        template: &str,
        dir: &Path,
        extension: &str,
        ctx: &TemplateContext,
    ) -> PathBuf {
        let base = self.generate(template, ctx);
        let candidate = dir.join(format!("{}.{}", base, extension));
        if !candidate.exists() {
            return candidate;
        }
        for n in 1..=999 {
            let candidate = dir.join(format!("{}_{:03}.{}", base, n, extension));
            if !candidate.exists() {
                return candidate;
            }
        }
        let fallback = dir.join(format!("{}_{}.{}", base, short_guid(), extension));
        debug!(path = %fallback.display(), "Collision suffixes exhausted, using random id");
        fallback
    }

    fn expand(&self, template: &str, ctx: &TemplateContext, now: DateTime<Utc>) -> String {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '{' {
                out.push(c);
                continue;
            }
            let mut token = String::new();
            let mut closed = false;
            for t in chars.by_ref() {
                if t == '}' {
                    closed = true;
                    break;
                }
                token.push(t);
            }
            if !closed {
                // Dangling brace, keep it literal
                out.push('{');
                out.push_str(&token);
                break;
            }

            let (key, fmt) = match token.split_once(':') {
                Some((k, f)) => (k.to_ascii_lowercase(), Some(f)),
                None => (token.to_ascii_lowercase(), None),
            };

            let value = match key.as_str() {
                "date" => format_datetime(now, fmt.unwrap_or(DEFAULT_DATE_FORMAT)),
                "time" => format_datetime(now, fmt.unwrap_or(DEFAULT_TIME_FORMAT)),
                "datetime" => format_datetime(now, fmt.unwrap_or(DEFAULT_DATETIME_FORMAT)),
                "year" => format!("{:04}", now.year()),
                "month" => format!("{:02}", now.month()),
                "day" => format!("{:02}", now.day()),
                "hour" => format!("{:02}", now.hour()),
                "minute" => format!("{:02}", now.minute()),
                "second" => format!("{:02}", now.second()),
                "counter" => {
                    let digits = fmt.and_then(|f| f.parse::<usize>().ok()).unwrap_or(3);
                    let mut counter = self.counter.lock().unwrap();
                    *counter += 1;
                    format!("{:0width$}", counter, width = digits)
                }
                "guid" => short_guid(),
                "hostname" => whoami::fallible::hostname().unwrap_or_else(|_| "host".into()),
                "username" => whoami::username(),
                "preset" => ctx.preset.clone(),
                "timecode" => ctx.timecode.clone(),
                "name" => {
                    if ctx.name.is_empty() {
                        // Drop the separators around an empty name
                        if out.ends_with('_') {
                            out.pop();
                        }
                        if chars.peek() == Some(&'_') {
                            chars.next();
                        }
                        continue;
                    }
                    ctx.name.clone()
                }
                other => ctx
                    .custom
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(other))
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default(),
            };
            out.push_str(&value);
        }
        out
    }
}

/// First 8 hex chars of a fresh random id
fn short_guid() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Format `dt` using `yyyy`/`yy`/`MM`/`dd`/`HH`/`mm`/`ss` tokens;
/// unrecognised characters pass through literally
fn format_datetime(dt: DateTime<Utc>, fmt: &str) -> String {
    let mut out = String::with_capacity(fmt.len() + 4);
    let chars: Vec<char> = fmt.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let run = chars[i..].iter().take_while(|&&x| x == c).count();
        match c {
            'y' if run >= 4 => out.push_str(&format!("{:04}", dt.year())),
            'y' => out.push_str(&format!("{:02}", dt.year() % 100)),
            'M' => out.push_str(&format!("{:02}", dt.month())),
            'd' => out.push_str(&format!("{:02}", dt.day())),
            'H' => out.push_str(&format!("{:02}", dt.hour())),
            'm' => out.push_str(&format!("{:02}", dt.minute())),
            's' => out.push_str(&format!("{:02}", dt.second())),
            _ => {
                for _ in 0..run {
                    out.push(c);
                }
            }
        }
        i += run;
    }
    out
}

/// Replace filesystem-invalid characters and whitespace with `_`
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
