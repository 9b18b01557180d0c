use crate::config::Feedback;
use anyhow::{Context, Result};
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Cleans user-entered description text before it goes into a report.
#[derive(Debug, Clone)]
pub struct DescriptionSanitizer {
    cfg: Feedback,
    redact: Vec<Regex>,
}

impl DescriptionSanitizer {
    pub fn new(cfg: &Feedback) -> Result<Self> {
        let redact = cfg
            .redact_patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("compiling redact pattern {p}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            cfg: cfg.clone(),
            redact,
        })
    }

    /// Leaves text untouched.
    pub fn passthrough() -> Self {
        Self {
            cfg: Feedback {
                normalize_unicode: false,
                normalize_newlines: false,
                trim_trailing_whitespace: false,
                control_chars_to_sanitize: Vec::new(),
                redact_patterns: Vec::new(),
                redaction: String::new(),
                max_description_chars: 0,
            },
            redact: Vec::new(),
        }
    }

    pub fn apply(&self, text: &str) -> String {
        let mut s = text.to_string();

        if self.cfg.normalize_newlines {
            s = s.replace("\r\n", "\n");
        }

        if self.cfg.normalize_unicode {
            s = s.nfkc().collect::<String>();
        }

        s = strip_control_chars(&s, &self.cfg.control_chars_to_sanitize);

        if self.cfg.trim_trailing_whitespace {
            s = s
                .lines()
                .map(str::trim_end)
                .collect::<Vec<_>>()
                .join("\n");
        }

        for re in &self.redact {
            s = re.replace_all(&s, self.cfg.redaction.as_str()).into_owned();
        }

        if self.cfg.max_description_chars > 0 && s.chars().count() > self.cfg.max_description_chars {
            s = s.chars().take(self.cfg.max_description_chars).collect();
        }

        s
    }
}

fn strip_control_chars(s: &str, codes: &[u8]) -> String {
    if codes.is_empty() {
        return s.to_string();
    }

    let mut mask = [false; 128];
    for &code in codes {
        if (code as usize) < mask.len() {
            mask[code as usize] = true;
        }
    }

    s.chars()
        .filter(|&ch| {
            // Line structure survives even when these codes are listed.
            if ch == '\n' || ch == '\r' || ch == '\t' {
                return true;
            }
            let cp = ch as u32;
            cp >= 128 || !mask[cp as usize]
        })
        .collect()
}
