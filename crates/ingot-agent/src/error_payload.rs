use crate::error::PluginError;

const MAX_MESSAGE_BYTES: usize = 8 * 1024;
const MAX_HINT_BYTES: usize = 2 * 1024;

/// Failure details recorded on a job and its final log line.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FailurePayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl FailurePayload {
    pub fn from_error(err: &PluginError) -> Self {
        Self {
            code: err.code().to_string(),
            message: truncate_utf8(&err.to_string(), MAX_MESSAGE_BYTES),
            hint: err.hint().map(|h| truncate_utf8(&h, MAX_HINT_BYTES)),
        }
    }

    /// Single human-readable line: message, then hint if any.
    pub fn display(&self) -> String {
        match &self.hint {
            Some(hint) => format!("{} ({hint})", self.message),
            None => self.message.clone(),
        }
    }
}

pub fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let suffix = "…(truncated)";
    let keep = max_bytes.saturating_sub(suffix.len()).max(1);
    let mut end = keep.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    let mut out = s[..end].to_string();
    out.push_str(suffix);
    out
}
