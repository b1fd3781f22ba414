//! Pipeline stage identity and per-run tokens.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// One of the three ordered stages of the signing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Legacy JAR-style signing of the unsigned input.
    V1Sign,
    /// Zip alignment of the V1-signed intermediate.
    Align,
    /// V1+V2+V3 signing of the aligned intermediate into the final output.
    FullSign,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 3] = [Stage::V1Sign, Stage::Align, Stage::FullSign];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::V1Sign => "v1-sign",
            Stage::Align => "align",
            Stage::FullSign => "full-sign",
        }
    }

    /// Human-readable description, used for progress output.
    pub fn description(&self) -> &'static str {
        match self {
            Stage::V1Sign => "Signing with v1 (JAR) scheme",
            Stage::Align => "Aligning archive entries",
            Stage::FullSign => "Signing with v1 + v2 + v3 schemes",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unique token for one pipeline run, embedded in intermediate file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunToken(pub Ulid);

impl RunToken {
    /// Creates a new random token.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parses a token from its string form.
    pub fn from_string(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for RunToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string().to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_names() {
        let names: Vec<_> = Stage::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, ["v1-sign", "align", "full-sign"]);
    }

    #[test]
    fn test_stage_serde() {
        let json = serde_json::to_string(&Stage::FullSign).unwrap();
        assert_eq!(json, "\"full-sign\"");
    }

    #[test]
    fn test_run_token_is_lowercase_and_parses_back() {
        let token = RunToken::new();
        let text = token.to_string();
        assert_eq!(text, text.to_lowercase());
        assert_eq!(RunToken::from_string(&text).unwrap(), token);
    }
}
