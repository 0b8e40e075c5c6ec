use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::EnhanceError;

/// Target output resolution requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityTier {
    #[serde(rename = "1080p")]
    FullHd,
    #[serde(rename = "4K")]
    Uhd4k,
    #[serde(rename = "8K")]
    Uhd8k,
}

impl QualityTier {
    pub const ALL: [QualityTier; 3] = [QualityTier::FullHd, QualityTier::Uhd4k, QualityTier::Uhd8k];

    /// Target frame size as (width, height)
    pub fn resolution(&self) -> (u32, u32) {
        match self {
            QualityTier::FullHd => (1920, 1080),
            QualityTier::Uhd4k => (3840, 2160),
            QualityTier::Uhd8k => (7680, 4320),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            QualityTier::FullHd => "1080p",
            QualityTier::Uhd4k => "4K",
            QualityTier::Uhd8k => "8K",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for QualityTier {
    type Err = EnhanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1080p" | "1080P" => Ok(QualityTier::FullHd),
            "4K" | "4k" => Ok(QualityTier::Uhd4k),
            "8K" | "8k" => Ok(QualityTier::Uhd8k),
            other => Err(EnhanceError::UnsupportedQuality(other.to_string())),
        }
    }
}

/// Optional processing stage the caller can switch on.
///
/// Variant order is the canonical filter order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Enhancement {
    NoiseReduction,
    Stabilization,
    ColorGrade,
    Sharpening,
}

impl Enhancement {
    pub const ALL: [Enhancement; 4] = [
        Enhancement::NoiseReduction,
        Enhancement::Stabilization,
        Enhancement::ColorGrade,
        Enhancement::Sharpening,
    ];

    /// Parse a toggle identifier, ignoring case, spaces, `_` and `-`.
    /// Returns None for identifiers this build does not know.
    pub fn parse(identifier: &str) -> Option<Self> {
        let normalized: String = identifier
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "noisereduction" | "denoise" => Some(Enhancement::NoiseReduction),
            "stabilization" | "stabilisation" | "stabilize" => Some(Enhancement::Stabilization),
            "colorgrade" | "colorgrading" | "hdr" | "colorhdr" => Some(Enhancement::ColorGrade),
            "sharpening" | "sharpen" => Some(Enhancement::Sharpening),
            _ => None,
        }
    }
}

/// Parse the raw enhancement field (a JSON array of strings).
///
/// Malformed input degrades to an empty list; unknown identifiers are dropped.
/// Request order and duplicates are kept.
pub fn parse_enhancement_list(raw: Option<&str>) -> Vec<Enhancement> {
    let raw = match raw.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => return Vec::new(),
    };

    match serde_json::from_str::<Vec<serde_json::Value>>(raw) {
        Ok(values) => values
            .iter()
            .filter_map(|v| v.as_str())
            .filter_map(Enhancement::parse)
            .collect(),
        Err(e) => {
            log::debug!("Ignoring malformed enhancement list {:?}: {}", raw, e);
            Vec::new()
        }
    }
}

/// Whether the artifact actually went through the filter chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhancementStatus {
    Enhanced,
    /// Transcoding failed; the artifact is a verbatim copy of the upload
    OriginalReturned,
}

/// One labelled value for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    #[serde(rename = "val")]
    pub value: String,
    pub label: String,
}

impl Stat {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// A completed enhancement, as recorded in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancementJob {
    pub id: String,
    /// Caller-supplied filename, display only
    pub source_name: String,
    pub source_size_mb: f64,
    pub quality_tier: QualityTier,
    pub enhancements: Vec<Enhancement>,
    pub status: EnhancementStatus,
    pub output_artifact: String,
    pub download_url: String,
    pub report: String,
    pub stats: Vec<Stat>,
    pub created_at: DateTime<Utc>,
}

/// Byte count to megabytes, rounded to one decimal
pub fn size_in_mb(bytes: u64) -> f64 {
    let mb = bytes as f64 / 1024.0 / 1024.0;
    (mb * 10.0).round() / 10.0
}

/// Generate a fresh opaque job id
pub fn new_job_id() -> String {
    format!("j{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_tier_parsing() {
        assert_eq!("1080p".parse::<QualityTier>().unwrap(), QualityTier::FullHd);
        assert_eq!("4K".parse::<QualityTier>().unwrap(), QualityTier::Uhd4k);
        assert_eq!(" 8k ".parse::<QualityTier>().unwrap(), QualityTier::Uhd8k);

        match "2K".parse::<QualityTier>() {
            Err(EnhanceError::UnsupportedQuality(v)) => assert_eq!(v, "2K"),
            other => panic!("expected UnsupportedQuality, got {:?}", other),
        }
    }

    #[test]
    fn test_quality_tier_serializes_as_label() {
        for tier in QualityTier::ALL {
            let json = serde_json::to_string(&tier).unwrap();
            assert_eq!(json, format!("\"{}\"", tier.label()));
        }
    }

    #[test]
    fn test_enhancement_aliases() {
        assert_eq!(Enhancement::parse("NoiseReduction"), Some(Enhancement::NoiseReduction));
        assert_eq!(Enhancement::parse("noise_reduction"), Some(Enhancement::NoiseReduction));
        assert_eq!(Enhancement::parse("Color HDR"), Some(Enhancement::ColorGrade));
        assert_eq!(Enhancement::parse("sharpen"), Some(Enhancement::Sharpening));
        assert_eq!(Enhancement::parse("Upscale-AI-9000"), None);
    }

    #[test]
    fn test_enhancement_list_degrades_to_empty() {
        assert!(parse_enhancement_list(None).is_empty());
        assert!(parse_enhancement_list(Some("")).is_empty());
        assert!(parse_enhancement_list(Some("not json")).is_empty());
        assert!(parse_enhancement_list(Some(r#"{"a": 1}"#)).is_empty());
    }

    #[test]
    fn test_enhancement_list_keeps_order_and_duplicates() {
        let list = parse_enhancement_list(Some(r#"["Sharpening", 7, "Teleport", "NoiseReduction", "sharpen"]"#));
        assert_eq!(
            list,
            vec![Enhancement::Sharpening, Enhancement::NoiseReduction, Enhancement::Sharpening]
        );
    }

    #[test]
    fn test_size_in_mb_one_decimal() {
        assert_eq!(size_in_mb(0), 0.0);
        assert_eq!(size_in_mb(1024 * 1024), 1.0);
        assert_eq!(size_in_mb(1_572_864), 1.5);
        assert_eq!(size_in_mb(1_100_000), 1.0);
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = new_job_id();
        let b = new_job_id();
        assert!(a.starts_with('j'));
        assert_ne!(a, b);
    }
}
