use crate::job::{Enhancement, EnhancementStatus, QualityTier, Stat};
use crate::transcode::TranscodeOutcome;

/// What the synthesizer is told about a finished transcode
#[derive(Debug, Clone)]
pub struct ReportInput<'a> {
    pub source_name: &'a str,
    pub size_mb: f64,
    pub tier: QualityTier,
    /// Distinct enhancements that contributed a filter stage
    pub enhancements: &'a [Enhancement],
    pub outcome: &'a TranscodeOutcome,
}

/// Human-readable summary plus display statistics for a job
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub status: EnhancementStatus,
    pub text: String,
    pub stats: Vec<Stat>,
}

/// Scores a completed job. Swap in a real quality-assessment engine by
/// implementing this trait.
pub trait ReportSynthesizer: Send + Sync {
    fn synthesize(&self, input: &ReportInput<'_>) -> Report;
}

/// Deterministic stand-in: the processing time and improvement figures are
/// illustrative, derived from size, tier and enhancement count
#[derive(Debug, Default, Clone)]
pub struct PlaceholderReport;

impl PlaceholderReport {
    fn processing_estimate_secs(size_mb: f64, tier: QualityTier, enhancement_count: usize) -> u64 {
        let per_mb = match tier {
            QualityTier::FullHd => 0.8,
            QualityTier::Uhd4k => 2.0,
            QualityTier::Uhd8k => 5.0,
        };
        let secs = size_mb * per_mb * (1.0 + 0.25 * enhancement_count as f64);
        secs.ceil().max(1.0) as u64
    }

    fn improvement_pct(tier: QualityTier, enhancement_count: usize) -> u32 {
        let base = match tier {
            QualityTier::FullHd => 18,
            QualityTier::Uhd4k => 32,
            QualityTier::Uhd8k => 45,
        };
        (base + 7 * enhancement_count as u32).min(95)
    }
}

impl ReportSynthesizer for PlaceholderReport {
    fn synthesize(&self, input: &ReportInput<'_>) -> Report {
        let count = input.enhancements.len();
        let models = Stat::new(format!("{}x", count), "Models");
        let quality = Stat::new(input.tier.label(), "Quality");

        match input.outcome {
            TranscodeOutcome::Enhanced { .. } => {
                let secs = Self::processing_estimate_secs(input.size_mb, input.tier, count);
                let pct = Self::improvement_pct(input.tier, count);
                Report {
                    status: EnhancementStatus::Enhanced,
                    text: format!(
                        "Enhanced \"{}\" to {} with {} enhancement(s) applied.",
                        input.source_name, input.tier, count
                    ),
                    stats: vec![
                        quality,
                        models,
                        Stat::new(format!("{}s", secs), "Processing"),
                        Stat::new(format!("+{}%", pct), "Improvement"),
                    ],
                }
            }
            TranscodeOutcome::Fallback { .. } => Report {
                status: EnhancementStatus::OriginalReturned,
                text: format!(
                    "Enhancement unavailable for \"{}\"; the original was returned unchanged \
                     ({} requested, {} enhancement(s) not applied).",
                    input.source_name, input.tier, count
                ),
                stats: vec![
                    quality,
                    models,
                    Stat::new("0s", "Processing"),
                    Stat::new("0%", "Improvement"),
                ],
            },
        }
    }
}
