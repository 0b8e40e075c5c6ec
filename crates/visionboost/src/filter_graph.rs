//! Maps a quality tier and a set of enhancement toggles to an ordered
//! ffmpeg filter chain. Nothing here touches a process or the filesystem.

use std::collections::BTreeSet;
use std::fmt;
use crate::job::{Enhancement, QualityTier};

/// A single filter with its `key=value` (or bare positional) parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterStage {
    pub name: &'static str,
    pub params: Vec<(Option<&'static str>, String)>,
}

impl FilterStage {
    fn new(name: &'static str) -> Self {
        Self { name, params: Vec::new() }
    }

    fn named(mut self, key: &'static str, value: impl ToString) -> Self {
        self.params.push((Some(key), value.to_string()));
        self
    }

    fn positional(mut self, value: impl ToString) -> Self {
        self.params.push((None, value.to_string()));
        self
    }

    /// Value of a named parameter, if present
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| *k == Some(key))
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)?;
        for (i, (key, value)) in self.params.iter().enumerate() {
            f.write_str(if i == 0 { "=" } else { ":" })?;
            match key {
                Some(key) => write!(f, "{}={}", key, value)?,
                None => f.write_str(value)?,
            }
        }
        Ok(())
    }
}

/// Ordered filter chain; the first stage is always the tier's scale stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterChain {
    tier: QualityTier,
    enhancements: Vec<Enhancement>,
    stages: Vec<FilterStage>,
}

impl FilterChain {
    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    pub fn tier(&self) -> QualityTier {
        self.tier
    }

    /// Enhancements that contributed a stage, in canonical order
    pub fn applied_enhancements(&self) -> &[Enhancement] {
        &self.enhancements
    }
}

/// Comma-joined form accepted by ffmpeg's `-vf`
impl fmt::Display for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}

/// Scale up to the tier's frame, keeping aspect ratio by expansion and
/// rounding both sides to even values for block-based encoders
fn scale_stage(tier: QualityTier) -> FilterStage {
    let (width, height) = tier.resolution();
    FilterStage::new("scale")
        .named("w", width)
        .named("h", height)
        .named("force_original_aspect_ratio", "increase")
        .named("force_divisible_by", 2)
}

fn enhancement_stage(enhancement: Enhancement) -> FilterStage {
    match enhancement {
        Enhancement::NoiseReduction => FilterStage::new("hqdn3d")
            .positional(4)
            .positional(3)
            .positional(6)
            .positional(4.5),
        Enhancement::Stabilization => FilterStage::new("deshake"),
        Enhancement::ColorGrade => FilterStage::new("eq")
            .named("contrast", 1.08)
            .named("saturation", 1.15)
            .named("gamma", 1.03),
        Enhancement::Sharpening => FilterStage::new("unsharp")
            .positional(5)
            .positional(5)
            .positional("1.0")
            .positional(5)
            .positional(5)
            .positional("0.0"),
    }
}

/// Build the filter chain for a tier and a requested set of enhancements.
///
/// Each distinct enhancement contributes one stage, always in the order
/// noise reduction, stabilization, color grade, sharpening, whatever order
/// the caller listed them in.
pub fn build(tier: QualityTier, enhancements: &[Enhancement]) -> FilterChain {
    let selected: BTreeSet<Enhancement> = enhancements.iter().copied().collect();

    let mut stages = Vec::with_capacity(1 + selected.len());
    stages.push(scale_stage(tier));
    stages.extend(selected.iter().copied().map(enhancement_stage));

    FilterChain {
        tier,
        enhancements: selected.into_iter().collect(),
        stages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_tier() -> impl Strategy<Value = QualityTier> {
        prop_oneof![
            Just(QualityTier::FullHd),
            Just(QualityTier::Uhd4k),
            Just(QualityTier::Uhd8k),
        ]
    }

    fn any_enhancements() -> impl Strategy<Value = Vec<Enhancement>> {
        prop::collection::vec(prop::sample::select(Enhancement::ALL.to_vec()), 0..8)
    }

    #[test]
    fn test_scale_stage_rendering() {
        let chain = build(QualityTier::Uhd4k, &[]);
        assert_eq!(chain.tier(), QualityTier::Uhd4k);
        assert!(chain.applied_enhancements().is_empty());
        assert_eq!(
            chain.to_string(),
            "scale=w=3840:h=2160:force_original_aspect_ratio=increase:force_divisible_by=2"
        );
    }

    #[test]
    fn test_full_chain_rendering() {
        let chain = build(
            QualityTier::FullHd,
            &[
                Enhancement::Sharpening,
                Enhancement::ColorGrade,
                Enhancement::Stabilization,
                Enhancement::NoiseReduction,
            ],
        );
        assert_eq!(
            chain.to_string(),
            "scale=w=1920:h=1080:force_original_aspect_ratio=increase:force_divisible_by=2,\
             hqdn3d=4:3:6:4.5,deshake,eq=contrast=1.08:saturation=1.15:gamma=1.03,\
             unsharp=5:5:1.0:5:5:0.0"
        );
    }

    #[test]
    fn test_swapped_inputs_build_identical_chains() {
        let a = build(QualityTier::Uhd8k, &[Enhancement::Sharpening, Enhancement::NoiseReduction]);
        let b = build(QualityTier::Uhd8k, &[Enhancement::NoiseReduction, Enhancement::Sharpening]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_duplicates_are_idempotent() {
        let chain = build(
            QualityTier::FullHd,
            &[Enhancement::Sharpening, Enhancement::Sharpening, Enhancement::Sharpening],
        );
        assert_eq!(chain.stages().len(), 2);
        assert_eq!(chain.applied_enhancements(), &[Enhancement::Sharpening]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_order_independent_of_request_order(
            tier in any_tier(),
            list in any_enhancements(),
            seed in any::<u64>(),
        ) {
            let original = build(tier, &list);
            // deterministic shuffle from the seed
            let mut list = list;
            let len = list.len();
            if len > 1 {
                for i in 0..len {
                    let j = ((seed.rotate_left(i as u32) ^ i as u64) % len as u64) as usize;
                    list.swap(i, j);
                }
            }
            prop_assert_eq!(original, build(tier, &list));
        }

        #[test]
        fn test_scale_targets_match_tier_and_are_even(tier in any_tier(), list in any_enhancements()) {
            let chain = build(tier, &list);
            let scale = &chain.stages()[0];
            prop_assert_eq!(scale.name, "scale");

            let width: u32 = scale.param("w").unwrap().parse().unwrap();
            let height: u32 = scale.param("h").unwrap().parse().unwrap();
            let expected = match tier {
                QualityTier::FullHd => (1920, 1080),
                QualityTier::Uhd4k => (3840, 2160),
                QualityTier::Uhd8k => (7680, 4320),
            };
            prop_assert_eq!((width, height), expected);
            prop_assert_eq!(width % 2, 0);
            prop_assert_eq!(height % 2, 0);
            prop_assert_eq!(scale.param("force_original_aspect_ratio"), Some("increase"));
        }

        #[test]
        fn test_one_stage_per_distinct_enhancement(tier in any_tier(), list in any_enhancements()) {
            let chain = build(tier, &list);
            let distinct: BTreeSet<_> = list.iter().collect();
            prop_assert_eq!(chain.stages().len(), 1 + distinct.len());

            let applied = chain.applied_enhancements();
            prop_assert!(applied.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
