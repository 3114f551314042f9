use std::collections::BTreeMap;

use ndarray::{ArrayView, Dimension};
use serde::Serialize;

/// Coverage percentage above which a scan is reported tumor-positive.
const DETECTION_THRESHOLD_PCT: f64 = 1.0;
/// Report tier cut points.
const SIGNIFICANT_PCT: f64 = 5.0;
const MODERATE_PCT: f64 = 1.0;

/// Tissue classes produced by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TumorClass {
    Background,
    NecroticCore,
    Edema,
    Enhancing,
}

impl TumorClass {
    pub const ALL: [TumorClass; 4] = [
        TumorClass::Background,
        TumorClass::NecroticCore,
        TumorClass::Edema,
        TumorClass::Enhancing,
    ];

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            TumorClass::Background => "NOT tumor",
            TumorClass::NecroticCore => "NECROTIC/CORE",
            TumorClass::Edema => "EDEMA",
            TumorClass::Enhancing => "ENHANCING",
        }
    }

    pub fn is_tumor(self) -> bool {
        !matches!(self, TumorClass::Background)
    }
}

/// Per-class position counts for one class map.
///
/// Classes that never occur carry no entry; readers must treat a missing
/// key as a count of zero, which [`ClassStatistics::count`] does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassStatistics(BTreeMap<u8, usize>);

impl ClassStatistics {
    pub fn count(&self, class: u8) -> usize {
        self.0.get(&class).copied().unwrap_or(0)
    }

    /// Total number of evaluated positions.
    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Occurring classes in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, usize)> + '_ {
        self.0.iter().map(|(&class, &count)| (class, count))
    }
}

/// Count class occurrences in a class map of any rank.
pub fn aggregate<D: Dimension>(class_map: ArrayView<'_, u8, D>) -> ClassStatistics {
    let mut counts = BTreeMap::new();
    for &class in class_map.iter() {
        *counts.entry(class).or_insert(0usize) += 1;
    }
    ClassStatistics(counts)
}

/// Report tier for the measured tumor coverage. Fixed policy, not tunable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Assessment {
    Significant,
    Moderate,
    Minimal,
}

impl Assessment {
    fn for_percentage(percentage: f64) -> Self {
        if percentage > SIGNIFICANT_PCT {
            Assessment::Significant
        } else if percentage > MODERATE_PCT {
            Assessment::Moderate
        } else {
            Assessment::Minimal
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Assessment::Significant => "SIGNIFICANT TUMOR PRESENCE",
            Assessment::Moderate => "MODERATE TUMOR ACTIVITY",
            Assessment::Minimal => "MINIMAL TUMOR ACTIVITY",
        }
    }
}

/// Derived coverage metrics for one class map.
#[derive(Debug, Clone, Serialize)]
pub struct TumorSummary {
    pub total_pixels: usize,
    pub tumor_pixels: usize,
    pub tumor_percentage: f64,
    pub tumor_detected: bool,
    pub assessment: Assessment,
}

/// Reduce class statistics to the coverage summary.
pub fn summarize(statistics: &ClassStatistics) -> TumorSummary {
    let total_pixels = statistics.total();
    let tumor_pixels = TumorClass::ALL
        .iter()
        .filter(|class| class.is_tumor())
        .map(|class| statistics.count(class.id()))
        .sum::<usize>();

    let tumor_percentage = if total_pixels > 0 {
        100.0 * tumor_pixels as f64 / total_pixels as f64
    } else {
        0.0
    };

    TumorSummary {
        total_pixels,
        tumor_pixels,
        tumor_percentage,
        tumor_detected: tumor_percentage > DETECTION_THRESHOLD_PCT,
        assessment: Assessment::for_percentage(tumor_percentage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    #[test]
    fn counts_sum_to_total_positions_and_absent_classes_are_omitted() {
        let mut class_map = Array2::<u8>::zeros((10, 10));
        class_map[[0, 0]] = 2;
        class_map[[0, 1]] = 2;
        class_map[[5, 5]] = 3;

        let stats = aggregate(class_map.view());

        assert_eq!(stats.total(), 100);
        assert_eq!(stats.count(0), 97);
        assert_eq!(stats.count(2), 2);
        assert_eq!(stats.count(3), 1);
        // Class 1 never occurs: no entry, count reads as zero.
        assert!(stats.iter().all(|(class, _)| class != 1));
        assert_eq!(stats.count(1), 0);
    }

    #[test]
    fn aggregate_handles_volume_class_maps() {
        let class_map = Array3::<u8>::ones((4, 4, 4));
        let stats = aggregate(class_map.view());
        assert_eq!(stats.count(1), 64);
        assert_eq!(stats.total(), 64);
    }

    #[test]
    fn all_background_map_yields_zero_coverage() {
        let class_map = Array2::<u8>::zeros((16, 16));
        let summary = summarize(&aggregate(class_map.view()));

        assert_eq!(summary.tumor_percentage, 0.0);
        assert_eq!(summary.tumor_pixels, 0);
        assert!(!summary.tumor_detected);
        assert_eq!(summary.assessment, Assessment::Minimal);
    }

    #[test]
    fn two_percent_edema_is_detected() {
        // 2 of 100 positions are edema, the rest background.
        let mut class_map = Array2::<u8>::zeros((10, 10));
        class_map[[0, 0]] = 2;
        class_map[[9, 9]] = 2;

        let summary = summarize(&aggregate(class_map.view()));

        assert!(summary.tumor_detected);
        assert!((summary.tumor_percentage - 2.0).abs() < 1e-9);
        assert_eq!(summary.assessment, Assessment::Moderate);
    }

    #[test]
    fn empty_statistics_summarize_to_zero() {
        let summary = summarize(&ClassStatistics::default());
        assert_eq!(summary.total_pixels, 0);
        assert_eq!(summary.tumor_percentage, 0.0);
        assert!(!summary.tumor_detected);
    }

    #[test]
    fn assessment_tiers_follow_the_fixed_cut_points() {
        assert_eq!(Assessment::for_percentage(0.5), Assessment::Minimal);
        assert_eq!(Assessment::for_percentage(1.0), Assessment::Minimal);
        assert_eq!(Assessment::for_percentage(1.1), Assessment::Moderate);
        assert_eq!(Assessment::for_percentage(5.0), Assessment::Moderate);
        assert_eq!(Assessment::for_percentage(5.1), Assessment::Significant);
    }

    #[test]
    fn class_labels_match_the_reporting_vocabulary() {
        assert_eq!(TumorClass::from_id(0), Some(TumorClass::Background));
        assert_eq!(TumorClass::from_id(4), None);
        assert_eq!(TumorClass::Edema.label(), "EDEMA");
        assert!(!TumorClass::Background.is_tumor());
        assert!(TumorClass::Enhancing.is_tumor());
    }
}
