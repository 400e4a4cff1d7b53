use serde::Serialize;
use std::collections::BTreeMap;

/// Fixed signed weights per observed classroom behavior, mirroring the
/// vocabulary of the video-analysis service. Labels it may emit that are not
/// listed here weigh 0.
pub const BEHAVIOR_WEIGHTS: &[(&str, f64)] = &[
    ("hand-raising", 2.0),
    ("writing", 1.5),
    ("reading", 1.0),
    ("upright", 0.5),
    ("raise_head", 0.3),
    ("turn_head", 0.0),
    ("book", 0.0),
    ("bow_head", -0.2),
    ("bend", -0.5),
    ("phone", -2.0),
    ("using_phone", -2.0),
    ("sleep", -3.0),
];

/// Contributions this close to zero are treated as neutral; absorbs
/// floating-point noise in weight * proportion.
pub const CONTRIBUTION_EPS: f64 = 1e-6;

pub fn behavior_weight(label: &str) -> f64 {
    BEHAVIOR_WEIGHTS
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, w)| *w)
        .unwrap_or(0.0)
}

/// Per-behavior share of the labeled time. Negative second counts are
/// clamped to zero; a zero or missing denominator yields an empty map rather
/// than a division error. The key set otherwise matches the input.
pub fn proportions(seconds: &BTreeMap<String, f64>, total_labeled_seconds: i64) -> BTreeMap<String, f64> {
    if total_labeled_seconds <= 0 || seconds.is_empty() {
        return BTreeMap::new();
    }
    let total = total_labeled_seconds as f64;
    seconds
        .iter()
        .map(|(label, sec)| (label.clone(), sec.max(0.0) / total))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BehaviorFlag {
    Positive,
    Negative,
    Neutral,
}

pub fn contribution(label: &str, proportion: f64) -> f64 {
    behavior_weight(label) * proportion
}

pub fn classify(contribution: f64) -> BehaviorFlag {
    if contribution > CONTRIBUTION_EPS {
        BehaviorFlag::Positive
    } else if contribution < -CONTRIBUTION_EPS {
        BehaviorFlag::Negative
    } else {
        BehaviorFlag::Neutral
    }
}

/// Integer active point stored on the attendance row. Rounds half away from
/// zero; the service's scores are non-negative, so 93.5 becomes 94.
pub fn active_point(als_score: f64) -> i64 {
    if als_score.is_finite() {
        als_score.round() as i64
    } else {
        0
    }
}
