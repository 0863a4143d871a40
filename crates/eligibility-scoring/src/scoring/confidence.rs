use serde::Serialize;

use super::config::ScoringConfig;
use super::domain::{ProbabilityInterval, Stratum};

/// Qualitative reading of a confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    Low,
    Moderate,
    High,
}

impl ConfidenceBand {
    pub fn from_score(confidence: f64) -> Self {
        if confidence >= 0.75 {
            ConfidenceBand::High
        } else if confidence >= 0.5 {
            ConfidenceBand::Moderate
        } else {
            ConfidenceBand::Low
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ConfidenceBand::Low => "low",
            ConfidenceBand::Moderate => "moderate",
            ConfidenceBand::High => "high",
        }
    }
}

/// Point estimate, interval, and confidence for one stratum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceEstimate {
    pub probability: Option<f64>,
    pub interval: ProbabilityInterval,
    pub confidence: f64,
    pub band: ConfidenceBand,
}

/// Converts strata into probabilities with Wilson score intervals.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceCalculator {
    z: f64,
    min_sample_size: u64,
}

impl ConfidenceCalculator {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            z: z_for_confidence(config.confidence_level),
            min_sample_size: config.min_sample_size,
        }
    }

    pub fn estimate(&self, stratum: &Stratum) -> ConfidenceEstimate {
        let probability = stratum.probability();
        let interval = wilson_interval(stratum.successes(), stratum.sample_size(), self.z);
        let confidence = base_confidence(
            stratum.sample_size(),
            interval.width(),
            self.min_sample_size,
        );

        ConfidenceEstimate {
            probability,
            interval,
            confidence,
            band: ConfidenceBand::from_score(confidence),
        }
    }
}

/// Wilson score interval, clamped to `[0, 1]` and widened to always bracket `k/n`.
pub fn wilson_interval(successes: u64, trials: u64, z: f64) -> ProbabilityInterval {
    if trials == 0 {
        return ProbabilityInterval::full();
    }

    let n = trials as f64;
    let p_hat = successes.min(trials) as f64 / n;
    let z2 = z * z;

    let denom = 1.0 + z2 / n;
    let center = (p_hat + z2 / (2.0 * n)) / denom;
    let radius = (z * (p_hat * (1.0 - p_hat) / n + z2 / (4.0 * n * n)).sqrt()) / denom;

    let lower = (center - radius).clamp(0.0, 1.0).min(p_hat);
    let upper = (center + radius).clamp(0.0, 1.0).max(p_hat);

    ProbabilityInterval {
        lower_bound: lower,
        upper_bound: upper,
    }
}

/// Saturating confidence: `n / (n + MIN_N)` discounted by half the interval width.
///
/// Stays at or below 0.5 while `n < MIN_N` and tends to 1.0 as samples accumulate.
pub fn base_confidence(sample_size: u64, interval_width: f64, min_sample_size: u64) -> f64 {
    if sample_size == 0 {
        return 0.0;
    }

    let n = sample_size as f64;
    let saturation = n / (n + min_sample_size.max(1) as f64);
    let precision = 1.0 - interval_width.clamp(0.0, 1.0) / 2.0;
    (saturation * precision).clamp(0.0, 1.0)
}

/// Two-sided critical value for a confidence level, e.g. 0.95 → 1.96.
pub fn z_for_confidence(level: f64) -> f64 {
    inverse_normal_cdf(0.5 + level.clamp(0.0, 0.999_999) / 2.0)
}

// Acklam's rational approximation; relative error below 1.2e-9.
fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_211_027e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    let p = p.clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON);

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}
