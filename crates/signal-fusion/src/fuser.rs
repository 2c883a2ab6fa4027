//! Weighted, exponentially smoothed signal fusion

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::signal::{Reading, SignalSource};
use crate::FusionError;

/// Fusion configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Weight of the motion signal (default: 0.4)
    pub motion_weight: f64,
    /// Weight of the speech signal (default: 0.6, distress in speech is the
    /// stronger indicator)
    pub speech_weight: f64,
    /// Exponential smoothing factor α in (0, 1] (default: 0.3)
    pub smoothing: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            motion_weight: 0.4,
            speech_weight: 0.6,
            smoothing: 0.3,
        }
    }
}

impl FusionConfig {
    /// Check weights and smoothing factor
    pub fn validate(&self) -> Result<(), FusionError> {
        for (signal, value) in [
            (SignalSource::Motion, self.motion_weight),
            (SignalSource::Speech, self.speech_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(FusionError::InvalidWeight { signal, value });
            }
        }

        if self.motion_weight + self.speech_weight <= 0.0 {
            return Err(FusionError::ZeroWeights);
        }

        if !(self.smoothing > 0.0 && self.smoothing <= 1.0) {
            return Err(FusionError::InvalidSmoothing(self.smoothing));
        }

        Ok(())
    }

    fn weight(&self, source: SignalSource) -> f64 {
        match source {
            SignalSource::Motion => self.motion_weight,
            SignalSource::Speech => self.speech_weight,
        }
    }
}

/// Output of one fusion step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusedScore {
    /// Smoothed threat score in [0, 1]
    pub score: f64,
    /// Weighted combination before smoothing
    pub raw: f64,
    /// Share of the motion signal in the weighted sum
    pub motion_contribution: f64,
    /// Share of the speech signal in the weighted sum
    pub speech_contribution: f64,
    /// Number of signals that took part
    pub sources_available: u8,
}

/// Stateless fuser. The only memory is the `previous_score` passed in.
#[derive(Debug, Clone)]
pub struct SignalFuser {
    config: FusionConfig,
}

impl SignalFuser {
    /// Create a fuser, rejecting invalid weights or smoothing
    pub fn new(config: FusionConfig) -> Result<Self, FusionError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuse the latest motion and speech readings with the previous score.
    ///
    /// Weights are re-normalized over the readings that are available, so a
    /// single missing sensor does not deflate the score. With nothing
    /// available the raw value is 0 and the score decays through the same
    /// smoothing instead of dropping at once.
    pub fn fuse(&self, motion: &Reading, speech: &Reading, previous_score: f64) -> FusedScore {
        let previous = if previous_score.is_finite() {
            previous_score.clamp(0.0, 1.0)
        } else {
            0.0
        };

        // (weight, value) per source, None when unavailable or weightless
        let inputs = [
            (SignalSource::Motion, motion),
            (SignalSource::Speech, speech),
        ]
        .map(|(source, reading)| {
            let weight = self.config.weight(source);
            reading
                .value()
                .filter(|_| weight > 0.0)
                .map(|value| (weight, value))
        });

        let weight_sum: f64 = inputs.iter().flatten().map(|(w, _)| w).sum();
        let weighted_sum: f64 = inputs.iter().flatten().map(|(w, v)| w * v).sum();
        let sources_available = inputs.iter().flatten().count() as u8;

        let (raw, shares) = if weight_sum > 0.0 {
            let shares = inputs.map(|input| match input {
                Some((w, v)) if weighted_sum > 0.0 => w * v / weighted_sum,
                Some((w, _)) => w / weight_sum,
                None => 0.0,
            });
            (weighted_sum / weight_sum, shares)
        } else {
            (0.0, [0.0, 0.0])
        };

        let alpha = self.config.smoothing;
        let score = (alpha * raw + (1.0 - alpha) * previous).clamp(0.0, 1.0);

        debug!(
            "Fused score {:.3} (raw {:.3}, previous {:.3}, sources {})",
            score, raw, previous, sources_available
        );

        FusedScore {
            score,
            raw,
            motion_contribution: shares[0],
            speech_contribution: shares[1],
            sources_available,
        }
    }
}

impl Default for SignalFuser {
    fn default() -> Self {
        Self {
            config: FusionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn motion(v: f64) -> Reading {
        Reading::available(SignalSource::Motion, v)
    }

    fn speech(v: f64) -> Reading {
        Reading::available(SignalSource::Speech, v)
    }

    fn no_motion() -> Reading {
        Reading::unavailable(SignalSource::Motion, "camera busy")
    }

    fn no_speech() -> Reading {
        Reading::unavailable(SignalSource::Speech, "decode error")
    }

    #[test]
    fn test_default_weighting_and_smoothing() {
        let fuser = SignalFuser::default();
        let fused = fuser.fuse(&motion(0.5), &speech(1.0), 0.0);

        // raw = 0.4 * 0.5 + 0.6 * 1.0 = 0.8, score = 0.3 * 0.8
        assert!((fused.raw - 0.8).abs() < 1e-9);
        assert!((fused.score - 0.24).abs() < 1e-9);
        assert!((fused.motion_contribution - 0.25).abs() < 1e-9);
        assert!((fused.speech_contribution - 0.75).abs() < 1e-9);
        assert_eq!(fused.sources_available, 2);
    }

    #[test]
    fn test_missing_sensor_renormalizes() {
        let fuser = SignalFuser::default();
        let fused = fuser.fuse(&no_motion(), &speech(0.9), 0.0);

        assert!((fused.raw - 0.9).abs() < 1e-9);
        assert_eq!(fused.motion_contribution, 0.0);
        assert_eq!(fused.speech_contribution, 1.0);
        assert_eq!(fused.sources_available, 1);
    }

    #[test]
    fn test_both_unavailable_decays_slowly() {
        let fuser = SignalFuser::default();
        let fused = fuser.fuse(&no_motion(), &no_speech(), 0.8);

        assert!((fused.score - 0.56).abs() < 1e-9);
        assert_eq!(fused.motion_contribution, 0.0);
        assert_eq!(fused.speech_contribution, 0.0);
        assert_eq!(fused.sources_available, 0);
    }

    #[test]
    fn test_zero_signals_fall_back_to_weight_shares() {
        let fuser = SignalFuser::default();
        let fused = fuser.fuse(&motion(0.0), &speech(0.0), 0.0);

        assert!((fused.motion_contribution - 0.4).abs() < 1e-9);
        assert!((fused.speech_contribution - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_speech_alone_over_many_ticks() {
        let fuser = SignalFuser::default();
        let mut score = 0.5;

        for _ in 0..30 {
            let next = fuser.fuse(&no_motion(), &speech(0.7), score);
            assert_eq!(next.speech_contribution, 1.0);
            assert!(next.score > 0.0);
            score = next.score;
        }

        assert!((score - 0.7).abs() < 1e-3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let negative = FusionConfig {
            motion_weight: -0.1,
            ..Default::default()
        };
        assert!(matches!(
            SignalFuser::new(negative),
            Err(FusionError::InvalidWeight { signal: SignalSource::Motion, .. })
        ));

        let zero = FusionConfig {
            motion_weight: 0.0,
            speech_weight: 0.0,
            ..Default::default()
        };
        assert_eq!(SignalFuser::new(zero).unwrap_err(), FusionError::ZeroWeights);

        let smoothing = FusionConfig {
            smoothing: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            SignalFuser::new(smoothing),
            Err(FusionError::InvalidSmoothing(_))
        ));
    }

    fn reading_strategy(source: SignalSource) -> impl Strategy<Value = Reading> {
        prop_oneof![
            (-0.5f64..1.5).prop_map(move |v| Reading::available(source, v)),
            Just(Reading::unavailable(source, "dropout")),
        ]
    }

    proptest! {
        #[test]
        fn fuse_is_deterministic(
            m in reading_strategy(SignalSource::Motion),
            s in reading_strategy(SignalSource::Speech),
            previous in 0.0f64..=1.0,
        ) {
            let fuser = SignalFuser::default();
            prop_assert_eq!(fuser.fuse(&m, &s, previous), fuser.fuse(&m, &s, previous));
        }

        #[test]
        fn fused_score_stays_bounded(
            m in reading_strategy(SignalSource::Motion),
            s in reading_strategy(SignalSource::Speech),
            previous in -1.0f64..2.0,
        ) {
            let fused = SignalFuser::default().fuse(&m, &s, previous);
            prop_assert!((0.0..=1.0).contains(&fused.score));

            let total = fused.motion_contribution + fused.speech_contribution;
            if fused.sources_available > 0 {
                prop_assert!((total - 1.0).abs() < 1e-9);
            } else {
                prop_assert_eq!(total, 0.0);
            }
        }
    }
}
