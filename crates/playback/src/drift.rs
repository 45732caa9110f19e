use timeline::Clock;

use crate::DriftConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriftAction {
    Keep,
    SetRate(f64),
    /// Too far off for rate correction; jump to this local clock at rate 1.
    HardSeek(Clock),
}

/// Rate that pulls a track back towards the master clock.
///
/// `drift` is expected minus actual position, so a positive drift means the
/// track lags and is sped up; a negative drift slows it down.
pub fn correction_rate(drift: Clock, config: &DriftConfig) -> f64 {
    let magnitude = drift.abs();
    if magnitude < config.tolerance {
        return 1.0;
    }
    let x = magnitude.min(config.max_drift) / config.max_drift;
    let rate = 1.0 + x * x * (config.max_rate - 1.0);
    if drift < 0.0 {
        rate.recip()
    } else {
        rate
    }
}

#[derive(Debug, Clone, Default)]
pub struct DriftCorrector {
    config: DriftConfig,
}

impl DriftCorrector {
    pub fn new(config: DriftConfig) -> Self {
        Self { config }
    }

    pub fn assess(&self, expected: Clock, actual: Clock, current_rate: f64) -> DriftAction {
        let drift = expected - actual;
        if drift > self.config.far_behind || -drift > self.config.far_ahead {
            return DriftAction::HardSeek(expected);
        }
        let rate = correction_rate(drift, &self.config);
        if (rate - current_rate).abs() / current_rate > self.config.hysteresis {
            DriftAction::SetRate(rate)
        } else {
            DriftAction::Keep
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_correction_rate_curve() {
        let config = DriftConfig::default();
        assert_eq!(correction_rate(0.04, &config), 1.0);
        assert_eq!(correction_rate(-0.04, &config), 1.0);
        assert!(approx(correction_rate(1.5, &config), 1.5));
        assert!(approx(correction_rate(-1.5, &config), 1.0 / 1.5));
        assert!(approx(correction_rate(10.0, &config), 3.0));
    }

    #[test]
    fn test_far_drift_forces_seek() {
        let corrector = DriftCorrector::default();
        assert_eq!(corrector.assess(5.0, 3.5, 1.0), DriftAction::HardSeek(5.0));
        assert_eq!(corrector.assess(5.0, 5.2, 1.0), DriftAction::HardSeek(5.0));
        assert_eq!(corrector.assess(5.0, 5.05, 1.0), DriftAction::Keep);
    }

    #[test]
    fn test_hysteresis_suppresses_small_changes() {
        let corrector = DriftCorrector::default();
        // 0.3 s behind asks for ~1.02x, within 3% of normal speed.
        assert_eq!(corrector.assess(10.0, 9.7, 1.0), DriftAction::Keep);
        assert!(matches!(corrector.assess(10.0, 9.2, 1.0), DriftAction::SetRate(r) if r > 1.1));
    }

    #[test]
    fn test_rate_settles_without_oscillation() {
        let corrector = DriftCorrector::default();
        let (mut master, mut track, mut rate) = (10.0, 9.1, 1.0);
        let mut changes = Vec::new();
        for _ in 0..60 {
            master += 0.1;
            track += 0.1 * rate;
            match corrector.assess(master, track, rate) {
                DriftAction::SetRate(r) => {
                    changes.push(r);
                    rate = r;
                }
                DriftAction::HardSeek(to) => {
                    track = to;
                    rate = 1.0;
                }
                DriftAction::Keep => {}
            }
        }
        assert!(!changes.is_empty());
        assert!(changes.windows(2).all(|w| w[1] <= w[0]));
        assert!(changes.iter().all(|r| *r >= 1.0));
        assert!(master - track < 0.5);
    }

    #[test]
    fn test_unresponsive_track_keeps_one_rate() {
        let corrector = DriftCorrector::default();
        let mut rate = 1.0;
        let mut changes = 0;
        for step in 0..60 {
            let master = step as f64 * 0.1;
            if let DriftAction::SetRate(r) = corrector.assess(master, master - 0.7, rate) {
                rate = r;
                changes += 1;
            }
        }
        assert_eq!(changes, 1);
    }
}
