//! Strategy parameter sets
//!
//! Token cohorts carry different risk schedules. Each cohort is a tagged
//! variant with its own stop-loss, take-profit, and trailing thresholds;
//! dispatch is by match, never by string-keyed lookup.

use crate::config::StrategyConfig;

/// Strategy cohort for the active token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    /// Newly launched token; volatile, wide stop, aggressive target
    Fresh,
    /// Recently listed but past launch; default schedule, looser target
    New,
    /// Established high-volume token; tight stop, conservative target
    Top,
    #[default]
    Default,
}

impl StrategyKind {
    /// Parse a scanner-provided cohort label
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_uppercase().as_str() {
            "FRESH" => StrategyKind::Fresh,
            "NEW" => StrategyKind::New,
            "TOP" => StrategyKind::Top,
            _ => StrategyKind::Default,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StrategyKind::Fresh => "FRESH",
            StrategyKind::New => "NEW",
            StrategyKind::Top => "TOP",
            StrategyKind::Default => "DEFAULT",
        }
    }
}

/// Resolved per-cohort thresholds, all fractions of entry price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyThresholds {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub trailing_stop_pct: f64,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
}

impl StrategyThresholds {
    /// Resolve thresholds for a cohort from the configured defaults
    pub fn resolve(kind: StrategyKind, config: &StrategyConfig) -> Self {
        let base = Self {
            stop_loss_pct: config.default_stop_loss_pct,
            take_profit_pct: config.default_take_profit_pct,
            trailing_stop_pct: config.trailing_stop_pct,
            rsi_oversold: 35.0,
            rsi_overbought: 70.0,
        };

        match kind {
            // Wide stop, aggressive target: fresh launches whip around
            StrategyKind::Fresh => Self {
                stop_loss_pct: base.stop_loss_pct * 2.0,
                take_profit_pct: base.take_profit_pct * 2.0,
                ..base
            },
            StrategyKind::New => base,
            // Tight stop, conservative target for established tokens
            StrategyKind::Top => Self {
                stop_loss_pct: base.stop_loss_pct * 0.4,
                take_profit_pct: base.take_profit_pct * 0.5,
                rsi_overbought: 75.0,
                ..base
            },
            StrategyKind::Default => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_round_trip() {
        for kind in [
            StrategyKind::Fresh,
            StrategyKind::New,
            StrategyKind::Top,
            StrategyKind::Default,
        ] {
            assert_eq!(StrategyKind::from_label(kind.label()), kind);
        }
        assert_eq!(StrategyKind::from_label("fresh"), StrategyKind::Fresh);
        assert_eq!(StrategyKind::from_label("unknown"), StrategyKind::Default);
    }

    #[test]
    fn test_thresholds_ordering() {
        let config = StrategyConfig::default();
        let fresh = StrategyThresholds::resolve(StrategyKind::Fresh, &config);
        let default = StrategyThresholds::resolve(StrategyKind::Default, &config);
        let top = StrategyThresholds::resolve(StrategyKind::Top, &config);

        // Stop widths: top < default < fresh
        assert!(top.stop_loss_pct < default.stop_loss_pct);
        assert!(default.stop_loss_pct < fresh.stop_loss_pct);

        // Targets: top < default < fresh
        assert!(top.take_profit_pct < default.take_profit_pct);
        assert!(default.take_profit_pct < fresh.take_profit_pct);

        // Defaults mirror the config
        assert_eq!(default.stop_loss_pct, config.default_stop_loss_pct);
        assert_eq!(default.take_profit_pct, config.default_take_profit_pct);
        assert_eq!(default.trailing_stop_pct, config.trailing_stop_pct);
    }
}
