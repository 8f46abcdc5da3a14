use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::info;

/// Margin pressure level derived from `usage = margin_used / equity`.
///
/// Monotone in usage: equal usage always maps to the same level.
#[derive(
    Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MarginLevel {
    #[default]
    Safe,
    Normal,
    Warning,
    Danger,
    Critical,
}

impl MarginLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginLevel::Safe => "safe",
            MarginLevel::Normal => "normal",
            MarginLevel::Warning => "warning",
            MarginLevel::Danger => "danger",
            MarginLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for MarginLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Usage thresholds separating the five levels.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MarginThresholds {
    pub normal: Decimal,
    pub warning: Decimal,
    pub danger: Decimal,
    pub critical: Decimal,
}

impl Default for MarginThresholds {
    fn default() -> Self {
        Self {
            normal: Decimal::new(50, 2),
            warning: Decimal::new(70, 2),
            danger: Decimal::new(85, 2),
            critical: Decimal::new(100, 2),
        }
    }
}

impl MarginThresholds {
    pub fn level(&self, usage: Decimal) -> MarginLevel {
        if usage >= self.critical {
            MarginLevel::Critical
        } else if usage >= self.danger {
            MarginLevel::Danger
        } else if usage >= self.warning {
            MarginLevel::Warning
        } else if usage >= self.normal {
            MarginLevel::Normal
        } else {
            MarginLevel::Safe
        }
    }
}

/// Emitted on every level change.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct MarginAlert {
    pub prev: MarginLevel,
    pub current: MarginLevel,
    pub usage: Decimal,
}

/// Outcome of an open-position margin check.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct MarginCheck {
    pub allowed: bool,
    pub reason: Option<SmolStr>,
    pub projected_usage: Decimal,
    pub projected_level: MarginLevel,
}

/// Margin monitor configuration.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MarginConfig {
    pub thresholds: MarginThresholds,
    /// Minimum available margin that must remain after any open.
    pub min_available: Decimal,
}

impl Default for MarginConfig {
    fn default() -> Self {
        Self {
            thresholds: MarginThresholds::default(),
            min_available: Decimal::ZERO,
        }
    }
}

const EQUITY_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 4);

/// Real-time equity/margin-used tracking with an open-position gate.
#[derive(Debug, Clone)]
pub struct MarginMonitor {
    config: MarginConfig,
    equity: Decimal,
    margin_used: Decimal,
    level: MarginLevel,
}

impl MarginMonitor {
    pub fn new(config: MarginConfig) -> Self {
        Self {
            config,
            equity: Decimal::ZERO,
            margin_used: Decimal::ZERO,
            level: MarginLevel::Safe,
        }
    }

    pub fn level(&self) -> MarginLevel {
        self.level
    }

    pub fn usage(&self) -> Decimal {
        self.margin_used / self.equity.max(EQUITY_EPSILON)
    }

    pub fn available(&self) -> Decimal {
        self.equity - self.margin_used
    }

    /// Update account state, returning a [`MarginAlert`] when the level changed.
    pub fn update(&mut self, equity: Decimal, margin_used: Decimal) -> Option<MarginAlert> {
        self.equity = equity;
        self.margin_used = margin_used;

        let usage = self.usage();
        let current = self.config.thresholds.level(usage);
        let prev = self.level;
        self.level = current;

        (prev != current).then(|| {
            info!(%prev, %current, %usage, "margin level changed");
            MarginAlert {
                prev,
                current,
                usage,
            }
        })
    }

    /// Check whether opening a position needing `required_margin` is permitted.
    ///
    /// Rejects when the margin is simply unavailable, when it would breach the configured
    /// minimum-available floor, or when the projected usage reaches `Critical`.
    pub fn can_open_position(&self, required_margin: Decimal) -> MarginCheck {
        let available = self.available();
        let projected_used = self.margin_used + required_margin;
        let projected_usage = projected_used / self.equity.max(EQUITY_EPSILON);
        let projected_level = self.config.thresholds.level(projected_usage);

        let reason = if required_margin > available {
            Some(SmolStr::new(format!(
                "required {required_margin} exceeds available {available}"
            )))
        } else if available - required_margin < self.config.min_available {
            Some(SmolStr::new(format!(
                "post-order available below floor {}",
                self.config.min_available
            )))
        } else if projected_level >= MarginLevel::Critical {
            Some(SmolStr::new(format!(
                "projected usage {projected_usage} reaches critical"
            )))
        } else {
            None
        };

        MarginCheck {
            allowed: reason.is_none(),
            reason,
            projected_usage,
            projected_level,
        }
    }
}
