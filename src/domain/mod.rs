//! Shared domain constants and pure functions.
//!
//! Kept dependency-free (no DB, no HTTP) on purpose: ingestion and scoring
//! both depend on this module, but never on each other, which is what keeps
//! the threshold table from becoming a cyclic-import hazard between the two.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The five trace gases AERIS ingests and scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GasType {
    NO2,
    CH2O,
    AI,
    PM,
    O3,
}

impl GasType {
    pub const ALL: [GasType; 5] = [
        GasType::NO2,
        GasType::CH2O,
        GasType::AI,
        GasType::PM,
        GasType::O3,
    ];

    /// Harmony collection id, per spec.md §6.
    pub fn collection_id(self) -> &'static str {
        match self {
            GasType::NO2 => "C2930763263-LARC_CLOUD",
            GasType::CH2O => "C2930763264-LARC_CLOUD",
            GasType::AI => "C2930763265-LARC_CLOUD",
            GasType::PM => "C2930763266-LARC_CLOUD",
            GasType::O3 => "C2930763267-LARC_CLOUD",
        }
    }

    /// Product variable path, per the thresholds table in spec.md §6.
    pub fn variable_path(self) -> &'static str {
        match self {
            GasType::NO2 | GasType::CH2O => "product/vertical_column_troposphere",
            GasType::AI => "product/aerosol_index_354_388",
            GasType::PM => "product/aerosol_optical_depth_550",
            GasType::O3 => "product/ozone_total_column",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            GasType::NO2 | GasType::CH2O => "molecules/cm^2",
            GasType::AI => "index",
            GasType::PM => "dimensionless",
            GasType::O3 => "Dobson Units",
        }
    }
}

impl fmt::Display for GasType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GasType::NO2 => "NO2",
            GasType::CH2O => "CH2O",
            GasType::AI => "AI",
            GasType::PM => "PM",
            GasType::O3 => "O3",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for GasType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NO2" => Ok(GasType::NO2),
            "CH2O" => Ok(GasType::CH2O),
            "AI" => Ok(GasType::AI),
            "PM" => Ok(GasType::PM),
            "O3" => Ok(GasType::O3),
            other => Err(format!("unknown gas type: {other}")),
        }
    }
}

/// One row of the pollution thresholds table (spec.md §6).
#[derive(Debug, Clone, Copy)]
pub struct GasThresholds {
    pub moderate: f64,
    pub unhealthy: f64,
    pub very_unhealthy: f64,
    pub hazardous: f64,
}

/// `POLLUTION_THRESHOLDS` — compile-time constant table, one row per gas.
pub fn thresholds(gas: GasType) -> GasThresholds {
    match gas {
        GasType::NO2 => GasThresholds {
            moderate: 5e15,
            unhealthy: 1e16,
            very_unhealthy: 2e16,
            hazardous: 3e16,
        },
        GasType::CH2O => GasThresholds {
            moderate: 8e15,
            unhealthy: 1.6e16,
            very_unhealthy: 3.2e16,
            hazardous: 6.4e16,
        },
        GasType::AI => GasThresholds {
            moderate: 1.0,
            unhealthy: 2.0,
            very_unhealthy: 4.0,
            hazardous: 7.0,
        },
        GasType::PM => GasThresholds {
            moderate: 0.2,
            unhealthy: 0.5,
            very_unhealthy: 1.0,
            hazardous: 2.0,
        },
        GasType::O3 => GasThresholds {
            moderate: 220.0,
            unhealthy: 280.0,
            very_unhealthy: 400.0,
            hazardous: 500.0,
        },
    }
}

/// Classifies a raw pollutant value into a severity band 0..=4.
///
/// 0 = good (below `moderate`), 4 = at or above `hazardous`. Each band's
/// minimum is inclusive of that band (`value == moderate` -> 1, not 0).
pub fn classify_pollution_level(value: f64, gas: GasType) -> u8 {
    let t = thresholds(gas);
    if value >= t.hazardous {
        4
    } else if value >= t.very_unhealthy {
        3
    } else if value >= t.unhealthy {
        2
    } else if value >= t.moderate {
        1
    } else {
        0
    }
}

/// `UPES_DEFAULT_WEIGHTS` — gas weights for the satellite score, sum to 1.0.
pub fn upes_default_weight(gas: GasType) -> f64 {
    match gas {
        GasType::NO2 => 0.30,
        GasType::PM => 0.25,
        GasType::O3 => 0.20,
        GasType::CH2O => 0.15,
        GasType::AI => 0.10,
    }
}

/// A saved route's declared activity, used by the route engine and for
/// per-mode cost weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityMode {
    Commute,
    Jogger,
    Cyclist,
}

impl ActivityMode {
    /// Parses a mode string with the aliasing rules from spec.md §4.4:
    /// trimmed, case-insensitive, `commuter`->commute, `jog`->jogger,
    /// `cycle`->cyclist. Unknown modes default to `commute`.
    pub fn parse_with_aliases(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "commute" | "commuter" => ActivityMode::Commute,
            "jogger" | "jog" => ActivityMode::Jogger,
            "cyclist" | "cycle" => ActivityMode::Cyclist,
            _ => ActivityMode::Commute,
        }
    }

    /// Canonical lowercase name, used in cache key construction.
    pub fn canonical_name(self) -> &'static str {
        match self {
            ActivityMode::Commute => "commute",
            ActivityMode::Jogger => "jogger",
            ActivityMode::Cyclist => "cyclist",
        }
    }
}

/// `MODE_WEIGHTS` — (alpha, beta, gamma) cost coefficients, always sum to 1.0.
pub fn mode_weights(mode: ActivityMode) -> (f64, f64, f64) {
    match mode {
        ActivityMode::Commute => (0.2, 0.4, 0.4),
        ActivityMode::Jogger => (0.7, 0.15, 0.15),
        ActivityMode::Cyclist => (0.4, 0.3, 0.3),
    }
}

/// Multiplier in {1.0, 0.7, 0.5} applied to deterioration thresholds,
/// derived from a user's 1..=5 `exposure_sensitivity_level`.
pub fn sensitivity_scale(level: i16) -> f64 {
    match level {
        1 | 2 => 1.0,
        3 | 4 => 0.7,
        _ => 0.5,
    }
}

/// Human-readable sensitivity label surfaced on the user-read endpoint.
pub fn sensitivity_label(level: i16) -> &'static str {
    match level {
        1 | 2 => "Normal",
        3 | 4 => "Sensitive",
        _ => "Asthmatic",
    }
}

pub fn clamp(value: f64, lo: f64, hi: f64) -> f64 {
    value.max(lo).min(hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_boundaries() {
        assert_eq!(classify_pollution_level(0.0, GasType::NO2), 0);
        assert_eq!(classify_pollution_level(5e15, GasType::NO2), 1);
        assert_eq!(classify_pollution_level(1e16, GasType::NO2), 2);
        assert_eq!(classify_pollution_level(2e16, GasType::NO2), 3);
        assert_eq!(classify_pollution_level(3e16, GasType::NO2), 4);
        assert_eq!(classify_pollution_level(1e20, GasType::NO2), 4);
    }

    #[test]
    fn upes_weights_sum_to_one() {
        let sum: f64 = GasType::ALL.iter().map(|g| upes_default_weight(*g)).sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn mode_weights_sum_to_one() {
        for mode in [
            ActivityMode::Commute,
            ActivityMode::Jogger,
            ActivityMode::Cyclist,
        ] {
            let (a, b, c) = mode_weights(mode);
            assert!((a + b + c - 1.0).abs() < 1e-9, "{mode:?}");
        }
    }

    #[test]
    fn mode_alias_resolution() {
        assert_eq!(ActivityMode::parse_with_aliases("commuter"), ActivityMode::Commute);
        assert_eq!(ActivityMode::parse_with_aliases("  Commute "), ActivityMode::Commute);
        assert_eq!(ActivityMode::parse_with_aliases("JOG"), ActivityMode::Jogger);
        assert_eq!(ActivityMode::parse_with_aliases("cycle"), ActivityMode::Cyclist);
        assert_eq!(ActivityMode::parse_with_aliases("unknown"), ActivityMode::Commute);
    }

    #[test]
    fn sensitivity_scale_bands() {
        assert_eq!(sensitivity_scale(1), 1.0);
        assert_eq!(sensitivity_scale(2), 1.0);
        assert_eq!(sensitivity_scale(3), 0.7);
        assert_eq!(sensitivity_scale(4), 0.7);
        assert_eq!(sensitivity_scale(5), 0.5);
    }
}
