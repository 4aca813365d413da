//! Trading signals: raw records as scraped, and the canonical form the simulator consumes.
//!
//! Normalization is the only way to build a [`Signal`]: it validates side and entry,
//! parses the timestamp, resolves the optional stop-loss and take-profit levels, and
//! fills in default TP/SL percentages where the record has none.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Parse a side string, case-insensitive. Accepts long/short and buy/sell.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Some(Self::Long),
            "short" | "sell" => Some(Self::Short),
            _ => None,
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Stop-loss as given by the signal: an absolute price or a percent of entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StopLoss {
    Price(f64),
    Percent(f64),
}

/// Default TP/SL percentages applied when a record carries no levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalDefaults {
    pub tp_percent: f64,
    pub sl_percent: f64,
}

impl Default for SignalDefaults {
    fn default() -> Self {
        Self {
            tp_percent: 2.0,
            sl_percent: 5.0,
        }
    }
}

/// One signal record exactly as it appears in the input table.
///
/// All fields are kept as text so that coercion failures are reported by
/// [`RawSignal::normalize`] instead of aborting the whole file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    pub symbol: String,
    pub date: String,
    pub time: String,
    pub side: String,
    pub entry: String,
    #[serde(default)]
    pub stop_loss: Option<String>,
    #[serde(default)]
    pub tp1: Option<String>,
    #[serde(default)]
    pub tp2: Option<String>,
    #[serde(default)]
    pub tp3: Option<String>,
    #[serde(default)]
    pub tp4: Option<String>,
}

/// Why a raw record could not be normalized.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedSignal {
    #[error("missing symbol")]
    MissingSymbol,

    #[error("unknown side '{0}'")]
    UnknownSide(String),

    #[error("invalid entry price '{0}'")]
    InvalidEntry(String),

    #[error("invalid timestamp '{date} {time}'")]
    InvalidTimestamp { date: String, time: String },

    #[error("invalid {field} value '{value}'")]
    InvalidLevel { field: &'static str, value: String },

    #[error("{field} {level} is on the wrong side of entry {entry} for a {side} signal")]
    LevelOnWrongSide {
        field: &'static str,
        level: f64,
        entry: f64,
        side: Side,
    },
}

/// Canonical, immutable signal. Invariants: `entry > 0`, percentages > 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub side: Side,
    pub entry: f64,
    pub signal_time: NaiveDateTime,
    /// Stop-loss as supplied by the record, if any.
    pub stop_loss: Option<StopLoss>,
    /// Take-profit prices tp1..tp4 that were present, in order.
    pub take_profits: Vec<f64>,
    /// Effective TP distance: mean distance of the supplied levels, else the default.
    pub tp_percent: f64,
    /// Effective SL distance: from the supplied stop-loss, else the default.
    pub sl_percent: f64,
}

impl Signal {
    /// Absolute stop-loss price, if the record supplied one.
    pub fn stop_price(&self) -> Option<f64> {
        self.stop_loss.map(|sl| match sl {
            StopLoss::Price(p) => p,
            StopLoss::Percent(pct) => level_from_percent(self.side, self.entry, -pct),
        })
    }

    /// True when the record carries all four TP levels and a stop-loss.
    pub fn has_ladder(&self) -> bool {
        self.take_profits.len() == 4 && self.stop_loss.is_some()
    }

    /// True when the record supplied any TP or SL level of its own.
    pub fn has_levels(&self) -> bool {
        !self.take_profits.is_empty() || self.stop_loss.is_some()
    }
}

/// Price at `pct` percent from `entry` in the profitable direction for `side`
/// (negative `pct` moves in the losing direction).
pub fn level_from_percent(side: Side, entry: f64, pct: f64) -> f64 {
    entry * (1.0 + side.sign() * pct / 100.0)
}

/// Signed distance of `level` from `entry` in percent, positive in the profitable direction.
pub fn percent_from_level(side: Side, entry: f64, level: f64) -> f64 {
    side.sign() * (level - entry) / entry * 100.0
}

impl RawSignal {
    /// Validate and coerce into a canonical [`Signal`].
    pub fn normalize(&self, defaults: &SignalDefaults) -> Result<Signal, MalformedSignal> {
        let symbol = self.symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(MalformedSignal::MissingSymbol);
        }

        let side = Side::parse(&self.side)
            .ok_or_else(|| MalformedSignal::UnknownSide(self.side.clone()))?;

        let entry = parse_number(&self.entry)
            .filter(|e| e.is_finite() && *e > 0.0)
            .ok_or_else(|| MalformedSignal::InvalidEntry(self.entry.clone()))?;

        let signal_time = parse_timestamp(&self.date, &self.time).ok_or_else(|| {
            MalformedSignal::InvalidTimestamp {
                date: self.date.clone(),
                time: self.time.clone(),
            }
        })?;

        let stop_loss = parse_stop_loss(self.stop_loss.as_deref())?;
        let sl_percent = match stop_loss {
            None => defaults.sl_percent,
            Some(StopLoss::Percent(pct)) => pct,
            Some(StopLoss::Price(price)) => {
                let pct = -percent_from_level(side, entry, price);
                if pct <= 0.0 {
                    return Err(MalformedSignal::LevelOnWrongSide {
                        field: "stop_loss",
                        level: price,
                        entry,
                        side,
                    });
                }
                pct
            }
        };

        let mut take_profits = Vec::with_capacity(4);
        let fields = [
            ("tp1", &self.tp1),
            ("tp2", &self.tp2),
            ("tp3", &self.tp3),
            ("tp4", &self.tp4),
        ];
        for (field, value) in fields {
            if let Some(level) = parse_level(field, value.as_deref())? {
                if percent_from_level(side, entry, level) <= 0.0 {
                    return Err(MalformedSignal::LevelOnWrongSide {
                        field,
                        level,
                        entry,
                        side,
                    });
                }
                take_profits.push(level);
            }
        }

        let tp_percent = if take_profits.is_empty() {
            defaults.tp_percent
        } else {
            let mean = take_profits.iter().sum::<f64>() / take_profits.len() as f64;
            percent_from_level(side, entry, mean)
        };

        Ok(Signal {
            symbol,
            side,
            entry,
            signal_time,
            stop_loss,
            take_profits,
            tp_percent,
            sl_percent,
        })
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok()
}

fn parse_level(field: &'static str, value: Option<&str>) -> Result<Option<f64>, MalformedSignal> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => parse_number(v)
            .filter(|x| x.is_finite() && *x > 0.0)
            .map(Some)
            .ok_or_else(|| MalformedSignal::InvalidLevel {
                field,
                value: v.to_string(),
            }),
    }
}

fn parse_stop_loss(value: Option<&str>) -> Result<Option<StopLoss>, MalformedSignal> {
    let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let invalid = || MalformedSignal::InvalidLevel {
        field: "stop_loss",
        value: v.to_string(),
    };
    if let Some(pct) = v.strip_suffix('%') {
        let pct = parse_number(pct)
            .filter(|p| p.is_finite() && *p > 0.0 && *p < 100.0)
            .ok_or_else(invalid)?;
        Ok(Some(StopLoss::Percent(pct)))
    } else {
        let price = parse_number(v)
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(invalid)?;
        Ok(Some(StopLoss::Price(price)))
    }
}

/// Combine a date column and a time column into a UTC timestamp.
///
/// The date may carry an ISO time suffix (`2025-12-18T21:30:00+00:00`); only the
/// date part is used. Time is `HH:MM` or `HH:MM:SS`.
fn parse_timestamp(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = date.trim();
    let date = date.get(..10).unwrap_or(date);
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = time.trim();
    let time = NaiveTime::parse_from_str(time, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M:%S"))
        .ok()?;
    Some(date.and_time(time))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(side: &str, entry: &str) -> RawSignal {
        RawSignal {
            symbol: "btcusdt".into(),
            date: "2025-12-18".into(),
            time: "21:30".into(),
            side: side.into(),
            entry: entry.into(),
            ..Default::default()
        }
    }

    #[test]
    fn applies_defaults_when_levels_absent() {
        let s = raw("LONG", "100").normalize(&SignalDefaults::default()).unwrap();
        assert_eq!(s.symbol, "BTCUSDT");
        assert_eq!(s.side, Side::Long);
        assert_eq!(s.tp_percent, 2.0);
        assert_eq!(s.sl_percent, 5.0);
        assert!(!s.has_levels());
        assert_eq!(
            s.signal_time,
            NaiveDate::from_ymd_opt(2025, 12, 18)
                .unwrap()
                .and_hms_opt(21, 30, 0)
                .unwrap()
        );
    }

    #[test]
    fn side_is_case_insensitive() {
        assert_eq!(Side::parse("short"), Some(Side::Short));
        assert_eq!(Side::parse(" Buy "), Some(Side::Long));
        assert_eq!(Side::parse("flat"), None);
    }

    #[test]
    fn rejects_unknown_side() {
        let err = raw("flat", "100").normalize(&SignalDefaults::default()).unwrap_err();
        assert_eq!(err, MalformedSignal::UnknownSide("flat".into()));
    }

    #[test]
    fn rejects_non_positive_entry() {
        for entry in ["0", "-5", "abc", ""] {
            let err = raw("long", entry)
                .normalize(&SignalDefaults::default())
                .unwrap_err();
            assert!(matches!(err, MalformedSignal::InvalidEntry(_)), "{entry}");
        }
    }

    #[test]
    fn rejects_bad_timestamp() {
        let mut r = raw("long", "100");
        r.time = "25:99".into();
        assert!(matches!(
            r.normalize(&SignalDefaults::default()),
            Err(MalformedSignal::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn accepts_iso_date_and_seconds() {
        let mut r = raw("long", "100");
        r.date = "2025-12-18T00:00:00+00:00".into();
        r.time = "21:30:15".into();
        let s = r.normalize(&SignalDefaults::default()).unwrap();
        assert_eq!(s.signal_time.format("%H:%M:%S").to_string(), "21:30:15");
    }

    #[test]
    fn stop_loss_price_becomes_percent() {
        let mut r = raw("short", "200");
        r.stop_loss = Some("210".into());
        let s = r.normalize(&SignalDefaults::default()).unwrap();
        assert!((s.sl_percent - 5.0).abs() < 1e-9);
        assert_eq!(s.stop_price(), Some(210.0));
    }

    #[test]
    fn stop_loss_percent_suffix() {
        let mut r = raw("long", "100");
        r.stop_loss = Some("3%".into());
        let s = r.normalize(&SignalDefaults::default()).unwrap();
        assert_eq!(s.stop_loss, Some(StopLoss::Percent(3.0)));
        assert!((s.stop_price().unwrap() - 97.0).abs() < 1e-9);
    }

    #[test]
    fn stop_loss_on_wrong_side_is_malformed() {
        let mut r = raw("long", "100");
        r.stop_loss = Some("105".into());
        assert!(matches!(
            r.normalize(&SignalDefaults::default()),
            Err(MalformedSignal::LevelOnWrongSide { field: "stop_loss", .. })
        ));
    }

    #[test]
    fn ladder_detection_and_mean_tp_percent() {
        let mut r = raw("long", "100");
        r.stop_loss = Some("95".into());
        r.tp1 = Some("101".into());
        r.tp2 = Some("102".into());
        r.tp3 = Some("103".into());
        r.tp4 = Some("104".into());
        let s = r.normalize(&SignalDefaults::default()).unwrap();
        assert!(s.has_ladder());
        assert!((s.tp_percent - 2.5).abs() < 1e-9);
    }

    #[test]
    fn empty_optional_columns_are_absent() {
        let mut r = raw("long", "100");
        r.tp1 = Some("  ".into());
        r.stop_loss = Some("".into());
        let s = r.normalize(&SignalDefaults::default()).unwrap();
        assert!(s.take_profits.is_empty());
        assert!(s.stop_loss.is_none());
    }

    #[test]
    fn level_helpers_are_direction_aware() {
        assert!((level_from_percent(Side::Long, 100.0, 2.0) - 102.0).abs() < 1e-9);
        assert!((level_from_percent(Side::Short, 100.0, 2.0) - 98.0).abs() < 1e-9);
        assert!((percent_from_level(Side::Short, 100.0, 98.0) - 2.0).abs() < 1e-9);
    }
}
