use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Errors raised while validating a ladder or exit strategy.
#[derive(Debug, PartialEq)]
pub enum StrategyError {
    EmptyLadder,
    /// Rung index and offending take-profit multiple.
    TakeProfitTooLow(usize, f64),
    /// Rung index whose take-profit does not exceed the previous rung's.
    NotIncreasing(usize),
    /// Rung index and offending arm-stop multiple.
    InvalidStop(usize, f64),
    /// Rung index whose stop is lower than the previous rung's.
    StopRegression(usize),
    /// Hard exit multiple and the first rung's take-profit.
    HardExitTooLow(f64, f64),
}

impl fmt::Display for StrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyError::EmptyLadder => write!(f, "ladder has no rungs"),
            StrategyError::TakeProfitTooLow(i, tp) => {
                write!(f, "rung {}: take-profit multiple {} must be > 1", i, tp)
            }
            StrategyError::NotIncreasing(i) => {
                write!(f, "rung {}: take-profit multiples must strictly increase", i)
            }
            StrategyError::InvalidStop(i, stop) => write!(
                f,
                "rung {}: arm-stop multiple {} must be >= 0 and below its take-profit",
                i, stop
            ),
            StrategyError::StopRegression(i) => {
                write!(f, "rung {}: arm-stop lower than the previous rung's", i)
            }
            StrategyError::HardExitTooLow(hard, tp) => write!(
                f,
                "hard exit multiple {} must exceed the first take-profit {}",
                hard, tp
            ),
        }
    }
}

impl std::error::Error for StrategyError {}

/// One take-profit threshold and the stop it arms, both as multiples of the
/// entry price.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct LadderRung {
    pub take_profit_multiple: f64,
    pub arm_stop_multiple: f64,
}

impl LadderRung {
    pub fn new(take_profit_multiple: f64, arm_stop_multiple: f64) -> Self {
        Self {
            take_profit_multiple,
            arm_stop_multiple,
        }
    }
}

/// Validated, strictly increasing sequence of rungs.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Ladder {
    rungs: Vec<LadderRung>,
}

impl Ladder {
    pub fn new(rungs: Vec<LadderRung>) -> Result<Self, StrategyError> {
        if rungs.is_empty() {
            return Err(StrategyError::EmptyLadder);
        }
        for (i, rung) in rungs.iter().enumerate() {
            let tp = rung.take_profit_multiple;
            if !(tp.is_finite() && tp > 1.0) {
                return Err(StrategyError::TakeProfitTooLow(i, tp));
            }
            let stop = rung.arm_stop_multiple;
            if !(stop.is_finite() && stop >= 0.0 && stop < tp) {
                return Err(StrategyError::InvalidStop(i, stop));
            }
            if let Some(prev) = i.checked_sub(1).map(|p| rungs[p]) {
                if tp <= prev.take_profit_multiple {
                    return Err(StrategyError::NotIncreasing(i));
                }
                if stop < prev.arm_stop_multiple {
                    return Err(StrategyError::StopRegression(i));
                }
            }
        }
        Ok(Self { rungs })
    }

    pub fn rungs(&self) -> &[LadderRung] {
        &self.rungs
    }

    pub fn len(&self) -> usize {
        self.rungs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rungs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LadderRung> {
        self.rungs.get(index)
    }
}

impl<'de> Deserialize<'de> for Ladder {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let rungs = Vec::<LadderRung>::deserialize(deserializer)?;
        Ladder::new(rungs).map_err(serde::de::Error::custom)
    }
}

/// Ladder plus the ladder-independent hard exit ceiling.
///
/// TOML shape:
///
/// ```toml
/// hard_exit_multiple = 2.1
///
/// [[ladder]]
/// take_profit_multiple = 1.45
/// arm_stop_multiple = 1.0
///
/// [[ladder]]
/// take_profit_multiple = 1.75
/// arm_stop_multiple = 1.3
/// ```
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ExitStrategy {
    pub ladder: Ladder,
    pub hard_exit_multiple: f64,
}

#[derive(Deserialize)]
struct ExitStrategyFile {
    ladder: Ladder,
    hard_exit_multiple: f64,
}

impl ExitStrategy {
    pub fn new(ladder: Ladder, hard_exit_multiple: f64) -> Result<Self, StrategyError> {
        let first_tp = ladder.rungs()[0].take_profit_multiple;
        if !(hard_exit_multiple.is_finite() && hard_exit_multiple > first_tp) {
            return Err(StrategyError::HardExitTooLow(hard_exit_multiple, first_tp));
        }
        Ok(Self {
            ladder,
            hard_exit_multiple,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ExitStrategyFile = toml::from_str(raw).context("failed to parse exit strategy")?;
        Ok(Self::new(file.ladder, file.hard_exit_multiple)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read exit strategy {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid exit strategy {}", path.display()))
    }
}

impl Default for ExitStrategy {
    /// Two rungs: +45% arms a break-even stop, +75% arms +30%; 2.1x sells outright.
    fn default() -> Self {
        Self {
            ladder: Ladder {
                rungs: vec![LadderRung::new(1.45, 1.0), LadderRung::new(1.75, 1.3)],
            },
            hard_exit_multiple: 2.1,
        }
    }
}
