use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Login identity and secret, supplied out-of-band (environment / .env).
/// The secret is kept out of `Debug` output so it never reaches the logs.
#[derive(Clone)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FightMode {
    Solo,
    Farmer,
    Team,
}

impl fmt::Display for FightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Solo => "solo",
            Self::Farmer => "farmer",
            Self::Team => "team",
        };
        f.write_str(value)
    }
}

impl FromStr for FightMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "solo" => Ok(Self::Solo),
            "farmer" => Ok(Self::Farmer),
            "team" => Ok(Self::Team),
            other => Err(format!("unknown fight mode: {other}")),
        }
    }
}

/// Options for one batch run, as recognized by the CLI surface.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// 1-based index into the farmer's leeks, ordered by id.
    pub leek: usize,
    /// Round budget; the effective count is `min(budget, remaining)`.
    pub fights: i64,
    pub mode: FightMode,
    pub max_elo: bool,
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            leek: 1,
            fights: 10,
            mode: FightMode::Solo,
            max_elo: false,
            dry_run: false,
        }
    }
}

/// One candidate opponent as returned by the garden endpoints. Solo
/// opponents carry no group fields, so those are absent-tolerant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Opponent {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub talent: i64,
    #[serde(default)]
    pub level: i64,
    #[serde(default)]
    pub total_level: Option<i64>,
    #[serde(default)]
    pub leek_count: Option<i64>,
}

impl Opponent {
    /// Average level per group member; `None` for solo candidates.
    pub fn level_ratio(&self) -> Option<f64> {
        match (self.total_level, self.leek_count) {
            (Some(total), Some(count)) if count > 0 => Some(total as f64 / count as f64),
            _ => None,
        }
    }
}

/// Winner value the server reports while a fight has not resolved yet.
pub const WINNER_PENDING: i64 = -1;

/// Result of one fight as reported by `fight/get/{id}`. The farmer sets
/// arrive as JSON objects keyed by farmer id.
#[derive(Debug, Clone, Deserialize)]
pub struct FightResult {
    #[serde(default = "pending_winner")]
    pub winner: i64,
    #[serde(default)]
    pub farmers1: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub farmers2: HashMap<String, serde_json::Value>,
}

fn pending_winner() -> i64 {
    WINNER_PENDING
}

impl FightResult {
    pub fn is_pending(&self) -> bool {
        self.winner == WINNER_PENDING
    }

    /// Which side (1 or 2) the given farmer fought on, if any.
    pub fn side_of(&self, farmer_id: i64) -> Option<i64> {
        let key = farmer_id.to_string();
        if self.farmers1.contains_key(&key) {
            Some(1)
        } else if self.farmers2.contains_key(&key) {
            Some(2)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeekRef {
    pub id: i64,
}

/// One row of a fight-history endpoint. The three history variants share
/// this superset shape; fields not present for a variant stay `None`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryFight {
    #[serde(rename = "type", default)]
    pub kind: i64,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub leeks1: Vec<LeekRef>,
    #[serde(default)]
    pub leeks2: Vec<LeekRef>,
    #[serde(default)]
    pub farmer1: Option<i64>,
    #[serde(default)]
    pub farmer2: Option<i64>,
    #[serde(default)]
    pub team1: Option<i64>,
    #[serde(default)]
    pub team2: Option<i64>,
}

/// Aggregate win/loss/draw counters for one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FightTally {
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

impl fmt::Display for FightTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} wins, {} losses, {} draws",
            self.wins, self.losses, self.draws
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fight_mode_round_trips_through_str() {
        for mode in [FightMode::Solo, FightMode::Farmer, FightMode::Team] {
            assert_eq!(mode.to_string().parse::<FightMode>(), Ok(mode));
        }
        assert!("ladder".parse::<FightMode>().is_err());
    }

    #[test]
    fn fight_result_side_membership() {
        let result: FightResult = serde_json::from_str(
            r#"{"winner":1,"farmers1":{"42":{"name":"us"}},"farmers2":{"77":{"name":"them"}}}"#,
        )
        .expect("parse result");
        assert_eq!(result.side_of(42), Some(1));
        assert_eq!(result.side_of(77), Some(2));
        assert_eq!(result.side_of(5), None);
    }

    #[test]
    fn missing_winner_means_pending() {
        let result: FightResult = serde_json::from_str("{}").expect("parse result");
        assert!(result.is_pending());
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials {
            login: "farmer".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn level_ratio_requires_group_fields() {
        let opponent: Opponent =
            serde_json::from_str(r#"{"id":1,"name":"x","talent":100,"level":30}"#)
                .expect("parse opponent");
        assert_eq!(opponent.level_ratio(), None);

        let group: Opponent = serde_json::from_str(
            r#"{"id":2,"name":"y","talent":90,"level":0,"total_level":120,"leek_count":4}"#,
        )
        .expect("parse opponent");
        assert_eq!(group.level_ratio(), Some(30.0));
    }
}
