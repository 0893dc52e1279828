// levelbak/src/schedule/level.rs
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

use super::tick::Tick;
use crate::errors::{ConfigError, SelectError};

/// Rank in a backup chain. 0 is the full backup, higher levels are increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Level(u32);

impl Level {
    pub const ROOT: Level = Level(0);

    pub fn new(value: i64) -> Result<Self, ConfigError> {
        u32::try_from(value)
            .map(Level)
            .map_err(|_| ConfigError::NegativeLevel(value))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Level {
    fn from(value: u32) -> Self {
        Level(value)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct LevelRule {
    level: Level,
    tick: Tick,
    enabled: bool,
}

impl LevelRule {
    pub fn level(&self) -> Level {
        self.level
    }

    pub fn tick(&self) -> &Tick {
        &self.tick
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Only reachable through `LevelSet::add`, so the borrow checker keeps this
    /// out of the way of any `select` on the same set.
    pub fn set_enabled(&mut self, enabled: bool) -> &mut Self {
        self.enabled = enabled;
        self
    }
}

/// Ordered schedule of backup levels. Insertion order is kept for display only.
#[derive(Debug, Clone, Default)]
pub struct LevelSet {
    rules: Vec<LevelRule>,
}

impl LevelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an enabled rule for `level`.
    ///
    /// The returned handle may toggle `enabled` while the set is still being built.
    /// It borrows the set mutably, so no toggle can happen once `select` is in use.
    pub fn add(&mut self, level: Level, tick: Tick) -> Result<&mut LevelRule, ConfigError> {
        if self.rules.iter().any(|r| r.level == level) {
            return Err(ConfigError::DuplicateLevel(level));
        }
        self.rules.push(LevelRule {
            level,
            tick,
            enabled: true,
        });
        let last = self.rules.len() - 1;
        Ok(&mut self.rules[last])
    }

    /// Total number of rules, enabled or not.
    pub fn count(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> impl Iterator<Item = &LevelRule> {
        self.rules.iter()
    }

    fn has_root(&self) -> bool {
        self.rules.iter().any(|r| r.enabled && r.level.is_root())
    }

    /// Startup check so a rootless schedule never gets as far as `select`.
    pub fn ensure_root(&self) -> Result<(), ConfigError> {
        if self.has_root() {
            Ok(())
        } else {
            Err(ConfigError::MissingRootLevel)
        }
    }

    /// Picks the level due at `now`. When several enabled ticks fire on the same
    /// minute the highest level wins.
    pub fn select(&self, now: &NaiveDateTime) -> Result<Level, SelectError> {
        if !self.has_root() {
            return Err(SelectError::MissingRootLevel);
        }

        self.rules
            .iter()
            .filter(|r| r.enabled && r.tick.matches(now))
            .map(|r| r.level)
            .max()
            .ok_or(SelectError::NoScheduledLevel)
    }

    pub fn schedule(&self) -> String {
        let mut out = String::new();
        for rule in &self.rules {
            out.push_str(&format!(
                "\n  level {}: {} [{}]",
                rule.level,
                rule.tick,
                if rule.enabled { "enabled" } else { "disabled" }
            ));
        }
        out
    }
}

impl fmt::Display for LevelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.schedule())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hh: u32, mm: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(hh, mm, 0))
            .expect("valid test timestamp")
    }

    fn level_set(rules: &[(u32, &str, bool)]) -> anyhow::Result<LevelSet> {
        let mut set = LevelSet::new();
        for (level, tick, enabled) in rules {
            set.add(Level::from(*level), Tick::parse(tick)?)?
                .set_enabled(*enabled);
        }
        Ok(set)
    }

    #[test]
    fn test_increment_wins_on_coincident_tick() -> anyhow::Result<()> {
        let set = level_set(&[(0, "daily@02:00", true), (1, "hourly", true)])?;
        assert_eq!(set.select(&at(2, 0))?, Level::from(1));
        Ok(())
    }

    #[test]
    fn test_base_runs_when_only_daily_matches() -> anyhow::Result<()> {
        let set = level_set(&[(0, "daily@02:30", true), (1, "hourly", true)])?;
        assert_eq!(set.select(&at(2, 30))?, Level::ROOT);
        Ok(())
    }

    #[test]
    fn test_single_match_returns_its_level() -> anyhow::Result<()> {
        let set = level_set(&[(0, "daily@02:00", true), (1, "hourly@30", true), (2, "*/5 * * * *", true)])?;
        assert_eq!(set.select(&at(9, 5))?, Level::from(2));
        assert_eq!(set.select(&at(9, 30))?, Level::from(2));
        Ok(())
    }

    #[test]
    fn test_highest_of_many_matches_regardless_of_insertion_order() -> anyhow::Result<()> {
        let set = level_set(&[(3, "hourly", true), (0, "daily", true), (1, "hourly", true)])?;
        assert_eq!(set.select(&at(0, 0))?, Level::from(3));
        Ok(())
    }

    #[test]
    fn test_no_match_is_idle_tick() -> anyhow::Result<()> {
        let set = level_set(&[(0, "daily@02:00", true), (1, "hourly", true)])?;
        assert_eq!(set.select(&at(2, 17)), Err(SelectError::NoScheduledLevel));
        Ok(())
    }

    #[test]
    fn test_disabled_rules_never_fire() -> anyhow::Result<()> {
        let set = level_set(&[(0, "daily@02:00", true), (1, "hourly", false)])?;
        assert_eq!(set.select(&at(2, 0))?, Level::ROOT);
        assert_eq!(set.select(&at(3, 0)), Err(SelectError::NoScheduledLevel));
        Ok(())
    }

    #[test]
    fn test_rule_handle_toggles_before_select() -> anyhow::Result<()> {
        let mut set = LevelSet::new();
        set.add(Level::ROOT, Tick::parse("daily@02:00")?)?;
        let rule = set.add(Level::from(1), Tick::parse("hourly")?)?;
        assert!(rule.enabled());
        rule.set_enabled(false);

        assert_eq!(set.select(&at(2, 0))?, Level::ROOT);
        assert!(!set.rules().any(|r| r.level() == Level::from(1) && r.enabled()));
        Ok(())
    }

    #[test]
    fn test_empty_set_is_missing_root() {
        let set = LevelSet::new();
        assert_eq!(set.select(&at(2, 0)), Err(SelectError::MissingRootLevel));
        assert!(matches!(set.ensure_root(), Err(ConfigError::MissingRootLevel)));
    }

    #[test]
    fn test_missing_root_for_any_instant() -> anyhow::Result<()> {
        let disabled_root = level_set(&[(0, "hourly", false), (1, "hourly", true)])?;
        let no_root = level_set(&[(1, "* * * * *", true)])?;
        for hh in 0..24 {
            for mm in [0, 1, 30, 59] {
                assert_eq!(disabled_root.select(&at(hh, mm)), Err(SelectError::MissingRootLevel));
                assert_eq!(no_root.select(&at(hh, mm)), Err(SelectError::MissingRootLevel));
            }
        }
        Ok(())
    }

    #[test]
    fn test_root_present_never_reports_missing_root() -> anyhow::Result<()> {
        let set = level_set(&[(0, "daily@02:00", true), (1, "hourly", true)])?;
        for hh in 0..24 {
            for mm in 0..60 {
                assert_ne!(set.select(&at(hh, mm)), Err(SelectError::MissingRootLevel));
            }
        }
        Ok(())
    }

    #[test]
    fn test_duplicate_level_leaves_count_unchanged() -> anyhow::Result<()> {
        let mut set = level_set(&[(0, "daily", true), (1, "hourly", true)])?;
        let err = set.add(Level::from(1), Tick::parse("hourly@30")?).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateLevel(level) if level == Level::from(1)));
        assert_eq!(set.count(), 2);
        Ok(())
    }

    #[test]
    fn test_negative_level_rejected() {
        assert!(matches!(Level::new(-1), Err(ConfigError::NegativeLevel(-1))));
        assert_eq!(Level::new(2).ok(), Some(Level::from(2)));
    }

    #[test]
    fn test_schedule_preserves_insertion_order() -> anyhow::Result<()> {
        let set = level_set(&[(1, "hourly", false), (0, "daily@02:00", true)])?;
        assert_eq!(
            set.schedule(),
            "\n  level 1: hourly [disabled]\n  level 0: daily@02:00 [enabled]"
        );
        assert_eq!(set.count(), 2);
        Ok(())
    }
}
