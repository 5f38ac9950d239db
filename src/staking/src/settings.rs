//! Protocol settings and the governance-owned settings store
//!
//! The engine never holds settings across requests. Each decision takes a
//! fresh [`SettingsSnapshot`] while it holds the node's ledger entry, so a
//! committed governance update is visible to the very next decision.

use nodestake_core::{units, Amount, BlockNumber};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, StakingError};

/// Fixed-point scale of `min_collateral_ratio` (1e18 == 100%)
pub const RATIO_SCALE: Amount = units::WEI_PER_ETHER;

/// Largest accepted collateral ratio (100%)
pub const MAX_COLLATERAL_RATIO: Amount = RATIO_SCALE;

/// Default withdrawal cooldown in blocks
pub const DEFAULT_COOLDOWN_INTERVAL_BLOCKS: BlockNumber = 5760;

/// Default collateral ratio (10%)
pub const DEFAULT_MIN_COLLATERAL_RATIO: Amount = RATIO_SCALE / 10;

/// Default minipool launch amount (32 tokens)
pub const DEFAULT_MINIPOOL_LAUNCH_AMOUNT: Amount = 32 * units::WEI_PER_ETHER;

/// Setting keys accepted by [`SettingsStore::set`], with their DAO names
pub const COOLDOWN_INTERVAL_KEYS: [&str; 2] = ["RewardsClaimIntervalBlocks", "cooldown_interval_blocks"];
pub const MIN_COLLATERAL_RATIO_KEYS: [&str; 2] = ["MinimumPerMinipoolStake", "min_collateral_ratio"];
pub const MINIPOOL_LAUNCH_AMOUNT_KEYS: [&str; 2] = ["MinipoolLaunchAmount", "minipool_launch_amount"];

/// Process-wide protocol configuration, written only by governance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolSettings {
    /// Blocks that must pass after a stake before a withdrawal (0 disables)
    #[serde(default = "default_cooldown")]
    pub cooldown_interval_blocks: BlockNumber,

    /// Required stake per minipool launch amount, scaled by [`RATIO_SCALE`]
    #[serde(default = "default_ratio", with = "ratio_string")]
    pub min_collateral_ratio: Amount,

    /// Deposit size of one minipool
    #[serde(default = "default_launch_amount", with = "units::amount_string")]
    pub minipool_launch_amount: Amount,
}

fn default_cooldown() -> BlockNumber { DEFAULT_COOLDOWN_INTERVAL_BLOCKS }
fn default_ratio() -> Amount { DEFAULT_MIN_COLLATERAL_RATIO }
fn default_launch_amount() -> Amount { DEFAULT_MINIPOOL_LAUNCH_AMOUNT }

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            cooldown_interval_blocks: DEFAULT_COOLDOWN_INTERVAL_BLOCKS,
            min_collateral_ratio: DEFAULT_MIN_COLLATERAL_RATIO,
            minipool_launch_amount: DEFAULT_MINIPOOL_LAUNCH_AMOUNT,
        }
    }
}

impl ProtocolSettings {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.minipool_launch_amount == 0 {
            return Err(StakingError::invalid_setting(
                MINIPOOL_LAUNCH_AMOUNT_KEYS[1],
                "launch amount must be greater than zero",
            ));
        }

        if self.min_collateral_ratio > MAX_COLLATERAL_RATIO {
            return Err(StakingError::invalid_setting(
                MIN_COLLATERAL_RATIO_KEYS[1],
                format!(
                    "ratio {} exceeds 100%",
                    units::format_ether(self.min_collateral_ratio)
                ),
            ));
        }

        Ok(())
    }

    /// Apply a single named setting, mirroring DAO setting updates
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        if COOLDOWN_INTERVAL_KEYS.contains(&key) {
            self.cooldown_interval_blocks = value
                .trim()
                .parse()
                .map_err(|_| StakingError::invalid_setting(key, format!("not a block count: {}", value)))?;
        } else if MIN_COLLATERAL_RATIO_KEYS.contains(&key) {
            self.min_collateral_ratio = parse_ratio(value)
                .map_err(|reason| StakingError::invalid_setting(key, reason))?;
        } else if MINIPOOL_LAUNCH_AMOUNT_KEYS.contains(&key) {
            self.minipool_launch_amount = units::parse_amount(value)
                .map_err(|e| StakingError::invalid_setting(key, e.to_string()))?;
        } else {
            return Err(StakingError::invalid_setting(key, "unknown setting"));
        }

        Ok(())
    }
}

/// Parse a collateral ratio written as a fraction (`"0.1"`) or percentage (`"10%"`)
pub fn parse_ratio(value: &str) -> std::result::Result<Amount, String> {
    let value = value.trim();
    match value.strip_suffix('%') {
        Some(percent) => units::to_wei(percent.trim())
            .map(|scaled| scaled / 100)
            .map_err(|e| e.to_string()),
        None => units::to_wei(value).map_err(|e| e.to_string()),
    }
}

/// Serde adapter for ratios: written as decimal fractions, read as fractions or percentages
pub mod ratio_string {
    use super::parse_ratio;
    use nodestake_core::{units, Amount};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ratio: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&units::format_ether(*ratio))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_ratio(&s).map_err(de::Error::custom)
    }
}

/// Settings as seen by one engine decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsSnapshot {
    pub settings: ProtocolSettings,

    /// Commit version the snapshot was taken at
    pub version: u64,
}

#[derive(Debug)]
struct VersionedSettings {
    settings: ProtocolSettings,
    version: u64,
}

/// Governance collaborator's handle on the live settings
#[derive(Debug)]
pub struct SettingsStore {
    inner: RwLock<VersionedSettings>,
}

impl SettingsStore {
    /// Create a store, validating the initial settings
    pub fn new(settings: ProtocolSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            inner: RwLock::new(VersionedSettings { settings, version: 0 }),
        })
    }

    /// Latest committed settings
    pub fn snapshot(&self) -> SettingsSnapshot {
        let inner = self.inner.read();
        SettingsSnapshot {
            settings: inner.settings,
            version: inner.version,
        }
    }

    /// Current commit version
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// Apply a governance update atomically.
    ///
    /// The closure edits a copy; the copy is validated and only then
    /// committed. Returns the new version.
    pub fn update<F>(&self, f: F) -> Result<u64>
    where
        F: FnOnce(&mut ProtocolSettings) -> Result<()>,
    {
        let mut inner = self.inner.write();
        let mut candidate = inner.settings;
        f(&mut candidate)?;
        candidate.validate()?;

        inner.settings = candidate;
        inner.version += 1;
        info!(
            version = inner.version,
            cooldown_interval_blocks = candidate.cooldown_interval_blocks,
            min_collateral_ratio = %units::format_ether(candidate.min_collateral_ratio),
            minipool_launch_amount = %units::format_ether(candidate.minipool_launch_amount),
            "Protocol settings updated"
        );
        Ok(inner.version)
    }

    /// Set one named setting (e.g. `RewardsClaimIntervalBlocks`)
    pub fn set(&self, key: &str, value: &str) -> Result<u64> {
        self.update(|settings| settings.apply(key, value))
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self {
            inner: RwLock::new(VersionedSettings {
                settings: ProtocolSettings::default(),
                version: 0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ProtocolSettings::default().validate().is_ok());
    }

    #[test]
    fn test_set_by_dao_name() {
        let store = SettingsStore::default();
        let version = store.set("RewardsClaimIntervalBlocks", "0").unwrap();
        assert_eq!(version, 1);
        assert_eq!(store.snapshot().settings.cooldown_interval_blocks, 0);

        store.set("min_collateral_ratio", "15%").unwrap();
        assert_eq!(store.snapshot().settings.min_collateral_ratio, RATIO_SCALE * 15 / 100);

        store.set("MinipoolLaunchAmount", "16 ether").unwrap();
        assert_eq!(store.snapshot().settings.minipool_launch_amount, 16 * units::WEI_PER_ETHER);
        assert_eq!(store.version(), 3);
    }

    #[test]
    fn test_invalid_update_is_not_committed() {
        let store = SettingsStore::default();
        let before = store.snapshot();

        let err = store.set("min_collateral_ratio", "1.5").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSetting);

        let err = store.set("MinipoolLaunchAmount", "0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSetting);

        let err = store.set("NoSuchSetting", "1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSetting);

        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_parse_ratio_forms() {
        assert_eq!(parse_ratio("0.1").unwrap(), RATIO_SCALE / 10);
        assert_eq!(parse_ratio("10%").unwrap(), RATIO_SCALE / 10);
        assert_eq!(parse_ratio("150 %").unwrap(), RATIO_SCALE * 3 / 2);
        assert!(parse_ratio("ten").is_err());
    }

    #[test]
    fn test_settings_serde() {
        let json = r#"{
            "cooldown_interval_blocks": 12,
            "min_collateral_ratio": "20%",
            "minipool_launch_amount": "32 ether"
        }"#;
        let settings: ProtocolSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.cooldown_interval_blocks, 12);
        assert_eq!(settings.min_collateral_ratio, RATIO_SCALE / 5);
        assert_eq!(settings.minipool_launch_amount, 32 * units::WEI_PER_ETHER);

        let partial: ProtocolSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(partial, ProtocolSettings::default());
    }
}
