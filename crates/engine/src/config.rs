use anyhow::Context;
use serde::{Deserialize, Serialize};
use skyhaven_protocol::{ResourceAmount, Size};
use std::path::Path;
use std::time::Duration;

/// Settings for a fresh island and the production loop.
///
/// Only applies when the store has no island yet; an existing island keeps
/// its stored grid, name and balances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub island_name: String,
    pub grid: Size,
    pub initial_resources: ResourceAmount,
    pub tick_secs: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            island_name: "Novice Isle".to_string(),
            grid: Size::new(10, 10),
            initial_resources: ResourceAmount::new(500, 250, 50),
            tick_secs: 10,
        }
    }
}

impl GameConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        let cfg: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse config: {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.grid.width >= 1 && self.grid.height >= 1,
            "grid must be at least 1x1, got {}",
            self.grid
        );
        anyhow::ensure!(
            self.initial_resources.is_non_negative(),
            "initial resources must not be negative"
        );
        anyhow::ensure!(self.tick_secs >= 1, "tick_secs must be at least 1");
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_overrides_merge_with_defaults() {
        let cfg: GameConfig = serde_yaml::from_str(
            "island_name: Cloudreach\ngrid: { width: 12, height: 8 }\ntick_secs: 5\n",
        )
        .unwrap();
        assert_eq!(cfg.island_name, "Cloudreach");
        assert_eq!(cfg.grid, Size::new(12, 8));
        assert_eq!(cfg.initial_resources, ResourceAmount::new(500, 250, 50));
        assert_eq!(cfg.tick_interval(), Duration::from_secs(5));
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_empty_grid() {
        let cfg = GameConfig {
            grid: Size::new(0, 10),
            ..GameConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
