use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;

/// Steam, ore and aether. Signed so that spends can be expressed as deltas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceAmount {
    #[serde(default)]
    pub steam: i64,
    #[serde(default)]
    pub ore: i64,
    #[serde(default)]
    pub aether: i64,
}

impl ResourceAmount {
    pub const ZERO: Self = Self::new(0, 0, 0);

    pub const fn new(steam: i64, ore: i64, aether: i64) -> Self {
        Self { steam, ore, aether }
    }

    /// True when every field is at least the matching field of `cost`.
    pub fn covers(&self, cost: &ResourceAmount) -> bool {
        self.steam >= cost.steam && self.ore >= cost.ore && self.aether >= cost.aether
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn is_non_negative(&self) -> bool {
        self.steam >= 0 && self.ore >= 0 && self.aether >= 0
    }

    /// Per-field amount still missing to cover `cost`; zero where already covered.
    pub fn shortfall(&self, cost: &ResourceAmount) -> ResourceAmount {
        Self {
            steam: (cost.steam - self.steam).max(0),
            ore: (cost.ore - self.ore).max(0),
            aether: (cost.aether - self.aether).max(0),
        }
    }
}

impl Add for ResourceAmount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            steam: self.steam + rhs.steam,
            ore: self.ore + rhs.ore,
            aether: self.aether + rhs.aether,
        }
    }
}

impl AddAssign for ResourceAmount {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for ResourceAmount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self + (-rhs)
    }
}

impl SubAssign for ResourceAmount {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for ResourceAmount {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.steam, -self.ore, -self.aether)
    }
}

impl Mul<i64> for ResourceAmount {
    type Output = Self;

    fn mul(self, factor: i64) -> Self {
        Self::new(self.steam * factor, self.ore * factor, self.aether * factor)
    }
}

impl fmt::Display for ResourceAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "steam {} / ore {} / aether {}",
            self.steam, self.ore, self.aether
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown building type: {0}")]
pub struct UnknownBuildingType(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildingType {
    SteamGenerator,
    OreMine,
    AetherCollector,
    Workshop,
    Barracks,
    SkyForge,
    SkyDock,
}

impl BuildingType {
    pub const ALL: [BuildingType; 7] = [
        Self::SteamGenerator,
        Self::OreMine,
        Self::AetherCollector,
        Self::Workshop,
        Self::Barracks,
        Self::SkyForge,
        Self::SkyDock,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SteamGenerator => "steam_generator",
            Self::OreMine => "ore_mine",
            Self::AetherCollector => "aether_collector",
            Self::Workshop => "workshop",
            Self::Barracks => "barracks",
            Self::SkyForge => "sky_forge",
            Self::SkyDock => "sky_dock",
        }
    }
}

impl fmt::Display for BuildingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildingType {
    type Err = UnknownBuildingType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownBuildingType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPos {
    pub x: i64,
    pub y: i64,
}

impl GridPos {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for GridPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Width x height in grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: i64,
    pub height: i64,
}

impl Size {
    pub const fn new(width: i64, height: i64) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Geometry {
    Box,
    Cylinder,
    Sphere,
}

impl Default for Geometry {
    fn default() -> Self {
        Self::Box
    }
}

/// How a renderer should draw a placeholder mesh for a building type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderDescriptor {
    #[serde(default)]
    pub geometry: Geometry,
    pub color: String,
    /// Mesh extents at level 1, before any per-level scaling the renderer applies.
    pub scale: [f32; 3],
}

/// One catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingTypeInfo {
    #[serde(rename = "type")]
    pub kind: BuildingType,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cost: ResourceAmount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production: Option<ResourceAmount>,
    pub size: Size,
    /// Nominal seconds to build. Shown to players; construction is instant.
    #[serde(rename = "buildTime")]
    pub build_time_secs: u32,
    pub render: RenderDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Building {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BuildingType,
    pub level: u32,
    pub position: GridPos,
    pub size: Size,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IslandSnapshot {
    pub island_id: String,
    pub island_name: String,
    pub island_level: u32,
    pub grid_size: Size,
    pub buildings: Vec<Building>,
    pub resources: ResourceAmount,
}

/// Pushed to subscribers after every accepted mutation and every production tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IslandUpdate {
    pub event: String,
    pub rev: u64,
    pub snapshot: IslandSnapshot,
}

impl IslandUpdate {
    pub fn new(event: impl Into<String>, rev: u64, snapshot: IslandSnapshot) -> Self {
        Self {
            event: event.into(),
            rev,
            snapshot,
        }
    }
}

pub mod events {
    pub const BUILDING_CONSTRUCTED: &str = "building.constructed";
    pub const BUILDING_UPGRADED: &str = "building.upgraded";
    pub const BUILDING_DEMOLISHED: &str = "building.demolished";
    pub const ISLAND_RENAMED: &str = "island.renamed";
    pub const ISLAND_RECONCILED: &str = "island.reconciled";
    pub const PRODUCTION_TICK: &str = "production.tick";
}
