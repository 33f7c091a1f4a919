use crate::GameError;
use skyhaven_protocol::{BuildingType, BuildingTypeInfo};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const BUILTIN_CATALOG: &str = include_str!("../catalog.json");

/// Longest footprint side a catalog entry may declare.
const MAX_FOOTPRINT_SIDE: i64 = 64;

/// Failure to load the building table. Fatal at startup, never afterwards.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("parse building catalog")]
    Parse(#[from] serde_json::Error),

    #[error("read building catalog: {}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("building catalog lists {0} twice")]
    Duplicate(BuildingType),

    #[error("building catalog is missing {0}")]
    Missing(BuildingType),

    #[error("{0} has an empty footprint")]
    EmptyFootprint(BuildingType),

    #[error("{0} footprint is larger than {max} cells on a side", max = MAX_FOOTPRINT_SIDE)]
    OversizedFootprint(BuildingType),

    #[error("{0} has a negative cost")]
    NegativeCost(BuildingType),

    #[error("{0} has negative production")]
    NegativeProduction(BuildingType),
}

/// Static building table, keyed by type. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: BTreeMap<BuildingType, BuildingTypeInfo>,
}

impl Catalog {
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let rows: Vec<BuildingTypeInfo> = serde_json::from_str(raw)?;
        let mut entries = BTreeMap::new();
        for row in rows {
            if row.size.width < 1 || row.size.height < 1 {
                return Err(CatalogError::EmptyFootprint(row.kind));
            }
            if row.size.width > MAX_FOOTPRINT_SIDE || row.size.height > MAX_FOOTPRINT_SIDE {
                return Err(CatalogError::OversizedFootprint(row.kind));
            }
            if !row.cost.is_non_negative() {
                return Err(CatalogError::NegativeCost(row.kind));
            }
            if row.production.is_some_and(|p| !p.is_non_negative()) {
                return Err(CatalogError::NegativeProduction(row.kind));
            }
            let kind = row.kind;
            if entries.insert(kind, row).is_some() {
                return Err(CatalogError::Duplicate(kind));
            }
        }
        if let Some(missing) = BuildingType::ALL
            .into_iter()
            .find(|kind| !entries.contains_key(kind))
        {
            return Err(CatalogError::Missing(missing));
        }
        Ok(Self { entries })
    }

    pub fn lookup(&self, kind: BuildingType) -> Result<&BuildingTypeInfo, GameError> {
        self.entries
            .get(&kind)
            .ok_or_else(|| GameError::UnknownBuildingType(kind.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuildingTypeInfo> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
