use skyhaven_protocol::{GridPos, IslandSnapshot, ResourceAmount, Size, UnknownBuildingType};

/// Why a game operation was refused, or why its write-back failed.
///
/// Every variant except `PersistenceFailed` is raised before any state changes.
/// `PersistenceFailed` means the in-memory mutation stands and `snapshot` reflects it.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("unknown building type: {0}")]
    UnknownBuildingType(String),

    #[error("a {size} footprint at {position} does not fit on the {grid} grid")]
    OutOfBounds {
        position: GridPos,
        size: Size,
        grid: Size,
    },

    #[error("footprint at {position} overlaps building {building_id}")]
    Overlaps {
        position: GridPos,
        building_id: String,
    },

    #[error("{position} is not next to an existing building")]
    NotAdjacent { position: GridPos },

    #[error("not enough resources: need {required}, have {available}, short by {shortfall}")]
    InsufficientResources {
        required: ResourceAmount,
        available: ResourceAmount,
        shortfall: ResourceAmount,
    },

    #[error("building not found: {building_id}")]
    NotFound { building_id: String },

    #[error("invalid island name: {0}")]
    InvalidName(String),

    #[error("write-back to the island store failed: {source}")]
    PersistenceFailed {
        snapshot: Box<IslandSnapshot>,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl GameError {
    /// Stable machine-readable code for the wire.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownBuildingType(_) => "unknown_building_type",
            Self::OutOfBounds { .. } => "out_of_bounds",
            Self::Overlaps { .. } => "overlaps",
            Self::NotAdjacent { .. } => "not_adjacent",
            Self::InsufficientResources { .. } => "insufficient_resources",
            Self::NotFound { .. } => "not_found",
            Self::InvalidName(_) => "invalid_name",
            Self::PersistenceFailed { .. } => "persistence_failed",
        }
    }

    pub(crate) fn insufficient(required: ResourceAmount, available: ResourceAmount) -> Self {
        Self::InsufficientResources {
            required,
            available,
            shortfall: available.shortfall(&required),
        }
    }

    pub(crate) fn persistence(snapshot: IslandSnapshot, err: anyhow::Error) -> Self {
        Self::PersistenceFailed {
            snapshot: Box::new(snapshot),
            source: err.into(),
        }
    }
}

impl From<UnknownBuildingType> for GameError {
    fn from(e: UnknownBuildingType) -> Self {
        Self::UnknownBuildingType(e.0)
    }
}
