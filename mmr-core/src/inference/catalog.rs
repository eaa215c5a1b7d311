use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::{
    consts::{MODEL_EXTENSION, MODEL_RELEASE},
    crop::params::CropKind,
};

/// Recognition task a model solves, from coarse to fine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MmrTask {
    /// Category, make, model, generation, variation.
    Vcmmgvct,
    /// Category, make, model.
    Vcmmct,
    /// Category, make.
    Vcmct,
    /// Category only.
    Vcct,
}

impl MmrTask {
    pub const ALL: [MmrTask; 4] = [Self::Vcmmgvct, Self::Vcmmct, Self::Vcmct, Self::Vcct];

    pub fn code(self) -> &'static str {
        match self {
            Self::Vcmmgvct => "VCMMGVCT",
            Self::Vcmmct => "VCMMCT",
            Self::Vcmct => "VCMCT",
            Self::Vcct => "VCCT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelPrecision {
    #[serde(rename = "FAST")]
    Fast,
    #[serde(rename = "PREC")]
    Precise,
}

impl ModelPrecision {
    pub fn code(self) -> &'static str {
        match self {
            Self::Fast => "FAST",
            Self::Precise => "PREC",
        }
    }
}

fn kind_prefix(kind: CropKind) -> &'static str {
    match kind {
        CropKind::LicensePlate => "MMR",
        CropKind::CarBox => "MMRBOX",
    }
}

/// Identity of a catalog model, encoded in its file name as
/// `<PREFIX>_<TASK>_<PRECISION>_<RELEASE>.dat`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelId {
    pub kind: CropKind,
    pub task: MmrTask,
    pub precision: ModelPrecision,
    pub release: String,
}

impl ModelId {
    pub fn new(kind: CropKind, task: MmrTask, precision: ModelPrecision) -> Self {
        Self {
            kind,
            task,
            precision,
            release: MODEL_RELEASE.to_string(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{self}.{MODEL_EXTENSION}")
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            kind_prefix(self.kind),
            self.task.code(),
            self.precision.code(),
            self.release
        )
    }
}

impl FromStr for ModelId {
    type Err = ();

    /// Accepts names with or without the artifact extension.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let stem = name
            .strip_suffix(MODEL_EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .unwrap_or(name);

        let mut parts = stem.split('_');
        let kind = match parts.next() {
            Some("MMR") => CropKind::LicensePlate,
            Some("MMRBOX") => CropKind::CarBox,
            _ => return Err(()),
        };
        let task = parts
            .next()
            .and_then(|code| MmrTask::ALL.into_iter().find(|t| t.code() == code))
            .ok_or(())?;
        let precision = match parts.next() {
            Some("FAST") => ModelPrecision::Fast,
            Some("PREC") => ModelPrecision::Precise,
            _ => return Err(()),
        };
        let release = parts.next().filter(|r| !r.is_empty()).ok_or(())?;
        if parts.next().is_some() {
            return Err(());
        }

        Ok(Self {
            kind,
            task,
            precision,
            release: release.to_string(),
        })
    }
}

/// File name of a model in the current release.
pub fn model_file_name(task: MmrTask, kind: CropKind, precision: ModelPrecision) -> String {
    ModelId::new(kind, task, precision).file_name()
}

/// Crop kind a catalog model expects, `None` for models outside the catalog.
pub fn crop_kind_of(model_name: &str) -> Option<CropKind> {
    model_name.parse::<ModelId>().ok().map(|id| id.kind)
}
