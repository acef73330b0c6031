use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// MRI acquisition type of one series, or a derived segmentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Modality {
    T1,
    T1ce,
    T2,
    Flair,
    Seg,
}

impl Modality {
    /// The four canonical anatomical modalities, in mapping order.
    pub const ANATOMICAL: [Modality; 4] =
        [Modality::T1, Modality::T1ce, Modality::T2, Modality::Flair];

    pub fn name(self) -> &'static str {
        match self {
            Modality::T1 => "t1",
            Modality::T1ce => "t1ce",
            Modality::T2 => "t2",
            Modality::Flair => "flair",
            Modality::Seg => "seg",
        }
    }

    /// Input flag of the batch registration pipeline. A segmentation has no
    /// slot there.
    pub fn registration_flag(self) -> Option<&'static str> {
        match self {
            Modality::T1 => Some("-t1"),
            Modality::T1ce => Some("-t1c"),
            Modality::T2 => Some("-t2"),
            Modality::Flair => Some("-fl"),
            Modality::Seg => None,
        }
    }

    pub fn is_anatomical(self) -> bool {
        !matches!(self, Modality::Seg)
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Modality {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "t1" => Ok(Modality::T1),
            // t1gd is the gadolinium-enhanced alias seen in older studies
            "t1ce" | "t1gd" => Ok(Modality::T1ce),
            "t2" => Ok(Modality::T2),
            "flair" => Ok(Modality::Flair),
            "seg" => Ok(Modality::Seg),
            other => Err(PipelineError::UnknownModality(other.to_string())),
        }
    }
}

/// Transform requested from the single-volume registration application.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RegistrationKind {
    #[default]
    Rigid,
    Affine,
    Deformable,
}

impl RegistrationKind {
    pub fn as_arg(self) -> &'static str {
        match self {
            RegistrationKind::Rigid => "RIGID",
            RegistrationKind::Affine => "AFFINE",
            RegistrationKind::Deformable => "DEFORMABLE",
        }
    }
}
