use std::ops::{Index, IndexMut};

use serde::Serialize;

/// Physical antenna/coverage position whose screenshots are grouped together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sector {
    Alpha,
    Beta,
    Gamma,
}

impl Sector {
    /// Processing order for service records.
    pub const ALL: [Sector; 3] = [Sector::Alpha, Sector::Beta, Sector::Gamma];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alpha => "alpha",
            Self::Beta => "beta",
            Self::Gamma => "gamma",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "alpha" => Some(Self::Alpha),
            "beta" => Some(Self::Beta),
            "gamma" => Some(Self::Gamma),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Alpha => 0,
            Self::Beta => 1,
            Self::Gamma => 2,
        }
    }
}

impl std::fmt::Display for Sector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-size table with one slot per sector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectorTable<T>([T; 3]);

impl<T> SectorTable<T> {
    pub fn iter(&self) -> impl Iterator<Item = (Sector, &T)> {
        Sector::ALL.into_iter().zip(self.0.iter())
    }
}

impl<T> Index<Sector> for SectorTable<T> {
    type Output = T;

    fn index(&self, sector: Sector) -> &T {
        &self.0[sector.index()]
    }
}

impl<T> IndexMut<Sector> for SectorTable<T> {
    fn index_mut(&mut self, sector: Sector) -> &mut T {
        &mut self.0[sector.index()]
    }
}
