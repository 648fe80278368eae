//! Quality tiers and their rasterization scales

use std::fmt;

use serde::{Deserialize, Serialize};

/// Discrete image quality level, ordered low to high.
///
/// Each tier is bound to a fixed rasterization scale. "Best available"
/// always means the highest tier present in the cache for a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Fast, low fidelity render shown while better tiers load
    Preview,
    Medium,
    Final,
    Ultra,
}

impl Tier {
    /// Number of tiers
    pub const COUNT: usize = 4;

    /// All tiers from lowest to highest
    pub const ALL: [Tier; Self::COUNT] = [Tier::Preview, Tier::Medium, Tier::Final, Tier::Ultra];

    /// The tier every escalation run starts from
    pub const LOWEST: Tier = Tier::Preview;

    /// Rasterization scale factor for this tier
    #[must_use]
    pub const fn scale(self) -> f32 {
        match self {
            Tier::Preview => 1.0,
            Tier::Medium => 2.0,
            Tier::Final => 4.0,
            Tier::Ultra => 6.0,
        }
    }

    /// Whether the rasterizer should take its cheapest render path
    #[must_use]
    pub const fn is_fast(self) -> bool {
        matches!(self, Tier::Preview)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Tier::Preview => "Preview",
            Tier::Medium => "Medium",
            Tier::Final => "Final",
            Tier::Ultra => "Ultra",
        }
    }

    /// Position in [`Tier::ALL`]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The next higher tier, if any
    #[must_use]
    pub fn next(self) -> Option<Tier> {
        Self::ALL.get(self.index() + 1).copied()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
