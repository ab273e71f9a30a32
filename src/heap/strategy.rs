use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

use log::debug;

use super::block::{Arena, BlockId};
use crate::config::ConfigError;

/// Placement policy used to choose the free block an allocation is
/// carved from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Take the lowest-address free block that is large enough.
    #[default]
    First,
    /// Take the free block leaving the smallest leftover once the
    /// request is carved from it. Ties go to the lowest address.
    Best,
    /// Take the largest free block of the whole chain, provided it is
    /// large enough. Ties go to the lowest address.
    Worst,
}

impl Strategy {
    /// Strategies in menu order.
    pub const ALL: [Strategy; 3] = [Strategy::First, Strategy::Best, Strategy::Worst];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::First => "First Fit",
            Strategy::Best => "Best Fit",
            Strategy::Worst => "Worst Fit",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept "best", "Best Fit", "best-fit" and "best_fit" alike.
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], " ");
        let name = normalized
            .strip_suffix(" fit")
            .unwrap_or(normalized.as_str())
            .trim();

        match name {
            "first" => Ok(Strategy::First),
            "best" => Ok(Strategy::Best),
            "worst" => Ok(Strategy::Worst),
            _ => Err(ConfigError::UnknownStrategy(s.to_owned())),
        }
    }
}

/// Find a free block of at least `total_size` bytes (header and footer
/// included) according to the given strategy. The chain is only read.
pub fn find_free_block(
    arena: &Arena,
    total_size: usize,
    strategy: Strategy,
) -> Option<BlockId> {
    let fits = |block: &BlockId| arena.is_free(*block) && arena.size(*block) >= total_size;

    let found = match strategy {
        Strategy::First => arena.blocks().find(fits),
        // `min_by_key` keeps the first of several equal minimums, so
        // ties resolve to the lowest address.
        Strategy::Best => arena
            .blocks()
            .filter(fits)
            .min_by_key(|&block| arena.size(block) - total_size),
        // The largest free block is picked before checking whether it
        // fits at all.
        Strategy::Worst => arena
            .blocks()
            .filter(|&block| arena.is_free(block))
            .min_by_key(|&block| Reverse(arena.size(block)))
            .filter(|&block| arena.size(block) >= total_size),
    };

    debug!("{strategy} search for {total_size} bytes: {found:?}");
    found
}
