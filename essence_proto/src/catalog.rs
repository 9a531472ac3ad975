use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed catalog of essence variations a mek part can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EssenceKind {
    Stone,
    Disco,
    Paul,
    Cartoon,
    Candy,
    Tiles,
    Moss,
    Bullish,
    Journalist,
    Laser,
    Flashbulb,
    Drill,
}

impl EssenceKind {
    pub const VARIANTS: [EssenceKind; 12] = [
        EssenceKind::Stone,
        EssenceKind::Disco,
        EssenceKind::Paul,
        EssenceKind::Cartoon,
        EssenceKind::Candy,
        EssenceKind::Tiles,
        EssenceKind::Moss,
        EssenceKind::Bullish,
        EssenceKind::Journalist,
        EssenceKind::Laser,
        EssenceKind::Flashbulb,
        EssenceKind::Drill,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            EssenceKind::Stone => "stone",
            EssenceKind::Disco => "disco",
            EssenceKind::Paul => "paul",
            EssenceKind::Cartoon => "cartoon",
            EssenceKind::Candy => "candy",
            EssenceKind::Tiles => "tiles",
            EssenceKind::Moss => "moss",
            EssenceKind::Bullish => "bullish",
            EssenceKind::Journalist => "journalist",
            EssenceKind::Laser => "laser",
            EssenceKind::Flashbulb => "flashbulb",
            EssenceKind::Drill => "drill",
        }
    }

    pub const fn index(self) -> usize {
        match self {
            EssenceKind::Stone => 0,
            EssenceKind::Disco => 1,
            EssenceKind::Paul => 2,
            EssenceKind::Cartoon => 3,
            EssenceKind::Candy => 4,
            EssenceKind::Tiles => 5,
            EssenceKind::Moss => 6,
            EssenceKind::Bullish => 7,
            EssenceKind::Journalist => 8,
            EssenceKind::Laser => 9,
            EssenceKind::Flashbulb => 10,
            EssenceKind::Drill => 11,
        }
    }

    pub fn from_index(index: usize) -> Option<EssenceKind> {
        Self::VARIANTS.get(index).copied()
    }

    pub const fn variants() -> &'static [EssenceKind; 12] {
        &Self::VARIANTS
    }
}

impl FromStr for EssenceKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::VARIANTS
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or(())
    }
}

impl fmt::Display for EssenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a buff came from, for attribution display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuffSourceType {
    Achievement,
    Event,
    Equipment,
    Consumable,
}

impl BuffSourceType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            BuffSourceType::Achievement => "achievement",
            BuffSourceType::Event => "event",
            BuffSourceType::Equipment => "equipment",
            BuffSourceType::Consumable => "consumable",
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            BuffSourceType::Achievement => "Achievement",
            BuffSourceType::Event => "Event",
            BuffSourceType::Equipment => "Equipment",
            BuffSourceType::Consumable => "Consumable",
        }
    }
}

impl FromStr for BuffSourceType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "achievement" => Ok(BuffSourceType::Achievement),
            "event" => Ok(BuffSourceType::Event),
            "equipment" => Ok(BuffSourceType::Equipment),
            "consumable" => Ok(BuffSourceType::Consumable),
            _ => Err(()),
        }
    }
}

/// Which balances a buff applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuffScope {
    AllKinds,
    Kind(EssenceKind),
}

impl BuffScope {
    pub fn applies_to(&self, kind: EssenceKind) -> bool {
        match self {
            BuffScope::AllKinds => true,
            BuffScope::Kind(scoped) => *scoped == kind,
        }
    }
}
