//! Ruleset identifiers shared by the settings, the controller and the engines.

use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

// =============================================================================
// Ruleset Identifiers
// =============================================================================

/// One of the pre-authored network filtering rulesets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RulesetId {
    Ads,
    Images,
    Media,
}

impl RulesetId {
    /// All rulesets, in the order they are reported.
    pub const ALL: [RulesetId; 3] = [RulesetId::Ads, RulesetId::Images, RulesetId::Media];

    /// Identifier used by the manifest and the ruleset engine.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ads => "ads",
            Self::Images => "images",
            Self::Media => "media",
        }
    }

    fn flag(self) -> RulesetSet {
        match self {
            Self::Ads => RulesetSet::ADS,
            Self::Images => RulesetSet::IMAGES,
            Self::Media => RulesetSet::MEDIA,
        }
    }
}

impl fmt::Display for RulesetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RulesetId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ads" => Ok(Self::Ads),
            "images" => Ok(Self::Images),
            "media" => Ok(Self::Media),
            other => Err(EngineError::UnknownRuleset(other.to_string())),
        }
    }
}

// =============================================================================
// Ruleset Sets (bit mask over the fixed universe)
// =============================================================================

bitflags::bitflags! {
    /// Set of rulesets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RulesetSet: u8 {
        const ADS = 1 << 0;
        const IMAGES = 1 << 1;
        const MEDIA = 1 << 2;

        /// The whole universe of rulesets
        const UNIVERSE = Self::ADS.bits() | Self::IMAGES.bits() | Self::MEDIA.bits();
    }
}

impl RulesetSet {
    /// Members missing from this set, within the universe.
    pub fn complement_in_universe(self) -> Self {
        Self::UNIVERSE.difference(self)
    }

    pub fn contains_id(self, id: RulesetId) -> bool {
        self.contains(id.flag())
    }

    pub fn insert_id(&mut self, id: RulesetId) {
        self.insert(id.flag());
    }

    pub fn remove_id(&mut self, id: RulesetId) {
        self.remove(id.flag());
    }

    /// Members in fixed ads, images, media order.
    pub fn ids(self) -> impl Iterator<Item = RulesetId> {
        RulesetId::ALL.into_iter().filter(move |id| self.contains_id(*id))
    }

    /// String identifiers, as sent to the ruleset engine.
    pub fn to_strings(self) -> Vec<String> {
        self.ids().map(|id| id.as_str().to_string()).collect()
    }
}

impl FromIterator<RulesetId> for RulesetSet {
    fn from_iter<T: IntoIterator<Item = RulesetId>>(iter: T) -> Self {
        let mut set = Self::empty();
        for id in iter {
            set.insert_id(id);
        }
        set
    }
}

impl fmt::Display for RulesetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.ids().map(RulesetId::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

// =============================================================================
// Ruleset Update Request
// =============================================================================

/// One atomic enable+disable request to the ruleset engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RulesetUpdate {
    pub enable: RulesetSet,
    pub disable: RulesetSet,
}

impl RulesetUpdate {
    /// Enable exactly `enabled`; everything else in the universe is disabled.
    pub fn exact(enabled: RulesetSet) -> Self {
        let enable = enabled & RulesetSet::UNIVERSE;
        Self {
            enable,
            disable: enable.complement_in_universe(),
        }
    }

    /// Enable everything without disabling anything.
    pub fn enable_all() -> Self {
        Self {
            enable: RulesetSet::UNIVERSE,
            disable: RulesetSet::empty(),
        }
    }
}
