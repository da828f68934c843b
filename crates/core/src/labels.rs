//! Translation of raw model labels into display labels.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown emotion map: {0}")]
pub struct UnknownMapError(pub String);

/// A named, immutable lookup table. Labels missing from the table pass through.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EmotionMap {
    #[default]
    ShortToFull,
    None,
}

const SHORT_TO_FULL: &[(&str, &str)] = &[
    ("ang", "angry"),
    ("sad", "sad"),
    ("hap", "happy"),
    ("neu", "neutral"),
];

impl EmotionMap {
    pub const ALL: &'static [EmotionMap] = &[EmotionMap::ShortToFull, EmotionMap::None];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionMap::ShortToFull => "short_to_full",
            EmotionMap::None => "none",
        }
    }

    fn table(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            EmotionMap::ShortToFull => SHORT_TO_FULL,
            EmotionMap::None => &[],
        }
    }

    pub fn map<'a>(&self, raw_label: &'a str) -> &'a str {
        self.table()
            .iter()
            .find(|(from, _)| *from == raw_label)
            .map(|(_, to)| *to)
            .unwrap_or(raw_label)
    }
}

impl fmt::Display for EmotionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmotionMap {
    type Err = UnknownMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmotionMap::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownMapError(s.to_owned()))
    }
}

/// Looks up `map_name` and translates `raw_label` through it.
pub fn map_label(raw_label: &str, map_name: &str) -> Result<String, UnknownMapError> {
    let map: EmotionMap = map_name.parse()?;
    Ok(map.map(raw_label).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_to_full_expands_known_labels() {
        let m = EmotionMap::ShortToFull;
        assert_eq!(m.map("ang"), "angry");
        assert_eq!(m.map("hap"), "happy");
        assert_eq!(m.map("neu"), "neutral");
        assert_eq!(m.map("sad"), "sad");
    }

    #[test]
    fn lookup_miss_passes_label_through() {
        assert_eq!(EmotionMap::ShortToFull.map("fear"), "fear");
        assert_eq!(EmotionMap::ShortToFull.map(""), "");
    }

    #[test]
    fn none_map_is_identity() {
        for raw in ["ang", "hap", "neu", "sad", "angry", "surprised", "", "NEU"] {
            assert_eq!(EmotionMap::None.map(raw), raw);
        }
    }

    #[test]
    fn unknown_map_name_is_an_error() {
        let err = map_label("ang", "bogus").unwrap_err();
        assert_eq!(err, UnknownMapError("bogus".to_owned()));
        assert_eq!(err.to_string(), "unknown emotion map: bogus");
    }

    #[test]
    fn map_label_resolves_by_name() {
        assert_eq!(map_label("ang", "short_to_full").unwrap(), "angry");
        assert_eq!(map_label("ang", "none").unwrap(), "ang");
    }

    #[test]
    fn names_round_trip_through_display() {
        for m in EmotionMap::ALL {
            assert_eq!(m.to_string().parse::<EmotionMap>().unwrap(), *m);
        }
    }
}
