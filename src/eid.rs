use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Entity id used for queue items and analyses.
///
/// ULID strings sort by creation time, which keeps queue dumps and
/// debug logs readable without a separate timestamp column.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Eid(String);

impl Eid {
    #[inline]
    pub fn new() -> Eid {
        Eid(rusty_ulid::generate_ulid_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Eid {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Eid {
    fn from(s: &str) -> Self {
        Eid(s.to_string())
    }
}

impl From<String> for Eid {
    fn from(s: String) -> Self {
        Eid(s)
    }
}

impl From<Eid> for String {
    fn from(id: Eid) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = Eid::new();
        let b = Eid::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_roundtrips_through_serde() {
        let id = Eid::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: Eid = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
