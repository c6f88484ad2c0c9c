use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// One instrumented point in the target (a line, a basic block, an edge).
///
/// The engine never looks inside a `Location`; it only compares, hashes and
/// counts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location(pub u64);

impl Location {
    /// Derives a stable location id from a textual label such as `"parse:header"`.
    ///
    /// The id is the first 8 bytes of the label's MD5 digest, read little endian.
    pub fn from_label(label: &str) -> Self {
        let digest = md5::compute(label.as_bytes());
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&digest.0[..8]);
        Location(u64::from_le_bytes(id_bytes))
    }
}

/// Canonical identity of one exact set of reached locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId(pub [u8; 16]);

impl PathId {
    /// Parses the 32-character lowercase or uppercase hex form produced by `Display`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        if hex.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(hex.get(i * 2..i * 2 + 2)?, 16).ok()?;
        }
        Some(PathId(bytes))
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// The set of locations observed during a single execution.
///
/// Backed by an ordered set so that [`Coverage::path_id`] hashes a canonical
/// ordering regardless of the order in which the target reported locations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Coverage {
    locations: BTreeSet<Location>,
}

impl Coverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `location`; returns `true` if it was not already present.
    pub fn insert(&mut self, location: Location) -> bool {
        self.locations.insert(location)
    }

    /// Shorthand for `insert(Location::from_label(label))`, used by instrumented harnesses.
    pub fn hit(&mut self, label: &str) {
        self.locations.insert(Location::from_label(label));
    }

    pub fn contains(&self, location: &Location) -> bool {
        self.locations.contains(location)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn clear(&mut self) {
        self.locations.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.locations.iter()
    }

    /// Locations in this coverage that are absent from the cumulative `seen` set.
    pub fn new_relative_to(&self, seen: &HashSet<Location>) -> Vec<Location> {
        self.locations
            .iter()
            .filter(|location| !seen.contains(location))
            .copied()
            .collect()
    }

    /// MD5 over the sorted location ids. Equal sets always yield equal ids.
    pub fn path_id(&self) -> PathId {
        let mut context = md5::Context::new();
        for location in &self.locations {
            context.consume(location.0.to_le_bytes());
        }
        PathId(context.compute().0)
    }
}

impl FromIterator<Location> for Coverage {
    fn from_iter<T: IntoIterator<Item = Location>>(iter: T) -> Self {
        Self {
            locations: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Coverage {
    type Item = &'a Location;
    type IntoIter = std::collections::btree_set::Iter<'a, Location>;

    fn into_iter(self) -> Self::IntoIter {
        self.locations.iter()
    }
}

/// How many times each path has been produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathFrequency {
    counts: HashMap<PathId, u64>,
}

impl PathFrequency {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the count for `path_id`; returns `true` the first time the path is seen.
    pub fn record(&mut self, path_id: PathId) -> bool {
        let count = self.counts.entry(path_id).or_insert(0);
        *count += 1;
        *count == 1
    }

    pub fn get(&self, path_id: &PathId) -> u64 {
        self.counts.get(path_id).copied().unwrap_or(0)
    }

    pub fn contains(&self, path_id: &PathId) -> bool {
        self.counts.contains_key(path_id)
    }

    /// Number of distinct paths.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_id_ignores_insertion_order() {
        let forward: Coverage = [Location(1), Location(2), Location(3)].into_iter().collect();
        let mut backward = Coverage::new();
        backward.insert(Location(3));
        backward.insert(Location(2));
        backward.insert(Location(1));
        assert_eq!(forward.path_id(), backward.path_id());

        let other: Coverage = [Location(1), Location(2)].into_iter().collect();
        assert_ne!(forward.path_id(), other.path_id());
    }

    #[test]
    fn labels_map_to_stable_locations() {
        assert_eq!(Location::from_label("fn:main"), Location::from_label("fn:main"));
        assert_ne!(Location::from_label("fn:main"), Location::from_label("fn:exit"));

        let mut coverage = Coverage::new();
        coverage.hit("fn:main");
        coverage.hit("fn:main");
        assert_eq!(coverage.len(), 1);
        assert!(coverage.contains(&Location::from_label("fn:main")));
    }

    #[test]
    fn new_relative_to_reports_only_unseen_locations() {
        let coverage: Coverage = [Location(1), Location(2), Location(5)].into_iter().collect();
        let seen: HashSet<Location> = [Location(1), Location(5)].into_iter().collect();
        assert_eq!(coverage.new_relative_to(&seen), vec![Location(2)]);
    }

    #[test]
    fn path_id_hex_round_trips() {
        let path_id = Coverage::new().path_id();
        let hex = path_id.to_string();
        assert_eq!(hex.len(), 32);
        assert_eq!(PathId::from_hex(&hex), Some(path_id));
        assert_eq!(PathId::from_hex("not-hex"), None);
    }

    #[test]
    fn path_frequency_flags_first_sighting() {
        let mut table = PathFrequency::new();
        let path_id = PathId([7; 16]);
        assert!(table.record(path_id));
        assert!(!table.record(path_id));
        assert_eq!(table.get(&path_id), 2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&PathId([0; 16])), 0);
    }
}
