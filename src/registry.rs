// Name-keyed asset maps
//
// Ownership moves in on insert and back out on remove; releasing the backend
// handle of a removed or displaced record is the caller's job.

use std::collections::HashMap;

#[derive(Debug)]
pub struct AssetMap<T> {
    entries: HashMap<String, T>,
}

impl<T> Default for AssetMap<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> AssetMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, handing back whatever previously held the name
    pub fn insert(&mut self, name: impl Into<String>, record: T) -> Option<T> {
        self.entries.insert(name.into(), record)
    }

    pub fn remove(&mut self, name: &str) -> Option<T> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.entries.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Take every record out, leaving the map empty
    pub fn drain(&mut self) -> impl Iterator<Item = (String, T)> + '_ {
        self.entries.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_returns_displaced_record() {
        let mut map = AssetMap::new();
        assert!(map.insert("a", 1).is_none());
        assert_eq!(map.insert("a", 2), Some(1));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("a"), Some(&2));
    }

    #[test]
    fn remove_missing_leaves_map_untouched() {
        let mut map = AssetMap::new();
        map.insert("a", 1);
        assert!(map.remove("missing").is_none());
        assert_eq!(map.len(), 1);
        assert_eq!(map.remove("a"), Some(1));
        assert!(map.is_empty());
    }

    #[test]
    fn drain_empties_map() {
        let mut map = AssetMap::new();
        map.insert("a", 1);
        map.insert("b", 2);
        let mut drained: Vec<_> = map.drain().map(|(_, v)| v).collect();
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
        assert!(map.is_empty());
    }
}
