//! Character → screen coordinate calibration store

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::constants::storage;
use crate::persistence::KeyValueStore;

/// Screen position in root-window pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// One calibrated character, as listed to callers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinateEntry {
    pub character: char,
    pub x: f32,
    pub y: f32,
}

/// Calibration map backed by a key-value store
///
/// Stored as a JSON object keyed by the character. Re-registering a character
/// replaces its coordinate.
pub struct CoordinateStore {
    kv: Arc<dyn KeyValueStore>,
    entries: BTreeMap<char, Point>,
}

impl CoordinateStore {
    /// Load from the backing store; unreadable data yields an empty map
    pub fn open(kv: Arc<dyn KeyValueStore>) -> Self {
        let entries = load_coordinates(kv.as_ref());
        Self { kv, entries }
    }

    pub fn reload(&mut self) {
        self.entries = load_coordinates(self.kv.as_ref());
    }

    pub fn save(&mut self, character: char, point: Point) -> Result<()> {
        let mut entries = self.entries.clone();
        entries.insert(character, point);
        self.commit(entries)?;
        info!(character = %character, x = point.x, y = point.y, "Saved coordinate");
        Ok(())
    }

    pub fn get(&self, character: char) -> Option<Point> {
        self.entries.get(&character).copied()
    }

    pub fn get_all(&self) -> Vec<CoordinateEntry> {
        self.entries
            .iter()
            .map(|(&character, point)| CoordinateEntry {
                character,
                x: point.x,
                y: point.y,
            })
            .collect()
    }

    /// Remove one character; returns false if it was not calibrated
    pub fn delete(&mut self, character: char) -> Result<bool> {
        if !self.entries.contains_key(&character) {
            return Ok(false);
        }
        let mut entries = self.entries.clone();
        entries.remove(&character);
        self.commit(entries)?;
        info!(character = %character, "Deleted coordinate");
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.kv
            .remove(storage::COORDINATES_KEY)
            .context("Failed to clear coordinates")?;
        let count = self.entries.len();
        self.entries.clear();
        info!(count = count, "Cleared all coordinates");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn commit(&mut self, entries: BTreeMap<char, Point>) -> Result<()> {
        let keyed: BTreeMap<String, Point> =
            entries.iter().map(|(c, p)| (c.to_string(), *p)).collect();
        let json = serde_json::to_string_pretty(&keyed).context("Failed to serialize coordinates")?;
        self.kv
            .set(storage::COORDINATES_KEY, &json)
            .context("Failed to persist coordinates")?;
        self.entries = entries;
        Ok(())
    }
}

fn load_coordinates(kv: &dyn KeyValueStore) -> BTreeMap<char, Point> {
    let raw = match kv.get(storage::COORDINATES_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return BTreeMap::new(),
        Err(e) => {
            warn!(error = ?e, "Failed to read coordinates, starting with none");
            return BTreeMap::new();
        }
    };

    let keyed: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&raw) {
        Ok(keyed) => keyed,
        Err(e) => {
            warn!(error = %e, "Stored coordinates are not a JSON object, starting with none");
            return BTreeMap::new();
        }
    };

    let mut entries = BTreeMap::new();
    for (key, value) in keyed {
        let mut chars = key.chars();
        let character = match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => {
                warn!(key = %key, "Skipping coordinate whose key is not a single character");
                continue;
            }
        };
        match serde_json::from_value::<Point>(value) {
            Ok(point) => {
                entries.insert(character, point);
            }
            Err(e) => warn!(key = %key, error = %e, "Skipping unreadable coordinate"),
        }
    }
    entries
}
