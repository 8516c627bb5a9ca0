use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Named credential slots (identity keys, session keys, pre-keys, ...)
/// mapped to opaque binary payloads.
///
/// On the wire each payload is base64-encoded so the set survives JSON.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialSet {
    slots: BTreeMap<String, Vec<u8>>,
}

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, slot: &str) -> Option<&[u8]> {
        self.slots.get(slot).map(Vec::as_slice)
    }

    pub fn insert(&mut self, slot: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.slots.insert(slot.into(), payload.into());
    }

    pub fn remove(&mut self, slot: &str) -> Option<Vec<u8>> {
        self.slots.remove(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.slots.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn slot_names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Apply a mutation emitted by the protocol library.
    pub fn apply(&mut self, delta: &CredentialDelta) {
        for (slot, payload) in delta.upserts.iter() {
            self.insert(slot, payload);
        }
        for slot in &delta.removed {
            self.slots.remove(slot);
        }
    }

    pub fn to_encoded(&self) -> BTreeMap<String, String> {
        self.slots
            .iter()
            .map(|(k, v)| (k.clone(), STANDARD.encode(v)))
            .collect()
    }

    pub fn from_encoded(encoded: BTreeMap<String, String>) -> Result<Self, base64::DecodeError> {
        let mut slots = BTreeMap::new();
        for (slot, value) in encoded {
            slots.insert(slot, STANDARD.decode(value)?);
        }
        Ok(Self { slots })
    }
}

impl FromIterator<(String, Vec<u8>)> for CredentialSet {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        Self {
            slots: iter.into_iter().collect(),
        }
    }
}

impl Serialize for CredentialSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_encoded().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CredentialSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = BTreeMap::<String, String>::deserialize(deserializer)?;
        Self::from_encoded(encoded).map_err(D::Error::custom)
    }
}

/// A credential mutation: slots written and slots deleted by the library.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDelta {
    #[serde(default)]
    pub upserts: CredentialSet,
    #[serde(default)]
    pub removed: Vec<String>,
}

impl CredentialDelta {
    pub fn upsert(set: CredentialSet) -> Self {
        Self {
            upserts: set,
            removed: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removed.is_empty()
    }
}
