//! Bundle Registry
//!
//! Serializes a desired object set into the bundle form stored in the
//! managed resource Secret: one YAML document per object plus a checksum
//! over all documents.

use crate::domain::ports::Bundle;
use crate::error::{Error, Result};
use crate::resources::{DesiredObject, DesiredObjectSet};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Serializes desired objects into bundles
#[derive(Debug, Default)]
pub struct Registry {
    data: BTreeMap<String, Vec<u8>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize and add one object
    pub fn add(&mut self, object: &DesiredObject) -> Result<()> {
        let value = object
            .to_value()
            .map_err(|e| Error::Serialization(format!("{}: {}", object.key(), e)))?;
        let yaml = serde_yaml::to_string(&value)
            .map_err(|e| Error::Serialization(format!("{}: {}", object.key(), e)))?;

        let key = data_key(object);
        if self.data.insert(key.clone(), yaml.into_bytes()).is_some() {
            return Err(Error::Serialization(format!(
                "duplicate object in bundle: {}",
                key
            )));
        }
        Ok(())
    }

    /// Serialize every object of a set
    pub fn add_all(mut self, objects: &DesiredObjectSet) -> Result<Self> {
        for object in objects.iter() {
            self.add(object)?;
        }
        Ok(self)
    }

    /// Finish into a named bundle
    pub fn into_bundle(self, name: &str, namespace: &str) -> Bundle {
        let checksum = checksum(&self.data);
        Bundle {
            name: name.to_string(),
            namespace: namespace.to_string(),
            data: self.data,
            checksum,
        }
    }
}

/// Secret data key of an object: `<kind>__<namespace>__<name>.yaml`
pub fn data_key(object: &DesiredObject) -> String {
    format!(
        "{}__{}__{}.yaml",
        object.kind().to_lowercase(),
        object.namespace().unwrap_or_default(),
        object.name().replace(':', "_")
    )
}

/// SHA-256 over the sorted bundle entries
pub fn checksum(data: &BTreeMap<String, Vec<u8>>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in data {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value);
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}
