//! The shared artifact store.
//!
//! Every pipeline output is published as an opaque blob under a
//! namespaced key; the reporting front-end is a read-only consumer. Keys
//! come from the builder here rather than ad-hoc concatenation so that a
//! measure name can never collide with another artifact's namespace.

pub mod postgres;

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use serde::Serialize;

pub use postgres::PgArtifactStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("artifact serialization failed: {0}")]
    Serialize(String),
}

/// Per-measure pipeline artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Models,
    Forecasts,
    Residuals,
    RegressorCoefficients,
    CrossValidation,
    CvScores,
    ResidualScores,
    EmissionTable,
    OwnerLookup,
}

impl Artifact {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Models => "models",
            Self::Forecasts => "forecasts",
            Self::Residuals => "residuals",
            Self::RegressorCoefficients => "regressor-coefficients",
            Self::CrossValidation => "cross-validation",
            Self::CvScores => "cv-scores",
            Self::ResidualScores => "residual-scores",
            Self::EmissionTable => "emission-table",
            Self::OwnerLookup => "owner-lookup",
        }
    }
}

/// A fully-qualified store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    /// Key for a per-measure artifact.
    pub fn per_measure(artifact: Artifact, measure: &str) -> Self {
        Self(format!("{}:{}", artifact.prefix(), measure))
    }

    /// Key for a measure-independent reference table.
    pub fn reference(name: &str) -> Self {
        Self(format!("reference:{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait::async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, key: &ArtifactKey, blob: Vec<u8>) -> Result<(), StoreError>;
    async fn get(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Serialize a typed artifact and publish it.
pub async fn put_json<S, T>(store: &S, key: &ArtifactKey, value: &T) -> Result<(), StoreError>
where
    S: ArtifactStore + ?Sized,
    T: Serialize,
{
    let blob = serde_json::to_vec(value).map_err(|e| StoreError::Serialize(e.to_string()))?;
    store.put(key, blob).await
}

/// In-memory store used by tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ArtifactStore for MemoryStore {
    async fn put(&self, key: &ArtifactKey, blob: Vec<u8>) -> Result<(), StoreError> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .insert(key.as_str().to_string(), blob);
        Ok(())
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .entries
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .get(key.as_str())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_namespace_measures_without_collisions() {
        let a = ArtifactKey::per_measure(Artifact::Models, "Purchased Electricity - Usage");
        let b = ArtifactKey::per_measure(Artifact::Forecasts, "Purchased Electricity - Usage");
        let c = ArtifactKey::per_measure(Artifact::Models, "Purchased Steam - Usage");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "models:Purchased Electricity - Usage");
        assert_eq!(ArtifactKey::reference("spot").as_str(), "reference:spot");
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryStore::new();
        let key = ArtifactKey::reference("flag");
        assert!(store.get(&key).await.unwrap().is_none());

        put_json(&store, &key, &vec!["AT-VIE-01".to_string()])
            .await
            .unwrap();
        let blob = store.get(&key).await.unwrap().unwrap();
        let decoded: Vec<String> = serde_json::from_slice(&blob).unwrap();
        assert_eq!(decoded, vec!["AT-VIE-01".to_string()]);
    }
}
