//! Streaming configuration
//!
//! Loaded from JSON or built from defaults. Defaults mirror the values the
//! city viewer shipped with.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;

/// Shape of the culling frustum before it is moved by the camera matrix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrustumConfig {
    /// Vertical field of view in degrees.
    pub fovy_degrees: f32,
    /// Width / height of the viewport.
    pub aspect: f32,
    /// Distance from the apex to the far corners.
    pub far: f32,
}

impl Default for FrustumConfig {
    fn default() -> Self {
        Self {
            fovy_degrees: 19.0,
            aspect: 1280.0 / 480.0,
            far: 1500.0,
        }
    }
}

/// Top-level configuration for a [`TileStreamer`](crate::streaming::TileStreamer).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Frames a tile must stay invisible before its resources are destroyed.
    pub eviction_countdown: u32,
    /// Culling frustum shape.
    pub frustum: FrustumConfig,
    /// Effects created through the scene sink at open, indexed by the
    /// effect numbers stored in the container.
    pub effects: Vec<String>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            eviction_countdown: 30,
            frustum: FrustumConfig::default(),
            effects: vec!["tile".to_string(), "untextured".to_string()],
        }
    }
}

impl StreamingConfig {
    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.eviction_countdown == 0 {
            return Err(Error::Config("eviction_countdown must be at least 1".into()));
        }
        let f = &self.frustum;
        if !(f.fovy_degrees > 0.0 && f.fovy_degrees < 180.0) {
            return Err(Error::Config(format!(
                "fovy_degrees must be in (0, 180), got {}",
                f.fovy_degrees
            )));
        }
        if !(f.aspect > 0.0) {
            return Err(Error::Config(format!("aspect must be positive, got {}", f.aspect)));
        }
        if !(f.far > 0.0) {
            return Err(Error::Config(format!("far must be positive, got {}", f.far)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StreamingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.eviction_countdown, 30);
        assert_eq!(config.effects.len(), 2);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = StreamingConfig::from_json_str(r#"{ "eviction_countdown": 5 }"#).unwrap();
        assert_eq!(config.eviction_countdown, 5);
        assert_eq!(config.frustum, FrustumConfig::default());
    }

    #[test]
    fn test_nested_frustum_override() {
        let config =
            StreamingConfig::from_json_str(r#"{ "frustum": { "fovy_degrees": 45.0 } }"#).unwrap();
        assert_eq!(config.frustum.fovy_degrees, 45.0);
        assert_eq!(config.frustum.far, 1500.0);
    }

    #[test]
    fn test_zero_countdown_rejected() {
        let err = StreamingConfig::from_json_str(r#"{ "eviction_countdown": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_bad_fovy_rejected() {
        let err =
            StreamingConfig::from_json_str(r#"{ "frustum": { "fovy_degrees": 180.0 } }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_json() {
        let err = StreamingConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streaming.json");
        std::fs::write(&path, r#"{ "eviction_countdown": 12, "effects": ["a"] }"#).unwrap();
        let config = StreamingConfig::load(&path).unwrap();
        assert_eq!(config.eviction_countdown, 12);
        assert_eq!(config.effects, vec!["a".to_string()]);
    }
}
