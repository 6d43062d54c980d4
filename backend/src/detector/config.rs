use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Vocabulary of the garbage detection model the service was trained with.
pub const DEFAULT_CLASSES: [(u32, &str); 8] = [
    (0, "Cardboard Waste"),
    (1, "Cigarette"),
    (2, "Food Waste"),
    (3, "Glass Waste"),
    (4, "Metal Waste"),
    (5, "Paper Waste"),
    (6, "Plastic Waste"),
    (7, "Styrofoam"),
];

/// Detector tuning, optionally loaded from a YAML file.
///
/// ```yaml
/// version: 1.0
/// confidence_threshold: 0.25
/// iou_threshold: 0.45
/// input_size: 640
/// annotate: true
/// classes:
///   0: Cardboard Waste
///   1: Cigarette
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub version: f32,
    pub classes: BTreeMap<u32, String>,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    pub annotate: bool,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            version: 1.0,
            classes: DEFAULT_CLASSES
                .iter()
                .map(|(id, name)| (*id, name.to_string()))
                .collect(),
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            input_size: 640,
            annotate: true,
        }
    }
}

impl DetectorSettings {
    pub fn load(path: PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_yaml_str(&contents, &path)
    }

    pub fn from_yaml_str(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        let settings: DetectorSettings =
            serde_yaml::from_str(contents).map_err(|source| ConfigError::Yaml {
                path: origin.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid {
                name: "confidence_threshold",
                value: self.confidence_threshold.to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(ConfigError::Invalid {
                name: "iou_threshold",
                value: self.iou_threshold.to_string(),
            });
        }
        if self.input_size == 0 || self.input_size % 32 != 0 {
            return Err(ConfigError::Invalid {
                name: "input_size",
                value: self.input_size.to_string(),
            });
        }
        if self.classes.is_empty() {
            return Err(ConfigError::Invalid {
                name: "classes",
                value: "<empty>".to_string(),
            });
        }
        Ok(())
    }

    pub fn label_for(&self, class_id: u32) -> String {
        self.classes
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| format!("Unknown-{}", class_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_eight_garbage_classes() {
        let settings = DetectorSettings::default();
        assert_eq!(settings.classes.len(), 8);
        assert_eq!(settings.label_for(6), "Plastic Waste");
        assert_eq!(settings.label_for(42), "Unknown-42");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let yaml = "confidence_threshold: 0.1\nclasses:\n  0: bottle\n  1: can\n";
        let settings = DetectorSettings::from_yaml_str(yaml, Path::new("detector.yaml")).unwrap();
        assert_eq!(settings.confidence_threshold, 0.1);
        assert_eq!(settings.iou_threshold, 0.45);
        assert_eq!(settings.input_size, 640);
        assert_eq!(settings.label_for(1), "can");
        assert_eq!(settings.label_for(7), "Unknown-7");
    }

    #[test]
    fn invalid_yaml_values_are_rejected() {
        let err = DetectorSettings::from_yaml_str("input_size: 100\n", Path::new("d.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "input_size", .. }));

        let err = DetectorSettings::from_yaml_str("classes: [", Path::new("d.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }
}
