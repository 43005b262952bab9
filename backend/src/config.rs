use serde::{Deserialize, Serialize};
use std::env;

/// Process-wide settings, loaded once at startup and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub model_path: String,
    pub model_format: String,
    pub image_size: [u32; 2],
    pub image_channels: u32,
    pub class_names: Vec<String>,
    pub normalize_mean: [f32; 3],
    pub normalize_std: [f32; 3],
    pub max_file_size: usize,
    pub allowed_extensions: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            model_path: "models/oral_lesion_model.pt".to_string(),
            model_format: "torchscript".to_string(),
            image_size: [224, 224],
            image_channels: 3,
            class_names: vec![
                "Normal".to_string(),
                "Leukoplakia".to_string(),
                "Erythroplakia".to_string(),
                "Ulcer".to_string(),
                "Oral Squamous Cell Carcinoma".to_string(),
            ],
            // ImageNet constants, matching the backbone's training transforms.
            normalize_mean: [0.485, 0.456, 0.406],
            normalize_std: [0.229, 0.224, 0.225],
            max_file_size: 10 * 1024 * 1024,
            allowed_extensions: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
            ],
        }
    }
}

impl Settings {
    /// Reads settings from `$CONFIG_PATH` (default `config/settings.yaml`).
    /// A missing or unparseable file logs a warning and falls back to the
    /// built-in defaults so the service still comes up.
    pub fn load() -> Self {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config/settings.yaml".to_string());
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_yaml::from_str(&raw) {
                Ok(settings) => {
                    log::info!("Loaded settings from {}", path);
                    settings
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}; using default settings", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}; using default settings", path, e);
                Self::default()
            }
        }
    }

    /// Bind address for the HTTP server; `PORT` env overrides the configured port.
    pub fn bind_address(&self) -> String {
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(self.port);
        format!("{}:{}", self.host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_lesion_classes_and_imagenet_constants() {
        let settings = Settings::default();
        assert_eq!(settings.class_names.len(), 5);
        assert_eq!(settings.class_names[0], "Normal");
        assert_eq!(settings.image_size, [224, 224]);
        assert_eq!(settings.image_channels, 3);
        assert_eq!(settings.normalize_mean, [0.485, 0.456, 0.406]);
        assert_eq!(settings.normalize_std, [0.229, 0.224, 0.225]);
        assert_eq!(settings.max_file_size, 10 * 1024 * 1024);
    }

    #[test]
    fn partial_yaml_fills_remaining_fields_from_defaults() {
        let settings: Settings = serde_yaml::from_str("port: 9001\n").unwrap();
        assert_eq!(settings.port, 9001);
        assert_eq!(settings.class_names.len(), 5);
    }
}
