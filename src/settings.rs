use core::fmt;
use std::path::{Path, PathBuf};

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::{CaptureConfig, Size};

/// Prefix of environment variables that override settings, e.g.
/// `CAMERA_EFFECTS__EFFECT__CREDENTIAL`.
pub const ENV_PREFIX: &str = "CAMERA_EFFECTS";

/// Everything needed to run the capture and effect pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub capture: CaptureConfig,
    pub effect: EffectConfig,
}

/// Effect engine settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    /// Client credential handed to the engine on initialization.
    pub credential: String,
    pub resource_paths: Vec<PathBuf>,
    /// Effect bundle loaded whenever processing is enabled.
    pub effect_path: String,
    pub render_size: Size,
}

impl Default for EffectConfig {
    fn default() -> Self {
        EffectConfig {
            credential: String::new(),
            resource_paths: Vec::new(),
            effect_path: "effects/test_BG".into(),
            render_size: Size::HD_720,
        }
    }
}

impl fmt::Debug for EffectConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectConfig")
            .field("credential", &"<redacted>")
            .field("resource_paths", &self.resource_paths)
            .field("effect_path", &self.effect_path)
            .field("render_size", &self.render_size)
            .finish()
    }
}

impl Settings {
    /// Load settings from defaults, then `path` (TOML) if given, then
    /// `CAMERA_EFFECTS__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Parse settings from a TOML document, without environment overrides.
    pub fn from_toml(source: &str) -> Result<Self, Error> {
        let settings = config::Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CameraPosition, PixelFormat, Ratio, VideoOrientation};

    #[test]
    fn empty_document_yields_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn overrides_are_applied() {
        let settings = Settings::from_toml(
            r#"
            [capture]
            facing = "back"
            orientation = "portrait"
            pixel_format = "bgra32"
            frame_rate = { numerator = 30000, denominator = 1000 }

            [capture.resolution]
            width = 640
            height = 480

            [effect]
            credential = "secret-token"
            effect_path = "effects/blur"
            "#,
        )
        .unwrap();

        assert_eq!(settings.capture.facing, CameraPosition::Back);
        assert_eq!(settings.capture.orientation, VideoOrientation::Portrait);
        assert_eq!(settings.capture.pixel_format, PixelFormat::Bgra32);
        assert_eq!(
            settings.capture.resolution,
            Size {
                width: 640,
                height: 480
            }
        );
        assert_eq!(
            settings.capture.frame_rate,
            Some(Ratio {
                numerator: 30000,
                denominator: 1000
            })
        );
        assert_eq!(settings.effect.effect_path, "effects/blur");
        assert_eq!(settings.effect.render_size, Size::HD_720);
    }

    #[test]
    fn debug_output_hides_credential() {
        let config = EffectConfig {
            credential: "secret-token".into(),
            ..EffectConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn unknown_enum_value_is_rejected() {
        let err = Settings::from_toml("[capture]\nfacing = \"sideways\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
