use std::{fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{DeepFryError, Result};

/// Upper bound of every effect slider except `compression`.
pub const EFFECT_MAX: f32 = 10.0;
pub const COMPRESSION_MAX: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
/// Full set of effect controls consumed by one render call.
pub struct EffectParameters {
    pub pixelation: f32,
    pub saturation: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub noise: f32,
    pub compression: f32,
    pub red_channel: f32,
    pub green_channel: f32,
    pub blue_channel: f32,
    pub sharpness: f32,
    pub bulge: f32,
    pub glow_intensity: f32,
    pub posterize: f32,
}

impl Default for EffectParameters {
    fn default() -> Self {
        Self {
            pixelation: 1.0,
            saturation: 1.0,
            brightness: 1.0,
            contrast: 1.0,
            noise: 0.0,
            compression: 100.0,
            red_channel: 1.0,
            green_channel: 1.0,
            blue_channel: 1.0,
            sharpness: 0.0,
            bulge: 0.0,
            glow_intensity: 0.0,
            posterize: 1.0,
        }
    }
}

impl EffectParameters {
    pub fn get(&self, field: EffectField) -> f32 {
        match field {
            EffectField::Pixelation => self.pixelation,
            EffectField::Saturation => self.saturation,
            EffectField::Brightness => self.brightness,
            EffectField::Contrast => self.contrast,
            EffectField::Noise => self.noise,
            EffectField::Compression => self.compression,
            EffectField::RedChannel => self.red_channel,
            EffectField::GreenChannel => self.green_channel,
            EffectField::BlueChannel => self.blue_channel,
            EffectField::Sharpness => self.sharpness,
            EffectField::Bulge => self.bulge,
            EffectField::GlowIntensity => self.glow_intensity,
            EffectField::Posterize => self.posterize,
        }
    }

    pub fn set(&mut self, field: EffectField, value: f32) {
        let slot = match field {
            EffectField::Pixelation => &mut self.pixelation,
            EffectField::Saturation => &mut self.saturation,
            EffectField::Brightness => &mut self.brightness,
            EffectField::Contrast => &mut self.contrast,
            EffectField::Noise => &mut self.noise,
            EffectField::Compression => &mut self.compression,
            EffectField::RedChannel => &mut self.red_channel,
            EffectField::GreenChannel => &mut self.green_channel,
            EffectField::BlueChannel => &mut self.blue_channel,
            EffectField::Sharpness => &mut self.sharpness,
            EffectField::Bulge => &mut self.bulge,
            EffectField::GlowIntensity => &mut self.glow_intensity,
            EffectField::Posterize => &mut self.posterize,
        };
        *slot = value;
    }

    /// Checks every field against its slider range.
    ///
    /// The store itself never calls this; out-of-range input is the caller's
    /// responsibility and front ends validate before writing.
    pub fn validate(&self) -> Result<()> {
        for field in EffectField::ALL {
            field.check(self.get(field))?;
        }
        Ok(())
    }

    /// JPEG quality in `0.0..=1.0` derived from `compression`.
    pub fn export_quality(&self) -> f32 {
        (self.compression / COMPRESSION_MAX).clamp(0.0, 1.0)
    }

    /// Loads parameters from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Saves the parameters as pretty JSON.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Names one field of [`EffectParameters`]; the wire names match the UI contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectField {
    Pixelation,
    Saturation,
    Brightness,
    Contrast,
    Noise,
    Compression,
    RedChannel,
    GreenChannel,
    BlueChannel,
    Sharpness,
    Bulge,
    GlowIntensity,
    Posterize,
}

impl EffectField {
    pub const ALL: [EffectField; 13] = [
        EffectField::Pixelation,
        EffectField::Saturation,
        EffectField::Brightness,
        EffectField::Contrast,
        EffectField::Noise,
        EffectField::Compression,
        EffectField::RedChannel,
        EffectField::GreenChannel,
        EffectField::BlueChannel,
        EffectField::Sharpness,
        EffectField::Bulge,
        EffectField::GlowIntensity,
        EffectField::Posterize,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EffectField::Pixelation => "pixelation",
            EffectField::Saturation => "saturation",
            EffectField::Brightness => "brightness",
            EffectField::Contrast => "contrast",
            EffectField::Noise => "noise",
            EffectField::Compression => "compression",
            EffectField::RedChannel => "redChannel",
            EffectField::GreenChannel => "greenChannel",
            EffectField::BlueChannel => "blueChannel",
            EffectField::Sharpness => "sharpness",
            EffectField::Bulge => "bulge",
            EffectField::GlowIntensity => "glowIntensity",
            EffectField::Posterize => "posterize",
        }
    }

    pub fn max(self) -> f32 {
        match self {
            EffectField::Compression => COMPRESSION_MAX,
            _ => EFFECT_MAX,
        }
    }

    fn check(self, value: f32) -> Result<()> {
        if !value.is_finite() || value < 0.0 || value > self.max() {
            return Err(DeepFryError::params(format!(
                "{} must be within 0..={}, got {}",
                self.name(),
                self.max(),
                value
            )));
        }
        Ok(())
    }
}

impl fmt::Display for EffectField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EffectField {
    type Err = DeepFryError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim();
        EffectField::ALL
            .into_iter()
            .find(|field| field.name().eq_ignore_ascii_case(needle))
            .ok_or_else(|| DeepFryError::params(format!("unknown effect field: {needle}")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
/// Partial parameter set; `None` fields leave the current value untouched.
pub struct EffectOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pixelation: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contrast: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub red_channel: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub green_channel: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blue_channel: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sharpness: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bulge: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glow_intensity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posterize: Option<f32>,
}

impl EffectOverrides {
    pub fn get(&self, field: EffectField) -> Option<f32> {
        match field {
            EffectField::Pixelation => self.pixelation,
            EffectField::Saturation => self.saturation,
            EffectField::Brightness => self.brightness,
            EffectField::Contrast => self.contrast,
            EffectField::Noise => self.noise,
            EffectField::Compression => self.compression,
            EffectField::RedChannel => self.red_channel,
            EffectField::GreenChannel => self.green_channel,
            EffectField::BlueChannel => self.blue_channel,
            EffectField::Sharpness => self.sharpness,
            EffectField::Bulge => self.bulge,
            EffectField::GlowIntensity => self.glow_intensity,
            EffectField::Posterize => self.posterize,
        }
    }

    pub fn with(mut self, field: EffectField, value: f32) -> Self {
        let slot = match field {
            EffectField::Pixelation => &mut self.pixelation,
            EffectField::Saturation => &mut self.saturation,
            EffectField::Brightness => &mut self.brightness,
            EffectField::Contrast => &mut self.contrast,
            EffectField::Noise => &mut self.noise,
            EffectField::Compression => &mut self.compression,
            EffectField::RedChannel => &mut self.red_channel,
            EffectField::GreenChannel => &mut self.green_channel,
            EffectField::BlueChannel => &mut self.blue_channel,
            EffectField::Sharpness => &mut self.sharpness,
            EffectField::Bulge => &mut self.bulge,
            EffectField::GlowIntensity => &mut self.glow_intensity,
            EffectField::Posterize => &mut self.posterize,
        };
        *slot = Some(value);
        self
    }

    /// Fields this override sets, in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (EffectField, f32)> + '_ {
        EffectField::ALL
            .into_iter()
            .filter_map(|field| self.get(field).map(|value| (field, value)))
    }

    pub fn is_empty(&self) -> bool {
        self.fields().next().is_none()
    }

    pub fn apply_to(&self, params: &mut EffectParameters) {
        for (field, value) in self.fields() {
            params.set(field, value);
        }
    }
}

/// Owns the current [`EffectParameters`]; the only externally writable state.
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    current: EffectParameters,
}

impl ParameterStore {
    pub fn new(initial: EffectParameters) -> Self {
        Self { current: initial }
    }

    pub fn params(&self) -> &EffectParameters {
        &self.current
    }

    pub fn set(&mut self, field: EffectField, value: f32) {
        self.current.set(field, value);
    }

    pub fn merge(&mut self, overrides: &EffectOverrides) {
        overrides.apply_to(&mut self.current);
    }

    pub fn replace(&mut self, params: EffectParameters) {
        self.current = params;
    }

    pub fn reset(&mut self) {
        self.current = EffectParameters::default();
    }
}
