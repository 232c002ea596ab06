use std::{fmt, str::FromStr};

use crate::{
    error::{DeepFryError, Result},
    params::{EffectField, EffectOverrides, ParameterStore},
};

/// Named one-click effect bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Classic,
    Nuclear,
    GlowingEyes,
}

impl Preset {
    pub const ALL: [Preset; 3] = [Preset::Classic, Preset::Nuclear, Preset::GlowingEyes];

    pub fn name(self) -> &'static str {
        match self {
            Preset::Classic => "classic",
            Preset::Nuclear => "nuclear",
            Preset::GlowingEyes => "glowingEyes",
        }
    }

    pub fn overrides(self) -> EffectOverrides {
        use EffectField::*;
        let base = EffectOverrides::default();
        match self {
            Preset::Classic => base
                .with(Pixelation, 4.0)
                .with(Saturation, 2.0)
                .with(Contrast, 1.5)
                .with(Noise, 0.3)
                .with(Compression, 50.0)
                .with(RedChannel, 1.2)
                .with(BlueChannel, 0.8),
            Preset::Nuclear => base
                .with(Pixelation, 8.0)
                .with(Saturation, 3.0)
                .with(Brightness, 1.3)
                .with(Contrast, 2.0)
                .with(Noise, 0.6)
                .with(Compression, 20.0)
                .with(GlowIntensity, 0.5),
            Preset::GlowingEyes => base
                .with(Saturation, 1.5)
                .with(Brightness, 1.2)
                .with(Contrast, 1.8)
                .with(GlowIntensity, 0.8)
                .with(RedChannel, 2.0),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = DeepFryError;

    fn from_str(s: &str) -> Result<Self> {
        Preset::ALL
            .into_iter()
            .find(|preset| preset.name() == s)
            .ok_or_else(|| DeepFryError::PresetNotFound(s.to_string()))
    }
}

/// Looks up `name` and returns its partial parameter set.
pub fn lookup(name: &str) -> Result<EffectOverrides> {
    Ok(name.parse::<Preset>()?.overrides())
}

/// Merges the named preset into `store`; an unknown name leaves it untouched.
pub fn apply(store: &mut ParameterStore, name: &str) -> Result<EffectOverrides> {
    let overrides = lookup(name)?;
    store.merge(&overrides);
    tracing::debug!(preset = name, "preset applied");
    Ok(overrides)
}
