// crates/mtd-thermo/src/model.rs

//! Thermodynamic model descriptors.

use serde::{Deserialize, Serialize};

/// Gas constant in kcal/(mol·K).
pub const GAS_CONSTANT: f64 = 0.001_987_204_1;

/// Nucleic-acid material.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Material {
    /// Deoxyribonucleic acid (prints T).
    #[default]
    Dna,
    /// Ribonucleic acid (prints U).
    Rna,
}

/// Conditions a kernel evaluates under. This descriptor is also the cache
/// key separating thermodynamic environments.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ThermoModel {
    /// DNA or RNA parameter set.
    pub material: Material,
    /// Temperature in °C.
    pub temperature: f64,
    /// Sodium concentration in M.
    pub sodium: f64,
    /// Magnesium concentration in M.
    pub magnesium: f64,
}

impl Default for ThermoModel {
    fn default() -> Self {
        Self { material: Material::Dna, temperature: 37.0, sodium: 1.0, magnesium: 0.0 }
    }
}

impl ThermoModel {
    /// Absolute temperature in K.
    #[inline]
    #[must_use]
    pub fn kelvin(&self) -> f64 {
        self.temperature + 273.15
    }

    /// `RT` in kcal/mol at this temperature.
    #[inline]
    #[must_use]
    pub fn rt(&self) -> f64 {
        GAS_CONSTANT * self.kelvin()
    }

    /// Molarity of water at this temperature (Kell density fit / 18.0152).
    #[must_use]
    pub fn water_molarity(&self) -> f64 {
        let t = self.temperature;
        let density = (999.839_52 + 16.945_176 * t
            - 7.987_040_1e-3 * t * t
            - 4.617_046_1e-5 * t * t * t
            + 1.055_630_2e-7 * t * t * t * t
            - 2.805_425_3e-10 * t * t * t * t * t)
            / (1.0 + 1.687_985_0e-2 * t);
        density / 18.015_2
    }

    /// Stable hash key: the raw bit patterns of the condition fields.
    #[must_use]
    pub fn key(&self) -> ModelKey {
        ModelKey {
            material: self.material,
            temperature: self.temperature.to_bits(),
            sodium: self.sodium.to_bits(),
            magnesium: self.magnesium.to_bits(),
        }
    }
}

/// Bit-exact hashable identity of a [`ThermoModel`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ModelKey {
    material: Material,
    temperature: u64,
    sodium: u64,
    magnesium: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn water_molarity_near_55() {
        let m = ThermoModel::default();
        let w = m.water_molarity();
        assert!((50.0..60.0).contains(&w), "water molarity {w}");
    }

    #[test]
    fn rt_at_37c() {
        let m = ThermoModel::default();
        assert!((m.rt() - 0.6163).abs() < 1e-3);
    }
}
