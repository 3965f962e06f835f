use crate::error::{SamError, SamResult};
use serde::{Deserialize, Deserializer, Serialize};

// One land use / soil / weather combination with its daily hydrology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub crop: String,
    #[serde(deserialize_with = "nan_if_null")]
    pub covmax: f64, // Maximum canopy coverage [-]
    #[serde(deserialize_with = "nan_if_null")]
    pub org_carbon: f64, // Organic carbon fraction of the top layer [-]
    #[serde(deserialize_with = "nan_if_null")]
    pub bulk_density: f64, // [g/cm³]
    pub runoff: Vec<f64>,       // Daily runoff depth [cm]
    pub leaching: Vec<f64>,     // Daily leaching depth [cm]
    pub rain: Vec<f64>,         // Daily rainfall [cm]
    pub plant_factor: Vec<f64>, // Daily crop growth fraction [-]
    pub soil_water: Vec<f64>,   // Daily volumetric water content of the top layer [-]
    #[serde(default)]
    pub erosion: Option<Vec<f64>>, // Daily sediment yield [t/ha]
}

fn nan_if_null<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

impl Scenario {
    // Attributes that can be range-checked
    pub const ATTRIBUTES: &'static [&'static str] = &["covmax", "org_carbon", "bulk_density"];

    // Constant daily series, mostly useful for tests and examples
    pub fn uniform(id: &str, n_days: usize, runoff: f64, rain: f64) -> Self {
        Scenario {
            id: id.to_string(),
            crop: String::new(),
            covmax: 1.0,
            org_carbon: 0.01,
            bulk_density: 1.3,
            runoff: vec![runoff; n_days],
            leaching: vec![0.0; n_days],
            rain: vec![rain; n_days],
            plant_factor: vec![0.0; n_days],
            soil_water: vec![0.3; n_days],
            erosion: None,
        }
    }

    pub fn n_days(&self) -> usize {
        self.runoff.len()
    }

    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut f64> {
        match name {
            "covmax" => Some(&mut self.covmax),
            "org_carbon" => Some(&mut self.org_carbon),
            "bulk_density" => Some(&mut self.bulk_density),
            _ => None,
        }
    }

    // Fraction of the ground covered by canopy on a given day
    pub fn canopy_cover(&self, day: usize) -> f64 {
        let pf = self.plant_factor.get(day).copied().unwrap_or(0.0);
        (self.covmax * pf).clamp(0.0, 1.0)
    }

    // Every daily series must cover the simulation horizon exactly
    pub fn validate(&self, n_days: usize) -> SamResult<()> {
        for (name, value) in [
            ("covmax", self.covmax),
            ("org_carbon", self.org_carbon),
            ("bulk_density", self.bulk_density),
        ] {
            if !value.is_finite() {
                return Err(SamError::Parse {
                    file: self.id.clone(),
                    message: format!("{} is missing and has no fill value", name),
                });
            }
        }

        let mut series: Vec<(&str, usize)> = vec![
            ("runoff", self.runoff.len()),
            ("leaching", self.leaching.len()),
            ("rain", self.rain.len()),
            ("plant_factor", self.plant_factor.len()),
            ("soil_water", self.soil_water.len()),
        ];
        if let Some(erosion) = &self.erosion {
            series.push(("erosion", erosion.len()));
        }
        for (name, len) in series {
            if len != n_days {
                return Err(SamError::SizeMismatch {
                    name: format!("scenario {} {}", self.id, name),
                    expected: n_days,
                    actual: len,
                });
            }
        }
        Ok(())
    }
}
