use crate::error::{SamError, SamResult};
use crate::qc::{QcRule, QcTable};
use chrono::{Duration, NaiveDate};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::Path;

// Run configuration, read once from TOML and shared read-only by every reach
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub simulation: SimulationParams,
    pub chemical: ChemicalParams,
    #[serde(default)]
    pub soil: SoilConstants,
    pub application: ApplicationConfig,
    #[serde(default)]
    pub benthic: BenthicParams,
    #[serde(default)]
    pub qc: Vec<QcRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationParams {
    pub start_date: NaiveDate, // Day 0 of every daily series
    pub n_days: usize,         // Length of every daily series
    pub years: Vec<i32>,       // Recipe years to simulate
    // Take reach runoff totals from this year whatever year is simulated.
    // Legacy outputs were produced with 2010; "simulated" uses each year's own totals.
    #[serde(default = "default_runoff_year", deserialize_with = "runoff_year_setting")]
    pub fixed_runoff_year: Option<i32>,
    #[serde(default)]
    pub process_erosion: bool,
    #[serde(default)]
    pub process_benthic: bool,
    #[serde(default = "default_reach_length")]
    pub reach_length: f64, // Channel length used with cross-section for volume [m]
}

fn default_reach_length() -> f64 {
    40.0
}

fn default_runoff_year() -> Option<i32> {
    Some(2010)
}

fn runoff_year_setting<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i32>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Setting {
        Year(i32),
        Keyword(String),
    }

    match Setting::deserialize(deserializer)? {
        Setting::Year(year) => Ok(Some(year)),
        Setting::Keyword(k) if k == "simulated" => Ok(None),
        Setting::Keyword(k) => Err(D::Error::custom(format!(
            "fixed_runoff_year must be a year or \"simulated\", got \"{}\"",
            k
        ))),
    }
}

// Selects the soil/water partitioning formula. Stored as an integer flag in input files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum PartitionMethod {
    Kd,             // 0: koc value is used directly as Kd
    Koc,            // 1: Kd = koc * organic carbon
    KocDegradation, // 2: as Koc, with aqueous degradation within the day
}

impl TryFrom<u8> for PartitionMethod {
    type Error = String;

    fn try_from(flag: u8) -> Result<Self, Self::Error> {
        match flag {
            0 => Ok(PartitionMethod::Kd),
            1 => Ok(PartitionMethod::Koc),
            2 => Ok(PartitionMethod::KocDegradation),
            other => Err(format!("unknown partition method flag {}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChemicalParams {
    pub koc: f64, // Organic carbon partition coefficient [L/kg]
    pub partition_method: PartitionMethod,
    #[serde(default)]
    pub degradation_aqueous: f64, // [1/day]
    #[serde(default)]
    pub degradation_soil: f64, // [1/day]
    #[serde(default)]
    pub degradation_foliar: f64, // [1/day]
    #[serde(default)]
    pub degradation_benthic: f64, // [1/day]
    #[serde(default)]
    pub washoff_fraction: f64, // Fraction of foliar mass washed off on a rain day [-]
}

// Hardwired model constants of the top soil layer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SoilConstants {
    pub delta_x: f64,                // Top layer depth [cm]
    pub runoff_efficiency: f64,      // Fraction of runoff interacting with the layer [-]
    pub washoff_rain_threshold: f64, // Rainfall needed to wash foliage [cm]
}

impl Default for SoilConstants {
    fn default() -> Self {
        SoilConstants {
            delta_x: 2.0,
            runoff_efficiency: 0.266,
            washoff_rain_threshold: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    Calendar,      // day is a day of year
    CropStage,     // day is relative to the anchor crop stage
    RainTriggered, // day of year opens a window closed by the first qualifying rain
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropStage {
    #[default]
    Emergence,
    Maturity,
    Harvest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationMethod {
    Incorporated, // All mass to soil
    Surface,      // Split between canopy and soil by canopy coverage
}

// One configured application
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSpec {
    pub mass: f64, // [kg/ha]
    pub method: ApplicationMethod,
    pub day: i32, // Day of year (1-based) or offset from the anchor stage [day]
    #[serde(default = "default_window")]
    pub window: u32, // Days the application may slide forward to find a valid day
}

fn default_window() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationConfig {
    pub mode: SchedulingMode,
    #[serde(default = "default_max_per_year")]
    pub max_per_year: usize,
    #[serde(default)]
    pub anchor: CropStage,
    #[serde(default = "default_stage_threshold")]
    pub stage_threshold: f64, // Plant factor marking emergence/harvest [-]
    #[serde(default = "default_interception")]
    pub interception_efficiency: f64, // Canopy interception per unit coverage [-]
    #[serde(default = "default_trigger_rain")]
    pub trigger_rain: f64, // Rainfall that triggers an application [cm]
    // Crops the product is applied to; scenarios growing anything else are left out.
    // Empty means every crop.
    #[serde(default)]
    pub crops: Vec<String>,
    pub events: Vec<ApplicationSpec>,
}

fn default_max_per_year() -> usize {
    usize::MAX
}

fn default_stage_threshold() -> f64 {
    0.01
}

fn default_interception() -> f64 {
    1.0
}

fn default_trigger_rain() -> f64 {
    0.5
}

// Two-compartment waterbody constants
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BenthicParams {
    pub depth: f64,              // Benthic layer depth [m]
    pub porosity: f64,           // [-]
    pub bulk_density: f64,       // [kg/m3]
    pub foc: f64,                // Organic carbon fraction of sediment [-]
    pub suspended_sediment: f64, // Water column suspended solids [kg/m3]
    pub mass_transfer: f64,      // Water/benthic exchange velocity [m/day]
    pub nominal_depth: f64,      // Water depth used when the flow record has none [m]
}

impl Default for BenthicParams {
    fn default() -> Self {
        BenthicParams {
            depth: 0.05,
            porosity: 0.50,
            bulk_density: 1350.0,
            foc: 0.04,
            suspended_sediment: 0.03,
            mass_transfer: 1.016e-8 * 86400.0,
            nominal_depth: 1.0,
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> SamResult<Self> {
        let toml_str = fs::read_to_string(path).map_err(|e| SamError::io(path, e))?;
        Self::from_toml_str(&toml_str)
    }

    pub fn from_toml_str(toml_str: &str) -> SamResult<Self> {
        let config: RunConfig = toml::from_str(toml_str).map_err(|e| SamError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    // Checks everything that would otherwise fail halfway through a batch
    pub fn validate(&self) -> SamResult<()> {
        let sim = &self.simulation;
        if sim.n_days == 0 {
            return Err(SamError::config("simulation horizon is empty"));
        }
        if sim.years.is_empty() {
            return Err(SamError::config("no years to simulate"));
        }
        let mut years = sim.years.clone();
        years.sort_unstable();
        if let Some(pair) = years.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(SamError::config(format!("year {} is listed twice", pair[0])));
        }
        check_positive("reach_length", sim.reach_length)?;

        let chem = &self.chemical;
        check_non_negative("koc", chem.koc)?;
        for (name, rate) in [
            ("degradation_aqueous", chem.degradation_aqueous),
            ("degradation_soil", chem.degradation_soil),
            ("degradation_foliar", chem.degradation_foliar),
            ("degradation_benthic", chem.degradation_benthic),
        ] {
            if rate < 0.0 || !rate.is_finite() {
                return Err(SamError::config(format!("{} must be a non-negative rate, got {}", name, rate)));
            }
        }
        check_fraction("washoff_fraction", chem.washoff_fraction)?;

        let soil = &self.soil;
        check_positive("delta_x", soil.delta_x)?;
        check_fraction("runoff_efficiency", soil.runoff_efficiency)?;

        let app = &self.application;
        if app.events.is_empty() {
            return Err(SamError::config("no applications configured"));
        }
        if app.max_per_year == 0 {
            return Err(SamError::config("max_per_year must be at least 1"));
        }
        check_fraction("interception_efficiency", app.interception_efficiency)?;
        for (i, event) in app.events.iter().enumerate() {
            check_non_negative(&format!("application {} mass", i + 1), event.mass)?;
            if event.window == 0 {
                return Err(SamError::config(format!("application {} has an empty window", i + 1)));
            }
            if app.mode != SchedulingMode::CropStage && !(1..=366).contains(&event.day) {
                return Err(SamError::config(format!(
                    "application {} day {} is not a day of year",
                    i + 1,
                    event.day
                )));
            }
        }

        let benthic = &self.benthic;
        check_fraction("benthic porosity", benthic.porosity)?;
        check_positive("benthic depth", benthic.depth)?;
        check_positive("nominal_depth", benthic.nominal_depth)?;
        for (name, value) in [
            ("benthic bulk_density", benthic.bulk_density),
            ("benthic foc", benthic.foc),
            ("suspended_sediment", benthic.suspended_sediment),
            ("mass_transfer", benthic.mass_transfer),
        ] {
            check_non_negative(name, value)?;
        }

        QcTable::new(self.qc.clone())?;
        Ok(())
    }

    pub fn qc_table(&self) -> SamResult<QcTable> {
        QcTable::new(self.qc.clone())
    }

    pub fn end_date(&self) -> NaiveDate {
        self.date_of(self.simulation.n_days.saturating_sub(1))
    }

    pub fn date_of(&self, day: usize) -> NaiveDate {
        self.simulation.start_date + Duration::days(day as i64)
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        (0..self.simulation.n_days).map(|d| self.date_of(d)).collect()
    }

    // Whether scenarios growing `crop` receive the product
    pub fn crop_selected(&self, crop: &str) -> bool {
        let crops = &self.application.crops;
        crops.is_empty() || crops.iter().any(|c| c == crop)
    }

    // Year whose reach runoff totals drive the concentration for `year`
    pub fn runoff_year(&self, year: i32) -> i32 {
        self.simulation.fixed_runoff_year.unwrap_or(year)
    }
}

fn check_positive(name: &str, value: f64) -> SamResult<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(SamError::config(format!("{} must be positive, got {}", name, value)))
    }
}

fn check_non_negative(name: &str, value: f64) -> SamResult<()> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(SamError::config(format!("{} must be non-negative, got {}", name, value)))
    }
}

fn check_fraction(name: &str, value: f64) -> SamResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SamError::config(format!("{} must be within [0, 1], got {}", name, value)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
        [simulation]
        start_date = "2010-01-01"
        n_days = 365
        years = [2010, 2011]
        fixed_runoff_year = 2010

        [chemical]
        koc = 100.0
        partition_method = 1
        degradation_aqueous = 0.01

        [application]
        mode = "crop_stage"
        anchor = "emergence"
        max_per_year = 2

        [[application.events]]
        mass = 1.5
        method = "surface"
        day = -7
        window = 3
    "#;

    #[test]
    fn parses_sample_and_fills_defaults() {
        let config = RunConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.chemical.partition_method, PartitionMethod::Koc);
        assert_eq!(config.soil.delta_x, 2.0);
        assert_eq!(config.application.events[0].window, 3);
        assert_eq!(config.application.mode, SchedulingMode::CropStage);
        assert_eq!(config.end_date(), NaiveDate::from_ymd_opt(2010, 12, 31).unwrap());
        assert_eq!(config.runoff_year(2012), 2010);
    }

    #[test]
    fn unknown_partition_flag_is_fatal() {
        let bad = SAMPLE.replace("partition_method = 1", "partition_method = 7");
        let err = RunConfig::from_toml_str(&bad).unwrap_err();
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("partition method"));
    }

    #[test]
    fn out_of_range_fraction_is_rejected() {
        let bad = SAMPLE.replace("degradation_aqueous = 0.01", "washoff_fraction = 1.5");
        assert!(RunConfig::from_toml_str(&bad).is_err());
    }

    #[test]
    fn calendar_days_must_be_days_of_year() {
        let bad = SAMPLE.replace("mode = \"crop_stage\"", "mode = \"calendar\"");
        assert!(RunConfig::from_toml_str(&bad).is_err());
    }

    #[test]
    fn runoff_year_follows_simulated_year_when_not_fixed() {
        let mut config = RunConfig::from_toml_str(SAMPLE).unwrap();
        config.simulation.fixed_runoff_year = None;
        assert_eq!(config.runoff_year(2012), 2012);
    }

    #[test]
    fn runoff_year_defaults_to_legacy_2010() {
        let without = SAMPLE.replace("fixed_runoff_year = 2010", "");
        let config = RunConfig::from_toml_str(&without).unwrap();
        assert_eq!(config.simulation.fixed_runoff_year, Some(2010));

        let own_years = SAMPLE.replace("fixed_runoff_year = 2010", "fixed_runoff_year = \"simulated\"");
        let config = RunConfig::from_toml_str(&own_years).unwrap();
        assert_eq!(config.simulation.fixed_runoff_year, None);
        assert_eq!(config.runoff_year(2011), 2011);

        let bad = SAMPLE.replace("fixed_runoff_year = 2010", "fixed_runoff_year = \"latest\"");
        assert!(RunConfig::from_toml_str(&bad).is_err());
    }

    #[test]
    fn repeated_year_is_fatal() {
        let bad = SAMPLE.replace("years = [2010, 2011]", "years = [2010, 2011, 2010]");
        let err = RunConfig::from_toml_str(&bad).unwrap_err();
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("2010"));
    }

    #[test]
    fn nan_parameters_are_rejected() {
        let nan_koc = SAMPLE.replace("koc = 100.0", "koc = nan");
        assert!(RunConfig::from_toml_str(&nan_koc).is_err());
        let nan_mass = SAMPLE.replace("mass = 1.5", "mass = nan");
        assert!(RunConfig::from_toml_str(&nan_mass).is_err());

        let mut config = RunConfig::from_toml_str(SAMPLE).unwrap();
        config.simulation.reach_length = f64::NAN;
        assert!(config.validate().is_err());
        config.simulation.reach_length = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_crop_list_selects_every_crop() {
        let mut config = RunConfig::from_toml_str(SAMPLE).unwrap();
        assert!(config.crop_selected("corn"));
        config.application.crops = vec!["corn".to_string(), "soybeans".to_string()];
        assert!(config.crop_selected("soybeans"));
        assert!(!config.crop_selected("wheat"));
    }
}
