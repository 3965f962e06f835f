//! Flat-file stores and the daily CSV sink.
//!
//! Directory layout:
//!   scenarios/{scenario_id}.json
//!   recipes/nhd_recipe_{reach}_{year}.csv   (scenario_id,area)
//!   recipes/{reach}_hydro.json              ({"2010": [runoff m³/day, ...], ...})
//!   flows/{reach}_flow.json
//!   output/Eco_{reach}_{year}_daily.csv
//!   output/scenario_qa.csv                 (quality-check flags, when any)

use crate::error::{SamError, SamResult};
use crate::qc::QcReport;
use crate::scenario::Scenario;
use crate::store::{FlowStore, OutputSink, ReachHydro, ReachId, RecipeEntry, RecipeStore, ScenarioStore};
use crate::waterbody::{DailyOutput, FlowRecord};
use chrono::NaiveDate;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Output concentrations are reported in µg/L
const KG_M3_TO_UG_L: f64 = 1.0e6;

fn open(path: &Path, kind: &'static str) -> SamResult<File> {
    File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => SamError::missing(kind, path.display()),
        _ => SamError::io(path, e),
    })
}

// Writer failures are I/O; anything else is a record that would not serialize
fn csv_write_error(path: &Path, e: csv::Error) -> SamError {
    let message = e.to_string();
    match e.into_kind() {
        csv::ErrorKind::Io(source) => SamError::io(path, source),
        _ => SamError::Parse {
            file: path.display().to_string(),
            message,
        },
    }
}

fn read_json<T: DeserializeOwned>(path: &Path, kind: &'static str) -> SamResult<T> {
    let reader = BufReader::new(open(path, kind)?);
    serde_json::from_reader(reader).map_err(|e| SamError::Parse {
        file: path.display().to_string(),
        message: e.to_string(),
    })
}

pub struct FileStore {
    scenario_dir: PathBuf,
    recipe_dir: PathBuf,
    flow_dir: PathBuf,
}

impl FileStore {
    pub fn new(scenario_dir: &Path, recipe_dir: &Path, flow_dir: &Path) -> Self {
        FileStore {
            scenario_dir: scenario_dir.to_path_buf(),
            recipe_dir: recipe_dir.to_path_buf(),
            flow_dir: flow_dir.to_path_buf(),
        }
    }

    pub fn recipe_path(&self, reach: ReachId, year: i32) -> PathBuf {
        self.recipe_dir.join(format!("nhd_recipe_{}_{}.csv", reach, year))
    }

    pub fn hydro_path(&self, reach: ReachId) -> PathBuf {
        self.recipe_dir.join(format!("{}_hydro.json", reach))
    }

    pub fn flow_path(&self, reach: ReachId) -> PathBuf {
        self.flow_dir.join(format!("{}_flow.json", reach))
    }
}

impl ScenarioStore for FileStore {
    fn scenario(&self, id: &str) -> SamResult<Arc<Scenario>> {
        let path = self.scenario_dir.join(format!("{}.json", id));
        let mut scenario: Scenario = read_json(&path, "scenario")?;
        scenario.id = id.to_string();
        Ok(Arc::new(scenario))
    }
}

impl RecipeStore for FileStore {
    fn recipe(&self, reach: ReachId, year: i32) -> SamResult<Vec<RecipeEntry>> {
        let path = self.recipe_path(reach, year);
        let mut reader = csv::Reader::from_reader(open(&path, "recipe")?);
        reader
            .deserialize::<RecipeEntry>()
            .enumerate()
            .map(|(row, entry)| {
                entry.map_err(|e| SamError::Parse {
                    file: path.display().to_string(),
                    message: format!("row {}: {}", row + 1, e),
                })
            })
            .collect()
    }

    fn hydro(&self, reach: ReachId, year: i32) -> SamResult<ReachHydro> {
        let path = self.hydro_path(reach);
        let mut by_year: HashMap<String, Vec<f64>> = read_json(&path, "hydro")?;
        let runoff = by_year
            .remove(&year.to_string())
            .ok_or_else(|| SamError::missing("hydro year", format!("{}_{}", reach, year)))?;
        Ok(ReachHydro { runoff })
    }
}

impl FlowStore for FileStore {
    fn reaches(&self) -> SamResult<Vec<ReachId>> {
        let entries = fs::read_dir(&self.flow_dir).map_err(|e| SamError::io(&self.flow_dir, e))?;
        let mut reaches: Vec<ReachId> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_suffix("_flow.json")?.parse().ok()
            })
            .collect();
        reaches.sort_unstable();
        Ok(reaches)
    }

    fn flow(&self, reach: ReachId) -> SamResult<FlowRecord> {
        read_json(&self.flow_path(reach), "flow")
    }
}

#[derive(Serialize)]
struct DailyRow {
    date: String,
    total_flow: f64,
    baseflow: f64,
    total_runoff: f64,
    total_conc: f64,
    runoff_conc: f64,
    total_runoff_mass: f64,
    water_conc: Option<f64>,
    benthic_conc: Option<f64>,
    benthic_mass: Option<f64>,
}

/// Writes one CSV per reach and year.
pub struct CsvSink {
    out_dir: PathBuf,
}

impl CsvSink {
    pub fn new(out_dir: &Path) -> SamResult<Self> {
        fs::create_dir_all(out_dir).map_err(|e| SamError::io(out_dir, e))?;
        Ok(CsvSink {
            out_dir: out_dir.to_path_buf(),
        })
    }

    pub fn output_path(&self, reach: ReachId, year: i32) -> PathBuf {
        self.out_dir.join(format!("Eco_{}_{}_daily.csv", reach, year))
    }

    pub fn qc_path(&self) -> PathBuf {
        self.out_dir.join("scenario_qa.csv")
    }

    /// Writes the run's quality-check flags, one row per flag.
    pub fn write_qc_report(&self, report: &QcReport) -> SamResult<PathBuf> {
        let path = self.qc_path();
        let mut writer = csv::Writer::from_path(&path).map_err(|e| csv_write_error(&path, e))?;
        for flag in &report.flags {
            writer.serialize(flag).map_err(|e| csv_write_error(&path, e))?;
        }
        writer.flush().map_err(|e| SamError::io(&path, e))?;
        Ok(path)
    }
}

impl OutputSink for CsvSink {
    fn write(&mut self, reach: ReachId, year: i32, dates: &[NaiveDate], output: &DailyOutput) -> SamResult<()> {
        let path = self.output_path(reach, year);
        let csv_err = |e: csv::Error| csv_write_error(&path, e);
        let mut writer = csv::Writer::from_path(&path).map_err(csv_err)?;
        for (d, date) in dates.iter().enumerate() {
            let benthic = output.benthic.as_ref();
            writer
                .serialize(DailyRow {
                    date: date.format("%Y-%m-%d").to_string(),
                    total_flow: output.total_flow[d],
                    baseflow: output.baseflow[d],
                    total_runoff: output.total_runoff[d],
                    total_conc: output.total_conc[d] * KG_M3_TO_UG_L,
                    runoff_conc: output.runoff_conc[d] * KG_M3_TO_UG_L,
                    total_runoff_mass: output.total_runoff_mass[d],
                    water_conc: benthic.map(|b| b.water_conc[d] * KG_M3_TO_UG_L),
                    benthic_conc: benthic.map(|b| b.benthic_conc[d] * KG_M3_TO_UG_L),
                    benthic_mass: benthic.map(|b| b.benthic_mass[d]),
                })
                .map_err(csv_err)?;
        }
        writer.flush().map_err(|e| SamError::io(&path, e))?;
        Ok(())
    }
}
