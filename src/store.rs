//! Input stores and output sink used by the calculator.
//!
//! The calculator only sees these traits; `files` provides flat-file
//! implementations and this module provides in-memory ones.

use crate::error::{SamError, SamResult};
use crate::qc::{QcReport, QcTable};
use crate::scenario::Scenario;
use crate::waterbody::{DailyOutput, FlowRecord};
use chrono::NaiveDate;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// NHD reach identifier (comid).
pub type ReachId = u64;

// One scenario draining to a reach
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeEntry {
    pub scenario_id: String,
    pub area: f64, // [ha]
}

// Reach runoff totals for one year
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReachHydro {
    pub runoff: Vec<f64>, // [m³/day]
}

pub trait ScenarioStore: Sync {
    fn scenario(&self, id: &str) -> SamResult<Arc<Scenario>>;
}

pub trait RecipeStore: Sync {
    fn recipe(&self, reach: ReachId, year: i32) -> SamResult<Vec<RecipeEntry>>;
    fn hydro(&self, reach: ReachId, year: i32) -> SamResult<ReachHydro>;
}

pub trait FlowStore: Sync {
    fn reaches(&self) -> SamResult<Vec<ReachId>>;
    fn flow(&self, reach: ReachId) -> SamResult<FlowRecord>;
}

impl<S: ScenarioStore + ?Sized> ScenarioStore for &S {
    fn scenario(&self, id: &str) -> SamResult<Arc<Scenario>> {
        (**self).scenario(id)
    }
}

pub trait OutputSink {
    fn write(&mut self, reach: ReachId, year: i32, dates: &[NaiveDate], output: &DailyOutput) -> SamResult<()>;
}

/// Memoizes scenarios and range-checks each one the first time it is read.
pub struct CachedScenarioStore<S> {
    inner: S,
    qc: QcTable,
    cache: Mutex<HashMap<String, Arc<Scenario>>>,
    report: Mutex<QcReport>,
}

impl<S: ScenarioStore> CachedScenarioStore<S> {
    pub fn new(inner: S, qc: QcTable) -> Self {
        CachedScenarioStore {
            inner,
            qc,
            cache: Mutex::new(HashMap::new()),
            report: Mutex::new(QcReport::default()),
        }
    }

    pub fn qc_report(&self) -> QcReport {
        self.report.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl<S: ScenarioStore> ScenarioStore for CachedScenarioStore<S> {
    fn scenario(&self, id: &str) -> SamResult<Arc<Scenario>> {
        if let Some(hit) = self.cache.lock().ok().and_then(|c| c.get(id).cloned()) {
            return Ok(hit);
        }

        let mut scenario = self.inner.scenario(id)?;
        let flags = if self.qc.is_empty() {
            Vec::new()
        } else {
            self.qc.apply(Arc::make_mut(&mut scenario))
        };

        // Another thread may have loaded the same scenario meanwhile; keep the first copy
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(existing) = cache.get(id) {
                return Ok(existing.clone());
            }
            cache.insert(id.to_string(), scenario.clone());
        }
        for flag in &flags {
            warn!(
                "qc [{}] {} = {} {:?} (severity {})",
                flag.record, flag.parameter, flag.value, flag.issue, flag.severity
            );
        }
        if let Ok(mut report) = self.report.lock() {
            report.extend(flags);
        }
        Ok(scenario)
    }
}

// Everything held in maps, for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    scenarios: HashMap<String, Arc<Scenario>>,
    recipes: HashMap<(ReachId, i32), Vec<RecipeEntry>>,
    hydro: HashMap<(ReachId, i32), ReachHydro>,
    flows: BTreeMap<ReachId, FlowRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_scenario(&mut self, mut scenario: Scenario, id: &str) -> &mut Self {
        scenario.id = id.to_string();
        self.scenarios.insert(id.to_string(), Arc::new(scenario));
        self
    }

    pub fn add_recipe(&mut self, reach: ReachId, year: i32, entries: Vec<(&str, f64)>) -> &mut Self {
        let entries = entries
            .into_iter()
            .map(|(id, area)| RecipeEntry {
                scenario_id: id.to_string(),
                area,
            })
            .collect();
        self.recipes.insert((reach, year), entries);
        self
    }

    pub fn add_hydro(&mut self, reach: ReachId, year: i32, runoff: Vec<f64>) -> &mut Self {
        self.hydro.insert((reach, year), ReachHydro { runoff });
        self
    }

    pub fn add_flow(&mut self, reach: ReachId, flow: FlowRecord) -> &mut Self {
        self.flows.insert(reach, flow);
        self
    }
}

impl ScenarioStore for MemoryStore {
    fn scenario(&self, id: &str) -> SamResult<Arc<Scenario>> {
        self.scenarios.get(id).cloned().ok_or_else(|| SamError::missing("scenario", id))
    }
}

impl RecipeStore for MemoryStore {
    fn recipe(&self, reach: ReachId, year: i32) -> SamResult<Vec<RecipeEntry>> {
        self.recipes
            .get(&(reach, year))
            .cloned()
            .ok_or_else(|| SamError::missing("recipe", format!("{}_{}", reach, year)))
    }

    fn hydro(&self, reach: ReachId, year: i32) -> SamResult<ReachHydro> {
        self.hydro
            .get(&(reach, year))
            .cloned()
            .ok_or_else(|| SamError::missing("hydro", format!("{}_{}", reach, year)))
    }
}

impl FlowStore for MemoryStore {
    fn reaches(&self) -> SamResult<Vec<ReachId>> {
        Ok(self.flows.keys().copied().collect())
    }

    fn flow(&self, reach: ReachId) -> SamResult<FlowRecord> {
        self.flows.get(&reach).cloned().ok_or_else(|| SamError::missing("flow", reach))
    }
}

#[derive(Debug, Default)]
pub struct MemorySink {
    pub outputs: BTreeMap<(ReachId, i32), DailyOutput>,
}

impl OutputSink for MemorySink {
    fn write(&mut self, reach: ReachId, year: i32, _dates: &[NaiveDate], output: &DailyOutput) -> SamResult<()> {
        if self.outputs.contains_key(&(reach, year)) {
            return Err(SamError::config(format!("output for {} {} written twice", reach, year)));
        }
        self.outputs.insert((reach, year), output.clone());
        Ok(())
    }
}
