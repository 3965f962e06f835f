//! Batch driver: every reach, every year, every contributing scenario.
//!
//! Reaches are independent and run on the rayon pool. Outputs are gathered
//! and handed to the sink in reach order once all reaches are done.

use crate::aggregate::{ReachLoading, ScenarioAggregator};
use crate::applications::{ApplicationEvent, ApplicationScheduler};
use crate::config::RunConfig;
use crate::error::SamResult;
use crate::qc::QcReport;
use crate::scenario::Scenario;
use crate::soil_mass::{SoilMassBalance, SoilMassSeries};
use crate::store::{CachedScenarioStore, FlowStore, OutputSink, ReachId, RecipeStore, ScenarioStore};
use crate::transport::{TransportPartitioner, TransportSeries};
use crate::waterbody::{DailyOutput, FlowRecord, WaterbodyConcentrationModel};
use log::{debug, info, warn};
use rayon::prelude::*;

// Everything computed for one scenario
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    pub events: Vec<ApplicationEvent>,
    pub mass: SoilMassSeries,
    pub transport: TransportSeries,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reaches: usize,
    pub outputs_written: usize,
    pub reach_years_skipped: usize,
    pub scenarios_simulated: usize,
    pub scenarios_skipped: usize,
    pub scenarios_filtered: usize,
    pub qc: QcReport,
}

// Results of one reach, waiting to be written
#[derive(Default)]
struct ReachResult {
    reach: ReachId,
    outputs: Vec<(i32, DailyOutput)>,
    years_skipped: usize,
    scenarios_simulated: usize,
    scenarios_skipped: usize,
    scenarios_filtered: usize,
}

/// Applications, soil mass and transport for a single scenario.
pub fn simulate_scenario(config: &RunConfig, scenario: &Scenario) -> SamResult<ScenarioRun> {
    scenario.validate(config.simulation.n_days)?;

    let events = ApplicationScheduler::new(config).schedule(scenario);
    let mass = SoilMassBalance::new(&config.chemical, &config.soil).run(&events, &scenario.rain);
    let transport = TransportPartitioner::new(
        &config.chemical,
        &config.soil,
        scenario,
        config.simulation.process_erosion,
    )
    .run(&mass.soil, scenario);

    debug!("scenario {}: {} applications", scenario.id, events.len());
    Ok(ScenarioRun {
        events,
        mass,
        transport,
    })
}

/// Area-weighted loading of every scenario draining to `reach` in `year`.
///
/// Scenarios growing a crop outside `application.crops` are left out.
/// Scenarios that cannot be read or simulated are skipped with a warning.
pub fn aggregate_reach<S: ScenarioStore, R: RecipeStore>(
    config: &RunConfig,
    scenarios: &S,
    recipes: &R,
    reach: ReachId,
    year: i32,
) -> SamResult<ReachLoading> {
    let recipe = recipes.recipe(reach, year)?;
    let mut aggregator = ScenarioAggregator::new(config.simulation.n_days, config.simulation.process_erosion);

    for entry in &recipe {
        let scenario = match scenarios.scenario(&entry.scenario_id) {
            Ok(scenario) => scenario,
            Err(e) if e.is_recoverable() => {
                aggregator.skip(&entry.scenario_id, &e);
                continue;
            }
            Err(e) => return Err(e),
        };
        if !config.crop_selected(&scenario.crop) {
            aggregator.filter(&entry.scenario_id, &scenario.crop);
            continue;
        }
        match simulate_scenario(config, &scenario) {
            Ok(run) => aggregator.add(&run.transport, entry.area)?,
            Err(e) if e.is_recoverable() => aggregator.skip(&entry.scenario_id, &e),
            Err(e) => return Err(e),
        }
    }
    Ok(aggregator.finish())
}

/// Daily concentrations for one reach and year.
pub fn simulate_reach_year<S: ScenarioStore, R: RecipeStore>(
    config: &RunConfig,
    scenarios: &S,
    recipes: &R,
    reach: ReachId,
    year: i32,
    flow: &FlowRecord,
) -> SamResult<(DailyOutput, ReachLoading)> {
    let hydro = recipes.hydro(reach, config.runoff_year(year))?;
    let loading = aggregate_reach(config, scenarios, recipes, reach, year)?;
    let output = WaterbodyConcentrationModel::new(config).run(flow, &hydro.runoff, &loading)?;
    Ok((output, loading))
}

fn process_reach<S: ScenarioStore, R: RecipeStore, F: FlowStore>(
    config: &RunConfig,
    scenarios: &S,
    recipes: &R,
    flows: &F,
    reach: ReachId,
) -> SamResult<ReachResult> {
    let mut result = ReachResult {
        reach,
        ..ReachResult::default()
    };
    let years = &config.simulation.years;

    let flow = match flows.flow(reach) {
        Ok(flow) => flow,
        Err(e) if e.is_recoverable() => {
            warn!("reach {}: no flow record, skipping ({})", reach, e);
            result.years_skipped = years.len();
            return Ok(result);
        }
        Err(e) => return Err(e),
    };

    info!("reach {}", reach);
    for &year in years {
        match simulate_reach_year(config, scenarios, recipes, reach, year, &flow) {
            Ok((output, loading)) => {
                if output.degenerate_days > 0 {
                    warn!(
                        "reach {} {}: {} days with pesticide but no flow, concentration set to zero",
                        reach, year, output.degenerate_days
                    );
                }
                result.scenarios_simulated += loading.contributing;
                result.scenarios_skipped += loading.skipped.len();
                result.scenarios_filtered += loading.filtered;
                result.outputs.push((year, output));
            }
            Err(e) if e.is_recoverable() => {
                warn!("reach {} {}: skipped ({})", reach, year, e);
                result.years_skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(result)
}

/// Runs the whole batch and writes each reach/year to `sink` exactly once.
pub fn run<S, R, F, O>(config: &RunConfig, scenarios: &S, recipes: &R, flows: &F, sink: &mut O) -> SamResult<RunSummary>
where
    S: ScenarioStore,
    R: RecipeStore,
    F: FlowStore,
    O: OutputSink,
{
    config.validate()?;
    let scenarios = CachedScenarioStore::new(scenarios, config.qc_table()?);
    let reaches = flows.reaches()?;
    info!(
        "simulating {} reaches over {} days from {}",
        reaches.len(),
        config.simulation.n_days,
        config.simulation.start_date
    );
    if let Some(fixed) = config.simulation.fixed_runoff_year {
        info!("reach runoff totals fixed to {}", fixed);
    }

    let results = reaches
        .par_iter()
        .map(|&reach| process_reach(config, &scenarios, recipes, flows, reach))
        .collect::<SamResult<Vec<ReachResult>>>()?;

    let dates = config.dates();
    let mut summary = RunSummary {
        reaches: reaches.len(),
        ..RunSummary::default()
    };
    for result in results {
        summary.reach_years_skipped += result.years_skipped;
        summary.scenarios_simulated += result.scenarios_simulated;
        summary.scenarios_skipped += result.scenarios_skipped;
        summary.scenarios_filtered += result.scenarios_filtered;
        for (year, output) in &result.outputs {
            match sink.write(result.reach, *year, &dates, output) {
                Ok(()) => summary.outputs_written += 1,
                Err(e) if e.is_recoverable() => {
                    warn!("reach {} {}: output not written ({})", result.reach, year, e);
                    summary.reach_years_skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
    summary.qc = scenarios.qc_report();

    info!(
        "done: {} outputs, {} reach-years skipped, {} scenarios simulated, {} skipped, {} other crops",
        summary.outputs_written,
        summary.reach_years_skipped,
        summary.scenarios_simulated,
        summary.scenarios_skipped,
        summary.scenarios_filtered
    );
    Ok(summary)
}
