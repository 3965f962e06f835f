use crate::aggregate::ReachLoading;
use crate::config::{BenthicParams, RunConfig};
use crate::error::{SamError, SamResult};
use crate::transport::partition_coefficient;
use log::debug;
use nalgebra::{Matrix2, Matrix4, Vector2};
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: f64 = 86400.0;

// Daily hydraulics of one reach, aligned with the simulation horizon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRecord {
    pub q: Vec<f64>,  // Streamflow [m³/s]
    pub v: Vec<f64>,  // Velocity [m/s]
    pub xc: Vec<f64>, // Cross-sectional area [m²]
    #[serde(default)]
    pub area: Option<Vec<f64>>, // Waterbody surface area [m²]
    #[serde(default)]
    pub depth: Option<Vec<f64>>, // Waterbody depth [m]
}

impl FlowRecord {
    pub fn validate(&self, n_days: usize) -> SamResult<()> {
        let mut series = vec![("q", self.q.len()), ("v", self.v.len()), ("xc", self.xc.len())];
        if let Some(area) = &self.area {
            series.push(("area", area.len()));
        }
        if let Some(depth) = &self.depth {
            series.push(("depth", depth.len()));
        }
        for (name, len) in series {
            if len != n_days {
                return Err(SamError::SizeMismatch {
                    name: format!("flow {}", name),
                    expected: n_days,
                    actual: len,
                });
            }
        }
        Ok(())
    }
}

// Two-compartment daily averages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BenthicOutput {
    pub water_conc: Vec<f64>,   // Day-averaged dissolved water column concentration [kg/m³]
    pub benthic_conc: Vec<f64>, // Day-averaged benthic pore water concentration [kg/m³]
    pub benthic_mass: Vec<f64>, // End-of-day benthic storage [kg]
}

// One reach/year of concentration output
#[derive(Debug, Clone, Default)]
pub struct DailyOutput {
    pub total_flow: Vec<f64>,        // [m³/day]
    pub baseflow: Vec<f64>,          // [m³/day]
    pub total_runoff: Vec<f64>,      // [m³/day]
    pub total_conc: Vec<f64>,        // [kg/m³]
    pub runoff_conc: Vec<f64>,       // [kg/m³]
    pub total_runoff_mass: Vec<f64>, // [kg]
    pub benthic: Option<BenthicOutput>,
    pub degenerate_days: usize, // Days with mass but no volume to carry it
}

/// Splits a day's streamflow volume into runoff and baseflow [m³/day].
pub fn separate_baseflow(q: f64, runoff: f64) -> (f64, f64) {
    let runoff = runoff.max(0.0);
    let baseflow = (q * SECONDS_PER_DAY - runoff).max(0.0);
    (baseflow + runoff, baseflow)
}

// Mass over volume, zero when either is not positive
fn concentration(mass: f64, volume: f64) -> f64 {
    if mass > 0.0 && volume > 0.0 { mass / volume } else { 0.0 }
}

// Pesticide mass in each compartment [kg]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BenthicState {
    pub water: f64,
    pub benthic: f64,
}

// Geometry and loads of one day in the two-compartment model
#[derive(Debug, Clone, Copy, Default)]
pub struct BenthicDay {
    pub water_volume: f64, // [m³]
    pub area: f64,         // Benthic surface area [m²]
    pub flow: f64,         // Outflow [m³/day]
    pub water_load: f64,   // [kg]
    pub benthic_load: f64, // [kg]
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BenthicDayResult {
    pub water_conc: f64,
    pub benthic_conc: f64,
}

/// Water column and benthic sediment exchanging dissolved pesticide.
///
/// Each day is the exact solution of the linear system
///
///   dm1/dt = -(kf + k1) m1 - ω (fw1 m1 / v1 - fw2 m2 / v2)
///   dm2/dt = ω (fw1 m1 / v1 - fw2 m2 / v2) - k2 m2
///
/// where kf is the flushing rate, fw the dissolved fractions and ω the
/// exchange conductance. The day averages come from the same matrix
/// exponential, taken over the system augmented with its integral.
#[derive(Debug, Clone)]
pub struct BenthicModel {
    params: BenthicParams,
    kd_sediment: f64,         // [m³/kg]
    degradation_aqueous: f64, // [1/day]
    degradation_benthic: f64, // [1/day]
}

impl BenthicModel {
    pub fn new(config: &RunConfig) -> Self {
        let params = config.benthic.clone();
        BenthicModel {
            // L/kg to m³/kg
            kd_sediment: partition_coefficient(config.chemical.partition_method, config.chemical.koc, params.foc)
                / 1000.0,
            degradation_aqueous: config.chemical.degradation_aqueous,
            degradation_benthic: config.chemical.degradation_benthic,
            params,
        }
    }

    pub fn step(&self, state: BenthicState, day: BenthicDay) -> (BenthicState, BenthicDayResult) {
        let p = &self.params;
        let m1 = state.water + day.water_load;
        let m2 = state.benthic + day.benthic_load;
        let benthic_decay = (-self.degradation_benthic).exp();

        if day.area <= 0.0 {
            // No sediment bed to exchange with
            return (
                BenthicState {
                    water: 0.0,
                    benthic: m2 * benthic_decay,
                },
                BenthicDayResult::default(),
            );
        }

        let v2 = day.area * p.depth * p.porosity;
        let solids = day.area * p.depth * p.bulk_density;
        let fw2 = v2 / (v2 + self.kd_sediment * solids);
        let omega = p.mass_transfer * day.area;

        if day.water_volume <= 0.0 {
            // Dry channel: water column mass leaves, the bed only degrades
            let benthic = m2 * benthic_decay;
            let avg = if self.degradation_benthic > 0.0 {
                m2 * -(-self.degradation_benthic).exp_m1() / self.degradation_benthic
            } else {
                m2
            };
            return (
                BenthicState { water: 0.0, benthic },
                BenthicDayResult {
                    water_conc: 0.0,
                    benthic_conc: fw2 * avg / v2,
                },
            );
        }

        let v1 = day.water_volume;
        let fw1 = 1.0 / (1.0 + self.kd_sediment * p.suspended_sediment);
        let kf = day.flow.max(0.0) / v1;
        let a = Matrix2::new(
            -(kf + self.degradation_aqueous) - omega * fw1 / v1,
            omega * fw2 / v2,
            omega * fw1 / v1,
            -self.degradation_benthic - omega * fw2 / v2,
        );

        #[rustfmt::skip]
        let augmented = Matrix4::new(
            a[(0, 0)], a[(0, 1)], 1.0, 0.0,
            a[(1, 0)], a[(1, 1)], 0.0, 1.0,
            0.0,       0.0,       0.0, 0.0,
            0.0,       0.0,       0.0, 0.0,
        );
        let e = augmented.exp();
        let decay: Matrix2<f64> = e.fixed_view::<2, 2>(0, 0).into_owned();
        let integral: Matrix2<f64> = e.fixed_view::<2, 2>(0, 2).into_owned();

        let m0 = Vector2::new(m1, m2);
        let end = decay * m0;
        let avg = integral * m0;

        (
            BenthicState {
                water: end[0].max(0.0),
                benthic: end[1].max(0.0),
            },
            BenthicDayResult {
                water_conc: (fw1 * avg[0] / v1).max(0.0),
                benthic_conc: (fw2 * avg[1] / v2).max(0.0),
            },
        )
    }
}

/// Turns reach loading and hydraulics into daily in-stream concentrations.
pub struct WaterbodyConcentrationModel {
    n_days: usize,
    reach_length: f64, // [m]
    nominal_depth: f64,
    benthic: Option<BenthicModel>,
}

impl WaterbodyConcentrationModel {
    pub fn new(config: &RunConfig) -> Self {
        WaterbodyConcentrationModel {
            n_days: config.simulation.n_days,
            reach_length: config.simulation.reach_length,
            nominal_depth: config.benthic.nominal_depth,
            benthic: config.simulation.process_benthic.then(|| BenthicModel::new(config)),
        }
    }

    pub fn run(&self, flow: &FlowRecord, total_runoff: &[f64], loading: &ReachLoading) -> SamResult<DailyOutput> {
        flow.validate(self.n_days)?;
        for (name, len) in [
            ("reach runoff", total_runoff.len()),
            ("reach runoff mass", loading.runoff_mass.len()),
        ] {
            if len != self.n_days {
                return Err(SamError::SizeMismatch {
                    name: name.to_string(),
                    expected: self.n_days,
                    actual: len,
                });
            }
        }

        let mut out = DailyOutput {
            total_runoff: total_runoff.to_vec(),
            total_runoff_mass: loading.runoff_mass.clone(),
            ..DailyOutput::default()
        };
        for d in 0..self.n_days {
            let (total_flow, baseflow) = separate_baseflow(flow.q[d], total_runoff[d]);
            let mass = loading.runoff_mass[d];
            if mass > 0.0 && total_flow <= 0.0 {
                out.degenerate_days += 1;
            }
            out.total_flow.push(total_flow);
            out.baseflow.push(baseflow);
            out.total_conc.push(concentration(mass, total_flow));
            out.runoff_conc.push(concentration(mass, total_runoff[d]));
        }
        if out.degenerate_days > 0 {
            debug!("{} days with pesticide mass but no flow", out.degenerate_days);
        }

        if let Some(model) = &self.benthic {
            out.benthic = Some(self.run_benthic(model, flow, &out.total_flow, loading));
        }
        Ok(out)
    }

    fn run_benthic(
        &self,
        model: &BenthicModel,
        flow: &FlowRecord,
        total_flow: &[f64],
        loading: &ReachLoading,
    ) -> BenthicOutput {
        let mut out = BenthicOutput::default();
        let mut state = BenthicState::default();
        for d in 0..self.n_days {
            let water_volume = match (&flow.area, &flow.depth) {
                (Some(area), Some(depth)) => area[d] * depth[d],
                _ => flow.xc[d] * self.reach_length,
            };
            let area = match &flow.area {
                Some(area) => area[d],
                None => water_volume / self.nominal_depth,
            };
            let day = BenthicDay {
                water_volume,
                area,
                flow: total_flow[d],
                water_load: loading.runoff_mass[d],
                benthic_load: loading.erosion_mass.as_ref().map_or(0.0, |e| e[d]),
            };
            let (next, result) = model.step(state, day);
            state = next;
            out.water_conc.push(result.water_conc);
            out.benthic_conc.push(result.benthic_conc);
            out.benthic_mass.push(state.benthic);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartitionMethod;
    use crate::config::tests::SAMPLE;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn config(n_days: usize, benthic: bool) -> RunConfig {
        let mut config = RunConfig::from_toml_str(SAMPLE).unwrap();
        config.simulation.n_days = n_days;
        config.simulation.process_benthic = benthic;
        config
    }

    fn flow(n_days: usize, q: f64) -> FlowRecord {
        FlowRecord {
            q: vec![q; n_days],
            v: vec![0.5; n_days],
            xc: vec![10.0; n_days],
            area: None,
            depth: None,
        }
    }

    fn loading(mass: Vec<f64>) -> ReachLoading {
        ReachLoading {
            runoff_mass: mass,
            ..ReachLoading::default()
        }
    }

    #[test]
    fn baseflow_is_flow_minus_runoff() {
        let (total, base) = separate_baseflow(1.0, 6400.0);
        assert_eq!(base, 80000.0);
        assert_eq!(total, 86400.0);

        let (total, base) = separate_baseflow(0.0, 500.0);
        assert_eq!(base, 0.0);
        assert_eq!(total, 500.0);
    }

    #[test]
    fn concentration_is_mass_over_flow() {
        let model = WaterbodyConcentrationModel::new(&config(3, false));
        let out = model
            .run(&flow(3, 1.0), &[6400.0, 6400.0, 0.0], &loading(vec![0.0, 2.0, 2.0]))
            .unwrap();
        assert_eq!(out.total_conc[0], 0.0);
        assert_relative_eq!(out.total_conc[1], 2.0 / 86400.0);
        assert_relative_eq!(out.runoff_conc[1], 2.0 / 6400.0);
        assert_eq!(out.runoff_conc[2], 0.0);
        assert!(out.benthic.is_none());
    }

    #[test]
    fn zero_flow_day_is_degenerate_not_an_error() {
        let model = WaterbodyConcentrationModel::new(&config(2, false));
        let out = model.run(&flow(2, 0.0), &[0.0, 0.0], &loading(vec![1.0, 0.0])).unwrap();
        assert_eq!(out.total_conc, vec![0.0, 0.0]);
        assert_eq!(out.degenerate_days, 1);
    }

    #[test]
    fn misaligned_series_are_rejected() {
        let model = WaterbodyConcentrationModel::new(&config(3, false));
        assert!(model.run(&flow(2, 1.0), &[0.0; 3], &loading(vec![0.0; 3])).is_err());
        assert!(model.run(&flow(3, 1.0), &[0.0; 3], &loading(vec![0.0; 2])).is_err());
    }

    #[test]
    fn benthic_without_exchange_is_a_flushed_tank() {
        let mut config = config(1, true);
        config.benthic.mass_transfer = 0.0;
        config.chemical.koc = 0.0;
        config.chemical.degradation_aqueous = 0.0;
        let model = BenthicModel::new(&config);
        let day = BenthicDay {
            water_volume: 100.0,
            area: 50.0,
            flow: 100.0,
            water_load: 1.0,
            benthic_load: 0.0,
        };
        let (state, result) = model.step(BenthicState::default(), day);
        // kf = 1/day: end mass e^-1, mean mass 1 - e^-1
        assert_relative_eq!(state.water, (-1.0f64).exp(), max_relative = 1e-9);
        assert_relative_eq!(result.water_conc, (1.0 - (-1.0f64).exp()) / 100.0, max_relative = 1e-9);
        assert_eq!(state.benthic, 0.0);
    }

    #[test]
    fn sediment_kd_follows_partition_method() {
        let day = BenthicDay {
            water_volume: 100.0,
            area: 50.0,
            flow: 10.0,
            water_load: 1.0,
            benthic_load: 0.5,
        };
        let mut direct = config(1, true);
        direct.chemical.partition_method = PartitionMethod::Kd;
        direct.chemical.koc = 4.0;
        let mut normalized = config(1, true);
        normalized.chemical.partition_method = PartitionMethod::Koc;
        normalized.chemical.koc = 4.0 / normalized.benthic.foc;

        let (a_state, a) = BenthicModel::new(&direct).step(BenthicState::default(), day);
        let (b_state, b) = BenthicModel::new(&normalized).step(BenthicState::default(), day);
        assert_relative_eq!(a.water_conc, b.water_conc, max_relative = 1e-9);
        assert_relative_eq!(a.benthic_conc, b.benthic_conc, max_relative = 1e-9);
        assert_relative_eq!(a_state.benthic, b_state.benthic, max_relative = 1e-9);
    }

    #[test]
    fn eroded_load_enters_the_bed() {
        let mut config = config(1, true);
        config.benthic.mass_transfer = 0.0;
        config.chemical.degradation_benthic = 0.1;
        let day = BenthicDay {
            water_volume: 100.0,
            area: 50.0,
            flow: 100.0,
            water_load: 0.0,
            benthic_load: 2.0,
        };
        let (state, result) = BenthicModel::new(&config).step(BenthicState::default(), day);
        assert_relative_eq!(state.benthic, 2.0 * (-0.1f64).exp(), max_relative = 1e-9);
        assert_abs_diff_eq!(state.water, 0.0, epsilon = 1e-15);
        assert_abs_diff_eq!(result.water_conc, 0.0, epsilon = 1e-15);
        assert!(result.benthic_conc > 0.0);
    }

    #[test]
    fn benthic_storage_is_carried_forward() {
        let mut config = config(5, true);
        config.chemical.degradation_benthic = 0.0;
        let model = WaterbodyConcentrationModel::new(&config);
        let out = model
            .run(&flow(5, 0.01), &[0.0; 5], &loading(vec![5.0, 0.0, 0.0, 0.0, 0.0]))
            .unwrap();
        let benthic = out.benthic.unwrap();
        assert!(benthic.benthic_mass[0] > 0.0);
        for d in 1..5 {
            assert!(benthic.benthic_mass[d] > 0.0);
            assert!(benthic.water_conc[d] >= 0.0 && benthic.benthic_conc[d] >= 0.0);
        }
    }

    #[test]
    fn benthic_zero_mass_is_zero_concentration() {
        let model = WaterbodyConcentrationModel::new(&config(4, true));
        let out = model.run(&flow(4, 1.0), &[10.0; 4], &loading(vec![0.0; 4])).unwrap();
        let benthic = out.benthic.unwrap();
        assert!(benthic.water_conc.iter().chain(&benthic.benthic_conc).all(|&c| c == 0.0));
    }
}
