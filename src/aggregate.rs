use crate::error::{SamError, SamResult};
use crate::transport::TransportSeries;
use log::{debug, warn};

// Reach-level pesticide loading for one year [kg]
#[derive(Debug, Clone, Default)]
pub struct ReachLoading {
    pub runoff_mass: Vec<f64>,
    pub erosion_mass: Option<Vec<f64>>,
    pub contributing: usize,  // Scenarios summed in
    pub skipped: Vec<String>, // Scenarios that could not be simulated
    pub filtered: usize,      // Scenarios growing a crop the product is not used on
}

/// Area-weighted sum of scenario loadings draining to one reach.
pub struct ScenarioAggregator {
    loading: ReachLoading,
}

impl ScenarioAggregator {
    pub fn new(n_days: usize, process_erosion: bool) -> Self {
        ScenarioAggregator {
            loading: ReachLoading {
                runoff_mass: vec![0.0; n_days],
                erosion_mass: process_erosion.then(|| vec![0.0; n_days]),
                ..ReachLoading::default()
            },
        }
    }

    // Add one scenario's loading [kg/ha] over `area` [ha]
    pub fn add(&mut self, transport: &TransportSeries, area: f64) -> SamResult<()> {
        let n_days = self.loading.runoff_mass.len();
        if transport.runoff_mass.len() != n_days {
            return Err(SamError::SizeMismatch {
                name: "scenario runoff mass".to_string(),
                expected: n_days,
                actual: transport.runoff_mass.len(),
            });
        }
        for (total, mass) in self.loading.runoff_mass.iter_mut().zip(&transport.runoff_mass) {
            *total += mass * area;
        }
        if let (Some(total), Some(erosion)) = (self.loading.erosion_mass.as_mut(), &transport.erosion_mass) {
            for (total, mass) in total.iter_mut().zip(erosion) {
                *total += mass * area;
            }
        }
        self.loading.contributing += 1;
        Ok(())
    }

    // A scenario that cannot be read or simulated contributes nothing
    pub fn skip(&mut self, scenario_id: &str, reason: &SamError) {
        warn!("skipping scenario {}: {}", scenario_id, reason);
        self.loading.skipped.push(scenario_id.to_string());
    }

    pub fn filter(&mut self, scenario_id: &str, crop: &str) {
        debug!("scenario {} grows {}, left out", scenario_id, crop);
        self.loading.filtered += 1;
    }

    pub fn finish(self) -> ReachLoading {
        self.loading
    }
}
