/**
Partitioning of top-layer pesticide between runoff, erosion and the soil.

Pesticide in the layer distributes between the water held in the layer, the
water running off it and the soil solids, in proportion to the capacity of
each phase:

  runoff capacity   = runoff [cm] * runoff efficiency
  water capacity    = soil water content * delta_x [cm]
  sorbed capacity   = Kd [cm³/g] * bulk density [g/cm³] * delta_x [cm]

Runoff mass is the runoff share of the day's soil mass. Erosion carries the
sorbed share in proportion to the eroded fraction of the layer's solids.
*/
use crate::config::{ChemicalParams, PartitionMethod, SoilConstants};
use crate::scenario::Scenario;

const TONNES_HA_TO_G_CM2: f64 = 0.01;

// Same-day transport of pesticide out of the top layer [kg/ha]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DayTransport {
    pub runoff: f64,
    pub erosion: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TransportSeries {
    pub runoff_mass: Vec<f64>,          // [kg/ha]
    pub erosion_mass: Option<Vec<f64>>, // [kg/ha], present when erosion is processed
}

/**
Soil/water partition coefficient Kd [L/kg] for the selected method.

# Arguments
* `method` - Partitioning method flag.
* `koc` - Chemical KOC, or Kd itself for `PartitionMethod::Kd`.
* `org_carbon` - Organic carbon fraction of the layer.
*/
pub fn partition_coefficient(method: PartitionMethod, koc: f64, org_carbon: f64) -> f64 {
    match method {
        PartitionMethod::Kd => koc,
        PartitionMethod::Koc | PartitionMethod::KocDegradation => koc * org_carbon,
    }
}

/**
Fraction of the layer's pesticide carried by the day's runoff, in [0, 1].

Zero runoff gives zero whatever the other capacities are.
*/
pub fn runoff_fraction(effective_runoff: f64, water_depth: f64, sorbed_depth: f64) -> f64 {
    if effective_runoff <= 0.0 {
        return 0.0;
    }
    effective_runoff / (effective_runoff + water_depth.max(0.0) + sorbed_depth.max(0.0))
}

/**
Day-averaged fraction of water-phase mass surviving aqueous degradation,
`(1 - exp(-k)) / k`, which tends to 1 as `k` goes to 0.
*/
pub fn degradation_adjustment(rate: f64) -> f64 {
    if rate <= 1e-12 {
        1.0
    } else {
        -(-rate).exp_m1() / rate
    }
}

/**
Sediment enrichment ratio for a daily sediment yield.

# Arguments
* `sediment` - Sediment yield in t/ha.

# Returns
`exp(2 - 0.2 ln(sediment in kg/ha))`, never below 1.
*/
pub fn enrichment_ratio(sediment: f64) -> f64 {
    if sediment <= 0.0 {
        return 1.0;
    }
    (2.0 - 0.2 * (sediment * 1000.0).ln()).exp().max(1.0)
}

/// Transport model for one scenario; Kd is fixed by the scenario's soil.
#[derive(Debug, Clone, Copy)]
pub struct TransportPartitioner {
    method: PartitionMethod,
    kd: f64,                // [cm³/g]
    bulk_density: f64,      // [g/cm³]
    delta_x: f64,           // [cm]
    runoff_efficiency: f64, // [-]
    degradation_aqueous: f64,
    process_erosion: bool,
}

impl TransportPartitioner {
    pub fn new(
        chemical: &ChemicalParams,
        soil: &SoilConstants,
        scenario: &Scenario,
        process_erosion: bool,
    ) -> Self {
        TransportPartitioner {
            method: chemical.partition_method,
            kd: partition_coefficient(chemical.partition_method, chemical.koc, scenario.org_carbon),
            bulk_density: scenario.bulk_density,
            delta_x: soil.delta_x,
            runoff_efficiency: soil.runoff_efficiency,
            degradation_aqueous: chemical.degradation_aqueous,
            process_erosion,
        }
    }

    pub fn kd(&self) -> f64 {
        self.kd
    }

    fn sorbed_depth(&self) -> f64 {
        self.kd * self.bulk_density * self.delta_x
    }

    // Split one day's soil mass
    pub fn partition_day(&self, soil_mass: f64, runoff: f64, soil_water: f64, sediment: f64) -> DayTransport {
        if soil_mass <= 0.0 {
            return DayTransport::default();
        }
        let effective_runoff = runoff.max(0.0) * self.runoff_efficiency;
        let water_depth = soil_water * self.delta_x;
        let sorbed_depth = self.sorbed_depth();

        let mut runoff_mass = soil_mass * runoff_fraction(effective_runoff, water_depth, sorbed_depth);
        if self.method == PartitionMethod::KocDegradation {
            runoff_mass *= degradation_adjustment(self.degradation_aqueous);
        }

        let mut erosion_mass = 0.0;
        if self.process_erosion && sediment > 0.0 {
            let capacity = effective_runoff + water_depth.max(0.0) + sorbed_depth;
            if capacity > 0.0 {
                let sorbed = soil_mass * sorbed_depth / capacity;
                let layer_solids = self.bulk_density * self.delta_x; // [g/cm²]
                let eroded = enrichment_ratio(sediment) * sediment * TONNES_HA_TO_G_CM2 / layer_solids;
                erosion_mass = sorbed * eroded.min(1.0);
            }
        }

        DayTransport {
            runoff: runoff_mass,
            erosion: erosion_mass,
        }
    }

    pub fn run(&self, soil_mass: &[f64], scenario: &Scenario) -> TransportSeries {
        let days: Vec<DayTransport> = soil_mass
            .iter()
            .enumerate()
            .map(|(d, &mass)| {
                let sediment = scenario
                    .erosion
                    .as_ref()
                    .and_then(|e| e.get(d).copied())
                    .unwrap_or(0.0);
                self.partition_day(mass, scenario.runoff[d], scenario.soil_water[d], sediment)
            })
            .collect();

        TransportSeries {
            runoff_mass: days.iter().map(|t| t.runoff).collect(),
            erosion_mass: self
                .process_erosion
                .then(|| days.iter().map(|t| t.erosion).collect()),
        }
    }
}
