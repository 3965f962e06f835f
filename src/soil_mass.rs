use crate::applications::ApplicationEvent;
use crate::config::{ChemicalParams, SoilConstants};

// Pesticide carried from one day to the next [kg/ha]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SoilState {
    pub foliar: f64,
    pub soil: f64,
}

// What happens to the pools on a single day
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DayInputs {
    pub soil_applied: f64,   // [kg/ha]
    pub foliar_applied: f64, // [kg/ha]
    pub rain: f64,           // [cm]
}

// End-of-day pool masses over the horizon [kg/ha]
#[derive(Debug, Clone, Default)]
pub struct SoilMassSeries {
    pub foliar: Vec<f64>,
    pub soil: Vec<f64>,
}

/// Daily first-order mass balance of the canopy and top soil layer.
///
/// Degradation is a discrete `exp(-k)` decay applied once per day.
#[derive(Debug, Clone, Copy)]
pub struct SoilMassBalance {
    foliar_decay: f64,     // Daily surviving fraction on foliage [-]
    soil_decay: f64,       // Daily surviving fraction in the top layer [-]
    washoff_fraction: f64, // [-]
    rain_threshold: f64,   // [cm]
}

impl SoilMassBalance {
    pub fn new(chemical: &ChemicalParams, soil: &SoilConstants) -> Self {
        SoilMassBalance {
            foliar_decay: (-chemical.degradation_foliar).exp(),
            soil_decay: (-chemical.degradation_soil).exp(),
            washoff_fraction: chemical.washoff_fraction,
            rain_threshold: soil.washoff_rain_threshold,
        }
    }

    // Advance both pools by one day
    pub fn step(&self, state: SoilState, day: DayInputs) -> SoilState {
        let mut foliar = state.foliar + day.foliar_applied;
        let mut to_soil = day.soil_applied;

        if day.rain > self.rain_threshold && day.rain > 0.0 {
            let washed = foliar * self.washoff_fraction;
            foliar -= washed;
            to_soil += washed;
        }

        SoilState {
            foliar: (foliar * self.foliar_decay).max(0.0),
            soil: ((state.soil + to_soil) * self.soil_decay).max(0.0),
        }
    }

    pub fn run(&self, events: &[ApplicationEvent], rain: &[f64]) -> SoilMassSeries {
        let n_days = rain.len();
        let mut inputs: Vec<DayInputs> = rain
            .iter()
            .map(|&rain| DayInputs {
                rain,
                ..DayInputs::default()
            })
            .collect();
        for event in events.iter().filter(|e| e.day < n_days) {
            inputs[event.day].soil_applied += event.soil_mass();
            inputs[event.day].foliar_applied += event.foliar_mass();
        }

        let states: Vec<SoilState> = inputs
            .iter()
            .scan(SoilState::default(), |state, &day| {
                *state = self.step(*state, day);
                Some(*state)
            })
            .collect();

        SoilMassSeries {
            foliar: states.iter().map(|s| s.foliar).collect(),
            soil: states.iter().map(|s| s.soil).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn balance(foliar: f64, soil: f64, washoff: f64) -> SoilMassBalance {
        let chemical = ChemicalParams {
            koc: 100.0,
            partition_method: crate::config::PartitionMethod::Koc,
            degradation_aqueous: 0.0,
            degradation_soil: soil,
            degradation_foliar: foliar,
            degradation_benthic: 0.0,
            washoff_fraction: washoff,
        };
        SoilMassBalance::new(&chemical, &SoilConstants::default())
    }

    fn event(day: usize, mass: f64, foliar_fraction: f64) -> ApplicationEvent {
        ApplicationEvent {
            day,
            mass,
            soil_fraction: 1.0 - foliar_fraction,
            foliar_fraction,
        }
    }

    #[test]
    fn incorporated_mass_persists_without_decay() {
        let series = balance(0.0, 0.0, 0.0).run(&[event(10, 100.0, 0.0)], &vec![0.0; 30]);
        assert!(series.soil[..10].iter().all(|&m| m == 0.0));
        assert!(series.soil[10..].iter().all(|&m| m == 100.0));
        assert!(series.foliar.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn soil_decays_once_per_day() {
        let series = balance(0.0, 0.1, 0.0).run(&[event(0, 1.0, 0.0)], &vec![0.0; 5]);
        for (d, &m) in series.soil.iter().enumerate() {
            assert_relative_eq!(m, (-0.1 * (d as f64 + 1.0)).exp(), max_relative = 1e-12);
        }
    }

    #[test]
    fn washoff_needs_rain() {
        let model = balance(0.0, 0.0, 0.5);
        let state = SoilState { foliar: 10.0, soil: 0.0 };
        let dry = model.step(state, DayInputs::default());
        assert_eq!(dry, state);

        let wet = model.step(state, DayInputs { rain: 1.0, ..DayInputs::default() });
        assert_eq!(wet.foliar, 5.0);
        assert_eq!(wet.soil, 5.0);
    }

    #[test]
    fn pools_stay_non_negative_and_conserve_without_decay() {
        let mut rain = vec![0.0; 60];
        for d in (0..60).step_by(7) {
            rain[d] = 2.0;
        }
        let events = [event(3, 4.0, 0.75), event(20, 2.0, 0.3)];
        let series = balance(0.0, 0.0, 0.4).run(&events, &rain);
        for d in 0..60 {
            assert!(series.foliar[d] >= 0.0 && series.soil[d] >= 0.0);
        }
        assert_relative_eq!(series.foliar[59] + series.soil[59], 6.0, max_relative = 1e-12);

        let decaying = balance(0.2, 0.05, 0.4).run(&events, &rain);
        assert!(decaying.foliar.iter().chain(&decaying.soil).all(|&m| m >= 0.0));
    }

    #[test]
    fn no_rain_no_applications_is_all_zero() {
        let series = balance(0.1, 0.1, 0.5).run(&[], &vec![0.0; 100]);
        assert!(series.soil.iter().chain(&series.foliar).all(|&m| m == 0.0));
    }
}
