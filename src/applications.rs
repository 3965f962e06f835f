use crate::config::{
    ApplicationConfig, ApplicationMethod, ApplicationSpec, CropStage, RunConfig, SchedulingMode,
};
use crate::scenario::Scenario;
use chrono::{Datelike, Duration, NaiveDate};
use std::collections::HashMap;

// A resolved pesticide application on a simulation day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApplicationEvent {
    pub day: usize,           // Index into the simulation horizon
    pub mass: f64,            // [kg/ha]
    pub soil_fraction: f64,   // [-]
    pub foliar_fraction: f64, // [-]
}

impl ApplicationEvent {
    pub fn soil_mass(&self) -> f64 {
        self.mass * self.soil_fraction
    }

    pub fn foliar_mass(&self) -> f64 {
        self.mass * self.foliar_fraction
    }
}

// One calendar year of the horizon, in horizon day indices (may start before day 0)
#[derive(Debug, Clone, Copy)]
struct Season {
    first_day: i64,
    length: i64,
}

pub struct ApplicationScheduler<'a> {
    app: &'a ApplicationConfig,
    start_date: NaiveDate,
    n_days: usize,
}

impl<'a> ApplicationScheduler<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        ApplicationScheduler {
            app: &config.application,
            start_date: config.simulation.start_date,
            n_days: config.simulation.n_days,
        }
    }

    fn seasons(&self) -> Vec<Season> {
        let last = self.start_date + Duration::days(self.n_days as i64 - 1);
        (self.start_date.year()..=last.year())
            .filter_map(|year| {
                let jan1 = NaiveDate::from_ymd_opt(year, 1, 1)?;
                let next = NaiveDate::from_ymd_opt(year + 1, 1, 1)?;
                Some(Season {
                    first_day: (jan1 - self.start_date).num_days(),
                    length: (next - jan1).num_days(),
                })
            })
            .collect()
    }

    /// Applications for every calendar year of the horizon, ordered by day.
    ///
    /// At most `max_per_year` applications land in any calendar year, taken
    /// season by season in the configured order. A crop-stage offset that
    /// crosses into the next year counts against the year it lands in.
    /// An application without a valid day is dropped.
    pub fn schedule(&self, scenario: &Scenario) -> Vec<ApplicationEvent> {
        let mut events = Vec::new();
        let mut placed: HashMap<i32, usize> = HashMap::new();
        for season in self.seasons() {
            for spec in &self.app.events {
                let day = match self.app.mode {
                    SchedulingMode::Calendar => self.calendar_day(season, spec),
                    SchedulingMode::CropStage => self.stage_day(season, spec, scenario),
                    SchedulingMode::RainTriggered => self.triggered_day(season, spec, scenario),
                };
                let Some(day) = day else { continue };
                let count = placed.entry(self.year_of(day)).or_insert(0);
                if *count < self.app.max_per_year {
                    events.push(self.split(spec, day, scenario));
                    *count += 1;
                }
            }
        }
        events.sort_by_key(|e| e.day);
        events
    }

    fn year_of(&self, day: usize) -> i32 {
        (self.start_date + Duration::days(day as i64)).year()
    }

    // First day in [start, start + window) that lies inside the horizon
    fn first_valid(&self, start: i64, window: u32) -> Option<usize> {
        (start..start + window as i64)
            .find(|&d| d >= 0 && d < self.n_days as i64)
            .map(|d| d as usize)
    }

    fn calendar_day(&self, season: Season, spec: &ApplicationSpec) -> Option<usize> {
        self.first_valid(season.first_day + spec.day as i64 - 1, spec.window)
    }

    fn stage_day(&self, season: Season, spec: &ApplicationSpec, scenario: &Scenario) -> Option<usize> {
        let anchor = self.find_stage(season, &scenario.plant_factor)?;
        self.first_valid(anchor as i64 + spec.day as i64, spec.window)
    }

    fn triggered_day(&self, season: Season, spec: &ApplicationSpec, scenario: &Scenario) -> Option<usize> {
        let start = season.first_day + spec.day as i64 - 1;
        let trigger = (start..start + spec.window as i64)
            .filter(|&d| d >= 0 && d < self.n_days as i64)
            .find(|&d| scenario.rain[d as usize] >= self.app.trigger_rain)?;
        // Applied the day after the qualifying rain
        let day = trigger as usize + 1;
        (day < self.n_days).then_some(day)
    }

    // Day the anchor crop stage is reached within the season, if it is
    fn find_stage(&self, season: Season, plant_factor: &[f64]) -> Option<usize> {
        let threshold = self.app.stage_threshold;
        let lo = season.first_day.max(0) as usize;
        let hi = ((season.first_day + season.length).min(self.n_days as i64)).max(0) as usize;
        if lo >= hi {
            return None;
        }

        // A crop already up on day 0 has no observed emergence
        let emergence = (lo.max(1)..hi).find(|&d| plant_factor[d] > threshold && plant_factor[d - 1] <= threshold)?;

        match self.app.anchor {
            CropStage::Emergence => Some(emergence),
            CropStage::Maturity => {
                let peak = plant_factor[emergence..hi].iter().cloned().fold(f64::MIN, f64::max);
                (emergence..hi).find(|&d| plant_factor[d] >= peak)
            }
            CropStage::Harvest => (emergence + 1..hi).find(|&d| plant_factor[d] <= threshold),
        }
    }

    fn split(&self, spec: &ApplicationSpec, day: usize, scenario: &Scenario) -> ApplicationEvent {
        let foliar_fraction = match spec.method {
            ApplicationMethod::Incorporated => 0.0,
            ApplicationMethod::Surface => {
                (self.app.interception_efficiency * scenario.canopy_cover(day)).clamp(0.0, 1.0)
            }
        };
        ApplicationEvent {
            day,
            mass: spec.mass,
            soil_fraction: 1.0 - foliar_fraction,
            foliar_fraction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;

    fn config(mode: SchedulingMode, n_days: usize) -> RunConfig {
        let mut config = RunConfig::from_toml_str(SAMPLE).unwrap();
        config.simulation.n_days = n_days;
        config.application.mode = mode;
        config.application.max_per_year = usize::MAX;
        config
    }

    fn spec(day: i32, window: u32, method: ApplicationMethod) -> ApplicationSpec {
        ApplicationSpec {
            mass: 1.0,
            method,
            day,
            window,
        }
    }

    #[test]
    fn calendar_applications_repeat_each_year() {
        let mut config = config(SchedulingMode::Calendar, 730);
        config.application.events = vec![spec(100, 1, ApplicationMethod::Incorporated)];
        let scenario = Scenario::uniform("s", 730, 0.0, 0.0);
        let events = ApplicationScheduler::new(&config).schedule(&scenario);
        let days: Vec<usize> = events.iter().map(|e| e.day).collect();
        assert_eq!(days, vec![99, 464]);
        assert_eq!(events[0].soil_fraction, 1.0);
    }

    #[test]
    fn calendar_day_before_horizon_is_dropped() {
        let mut config = config(SchedulingMode::Calendar, 200);
        config.simulation.start_date = NaiveDate::from_ymd_opt(2010, 3, 1).unwrap();
        config.application.events = vec![spec(10, 5, ApplicationMethod::Incorporated)];
        let scenario = Scenario::uniform("s", 200, 0.0, 0.0);
        assert!(ApplicationScheduler::new(&config).schedule(&scenario).is_empty());
    }

    #[test]
    fn crop_stage_offsets_from_emergence() {
        let mut config = config(SchedulingMode::CropStage, 365);
        config.application.events = vec![
            spec(-7, 1, ApplicationMethod::Incorporated),
            spec(5, 1, ApplicationMethod::Incorporated),
        ];
        let mut scenario = Scenario::uniform("s", 365, 0.0, 0.0);
        for d in 50..200 {
            scenario.plant_factor[d] = 0.5;
        }
        let events = ApplicationScheduler::new(&config).schedule(&scenario);
        let days: Vec<usize> = events.iter().map(|e| e.day).collect();
        assert_eq!(days, vec![43, 55]);
    }

    #[test]
    fn harvest_and_maturity_anchors() {
        let mut config = config(SchedulingMode::CropStage, 365);
        config.application.events = vec![spec(0, 1, ApplicationMethod::Incorporated)];
        let mut scenario = Scenario::uniform("s", 365, 0.0, 0.0);
        for d in 50..150 {
            scenario.plant_factor[d] = ((d - 49) as f64 / 50.0).min(1.0);
        }
        config.application.anchor = CropStage::Maturity;
        assert_eq!(ApplicationScheduler::new(&config).schedule(&scenario)[0].day, 99);
        config.application.anchor = CropStage::Harvest;
        assert_eq!(ApplicationScheduler::new(&config).schedule(&scenario)[0].day, 150);
    }

    #[test]
    fn crop_up_at_horizon_start_has_no_emergence() {
        let mut config = config(SchedulingMode::CropStage, 730);
        config.application.events = vec![spec(5, 1, ApplicationMethod::Incorporated)];
        let mut scenario = Scenario::uniform("s", 730, 0.0, 0.0);
        scenario.plant_factor = vec![0.5; 730];
        assert!(ApplicationScheduler::new(&config).schedule(&scenario).is_empty());

        // Regrowth after a gap is a real emergence
        for d in 400..410 {
            scenario.plant_factor[d] = 0.0;
        }
        let days: Vec<usize> = ApplicationScheduler::new(&config)
            .schedule(&scenario)
            .iter()
            .map(|e| e.day)
            .collect();
        assert_eq!(days, vec![415]);
    }

    #[test]
    fn cap_counts_the_year_an_application_lands_in() {
        let mut config = config(SchedulingMode::CropStage, 730);
        config.application.max_per_year = 1;
        config.application.events = vec![
            spec(100, 1, ApplicationMethod::Incorporated),
            spec(-10, 1, ApplicationMethod::Incorporated),
        ];
        let mut scenario = Scenario::uniform("s", 730, 0.0, 0.0);
        for d in 300..330 {
            scenario.plant_factor[d] = 0.5;
        }
        for d in 415..500 {
            scenario.plant_factor[d] = 0.5;
        }
        // 2010 emergence pushes its first application into 2011, which fills 2011
        let days: Vec<usize> = ApplicationScheduler::new(&config)
            .schedule(&scenario)
            .iter()
            .map(|e| e.day)
            .collect();
        assert_eq!(days, vec![290, 400]);
    }

    #[test]
    fn unreached_stage_schedules_nothing() {
        let mut config = config(SchedulingMode::CropStage, 365);
        config.application.events = vec![spec(0, 1, ApplicationMethod::Surface)];
        let scenario = Scenario::uniform("s", 365, 0.0, 0.0);
        assert!(ApplicationScheduler::new(&config).schedule(&scenario).is_empty());
    }

    #[test]
    fn rain_triggers_application_next_day() {
        let mut config = config(SchedulingMode::RainTriggered, 365);
        config.application.events = vec![spec(15, 10, ApplicationMethod::Incorporated)];
        let mut scenario = Scenario::uniform("s", 365, 0.0, 0.0);
        let scheduler = ApplicationScheduler::new(&config);
        assert!(scheduler.schedule(&scenario).is_empty());

        scenario.rain[20] = 1.0;
        let events = scheduler.schedule(&scenario);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].day, 21);
    }

    #[test]
    fn excess_applications_are_dropped() {
        let mut config = config(SchedulingMode::Calendar, 365);
        config.application.max_per_year = 2;
        config.application.events = vec![
            spec(10, 1, ApplicationMethod::Incorporated),
            spec(20, 1, ApplicationMethod::Incorporated),
            spec(30, 1, ApplicationMethod::Incorporated),
        ];
        let scenario = Scenario::uniform("s", 365, 0.0, 0.0);
        let events = ApplicationScheduler::new(&config).schedule(&scenario);
        let days: Vec<usize> = events.iter().map(|e| e.day).collect();
        assert_eq!(days, vec![9, 19]);
    }

    #[test]
    fn surface_application_splits_by_canopy() {
        let mut config = config(SchedulingMode::Calendar, 365);
        config.application.events = vec![spec(11, 1, ApplicationMethod::Surface)];
        let mut scenario = Scenario::uniform("s", 365, 0.0, 0.0);
        scenario.covmax = 0.8;
        scenario.plant_factor[10] = 0.5;
        let event = ApplicationScheduler::new(&config).schedule(&scenario)[0];
        assert_eq!(event.day, 10);
        assert_eq!(event.foliar_fraction, 0.4);
        assert_eq!(event.soil_fraction, 0.6);
        assert_eq!(event.soil_mass() + event.foliar_mass(), 1.0);
    }
}
