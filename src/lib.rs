pub mod aggregate;
pub mod applications;
pub mod calculator;
pub mod config;
pub mod error;
pub mod files;
pub mod logging;
pub mod qc;
pub mod scenario;
pub mod soil_mass;
pub mod store;
pub mod transport;
pub mod waterbody;

pub use calculator::{RunSummary, run, simulate_scenario};
pub use config::RunConfig;
pub use error::{SamError, SamResult};
pub use scenario::Scenario;
pub use waterbody::{DailyOutput, FlowRecord};
