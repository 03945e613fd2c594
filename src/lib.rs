pub mod config;
pub mod dosing;
pub mod error;
pub mod model;
pub mod output;
pub mod patient;
pub mod protocol;
pub mod simulation;
pub mod solver;

pub use config::{ControlSettings, RunConfig, SolverMethod, SolverSettings};
pub use dosing::{DoseEvent, InfusionSchedule};
pub use error::{TciError, TciResult};
pub use model::{Ke0Estimate, PkParameters, PkPdSystem};
pub use patient::{AsaClass, Patient, Sex};
pub use protocol::{ControlledRun, PerformanceReport, ProtocolResult, RateAdjustment};
pub use simulation::{SimulationResult, Simulator, TimePoint};
pub use solver::{SolverStats, TerminationReason};

/// Derive individual PK parameters (including both ke0 branches) from
/// patient covariates.
pub fn derive_pk(patient: &Patient) -> TciResult<PkParameters> {
    model::derive_pk_parameters(patient)
}

/// Simulate a dose schedule over `duration` minutes.
pub fn simulate(
    params: &PkParameters,
    schedule: &InfusionSchedule,
    duration: f64,
    settings: &SolverSettings,
) -> TciResult<SimulationResult> {
    Simulator::new(*params).simulate(schedule, duration, settings)
}

/// Choose the constant continuous rate whose simulated Ce at `target_time`
/// is closest to `target_ce`.
pub fn optimize(
    params: &PkParameters,
    weight_kg: f64,
    bolus_mg: f64,
    target_ce: f64,
    target_time: f64,
    settings: &SolverSettings,
) -> TciResult<ProtocolResult> {
    protocol::optimizer::optimize(params, weight_kg, bolus_mg, target_ce, target_time, settings)
}

/// Run the maintenance simulation with the step-down controller active and
/// score the resulting trajectory.
pub fn run_controlled(
    params: &PkParameters,
    weight_kg: f64,
    bolus_mg: f64,
    initial_rate_mg_kg_h: f64,
    target_ce: f64,
    control: &ControlSettings,
    settings: &SolverSettings,
) -> TciResult<ControlledRun> {
    protocol::controller::run_controlled(
        params,
        weight_kg,
        bolus_mg,
        initial_rate_mg_kg_h,
        target_ce,
        control,
        settings,
    )
}
