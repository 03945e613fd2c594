use anyhow::Context;
use clap::Parser;
use log::info;
use std::path::PathBuf;

use tci_simulation::{
    derive_pk, optimize, output, run_controlled, AsaClass, Patient, RunConfig, Sex, SolverMethod,
};

#[derive(Parser)]
#[command(name = "tci_simulation")]
#[command(about = "Remimazolam target-controlled infusion simulation")]
struct Cli {
    /// Patient identifier
    #[arg(long, default_value = "patient")]
    id: String,

    /// Age (years)
    #[arg(long)]
    age: f64,

    /// Total body weight (kg)
    #[arg(long)]
    weight: f64,

    /// Height (cm)
    #[arg(long)]
    height: f64,

    /// Sex
    #[arg(long, value_enum)]
    sex: CliSex,

    /// ASA physical status III-IV (I-II when absent)
    #[arg(long)]
    asa34: bool,

    /// Induction bolus (mg)
    #[arg(short, long, default_value = "10.0")]
    bolus: f64,

    /// Target effect-site concentration (ug/mL)
    #[arg(short, long, default_value = "1.0")]
    target_ce: f64,

    /// Time at which the target should be reached (min)
    #[arg(long, default_value = "20.0")]
    target_time: f64,

    /// Solver for the optimization sweep
    #[arg(long, value_enum, default_value = "rk4")]
    solver: SolverMethod,

    /// Use the fine 0.01 min time step
    #[arg(long)]
    fine: bool,

    /// Optional JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    output: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliSex {
    Male,
    Female,
}

impl From<CliSex> for Sex {
    fn from(value: CliSex) -> Self {
        match value {
            CliSex::Male => Sex::Male,
            CliSex::Female => Sex::Female,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let mut config = match &cli.config {
        Some(path) => RunConfig::from_file(path)
            .with_context(|| format!("failed to load settings from {:?}", path))?,
        None => RunConfig::default(),
    };
    config.solver.method = cli.solver;
    if cli.fine {
        config.solver = config.solver.fine();
    }

    let asa = if cli.asa34 {
        AsaClass::Class3To4
    } else {
        AsaClass::Class1To2
    };
    let patient = Patient::new(
        cli.id.clone(),
        cli.age,
        cli.weight,
        cli.height,
        cli.sex.into(),
        asa,
        chrono::Local::now().naive_local(),
    )?;
    info!(
        "patient {}: {} y, {} kg, {} cm, {}, {}",
        patient.id, patient.age, patient.weight, patient.height, patient.sex, patient.asa_ps
    );

    let params = derive_pk(&patient)?;
    info!(
        "PK parameters: V1={:.2} L, CL={:.3} L/min, ke0={:.4} /min ({})",
        params.v1,
        params.cl,
        params.ke0,
        if params.ke0_estimate.fell_back() {
            "regression fallback"
        } else {
            "numerical"
        }
    );

    let protocol = optimize(
        &params,
        patient.weight,
        cli.bolus,
        cli.target_ce,
        cli.target_time,
        &config.solver,
    )?;
    info!(
        "selected rate {:.2} mg/kg/h (predicted Ce {:.3}, infeasible: {})",
        protocol.rate_mg_kg_h, protocol.predicted_ce, protocol.infeasible
    );

    let run = run_controlled(
        &params,
        patient.weight,
        cli.bolus,
        protocol.rate_mg_kg_h,
        cli.target_ce,
        &config.control,
        &config.solver,
    )?;
    info!(
        "controlled run finished: {} adjustments, composite score {:.1}",
        run.adjustments.len(),
        run.performance.composite_score
    );

    output::save_results(&cli.output, &patient, &protocol, &run)?;
    info!("results written to {:?}", cli.output);

    Ok(())
}
