use chrono::Duration;
use log::info;
use std::fs::File;
use std::io;
use std::path::Path;

use crate::error::TciResult;
use crate::patient::Patient;
use crate::protocol::{ControlledRun, ProtocolResult};
use crate::simulation::SimulationResult;

/// Write a simulated trajectory in the exchange format: an optional patient
/// header line, a fixed column header, then one row per time point with
/// concentrations at three decimals. With a patient attached the time
/// column carries wall-clock HH:MM stamps from the anesthesia start;
/// without one it carries minutes.
pub fn write_simulation_csv<W: io::Write>(
    writer: W,
    result: &SimulationResult,
    patient: Option<&Patient>,
) -> TciResult<()> {
    // The patient header has more fields than the data rows.
    let mut csv_writer = csv::WriterBuilder::new().flexible(true).from_writer(writer);

    if let Some(patient) = patient {
        csv_writer.write_record(&[
            format!("Patient ID:{}", patient.id),
            format!("Age:{}", patient.age),
            format!("Weight:{}kg", patient.weight),
            format!("Height:{}cm", patient.height),
            format!("Sex:{}", patient.sex),
            format!("ASA-PS:{}", patient.asa_ps),
            format!("Start Time:{}", patient.start_time.format("%H:%M")),
        ])?;
    }

    csv_writer.write_record([
        "Time",
        "Predicted Plasma Concentration(µg/mL)",
        "Predicted Effect-site Concentration(µg/mL)",
    ])?;

    for point in &result.points {
        let time_label = match patient {
            Some(patient) => {
                let clock = patient.start_time + Duration::seconds((point.t * 60.0).round() as i64);
                clock.format("%H:%M").to_string()
            }
            None => format!("{:.2}", point.t),
        };
        csv_writer.write_record(&[
            time_label,
            format!("{:.3}", point.cp),
            format!("{:.3}", point.ce),
        ])?;
    }

    csv_writer.flush()?;
    Ok(())
}

fn write_adjustments_csv<W: io::Write>(writer: W, run: &ControlledRun) -> TciResult<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record([
        "INDEX",
        "TIME_MIN",
        "OLD_RATE",
        "NEW_RATE",
        "CE",
        "REDUCTION_PERCENT",
        "CE_OVER_TARGET",
    ])?;
    for adjustment in &run.adjustments {
        csv_writer.write_record(&[
            adjustment.index.to_string(),
            format!("{:.1}", adjustment.time),
            format!("{:.3}", adjustment.old_rate_mg_kg_h),
            format!("{:.3}", adjustment.new_rate_mg_kg_h),
            format!("{:.3}", adjustment.ce),
            format!("{:.1}", adjustment.reduction_percent),
            format!("{:.3}", adjustment.ce_over_target),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Save a full protocol run into an output directory: trajectory CSV,
/// adjustment events CSV, and JSON summaries of the optimization and the
/// performance evaluation.
pub fn save_results<P: AsRef<Path>>(
    output_dir: P,
    patient: &Patient,
    protocol: &ProtocolResult,
    run: &ControlledRun,
) -> TciResult<()> {
    let output_path = output_dir.as_ref();
    std::fs::create_dir_all(output_path)?;

    write_simulation_csv(
        File::create(output_path.join("trajectory.csv"))?,
        &run.trajectory,
        Some(patient),
    )?;
    write_adjustments_csv(File::create(output_path.join("adjustments.csv"))?, run)?;

    serde_json::to_writer_pretty(
        File::create(output_path.join("protocol.json"))?,
        protocol,
    )?;
    serde_json::to_writer_pretty(
        File::create(output_path.join("performance.json"))?,
        &run.performance,
    )?;

    info!("results saved to {:?}", output_path);
    Ok(())
}
