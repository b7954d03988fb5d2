use textplots::{Chart, Plot, Shape};

use crate::error::SmuError;
use crate::types::{Column, MeasurementTable};

/// Determine the best scale and unit prefix for a given maximum magnitude
fn determine_scale(max_value: f64) -> (f64, &'static str) {
    if max_value >= 1.0 {
        (1.0, "")
    } else if max_value >= 1e-3 {
        (1e3, "m")
    } else if max_value >= 1e-6 {
        (1e6, "μ")
    } else if max_value >= 1e-9 {
        (1e9, "n")
    } else {
        (1e12, "p")
    }
}

/// Points of a transfer curve, channel current scaled to a readable unit
fn transfer_frame(table: &MeasurementTable) -> Result<(Vec<(f32, f32)>, &'static str), SmuError> {
    let gate = table
        .column(Column::GateVoltage)
        .ok_or_else(|| SmuError::Protocol("table has no gate voltage column".to_string()))?;
    let current = table
        .column(Column::ChannelCurrent)
        .ok_or_else(|| SmuError::Protocol("table has no channel current column".to_string()))?;
    if gate.is_empty() {
        return Err(SmuError::Protocol("cannot plot an empty table".to_string()));
    }

    let max_abs = current.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let (scale, unit) = determine_scale(max_abs);

    let frame = gate
        .iter()
        .zip(current)
        .map(|(&vg, &id)| (vg as f32, (id * scale) as f32))
        .collect();
    Ok((frame, unit))
}

/// Print channel current against gate voltage to the terminal
///
/// # Examples
/// ```
/// use rusty_smu::plotting::plot_transfer;
/// use rusty_smu::MeasurementTable;
///
/// let mut table = MeasurementTable::realtime();
/// table.push_row(&[-1.0, -2e-6]).unwrap();
/// table.push_row(&[0.0, -1e-7]).unwrap();
/// table.push_row(&[1.0, -1e-10]).unwrap();
/// plot_transfer(&table, Some("blank-20-1")).unwrap();
/// ```
pub fn plot_transfer(table: &MeasurementTable, title: Option<&str>) -> Result<(), SmuError> {
    let (frame, unit) = transfer_frame(table)?;

    let (xmin, xmax) = frame
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &(x, _)| {
            (lo.min(x), hi.max(x))
        });
    // textplots needs a non-empty x range
    let xmax = if xmax > xmin { xmax } else { xmin + 1.0 };

    println!("{}", title.unwrap_or("Transfer Curve"));
    println!("X-axis: Gate Voltage [V] | Y-axis: Channel Current [{unit}A]");
    println!("{}", "─".repeat(100));

    Chart::new(200, 60, xmin, xmax)
        .lineplot(&Shape::Lines(&frame))
        .nice();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MeasurementRecord;

    #[test]
    fn test_determine_scale() {
        assert_eq!(determine_scale(5.0), (1.0, ""));
        assert_eq!(determine_scale(0.005), (1e3, "m"));
        assert_eq!(determine_scale(5e-6), (1e6, "μ"));
        assert_eq!(determine_scale(5e-9), (1e9, "n"));
        assert_eq!(determine_scale(5e-12), (1e12, "p"));
    }

    #[test]
    fn test_frame_scales_current() {
        let mut table = MeasurementTable::realtime();
        table.push_row(&[-1.0, -2e-6]).unwrap();
        table.push_row(&[1.0, 1e-6]).unwrap();

        let (frame, unit) = transfer_frame(&table).unwrap();
        assert_eq!(unit, "μ");
        assert_eq!(frame, vec![(-1.0, -2.0), (1.0, 1.0)]);
    }

    #[test]
    fn test_full_table_plots() {
        let table = MeasurementTable::from_records(&[
            MeasurementRecord::new(0.0, -0.5, 1e-9, 0.0),
            MeasurementRecord::new(0.5, -0.5, 3e-9, 0.0),
        ]);
        assert!(plot_transfer(&table, None).is_ok());
    }

    #[test]
    fn test_empty_table_rejected() {
        assert!(plot_transfer(&MeasurementTable::realtime(), None).is_err());
    }
}
