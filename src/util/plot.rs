use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use plotters::prelude::*;

/// Render the power series of the filtered working set as an SVG line
/// chart. The y axis is floored at zero because power never goes negative.
pub fn plot_power_svg(
    label: &str,
    entries: Vec<(DateTime<Utc>, f64)>,
) -> anyhow::Result<String> {
    let first_entry = entries.first().ok_or(anyhow!("No readings to plot"))?;
    let last_entry = entries.last().ok_or(anyhow!("No readings to plot"))?;

    let max_y = entries.iter().map(|e| e.1).fold(0.0_f64, f64::max);
    let max_y = if max_y > 0.0 { max_y * 1.05 } else { 1.0 };

    // A single reading would collapse the x range, which plotters rejects.
    let x_start = first_entry.0;
    let x_end = if last_entry.0 > x_start {
        last_entry.0
    } else {
        x_start + Duration::minutes(1)
    };

    let mut buf = String::new();

    {
        let root = SVGBackend::with_string(&mut buf, (480, 240)).into_drawing_area();
        let mut chart = ChartBuilder::on(&root)
            .margin(5)
            .x_label_area_size(20)
            .y_label_area_size(40)
            .build_cartesian_2d(x_start..x_end, 0.0..max_y)?;

        chart
            .configure_mesh()
            .y_labels(5)
            .x_labels(4)
            .disable_mesh()
            .draw()?;

        chart
            .draw_series(LineSeries::new(entries, &RED))?
            .label(label);

        root.present()?;
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn renders_svg_for_a_power_series() {
        let entries = vec![
            (Utc.timestamp_opt(1_700_000_000, 0).unwrap(), 209.0),
            (Utc.timestamp_opt(1_700_000_060, 0).unwrap(), 1500.0),
            (Utc.timestamp_opt(1_700_000_120, 0).unwrap(), 950.5),
        ];

        let svg = plot_power_svg("Power (W)", entries).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn refuses_an_empty_series() {
        assert!(plot_power_svg("Power (W)", Vec::new()).is_err());
    }

    #[test]
    fn tolerates_a_single_reading() {
        let entries = vec![(Utc.timestamp_opt(1_700_000_000, 0).unwrap(), 42.0)];
        assert!(plot_power_svg("Power (W)", entries).is_ok());
    }
}
