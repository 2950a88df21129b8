//! PNG bar charts and heatmaps for the audit report.

use std::path::{Path, PathBuf};

use anyhow::anyhow;
use chrono::NaiveDate;
use plotters::coord::ranged1d::SegmentValue;
use plotters::prelude::*;
use tracing::{debug, info};

use crate::aggregate::{PivotTable, SummaryTable};
use crate::config::AuditConfig;
use crate::crosstab::{CrossTab, LocationCount, OutlierMatrix, PairFilter};
use crate::models::Metric;
use crate::report::AuditReport;

/// Sequential teal palette, lightest first.
const TEAL: [RGBColor; 5] = [
    RGBColor(0xd1, 0xee, 0xea),
    RGBColor(0x96, 0xd0, 0xd1),
    RGBColor(0x68, 0xab, 0xb8),
    RGBColor(0x45, 0x82, 0x9b),
    RGBColor(0x2a, 0x56, 0x74),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// Bars for each category, one bar per series.
#[derive(Debug, Clone, PartialEq)]
pub struct BarChart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub categories: Vec<String>,
    pub series: Vec<Series>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Heatmap {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub matrix: OutlierMatrix,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Chart {
    Bar(BarChart),
    Heatmap(Heatmap),
}

impl Chart {
    fn is_empty(&self) -> bool {
        match self {
            Chart::Bar(chart) => chart.categories.is_empty() || chart.series.is_empty(),
            Chart::Heatmap(chart) => chart.matrix.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChart {
    pub file_name: String,
    pub chart: Chart,
}

fn planned(name: &str, chart: Chart) -> PlannedChart {
    PlannedChart {
        file_name: format!("{name}.png"),
        chart,
    }
}

fn date_label(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// One category per audit date, one series per metric.
pub fn daily_chart(table: &SummaryTable, metrics: &[Metric], title: &str, y_label: &str) -> BarChart {
    BarChart {
        title: title.to_string(),
        x_label: "Date".to_string(),
        y_label: y_label.to_string(),
        categories: table.rows.iter().map(|row| date_label(row.date)).collect(),
        series: metrics
            .iter()
            .map(|metric| Series {
                name: metric.header(),
                values: table
                    .rows
                    .iter()
                    .map(|row| row.metrics.value(*metric).as_f64())
                    .collect(),
            })
            .collect(),
    }
}

/// One category per group key, ordered by the reference date; one series per date.
pub fn grouped_chart(
    table: &PivotTable,
    metric: Metric,
    reference_date: NaiveDate,
    title: &str,
    y_label: &str,
) -> BarChart {
    let sorted = table.sorted_by(metric, reference_date);
    BarChart {
        title: title.to_string(),
        x_label: table.row_label().to_string(),
        y_label: y_label.to_string(),
        categories: sorted.rows.iter().map(|row| row.key.clone()).collect(),
        series: sorted
            .dates
            .iter()
            .map(|date| Series {
                name: date_label(*date),
                values: sorted.rows.iter().map(|row| row.value(metric, *date)).collect(),
            })
            .collect(),
    }
}

pub fn crosstab_chart(table: &CrossTab, title: &str) -> BarChart {
    BarChart {
        title: title.to_string(),
        x_label: "Setting".to_string(),
        y_label: "Number of patients".to_string(),
        categories: table.rows.iter().map(|row| row.label.clone()).collect(),
        series: table
            .dates
            .iter()
            .map(|date| Series {
                name: date_label(*date),
                values: table
                    .rows
                    .iter()
                    .map(|row| row.counts.get(date).map(|count| *count as f64))
                    .collect(),
            })
            .collect(),
    }
}

pub fn location_chart(counts: &[LocationCount], title: &str, x_label: &str) -> BarChart {
    BarChart {
        title: title.to_string(),
        x_label: x_label.to_string(),
        y_label: "Number of Patients".to_string(),
        categories: counts.iter().map(|count| count.label.clone()).collect(),
        series: vec![Series {
            name: "patients".to_string(),
            values: counts.iter().map(|count| Some(count.count as f64)).collect(),
        }],
    }
}

fn outlier_heatmap(report: &AuditReport, filter: PairFilter, title: &str) -> Heatmap {
    Heatmap {
        title: title.to_string(),
        x_label: "Where outlier patient should be".to_string(),
        y_label: "Where outlier patient is".to_string(),
        matrix: OutlierMatrix::from_pairs(&report.outlier_pairs, filter),
    }
}

/// The fixed set of charts produced for every audit run.
pub fn chart_plan(report: &AuditReport, config: &AuditConfig) -> Vec<PlannedChart> {
    let date = report.reference_date;
    vec![
        planned(
            "Number of patients by day",
            Chart::Bar(daily_chart(
                &report.total,
                &[Metric::NumberOfPatients],
                "Number of patients per day",
                "Number of patients",
            )),
        ),
        planned(
            "Maximum stay by day",
            Chart::Bar(daily_chart(
                &report.total,
                &[Metric::MaximumStayDays],
                "Maximum length of stay per day",
                "Days since admission",
            )),
        ),
        planned(
            "Average stay by day",
            Chart::Bar(daily_chart(
                &report.total,
                &[Metric::AverageStayDays],
                "Average length of stay per day",
                "Average days since admission",
            )),
        ),
        planned(
            "Summary by day",
            Chart::Bar(daily_chart(
                &report.total,
                &[
                    Metric::NumberMedfitForDis,
                    Metric::NumberOver21Days,
                    Metric::NumberOutlier,
                ],
                "Summary by day",
                "Number of patients",
            )),
        ),
        planned(
            "Number of Patients by care group",
            Chart::Bar(grouped_chart(
                &report.by_care_group,
                Metric::NumberOfPatients,
                date,
                "Number of Patients by Care Group",
                "Number of patients",
            )),
        ),
        planned(
            "Average length of stay by care group",
            Chart::Bar(grouped_chart(
                &report.by_care_group,
                Metric::AverageStayDays,
                date,
                "Average length of stay by care group",
                "Average number of days",
            )),
        ),
        planned(
            "% medfit for dis by care group",
            Chart::Bar(grouped_chart(
                &report.by_care_group,
                Metric::PctMedfitForDis,
                date,
                "% of patients medically fit for discharge by care group",
                "% of patients",
            )),
        ),
        planned(
            "% medfit for dis by local authority",
            Chart::Bar(grouped_chart(
                &report.by_local_authority,
                Metric::PctMedfitForDis,
                date,
                "% of patients medically fit for discharge by local authority",
                "% of patients",
            )),
        ),
        planned(
            "Appropriate care setting by day",
            Chart::Bar(crosstab_chart(
                &report.care_setting,
                "Where is the appropriate care setting?",
            )),
        ),
        planned(
            "Where outlier patients are",
            Chart::Bar(location_chart(
                &report.outlier_locations,
                "Where outlier patients are",
                "Specialty",
            )),
        ),
        planned(
            "Where outlier should be",
            Chart::Bar(location_chart(
                &report.outlier_destinations,
                "Where outlier patients should be",
                "Location",
            )),
        ),
        planned(
            "Outlier patient lookup table",
            Chart::Heatmap(outlier_heatmap(
                report,
                PairFilter::All,
                "Outlier Patient Lookup Table",
            )),
        ),
        planned(
            "Outlier patient lookup table gt 5",
            Chart::Heatmap(outlier_heatmap(
                report,
                PairFilter::AtLeast(config.significant_pair_count),
                &format!(
                    "Outlier Patient Lookup Table where {} or More Patients",
                    config.significant_pair_count
                ),
            )),
        ),
        planned(
            "Outlier patient lookup table not same",
            Chart::Heatmap(outlier_heatmap(
                report,
                PairFilter::Mismatched,
                "Outlier Patient Lookup Table where Not the Same Location",
            )),
        ),
    ]
}

/// Draws every chart with data into `dir`; returns the files written.
pub fn render_charts(
    plan: &[PlannedChart],
    dir: &Path,
    size: (u32, u32),
) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    for entry in plan {
        if entry.chart.is_empty() {
            debug!(chart = %entry.file_name, "no data, chart skipped");
            continue;
        }
        let path = dir.join(&entry.file_name);
        match &entry.chart {
            Chart::Bar(chart) => draw_bar_chart(chart, &path, size)?,
            Chart::Heatmap(chart) => draw_heatmap(chart, &path, size)?,
        }
        written.push(path);
    }

    info!(charts = written.len(), dir = %dir.display(), "charts rendered");
    Ok(written)
}

fn plot_error<E: std::fmt::Display>(error: E) -> anyhow::Error {
    anyhow!("failed to draw chart: {error}")
}

fn segment_label(value: &SegmentValue<i32>, labels: &[String]) -> String {
    match value {
        SegmentValue::CenterOf(index) => usize::try_from(*index)
            .ok()
            .and_then(|index| labels.get(index))
            .cloned()
            .unwrap_or_default(),
        _ => String::new(),
    }
}

fn draw_bar_chart(chart: &BarChart, path: &Path, size: (u32, u32)) -> anyhow::Result<()> {
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    // Each category takes one slot per series plus a spacer slot.
    let per_category = chart.series.len();
    let width = per_category + 1;
    let slots = (chart.categories.len() * width) as i32;
    let y_max = chart
        .series
        .iter()
        .flat_map(|series| series.values.iter().flatten())
        .fold(0.0f64, |max, value| max.max(*value));
    let y_top = if y_max > 0.0 { y_max * 1.1 } else { 1.0 };

    let slot_labels: Vec<String> = (0..slots as usize)
        .map(|slot| {
            if slot % width == (per_category - 1) / 2 {
                chart.categories[slot / width].clone()
            } else {
                String::new()
            }
        })
        .collect();

    let mut context = ChartBuilder::on(&root)
        .caption(&chart.title, ("sans-serif", 28).into_font())
        .margin(20)
        .x_label_area_size(80)
        .y_label_area_size(70)
        .build_cartesian_2d((0..slots).into_segmented(), 0f64..y_top)
        .map_err(plot_error)?;

    context
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(slots as usize)
        .x_label_formatter(&|value| segment_label(value, &slot_labels))
        .x_desc(chart.x_label.as_str())
        .y_desc(chart.y_label.as_str())
        .draw()
        .map_err(plot_error)?;

    for (index, series) in chart.series.iter().enumerate() {
        let color = TEAL[(index + TEAL.len() - per_category.min(TEAL.len())) % TEAL.len()];
        let bars = series.values.iter().enumerate().filter_map(|(category, value)| {
            let value = (*value)?;
            let slot = (category * width + index) as i32;
            Some(Rectangle::new(
                [
                    (SegmentValue::Exact(slot), 0.0),
                    (SegmentValue::Exact(slot + 1), value),
                ],
                color.filled(),
            ))
        });
        context
            .draw_series(bars)
            .map_err(plot_error)?
            .label(series.name.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 12, y + 5)], color.filled()));
    }

    if per_category > 1 {
        context
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(plot_error)?;
    }

    root.present().map_err(plot_error)?;
    Ok(())
}

/// Green for the smallest counts through yellow to red for the largest.
fn heat_color(fraction: f64) -> RGBColor {
    let fraction = fraction.clamp(0.0, 1.0);
    let (from, to, t) = if fraction < 0.5 {
        ((26.0, 152.0, 80.0), (255.0, 255.0, 191.0), fraction * 2.0)
    } else {
        ((255.0, 255.0, 191.0), (215.0, 48.0, 39.0), (fraction - 0.5) * 2.0)
    };
    let mix = |a: f64, b: f64| (a + (b - a) * t).round() as u8;
    RGBColor(mix(from.0, to.0), mix(from.1, to.1), mix(from.2, to.2))
}

fn draw_heatmap(chart: &Heatmap, path: &Path, size: (u32, u32)) -> anyhow::Result<()> {
    let matrix = &chart.matrix;
    let columns = matrix.destinations.len() as i32;
    let rows = matrix.locations.len() as i32;
    let max = matrix.max().max(1) as f64;
    // First location is drawn at the top.
    let row_labels: Vec<String> = matrix.locations.iter().rev().cloned().collect();

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let mut context = ChartBuilder::on(&root)
        .caption(&chart.title, ("sans-serif", 28).into_font())
        .margin(20)
        .x_label_area_size(120)
        .y_label_area_size(220)
        .build_cartesian_2d((0..columns).into_segmented(), (0..rows).into_segmented())
        .map_err(plot_error)?;

    context
        .configure_mesh()
        .disable_mesh()
        .x_labels(columns as usize)
        .y_labels(rows as usize)
        .x_label_formatter(&|value| segment_label(value, &matrix.destinations))
        .y_label_formatter(&|value| segment_label(value, &row_labels))
        .x_desc(chart.x_label.as_str())
        .y_desc(chart.y_label.as_str())
        .draw()
        .map_err(plot_error)?;

    let mut cells = Vec::new();
    for row in 0..matrix.locations.len() {
        for column in 0..matrix.destinations.len() {
            if let Some(count) = matrix.get(row, column) {
                cells.push((column as i32, rows - 1 - row as i32, count));
            }
        }
    }

    context
        .draw_series(cells.iter().map(|(x, y, count)| {
            Rectangle::new(
                [
                    (SegmentValue::Exact(*x), SegmentValue::Exact(*y)),
                    (SegmentValue::Exact(x + 1), SegmentValue::Exact(y + 1)),
                ],
                heat_color(*count as f64 / max).filled(),
            )
        }))
        .map_err(plot_error)?;
    context
        .draw_series(cells.iter().map(|(x, y, _)| {
            Rectangle::new(
                [
                    (SegmentValue::Exact(*x), SegmentValue::Exact(*y)),
                    (SegmentValue::Exact(x + 1), SegmentValue::Exact(y + 1)),
                ],
                BLACK.stroke_width(1),
            )
        }))
        .map_err(plot_error)?;
    context
        .draw_series(cells.iter().map(|(x, y, count)| {
            Text::new(
                count.to_string(),
                (SegmentValue::CenterOf(*x), SegmentValue::CenterOf(*y)),
                ("sans-serif", 18).into_font(),
            )
        }))
        .map_err(plot_error)?;

    root.present().map_err(plot_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, GroupBy};
    use crate::models::{Age, CleanedRecord};
    use crate::report::build_report;

    fn record(day: u32, care_group: &str, fit: bool) -> CleanedRecord {
        let date = NaiveDate::from_ymd_opt(2024, 4, day).unwrap();
        CleanedRecord {
            ward: "Ward 4B".to_string(),
            care_group: Some(care_group.to_string()),
            local_authority: Some("Plymouth".to_string()),
            patient: Some("AB".to_string()),
            completion_time: date.and_hms_opt(9, 0, 0),
            admission_date: None,
            length_of_stay: String::new(),
            speciality: Some("Cardiology".to_string()),
            outlier_team: None,
            outlier_destination: Some("Cardiology".to_string()),
            age: String::new(),
            right_setting: "Yes".to_string(),
            appropriate_setting: None,
            date: Some(date),
            length_of_stay_days: Some(2),
            over_21_days: false,
            medically_fit_for_discharge: fit,
            medical_outlier: false,
            cleaned_age: Age::Known(60),
        }
    }

    #[test]
    fn grouped_chart_orders_by_reference_date() {
        let records = vec![
            record(21, "Surgery", true),
            record(21, "Surgery", true),
            record(22, "Medicine", true),
            record(22, "Medicine", false),
            record(22, "Surgery", false),
        ];
        let pivot = aggregate(&records, Some(GroupBy::CareGroup)).pivot();
        let date = NaiveDate::from_ymd_opt(2024, 4, 22).unwrap();
        let chart = grouped_chart(&pivot, Metric::PctMedfitForDis, date, "t", "%");

        assert_eq!(chart.categories, vec!["Medicine", "Surgery"]);
        assert_eq!(chart.series.len(), 2);
        assert_eq!(chart.series[0].name, "2024-04-21");
        assert_eq!(chart.series[0].values, vec![None, Some(100.0)]);
        assert_eq!(chart.series[1].values, vec![Some(50.0), Some(0.0)]);
    }

    #[test]
    fn daily_chart_has_one_series_per_metric() {
        let table = aggregate(&[record(21, "Surgery", true)], None);
        let chart = daily_chart(
            &table,
            &[Metric::NumberMedfitForDis, Metric::NumberOutlier],
            "Summary by day",
            "Number of patients",
        );
        assert_eq!(chart.categories, vec!["2024-04-21"]);
        assert_eq!(chart.series[0].name, "number medfit for dis");
        assert_eq!(chart.series[0].values, vec![Some(1.0)]);
        assert_eq!(chart.series[1].values, vec![Some(0.0)]);
    }

    #[test]
    fn plan_names_every_chart_file() {
        let records = vec![record(21, "Surgery", true)];
        let config = AuditConfig::default();
        let report = build_report(&records, &config).unwrap();
        let plan = chart_plan(&report, &config);

        assert_eq!(plan.len(), 14);
        assert_eq!(plan[0].file_name, "Number of patients by day.png");
        assert_eq!(plan[13].file_name, "Outlier patient lookup table not same.png");

        // the only pair matches itself, so the mismatch heatmap has no data
        assert!(!plan[11].chart.is_empty());
        assert!(plan[13].chart.is_empty());
    }

    #[test]
    fn heat_colors_run_green_to_red() {
        assert_eq!(heat_color(0.0), RGBColor(26, 152, 80));
        assert_eq!(heat_color(0.5), RGBColor(255, 255, 191));
        assert_eq!(heat_color(1.0), RGBColor(215, 48, 39));
    }
}
