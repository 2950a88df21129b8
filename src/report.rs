use std::fmt::Write;

use anyhow::Context;
use chrono::NaiveDate;
use tracing::info;

use crate::aggregate::{aggregate, GroupBy, PivotTable, SummaryTable};
use crate::config::AuditConfig;
use crate::crosstab::{
    care_setting_crosstab, outlier_destinations, outlier_locations, outlier_pairs, CrossTab,
    LocationCount, PairCount,
};
use crate::load;
use crate::models::CleanedRecord;
use crate::normalize::normalize;

/// Everything the workbook and charts are drawn from.
#[derive(Debug, Clone)]
pub struct AuditReport {
    pub reference_date: NaiveDate,
    pub total: SummaryTable,
    pub by_care_group: PivotTable,
    pub by_ward: PivotTable,
    pub by_local_authority: PivotTable,
    pub care_setting: CrossTab,
    pub outlier_locations: Vec<LocationCount>,
    pub outlier_destinations: Vec<LocationCount>,
    pub outlier_pairs: Vec<PairCount>,
}

/// Loads the audit export and both references, then cleans the audit rows.
pub fn load_records(config: &AuditConfig) -> anyhow::Result<Vec<CleanedRecord>> {
    let raw = load::load_audit(&config.audit_path)?;
    let wards = load::load_ward_reference(&config.ward_reference_path)?;
    let outliers = load::load_outlier_reference(&config.outlier_reference_path)?;
    Ok(normalize(&raw, &wards, &outliers))
}

pub fn latest_date(records: &[CleanedRecord]) -> Option<NaiveDate> {
    records.iter().filter_map(|record| record.date).max()
}

pub fn build_report(records: &[CleanedRecord], config: &AuditConfig) -> anyhow::Result<AuditReport> {
    let reference_date = config
        .reference_date
        .or_else(|| latest_date(records))
        .context("audit export has no completion dates to report on")?;
    info!(%reference_date, "building audit report");

    Ok(AuditReport {
        reference_date,
        total: aggregate(records, None),
        by_care_group: aggregate(records, Some(GroupBy::CareGroup)).pivot(),
        by_ward: aggregate(records, Some(GroupBy::Ward)).pivot(),
        by_local_authority: aggregate(records, Some(GroupBy::LocalAuthority)).pivot(),
        care_setting: care_setting_crosstab(records, reference_date),
        outlier_locations: outlier_locations(records, config.specialty_min_count),
        outlier_destinations: outlier_destinations(records, config.destination_min_count),
        outlier_pairs: outlier_pairs(records),
    })
}

/// Plain-text rendering of a summary table for the terminal.
pub fn render_summary(table: &SummaryTable) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Settings of Care Audit");
    match table.group_by {
        Some(group_by) => {
            let _ = writeln!(output, "Daily figures by {}", group_by.label());
        }
        None => {
            let _ = writeln!(output, "Daily figures across the hospital");
        }
    }
    let _ = writeln!(output);

    if table.rows.is_empty() {
        let _ = writeln!(output, "No dated audit records found.");
        return output;
    }

    for row in &table.rows {
        let metrics = &row.metrics;
        let label = match &row.group {
            Some(group) => format!("{} {}", row.date, group),
            None => row.date.to_string(),
        };
        let age = metrics
            .average_patient_age
            .map_or_else(|| "unknown".to_string(), |age| age.to_string());
        let stay = metrics
            .average_stay_days
            .map_or_else(|| "-".to_string(), |days| format!("{days:.2}"));
        let _ = writeln!(
            output,
            "- {label}: {} patients, average age {age}, average stay {stay} days, \
             {} over 21 days ({}), {} outliers ({}), {} medically fit ({})",
            metrics.number_of_patients,
            metrics.number_over_21_days,
            metrics.pct_over_21_days,
            metrics.number_outlier,
            metrics.pct_outliers,
            metrics.number_medfit_for_dis,
            metrics.pct_medfit_for_dis,
        );
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Age;

    fn record(day: u32, age: Age) -> CleanedRecord {
        let date = NaiveDate::from_ymd_opt(2024, 4, day).unwrap();
        CleanedRecord {
            ward: "Ward 4B".to_string(),
            care_group: Some("Medicine".to_string()),
            local_authority: None,
            patient: Some("AB".to_string()),
            completion_time: date.and_hms_opt(9, 0, 0),
            admission_date: None,
            length_of_stay: String::new(),
            speciality: Some("Cardiology".to_string()),
            outlier_team: None,
            outlier_destination: Some("Respiratory".to_string()),
            age: String::new(),
            right_setting: "No".to_string(),
            appropriate_setting: Some("Hospice".to_string()),
            date: Some(date),
            length_of_stay_days: Some(4),
            over_21_days: false,
            medically_fit_for_discharge: true,
            medical_outlier: true,
            cleaned_age: age,
        }
    }

    #[test]
    fn reference_date_defaults_to_latest() {
        let records = vec![record(21, Age::Known(50)), record(23, Age::Known(60))];
        let report = build_report(&records, &AuditConfig::default()).unwrap();
        assert_eq!(report.reference_date, NaiveDate::from_ymd_opt(2024, 4, 23).unwrap());
        assert_eq!(report.total.rows.len(), 2);
        assert_eq!(report.by_care_group.rows.len(), 1);
        assert!(report.by_local_authority.rows.is_empty());
        assert_eq!(report.outlier_pairs.len(), 1);
        assert_eq!(report.outlier_destinations[0].count, 2);
    }

    #[test]
    fn configured_reference_date_wins() {
        let config = AuditConfig {
            reference_date: NaiveDate::from_ymd_opt(2024, 4, 22),
            ..AuditConfig::default()
        };
        let report = build_report(&[record(21, Age::Unknown)], &config).unwrap();
        assert_eq!(report.reference_date, NaiveDate::from_ymd_opt(2024, 4, 22).unwrap());
    }

    #[test]
    fn undated_export_is_an_error() {
        let mut undated = record(21, Age::Unknown);
        undated.date = None;
        assert!(build_report(&[undated], &AuditConfig::default()).is_err());
    }

    #[test]
    fn summary_text_lists_each_day() {
        let table = aggregate(&[record(21, Age::Known(50)), record(21, Age::Unknown)], None);
        let text = render_summary(&table);
        assert!(text.contains("Daily figures across the hospital"));
        assert!(text.contains("- 2024-04-21: 2 patients, average age 50, average stay 4.00 days"));
        assert!(text.contains("2 medically fit (100.0%)"));
    }

    #[test]
    fn empty_summary_says_so() {
        let table = aggregate(&[], Some(GroupBy::Ward));
        assert!(render_summary(&table).contains("No dated audit records found."));
    }
}
