//! Workbook and CSV output.

use std::path::Path;

use anyhow::Context;
use rust_xlsxwriter::{Format, FormatAlign, Workbook, Worksheet, XlsxError};
use tracing::info;

use crate::aggregate::{PivotTable, SummaryTable};
use crate::crosstab::CrossTab;
use crate::models::{CleanedRecord, Metric, MetricValue};
use crate::report::AuditReport;

pub const TOTAL_SHEET: &str = "Total";
pub const CARE_GROUP_SHEET: &str = "Care Group";
pub const WARD_SHEET: &str = "Ward";
pub const LOCAL_AUTHORITY_SHEET: &str = "Local Authority";
pub const CARE_SETTING_SHEET: &str = "Care Setting";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Builds every sheet in memory and saves once, so a failure leaves no
/// partial workbook behind.
pub fn write_workbook(path: &Path, report: &AuditReport) -> anyhow::Result<()> {
    let header = Format::new().set_bold().set_align(FormatAlign::Center);
    let mut workbook = Workbook::new();

    write_summary(workbook.add_worksheet().set_name(TOTAL_SHEET)?, &report.total, &header)?;
    write_pivot(
        workbook.add_worksheet().set_name(CARE_GROUP_SHEET)?,
        &report.by_care_group,
        &header,
    )?;
    write_pivot(workbook.add_worksheet().set_name(WARD_SHEET)?, &report.by_ward, &header)?;
    write_pivot(
        workbook.add_worksheet().set_name(LOCAL_AUTHORITY_SHEET)?,
        &report.by_local_authority,
        &header,
    )?;
    write_crosstab(
        workbook.add_worksheet().set_name(CARE_SETTING_SHEET)?,
        &report.care_setting,
        &header,
    )?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    workbook
        .save(path)
        .with_context(|| format!("failed to write workbook {}", path.display()))?;
    info!(path = %path.display(), "workbook written");
    Ok(())
}

fn write_value(
    sheet: &mut Worksheet,
    row: u32,
    column: u16,
    value: MetricValue,
) -> Result<(), XlsxError> {
    match value {
        MetricValue::Percent(pct) => {
            sheet.write_string(row, column, pct.to_string())?;
        }
        other => {
            if let Some(number) = other.as_f64() {
                sheet.write_number(row, column, number)?;
            }
        }
    }
    Ok(())
}

fn write_summary(sheet: &mut Worksheet, table: &SummaryTable, header: &Format) -> Result<(), XlsxError> {
    let mut column = 0u16;
    sheet.write_string_with_format(0, column, "Date", header)?;
    if let Some(group_by) = table.group_by {
        column += 1;
        sheet.write_string_with_format(0, column, group_by.label(), header)?;
    }
    let first_metric = column + 1;
    for (offset, metric) in Metric::ALL.iter().enumerate() {
        sheet.write_string_with_format(0, first_metric + offset as u16, metric.header(), header)?;
    }

    for (index, row) in table.rows.iter().enumerate() {
        let line = index as u32 + 1;
        sheet.write_string(line, 0, row.date.format(DATE_FORMAT).to_string())?;
        if let Some(group) = &row.group {
            sheet.write_string(line, 1, group)?;
        }
        for (offset, metric) in Metric::ALL.iter().enumerate() {
            write_value(sheet, line, first_metric + offset as u16, row.metrics.value(*metric))?;
        }
    }

    sheet.set_column_width(0, 12)?;
    Ok(())
}

/// Two header rows: metric names spanning their dates, then the dates.
fn write_pivot(sheet: &mut Worksheet, table: &PivotTable, header: &Format) -> Result<(), XlsxError> {
    let width = table.dates.len() as u16;
    sheet.write_string_with_format(0, 0, table.row_label(), header)?;
    sheet.write_string_with_format(1, 0, "Date", header)?;

    for (block, metric) in Metric::ALL.iter().enumerate() {
        let first = 1 + block as u16 * width;
        match width {
            0 => {}
            1 => {
                sheet.write_string_with_format(0, first, metric.header(), header)?;
            }
            _ => {
                sheet.merge_range(0, first, 0, first + width - 1, &metric.header(), header)?;
            }
        }
        for (offset, date) in table.dates.iter().enumerate() {
            sheet.write_string_with_format(
                1,
                first + offset as u16,
                date.format(DATE_FORMAT).to_string(),
                header,
            )?;
        }
    }

    for (index, row) in table.rows.iter().enumerate() {
        let line = index as u32 + 2;
        sheet.write_string(line, 0, &row.key)?;
        for (block, metric) in Metric::ALL.iter().enumerate() {
            let first = 1 + block as u16 * width;
            for (offset, date) in table.dates.iter().enumerate() {
                if let Some(metrics) = row.cells.get(date) {
                    write_value(sheet, line, first + offset as u16, metrics.value(*metric))?;
                }
            }
        }
    }

    sheet.set_column_width(0, 24)?;
    Ok(())
}

fn write_crosstab(sheet: &mut Worksheet, table: &CrossTab, header: &Format) -> Result<(), XlsxError> {
    sheet.write_string_with_format(0, 0, &table.row_label, header)?;
    for (offset, date) in table.dates.iter().enumerate() {
        sheet.write_string_with_format(0, 1 + offset as u16, date.format(DATE_FORMAT).to_string(), header)?;
    }

    for (index, row) in table.rows.iter().enumerate() {
        let line = index as u32 + 1;
        sheet.write_string(line, 0, &row.label)?;
        for (offset, date) in table.dates.iter().enumerate() {
            if let Some(count) = row.counts.get(date) {
                sheet.write_number(line, 1 + offset as u16, *count as f64)?;
            }
        }
    }

    sheet.set_column_width(0, 40)?;
    Ok(())
}

pub fn write_cleaned_csv(path: &Path, records: &[CleanedRecord]) -> anyhow::Result<usize> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::{open_workbook_auto, Data, Reader};

    use chrono::NaiveDate;

    use crate::config::AuditConfig;
    use crate::models::{Age, RawRecord, WardInfo};
    use crate::normalize::{normalize, OutlierReference, WardReference};
    use crate::report::build_report;

    fn sample_records() -> Vec<CleanedRecord> {
        let wards = WardReference::from_rows(vec![(
            "Ward 4B",
            WardInfo {
                care_group: Some("Medicine".to_string()),
                local_authority: Some("Plymouth".to_string()),
            },
        )]);
        let rows = [
            (22, "70 years", "21+ Days"),
            (22, "5 months", "0-6 Days"),
            (23, "40", "0-6 Days"),
        ];
        let raw: Vec<RawRecord> = rows
            .into_iter()
            .map(|(day, age, stay)| RawRecord {
                ward: "Ward 4B".to_string(),
                patient: Some("AB".to_string()),
                completion_time: NaiveDate::from_ymd_opt(2024, 4, day)
                    .and_then(|date| date.and_hms_opt(10, 0, 0)),
                admission_date: NaiveDate::from_ymd_opt(2024, 4, 1)
                    .and_then(|date| date.and_hms_opt(0, 0, 0)),
                length_of_stay: stay.to_string(),
                medically_fit: "Yes".to_string(),
                outlier: "No".to_string(),
                age: age.to_string(),
                right_setting: "No".to_string(),
                appropriate_setting: Some("Home with support".to_string()),
                ..RawRecord::default()
            })
            .collect();
        normalize(&raw, &wards, &OutlierReference::default())
    }

    #[test]
    fn workbook_has_every_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.xlsx");
        let report = build_report(&sample_records(), &AuditConfig::default()).unwrap();

        write_workbook(&path, &report).unwrap();

        let mut workbook = open_workbook_auto(&path).unwrap();
        assert_eq!(
            workbook.sheet_names(),
            vec![
                TOTAL_SHEET,
                CARE_GROUP_SHEET,
                WARD_SHEET,
                LOCAL_AUTHORITY_SHEET,
                CARE_SETTING_SHEET
            ]
        );

        let total = workbook.worksheet_range(TOTAL_SHEET).unwrap();
        assert_eq!(
            total.get_value((0, 1)),
            Some(&Data::String("number of patients".to_string()))
        );
        assert_eq!(total.get_value((1, 1)), Some(&Data::Float(2.0)));
        assert_eq!(total.get_value((1, 2)), Some(&Data::Float(35.0)));
        assert_eq!(
            total.get_value((1, 8)),
            Some(&Data::String("50.0%".to_string()))
        );

        let care_group = workbook.worksheet_range(CARE_GROUP_SHEET).unwrap();
        assert_eq!(
            care_group.get_value((1, 2)),
            Some(&Data::String("2024-04-23".to_string()))
        );
        assert_eq!(
            care_group.get_value((2, 0)),
            Some(&Data::String("Medicine".to_string()))
        );
    }

    #[test]
    fn cleaned_records_export_as_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cleaned.csv");
        let mut records = sample_records();
        records[2].cleaned_age = Age::Unknown;

        assert_eq!(write_cleaned_csv(&path, &records).unwrap(), 3);

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("ward,care_group,local_authority"));
        assert!(header.ends_with("cleaned_age"));
        assert!(text.lines().nth(1).unwrap().ends_with(",70"));
        assert!(text.lines().nth(3).unwrap().ends_with(",unknown"));
    }
}
