use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use clap::ValueEnum;

use crate::models::{round_to, CleanedRecord, Metric, Percentage, SummaryMetrics, SummaryRow};

/// Row label used when an ungrouped table is pivoted.
pub const TOTAL_KEY: &str = "Total";

/// Secondary dimension a summary can be split by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum GroupBy {
    Ward,
    CareGroup,
    LocalAuthority,
}

impl GroupBy {
    pub fn key(self, record: &CleanedRecord) -> Option<&str> {
        let value = match self {
            GroupBy::Ward => Some(record.ward.as_str()),
            GroupBy::CareGroup => record.care_group.as_deref(),
            GroupBy::LocalAuthority => record.local_authority.as_deref(),
        };
        value.map(str::trim).filter(|value| !value.is_empty())
    }

    pub fn label(self) -> &'static str {
        match self {
            GroupBy::Ward => "Ward",
            GroupBy::CareGroup => "CareGroup",
            GroupBy::LocalAuthority => "Local Authority",
        }
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    patients: usize,
    age_total: u64,
    age_count: usize,
    stay_total: i64,
    stay_count: usize,
    stay_max: Option<i64>,
    over_21_days: usize,
    outliers: usize,
    medfit: usize,
}

impl Accumulator {
    fn add(&mut self, record: &CleanedRecord) {
        if record.has_patient() {
            self.patients += 1;
        }
        if let Some(years) = record.cleaned_age.years() {
            self.age_total += u64::from(years);
            self.age_count += 1;
        }
        if let Some(days) = record.length_of_stay_days {
            self.stay_total += days;
            self.stay_count += 1;
            self.stay_max = Some(self.stay_max.map_or(days, |max| max.max(days)));
        }
        self.over_21_days += usize::from(record.over_21_days);
        self.outliers += usize::from(record.medical_outlier);
        self.medfit += usize::from(record.medically_fit_for_discharge);
    }

    fn finish(self) -> SummaryMetrics {
        let average_patient_age = (self.age_count > 0)
            .then(|| round_to(self.age_total as f64 / self.age_count as f64, 0) as i64);
        let average_stay_days = (self.stay_count > 0)
            .then(|| round_to(self.stay_total as f64 / self.stay_count as f64, 2));

        SummaryMetrics {
            number_of_patients: self.patients,
            average_patient_age,
            maximum_stay_days: self.stay_max,
            average_stay_days,
            number_over_21_days: self.over_21_days,
            number_outlier: self.outliers,
            number_medfit_for_dis: self.medfit,
            pct_over_21_days: Percentage::of(self.over_21_days, self.patients),
            pct_outliers: Percentage::of(self.outliers, self.patients),
            pct_medfit_for_dis: Percentage::of(self.medfit, self.patients),
        }
    }
}

/// Long-form summary, one row per date or per (date, group key).
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryTable {
    pub group_by: Option<GroupBy>,
    pub rows: Vec<SummaryRow>,
}

/// Summarizes records per date, or per (date, group key) when grouped.
///
/// Records without a completion date, or without a value for the grouping,
/// are left out of the table. Rows come out sorted by date then group key.
pub fn aggregate(records: &[CleanedRecord], group_by: Option<GroupBy>) -> SummaryTable {
    let mut partitions: BTreeMap<(NaiveDate, Option<String>), Accumulator> = BTreeMap::new();

    for record in records {
        let Some(date) = record.date else {
            continue;
        };
        let group = match group_by {
            Some(dimension) => match dimension.key(record) {
                Some(key) => Some(key.to_string()),
                None => continue,
            },
            None => None,
        };
        partitions.entry((date, group)).or_default().add(record);
    }

    let rows = partitions
        .into_iter()
        .map(|((date, group), accumulator)| SummaryRow {
            date,
            group,
            metrics: accumulator.finish(),
        })
        .collect();

    SummaryTable { group_by, rows }
}

impl SummaryTable {
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.rows
            .iter()
            .map(|row| row.date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Wide layout: group keys down the side, one column per date per metric.
    pub fn pivot(&self) -> PivotTable {
        let mut rows: BTreeMap<String, BTreeMap<NaiveDate, _>> = BTreeMap::new();
        for row in &self.rows {
            let key = row.group.clone().unwrap_or_else(|| TOTAL_KEY.to_string());
            rows.entry(key)
                .or_default()
                .insert(row.date, row.metrics.clone());
        }

        PivotTable {
            group_by: self.group_by,
            dates: self.dates(),
            rows: rows
                .into_iter()
                .map(|(key, cells)| PivotRow { key, cells })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivotRow {
    pub key: String,
    pub cells: BTreeMap<NaiveDate, SummaryMetrics>,
}

impl PivotRow {
    pub fn value(&self, metric: Metric, date: NaiveDate) -> Option<f64> {
        self.cells
            .get(&date)
            .and_then(|metrics| metrics.value(metric).as_f64())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivotTable {
    pub group_by: Option<GroupBy>,
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<PivotRow>,
}

impl PivotTable {
    pub fn row_label(&self) -> &'static str {
        self.group_by.map_or("Date", GroupBy::label)
    }

    /// Back to the long layout; empty (group, date) cells produce no row.
    pub fn melt(&self) -> SummaryTable {
        let mut rows: Vec<SummaryRow> = self
            .rows
            .iter()
            .flat_map(|row| {
                row.cells.iter().map(|(date, metrics)| SummaryRow {
                    date: *date,
                    group: self.group_by.map(|_| row.key.clone()),
                    metrics: metrics.clone(),
                })
            })
            .collect();
        rows.sort_by(|a, b| (a.date, &a.group).cmp(&(b.date, &b.group)));

        SummaryTable {
            group_by: self.group_by,
            rows,
        }
    }

    /// Rows ordered by one metric on one date, largest first; rows without a
    /// value on that date go last.
    pub fn sorted_by(&self, metric: Metric, date: NaiveDate) -> PivotTable {
        let mut sorted = self.clone();
        sorted.rows.sort_by(|a, b| {
            let by_value = match (a.value(metric, date), b.value(metric, date)) {
                (Some(x), Some(y)) => y.total_cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            };
            by_value.then_with(|| a.key.cmp(&b.key))
        });
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Age;
    use crate::normalize::OVER_21_DAYS;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, day).unwrap()
    }

    fn record(day: u32, ward: &str, care_group: Option<&str>) -> CleanedRecord {
        CleanedRecord {
            ward: ward.to_string(),
            care_group: care_group.map(str::to_string),
            local_authority: None,
            patient: Some("JS".to_string()),
            completion_time: date(day).and_hms_opt(9, 30, 0),
            admission_date: None,
            length_of_stay: "0-6 Days".to_string(),
            speciality: None,
            outlier_team: None,
            outlier_destination: None,
            age: String::new(),
            right_setting: "Yes".to_string(),
            appropriate_setting: None,
            date: Some(date(day)),
            length_of_stay_days: Some(3),
            over_21_days: false,
            medically_fit_for_discharge: false,
            medical_outlier: false,
            cleaned_age: Age::Unknown,
        }
    }

    fn sample_records() -> Vec<CleanedRecord> {
        let mut records = Vec::new();
        for (day, ward, group, stay, age, fit) in [
            (22, "Ward 4B", Some("Medicine"), 25, Age::Known(81), true),
            (22, "Ward 4B", Some("Medicine"), 2, Age::Known(64), false),
            (22, "Lotus", Some("Surgery"), 9, Age::Unknown, true),
            (23, "Lotus", Some("Surgery"), 10, Age::Known(40), false),
            (23, "Annex", None, 1, Age::Known(30), false),
        ] {
            let mut r = record(day, ward, group);
            r.length_of_stay_days = Some(stay);
            r.cleaned_age = age;
            r.medically_fit_for_discharge = fit;
            r.over_21_days = stay > 21;
            records.push(r);
        }
        records
    }

    #[test]
    fn two_patients_on_one_ward_summarize_by_date() {
        let mut first = record(22, "Ward 4B", Some("Medicine"));
        first.age = "70 years".to_string();
        first.cleaned_age = Age::Known(70);
        first.length_of_stay = OVER_21_DAYS.to_string();
        first.over_21_days = true;
        let mut second = record(22, "Ward 4B", Some("Medicine"));
        second.age = "5 months".to_string();
        second.cleaned_age = Age::Known(0);

        let table = aggregate(&[first, second], None);
        assert_eq!(table.rows.len(), 1);
        let metrics = &table.rows[0].metrics;
        assert_eq!(metrics.number_of_patients, 2);
        assert_eq!(metrics.average_patient_age, Some(35));
        assert_eq!(metrics.number_over_21_days, 1);
        assert_eq!(metrics.pct_over_21_days.to_string(), "50.0%");
    }

    #[test]
    fn percentages_use_patient_count() {
        let records: Vec<CleanedRecord> = (0..7)
            .map(|i| {
                let mut r = record(22, "Ward 4B", None);
                r.over_21_days = i < 3;
                r
            })
            .collect();
        let table = aggregate(&records, None);
        assert_eq!(table.rows[0].metrics.pct_over_21_days.to_string(), "42.86%");
    }

    #[test]
    fn stay_and_age_statistics() {
        let table = aggregate(&sample_records(), None);
        assert_eq!(table.rows.len(), 2);
        let first = &table.rows[0].metrics;
        assert_eq!(first.number_of_patients, 3);
        assert_eq!(first.maximum_stay_days, Some(25));
        assert_eq!(first.average_stay_days, Some(12.0));
        assert_eq!(first.average_patient_age, Some(72));
        assert_eq!(first.number_medfit_for_dis, 2);
        assert_eq!(first.pct_medfit_for_dis.to_string(), "66.67%");
    }

    #[test]
    fn unnamed_rows_do_not_count_as_patients() {
        let mut unnamed = record(22, "Ward 4B", None);
        unnamed.patient = Some("  ".to_string());
        unnamed.medical_outlier = true;
        let table = aggregate(&[unnamed], None);
        let metrics = &table.rows[0].metrics;
        assert_eq!(metrics.number_of_patients, 0);
        assert_eq!(metrics.number_outlier, 1);
        assert_eq!(metrics.pct_outliers.to_string(), "0.0%");
        assert_eq!(metrics.average_patient_age, None);
    }

    #[test]
    fn grouped_rows_sort_by_date_then_key() {
        let table = aggregate(&sample_records(), Some(GroupBy::Ward));
        let keys: Vec<(NaiveDate, Option<&str>)> = table
            .rows
            .iter()
            .map(|row| (row.date, row.group.as_deref()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (date(22), Some("Lotus")),
                (date(22), Some("Ward 4B")),
                (date(23), Some("Annex")),
                (date(23), Some("Lotus")),
            ]
        );
    }

    #[test]
    fn unmatched_wards_are_left_out_of_care_groups() {
        let table = aggregate(&sample_records(), Some(GroupBy::CareGroup));
        assert!(table.rows.iter().all(|row| row.group.is_some()));
        let total: usize = table.rows.iter().map(|r| r.metrics.number_of_patients).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn undated_records_are_skipped() {
        let mut undated = record(22, "Ward 4B", None);
        undated.date = None;
        let table = aggregate(&[undated], None);
        assert!(table.rows.is_empty());
    }

    #[test]
    fn aggregation_is_repeatable() {
        let records = sample_records();
        let before = records.clone();
        let first = aggregate(&records, Some(GroupBy::CareGroup));
        let second = aggregate(&records, Some(GroupBy::CareGroup));
        assert_eq!(first, second);
        assert_eq!(records, before);
    }

    #[test]
    fn pivot_melts_back_to_long_table() {
        let table = aggregate(&sample_records(), Some(GroupBy::Ward));
        let pivot = table.pivot();
        assert_eq!(pivot.dates, vec![date(22), date(23)]);
        let keys: Vec<&str> = pivot.rows.iter().map(|row| row.key.as_str()).collect();
        assert_eq!(keys, vec!["Annex", "Lotus", "Ward 4B"]);
        assert!(pivot.rows[0].cells.get(&date(22)).is_none());
        assert_eq!(pivot.melt(), table);
    }

    #[test]
    fn ungrouped_pivot_uses_total_row() {
        let table = aggregate(&sample_records(), None);
        let pivot = table.pivot();
        assert_eq!(pivot.rows.len(), 1);
        assert_eq!(pivot.rows[0].key, TOTAL_KEY);
        assert_eq!(pivot.melt(), table);
    }

    #[test]
    fn pivot_sorts_by_reference_date() {
        let pivot = aggregate(&sample_records(), Some(GroupBy::Ward)).pivot();
        let sorted = pivot.sorted_by(Metric::NumberOfPatients, date(22));
        let keys: Vec<&str> = sorted.rows.iter().map(|row| row.key.as_str()).collect();
        assert_eq!(keys, vec!["Ward 4B", "Lotus", "Annex"]);
    }
}
