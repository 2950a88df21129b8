use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Serialize, Serializer};

/// One audit row as exported from the settings-of-care form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub ward: String,
    pub patient: Option<String>,
    pub completion_time: Option<NaiveDateTime>,
    pub admission_date: Option<NaiveDateTime>,
    pub length_of_stay: String,
    pub medically_fit: String,
    pub outlier: String,
    pub outlier_team: Option<String>,
    pub age: String,
    pub speciality: Option<String>,
    pub right_setting: String,
    pub appropriate_setting: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WardInfo {
    pub care_group: Option<String>,
    pub local_authority: Option<String>,
}

/// Patient age after cleaning the free-text field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Age {
    Known(u32),
    Unknown,
}

impl Age {
    pub fn years(self) -> Option<u32> {
        match self {
            Age::Known(years) => Some(years),
            Age::Unknown => None,
        }
    }
}

impl fmt::Display for Age {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Age::Known(years) => write!(f, "{years}"),
            Age::Unknown => write!(f, "unknown"),
        }
    }
}

impl Serialize for Age {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Age::Known(years) => serializer.serialize_u32(*years),
            Age::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

/// An audit row joined with the ward and outlier references plus derived flags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanedRecord {
    pub ward: String,
    pub care_group: Option<String>,
    pub local_authority: Option<String>,
    pub patient: Option<String>,
    pub completion_time: Option<NaiveDateTime>,
    pub admission_date: Option<NaiveDateTime>,
    pub length_of_stay: String,
    pub speciality: Option<String>,
    pub outlier_team: Option<String>,
    pub outlier_destination: Option<String>,
    pub age: String,
    pub right_setting: String,
    pub appropriate_setting: Option<String>,
    pub date: Option<NaiveDate>,
    pub length_of_stay_days: Option<i64>,
    pub over_21_days: bool,
    pub medically_fit_for_discharge: bool,
    pub medical_outlier: bool,
    pub cleaned_age: Age,
}

impl CleanedRecord {
    /// Rows only count towards patient totals when someone was named.
    pub fn has_patient(&self) -> bool {
        self.patient
            .as_deref()
            .is_some_and(|patient| !patient.trim().is_empty())
    }
}

/// Rounds half to even, the same way the audit spreadsheets were rounded.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}

/// A share of patients, already rounded to two decimals.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Percentage(f64);

impl Percentage {
    /// An empty partition reports 0%.
    pub fn of(count: usize, total: usize) -> Self {
        if total == 0 {
            return Self(0.0);
        }
        Self(round_to(count as f64 / total as f64 * 100.0, 2))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.0.to_string();
        if digits.contains('.') {
            write!(f, "{digits}%")
        } else {
            write!(f, "{digits}.0%")
        }
    }
}

impl Serialize for Percentage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryMetrics {
    pub number_of_patients: usize,
    pub average_patient_age: Option<i64>,
    pub maximum_stay_days: Option<i64>,
    pub average_stay_days: Option<f64>,
    pub number_over_21_days: usize,
    pub number_outlier: usize,
    pub number_medfit_for_dis: usize,
    #[serde(rename = "%_over_21_days")]
    pub pct_over_21_days: Percentage,
    #[serde(rename = "%_outliers")]
    pub pct_outliers: Percentage,
    #[serde(rename = "%_medfit_for_dis")]
    pub pct_medfit_for_dis: Percentage,
}

impl SummaryMetrics {
    pub fn value(&self, metric: Metric) -> MetricValue {
        match metric {
            Metric::NumberOfPatients => MetricValue::Count(self.number_of_patients),
            Metric::AveragePatientAge => MetricValue::Whole(self.average_patient_age),
            Metric::MaximumStayDays => MetricValue::Whole(self.maximum_stay_days),
            Metric::AverageStayDays => MetricValue::Decimal(self.average_stay_days),
            Metric::NumberOver21Days => MetricValue::Count(self.number_over_21_days),
            Metric::NumberOutlier => MetricValue::Count(self.number_outlier),
            Metric::NumberMedfitForDis => MetricValue::Count(self.number_medfit_for_dis),
            Metric::PctOver21Days => MetricValue::Percent(self.pct_over_21_days),
            Metric::PctOutliers => MetricValue::Percent(self.pct_outliers),
            Metric::PctMedfitForDis => MetricValue::Percent(self.pct_medfit_for_dis),
        }
    }
}

/// Summary for one date, optionally narrowed to one group key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(flatten)]
    pub metrics: SummaryMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    NumberOfPatients,
    AveragePatientAge,
    MaximumStayDays,
    AverageStayDays,
    NumberOver21Days,
    NumberOutlier,
    NumberMedfitForDis,
    PctOver21Days,
    PctOutliers,
    PctMedfitForDis,
}

impl Metric {
    pub const ALL: [Metric; 10] = [
        Metric::NumberOfPatients,
        Metric::AveragePatientAge,
        Metric::MaximumStayDays,
        Metric::AverageStayDays,
        Metric::NumberOver21Days,
        Metric::NumberOutlier,
        Metric::NumberMedfitForDis,
        Metric::PctOver21Days,
        Metric::PctOutliers,
        Metric::PctMedfitForDis,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::NumberOfPatients => "number_of_patients",
            Metric::AveragePatientAge => "average_patient_age",
            Metric::MaximumStayDays => "maximum_stay_days",
            Metric::AverageStayDays => "average_stay_days",
            Metric::NumberOver21Days => "number_over_21_days",
            Metric::NumberOutlier => "number_outlier",
            Metric::NumberMedfitForDis => "number_medfit_for_dis",
            Metric::PctOver21Days => "%_over_21_days",
            Metric::PctOutliers => "%_outliers",
            Metric::PctMedfitForDis => "%_medfit_for_dis",
        }
    }

    /// Column heading used in exported sheets and charts.
    pub fn header(self) -> String {
        self.name().replace('_', " ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Count(usize),
    Whole(Option<i64>),
    Decimal(Option<f64>),
    Percent(Percentage),
}

impl MetricValue {
    pub fn as_f64(self) -> Option<f64> {
        match self {
            MetricValue::Count(count) => Some(count as f64),
            MetricValue::Whole(value) => value.map(|v| v as f64),
            MetricValue::Decimal(value) => value,
            MetricValue::Percent(pct) => Some(pct.value()),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Count(count) => write!(f, "{count}"),
            MetricValue::Whole(Some(value)) => write!(f, "{value}"),
            MetricValue::Decimal(Some(value)) => write!(f, "{value}"),
            MetricValue::Whole(None) | MetricValue::Decimal(None) => Ok(()),
            MetricValue::Percent(pct) => write!(f, "{pct}"),
        }
    }
}
