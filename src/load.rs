//! Reading the audit export and reference tables from workbooks or CSV.

use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::models::{RawRecord, WardInfo};
use crate::normalize::{OutlierReference, WardReference};

pub const WARD: &str = "Ward";
pub const PATIENT: &str = "Patient Name/Initials";
pub const COMPLETION_TIME: &str = "Completion time";
pub const ADMISSION_DATE: &str = "Date of Admission";
pub const LENGTH_OF_STAY: &str = "Length of Stay";
pub const MEDICALLY_FIT: &str = "Is the patient medically fit for discharge?";
pub const OUTLIER: &str = "Is the patient an outlier?";
pub const OUTLIER_TEAM: &str = "If yes, which team should the patient be under?";
pub const AGE: &str = "Age";
pub const SPECIALITY: &str = "Speciality";
pub const RIGHT_SETTING: &str = "Are they being cared for in the right setting?";
pub const APPROPRIATE_SETTING: &str = "If no - what is the appropriate care setting";
pub const CARE_GROUP: &str = "CareGroup";
pub const LOCAL_AUTHORITY: &str = "Local Authority";
pub const OUTLIER_DESTINATION: &str = "Outlier - Where should the patient be?";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    DateTime(NaiveDateTime),
}

impl Cell {
    /// Cell contents as text; whole numbers print without a decimal point.
    pub fn text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(text) => Some(text.clone()),
            Cell::Number(value) if value.fract() == 0.0 => Some(format!("{}", *value as i64)),
            Cell::Number(value) => Some(value.to_string()),
            Cell::DateTime(value) => Some(value.to_string()),
        }
    }

    pub fn datetime(&self) -> anyhow::Result<Option<NaiveDateTime>> {
        match self {
            Cell::Empty => Ok(None),
            Cell::DateTime(value) => Ok(Some(*value)),
            Cell::Number(serial) => excel_serial_to_datetime(*serial)
                .map(Some)
                .with_context(|| format!("{serial} is not a spreadsheet date")),
            Cell::Text(text) => parse_datetime(text)
                .map(Some)
                .with_context(|| format!("`{text}` is not a date")),
        }
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Spreadsheet serial day numbers count from 1899-12-30.
fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let seconds = (serial * 86_400.0).round() as i64;
    epoch.checked_add_signed(Duration::seconds(seconds))
}

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(text) if text.trim().is_empty() => Cell::Empty,
        Data::String(text) => Cell::Text(text.clone()),
        Data::Int(value) => Cell::Number(*value as f64),
        Data::Float(value) => Cell::Number(*value),
        Data::Bool(value) => Cell::Text(value.to_string()),
        Data::DateTime(value) => value
            .as_datetime()
            .map_or(Cell::Number(value.as_f64()), Cell::DateTime),
        Data::DateTimeIso(text) => parse_datetime(text).map_or(Cell::Text(text.clone()), Cell::DateTime),
        Data::DurationIso(text) => Cell::Text(text.clone()),
        Data::Error(error) => {
            debug!(?error, "spreadsheet error cell read as empty");
            Cell::Empty
        }
    }
}

/// A header row plus data rows, whatever file format they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub source: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        let sheet = match extension.as_str() {
            "csv" => {
                let file = std::fs::File::open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                Self::from_csv(file, &path.display().to_string())?
            }
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Self::from_workbook(path)?,
            other => bail!(
                "unsupported input format `{other}` for {}; expected a workbook or CSV",
                path.display()
            ),
        };

        info!(source = %sheet.source, rows = sheet.rows.len(), "loaded sheet");
        Ok(sheet)
    }

    fn from_workbook(path: &Path) -> anyhow::Result<Self> {
        let mut workbook = open_workbook_auto(path)
            .with_context(|| format!("failed to open workbook {}", path.display()))?;
        let range = workbook
            .worksheet_range_at(0)
            .with_context(|| format!("workbook {} has no sheets", path.display()))?
            .with_context(|| format!("failed to read first sheet of {}", path.display()))?;

        let mut rows = range.rows();
        let headers = rows
            .next()
            .with_context(|| format!("{} is empty", path.display()))?
            .iter()
            .map(|cell| cell_from_data(cell).text().unwrap_or_default().trim().to_string())
            .collect();
        let rows = rows
            .map(|row| row.iter().map(cell_from_data).collect::<Vec<_>>())
            .filter(|row| row.iter().any(|cell| *cell != Cell::Empty))
            .collect();

        Ok(Self {
            source: path.display().to_string(),
            headers,
            rows,
        })
    }

    pub fn from_csv<R: Read>(reader: R, source: &str) -> anyhow::Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = reader
            .headers()
            .with_context(|| format!("failed to read header row of {source}"))?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result.with_context(|| format!("malformed CSV row in {source}"))?;
            let row: Vec<Cell> = record
                .iter()
                .map(|value| {
                    if value.trim().is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(value.to_string())
                    }
                })
                .collect();
            if row.iter().any(|cell| *cell != Cell::Empty) {
                rows.push(row);
            }
        }

        Ok(Self {
            source: source.to_string(),
            headers,
            rows,
        })
    }

    pub fn column(&self, name: &str) -> anyhow::Result<usize> {
        self.headers
            .iter()
            .position(|header| header == name)
            .with_context(|| format!("missing required column `{name}` in {}", self.source))
    }

    pub fn optional_column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }
}

fn cell(row: &[Cell], index: usize) -> &Cell {
    row.get(index).unwrap_or(&Cell::Empty)
}

fn text(row: &[Cell], index: usize) -> Option<String> {
    cell(row, index).text()
}

fn text_or_empty(row: &[Cell], index: usize) -> String {
    text(row, index).unwrap_or_default()
}

fn datetime(sheet: &Sheet, row: &[Cell], index: usize, line: usize) -> anyhow::Result<Option<NaiveDateTime>> {
    cell(row, index).datetime().with_context(|| {
        format!(
            "invalid `{}` on row {line} of {}",
            sheet.headers[index], sheet.source
        )
    })
}

pub fn audit_records(sheet: &Sheet) -> anyhow::Result<Vec<RawRecord>> {
    let ward = sheet.column(WARD)?;
    let patient = sheet.column(PATIENT)?;
    let completion_time = sheet.column(COMPLETION_TIME)?;
    let admission_date = sheet.column(ADMISSION_DATE)?;
    let length_of_stay = sheet.column(LENGTH_OF_STAY)?;
    let medically_fit = sheet.column(MEDICALLY_FIT)?;
    let outlier = sheet.column(OUTLIER)?;
    let outlier_team = sheet.column(OUTLIER_TEAM)?;
    let age = sheet.column(AGE)?;
    let speciality = sheet.column(SPECIALITY)?;
    let right_setting = sheet.column(RIGHT_SETTING)?;
    let appropriate_setting = sheet.column(APPROPRIATE_SETTING)?;

    let mut records = Vec::with_capacity(sheet.rows.len());
    for (index, row) in sheet.rows.iter().enumerate() {
        // header is line 1
        let line = index + 2;
        records.push(RawRecord {
            ward: text_or_empty(row, ward),
            patient: text(row, patient),
            completion_time: datetime(sheet, row, completion_time, line)?,
            admission_date: datetime(sheet, row, admission_date, line)?,
            length_of_stay: text_or_empty(row, length_of_stay),
            medically_fit: text_or_empty(row, medically_fit),
            outlier: text_or_empty(row, outlier),
            outlier_team: text(row, outlier_team),
            age: text_or_empty(row, age),
            speciality: text(row, speciality),
            right_setting: text_or_empty(row, right_setting),
            appropriate_setting: text(row, appropriate_setting),
        });
    }

    Ok(records)
}

pub fn ward_reference(sheet: &Sheet) -> anyhow::Result<WardReference> {
    let ward = sheet.column(WARD)?;
    let care_group = sheet.column(CARE_GROUP)?;
    let local_authority = sheet.optional_column(LOCAL_AUTHORITY);

    let rows = sheet.rows.iter().filter_map(|row| {
        let name = text(row, ward)?;
        let info = WardInfo {
            care_group: text(row, care_group).map(|value| value.trim().to_string()),
            local_authority: local_authority
                .and_then(|index| text(row, index))
                .map(|value| value.trim().to_string()),
        };
        Some((name, info))
    });

    Ok(WardReference::from_rows(rows))
}

pub fn outlier_reference(sheet: &Sheet) -> anyhow::Result<OutlierReference> {
    let team = sheet.column(OUTLIER_TEAM)?;
    let destination = sheet.column(OUTLIER_DESTINATION)?;

    let rows = sheet.rows.iter().filter_map(|row| {
        let destination = text(row, destination)?.trim().to_string();
        Some((text(row, team)?, destination))
    });

    Ok(OutlierReference::from_rows(rows))
}

pub fn load_audit(path: &Path) -> anyhow::Result<Vec<RawRecord>> {
    audit_records(&Sheet::from_path(path)?)
}

pub fn load_ward_reference(path: &Path) -> anyhow::Result<WardReference> {
    let wards = ward_reference(&Sheet::from_path(path)?)?;
    if wards.is_empty() {
        warn!(path = %path.display(), "ward reference has no usable rows");
    }
    debug!(wards = wards.len(), "ward reference ready");
    Ok(wards)
}

pub fn load_outlier_reference(path: &Path) -> anyhow::Result<OutlierReference> {
    let outliers = outlier_reference(&Sheet::from_path(path)?)?;
    if outliers.is_empty() {
        warn!(path = %path.display(), "outlier reference has no usable rows");
    }
    debug!(teams = outliers.len(), "outlier reference ready");
    Ok(outliers)
}
