//! Counting tables for misplaced and outlier patients.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;

use crate::models::CleanedRecord;

pub const WRONG_SETTING: &str = "No";

/// Counts per label per date, e.g. misplaced patients by recommended setting.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossTab {
    pub row_label: String,
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<CrossTabRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossTabRow {
    pub label: String,
    pub counts: BTreeMap<NaiveDate, usize>,
}

/// Patients not in the right setting, by where they should be and by day.
/// Sorted by the reference date's count, largest first.
pub fn care_setting_crosstab(records: &[CleanedRecord], reference_date: NaiveDate) -> CrossTab {
    let mut counts: BTreeMap<String, BTreeMap<NaiveDate, usize>> = BTreeMap::new();
    let mut dates = BTreeSet::new();

    for record in records {
        if record.right_setting != WRONG_SETTING || !record.has_patient() {
            continue;
        }
        let (Some(date), Some(setting)) = (record.date, non_blank(&record.appropriate_setting))
        else {
            continue;
        };
        dates.insert(date);
        *counts
            .entry(setting.to_string())
            .or_default()
            .entry(date)
            .or_default() += 1;
    }

    let mut rows: Vec<CrossTabRow> = counts
        .into_iter()
        .map(|(label, counts)| CrossTabRow { label, counts })
        .collect();
    rows.sort_by(|a, b| {
        let by_reference = match (a.counts.get(&reference_date), b.counts.get(&reference_date)) {
            (Some(x), Some(y)) => y.cmp(x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_reference.then_with(|| a.label.cmp(&b.label))
    });

    CrossTab {
        row_label: "If no - what is the appropriate care setting".to_string(),
        dates: dates.into_iter().collect(),
        rows,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationCount {
    pub label: String,
    pub count: usize,
}

/// Outlier patients per speciality they are currently under.
pub fn outlier_locations(records: &[CleanedRecord], min_count: usize) -> Vec<LocationCount> {
    count_labels(
        records
            .iter()
            .filter(|record| record.medical_outlier)
            .filter_map(|record| non_blank(&record.speciality)),
        min_count,
    )
}

/// Records per destination the outlier reference says they belong to.
pub fn outlier_destinations(records: &[CleanedRecord], min_count: usize) -> Vec<LocationCount> {
    count_labels(
        records
            .iter()
            .filter_map(|record| non_blank(&record.outlier_destination)),
        min_count,
    )
}

/// Keeps labels seen more than `min_count` times, most frequent first.
fn count_labels<'a>(labels: impl Iterator<Item = &'a str>, min_count: usize) -> Vec<LocationCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for label in labels {
        *counts.entry(label).or_default() += 1;
    }

    let mut values: Vec<LocationCount> = counts
        .into_iter()
        .filter(|(_, count)| *count > min_count)
        .map(|(label, count)| LocationCount {
            label: label.to_string(),
            count,
        })
        .collect();
    values.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    values
}

/// How often patients under one speciality should have been under another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairCount {
    pub location: String,
    pub destination: String,
    pub count: usize,
}

pub fn outlier_pairs(records: &[CleanedRecord]) -> Vec<PairCount> {
    let mut counts: HashMap<(&str, &str), usize> = HashMap::new();
    for record in records {
        if let (Some(location), Some(destination)) = (
            non_blank(&record.speciality),
            non_blank(&record.outlier_destination),
        ) {
            *counts.entry((location, destination)).or_default() += 1;
        }
    }

    let mut pairs: Vec<PairCount> = counts
        .into_iter()
        .map(|((location, destination), count)| PairCount {
            location: location.to_string(),
            destination: destination.to_string(),
            count,
        })
        .collect();
    pairs.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.location.cmp(&b.location))
            .then_with(|| a.destination.cmp(&b.destination))
    });
    pairs
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairFilter {
    All,
    AtLeast(usize),
    Mismatched,
}

impl PairFilter {
    fn keeps(self, pair: &PairCount) -> bool {
        match self {
            PairFilter::All => true,
            PairFilter::AtLeast(min) => pair.count >= min,
            PairFilter::Mismatched => pair.location != pair.destination,
        }
    }
}

/// Current speciality (rows) against where the patient should be (columns).
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierMatrix {
    pub locations: Vec<String>,
    pub destinations: Vec<String>,
    cells: HashMap<(usize, usize), usize>,
}

impl OutlierMatrix {
    pub fn from_pairs(pairs: &[PairCount], filter: PairFilter) -> Self {
        let kept: Vec<&PairCount> = pairs.iter().filter(|pair| filter.keeps(pair)).collect();
        let locations: Vec<String> = kept
            .iter()
            .map(|pair| pair.location.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let destinations: Vec<String> = kept
            .iter()
            .map(|pair| pair.destination.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut cells = HashMap::new();
        for pair in kept {
            let row = locations.binary_search(&pair.location);
            let column = destinations.binary_search(&pair.destination);
            if let (Ok(row), Ok(column)) = (row, column) {
                cells.insert((row, column), pair.count);
            }
        }

        Self {
            locations,
            destinations,
            cells,
        }
    }

    pub fn get(&self, row: usize, column: usize) -> Option<usize> {
        self.cells.get(&(row, column)).copied()
    }

    pub fn max(&self) -> usize {
        self.cells.values().copied().max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
