use std::collections::HashMap;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::models::{Age, CleanedRecord, RawRecord, WardInfo};

pub const OVER_21_DAYS: &str = "21+ Days";
pub const YES: &str = "Yes";

/// Ward name → care group and local authority, keyed by [`ward_key`].
#[derive(Debug, Clone, Default)]
pub struct WardReference {
    wards: HashMap<String, WardInfo>,
}

impl WardReference {
    /// The first row for a key wins; later duplicates are ignored.
    pub fn from_rows<I, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = (S, WardInfo)>,
        S: AsRef<str>,
    {
        let mut wards = HashMap::new();
        for (ward, info) in rows {
            let key = ward_key(ward.as_ref());
            if key.is_empty() {
                continue;
            }
            if wards.contains_key(&key) {
                warn!(ward = ward.as_ref(), key = %key, "duplicate ward reference key ignored");
                continue;
            }
            wards.insert(key, info);
        }
        Self { wards }
    }

    pub fn lookup(&self, ward: &str) -> Option<&WardInfo> {
        self.wards.get(&ward_key(ward))
    }

    pub fn len(&self) -> usize {
        self.wards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wards.is_empty()
    }
}

/// Lower-cased team name → where an outlier patient should be.
#[derive(Debug, Clone, Default)]
pub struct OutlierReference {
    destinations: HashMap<String, String>,
}

impl OutlierReference {
    pub fn from_rows<I, S, D>(rows: I) -> Self
    where
        I: IntoIterator<Item = (S, D)>,
        S: AsRef<str>,
        D: Into<String>,
    {
        let mut destinations = HashMap::new();
        for (team, destination) in rows {
            let key = team_key(team.as_ref());
            if key.is_empty() {
                continue;
            }
            destinations.entry(key).or_insert_with(|| destination.into());
        }
        Self { destinations }
    }

    pub fn lookup(&self, team: &str) -> Option<&str> {
        self.destinations.get(&team_key(team)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }
}

/// First word of a ward name, with non-breaking spaces treated as spaces.
pub fn ward_key(ward: &str) -> String {
    ward.trim()
        .replace('\u{a0}', " ")
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

pub fn team_key(team: &str) -> String {
    team.trim().to_lowercase()
}

/// Cleans a free-text age. Babies under a year are recorded as 0.
pub fn parse_age(text: &str) -> Age {
    let text = text.trim().to_lowercase();
    let years = if text.contains("year") {
        first_number(&text)
    } else if text.contains("month") || text.contains("day") {
        Some(0)
    } else if text.contains('y') {
        first_number(&text)
    } else {
        text.parse::<u32>().ok()
    };

    years.map_or(Age::Unknown, Age::Known)
}

fn first_number(text: &str) -> Option<u32> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Whole days elapsed, floored, so a completion before admission is negative.
pub fn length_of_stay_days(completion: NaiveDateTime, admission: NaiveDateTime) -> i64 {
    (completion - admission).num_seconds().div_euclid(86_400)
}

pub fn normalize(
    raw_records: &[RawRecord],
    wards: &WardReference,
    outliers: &OutlierReference,
) -> Vec<CleanedRecord> {
    let mut unmatched_wards = 0usize;
    let mut unmatched_teams = 0usize;
    let mut unknown_ages = 0usize;
    let mut negative_stays = 0usize;

    let cleaned: Vec<CleanedRecord> = raw_records
        .iter()
        .map(|raw| {
            let record = clean_record(raw, wards, outliers);
            if record.care_group.is_none() && record.local_authority.is_none() {
                unmatched_wards += 1;
                debug!(ward = %record.ward, "ward not found in reference");
            }
            if record.outlier_team.is_some() && record.outlier_destination.is_none() {
                unmatched_teams += 1;
            }
            if record.cleaned_age == Age::Unknown {
                unknown_ages += 1;
                debug!(age = %raw.age, "age could not be parsed");
            }
            if record.length_of_stay_days.is_some_and(|days| days < 0) {
                negative_stays += 1;
            }
            record
        })
        .collect();

    info!(
        records = cleaned.len(),
        unmatched_wards, unmatched_teams, unknown_ages, "normalized audit records"
    );
    if negative_stays > 0 {
        warn!(
            negative_stays,
            "records completed before their admission date; stays left negative"
        );
    }

    cleaned
}

fn clean_record(
    raw: &RawRecord,
    wards: &WardReference,
    outliers: &OutlierReference,
) -> CleanedRecord {
    let ward = raw.ward.trim().to_string();
    let info = wards.lookup(&ward).cloned().unwrap_or_default();

    let outlier_team = raw
        .outlier_team
        .as_deref()
        .map(team_key)
        .filter(|team| !team.is_empty());
    let outlier_destination = outlier_team
        .as_deref()
        .and_then(|team| outliers.lookup(team))
        .map(str::to_string);

    let length_of_stay_days = match (raw.completion_time, raw.admission_date) {
        (Some(completion), Some(admission)) => Some(length_of_stay_days(completion, admission)),
        _ => None,
    };

    CleanedRecord {
        ward,
        care_group: info.care_group,
        local_authority: info.local_authority,
        patient: raw.patient.clone(),
        completion_time: raw.completion_time,
        admission_date: raw.admission_date,
        length_of_stay: raw.length_of_stay.clone(),
        speciality: raw.speciality.clone(),
        outlier_team,
        outlier_destination,
        age: raw.age.clone(),
        right_setting: raw.right_setting.clone(),
        appropriate_setting: raw.appropriate_setting.clone(),
        date: raw.completion_time.map(|completion| completion.date()),
        length_of_stay_days,
        over_21_days: raw.length_of_stay == OVER_21_DAYS,
        medically_fit_for_discharge: raw.medically_fit == YES,
        medical_outlier: raw.outlier == YES,
        cleaned_age: parse_age(&raw.age),
    }
}
