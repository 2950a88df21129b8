use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;

/// Where the audit inputs live and how the report is produced.
///
/// Every field has a default, so a config file only needs the values that
/// differ from the usual "Settings of Care Audit" folder layout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    pub audit_path: PathBuf,
    pub ward_reference_path: PathBuf,
    pub outlier_reference_path: PathBuf,
    pub output_dir: PathBuf,
    pub report_file: String,
    /// Date used to order the care-setting sheet and grouped charts.
    /// Defaults to the latest audit date.
    pub reference_date: Option<NaiveDate>,
    pub render_charts: bool,
    pub chart_width: u32,
    pub chart_height: u32,
    pub specialty_min_count: usize,
    pub destination_min_count: usize,
    pub significant_pair_count: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        let base = PathBuf::from("Settings of Care Audit");
        Self {
            audit_path: base.join("Setting of Care Audit.xlsx"),
            ward_reference_path: base.join("WardCodes.xlsx"),
            outlier_reference_path: base.join("outlier lookup.xlsx"),
            output_dir: base,
            report_file: "aggregated_audit_figures.xlsx".to_string(),
            reference_date: None,
            render_charts: true,
            chart_width: 1600,
            chart_height: 1000,
            specialty_min_count: 5,
            destination_min_count: 1,
            significant_pair_count: 5,
        }
    }
}

impl AuditConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(&self.report_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_means_defaults() {
        let config = AuditConfig::load(None).unwrap();
        assert_eq!(config, AuditConfig::default());
        assert_eq!(
            config.report_path(),
            PathBuf::from("Settings of Care Audit/aggregated_audit_figures.xlsx")
        );
    }

    #[test]
    fn toml_overrides_selected_fields() {
        let config = AuditConfig::from_toml_str(
            r#"
            audit_path = "exports/april.csv"
            output_dir = "out"
            reference_date = "2024-04-22"
            render_charts = false
            "#,
        )
        .unwrap();

        assert_eq!(config.audit_path, PathBuf::from("exports/april.csv"));
        assert_eq!(config.reference_date, NaiveDate::from_ymd_opt(2024, 4, 22));
        assert!(!config.render_charts);
        assert_eq!(config.specialty_min_count, 5);
        assert_eq!(config.report_path(), PathBuf::from("out/aggregated_audit_figures.xlsx"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(AuditConfig::from_toml_str("audit = \"x.xlsx\"").is_err());
    }

    #[test]
    fn config_file_is_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.toml");
        std::fs::write(&path, "chart_width = 800\n").unwrap();
        let config = AuditConfig::load(Some(&path)).unwrap();
        assert_eq!(config.chart_width, 800);
    }
}
