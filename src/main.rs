use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod aggregate;
mod charts;
mod config;
mod crosstab;
mod export;
mod load;
mod models;
mod normalize;
mod report;

use aggregate::GroupBy;
use config::AuditConfig;

#[derive(Parser)]
#[command(name = "ward-audit")]
#[command(about = "Settings of care audit reporting for hospital wards", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InputArgs {
    /// TOML file with input paths and report settings
    #[arg(long)]
    config: Option<PathBuf>,
    /// Audit export (.xlsx or .csv)
    #[arg(long)]
    audit: Option<PathBuf>,
    /// Ward to care group lookup
    #[arg(long)]
    wards: Option<PathBuf>,
    /// Outlier team lookup
    #[arg(long)]
    outliers: Option<PathBuf>,
    /// Date used to order the care setting sheet and grouped charts
    #[arg(long)]
    reference_date: Option<NaiveDate>,
}

impl InputArgs {
    fn resolve(self) -> anyhow::Result<AuditConfig> {
        let mut config = AuditConfig::load(self.config.as_deref())?;
        if let Some(path) = self.audit {
            config.audit_path = path;
        }
        if let Some(path) = self.wards {
            config.ward_reference_path = path;
        }
        if let Some(path) = self.outliers {
            config.outlier_reference_path = path;
        }
        if let Some(date) = self.reference_date {
            config.reference_date = Some(date);
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write the audit workbook and charts
    Report {
        #[command(flatten)]
        inputs: InputArgs,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long)]
        no_charts: bool,
    },
    /// Print daily figures to the terminal
    Summary {
        #[command(flatten)]
        inputs: InputArgs,
        #[arg(long, value_enum)]
        by: Option<GroupBy>,
        #[arg(long)]
        json: bool,
    },
    /// Export the cleaned audit records as CSV
    Clean {
        #[command(flatten)]
        inputs: InputArgs,
        #[arg(long, default_value = "cleaned_records.csv")]
        out: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Report {
            inputs,
            out_dir,
            no_charts,
        } => {
            let mut config = inputs.resolve()?;
            if let Some(dir) = out_dir {
                config.output_dir = dir;
            }
            if no_charts {
                config.render_charts = false;
            }

            let records = report::load_records(&config)?;
            let audit = report::build_report(&records, &config)?;
            let workbook = config.report_path();
            export::write_workbook(&workbook, &audit)?;
            println!("Report written to {}.", workbook.display());

            if config.render_charts {
                let plan = charts::chart_plan(&audit, &config);
                let written = charts::render_charts(
                    &plan,
                    &config.output_dir,
                    (config.chart_width, config.chart_height),
                )?;
                println!(
                    "{} charts written to {}.",
                    written.len(),
                    config.output_dir.display()
                );
            }
        }
        Commands::Summary { inputs, by, json } => {
            let config = inputs.resolve()?;
            let records = report::load_records(&config)?;
            let table = aggregate::aggregate(&records, by);

            if json {
                println!("{}", serde_json::to_string_pretty(&table.rows)?);
            } else {
                print!("{}", report::render_summary(&table));
            }
        }
        Commands::Clean { inputs, out } => {
            let config = inputs.resolve()?;
            let records = report::load_records(&config)?;
            let written = export::write_cleaned_csv(&out, &records)?;
            println!("Wrote {written} cleaned records to {}.", out.display());
        }
    }

    Ok(())
}
