mod harness;
mod reports;
mod runner;
mod scenario;
mod util;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use colored::Colorize;
use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::path::PathBuf;
use std::time::Instant;

use runner::{ScenarioResult, ScenarioRunner};
use scenario::{get_scenario, list_scenarios};
use util::{parse_seeds, split_csv};

#[derive(Debug, Parser)]
#[command(name = "cloudsave-tester", version = "0.1.0")]
#[command(about = "Scripted QA runs for cloud save synchronization and conflict resolution")]
struct Args {
    /// Scenarios to run (comma-separated, or "all")
    #[arg(long, default_value = "all")]
    scenarios: String,

    /// List all available scenarios and exit
    #[arg(long)]
    list_scenarios: bool,

    /// Seeds to run (comma-separated)
    #[arg(long, default_value = "1337")]
    seeds: String,

    /// Number of iterations per scenario and seed
    #[arg(long, default_value_t = 10)]
    iterations: usize,

    /// Output report format
    #[arg(long, default_value = "console")]
    #[arg(value_parser = ["json", "markdown", "console"])]
    report: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Write the report to a file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if maybe_list_scenarios(&args)? {
        return Ok(());
    }

    announce_banner();

    let seeds = parse_seeds(&args.seeds)?;
    let scenarios = expand_scenarios(&split_csv(&args.scenarios));
    let start_time = Instant::now();

    let results = run_scenarios(&args, &scenarios, &seeds).await;
    write_reports(&args, &results, start_time)?;

    if results.iter().any(|r| !r.passed) {
        std::process::exit(1);
    }
    Ok(())
}

fn maybe_list_scenarios(args: &Args) -> Result<bool> {
    if !args.list_scenarios {
        return Ok(false);
    }
    let mut output_target = OutputTarget::new(args.output.clone())?;
    let writer = output_target.writer();
    writeln!(writer, "Available scenarios:")?;
    for (key, description) in list_scenarios() {
        writeln!(writer, "  {key:25} - {description}")?;
    }
    output_target.flush_inner()?;
    Ok(true)
}

fn announce_banner() {
    println!("{}", "☁️  Cloud Save Tester".bright_cyan().bold());
    println!("{}", "=".repeat(30).cyan());
}

fn expand_scenarios(requested: &[String]) -> Vec<String> {
    let mut scenarios = Vec::new();
    for name in requested {
        if name.eq_ignore_ascii_case("all") {
            scenarios.extend(list_scenarios().into_iter().map(|(key, _)| key.to_string()));
        } else {
            scenarios.push(name.clone());
        }
    }
    scenarios
}

async fn run_scenarios(args: &Args, scenarios: &[String], seeds: &[u64]) -> Vec<ScenarioResult> {
    let runner = ScenarioRunner::new(args.verbose);
    let mut results = Vec::new();
    for name in scenarios {
        let Some(scenario) = get_scenario(name) else {
            eprintln!("⚠️  Unknown scenario: {}", name.yellow());
            continue;
        };
        results.extend(
            runner
                .run_scenario(scenario.as_ref(), seeds, args.iterations)
                .await,
        );
    }
    results
}

fn write_reports(args: &Args, results: &[ScenarioResult], start_time: Instant) -> Result<()> {
    let mut output_target = OutputTarget::new(args.output.clone())?;

    match args.report.as_str() {
        "json" => reports::generate_json_report(&mut output_target, results)?,
        "markdown" => {
            if results.is_empty() {
                writeln!(
                    &mut output_target,
                    "# Cloud Save Test Results\n\n_No scenarios executed._"
                )?;
            } else {
                reports::generate_markdown_report(&mut output_target, results, Utc::now())?;
            }
        }
        _ => {
            if results.is_empty() {
                writeln!(&mut output_target, "No scenarios executed.")?;
            } else {
                reports::generate_console_report(
                    &mut output_target,
                    results,
                    start_time.elapsed(),
                )?;
            }
            writeln!(&mut output_target)?;
            writeln!(
                &mut output_target,
                "🏁 Total time: {:?}",
                start_time.elapsed()
            )?;
        }
    }

    output_target.flush_inner()?;
    Ok(())
}

enum OutputTarget {
    Stdout(BufWriter<std::io::Stdout>),
    File(BufWriter<File>),
}

impl OutputTarget {
    fn new(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Self::File(BufWriter::new(file)))
        } else {
            Ok(Self::Stdout(BufWriter::new(stdout())))
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Stdout(w) => w,
            Self::File(w) => w,
        }
    }

    fn flush_inner(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdout(w) => w.flush(),
            Self::File(w) => w.flush(),
        }
    }
}

impl Write for OutputTarget {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            scenarios: "all".to_string(),
            list_scenarios: false,
            seeds: "1337".to_string(),
            iterations: 1,
            report: "json".to_string(),
            verbose: false,
            output: None,
        }
    }

    fn temp_output(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "cloudsave-tester-{label}-{}",
            std::process::id()
        ))
    }

    #[test]
    fn all_expands_to_every_listed_scenario() {
        let expanded = expand_scenarios(&["all".to_string()]);
        assert_eq!(expanded.len(), list_scenarios().len());
        assert_eq!(
            expand_scenarios(&["keep-cloud".to_string()]),
            vec!["keep-cloud"]
        );
    }

    #[test]
    fn listing_is_skipped_unless_requested() {
        assert!(!maybe_list_scenarios(&base_args()).unwrap());
    }

    #[tokio::test]
    async fn unknown_scenarios_are_skipped() {
        let args = base_args();
        let results = run_scenarios(&args, &["missing".to_string()], &[1]).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn reference_flows_pass_and_report_as_json() {
        let path = temp_output("json");
        let mut args = base_args();
        args.output = Some(path.clone());
        let scenarios = expand_scenarios(&split_csv("a,b,c,d,e"));
        let results = run_scenarios(&args, &scenarios, &[1337, 7]).await;
        assert_eq!(results.len(), 10);
        for result in &results {
            assert!(result.passed, "{}: {:?}", result.scenario_name, result.failures);
        }

        write_reports(&args, &results, Instant::now()).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<ScenarioResult> = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.len(), 10);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn property_sweeps_hold_across_seeds() {
        let mut args = base_args();
        args.iterations = 5;
        let scenarios = expand_scenarios(&split_csv(
            "cancel-releases-guard,no-prompt-without-cloud,prompt-on-cloud-record,\
             keep-local-idempotent,codec-round-trip,deterministic-commits",
        ));
        let results = run_scenarios(&args, &scenarios, &[1, 2, 3]).await;
        assert_eq!(results.len(), 18);
        for result in &results {
            assert!(result.passed, "{}: {:?}", result.scenario_name, result.failures);
        }
    }
}
