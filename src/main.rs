//! # Flowcost
//!
//! Static cost analysis for LLM agent frameworks
//!
//! ## Key Components
//! - [`run_analysis`] - Scan a source tree, detect the framework, optimize
//! - Detector selection: highest confidence score wins; low scores abort

mod autogen;
mod calculator;
mod detector;
mod display;
mod langchain;
mod optimizer;
mod pyscan;
mod scan;

use anyhow::{Context, Result};
use clap::Parser;
use log::debug;
use serde::Serialize;
use std::path::PathBuf;

use crate::detector::DetectionResult;
use crate::optimizer::{OptimizationEngine, OptimizedWorkflow};

/// Below this confidence score the analysis cannot proceed.
const MIN_CONFIDENCE_SCORE: f64 = 10.0;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Flowcost - static cost analysis for LLM agent frameworks"
)]
struct Args {
    /// Source tree to analyze
    path: PathBuf,

    /// Output the full analysis as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Restrict detection to one framework (langchain, autogen)
    #[arg(long)]
    framework: Option<String>,

    /// Skip files larger than this many bytes
    #[arg(long, default_value_t = 512 * 1024)]
    max_file_size: u64,
}

#[derive(Serialize)]
struct AnalysisReport<'a> {
    detection: &'a DetectionResult,
    workflow: &'a OptimizedWorkflow,
}

fn run_analysis(args: &Args) -> Result<(DetectionResult, OptimizedWorkflow)> {
    let files = scan::scan_tree(&args.path, args.max_file_size)?;

    if files.contents.is_empty() {
        anyhow::bail!(
            "No analyzable source files found in {}. Expected Python sources or framework config files.",
            args.path.display()
        );
    }
    debug!("loaded {} files for analysis", files.contents.len());

    let mut detectors = detector::all_detectors();
    if let Some(framework) = &args.framework {
        let framework = framework.to_lowercase();
        detectors.retain(|d| d.framework_name() == framework);
        if detectors.is_empty() {
            anyhow::bail!(
                "Unknown framework '{}'. Supported frameworks: langchain, autogen",
                framework
            );
        }
    }

    // Run every registered detector and keep the best-scoring result
    let best = detectors
        .iter()
        .map(|d| {
            let result = d.detect(&files);
            debug!(
                "{}: score {:.0} ({} components)",
                result.framework,
                result.confidence_score,
                result.components.len()
            );
            result
        })
        .max_by(|a, b| a.confidence_score.total_cmp(&b.confidence_score))
        .context("No detectors registered")?;

    if best.confidence_score < MIN_CONFIDENCE_SCORE {
        anyhow::bail!(
            "No supported framework detected in {} (best candidate '{}' scored {:.0}/100). \
             Flowcost currently understands LangChain and AutoGen projects.",
            args.path.display(),
            best.framework,
            best.confidence_score
        );
    }

    let workflow = OptimizationEngine::new().optimize_workflow(&best);
    Ok((best, workflow))
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    }

    let (detection, workflow) = run_analysis(&args)?;

    if args.json {
        let report = AnalysisReport {
            detection: &detection,
            workflow: &workflow,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", display::format_summary(&detection, &workflow));
    }

    Ok(())
}
