use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use sofdec_usm::{Options, Summary};
use std::path::PathBuf;

/// Show the streams of USM files without decrypting them.
#[derive(Debug, Clone, Args)]
pub struct Probe {
    /// USM files to inspect.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Print the summaries as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    path: &'a PathBuf,
    #[serde(flatten)]
    summary: Summary,
}

impl Probe {
    pub fn execute(self, options: Options) -> Result<()> {
        let mut reports = vec![];

        for path in &self.inputs {
            let data = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
            let summary =
                sofdec_usm::probe(&data, options).with_context(|| format!("cannot probe {}", path.display()))?;
            reports.push(Report { path, summary });
        }

        if self.json {
            println!("{}", serde_json::to_string_pretty(&reports)?);
            return Ok(());
        }

        for report in &reports {
            print_summary(report);
        }

        Ok(())
    }
}

fn print_summary(report: &Report) {
    let summary = &report.summary;

    println!("{}", report.path.display().to_string().bold());
    println!("  filename: {}", summary.metadata.filename);
    println!("  format version: {:#010x}", summary.metadata.format_version);
    println!(
        "  encrypted: {}",
        if summary.encrypted {
            "yes".yellow()
        } else {
            "no".green()
        }
    );

    for stream in &summary.streams {
        let codec = stream
            .codec
            .map(|x| x.to_string())
            .unwrap_or_else(|| "unsupported".to_owned());

        println!(
            "  {} {} ({} frames, {} pages, {} keyframes)",
            stream.id.to_string().cyan(),
            codec,
            stream.frames,
            stream.pages,
            stream.keyframes
        );

        if let Some(header) = &stream.header {
            let fields = header
                .columns()
                .iter()
                .filter_map(|x| header.get(0, &x.name).map(|v| format!("{}={}", x.name, v)))
                .collect::<Vec<_>>()
                .join(" ");
            println!("    {}", fields.dimmed());
        }
    }
}
