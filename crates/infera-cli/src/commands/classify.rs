//! Classify command - run a classification model over images.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use infera_core::{Classification, Model, Prediction};

use super::{load_config, open_launcher, override_model, OutputFormat};

/// Arguments for the classify command.
#[derive(Args)]
pub struct ClassifyArgs {
    /// Image files or glob patterns
    #[arg(required = true)]
    input: Vec<String>,

    /// Model file, overriding the configured source
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Labels file (`<id> <label>,<synonyms>` per line)
    #[arg(short, long)]
    labels: Option<PathBuf>,

    /// Number of predictions per image
    #[arg(short = 'k', long)]
    topk: Option<u32>,

    /// Reshape an input before running, e.g. data=1,3,224,224
    #[arg(long, value_name = "NAME=DIMS")]
    reshape: Vec<String>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Continue on error
    #[arg(long)]
    continue_on_error: bool,
}

/// Predictions for one image.
#[derive(Serialize)]
struct ImageResult {
    path: PathBuf,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    predictions: Vec<Prediction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    processing_time_ms: u64,
}

pub fn run(args: ClassifyArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = load_config(config_path)?;
    override_model(&mut config, args.model.as_ref());
    if let Some(labels) = &args.labels {
        config
            .model
            .insert("path_to_labels".to_string(), json!(labels.to_string_lossy()));
    }
    if let Some(topk) = args.topk {
        config.model.insert("topk".to_string(), json!(topk));
    }

    let files = expand_inputs(&args.input)?;
    if files.is_empty() {
        anyhow::bail!("No matching images found for: {}", args.input.join(", "));
    }
    info!("Found {} image(s) to classify", files.len());

    let mut launcher = open_launcher(&config, &args.reshape)?;
    let model = config.classification(launcher.as_ref())?;

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} images")?
            .progress_chars("=>-"),
    );
    if files.len() == 1 {
        pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    let mut results = Vec::with_capacity(files.len());
    for path in files {
        let file_start = Instant::now();
        let outcome = classify_file(&path, &model, launcher.as_mut());
        let processing_time_ms = file_start.elapsed().as_millis() as u64;

        match outcome {
            Ok(predictions) => results.push(ImageResult {
                path,
                predictions,
                error: None,
                processing_time_ms,
            }),
            Err(e) => {
                let error_msg = e.to_string();
                if args.continue_on_error {
                    warn!("Failed to classify {}: {}", path.display(), error_msg);
                    results.push(ImageResult {
                        path,
                        predictions: Vec::new(),
                        error: Some(error_msg),
                        processing_time_ms,
                    });
                } else {
                    pb.abandon();
                    error!("Failed to classify {}: {}", path.display(), error_msg);
                    anyhow::bail!("Classification failed for {}: {}", path.display(), error_msg);
                }
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let output = match args.format {
        OutputFormat::Json => serde_json::to_string_pretty(&results)?,
        OutputFormat::Csv => format_csv(&results)?,
        OutputFormat::Text => format_text(&results),
    };

    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        println!(
            "{} Results written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }

    let failed = results.iter().filter(|r| r.error.is_some()).count();
    debug!(
        "Classified {} image(s) in {:?}, {} failed",
        results.len(),
        start.elapsed(),
        failed
    );

    Ok(())
}

fn expand_inputs(patterns: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let path = PathBuf::from(pattern);
        if path.exists() {
            files.push(path);
            continue;
        }
        let matches: Vec<PathBuf> = glob(pattern)?
            .filter_map(|r| r.ok())
            .filter(|p| {
                let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("");
                matches!(
                    ext.to_lowercase().as_str(),
                    "png" | "jpg" | "jpeg" | "bmp" | "tiff" | "tif" | "webp"
                )
            })
            .collect();
        if matches.is_empty() {
            anyhow::bail!("Input file not found: {}", pattern);
        }
        files.extend(matches);
    }
    Ok(files)
}

fn classify_file(
    path: &PathBuf,
    model: &Classification,
    launcher: &mut dyn infera_core::Launcher,
) -> anyhow::Result<Vec<Prediction>> {
    let image = image::open(path)?;
    debug!(
        "Loaded {} ({}x{})",
        path.display(),
        image.width(),
        image.height()
    );
    Ok(model.infer(launcher, image)?)
}

fn format_csv(results: &[ImageResult]) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record(["path", "rank", "index", "label", "score", "error"])?;

    for result in results {
        if let Some(error) = &result.error {
            wtr.write_record([
                result.path.display().to_string().as_str(),
                "",
                "",
                "",
                "",
                error.as_str(),
            ])?;
            continue;
        }
        for (rank, p) in result.predictions.iter().enumerate() {
            wtr.write_record([
                result.path.display().to_string(),
                (rank + 1).to_string(),
                p.index.to_string(),
                p.label.clone(),
                format!("{:.6}", p.score),
                String::new(),
            ])?;
        }
    }

    let data = String::from_utf8(wtr.into_inner()?)?;
    Ok(data)
}

fn format_text(results: &[ImageResult]) -> String {
    let mut output = String::new();

    for (i, result) in results.iter().enumerate() {
        if i > 0 {
            output.push('\n');
        }
        output.push_str(&format!("{}\n", style(result.path.display()).bold()));

        if let Some(error) = &result.error {
            output.push_str(&format!("  {} {}\n", style("✗").red(), error));
            continue;
        }

        for p in &result.predictions {
            let label = if p.label.is_empty() { "-" } else { p.label.as_str() };
            output.push_str(&format!(
                "  {:>6}  {:<30}  {:.4}\n",
                p.index,
                label,
                style(p.score).cyan()
            ));
        }
    }

    output.truncate(output.trim_end().len());
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> ImageResult {
        ImageResult {
            path: PathBuf::from("cat.png"),
            predictions: vec![
                Prediction {
                    index: 281,
                    label: "tabby".to_string(),
                    score: 0.75,
                },
                Prediction {
                    index: 285,
                    label: "Egyptian cat".to_string(),
                    score: 0.125,
                },
            ],
            error: None,
            processing_time_ms: 3,
        }
    }

    #[test]
    fn test_format_csv() {
        let csv = format_csv(&[result()]).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "path,rank,index,label,score,error");
        assert_eq!(lines[1], "cat.png,1,281,tabby,0.750000,");
        assert_eq!(lines[2], "cat.png,2,285,Egyptian cat,0.125000,");
    }

    #[test]
    fn test_format_text_lists_predictions() {
        let text = format_text(&[result()]);
        assert!(text.contains("cat.png"));
        assert!(text.contains("tabby"));
        assert!(text.contains("281"));
    }

    #[test]
    fn test_expand_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("*.png");
        let err = expand_inputs(&[pattern.to_string_lossy().to_string()]).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
