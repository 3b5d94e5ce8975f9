//! Inspect command - show a model's tensor contract.

use std::path::PathBuf;

use clap::Args;
use console::style;

use infera_core::{LayerMap, NetworkInfo};

use super::{load_config, open_launcher, override_model, OutputFormat};

/// Arguments for the inspect command.
#[derive(Args)]
pub struct InspectArgs {
    /// Model file, overriding the configured source
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Reshape an input before printing, e.g. data=1,3,224,224
    #[arg(long, value_name = "NAME=DIMS")]
    reshape: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,
}

pub fn run(args: InspectArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    override_model(&mut config, args.model.as_ref());

    let launcher = open_launcher(&config, &args.reshape)?;
    let info = launcher.network_info();

    let output = match args.format {
        OutputFormat::Json => serde_json::to_string_pretty(info.as_ref())?,
        OutputFormat::Csv => format_csv(&info)?,
        OutputFormat::Text => format_text(launcher.provider(), &info),
    };
    println!("{}", output);

    Ok(())
}

fn format_csv(info: &NetworkInfo) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["kind", "name", "shape", "layout", "precision"])?;

    for (kind, layers) in [("input", &info.inputs_info), ("output", &info.outputs_info)] {
        for (name, meta) in layers {
            wtr.write_record([
                kind.to_string(),
                name.clone(),
                format_shape(&meta.shape),
                meta.layout.clone(),
                meta.precision.clone(),
            ])?;
        }
    }

    let data = String::from_utf8(wtr.into_inner()?)?;
    Ok(data)
}

fn format_text(provider: &str, info: &NetworkInfo) -> String {
    let mut output = String::new();

    output.push_str(&format!("Provider: {}\n", provider));
    output.push_str(&format!("Generation: {}\n", info.generation()));
    output.push('\n');
    push_layers(&mut output, "Inputs", &info.inputs_info);
    output.push('\n');
    push_layers(&mut output, "Outputs", &info.outputs_info);

    output.truncate(output.trim_end().len());
    output
}

fn push_layers(output: &mut String, title: &str, layers: &LayerMap) {
    output.push_str(&format!("{}:\n", style(title).bold()));
    for (name, meta) in layers {
        let layout = if meta.layout.is_empty() { "-" } else { meta.layout.as_str() };
        output.push_str(&format!(
            "  {:<24} {:<20} {:<6} {}\n",
            name,
            format_shape(&meta.shape),
            layout,
            meta.precision
        ));
    }
}

/// Render a shape with `?` for dynamic dimensions.
fn format_shape(shape: &[i64]) -> String {
    let dims: Vec<String> = shape
        .iter()
        .map(|&d| if d < 0 { "?".to_string() } else { d.to_string() })
        .collect();
    format!("[{}]", dims.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use infera_core::{Metadata, TensorType};

    fn info() -> NetworkInfo {
        let inputs = LayerMap::from([(
            "data".to_string(),
            Metadata::new("data")
                .with_shape(vec![-1, 3, 224, 224])
                .with_layout("NCHW")
                .with_type(TensorType::Float32),
        )]);
        let outputs = LayerMap::from([(
            "prob".to_string(),
            Metadata::new("prob")
                .with_shape(vec![1, 1000])
                .with_type(TensorType::Float32),
        )]);
        NetworkInfo::new(inputs, outputs, 2).unwrap()
    }

    #[test]
    fn test_format_shape() {
        assert_eq!(format_shape(&[-1, 3, 224, 224]), "[?, 3, 224, 224]");
        assert_eq!(format_shape(&[]), "[]");
    }

    #[test]
    fn test_format_csv() {
        let csv = format_csv(&info()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[1], "input,data,\"[?, 3, 224, 224]\",NCHW,FP32");
        assert_eq!(lines[2], "output,prob,\"[1, 1000]\",,FP32");
    }

    #[test]
    fn test_format_text() {
        let text = format_text("tract", &info());
        assert!(text.contains("Provider: tract"));
        assert!(text.contains("Generation: 2"));
        assert!(text.contains("[1, 1000]"));
    }
}
