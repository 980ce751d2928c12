use anyhow::{anyhow, Result};
use clap::{arg, ArgAction, Command};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sparsenet_model::{squared_error, SparseNet, SparseNetConfig};
use sparsenet_utils::{compress_obj, dejsonify, jsonify, read_json_arg, seed_from_str};
use std::{fs, path::PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InferenceOutput {
    pub predictions: Vec<Vec<f32>>,
    pub iterations: usize,
    pub converged: bool,
    pub relative_change: f32,
    pub average_inner_loss: f32,
    pub sparsity: f32,
    pub squared_error: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ShapeSummary {
    pub code_shape: [usize; 3],
    pub expander_width: usize,
    pub feature_len: usize,
    pub patch_len: usize,
}

fn cli() -> Command {
    Command::new("sparsenet-runtime")
        .about("Runs sparse-code inference on image patches")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("infer")
                .about("Infers sparse codes and reconstructs a batch of patches")
                .arg(
                    arg!(<SETTINGS> "Config json string or path to json file")
                        .value_parser(clap::value_parser!(String)),
                )
                .arg(
                    arg!(<SEED> "A string used to seed the dictionary and expander weights")
                        .value_parser(clap::value_parser!(String)),
                )
                .arg(
                    arg!(<PATCHES> "Json array of flattened patches, path to json file, or '-' for stdin")
                        .value_parser(clap::value_parser!(String)),
                )
                .arg(
                    arg!(--output [OUTPUT_FILE] "If set, the output data will be saved to this file path (default json)")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--compress [COMPRESS] "If output file is set, the output data will be compressed as zlib")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("check_config")
                .about("Validates a config and prints the derived shapes")
                .arg(
                    arg!(<SETTINGS> "Config json string or path to json file")
                        .value_parser(clap::value_parser!(String)),
                ),
        )
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();

    if let Err(e) = match matches.subcommand() {
        Some(("infer", sub_m)) => infer(
            sub_m.get_one::<String>("SETTINGS").unwrap().clone(),
            sub_m.get_one::<String>("SEED").unwrap().clone(),
            sub_m.get_one::<String>("PATCHES").unwrap().clone(),
            sub_m.get_one::<PathBuf>("output").cloned(),
            *sub_m.get_one::<bool>("compress").unwrap(),
        ),
        Some(("check_config", sub_m)) => {
            check_config(sub_m.get_one::<String>("SETTINGS").unwrap().clone())
        }
        _ => Err(anyhow!("Invalid subcommand")),
    } {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

pub fn infer(
    settings: String,
    seed: String,
    patches: String,
    output_file: Option<PathBuf>,
    compress: bool,
) -> Result<()> {
    let config = load_config(&settings)?;
    let targets = load_patches(&patches, config.patch_len())?;
    let mut model = SparseNet::new(config, seed_from_str(&seed))?;
    tracing::info!(
        "Running inference on {} patches of {} pixels",
        targets.nrows(),
        targets.ncols()
    );

    let predictions = model.infer_and_reconstruct(&targets.view())?;
    let report = model
        .last_report()
        .ok_or_else(|| anyhow!("Inference finished without a report"))?;
    let output_data = InferenceOutput {
        predictions: predictions.outer_iter().map(|row| row.to_vec()).collect(),
        iterations: report.iterations,
        converged: report.converged,
        relative_change: report.relative_change,
        average_inner_loss: model.average_inner_loss(),
        sparsity: report.sparsity(),
        squared_error: squared_error(&targets.view(), &predictions.view())?,
    };
    tracing::info!(
        "Finished after {} iterations (converged: {})",
        output_data.iterations,
        output_data.converged
    );

    if let Some(path) = output_file {
        if compress {
            fs::write(&path, compress_obj(&output_data)?)?;
        } else {
            fs::write(&path, jsonify(&output_data)?)?;
        }
        println!("output_data written to: {:?}", path);
    } else {
        println!("{}", jsonify(&output_data)?);
    }
    Ok(())
}

pub fn check_config(settings: String) -> Result<()> {
    let config = load_config(&settings)?;
    let summary = ShapeSummary {
        code_shape: [config.num_channels, config.code_size, config.code_size],
        expander_width: config.expander_width(),
        feature_len: config.feature_len(),
        patch_len: config.patch_len(),
    };
    println!("{}", jsonify(&summary)?);
    Ok(())
}

fn load_config(settings: &str) -> Result<SparseNetConfig> {
    let settings = read_json_arg(settings)?;
    let config = dejsonify::<SparseNetConfig>(&settings)
        .map_err(|e| anyhow!("Failed to parse settings: {}", e))?;
    config.validate()?;
    Ok(config)
}

fn load_patches(patches: &str, patch_len: usize) -> Result<Array2<f32>> {
    let patches = read_json_arg(patches)?;
    let rows = dejsonify::<Vec<Vec<f32>>>(&patches)
        .map_err(|e| anyhow!("Failed to parse patches: {}", e))?;
    if let Some((i, row)) = rows
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() != patch_len)
    {
        return Err(anyhow!(
            "Patch {} has {} values, expected {}",
            i,
            row.len(),
            patch_len
        ));
    }
    let num_patches = rows.len();
    Ok(Array2::from_shape_vec(
        (num_patches, patch_len),
        rows.into_iter().flatten().collect(),
    )?)
}
