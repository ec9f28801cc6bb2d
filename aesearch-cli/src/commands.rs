//! CLI subcommand handlers.

use crate::{Commands, StageArgs};
use aesearch_core::config::{save_workspace_config, workspace_config_path};
use aesearch_core::{ConfigOverrides, SearchConfig, load_config};
use aesearch_ml::arch::{RandomArchitectureSampler, load_architectures};
use aesearch_ml::training::ReconstructionProbe;
use aesearch_ml::{ConvAutoencoder, SearchOrchestrator, select_best};
use ndarray::Array4;
use std::path::Path;

/// Handle a CLI subcommand.
pub fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Init { force } => handle_init(workspace, config_file, force),
        Commands::Plan { stage } => handle_plan(&stage, workspace, config_file),
        Commands::Run { stage, batch_size } => {
            handle_run(&stage, batch_size, workspace, config_file)
        }
        Commands::Rank { dir, k } => handle_rank(&dir, k),
        Commands::Inspect { arch_file, index } => handle_inspect(&arch_file, index),
    }
}

fn resolve_config(
    stage: &StageArgs,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<SearchConfig> {
    let overrides = ConfigOverrides {
        search_type: stage.search_type,
        n_ae_latents: stage.n_ae_latents,
        experiment_name: stage.experiment_name.clone(),
        save_dir: stage.save_dir.clone(),
    };
    load_config(Some(workspace), config_file, Some(&overrides))
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

fn handle_init(workspace: &Path, config_file: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let path = workspace_config_path(workspace);
    if path.exists() && !force {
        println!("Configuration file already exists at: {}", path.display());
        return Ok(());
    }

    let config = resolve_config(&StageArgs::default(), workspace, config_file)?;
    let path = save_workspace_config(workspace, &config)?;
    println!("Created configuration at: {}", path.display());
    Ok(())
}

fn handle_plan(
    stage: &StageArgs,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    let config = resolve_config(stage, workspace, config_file)?;
    let mut sampler = RandomArchitectureSampler::new(config.rng_seed_model);
    let orchestrator = SearchOrchestrator::new(config)?;
    let requests = orchestrator.plan(&mut sampler)?;
    println!("{}", serde_json::to_string_pretty(&requests)?);
    Ok(())
}

fn handle_run(
    stage: &StageArgs,
    batch_size: usize,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    let config = resolve_config(stage, workspace, config_file)?;
    let mut sampler = RandomArchitectureSampler::new(config.rng_seed_model);
    let mut trainer = ReconstructionProbe::new(batch_size);
    let orchestrator = SearchOrchestrator::new(config)?;

    let summary = orchestrator.run(&mut sampler, &mut trainer)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !summary.is_success() {
        anyhow::bail!(
            "{} of {} launches failed in stage {}",
            summary.failed.len(),
            summary.planned,
            summary.stage
        );
    }
    Ok(())
}

fn handle_rank(dir: &Path, k: usize) -> anyhow::Result<()> {
    let ranked = select_best(dir, k)?;
    if ranked.len() < k {
        tracing::warn!(
            requested = k,
            available = ranked.len(),
            "Fewer completed versions than requested"
        );
    }
    for (place, entry) in ranked.iter().enumerate() {
        println!(
            "{:>3}. {:<12} val_loss={:.6}  {}",
            place + 1,
            entry.version,
            entry.val_loss,
            entry.meta_tags.display()
        );
    }
    Ok(())
}

fn handle_inspect(arch_file: &Path, index: Option<usize>) -> anyhow::Result<()> {
    let archs = load_architectures(arch_file)?;
    let selected: Vec<_> = match index {
        Some(i) => {
            let arch = archs.get(i).ok_or_else(|| {
                anyhow::anyhow!("index {} out of range ({} entries)", i, archs.len())
            })?;
            vec![(i, arch.clone())]
        }
        None => archs.into_iter().enumerate().collect(),
    };

    for (i, arch) in selected {
        let input = arch.input_dim();
        let model = ConvAutoencoder::new(arch, 0);
        let x = Array4::zeros((1, input.channels, input.height, input.width));
        let out = model.forward(&x)?;
        anyhow::ensure!(
            out.output.dim() == x.dim(),
            "entry {}: reconstruction shape {:?} does not match input {:?}",
            i,
            out.output.dim(),
            x.dim()
        );

        println!("[{}] {}", i, model.architecture());
        println!(
            "    parameters: {}  memory (batch 1): {} bytes",
            model.parameter_count(),
            model.architecture().estimated_memory_bytes(1)
        );
    }
    Ok(())
}
