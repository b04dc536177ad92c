use anyhow::Context;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use layerpack_core::{pipeline, BuildSettings, LayeringRequest};

mod cli;

use cli::{LayerCommand, LayerpackCli};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = LayerpackCli::parse();
    init_tracing(cli.quiet, cli.verbose);

    execute(&cli.command).map_err(|err| eyre!("{err:?}"))
}

fn init_tracing(quiet: bool, verbose: u8) {
    let level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("layerpack={level},layerpack_core={level},layerpack_domain={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn execute(command: &LayerCommand) -> anyhow::Result<()> {
    let request = build_request(command);
    let output = &command.layer_args().output;
    pipeline::run(&request, output).with_context(|| {
        format!(
            "failed to build layers from {}",
            request.closure_graph.display()
        )
    })?;
    Ok(())
}

fn build_request(command: &LayerCommand) -> LayeringRequest {
    let args = command.layer_args();
    let settings = args
        .workers
        .filter(|workers| *workers > 0)
        .map_or_else(BuildSettings::from_env, |workers| BuildSettings { workers });
    LayeringRequest {
        parents: args.parents.clone(),
        exclude: args.ignore.clone(),
        perms: args.perms.clone(),
        rewrites: args.rewrites.clone(),
        history: args.history.clone(),
        max_layers: usize::try_from(args.max_layers).unwrap_or(0),
        sort: args.sort_by,
        tar_directory: command.tar_directory().cloned(),
        settings,
        ..LayeringRequest::new(&args.closure_graph)
    }
}
