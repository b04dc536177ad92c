use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use layerpack_core::SortStrategy;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Group the store paths of a Nix closure into OCI image layers",
    disable_help_subcommand = true
)]
pub struct LayerpackCli {
    #[arg(short, long, help = "Only log warnings and errors", global = true)]
    pub quiet: bool,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Increase logging (-vv reaches trace)",
        global = true
    )]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: LayerCommand,
}

#[derive(Subcommand, Debug)]
pub enum LayerCommand {
    /// Compute layer digests in memory; store paths are expected to rebuild bit for bit.
    #[command(name = "layers-from-reproducible-storepaths")]
    Reproducible(LayerArgs),
    /// Compute layers and keep their tarballs, for paths that cannot be rebuilt identically.
    #[command(name = "layers-from-non-reproducible-storepaths")]
    NonReproducible(NonReproducibleArgs),
}

impl LayerCommand {
    pub fn layer_args(&self) -> &LayerArgs {
        match self {
            Self::Reproducible(args) => args,
            Self::NonReproducible(args) => &args.layers,
        }
    }

    pub fn tar_directory(&self) -> Option<&PathBuf> {
        match self {
            Self::Reproducible(_) => None,
            Self::NonReproducible(args) => Some(&args.tar_directory),
        }
    }
}

#[derive(Args, Debug)]
pub struct LayerArgs {
    #[arg(value_name = "OUTPUT", help = "Layers file to write")]
    pub output: PathBuf,
    #[arg(value_name = "CLOSURE_GRAPH", help = "Closure graph JSON of the image contents")]
    pub closure_graph: PathBuf,
    #[arg(
        value_name = "PARENT_LAYERS",
        help = "Layers files whose store paths are already in the image"
    )]
    pub parents: Vec<PathBuf>,
    #[arg(long, value_name = "STORE_PATH", help = "Store path to leave out of every layer")]
    pub ignore: Option<String>,
    #[arg(long, value_name = "FILE", help = "Permission overrides JSON")]
    pub perms: Option<PathBuf>,
    #[arg(long, value_name = "FILE", help = "Path rewrites JSON")]
    pub rewrites: Option<PathBuf>,
    #[arg(long, value_name = "FILE", help = "OCI history entry JSON copied into every layer")]
    pub history: Option<PathBuf>,
    #[arg(
        long,
        value_name = "N",
        default_value_t = 1,
        allow_negative_numbers = true,
        help = "Maximum number of layers to produce"
    )]
    pub max_layers: i64,
    #[arg(
        long,
        value_name = "STRATEGY",
        default_value_t = SortStrategy::Popularity,
        help = "Store path ranking: popularity or nar-size"
    )]
    pub sort_by: SortStrategy,
    #[arg(
        long,
        value_name = "N",
        help = "Layers archived in parallel (defaults to LAYERPACK_WORKERS, then 64)"
    )]
    pub workers: Option<usize>,
}

#[derive(Args, Debug)]
pub struct NonReproducibleArgs {
    #[command(flatten)]
    pub layers: LayerArgs,
    #[arg(long, value_name = "DIR", help = "Directory receiving the layer tarballs")]
    pub tar_directory: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        LayerpackCli::command().debug_assert();
    }

    #[test]
    fn shared_flags_parse_for_both_subcommands() {
        let cli = LayerpackCli::parse_from([
            "layerpack",
            "-vv",
            "layers-from-non-reproducible-storepaths",
            "out.json",
            "closure.json",
            "base.json",
            "deps.json",
            "--max-layers",
            "-3",
            "--sort-by",
            "nar-size",
            "--tar-directory",
            "tars",
        ]);

        assert_eq!(cli.verbose, 2);
        let args = cli.command.layer_args();
        assert_eq!(args.parents.len(), 2);
        assert_eq!(args.max_layers, -3);
        assert_eq!(args.sort_by, SortStrategy::NarSize);
        assert_eq!(cli.command.tar_directory(), Some(&PathBuf::from("tars")));
    }

    #[test]
    fn tar_directory_is_required_for_non_reproducible_paths() {
        let result = LayerpackCli::try_parse_from([
            "layerpack",
            "layers-from-non-reproducible-storepaths",
            "out.json",
            "closure.json",
        ]);

        assert!(result.is_err());
    }
}
