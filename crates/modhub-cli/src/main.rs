#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use commands::RegistryArgs;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "modhub")]
#[command(author, version, about = "Resolve, install and publish modhub modules", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(flatten)]
    registry: RegistryArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Resolve and install every dependency of a host manifest
    Install {
        /// Host manifest file or the directory holding modhub.json
        #[arg(value_name = "PATH")]
        manifest: Option<PathBuf>,

        /// Install into <name>@<version> directories
        #[arg(long)]
        versioned: bool,

        /// Directory modules are installed into, relative to the manifest
        #[arg(long, value_name = "DIR")]
        modules_dir: Option<String>,
    },

    /// Resolve a host manifest and print its dependency trees
    Resolve {
        /// Host manifest file or the directory holding modhub.json
        #[arg(value_name = "PATH")]
        manifest: Option<PathBuf>,
    },

    /// Pack a module directory and publish it to the local store
    Publish {
        /// Module directory
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Module name (defaults to the name in the directory's modhub.json)
        #[arg(long)]
        name: Option<String>,

        /// Exact version (defaults to the version in the directory's modhub.json)
        #[arg(long = "module-version", value_name = "VERSION")]
        version: Option<String>,

        /// Extra dependency as name=spec (repeatable)
        #[arg(long = "dep", value_name = "NAME=SPEC")]
        deps: Vec<String>,
    },

    /// Remove a published version from the local store
    Unpublish {
        /// Module name
        name: String,

        /// Exact version
        version: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let Some(command) = cli.command else {
        return commands::version::run(cli.json);
    };

    logging::init(cli.verbose, cli.json);

    match command {
        Commands::Version => commands::version::run(cli.json),
        Commands::Install {
            manifest,
            versioned,
            modules_dir,
        } => {
            let options = commands::install::InstallOptions {
                manifest: commands::in_cwd(&cwd, manifest),
                versioned,
                modules_dir,
            };
            commands::install::run(&cli.registry, options, cli.json)
        }
        Commands::Resolve { manifest } => {
            commands::resolve::run(&cli.registry, &commands::in_cwd(&cwd, manifest), cli.json)
        }
        Commands::Publish {
            dir,
            name,
            version,
            deps,
        } => {
            let options = commands::publish::PublishOptions {
                dir: commands::in_cwd(&cwd, dir),
                name,
                version,
                deps,
            };
            commands::publish::run(&cli.registry, options, cli.json)
        }
        Commands::Unpublish { name, version } => {
            commands::publish::unpublish(&cli.registry, &name, &version, cli.json)
        }
    }
}
