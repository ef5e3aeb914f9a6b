pub mod build;
pub mod query;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "taxonaut")]
#[command(about = "Taxonomic classification of short reads against a sketch database")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a reference database from FASTA files and a taxonomy dump
    Build(build::BuildArgs),
    /// Classify reads against a database
    Query(query::QueryArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Build(args) => build::run(args),
        Commands::Query(args) => query::run(args),
    }
}
