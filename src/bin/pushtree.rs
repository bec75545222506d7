// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use pushtree::{
    archive::Archive,
    config::Settings,
    deploy::{DeployOptions, Deployer},
    pack::{PackOptions, Packer},
    path::{default_artifacts_dir, default_config_path},
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  pushtree [options] build --archive <file> --local <dir>\n  pushtree [options] deploy --archive <file> --remote <dir>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file to use instead of the default.
    #[arg(short, long, global = true, value_name = "file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let settings = match &self.config {
            Some(path) => Settings::load(path, true)?,
            None => match default_config_path() {
                Ok(path) => Settings::load(path, false)?,
                Err(_) => Settings::default(),
            },
        };

        Ok(settings)
    }

    fn run(self, settings: Settings) -> Result<()> {
        match self.command {
            Command::Build(opts) => run_build(opts, settings),
            Command::Deploy(opts) => run_deploy(opts, settings),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Pack local root into archive.
    #[command(override_usage = "pushtree build [options] --archive <file> --local <dir>")]
    Build(BuildOptions),

    /// Reconcile remote root against archive.
    #[command(override_usage = "pushtree deploy [options] --archive <file> --remote <dir>")]
    Deploy(DeployCliOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct BuildOptions {
    /// Path of archive to write.
    #[arg(short, long, value_name = "file")]
    pub archive: PathBuf,

    /// Local root to pack.
    #[arg(short, long, value_name = "dir")]
    pub local: PathBuf,

    /// Walk and filter local root without writing the archive.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Do not list every packed file.
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DeployCliOptions {
    /// Path of archive to deploy.
    #[arg(short, long, value_name = "file")]
    pub archive: PathBuf,

    /// Remote root to reconcile.
    #[arg(short, long, value_name = "dir")]
    pub remote: PathBuf,

    /// Root to move overwritten and removed files into.
    #[arg(short = 'A', long, value_name = "dir")]
    pub artifacts: Option<PathBuf>,

    /// Walk and diff remote root without touching it.
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

fn main() {
    let cli = Cli::parse();
    let settings = cli.settings();
    let log = settings
        .as_ref()
        .ok()
        .and_then(|settings| settings.log.clone())
        .unwrap_or_else(|| "info".into());

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = settings.and_then(|settings| cli.run(settings)) {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run_build(opts: BuildOptions, settings: Settings) -> Result<()> {
    let options = PackOptions {
        dry_run: opts.dry_run,
        quiet: opts.quiet || settings.build.quiet,
    };

    let report = Packer::new(opts.local, options).pack(&opts.archive)?;
    if !report.skipped.is_empty() {
        warn!("{} unreadable files were left out", report.skipped.len());
    }

    Ok(())
}

fn run_deploy(opts: DeployCliOptions, settings: Settings) -> Result<()> {
    let artifacts = opts
        .artifacts
        .or(settings.deploy.artifacts)
        .unwrap_or_else(default_artifacts_dir);

    let mut archive = Archive::open(&opts.archive)?;
    let deployer = Deployer::new(
        opts.remote,
        artifacts,
        DeployOptions {
            dry_run: opts.dry_run,
        },
    );
    let report = deployer.deploy(&mut archive)?;

    if report.is_noop() {
        info!("{:?} is already up to date", deployer.remote_root().display());
    }

    Ok(())
}
