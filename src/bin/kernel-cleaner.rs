use std::path::PathBuf;
use std::process::ExitCode;
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kernel_cleaner::config::parse_bootloader_choice;
use kernel_cleaner::kernel::running_release;
use kernel_cleaner::preflight::check_all_writable;
use kernel_cleaner::removal::{remove_kernels, RemovalOptions};
use kernel_cleaner::{Config, Kernel, KernelError, LoadedConfig, PostCleanup};

/// Find installed kernel builds and remove the ones you name.
#[derive(Parser, Debug)]
#[command(name = "kernel-cleaner", version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v for debug output)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (default: user config, then /etc/kernel-cleaner.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding kernel images
    #[arg(long, global = true)]
    boot_dir: Option<PathBuf>,

    /// Directory holding module trees
    #[arg(long, global = true)]
    modules_dir: Option<PathBuf>,

    /// Bootloader to consult: auto, none, grub2, systemd-boot, grub, lilo
    #[arg(long, global = true)]
    bootloader: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List installed kernels
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Check that the given kernels could be removed
    Check {
        #[arg(required = true)]
        versions: Vec<String>,
    },

    /// Remove the given kernels
    Remove {
        /// Only show what would be removed
        #[arg(short, long)]
        pretend: bool,

        /// Also remove kernels the bootloader references or that are running
        #[arg(long)]
        force: bool,

        #[arg(required = true)]
        versions: Vec<String>,
    },
}

#[derive(Debug, Serialize)]
struct KernelReport {
    version: String,
    flags: String,
    real_kv: Option<String>,
    real_kv_error: Option<String>,
    referenced: bool,
    running: bool,
    mtime: Option<String>,
    files: Vec<PathBuf>,
}

struct Session {
    config: Config,
    kernels: Vec<Kernel>,
    bootloader: Option<LoadedConfig>,
    running: Option<String>,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self> {
        let mut config = Config::load(cli.config.as_deref())?;
        if let Some(dir) = &cli.boot_dir {
            config.boot_dir = dir.clone();
        }
        if let Some(dir) = &cli.modules_dir {
            config.modules_dir = dir.clone();
        }
        if let Some(raw) = &cli.bootloader {
            config.bootloader = parse_bootloader_choice(raw)?;
            config.bootloader_config = None;
        }

        let kernels = config
            .layout()
            .scan()
            .context("scanning for installed kernels")?;
        let bootloader = config
            .load_bootloader()
            .context("reading bootloader configuration")?;

        Ok(Self {
            config,
            kernels,
            bootloader,
            running: running_release(),
        })
    }

    fn is_referenced(&self, kernel: &Kernel) -> bool {
        self.bootloader
            .as_ref()
            .is_some_and(|b| b.references(kernel, &self.config.boot_dir))
    }

    fn is_running(&self, kernel: &Kernel) -> bool {
        self.running.as_deref() == Some(kernel.version())
    }

    fn select(&self, versions: &[String]) -> Result<Vec<&Kernel>> {
        let mut selected = Vec::new();
        for version in versions {
            match self.kernels.iter().find(|k| k.version() == version) {
                Some(kernel) => {
                    if !selected.iter().any(|k: &&Kernel| k.version() == version) {
                        selected.push(kernel);
                    }
                }
                None => bail!(
                    "no installed kernel with version '{}'; found: {}",
                    version,
                    self.kernels
                        .iter()
                        .map(|k| k.version())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }
        }
        Ok(selected)
    }

    fn report(&self, kernel: &Kernel) -> KernelReport {
        let (real_kv, real_kv_error) = match kernel.real_kv() {
            Ok(kv) => (kv, None),
            Err(e) => (None, Some(e.to_string())),
        };
        let mtime = match kernel.mtime() {
            Ok(t) => t.map(format_time),
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        };

        KernelReport {
            version: kernel.version().to_string(),
            flags: kernel.flags(),
            real_kv,
            real_kv_error,
            referenced: self.is_referenced(kernel),
            running: self.is_running(kernel),
            mtime,
            files: kernel.all_files().map(|p| p.to_path_buf()).collect(),
        }
    }
}

fn format_time(t: SystemTime) -> String {
    let dt = time::OffsetDateTime::from(t);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second()
    )
}

fn list(session: &Session, json: bool) -> Result<()> {
    let reports: Vec<KernelReport> = session.kernels.iter().map(|k| session.report(k)).collect();

    if json {
        let out = serde_json::to_string_pretty(&reports).context("serializing kernel list")?;
        println!("{out}");
        return Ok(());
    }

    match &session.bootloader {
        Some(b) if b.autogenerated => println!(
            "[bootloader] {} ({}, generated; entries not parsed)",
            b.bootloader,
            b.path.display()
        ),
        Some(b) => println!("[bootloader] {} ({})", b.bootloader, b.path.display()),
        None => println!("[bootloader] none"),
    }

    for report in &reports {
        let real = match (&report.real_kv, &report.real_kv_error) {
            (Some(kv), _) if kv != &report.version => format!("  real={kv} (mismatch)"),
            (Some(kv), _) => format!("  real={kv}"),
            (None, Some(_)) => "  real=unknown".to_string(),
            (None, None) => "  real=-".to_string(),
        };
        let mut tags = Vec::new();
        if report.referenced {
            tags.push("referenced");
        }
        if report.running {
            tags.push("running");
        }
        println!(
            "[kernel] {}  '{}'{}{}{}",
            report.version,
            report.flags,
            real,
            if tags.is_empty() {
                String::new()
            } else {
                format!("  ({})", tags.join(", "))
            },
            report
                .mtime
                .as_ref()
                .map(|t| format!("  {t}"))
                .unwrap_or_default()
        );
        if let Some(err) = &report.real_kv_error {
            println!("    [WARN] {err}");
        }
        for file in &report.files {
            println!("    {}", file.display());
        }
    }
    Ok(())
}

fn check(session: &Session, versions: &[String]) -> Result<()> {
    let selected = session.select(versions)?;
    check_all_writable(selected.iter().copied())?;
    for kernel in selected {
        println!("[OK] {} ({} files writable)", kernel.version(), kernel.all_files().count());
    }
    Ok(())
}

fn remove(session: &Session, versions: &[String], pretend: bool, force: bool) -> Result<()> {
    let selected = session.select(versions)?;

    if !force {
        for kernel in &selected {
            if session.is_running(kernel) {
                bail!(
                    "kernel {} is the running kernel; pass --force to remove it anyway",
                    kernel.version()
                );
            }
            if session.is_referenced(kernel) {
                bail!(
                    "kernel {} is referenced by the bootloader configuration; pass --force to remove it anyway",
                    kernel.version()
                );
            }
        }
    }

    let post_cleanup = session
        .bootloader
        .as_ref()
        .map(|b| b.post_cleanup.clone())
        .unwrap_or(PostCleanup::Nothing);
    let options = RemovalOptions {
        pretend,
        lock_file: session.config.lock_file.clone(),
    };

    let (report, hook_error) = remove_kernels(&selected, &post_cleanup, &options)?;

    let verb = if report.pretend { "would remove" } else { "removed" };
    for (version, files) in &report.removed {
        println!("[{verb}] {version}");
        for file in files {
            println!("    {}", file.display());
        }
    }
    println!(
        "{} {} files from {} kernels",
        if report.pretend { "Would remove" } else { "Removed" },
        report.file_count(),
        report.removed.len()
    );

    if let Some(err) = hook_error {
        eprintln!("  [WARN] bootloader post-cleanup failed: {err:#}");
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let session = Session::open(&cli)?;
    match &cli.command {
        Commands::List { json } => list(&session, *json),
        Commands::Check { versions } => check(&session, versions),
        Commands::Remove {
            pretend,
            force,
            versions,
        } => remove(&session, versions, *pretend, *force),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose > 0 { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Some(text) = err
                .chain()
                .find_map(|e| e.downcast_ref::<KernelError>())
                .and_then(KernelError::remediation)
            {
                eprintln!("\n{text}");
            }
            ExitCode::FAILURE
        }
    }
}
