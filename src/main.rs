//! romswitch - multi-ROM boot orchestrator.
//!
//! Runs inside the boot ramdisk before the real init:
//! - discovers installed ROMs (local and on removable media)
//! - swaps the selected ROM into the data partition root or mounts its storage
//! - loads a new kernel with kexec when the ROM brings its own
//!
//! The exit code of `run` is the exit-action bitmask for the bootstrap script.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use romswitch::boot::UiChoice;
use romswitch::commands;
use romswitch::config::Config;

#[derive(Parser)]
#[command(name = "romswitch")]
#[command(about = "Boot one of several installed ROMs")]
#[command(
    after_help = "QUICK START:\n  romswitch preflight  Check tools and kernel support\n  romswitch list       Show installed ROMs\n  romswitch run        Prepare the selected ROM for boot"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Select a ROM and prepare the system to boot it
    Run {
        #[command(flatten)]
        choice: ChoiceArgs,

        /// Seconds to wait for removable media before selecting
        #[arg(long, value_name = "SECS")]
        wait_usb: Option<u64>,
    },

    /// List installed ROMs
    List {
        /// Also mount removable media and list ROMs found there
        #[arg(long)]
        usb: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Run preflight checks
    Preflight {
        /// Exit with an error if any check fails
        #[arg(long)]
        strict: bool,
    },

    /// Inspect Android boot images
    Bootimg {
        #[command(subcommand)]
        action: BootimgAction,
    },

    /// Print the patched form of an init script
    PatchRc {
        /// Script to patch
        file: PathBuf,
    },
}

#[derive(Args)]
#[group(multiple = false)]
struct ChoiceArgs {
    /// Boot this ROM instead of the auto-boot or current one
    #[arg(long, value_name = "NAME")]
    rom: Option<String>,
    /// Reboot
    #[arg(long)]
    reboot: bool,
    /// Reboot to recovery
    #[arg(long)]
    recovery: bool,
    /// Reboot to bootloader
    #[arg(long)]
    bootloader: bool,
    /// Power off
    #[arg(long)]
    shutdown: bool,
}

impl ChoiceArgs {
    fn into_choice(self) -> Option<UiChoice> {
        if let Some(name) = self.rom {
            Some(UiChoice::Boot(name))
        } else if self.reboot {
            Some(UiChoice::Reboot)
        } else if self.recovery {
            Some(UiChoice::RebootRecovery)
        } else if self.bootloader {
            Some(UiChoice::RebootBootloader)
        } else if self.shutdown {
            Some(UiChoice::Shutdown)
        } else {
            None
        }
    }
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show resolved configuration
    Config,
    /// Show persisted status
    Status,
}

#[derive(Subcommand)]
enum BootimgAction {
    /// Print header fields
    Info { image: PathBuf },
    /// Extract kernel and ramdisk
    Extract {
        image: PathBuf,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { choice, wait_usb } => {
            let config = Config::load()?;
            let exit = commands::cmd_run(&config, choice.into_choice(), wait_usb)?;
            std::process::exit(exit.bits() as i32);
        }

        Commands::List { usb, json } => {
            let config = Config::load()?;
            commands::cmd_list(&config, usb, json)?;
        }

        Commands::Show { what } => {
            let config = Config::load()?;
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::Status => commands::show::ShowTarget::Status,
            };
            commands::cmd_show(show_target, &config)?;
        }

        Commands::Preflight { strict } => {
            let config = Config::load()?;
            commands::cmd_preflight(&config, strict)?;
        }

        Commands::Bootimg { action } => match action {
            BootimgAction::Info { image } => commands::cmd_bootimg_info(&image)?,
            BootimgAction::Extract { image, out } => commands::cmd_bootimg_extract(&image, &out)?,
        },

        Commands::PatchRc { file } => {
            commands::cmd_patch_rc(&file)?;
        }
    }

    Ok(())
}
