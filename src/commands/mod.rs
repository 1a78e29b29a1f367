//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `run` - Select, prepare and hand over to a ROM
//! - `list` - Print the ROM catalog
//! - `show` - Display configuration or status
//! - `preflight` - Run preflight checks
//! - `bootimg` - Inspect or unpack a boot image
//! - `patch_rc` - Preview init script patching

mod bootimg;
mod list;
mod patch_rc;
mod preflight;
mod run;
pub mod show;

pub use bootimg::{cmd_bootimg_extract, cmd_bootimg_info};
pub use list::cmd_list;
pub use patch_rc::cmd_patch_rc;
pub use preflight::cmd_preflight;
pub use run::{cmd_run, CliSelector};
pub use show::cmd_show;
