//! Shared utilities across romswitch modules.

pub mod files;

pub use files::{create_dir_mode, remove_if_exists, set_mode, touch, write_file_mode, write_file_with_dirs};
