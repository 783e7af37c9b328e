//! Discovery and safe removal of installed kernel builds.
//!
//! An installed kernel is scattered over several places: the image, system
//! map, config and initramfs in `/boot`, the module tree in `/lib/modules`,
//! and possibly a build directory the modules tree links to. This crate
//! gathers those files into one [`Kernel`] per version, reads the version
//! the image reports about itself, finds out which images the bootloader
//! still points at, and removes whole kernels only once every file is known
//! to be removable.
//!
//! - **Kernel model** - [`kernel::Kernel`] and the binary header reader
//! - **Layout** - configurable classification and scanning of kernel files
//! - **Bootloader** - referenced images and post-removal hooks per dialect
//! - **Preflight** - writability and host tool checks
//! - **Removal** - all-or-nothing deletion of selected kernels
//!
//! # Architecture
//!
//! ```text
//! Layout::scan ──> Vec<Kernel> ──┬──> Kernel::real_kv      (image header)
//!                                ├──> LoadedConfig::references
//!                                └──> removal::remove_kernels
//!                                         ├── preflight::check_all_writable
//!                                         └── PostCleanup::run
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use kernel_cleaner::Config;
//!
//! let config = Config::load(None)?;
//! let kernels = config.layout().scan()?;
//! let bootloader = config.load_bootloader()?;
//! for kernel in &kernels {
//!     let used = bootloader
//!         .as_ref()
//!         .is_some_and(|b| b.references(kernel, &config.boot_dir));
//!     println!("{kernel:?} referenced={used}");
//! }
//! ```

pub mod bootloader;
pub mod config;
pub mod error;
pub mod kernel;
pub mod layout;
pub mod preflight;
pub mod process;
pub mod removal;

pub use bootloader::{Bootloader, LoadedConfig, PostCleanup};
pub use config::Config;
pub use error::KernelError;
pub use kernel::{GenericFile, Kernel, PartKind};
pub use layout::Layout;
