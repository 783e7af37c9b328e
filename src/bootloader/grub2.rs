//! grub-mkconfig output detection.
//!
//! A generated `grub.cfg` is rewritten by its generator on every kernel
//! change, so it is never parsed for entries. Instead the generator is rerun
//! once the kernels are gone.

use std::path::Path;

use super::PostCleanup;

/// Generators whose banner marks a config as generated, in match order.
pub const GENERATORS: &[&str] = &["grub2-mkconfig", "grub-mkconfig"];

/// Banner written at the very top of a config generated by `generator`.
pub fn autogen_banner(generator: &str) -> String {
    format!("#\n# DO NOT EDIT THIS FILE\n#\n# It is automatically generated by {generator}")
}

/// The generator that produced `content`, if it starts with a known banner.
pub fn detect_generator(content: &str) -> Option<&'static str> {
    GENERATORS
        .iter()
        .copied()
        .find(|generator| content.starts_with(&autogen_banner(generator)))
}

/// Hook that regenerates `config_path` with `generator`.
pub fn regenerate(generator: &str, config_path: &Path) -> PostCleanup {
    PostCleanup::Command {
        program: generator.to_string(),
        args: vec!["-o".to_string(), config_path.to_string_lossy().into_owned()],
    }
}
