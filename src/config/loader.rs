//! Configuration loader: assembles the layered sources into a `ForgeConfig`.

use super::merge::merge_policy;
use super::sources::{environment, global_file, workspace_file};
use super::ForgeConfig;
use config::{ConfigError, File};
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Precedence, lowest to highest: built-in defaults, the global file, the
    /// workspace files, then `TERMFORGE__*` environment variables.
    pub fn load(workspace_root: &Path) -> Result<ForgeConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = environment::add_to_builder(builder);
        builder.build()?.try_deserialize()
    }

    /// Load one explicit file over the built-in defaults.
    pub fn load_from_file(path: &Path) -> Result<ForgeConfig, ConfigError> {
        merge_policy::builder_with_defaults()?
            .add_source(File::from(path).required(true))
            .build()?
            .try_deserialize()
    }
}
