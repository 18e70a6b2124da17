//! Environment source: TERMFORGE__SECTION__KEY, e.g. TERMFORGE__PIPELINE__BATCH_SIZE=25

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::Environment;

pub const PREFIX: &str = "TERMFORGE";
pub const SEPARATOR: &str = "__";

/// Add the environment source; it overrides every file source.
pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(PREFIX)
            .prefix_separator(SEPARATOR)
            .separator(SEPARATOR)
            .try_parsing(true),
    )
}
