//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
///
/// Later sources replace scalar values key by key. A `columns` array from a later
/// source replaces the earlier array as a whole.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("storage.store_path", ".termforge/store")?
        .set_default("pipeline.mode", "full-pipeline")?
        .set_default("pipeline.quality_threshold", 7)?
        .set_default("pipeline.batch_size", 10)?
        .set_default("pipeline.delay_between_batches_ms", 2000)?
        .set_default("pipeline.skip_existing", true)
}
