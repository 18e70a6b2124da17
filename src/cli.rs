//! CLI domain: parse, route, output, and presentation only.
//! The route table dispatches to the orchestrator and stores; no pipeline logic lives here.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands, TermsCommands};
pub use presentation::{
    format_estimate, format_job_summary, format_quality_text, format_status_table,
};
pub use route::RunContext;
