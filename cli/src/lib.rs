//! CLI support for autograph: named contexts and result output.

pub mod config;
pub mod output;

pub use config::{Config, Context, load_config, mask_api_key};
pub use output::{Output, OutputFormat, print_success, print_warning};
