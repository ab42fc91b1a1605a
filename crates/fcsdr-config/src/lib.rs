//! Configuration loading for the fast-convolution DSP daemon:
//! - TOML configuration file parsing with strict unrecognized-field rejection
//! - Front-end, engine, network and channel-preset configuration structures

pub mod stack_config;
pub mod stack_config_soapy;
pub mod toml_config;

pub use stack_config::*;
pub use stack_config_soapy::*;
pub use toml_config::*;
