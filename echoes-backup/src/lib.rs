pub mod cli;
pub mod load_config;
pub mod notify;
pub mod sftp;

pub use cli::{run, Cli, Commands};
