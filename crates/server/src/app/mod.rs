mod bootstrap;
mod config;
mod loop_runner;
mod roomport;
mod sessions;

pub(crate) use bootstrap::{build_app, StartupError};
pub(crate) use loop_runner::run;
