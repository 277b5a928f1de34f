//! HTTP API over the ShonaliChain ledger.

pub mod server;

pub use server::{build_app, run_from_env, run_with_config, ApiRuntimeConfig};
