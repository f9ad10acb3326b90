//! Engine-level configuration.

use clap::Parser;
use url::Url;

/// Keyword standing for the measure in an expression.
pub const MEASURE_KEYWORD: &str = "measure";

/// Keyword standing for the values of the implicit dimension in an expression.
pub const DIMENSION_KEYWORD: &str = "dimension";

/// Operator name recorded in the lineage of produced datacubes.
pub const OPERATOR_NAME: &str = "apply";

/// Apply operator configuration
///
/// Read by the launcher of each rank from its command line and environment with
/// `EngineConfig::parse()`, then handed to [crate::apply::Engine::init].
#[derive(Clone, Debug, Parser)]
pub struct EngineConfig {
    /// Base URI of the server, prefix of every datacube PID
    #[arg(long, default_value = "http://127.0.0.1/ophidia", env = "APPLY_SERVER_URI")]
    pub server_uri: Url,
    /// Number of messages buffered per rank by an in-process group
    #[arg(long, default_value_t = 16, env = "APPLY_BROADCAST_CAPACITY")]
    pub broadcast_capacity: usize,
    /// Tracing filter, overriding `RUST_LOG`
    #[arg(long, env = "APPLY_LOG")]
    pub log_filter: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::parse_from(["datacube-apply"])
    }
}
