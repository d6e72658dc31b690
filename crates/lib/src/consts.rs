//! Environment variable names read by the engine.

/// Maximum number of steps running at once. See [`ExecuteConfig::from_env`].
///
/// [`ExecuteConfig::from_env`]: crate::execute::ExecuteConfig::from_env
pub const ENV_PARALLELISM: &str = "BUILDCHAIN_PARALLELISM";

/// `1`/`true` to cancel the build at the first step failure.
pub const ENV_FAIL_FAST: &str = "BUILDCHAIN_FAIL_FAST";

/// Path the validated dependency graph is written to, as Graphviz DOT.
pub const ENV_GRAPH_OUTPUT: &str = "BUILDCHAIN_GRAPH_OUTPUT";
