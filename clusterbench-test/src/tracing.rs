use tracing_subscriber::EnvFilter;

/// Directive enabling all harness logs.
const HARNESS_DIRECTIVE: &str = "clusterbench=TRACE";

/// Initialize the logger for testing.
///
/// Harness logs are captured at every level through the writer of the Rust test runner, so they
/// only show up for failing tests. Other crates only log errors. Calling this more than once is
/// harmless.
///
/// # Example
///
/// ```
/// clusterbench_test::tracing::init();
/// ```
pub fn init() {
    let env_filter = EnvFilter::new("ERROR").add_directive(HARNESS_DIRECTIVE.parse().unwrap());

    tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}
