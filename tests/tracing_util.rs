use tracing_subscriber::EnvFilter;

/// Installs a per-test tracing subscriber writing to the test writer.
///
/// Keep the returned guard alive for the duration of the test; events are
/// only captured while it is in scope.
pub struct TestTracing {
    _guard: tracing::subscriber::DefaultGuard,
}

impl TestTracing {
    pub fn init() -> Self {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .finish();
        Self {
            _guard: tracing::subscriber::set_default(subscriber),
        }
    }
}
