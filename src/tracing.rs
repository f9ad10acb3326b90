//! Tracing (logging)

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Initialise tracing (logging)
///
/// Uses `filter` if given, otherwise the `RUST_LOG` environment variable, falling back to debug
/// logging for this crate if neither is set. Fails if the process already set a global
/// subscriber.
pub fn init_tracing(filter: Option<&str>) -> Result<(), TryInitError> {
    let filter = match filter {
        Some(filter) => tracing_subscriber::EnvFilter::new(filter),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "datacube_apply=debug".into()),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing() {
        // Another test may have installed the subscriber already.
        init_tracing(Some("datacube_apply=info")).ok();
        ::tracing::info!("tracing initialised");
        assert!(init_tracing(None).is_err());
    }
}
