use tracing_subscriber::{fmt, EnvFilter};

use crate::{errors::Error, Result};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init(service_name: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,tgf=info,tgf_core=info,tgf_telegram=info,tgf_mtproto=info,tgf_store=info,{}=info",
            service_name.replace('-', "_")
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| Error::Config(format!("tracing init failed: {e}")))
}
