//! Adapters for the six supported enforcement platforms

use std::sync::Arc;

use crate::{
    adapter::{AdapterConfig, PlatformAdapter},
    error::Result,
    model::Platform,
    registry::Registry,
};

pub mod aws;
pub mod azure;
pub mod fortinet;
pub mod gcp;
pub mod illumio;
pub mod paloalto;

pub use aws::AwsAdapter;
pub use azure::AzureAdapter;
pub use fortinet::FortinetAdapter;
pub use gcp::GcpAdapter;
pub use illumio::IllumioAdapter;
pub use paloalto::PaloAltoAdapter;

/// Build the built-in adapter for `platform`
pub fn build_adapter(
    platform: Platform,
    registry: Arc<Registry>,
    config: &AdapterConfig,
) -> Result<Box<dyn PlatformAdapter>> {
    Ok(match platform {
        Platform::Aws => Box::new(AwsAdapter::new(registry, config)?),
        Platform::Gcp => Box::new(GcpAdapter::new(registry, config)?),
        Platform::Azure => Box::new(AzureAdapter::new(registry, config)?),
        Platform::Paloalto => Box::new(PaloAltoAdapter::new(registry, config)?),
        Platform::Fortinet => Box::new(FortinetAdapter::new(registry, config)?),
        Platform::Illumio => Box::new(IllumioAdapter::new(registry, config)?),
    })
}
