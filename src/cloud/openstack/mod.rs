//! OpenStack Adapter
//!
//! Layers, bottom-up:
//! - `session`: Keystone v2/v3 authentication and the service catalog
//! - `client`: typed REST calls with re-authentication on 401
//! - `wait` / `quota` / `local`: polling, quota arithmetic, local node
//! - `driver`: the [`CloudDriver`](crate::domain::ports::CloudDriver) implementation

pub mod client;
pub mod driver;
pub mod local;
pub mod quota;
pub mod session;
pub mod wait;
pub mod wire;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{OpenStackApi, OpenStackApiRef, OpenStackClient};
pub use driver::{OpenStackConfig, OpenStackDriver};
pub use local::{AttachConfig, LocalNode, LocalNodeConfig};
pub use session::{AuthVersion, CatalogConfig};
pub use wait::PollConfig;
