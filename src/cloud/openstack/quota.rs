//! Quota arithmetic and network assembly
//!
//! Pure functions over wire data: deriving used/total pairs from backend
//! quota sets, checking a boot request against them, and joining networks
//! with their subnets.

use super::wire::{ComputeQuotaSet, QuotaDetail, VolumeQuotaSet, WireLegacyNetwork, WireNetwork, WireSubnet};
use crate::domain::ports::{Flavor, Network, NetworkType, QuotaSnapshot, QuotaUsage, Subnet};
use crate::error::Result;
use indexmap::IndexMap;
use tracing::debug;

// =============================================================================
// Quota Derivation
// =============================================================================

impl From<QuotaDetail> for QuotaUsage {
    fn from(detail: QuotaDetail) -> Self {
        QuotaUsage::from_limit(detail.limit, detail.reserved, detail.in_use)
    }
}

impl From<super::wire::VolumeQuotaDetail> for QuotaUsage {
    fn from(detail: super::wire::VolumeQuotaDetail) -> Self {
        QuotaUsage::from_limit(detail.limit, detail.reserved, detail.in_use)
    }
}

/// Compute dimensions: cores, ram, instances, fixed-IP ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeQuota {
    pub cores: QuotaUsage,
    pub ram: QuotaUsage,
    pub instances: QuotaUsage,
    pub ports: QuotaUsage,
}

impl Default for ComputeQuota {
    fn default() -> Self {
        Self {
            cores: QuotaUsage::unlimited(),
            ram: QuotaUsage::unlimited(),
            instances: QuotaUsage::unlimited(),
            ports: QuotaUsage::unlimited(),
        }
    }
}

impl From<ComputeQuotaSet> for ComputeQuota {
    fn from(set: ComputeQuotaSet) -> Self {
        Self {
            cores: set.cores.into(),
            ram: set.ram.into(),
            instances: set.instances.into(),
            ports: set.fixed_ips.map(QuotaUsage::from).unwrap_or_else(QuotaUsage::unlimited),
        }
    }
}

/// Volume dimensions: count, gigabytes, snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeQuota {
    pub volumes: QuotaUsage,
    pub gigabytes: QuotaUsage,
    pub snapshots: QuotaUsage,
}

impl Default for VolumeQuota {
    fn default() -> Self {
        Self {
            volumes: QuotaUsage::unlimited(),
            gigabytes: QuotaUsage::unlimited(),
            snapshots: QuotaUsage::unlimited(),
        }
    }
}

impl From<VolumeQuotaSet> for VolumeQuota {
    fn from(set: VolumeQuotaSet) -> Self {
        Self {
            volumes: set.volumes.into(),
            gigabytes: set.gigabytes.into(),
            snapshots: set.snapshots.into(),
        }
    }
}

/// Merge per-service quotas. `network_ports` replaces the compute fixed-IP
/// dimension when advanced networking is available.
pub fn build_quota(
    compute: ComputeQuota,
    volume: VolumeQuota,
    network_ports: Option<QuotaUsage>,
) -> QuotaSnapshot {
    QuotaSnapshot {
        cores: compute.cores,
        ram: compute.ram,
        instances: compute.instances,
        ports: network_ports.unwrap_or(compute.ports),
        volumes: volume.volumes,
        gigabytes: volume.gigabytes,
        snapshots: volume.snapshots,
    }
}

// =============================================================================
// Quota Checks
// =============================================================================

/// vCPUs, RAM and one more instance for `flavor`
pub fn check_flavor(quota: &QuotaSnapshot, flavor: &Flavor) -> Result<()> {
    quota.cores.ensure_room("vCPUs", flavor.vcpus)?;
    quota.ram.ensure_room("RAM", flavor.ram)?;
    quota.instances.ensure_room("instances", 1)?;
    Ok(())
}

/// At least one free port
pub fn check_ports(quota: &QuotaSnapshot) -> Result<()> {
    quota.ports.ensure_room("ports", 1)
}

/// One volume per snapshot and their combined size in GB
pub fn check_volume_quota(quota: &QuotaSnapshot, snapshot_count: usize, needed_gb: u64) -> Result<()> {
    quota
        .volumes
        .ensure_room("volumes", i64::try_from(snapshot_count).unwrap_or(i64::MAX))?;
    quota
        .gigabytes
        .ensure_room("gigabytes", i64::try_from(needed_gb).unwrap_or(i64::MAX))?;
    Ok(())
}

// =============================================================================
// Networks
// =============================================================================

/// Join networks with subnets by network id.
///
/// Only networks visible to `project_id` and in `ACTIVE` state are kept;
/// networks without a subnet are dropped. Order follows the subnet listing.
pub fn build_networks(networks: &[WireNetwork], subnets: &[WireSubnet], project_id: &str) -> Vec<Network> {
    let by_id: IndexMap<&str, &WireNetwork> = networks
        .iter()
        .filter(|net| net.visible_to(project_id))
        .map(|net| (net.id.as_str(), net))
        .collect();

    let mut joined: IndexMap<String, Network> = IndexMap::new();
    for sub in subnets {
        let Some(net) = by_id.get(sub.network_id.as_str()) else {
            continue;
        };
        if net.status != "ACTIVE" {
            debug!("Skipping network {} in state {}", net.id, net.status);
            continue;
        }
        let entry = joined.entry(net.id.clone()).or_insert_with(|| Network {
            id: net.id.clone(),
            name: net.name.clone(),
            network_type: if net.external {
                NetworkType::Floating
            } else {
                NetworkType::Fixed
            },
            subnets: Vec::new(),
        });
        entry.subnets.push(Subnet {
            name: sub.name.clone(),
            cidr: sub.cidr.clone(),
            gateway: sub.gateway_ip.clone(),
            allocation_pools: Some(sub.allocation_pools.to_string()),
        });
    }

    joined.into_values().collect()
}

/// Map compute-listed networks to fixed networks with a single subnet
pub fn legacy_networks(networks: Vec<WireLegacyNetwork>) -> Vec<Network> {
    networks
        .into_iter()
        .map(|net| {
            let name = net
                .name
                .or(net.label)
                .unwrap_or_else(|| net.id.clone());
            Network {
                subnets: vec![Subnet {
                    name: name.clone(),
                    cidr: net.cidr.unwrap_or_default(),
                    gateway: net.gateway,
                    allocation_pools: None,
                }],
                id: net.id,
                name,
                network_type: NetworkType::Fixed,
            }
        })
        .collect()
}
