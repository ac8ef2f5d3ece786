use super::{ActivationCriteria, PlatformAdapter, ScanFailure, ScanOutcome, ScanSuccess};
use crate::context::ScannerContext;
use crate::model::{keys, Entity, EntityPatch, EntityStatus, EntityType, MetaValue};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One DHCP lease as the router reports it
#[derive(Debug, Clone, Deserialize)]
pub struct DhcpLease {
    pub ip: String,
    pub mac: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub access_point: bool,
    #[serde(default)]
    pub role: Option<String>,
}

/// Where the lease table comes from. The scraping mechanism (browser
/// automation against a vendor UI, SNMP, an API) lives outside the core;
/// anything that yields lease tuples plugs in here.
#[async_trait]
pub trait LeaseSource: Send + Sync {
    async fn leases(&self) -> Result<Vec<DhcpLease>, String>;
}

/// Lease table read straight from the configuration file
pub struct StaticLeaseSource {
    leases: Vec<DhcpLease>,
}

impl StaticLeaseSource {
    pub fn new(leases: Vec<DhcpLease>) -> Self {
        Self { leases }
    }
}

#[async_trait]
impl LeaseSource for StaticLeaseSource {
    async fn leases(&self) -> Result<Vec<DhcpLease>, String> {
        Ok(self.leases.clone())
    }
}

/// Router adapter. Activates on the exact LAN gateway address, publishes
/// the DHCP lease table, and spreads MAC addresses and lease hostnames
/// across the universe.
pub struct RouterAdapter {
    gateway_ip: Option<String>,
    source: Arc<dyn LeaseSource>,
}

impl RouterAdapter {
    pub fn new(gateway_ip: Option<String>, source: Arc<dyn LeaseSource>) -> Self {
        Self { gateway_ip, source }
    }

    /// Attach lease facts to every entity at a leased address. A generic
    /// name (blank, or just the address itself) gives way to the lease
    /// hostname.
    fn enrich_universe(ctx: &ScannerContext, router_id: &str, leases: &[DhcpLease]) {
        ctx.with_universe(|universe| {
            for entity in universe.iter_mut() {
                if entity.id == router_id {
                    continue;
                }
                let Some(lease) = leases.iter().find(|lease| lease.ip == entity.ip) else {
                    continue;
                };
                entity.set_meta(keys::MAC_ADDRESS, lease.mac.as_str());
                let generic = entity.name.is_empty() || entity.name == entity.ip;
                if generic && !lease.hostname.is_empty() {
                    entity.name = lease.hostname.clone();
                }
            }
        });
    }
}

#[async_trait]
impl PlatformAdapter for RouterAdapter {
    fn name(&self) -> &'static str {
        "Router"
    }

    fn priority(&self) -> u8 {
        5
    }

    fn handles_type(&self, entity_type: EntityType) -> bool {
        entity_type == EntityType::Router
    }

    fn criteria(&self) -> ActivationCriteria {
        let gateway = self.gateway_ip.clone();
        ActivationCriteria::default().with_predicate(Arc::new(move |entity: &Entity| {
            gateway
                .as_deref()
                .map(|gateway| entity.ip == gateway)
                .unwrap_or(false)
        }))
    }

    async fn scan(&self, entity: &Entity, ctx: &ScannerContext) -> ScanOutcome {
        let leases = self
            .source
            .leases()
            .await
            .map_err(|e| ScanFailure::new("Lease source failed", e))?;
        tracing::debug!(router = %entity.ip, leases = leases.len(), "lease table loaded");

        Self::enrich_universe(ctx, &entity.id, &leases);

        // The published mapping: ip -> "mac hostname [role]"
        let mut table: BTreeMap<String, String> = BTreeMap::new();
        for lease in &leases {
            let mut value = format!("{} {}", lease.mac, lease.hostname);
            if let Some(ref role) = lease.role {
                value.push(' ');
                value.push_str(role);
            }
            table.insert(lease.ip.clone(), value.trim().to_string());
        }

        let patch = EntityPatch::promote(EntityType::Router)
            .with_status(EntityStatus::Reachable)
            .with_meta("dhcp_leases", MetaValue::Map(table));

        // Leases flagged as access points become entities of their own,
        // unless something already sits at that address; then the existing
        // entity is promoted by the universe pass above and here
        let mut discovered = Vec::new();
        for lease in leases.iter().filter(|lease| lease.access_point) {
            let promoted = ctx.with_universe(|universe| {
                match universe.iter_mut().find(|e| e.ip == lease.ip) {
                    Some(existing) => {
                        existing.entity_type = EntityType::AccessPoint;
                        if let Some(ref role) = lease.role {
                            existing.set_meta(keys::REASON, role.as_str());
                        }
                        true
                    }
                    None => false,
                }
            });
            if promoted {
                continue;
            }

            let mut ap = Entity::new(format!("ap-{}", lease.ip), EntityType::AccessPoint);
            ap.ip = lease.ip.clone();
            ap.name = lease.hostname.clone();
            ap.status = if ctx.is_swept(&lease.ip) {
                EntityStatus::Reachable
            } else {
                EntityStatus::Unverified
            };
            ap.set_meta(keys::MAC_ADDRESS, lease.mac.as_str());
            discovered.push(ap);
        }

        Ok(ScanSuccess::patched(patch)
            .with_children(discovered)
            .with_child_hints(vec![EntityType::AccessPoint]))
    }
}
