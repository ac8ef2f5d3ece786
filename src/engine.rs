use crate::adapters::{PlatformAdapter, ScanOutcome, ScanSuccess};
use crate::context::ScannerContext;
use crate::errors::DiscoveryError;
use crate::model::{keys, Entity, EntityStatus, EntityType};
use crate::net::{probe, sweep};
use crate::registry::AdapterRegistry;
use crate::report::{self, TopologyReport};
use crate::{conflict, correlate};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Result of one guarded adapter invocation
enum AdapterRun {
    Outcome(ScanOutcome),
    Panicked(String),
    TimedOut,
}

/// Drives the phased discovery pipeline: sweep, probe, hint application,
/// orchestrated adapter expansion to a fixed point, correlation, conflict
/// detection, and assembly into a frozen report.
pub struct DiscoveryEngine {
    subnets: Vec<String>,
    registry: Arc<AdapterRegistry>,
    ctx: Arc<ScannerContext>,
}

impl DiscoveryEngine {
    pub fn new(
        subnets: Vec<String>,
        registry: AdapterRegistry,
        ctx: Arc<ScannerContext>,
    ) -> Self {
        Self {
            subnets,
            registry: Arc::new(registry),
            ctx,
        }
    }

    pub fn context(&self) -> &Arc<ScannerContext> {
        &self.ctx
    }

    /// Run the full pipeline. Only configuration problems surface as
    /// errors; everything downstream degrades into entity status and the
    /// conflict list.
    pub async fn run(&self) -> Result<TopologyReport, DiscoveryError> {
        // Phase 1: reachability sweep
        let candidates = sweep::expand_subnets(
            &self.subnets,
            self.ctx.config.max_hosts_per_subnet,
        )?;
        tracing::info!(
            subnets = self.subnets.len(),
            candidates = candidates.len(),
            "starting reachability sweep"
        );
        let mut swept =
            sweep::parallel_ping_sweep(candidates, &self.ctx.config, &self.ctx.cancel).await;
        swept.sort();
        self.ctx
            .set_swept_ips(swept.iter().map(|ip| ip.to_string()));
        tracing::info!(reachable = swept.len(), "sweep complete");

        // Phase 2: port fingerprinting, every reachable host in parallel
        let mut initial = self.probe_all(&swept).await;
        initial.sort_by_key(|entity| entity.ip.parse::<Ipv4Addr>().ok());

        self.run_with_initial(initial).await
    }

    /// Run the pipeline from already-fingerprinted entities, skipping sweep
    /// and probe. The swept-ip set on the context must be populated first.
    pub async fn run_with_initial(
        &self,
        mut initial: Vec<Entity>,
    ) -> Result<TopologyReport, DiscoveryError> {
        // Phase 3: operator hints pre-label entities before orchestration
        self.apply_hints(&mut initial);

        // Phase 4: adapter expansion to a fixed point
        self.orchestrate(initial).await;

        // Phase 5-7: correlation, conflict detection, assembly
        let swept_set = self.ctx.swept_ips();
        let mut universe = self.ctx.with_universe(std::mem::take);
        correlate::run(&mut universe, &swept_set);
        let conflicts = conflict::detect(&mut universe);

        Ok(report::assemble(
            self.subnets.clone(),
            universe,
            conflicts,
        ))
    }

    async fn probe_all(&self, swept: &[Ipv4Addr]) -> Vec<Entity> {
        let config = &self.ctx.config;
        let http = &self.ctx.http;
        let cancel = &self.ctx.cancel;

        stream::iter(swept.iter().copied())
            .map(|ip| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                Some(probe::probe_host(ip, config, http).await)
            })
            .buffer_unordered(swept.len().max(1))
            .filter_map(|entity| async move { entity })
            .collect()
            .await
    }

    /// Apply operator hints: name overrides always win, type applies only
    /// over `Unknown`, a hinted port joins the open set, and a hint for an
    /// unswept address creates the entity outright.
    fn apply_hints(&self, entities: &mut Vec<Entity>) {
        for hint in &self.ctx.hints {
            let entity = match entities.iter_mut().find(|e| e.ip == hint.ip) {
                Some(existing) => existing,
                None => {
                    entities.push(Entity::unknown(hint.ip.clone()));
                    entities.last_mut().expect("pushed entity")
                }
            };

            if let Some(ref name) = hint.name {
                entity.name = name.clone();
            }
            if let Some(entity_type) = hint.entity_type {
                if entity.entity_type == EntityType::Unknown {
                    entity.entity_type = entity_type;
                }
            }
            if let Some(port) = hint.port {
                entity.open_ports.insert(port);
            }
            if let Some(ref token_env) = hint.token_env {
                entity.set_meta(keys::HINT_TOKEN_ENV, token_env.as_str());
            }
        }
    }

    /// Work the FIFO queue until it drains: dequeue an entity, select its
    /// adapters, run them serially, fold their children back in. Each
    /// entity id is scanned at most once.
    async fn orchestrate(&self, initial: Vec<Entity>) {
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut scanned: BTreeSet<String> = BTreeSet::new();

        self.ctx.with_universe(|universe| {
            for entity in initial {
                queue.push_back(entity.id.clone());
                universe.push(entity);
            }
        });

        while let Some(id) = queue.pop_front() {
            if self.ctx.cancel.is_cancelled() {
                queue.push_front(id);
                break;
            }
            if scanned.contains(&id) {
                continue;
            }

            let Some(entity) = self
                .ctx
                .with_universe(|u| u.iter().find(|e| e.id == id).cloned())
            else {
                continue;
            };

            // Addresses outside the swept set are internal (bridge networks
            // and the like) and cannot be scanned from here
            if !entity.ip.is_empty() && !self.ctx.is_swept(&entity.ip) {
                scanned.insert(id);
                continue;
            }

            let plan = self.registry.find_applicable(&entity, &self.ctx).await;
            tracing::debug!(
                entity = %entity.id,
                adapters = plan.len(),
                "running adapter plan"
            );

            let mut current_id = id.clone();
            for adapter in plan {
                if self.ctx.cancel.is_cancelled() {
                    break;
                }

                // Later adapters must observe earlier adapters' effects
                let Some(current) = self
                    .ctx
                    .with_universe(|u| u.iter().find(|e| e.id == current_id).cloned())
                else {
                    break;
                };

                match self.run_guarded(&adapter, current).await {
                    AdapterRun::Outcome(Ok(success)) => {
                        current_id =
                            self.apply_success(&current_id, success, &mut queue, &scanned);
                    }
                    AdapterRun::Outcome(Err(failure)) => {
                        tracing::debug!(
                            entity = %current_id,
                            adapter = adapter.name(),
                            error = %failure.message,
                            "adapter verification failed"
                        );
                        self.record_failure(
                            &current_id,
                            keys::SCAN_ERROR,
                            &failure.message,
                            &failure.details,
                        );
                    }
                    AdapterRun::Panicked(message) => {
                        tracing::warn!(
                            entity = %current_id,
                            adapter = adapter.name(),
                            "adapter panicked, continuing"
                        );
                        self.record_failure(&current_id, keys::SCAN_EXCEPTION, &message, "");
                    }
                    AdapterRun::TimedOut => {
                        self.record_failure(
                            &current_id,
                            keys::SCAN_ERROR,
                            "adapter timed out",
                            adapter.name(),
                        );
                    }
                }
            }

            scanned.insert(id);
            scanned.insert(current_id);
        }

        // A tripped token leaves the rest of the queue unfinished; those
        // entities are reported as unverified partial results
        if self.ctx.cancel.is_cancelled() {
            self.ctx.with_universe(|universe| {
                for id in &queue {
                    if let Some(entity) = universe.iter_mut().find(|e| e.id == *id) {
                        if !scanned.contains(id) {
                            entity.status = EntityStatus::Unverified;
                            entity.set_meta(keys::SCAN_ERROR, "scan cancelled");
                        }
                    }
                }
            });
        }
    }

    /// Invoke one adapter inside its own task so a panic or a stall can
    /// never take down the orchestrator
    async fn run_guarded(
        &self,
        adapter: &Arc<dyn PlatformAdapter>,
        entity: Entity,
    ) -> AdapterRun {
        let adapter = Arc::clone(adapter);
        let ctx = Arc::clone(&self.ctx);
        let deadline = Duration::from_millis(ctx.config.adapter_timeout_ms);

        let mut handle = tokio::spawn(async move { adapter.scan(&entity, &ctx).await });

        match timeout(deadline, &mut handle).await {
            Ok(Ok(outcome)) => AdapterRun::Outcome(outcome),
            Ok(Err(join_error)) => {
                if join_error.is_panic() {
                    let payload = join_error.into_panic();
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "adapter panicked".to_string());
                    AdapterRun::Panicked(message)
                } else {
                    AdapterRun::Panicked("adapter task cancelled".to_string())
                }
            }
            Err(_elapsed) => {
                handle.abort();
                AdapterRun::TimedOut
            }
        }
    }

    /// Apply a successful outcome atomically: patch the scanned entity,
    /// rebind anything that referenced a rewritten id, then attach and
    /// enqueue the children. Returns the entity's id after the patch.
    fn apply_success(
        &self,
        scanned_id: &str,
        success: ScanSuccess,
        queue: &mut VecDeque<String>,
        scanned: &BTreeSet<String>,
    ) -> String {
        let ScanSuccess {
            patch, discovered, ..
        } = success;

        self.ctx.with_universe(|universe| {
            let mut current_id = scanned_id.to_string();

            if let Some(idx) = universe.iter().position(|e| e.id == scanned_id) {
                patch.apply_to(&mut universe[idx]);
                let new_id = universe[idx].id.clone();

                if new_id != scanned_id {
                    // Promotion rewrote the id: children emitted against the
                    // old id and queued work both follow it
                    for other in universe.iter_mut() {
                        if other.parent_id.as_deref() == Some(scanned_id) {
                            other.parent_id = Some(new_id.clone());
                        }
                    }
                    for queued in queue.iter_mut() {
                        if *queued == scanned_id {
                            *queued = new_id.clone();
                        }
                    }
                    current_id = new_id;
                }
            }

            for mut child in discovered {
                if child.parent_id.is_none() {
                    child.parent_id = Some(current_id.clone());
                }
                if !scanned.contains(&child.id) && !queue.contains(&child.id) {
                    queue.push_back(child.id.clone());
                }
                universe.push(child);
            }

            current_id
        })
    }

    fn record_failure(&self, id: &str, key: &str, message: &str, details: &str) {
        self.ctx.with_universe(|universe| {
            if let Some(entity) = universe.iter_mut().find(|e| e.id == id) {
                entity.status = EntityStatus::Unverified;
                entity.set_meta(key, message);
                if !details.is_empty() {
                    entity.set_meta(keys::SCAN_ERROR_REASON, details);
                }
            }
        });
    }
}
