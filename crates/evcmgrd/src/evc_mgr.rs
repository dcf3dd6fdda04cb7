//! EvcMgr - circuit deploy engine and link-protection controller.
//!
//! Deployment flow:
//! 1. Scheduled activation or a link event picks the next path using
//!    the fixed precedence: primary, backup, dynamic discovery.
//! 2. The deploy engine withdraws installed rules, allocates one
//!    service tag per link, builds NNI and UNI rule batches and pushes
//!    them through the flow-manager boundary.
//! 3. Circuit records are saved after every state change.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use eline_types::{EntityStatus, Link, LinkRef, Path};

use crate::error::{EvcError, EvcResult};
use crate::evc::{Evc, EvcPatch, EvcRequest};
use crate::flow::{FlowBuilder, TagAllocation};
use crate::flow_manager::FlowSender;
use crate::pathfinder::{best_path, PathfinderApi};
use crate::scheduler::{ScheduleAction, Scheduler};
use crate::storage::{CircuitStore, EvcRecord};
use crate::topology::TopologyApi;

/// Collaborators the deploy engine works against.
///
/// Operations borrow the circuit they act on; nothing here owns
/// circuits or persists them.
pub struct DeployContext<'a> {
    /// Path-computation client.
    pub pathfinder: &'a dyn PathfinderApi,
    /// Rule-push boundary.
    pub flows: &'a dyn FlowSender,
    /// Topology registry.
    pub topology: &'a dyn TopologyApi,
}

impl DeployContext<'_> {
    /// Withdraws every installed rule of a circuit, by cookie, from
    /// every switch its current path touches, then deactivates it.
    ///
    /// Withdrawal failures are logged and skipped: the remaining
    /// switches must still be cleaned.
    pub async fn remove_current_flows(&self, evc: &mut Evc) {
        let cookie = evc.cookie();
        for switch in evc.current_path().switches() {
            if let Err(e) = self.flows.withdraw_by_cookie(&switch, cookie).await {
                warn!("Failed to withdraw flows of {} from {}: {}", evc, switch, e);
            }
        }
        evc.deactivate();
    }

    /// Gate for installing on a supplied candidate: the path must be
    /// non-empty and the circuit administratively enabled. Freshness
    /// against `current_path` is the caller's concern.
    fn should_deploy(&self, evc: &Evc, path: &Path) -> bool {
        if path.is_empty() {
            debug!("Path is empty.");
            return false;
        }
        if !evc.is_enabled() {
            debug!("{} is disabled.", evc);
            return false;
        }
        true
    }

    /// Asks the pathfinder for a fresh path between the circuit's UNIs.
    pub async fn discover_new_path(&self, evc: &Evc) -> Option<Path> {
        best_path(
            self.pathfinder,
            self.topology,
            &evc.uni_a().interface.id,
            &evc.uni_z().interface.id,
        )
        .await
    }

    fn allocate_tags(path: &Path) -> EvcResult<TagAllocation> {
        let mut tags = TagAllocation::new();
        for link in path.links() {
            let tag = link
                .acquire_tag()
                .ok_or_else(|| EvcError::tag_exhausted(link.id()))?;
            tags.insert(link, tag);
        }
        Ok(tags)
    }

    /// Installs the rules for a circuit.
    ///
    /// Existing rules are always withdrawn first, even when nothing new
    /// will be installed. Without a candidate, a dynamic path is
    /// requested from the pathfinder. Returns `Ok(false)` when there is
    /// nothing to install (disabled circuit, empty candidate, no path
    /// found); a tag-allocation or rule-push failure is an error and
    /// leaves the circuit inactive.
    #[instrument(skip(self, evc, candidate), fields(evc = %evc))]
    pub async fn deploy(&self, evc: &mut Evc, candidate: Option<Path>) -> EvcResult<bool> {
        self.remove_current_flows(evc).await;

        let path = match candidate {
            Some(path) => {
                if !self.should_deploy(evc, &path) {
                    return Ok(false);
                }
                path
            }
            None => {
                if !evc.is_enabled() {
                    debug!("{} is disabled.", evc);
                    return Ok(false);
                }
                match self.discover_new_path(evc).await {
                    Some(path) if !path.is_empty() => path,
                    _ => {
                        debug!("No path available for {}.", evc);
                        return Ok(false);
                    }
                }
            }
        };

        let tags = Self::allocate_tags(&path)?;
        let builder = FlowBuilder::new(evc.cookie());
        let mut batches = builder.nni_flows(&path, &tags)?;
        batches.extend(builder.uni_flows(&path, &tags, evc.uni_a(), evc.uni_z())?);

        for batch in &batches {
            if let Err(e) = self.flows.install(&batch.switch, &batch.flows).await {
                error!("Failed to install flows for {}: {}", evc, e);
                // clean out whatever landed before the failure
                for batch in &batches {
                    let _ = self
                        .flows
                        .withdraw_by_cookie(&batch.switch, evc.cookie())
                        .await;
                }
                return Err(e);
            }
        }

        evc.set_current_path(path);
        evc.activate();
        info!("{} was deployed.", evc);
        Ok(true)
    }

    /// Deploys to a specific path.
    ///
    /// A candidate equal to the installed path is a no-op success and
    /// pushes nothing. A candidate that is not up fails without side
    /// effects.
    pub async fn deploy_to(&self, evc: &mut Evc, path: &Path) -> EvcResult<bool> {
        if evc.current_path() == path {
            debug!("Path is equal to current_path.");
            return Ok(true);
        }

        if path.status() == EntityStatus::Up {
            return self.deploy(evc, Some(path.clone())).await;
        }

        Ok(false)
    }

    async fn try_deploy_to(&self, evc: &mut Evc, path: &Path) -> bool {
        match self.deploy_to(evc, path).await {
            Ok(deployed) => deployed,
            Err(e) => {
                warn!("Deploy of {} failed: {}", evc, e);
                false
            }
        }
    }

    /// Reacts to the failure of a link in the circuit's installed path.
    ///
    /// From the primary path the backup is attempted, and vice versa;
    /// when neither works and dynamic backup is enabled, a fresh path
    /// is discovered. Returns false when the circuit is left inactive.
    #[instrument(skip(self, evc), fields(evc = %evc))]
    pub async fn handle_link_down(&self, evc: &mut Evc) -> bool {
        let mut success = false;

        if evc.is_using_primary_path() {
            let backup = evc.backup_path().clone();
            success = self.try_deploy_to(evc, &backup).await;
        } else if evc.is_using_backup_path() {
            let primary = evc.primary_path().clone();
            success = self.try_deploy_to(evc, &primary).await;
        }

        if !success && evc.dynamic_backup_path() {
            success = match self.deploy(evc, None).await {
                Ok(deployed) => deployed,
                Err(e) => {
                    warn!("Dynamic deploy of {} failed: {}", evc, e);
                    false
                }
            };
        }

        if success {
            debug!("{} deployed after link down.", evc);
        } else {
            // no usable path: withdraw what is left and report inactive
            warn!("Failed to re-deploy {} after link down.", evc);
            self.remove_current_flows(evc).await;
            evc.set_current_path(Path::empty());
        }
        success
    }

    /// Reacts to a link recovery that may re-enable a broken path.
    ///
    /// Returning to the primary path is always preferred; a circuit
    /// already on the primary is left alone, and one stable on the
    /// backup or a discovered path is not moved either.
    #[instrument(skip(self, evc, link), fields(evc = %evc))]
    pub async fn handle_link_up(&self, evc: &mut Evc, link: &Link) -> EvcResult<bool> {
        if evc.is_using_primary_path() {
            return Ok(true);
        }

        let primary = evc.primary_path().clone();
        if primary.is_affected_by(link) && self.try_deploy_to(evc, &primary).await {
            return Ok(true);
        }

        // Up through the backup or a discovered path; nothing to do.
        if evc.is_using_backup_path() || evc.is_using_dynamic_path() {
            return Ok(true);
        }

        let backup = evc.backup_path().clone();
        if backup.is_affected_by(link) && self.try_deploy_to(evc, &backup).await {
            return Ok(true);
        }

        if evc.dynamic_backup_path() {
            return self.deploy(evc, None).await;
        }

        Ok(true)
    }

    /// Withdraws a circuit's rules and clears its installed path.
    pub async fn remove(&self, evc: &mut Evc) {
        self.remove_current_flows(evc).await;
        evc.set_current_path(Path::empty());
        evc.deactivate();
        info!("{} was removed.", evc);
    }
}

/// Owns the circuit collection and drives it from scheduled jobs and
/// link events.
pub struct EvcMgr {
    circuits: HashMap<String, Evc>,
    scheduler: Scheduler,
    topology: Arc<dyn TopologyApi>,
    pathfinder: Arc<dyn PathfinderApi>,
    flows: Arc<dyn FlowSender>,
    store: Arc<dyn CircuitStore>,
}

impl EvcMgr {
    /// Creates a manager wired to its collaborators.
    pub fn new(
        topology: Arc<dyn TopologyApi>,
        pathfinder: Arc<dyn PathfinderApi>,
        flows: Arc<dyn FlowSender>,
        store: Arc<dyn CircuitStore>,
    ) -> Self {
        Self {
            circuits: HashMap::new(),
            scheduler: Scheduler::new(),
            topology,
            pathfinder,
            flows,
            store,
        }
    }

    fn collaborators(
        &self,
    ) -> (
        Arc<dyn PathfinderApi>,
        Arc<dyn FlowSender>,
        Arc<dyn TopologyApi>,
        Arc<dyn CircuitStore>,
    ) {
        (
            Arc::clone(&self.pathfinder),
            Arc::clone(&self.flows),
            Arc::clone(&self.topology),
            Arc::clone(&self.store),
        )
    }

    /// Creates a circuit from a request: validates it, reserves the UNI
    /// user tags, asks the pathfinder for the primary constituent links,
    /// arms its activation and saves it. Returns the new circuit id.
    pub async fn create_circuit(&mut self, request: EvcRequest) -> EvcResult<String> {
        let mut evc = Evc::new(request, &*self.topology)?;

        for uni in [evc.uni_a().clone(), evc.uni_z().clone()] {
            if let Some(tag) = uni.user_tag {
                self.topology.reserve_user_tag(&uni.interface.id, tag.value);
            }
        }

        if let Some(path) = best_path(
            &*self.pathfinder,
            &*self.topology,
            &evc.uni_a().interface.id,
            &evc.uni_z().interface.id,
        )
        .await
        {
            evc.set_primary_links(path);
        }

        self.scheduler.schedule_enable(&evc, true, Utc::now());
        self.scheduler.add(&evc);
        self.store.save(&evc.to_record())?;

        info!("{} created.", evc);
        let id = evc.id().to_string();
        self.circuits.insert(id.clone(), evc);
        Ok(id)
    }

    /// Returns the stored form of every circuit.
    pub fn list_circuits(&self) -> Vec<EvcRecord> {
        self.circuits.values().map(Evc::to_record).collect()
    }

    /// Returns one circuit.
    pub fn get_circuit(&self, circuit_id: &str) -> Option<&Evc> {
        self.circuits.get(circuit_id)
    }

    /// Returns the number of managed circuits.
    pub fn circuit_count(&self) -> usize {
        self.circuits.len()
    }

    /// Applies an update to a circuit and saves it.
    ///
    /// A patch naming an identity field (`name`, `uni_a`, `uni_z`) is
    /// rejected as a whole; nothing is changed or saved.
    pub fn update_circuit(&mut self, circuit_id: &str, patch: EvcPatch) -> EvcResult<()> {
        let evc = self
            .circuits
            .get_mut(circuit_id)
            .ok_or_else(|| EvcError::internal(format!("Unknown circuit {}", circuit_id)))?;

        evc.update(patch)?;
        self.store.save(&evc.to_record())?;
        info!("{} updated.", evc);
        Ok(())
    }

    /// Reloads every stored circuit, re-arming schedules without
    /// re-firing activations that already elapsed.
    pub fn load_stored_circuits(&mut self) -> EvcResult<usize> {
        let records = self.store.load_all()?;
        let mut loaded = 0;

        for record in &records {
            match Evc::from_record(record, &*self.topology) {
                Ok(evc) => {
                    for uni in [evc.uni_a(), evc.uni_z()] {
                        if let Some(tag) = uni.user_tag {
                            self.topology.reserve_user_tag(&uni.interface.id, tag.value);
                        }
                    }
                    self.scheduler.schedule_enable(&evc, false, Utc::now());
                    self.scheduler.add(&evc);
                    info!("{} loaded.", evc);
                    self.circuits.insert(evc.id().to_string(), evc);
                    loaded += 1;
                }
                Err(e) => warn!("Skipping stored circuit {}: {}", record.id, e),
            }
        }

        Ok(loaded)
    }

    /// Deploys one circuit, optionally to an explicit candidate path,
    /// and saves the resulting state.
    pub async fn deploy_circuit(
        &mut self,
        circuit_id: &str,
        candidate: Option<Path>,
    ) -> EvcResult<bool> {
        let (pathfinder, flows, topology, store) = self.collaborators();
        let evc = self
            .circuits
            .get_mut(circuit_id)
            .ok_or_else(|| EvcError::internal(format!("Unknown circuit {}", circuit_id)))?;

        let ctx = DeployContext {
            pathfinder: &*pathfinder,
            flows: &*flows,
            topology: &*topology,
        };
        let result = ctx.deploy(evc, candidate).await;
        store.save(&evc.to_record())?;
        result
    }

    /// Removes one circuit: rules withdrawn, schedules dropped, record
    /// discarded.
    pub async fn remove_circuit(&mut self, circuit_id: &str) -> EvcResult<()> {
        let (pathfinder, flows, topology, store) = self.collaborators();
        self.scheduler.cancel_circuit(circuit_id);

        if let Some(mut evc) = self.circuits.remove(circuit_id) {
            let ctx = DeployContext {
                pathfinder: &*pathfinder,
                flows: &*flows,
                topology: &*topology,
            };
            ctx.remove(&mut evc).await;
            store.delete(circuit_id)?;
        }
        Ok(())
    }

    /// Drains and executes every scheduled job due at `now`.
    pub async fn run_pending(&mut self, now: DateTime<Utc>) {
        for job in self.scheduler.run_pending(now) {
            match job.action {
                ScheduleAction::Create => {
                    let candidate = match self.circuits.get_mut(&job.circuit_id) {
                        Some(evc) => {
                            evc.enable();
                            if !evc.primary_path().is_empty() {
                                Some(evc.primary_path().clone())
                            } else if !evc.backup_path().is_empty() {
                                Some(evc.backup_path().clone())
                            } else {
                                None
                            }
                        }
                        None => continue,
                    };

                    if let Err(e) = self.deploy_circuit(&job.circuit_id, candidate).await {
                        error!("Scheduled deploy of {} failed: {}", job.circuit_id, e);
                    }
                }
                ScheduleAction::Remove => {
                    if let Err(e) = self.remove_circuit(&job.circuit_id).await {
                        error!("Scheduled removal of {} failed: {}", job.circuit_id, e);
                    }
                }
            }
        }
    }

    /// Marks a link down and re-deploys every circuit whose installed
    /// path it breaks. Returns the number of affected circuits.
    pub async fn handle_link_down(&mut self, link: &LinkRef) -> usize {
        link.set_status(EntityStatus::Down);
        info!("Link down: {}", link);

        let (pathfinder, flows, topology, store) = self.collaborators();
        let ctx = DeployContext {
            pathfinder: &*pathfinder,
            flows: &*flows,
            topology: &*topology,
        };

        let mut affected = 0;
        for evc in self.circuits.values_mut() {
            if !evc.is_affected_by(link) {
                continue;
            }
            affected += 1;
            ctx.handle_link_down(evc).await;
            if let Err(e) = store.save(&evc.to_record()) {
                warn!("Failed to save {} after link down: {}", evc, e);
            }
        }
        affected
    }

    /// Marks a link up and gives every circuit a chance to move back to
    /// a preferred path.
    pub async fn handle_link_up(&mut self, link: &LinkRef) {
        link.set_status(EntityStatus::Up);
        info!("Link up: {}", link);

        let (pathfinder, flows, topology, store) = self.collaborators();
        let ctx = DeployContext {
            pathfinder: &*pathfinder,
            flows: &*flows,
            topology: &*topology,
        };

        for evc in self.circuits.values_mut() {
            if let Err(e) = ctx.handle_link_up(evc, link).await {
                warn!("Link-up handling of {} failed: {}", evc, e);
            }
            if let Err(e) = store.save(&evc.to_record()) {
                warn!("Failed to save {} after link up: {}", evc, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evc::Uni;
    use crate::flow_manager::MockFlowSender;
    use crate::storage::MemoryStore;
    use crate::topology::Topology;
    use async_trait::async_trait;
    use chrono::Duration;
    use eline_types::Tag;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const SW1: &str = "00:00:00:00:00:00:00:01";
    const SW2: &str = "00:00:00:00:00:00:00:02";
    const SW3: &str = "00:00:00:00:00:00:00:03";

    /// Pathfinder returning a fixed hop list and counting requests.
    struct StaticPathfinder {
        replies: Mutex<Vec<Vec<String>>>,
        calls: AtomicUsize,
    }

    impl StaticPathfinder {
        fn new(hops: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(vec![hops.into_iter().map(String::from).collect()]),
                calls: AtomicUsize::new(0),
            }
        }

        fn empty() -> Self {
            Self {
                replies: Mutex::new(vec![]),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PathfinderApi for StaticPathfinder {
        async fn request_paths(&self, _: &str, _: &str) -> EvcResult<Vec<Vec<String>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.replies.lock().unwrap().clone())
        }
    }

    struct Fixture {
        topology: Arc<Topology>,
        pathfinder: Arc<StaticPathfinder>,
        flows: Arc<MockFlowSender>,
        store: Arc<MemoryStore>,
        uni_a: Uni,
        uni_z: Uni,
        primary: Path,
        backup: Path,
    }

    /// Triangle topology: primary SW1-SW2-SW3, backup SW1-SW3 direct.
    fn fixture(pathfinder: StaticPathfinder) -> (Fixture, EvcMgr) {
        let topology = Arc::new(Topology::new());
        let uni_a_iface = topology.add_interface(SW1, 1);
        let uni_z_iface = topology.add_interface(SW3, 1);
        let a2 = topology.add_interface(SW1, 2);
        let b1 = topology.add_interface(SW2, 1);
        let b2 = topology.add_interface(SW2, 2);
        let c2 = topology.add_interface(SW3, 2);
        let a3 = topology.add_interface(SW1, 3);
        let c3 = topology.add_interface(SW3, 3);
        // spare interfaces for dynamic paths
        topology.add_interface(SW1, 4);
        topology.add_interface(SW3, 4);

        let primary = Path::new(vec![topology.link(&a2, &b1), topology.link(&b2, &c2)]);
        let backup = Path::new(vec![topology.link(&a3, &c3)]);

        let fixture = Fixture {
            topology: Arc::clone(&topology),
            pathfinder: Arc::new(pathfinder),
            flows: Arc::new(MockFlowSender::new()),
            store: Arc::new(MemoryStore::new()),
            uni_a: Uni::new(uni_a_iface, Some(Tag::customer(100))),
            uni_z: Uni::new(uni_z_iface, Some(Tag::customer(200))),
            primary,
            backup,
        };

        let mgr = EvcMgr::new(
            Arc::clone(&fixture.topology) as Arc<dyn TopologyApi>,
            Arc::clone(&fixture.pathfinder) as Arc<dyn PathfinderApi>,
            Arc::clone(&fixture.flows) as Arc<dyn FlowSender>,
            Arc::clone(&fixture.store) as Arc<dyn CircuitStore>,
        );
        (fixture, mgr)
    }

    fn request(fixture: &Fixture) -> EvcRequest {
        EvcRequest {
            name: Some("cx".to_string()),
            uni_a: Some(fixture.uni_a.clone()),
            uni_z: Some(fixture.uni_z.clone()),
            primary_path: fixture.primary.links().to_vec(),
            backup_path: fixture.backup.links().to_vec(),
            enabled: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_circuit_saves_and_reserves_tags() {
        let (fixture, mut mgr) = fixture(StaticPathfinder::empty());

        let id = mgr.create_circuit(request(&fixture)).await.unwrap();
        assert_eq!(mgr.circuit_count(), 1);
        assert!(fixture.store.get(&id).unwrap().is_some());
        assert_eq!(fixture.pathfinder.calls(), 1);

        // the same tag on the same interface is now taken
        let err = mgr.create_circuit(request(&fixture)).await.unwrap_err();
        assert!(matches!(err, EvcError::Validation { .. }));
        assert!(err.to_string().contains("100"));
    }

    #[tokio::test]
    async fn test_deploy_installs_nni_and_uni_flows() {
        let (fixture, mut mgr) = fixture(StaticPathfinder::empty());
        let id = mgr.create_circuit(request(&fixture)).await.unwrap();

        let deployed = mgr
            .deploy_circuit(&id, Some(fixture.primary.clone()))
            .await
            .unwrap();
        assert!(deployed);

        let evc = mgr.get_circuit(&id).unwrap();
        assert!(evc.is_active());
        assert_eq!(evc.current_path(), &fixture.primary);

        // one NNI batch at SW2, one UNI batch per endpoint switch
        let installed = fixture.flows.installed();
        assert_eq!(installed.len(), 3);
        let switches: Vec<&str> = installed.iter().map(|(s, _)| s.as_str()).collect();
        assert!(switches.contains(&SW1));
        assert!(switches.contains(&SW2));
        assert!(switches.contains(&SW3));

        let cookie = evc.cookie();
        for (_, flows) in &installed {
            for flow in flows {
                assert_eq!(flow.cookie, cookie);
            }
        }

        // record reflects the deployed state
        let record = fixture.store.get(&id).unwrap().unwrap();
        assert!(record.active);
        assert_eq!(record.current_path.len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_circuit_is_never_deployed() {
        let (fixture, mut mgr) = fixture(StaticPathfinder::empty());
        let mut req = request(&fixture);
        req.enabled = false;
        let id = mgr.create_circuit(req).await.unwrap();

        let deployed = mgr
            .deploy_circuit(&id, Some(fixture.primary.clone()))
            .await
            .unwrap();
        assert!(!deployed);
        assert!(!mgr.get_circuit(&id).unwrap().is_active());
        assert!(fixture.flows.installed().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_to_current_path_is_idempotent() {
        let (fixture, mut mgr) = fixture(StaticPathfinder::empty());
        let id = mgr.create_circuit(request(&fixture)).await.unwrap();
        mgr.deploy_circuit(&id, Some(fixture.primary.clone()))
            .await
            .unwrap();
        fixture.flows.clear();

        let (pathfinder, flows, topology, _) = mgr.collaborators();
        let ctx = DeployContext {
            pathfinder: &*pathfinder,
            flows: &*flows,
            topology: &*topology,
        };
        let evc = mgr.circuits.get_mut(&id).unwrap();
        let deployed = ctx.deploy_to(evc, &fixture.primary.clone()).await.unwrap();

        assert!(deployed);
        assert!(fixture.flows.installed().is_empty());
        assert!(fixture.flows.withdrawn().is_empty());
    }

    #[tokio::test]
    async fn test_link_down_on_primary_fails_over_to_backup() {
        let (fixture, mut mgr) = fixture(StaticPathfinder::empty());
        let id = mgr.create_circuit(request(&fixture)).await.unwrap();
        mgr.deploy_circuit(&id, Some(fixture.primary.clone()))
            .await
            .unwrap();

        let failed = Arc::clone(&fixture.primary.links()[0]);
        let affected = mgr.handle_link_down(&failed).await;
        assert_eq!(affected, 1);

        let evc = mgr.get_circuit(&id).unwrap();
        assert!(evc.is_active());
        assert_eq!(evc.current_path(), &fixture.backup);
        assert!(evc.is_using_backup_path());
    }

    #[tokio::test]
    async fn test_link_down_without_usable_backup_leaves_inactive() {
        let (fixture, mut mgr) = fixture(StaticPathfinder::empty());
        let id = mgr.create_circuit(request(&fixture)).await.unwrap();
        mgr.deploy_circuit(&id, Some(fixture.primary.clone()))
            .await
            .unwrap();

        // both paths broken, no dynamic backup
        fixture.backup.links()[0].set_status(EntityStatus::Down);
        let failed = Arc::clone(&fixture.primary.links()[0]);
        mgr.handle_link_down(&failed).await;

        let evc = mgr.get_circuit(&id).unwrap();
        assert!(!evc.is_active());
        assert!(evc.current_path().is_empty());
    }

    #[tokio::test]
    async fn test_link_down_discovers_dynamic_path() {
        let pathfinder = StaticPathfinder::new(vec![
            "00:00:00:00:00:00:00:01:1",
            SW1,
            "00:00:00:00:00:00:00:01:4",
            "00:00:00:00:00:00:00:03:4",
            SW3,
            "00:00:00:00:00:00:00:03:1",
        ]);
        let (fixture, mut mgr) = fixture(pathfinder);

        let mut req = request(&fixture);
        req.dynamic_backup_path = true;
        let id = mgr.create_circuit(req).await.unwrap();
        mgr.deploy_circuit(&id, Some(fixture.primary.clone()))
            .await
            .unwrap();

        // backup is unusable, forcing dynamic discovery
        fixture.backup.links()[0].set_status(EntityStatus::Down);
        let calls_before = fixture.pathfinder.calls();

        let failed = Arc::clone(&fixture.primary.links()[0]);
        mgr.handle_link_down(&failed).await;

        assert_eq!(fixture.pathfinder.calls(), calls_before + 1);

        let evc = mgr.get_circuit(&id).unwrap();
        assert!(evc.is_active());
        assert!(evc.is_using_dynamic_path());
        assert_eq!(evc.current_path().len(), 1);
    }

    #[tokio::test]
    async fn test_link_up_returns_to_primary() {
        let (fixture, mut mgr) = fixture(StaticPathfinder::empty());
        let id = mgr.create_circuit(request(&fixture)).await.unwrap();
        mgr.deploy_circuit(&id, Some(fixture.primary.clone()))
            .await
            .unwrap();

        let failed = Arc::clone(&fixture.primary.links()[0]);
        mgr.handle_link_down(&failed).await;
        assert!(mgr.get_circuit(&id).unwrap().is_using_backup_path());

        mgr.handle_link_up(&failed).await;
        let evc = mgr.get_circuit(&id).unwrap();
        assert!(evc.is_active());
        assert!(evc.is_using_primary_path());
    }

    #[tokio::test]
    async fn test_link_up_elsewhere_does_not_thrash_backup() {
        let (fixture, mut mgr) = fixture(StaticPathfinder::empty());
        let id = mgr.create_circuit(request(&fixture)).await.unwrap();
        mgr.deploy_circuit(&id, Some(fixture.backup.clone()))
            .await
            .unwrap();
        fixture.flows.clear();

        // a link outside the primary path recovers
        let unrelated_a = fixture.topology.add_interface(SW2, 9);
        let unrelated_b = fixture.topology.add_interface(SW3, 9);
        let unrelated = fixture.topology.link(&unrelated_a, &unrelated_b);

        mgr.handle_link_up(&unrelated).await;

        let evc = mgr.get_circuit(&id).unwrap();
        assert!(evc.is_using_backup_path());
        assert!(fixture.flows.installed().is_empty());
    }

    #[tokio::test]
    async fn test_failed_install_leaves_circuit_inactive() {
        let (fixture, mut mgr) = fixture(StaticPathfinder::empty());
        let id = mgr.create_circuit(request(&fixture)).await.unwrap();

        fixture.flows.fail_installs(true);
        let result = mgr
            .deploy_circuit(&id, Some(fixture.primary.clone()))
            .await;
        assert!(matches!(result, Err(EvcError::FlowPush { .. })));

        let evc = mgr.get_circuit(&id).unwrap();
        assert!(!evc.is_active());
        assert!(evc.current_path().is_empty());
    }

    #[tokio::test]
    async fn test_update_circuit_rejects_identity_and_saves() {
        let (fixture, mut mgr) = fixture(StaticPathfinder::empty());
        let id = mgr.create_circuit(request(&fixture)).await.unwrap();

        let err = mgr
            .update_circuit(
                &id,
                EvcPatch {
                    name: Some("other".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, EvcError::Validation { .. }));
        assert_eq!(mgr.get_circuit(&id).unwrap().name(), "cx");

        mgr.update_circuit(
            &id,
            EvcPatch {
                bandwidth: Some(500),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(mgr.get_circuit(&id).unwrap().bandwidth(), 500);
        assert_eq!(fixture.store.get(&id).unwrap().unwrap().bandwidth, 500);
    }

    #[tokio::test]
    async fn test_deploy_fails_when_tag_pool_is_exhausted() {
        // the single link between the UNI switches has one service tag
        let mut pool_override: HashMap<String, HashMap<u32, Vec<u16>>> = HashMap::new();
        pool_override
            .entry(SW1.to_string())
            .or_default()
            .insert(2, vec![42]);

        let topology = Arc::new(Topology::with_pool_override(pool_override));
        let uni_a = Uni::new(topology.add_interface(SW1, 1), Some(Tag::customer(100)));
        let uni_z = Uni::new(topology.add_interface(SW2, 1), Some(Tag::customer(200)));
        let a2 = topology.add_interface(SW1, 2);
        let b2 = topology.add_interface(SW2, 2);
        let path = Path::new(vec![topology.link(&a2, &b2)]);

        let mut mgr = EvcMgr::new(
            Arc::clone(&topology) as Arc<dyn TopologyApi>,
            Arc::new(StaticPathfinder::empty()) as Arc<dyn PathfinderApi>,
            Arc::new(MockFlowSender::new()) as Arc<dyn FlowSender>,
            Arc::new(MemoryStore::new()) as Arc<dyn CircuitStore>,
        );

        let id = mgr
            .create_circuit(EvcRequest {
                name: Some("starved".to_string()),
                uni_a: Some(uni_a),
                uni_z: Some(uni_z),
                primary_path: path.links().to_vec(),
                enabled: true,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(mgr.deploy_circuit(&id, Some(path.clone())).await.unwrap());

        // tags are never returned to the pool, so a redeploy starves
        let err = mgr.deploy_circuit(&id, Some(path)).await.unwrap_err();
        assert!(matches!(err, EvcError::TagExhausted { .. }));
        assert!(!mgr.get_circuit(&id).unwrap().is_active());
    }

    #[tokio::test]
    async fn test_scheduled_enable_deploys_circuit() {
        let (fixture, mut mgr) = fixture(StaticPathfinder::empty());
        let mut req = request(&fixture);
        req.enabled = false;
        req.creation_time = Some(Utc::now() + Duration::seconds(30));
        let id = mgr.create_circuit(req).await.unwrap();

        // not due yet
        mgr.run_pending(Utc::now()).await;
        assert!(!mgr.get_circuit(&id).unwrap().is_active());

        mgr.run_pending(Utc::now() + Duration::seconds(31)).await;
        let evc = mgr.get_circuit(&id).unwrap();
        assert!(evc.is_enabled());
        assert!(evc.is_active());
        assert!(evc.is_using_primary_path());
    }

    #[tokio::test]
    async fn test_remove_circuit_withdraws_and_forgets() {
        let (fixture, mut mgr) = fixture(StaticPathfinder::empty());
        let id = mgr.create_circuit(request(&fixture)).await.unwrap();
        mgr.deploy_circuit(&id, Some(fixture.primary.clone()))
            .await
            .unwrap();
        fixture.flows.clear();

        mgr.remove_circuit(&id).await.unwrap();

        assert_eq!(mgr.circuit_count(), 0);
        assert!(fixture.store.get(&id).unwrap().is_none());
        // rules withdrawn from all three switches of the primary path
        assert_eq!(fixture.flows.withdrawn().len(), 3);

        // a link event after removal touches nothing
        let failed = Arc::clone(&fixture.primary.links()[0]);
        assert_eq!(mgr.handle_link_down(&failed).await, 0);
    }

    #[tokio::test]
    async fn test_load_stored_circuits_round_trip() {
        let (fixture, mut mgr) = fixture(StaticPathfinder::empty());
        let id = mgr.create_circuit(request(&fixture)).await.unwrap();
        mgr.deploy_circuit(&id, Some(fixture.primary.clone()))
            .await
            .unwrap();

        let mut fresh = EvcMgr::new(
            Arc::clone(&fixture.topology) as Arc<dyn TopologyApi>,
            Arc::clone(&fixture.pathfinder) as Arc<dyn PathfinderApi>,
            Arc::clone(&fixture.flows) as Arc<dyn FlowSender>,
            Arc::clone(&fixture.store) as Arc<dyn CircuitStore>,
        );
        assert_eq!(fresh.load_stored_circuits().unwrap(), 1);

        let evc = fresh.get_circuit(&id).unwrap();
        assert_eq!(evc.name(), "cx");
        assert_eq!(evc.primary_path(), &fixture.primary);
        assert_eq!(evc.current_path(), &fixture.primary);
        assert!(evc.is_enabled());
        // the elapsed activation is not re-armed
        assert!(fresh.scheduler.is_empty());
    }
}
