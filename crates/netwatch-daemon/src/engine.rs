//! Component wiring.
//!
//! Every component receives its transports and store through its
//! constructor; the process entry point owns their lifetime.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use netwatch_discover::{
    ArpTransport, DiscoveryOrchestrator, IcmpPinger, LinkLayer, LinkLayerCorrelator,
    LivenessProber, Pinger, VendorTable,
};
use netwatch_monitor::config::MonitorConfig;
use netwatch_monitor::{MetricCollector, SnmpTransport, UdpSnmpClient};
use netwatch_store::{DeviceTracker, MemoryStore, Store};

use crate::api::NetwatchApi;
use crate::config::NetwatchConfig;
use crate::error::EngineError;
use crate::handler::EngineHandler;
use crate::queue::{JobQueue, JobReceiver};
use crate::scheduler::Scheduler;
use crate::worker::{RetryPolicy, WorkerPool};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// External collaborators of the engine.
pub struct Transports {
    pub store: Arc<dyn Store>,
    pub pinger: Arc<dyn Pinger>,
    pub link: Arc<dyn LinkLayer>,
    pub snmp: Arc<dyn SnmpTransport>,
}

impl Transports {
    /// ICMP, ARP and UDP SNMP on the host network, with the in-memory store.
    pub fn system(monitor: &MonitorConfig) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            pinger: Arc::new(IcmpPinger::new()),
            link: Arc::new(ArpTransport),
            snmp: Arc::new(UdpSnmpClient::from_config(&monitor.snmp)),
        }
    }
}

pub struct Engine {
    api: NetwatchApi,
    orchestrator: Arc<DiscoveryOrchestrator>,
    tracker: Arc<DeviceTracker>,
    scheduler: Scheduler,
    pool: WorkerPool,
    receiver: JobReceiver,
}

impl Engine {
    pub fn build(config: &NetwatchConfig, transports: Transports) -> Result<Self, EngineError> {
        let mut vendors = VendorTable::builtin();
        if let Some(path) = &config.discover.vendor_file {
            let added = vendors.load_file(path)?;
            tracing::info!(path = %path, added, total = vendors.len(), "Vendor table extended");
        }

        let tracker = Arc::new(DeviceTracker::new(
            transports.store.clone(),
            config.monitor.availability_interval(),
        ));

        let sweep_prober =
            LivenessProber::new(transports.pinger.clone(), config.discover.probe_timeout());
        let check_prober = LivenessProber::new(transports.pinger, config.monitor.probe_timeout());
        let correlator = LinkLayerCorrelator::new(
            transports.link,
            Arc::new(vendors),
            config.discover.link_window(),
        );
        let orchestrator = Arc::new(DiscoveryOrchestrator::new(
            sweep_prober,
            correlator,
            tracker.clone(),
        ));
        let collector = Arc::new(MetricCollector::new(
            transports.snmp,
            check_prober.clone(),
            config.monitor.max_interfaces,
        ));

        let (queue, receiver) = JobQueue::new(config.worker.queue_capacity);
        let handler = Arc::new(EngineHandler::new(
            orchestrator.clone(),
            check_prober,
            collector.clone(),
            tracker.clone(),
        ));
        let pool = WorkerPool::new(
            queue.registry().clone(),
            handler,
            config.worker.max_concurrent_jobs,
            RetryPolicy::from_config(&config.worker),
        );
        let scheduler = Scheduler::new(
            queue.clone(),
            transports.store,
            &config.discover,
            &config.monitor,
        )?;
        let api = NetwatchApi::new(
            queue,
            tracker.clone(),
            config.monitor.metrics_limit,
            config.monitor.interfaces_limit,
        )
        .with_collector(collector);

        Ok(Self {
            api,
            orchestrator,
            tracker,
            scheduler,
            pool,
            receiver,
        })
    }

    pub fn api(&self) -> NetwatchApi {
        self.api.clone()
    }

    /// Direct access for one-shot scans that bypass the queue.
    pub fn orchestrator(&self) -> &Arc<DiscoveryOrchestrator> {
        &self.orchestrator
    }

    pub fn tracker(&self) -> &Arc<DeviceTracker> {
        &self.tracker
    }

    /// Start the worker pool and the scheduler timers.
    pub fn start(self) -> RunningEngine {
        let workers = tokio::spawn(self.pool.run(self.receiver));
        let scheduler = tokio::spawn(self.scheduler.run());
        RunningEngine {
            api: self.api,
            workers,
            scheduler,
        }
    }
}

pub struct RunningEngine {
    api: NetwatchApi,
    workers: JoinHandle<()>,
    scheduler: JoinHandle<()>,
}

impl RunningEngine {
    pub fn api(&self) -> &NetwatchApi {
        &self.api
    }

    /// Stop triggering new work and give running jobs a grace period.
    pub async fn shutdown(self) {
        self.scheduler.abort();
        let _ = self.scheduler.await;
        drop(self.api);

        let mut workers = self.workers;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut workers).await.is_err() {
            tracing::warn!("Worker pool did not drain in time, aborting");
            workers.abort();
        }
    }
}
