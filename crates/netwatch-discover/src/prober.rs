//! Liveness prober.
//!
//! Fans out one ICMP echo per address, each bounded by the probe timeout,
//! and fans the results back in. A failed or timed-out probe is reported
//! as unreachable; only a transport that cannot send at all is an error.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};
use tokio::sync::OnceCell;
use tokio::task::JoinSet;

use crate::error::{DiscoverError, Result};

const PAYLOAD: [u8; 56] = [0; 56];

/// Result of probing one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable(Duration),
    Unreachable,
}

impl ProbeOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Self::Reachable(_))
    }

    pub fn latency(&self) -> Option<Duration> {
        match self {
            Self::Reachable(rtt) => Some(*rtt),
            Self::Unreachable => None,
        }
    }
}

/// Echo-request transport.
#[async_trait]
pub trait Pinger: Send + Sync {
    /// Fail if probes to this address family cannot be sent at all
    /// (no raw socket permission, no interface).
    async fn ensure_ready(&self, family: IpAddr) -> Result<()>;

    /// Send one echo request and return the round-trip time.
    async fn ping(&self, address: IpAddr, timeout: Duration) -> Result<Duration>;
}

/// ICMP pinger backed by `surge-ping`. Sockets are opened on first use.
#[derive(Default)]
pub struct IcmpPinger {
    v4: OnceCell<Client>,
    v6: OnceCell<Client>,
}

impl IcmpPinger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self, address: IpAddr) -> Result<&Client> {
        let opened = match address {
            IpAddr::V4(_) => {
                self.v4
                    .get_or_try_init(|| async { Client::new(&Config::default()) })
                    .await
            }
            IpAddr::V6(_) => {
                self.v6
                    .get_or_try_init(|| async {
                        Client::new(&Config::builder().kind(ICMP::V6).build())
                    })
                    .await
            }
        };
        opened.map_err(|e| DiscoverError::ProbeUnavailable(e.to_string()))
    }
}

#[async_trait]
impl Pinger for IcmpPinger {
    async fn ensure_ready(&self, family: IpAddr) -> Result<()> {
        self.client(family).await.map(|_| ())
    }

    async fn ping(&self, address: IpAddr, timeout: Duration) -> Result<Duration> {
        let client = self.client(address).await?;
        let mut pinger = client.pinger(address, PingIdentifier(rand::random())).await;
        pinger.timeout(timeout);
        let (_packet, rtt) = pinger
            .ping(PingSequence(0), &PAYLOAD)
            .await
            .map_err(|e| DiscoverError::Probe(e.to_string()))?;
        Ok(rtt)
    }
}

/// Concurrent reachability prober.
#[derive(Clone)]
pub struct LivenessProber {
    pinger: Arc<dyn Pinger>,
    timeout: Duration,
}

impl LivenessProber {
    pub fn new(pinger: Arc<dyn Pinger>, timeout: Duration) -> Self {
        Self { pinger, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe a single address.
    pub async fn probe(&self, address: IpAddr) -> Result<ProbeOutcome> {
        self.pinger.ensure_ready(address).await?;
        Ok(probe_once(self.pinger.as_ref(), address, self.timeout).await)
    }

    /// Probe every address in parallel. Completes within roughly one
    /// timeout regardless of the number of addresses.
    pub async fn sweep(&self, addresses: &[IpAddr]) -> Result<HashMap<IpAddr, ProbeOutcome>> {
        let Some(first) = addresses.first() else {
            return Ok(HashMap::new());
        };
        self.pinger.ensure_ready(*first).await?;

        let mut outcomes: HashMap<IpAddr, ProbeOutcome> = addresses
            .iter()
            .map(|a| (*a, ProbeOutcome::Unreachable))
            .collect();

        let mut probes = JoinSet::new();
        for &address in addresses {
            let pinger = self.pinger.clone();
            let timeout = self.timeout;
            probes.spawn(async move {
                let outcome = probe_once(pinger.as_ref(), address, timeout).await;
                (address, outcome)
            });
        }

        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((address, outcome)) => {
                    outcomes.insert(address, outcome);
                }
                Err(e) => tracing::warn!(error = %e, "Probe task aborted"),
            }
        }

        let reachable = outcomes.values().filter(|o| o.is_reachable()).count();
        tracing::debug!(probed = addresses.len(), reachable, "Sweep finished");
        Ok(outcomes)
    }
}

async fn probe_once(pinger: &dyn Pinger, address: IpAddr, timeout: Duration) -> ProbeOutcome {
    match tokio::time::timeout(timeout, pinger.ping(address, timeout)).await {
        Ok(Ok(rtt)) => ProbeOutcome::Reachable(rtt),
        Ok(Err(e)) => {
            tracing::debug!(address = %address, error = %e, "Probe failed");
            ProbeOutcome::Unreachable
        }
        Err(_) => ProbeOutcome::Unreachable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    /// Answers for configured addresses; everything else hangs past the timeout.
    struct ScriptedPinger {
        answers: HashMap<IpAddr, Duration>,
        ready: bool,
    }

    #[async_trait]
    impl Pinger for ScriptedPinger {
        async fn ensure_ready(&self, _family: IpAddr) -> Result<()> {
            if self.ready {
                Ok(())
            } else {
                Err(DiscoverError::ProbeUnavailable("no socket".to_string()))
            }
        }

        async fn ping(&self, address: IpAddr, _timeout: Duration) -> Result<Duration> {
            match self.answers.get(&address) {
                Some(rtt) => Ok(*rtt),
                None => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(DiscoverError::Probe("no reply".to_string()))
                }
            }
        }
    }

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_sweep_reports_each_address() {
        let pinger = ScriptedPinger {
            answers: HashMap::from([(addr("10.0.0.1"), Duration::from_millis(4))]),
            ready: true,
        };
        let prober = LivenessProber::new(Arc::new(pinger), Duration::from_millis(50));
        let outcomes = prober
            .sweep(&[addr("10.0.0.1"), addr("10.0.0.2")])
            .await
            .unwrap();

        assert_eq!(
            outcomes[&addr("10.0.0.1")],
            ProbeOutcome::Reachable(Duration::from_millis(4))
        );
        assert_eq!(outcomes[&addr("10.0.0.2")], ProbeOutcome::Unreachable);
    }

    #[tokio::test]
    async fn test_sweep_is_parallel() {
        let pinger = ScriptedPinger {
            answers: HashMap::new(),
            ready: true,
        };
        let prober = LivenessProber::new(Arc::new(pinger), Duration::from_millis(100));
        let targets: Vec<IpAddr> = (1..=254).map(|i| IpAddr::from([10, 0, 0, i])).collect();

        let started = Instant::now();
        let outcomes = prober.sweep(&targets).await.unwrap();
        assert_eq!(outcomes.len(), 254);
        assert!(outcomes.values().all(|o| !o.is_reachable()));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unready_transport_is_an_error() {
        let pinger = ScriptedPinger {
            answers: HashMap::new(),
            ready: false,
        };
        let prober = LivenessProber::new(Arc::new(pinger), Duration::from_millis(10));
        assert!(prober.sweep(&[addr("10.0.0.1")]).await.is_err());
        assert!(prober.sweep(&[]).await.unwrap().is_empty());
    }
}
