//! Worker-pool supervisor
//!
//! Builds one context per worker thread, runs the pool, and owns the
//! shutdown choreography: a monitor loop that notices early worker death,
//! then a termination loop that keeps signalling every not-yet-joined
//! worker until all of them are joined. Inherited packet descriptors are
//! closed exactly once, after the last join.

use crate::config::{ResolverTransportConfig, RuntimeConfig};
use crate::io::interrupt;
use crate::signal;
use crate::xlat::external::ResolverClient;
use crate::xlat::worker::{self, WorkerContext};
use crate::{Error, Result};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info};

/// How often the monitor loop checks for early worker death.
const MONITOR_INTERVAL: Duration = Duration::from_millis(100);
/// Back-off between termination-signal rounds during shutdown.
const TERMINATION_INTERVAL: Duration = Duration::from_millis(50);

/// Packet-descriptor layout for the pool.
pub enum IoPlan {
    /// One inherited (read, write) pair per worker.
    Pairs(Vec<(RawFd, RawFd)>),
    /// One tunnel queue descriptor per worker (multi-queue).
    PerWorker(Vec<RawFd>),
    /// A single descriptor shared by every worker.
    Shared(RawFd),
}

struct Worker {
    handle: JoinHandle<Result<()>>,
    thread_id: Arc<AtomicU64>,
}

pub struct Supervisor {
    cfg: Arc<RuntimeConfig>,
    io: IoPlan,
    resolver_fds: Vec<(RawFd, RawFd)>,
}

impl Supervisor {
    pub fn new(
        cfg: Arc<RuntimeConfig>,
        io: IoPlan,
        resolver_fds: Vec<(RawFd, RawFd)>,
    ) -> Result<Self> {
        let threads = cfg.threads;
        match &io {
            IoPlan::Pairs(pairs) if pairs.len() != threads => {
                return Err(Error::Config(format!(
                    "{} descriptor pairs for {} workers",
                    pairs.len(),
                    threads
                )));
            }
            IoPlan::PerWorker(fds) if fds.len() != threads => {
                return Err(Error::Config(format!(
                    "{} tunnel descriptors for {} workers",
                    fds.len(),
                    threads
                )));
            }
            _ => {}
        }

        let inherited_resolver = matches!(
            cfg.external.as_ref().map(|ext| &ext.transport),
            Some(ResolverTransportConfig::InheritedFds)
        );
        if inherited_resolver && resolver_fds.len() != threads {
            return Err(Error::Config(format!(
                "{} resolver descriptor pairs for {} workers",
                resolver_fds.len(),
                threads
            )));
        }
        if !inherited_resolver && !resolver_fds.is_empty() {
            return Err(Error::Config(
                "resolver descriptors given but the configured transport does not use them".into(),
            ));
        }

        Ok(Self {
            cfg,
            io,
            resolver_fds,
        })
    }

    pub fn run(self) -> Result<()> {
        signal::rearm();
        let contexts = self.build_contexts()?;

        let mut workers = Vec::with_capacity(contexts.len());
        for ctx in contexts {
            let thread_id = Arc::clone(&ctx.thread_id);
            let handle = std::thread::Builder::new()
                .name(format!("xlat-{}", ctx.index))
                .spawn(move || worker::run(ctx))
                .map_err(Error::Io)?;
            workers.push(Worker { handle, thread_id });
        }
        info!(workers = workers.len(), mode = ?self.cfg.mode, "translator running");

        let early_exit = monitor(&workers);
        // Reached on SIGINT/SIGTERM or when a worker died early; either
        // way the whole pool winds down now.
        signal::request_shutdown();
        let results = terminate(workers);
        self.close_packet_fds();

        // A worker leaving before shutdown is fatal even when its own
        // result is clean (EOF on a packet descriptor, for instance).
        let mut outcome = if early_exit {
            Err(Error::WorkerDied)
        } else {
            Ok(())
        };
        for result in results {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(%err, "worker failed");
                    outcome = Err(Error::WorkerDied);
                }
                Err(_) => {
                    error!("worker panicked");
                    outcome = Err(Error::WorkerDied);
                }
            }
        }
        info!("translator stopped");
        outcome
    }

    fn build_contexts(&self) -> Result<Vec<WorkerContext>> {
        let mut contexts = Vec::with_capacity(self.cfg.threads);
        for index in 0..self.cfg.threads {
            let (read_fd, write_fd) = match &self.io {
                IoPlan::Pairs(pairs) => pairs[index],
                IoPlan::PerWorker(fds) => (fds[index], fds[index]),
                IoPlan::Shared(fd) => (*fd, *fd),
            };

            let resolver = match &self.cfg.external {
                Some(ext) => {
                    let inherited =
                        matches!(ext.transport, ResolverTransportConfig::InheritedFds)
                            .then(|| self.resolver_fds[index]);
                    Some(ResolverClient::new(ext, inherited)?)
                }
                None => None,
            };

            contexts.push(WorkerContext {
                index,
                cfg: Arc::clone(&self.cfg),
                read_fd,
                write_fd,
                resolver,
                thread_id: Arc::new(AtomicU64::new(0)),
            });
        }
        Ok(contexts)
    }

    /// Closes every inherited packet descriptor once, duplicates removed
    /// so a shared descriptor is not closed twice.
    fn close_packet_fds(&self) {
        let mut fds = match &self.io {
            IoPlan::Pairs(pairs) => pairs
                .iter()
                .flat_map(|(read, write)| [*read, *write])
                .collect::<Vec<_>>(),
            IoPlan::PerWorker(list) => list.clone(),
            IoPlan::Shared(fd) => vec![*fd],
        };
        fds.sort_unstable();
        fds.dedup();
        for fd in fds {
            let _ = interrupt::close(fd);
        }
    }
}

/// Sleeps until shutdown is requested or some worker exits on its own.
/// Returns true in the latter case, while the run flag was still set.
fn monitor(workers: &[Worker]) -> bool {
    while signal::keep_running() {
        if workers.iter().any(|worker| worker.handle.is_finished()) {
            error!("a worker exited early, shutting the pool down");
            return true;
        }
        std::thread::sleep(MONITOR_INTERVAL);
    }
    false
}

/// Joins every worker, signalling the ones still stuck in a blocking
/// syscall on every round until none remain.
fn terminate(workers: Vec<Worker>) -> Vec<std::thread::Result<Result<()>>> {
    let mut pending: Vec<Option<Worker>> = workers.into_iter().map(Some).collect();
    let mut results = Vec::with_capacity(pending.len());

    loop {
        let mut remaining = false;
        for slot in pending.iter_mut() {
            let Some(worker) = slot else { continue };
            if worker.handle.is_finished() {
                let worker = slot.take().expect("slot checked above");
                results.push(worker.handle.join());
            } else {
                remaining = true;
                let tid = worker.thread_id.load(Ordering::SeqCst);
                // Zero means the worker has not published its handle yet;
                // it has not entered blocking I/O either, so skip it this
                // round.
                if tid != 0 {
                    unsafe {
                        libc::pthread_kill(tid as libc::pthread_t, signal::TERMINATION_SIGNAL);
                    }
                }
            }
        }
        if !remaining {
            return results;
        }
        std::thread::sleep(TERMINATION_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AddressingMode, FragmentPolicy, IoMode};

    fn config(threads: usize) -> Arc<RuntimeConfig> {
        Arc::new(RuntimeConfig {
            threads,
            mode: AddressingMode::Nat64,
            io_mode: IoMode::InheritedFds,
            tun_multi_queue: false,
            prefix: [0x00, 0x64, 0xff, 0x9b, 0, 0, 0, 0, 0, 0, 0, 0],
            translator_ipv4: [192, 0, 2, 1],
            translator_ipv6: [
                0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
            ],
            allow_private_ipv4: false,
            external: None,
            mtu_ipv4: 1500,
            mtu_ipv6: 1500,
            ttl_decrement: 1,
            copy_dscp_ecn: true,
            fragmentation: FragmentPolicy::Allow,
        })
    }

    #[test]
    fn test_descriptor_count_must_match_threads() {
        let result = Supervisor::new(config(2), IoPlan::Pairs(vec![(3, 4)]), Vec::new());
        assert!(matches!(result, Err(Error::Config(_))));

        let result = Supervisor::new(config(2), IoPlan::PerWorker(vec![5]), Vec::new());
        assert!(matches!(result, Err(Error::Config(_))));

        assert!(Supervisor::new(config(4), IoPlan::Shared(5), Vec::new()).is_ok());
    }

    #[test]
    fn test_unexpected_resolver_fds_rejected() {
        let result = Supervisor::new(config(1), IoPlan::Shared(5), vec![(6, 7)]);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
