//! Worker thread loop
//!
//! Read one packet, translate, write the result(s), repeat. The loop exits
//! when the run flag clears: either a blocking syscall returns the
//! interruption outcome, or the flag is seen at the top of the loop.

use super::addr::AddressTranslator;
use super::external::ResolverClient;
use super::{v4_to_v6, v6_to_v4, OutPackets, PacketDrop, XlatState};
use crate::config::{RuntimeConfig, MAX_PACKET_SIZE};
use crate::io::interrupt::{self, IoOutcome};
use crate::signal;
use crate::Result;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Everything a worker owns, assembled by the supervisor before the thread
/// starts. Nothing in here is shared with another worker.
pub struct WorkerContext {
    pub index: usize,
    pub cfg: Arc<RuntimeConfig>,
    pub read_fd: RawFd,
    pub write_fd: RawFd,
    pub resolver: Option<ResolverClient>,
    /// The worker publishes its pthread handle here so the supervisor can
    /// aim the termination signal at exactly this thread.
    pub thread_id: Arc<AtomicU64>,
}

pub fn run(ctx: WorkerContext) -> Result<()> {
    ctx.thread_id
        .store(unsafe { libc::pthread_self() } as u64, Ordering::SeqCst);

    let translator = AddressTranslator::new(&ctx.cfg, ctx.resolver);
    let mut state = XlatState::new(Arc::clone(&ctx.cfg), translator)?;
    // One byte beyond the limit so a maximum-size packet and an oversize
    // one are distinguishable from the read length alone.
    let mut buf = vec![0u8; MAX_PACKET_SIZE + 1];
    let mut out = OutPackets::new();

    debug!(worker = ctx.index, "worker running");
    while signal::keep_running() {
        let len = match interrupt::read(ctx.read_fd, &mut buf)? {
            IoOutcome::Transferred(0) => {
                warn!(worker = ctx.index, "packet descriptor reached end of stream");
                break;
            }
            IoOutcome::Transferred(len) => len,
            IoOutcome::Interrupted => break,
        };
        if len > MAX_PACKET_SIZE {
            trace!(worker = ctx.index, len, "oversize packet dropped");
            continue;
        }
        translate_one(&mut buf[..len], &mut state, &mut out, ctx.write_fd, ctx.index)?;
    }
    debug!(worker = ctx.index, "worker stopped");
    Ok(())
}

fn translate_one(
    pkt: &mut [u8],
    state: &mut XlatState,
    out: &mut OutPackets,
    write_fd: RawFd,
    worker: usize,
) -> Result<()> {
    let result = match pkt.first().map(|byte| byte >> 4) {
        Some(4) => v4_to_v6::translate(pkt, state, out),
        Some(6) => v6_to_v4::translate(pkt, state, out),
        _ => Err(PacketDrop::Malformed),
    };

    match result {
        Ok(()) => {
            for (header, payload) in out.packets(pkt) {
                if let IoOutcome::Interrupted = interrupt::writev(write_fd, &[header, payload])? {
                    break;
                }
            }
        }
        // Cancellation mid-translation is not a drop worth recording.
        Err(PacketDrop::Interrupted) => {}
        Err(reason) => trace!(worker, ?reason, len = pkt.len(), "packet dropped"),
    }
    Ok(())
}
