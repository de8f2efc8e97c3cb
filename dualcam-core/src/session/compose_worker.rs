use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flume::{RecvTimeoutError, Sender, TrySendError};

use crate::models::diagnostics::DropReason;
use crate::models::error::CompositorError;
use crate::models::layout::Layout;
use crate::models::media::Frame;
use crate::traits::compositor::Compositor;

struct ComposeJob {
    front: Arc<Frame>,
    back: Arc<Frame>,
    layout: Layout,
    deadline: Instant,
    reply: Sender<Result<Frame, CompositorError>>,
}

/// Dedicated composition thread.
///
/// ```text
/// [appendBack] ──try_send──→ [job slot (1)] ──→ [frame-compositor thread]
///      ↑                                               │
///      └───────────── reply (waits ≤ budget) ──────────┘
/// ```
///
/// Callers never queue behind more than one pending pair: a full slot is
/// reported as `CompositorBusy`, a missed budget as `CompositorTimeout`,
/// and a job picked up after its deadline is skipped.
pub struct ComposeWorker {
    jobs: Option<Sender<ComposeJob>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ComposeWorker {
    pub fn spawn<C: Compositor + 'static>(compositor: Arc<C>) -> Self {
        let (jobs, queue) = flume::bounded::<ComposeJob>(1);

        let handle = thread::Builder::new()
            .name("frame-compositor".into())
            .spawn(move || {
                for job in queue.iter() {
                    if Instant::now() >= job.deadline {
                        log::debug!("Skipping composition picked up after its deadline");
                        continue;
                    }
                    let result = compositor.compose(&job.front, &job.back, &job.layout);
                    // The caller may have given up already; the frame then
                    // returns to its pool when dropped here.
                    let _ = job.reply.send(result);
                }
            })
            .expect("failed to spawn compositor thread");

        Self {
            jobs: Some(jobs),
            handle: Some(handle),
        }
    }

    /// Compose one pair, waiting at most `budget` for the result.
    pub fn compose(&self, front: Arc<Frame>, back: Arc<Frame>, layout: Layout, budget: Duration) -> Result<Frame, DropReason> {
        let Some(jobs) = self.jobs.as_ref() else {
            return Err(DropReason::Compositor(CompositorError::Backend("compose worker stopped".into())));
        };

        let deadline = Instant::now() + budget;
        let (reply, result) = flume::bounded(1);
        let job = ComposeJob {
            front,
            back,
            layout,
            deadline,
            reply,
        };

        match jobs.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(DropReason::CompositorBusy),
            Err(TrySendError::Disconnected(_)) => {
                return Err(DropReason::Compositor(CompositorError::Backend("compose worker stopped".into())))
            }
        }

        match result.recv_deadline(deadline) {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(e)) => Err(DropReason::Compositor(e)),
            // Disconnected means the job was skipped as late.
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Err(DropReason::CompositorTimeout),
        }
    }
}

impl Drop for ComposeWorker {
    fn drop(&mut self) {
        // Closing the channel ends the thread's loop.
        self.jobs = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
