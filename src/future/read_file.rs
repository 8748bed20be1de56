use crate::context;
use crate::task::Coroutine;
use crate::uring::ReadRequest;
use std::fs;
use std::future::Future;
use std::io;
use std::mem;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Re-poll cadence while the submission ring has no free slot.
const RING_FULL_BACKOFF: Duration = Duration::from_millis(5);

/// Reads a whole file asynchronously through the pool's read engine.
///
/// The file is opened and sized eagerly; the read itself is submitted on
/// first poll and the coroutine resumes once the completion is reaped, with
/// a buffer holding the file's bytes. A file that cannot be opened resolves
/// immediately to the error without touching the engine.
///
/// # Examples
///
/// ```no_run
/// # async fn doc() -> std::io::Result<()> {
/// let bytes = taskring::read_file("/etc/hostname").await?;
/// println!("{}", String::from_utf8_lossy(&bytes));
/// # Ok(())
/// # }
/// ```
pub fn read_file(path: impl AsRef<Path>) -> ReadFile {
    let state = match fs::File::open(path).and_then(|file| {
        let len = file.metadata()?.len();
        Ok((file, len))
    }) {
        Ok((file, len)) => State::Unsubmitted {
            file,
            buffer: vec![0u8; len as usize],
            turn: None,
        },
        Err(e) => State::Failed(e),
    };

    ReadFile { state }
}

pub struct ReadFile {
    state: State,
}

enum State {
    /// Opening the file failed; ready immediately.
    Failed(io::Error),

    /// Opened but not yet handed to the engine. `turn` is set once a
    /// submission turn has been claimed while the ring was full.
    Unsubmitted {
        file: fs::File,
        buffer: Vec<u8>,
        turn: Option<u32>,
    },

    /// Submitted; the completion reaper resumes us. The file must stay open
    /// and the buffer allocation stays put until then.
    InFlight { _file: fs::File, buffer: Vec<u8> },

    Done,
}

impl Future for ReadFile {
    type Output = io::Result<Vec<u8>>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match mem::replace(&mut self.state, State::Done) {
            State::Failed(e) => Poll::Ready(Err(e)),

            State::Unsubmitted {
                file,
                mut buffer,
                turn,
            } => {
                let coro = context::current_coroutine();
                let scheduler = Arc::clone(Coroutine::scheduler(&coro));
                let slots = &scheduler.engine.slots;

                // The claim is kept across back-off rounds; the pump will not
                // pass our turn until we publish.
                let turn = turn.unwrap_or_else(|| slots.claim());

                if slots.is_full(turn) {
                    // No room ahead of the pump yet; retry after a short
                    // cooperative sleep instead of blocking the worker.
                    scheduler
                        .delayed
                        .schedule(Coroutine::resume_task(&coro), Instant::now() + RING_FULL_BACKOFF);
                    self.state = State::Unsubmitted {
                        file,
                        buffer,
                        turn: Some(turn),
                    };
                    return Poll::Pending;
                }

                let request = ReadRequest {
                    fd: file.as_raw_fd(),
                    buf: buffer.as_mut_ptr(),
                    len: buffer.len() as u32,
                    user_data: Coroutine::into_user_data(Arc::clone(&coro)),
                };

                scheduler.begin_io();
                slots.publish(turn, request);

                self.state = State::InFlight {
                    _file: file,
                    buffer,
                };
                Poll::Pending
            }

            State::InFlight { _file, buffer } => Poll::Ready(Ok(buffer)),

            State::Done => panic!("ReadFile polled after completion"),
        }
    }
}
