use std::io::{BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::profile::ShellProfile;

// ---------------------------------------------------------------------------
// PendingOutput
// ---------------------------------------------------------------------------

/// Receiving end of the shell's merged output stream.
///
/// Lines arrive in the order each pipe produced them. stdout and stderr
/// share the queue, so lines from the two pipes may interleave.
#[derive(Debug)]
pub struct PendingOutput {
    rx: flume::Receiver<String>,
}

impl PendingOutput {
    pub(crate) fn new(rx: flume::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Block until the next line or `deadline`.
    pub fn recv_deadline(&self, deadline: Instant) -> Result<String, flume::RecvTimeoutError> {
        self.rx.recv_deadline(deadline)
    }

    /// Number of lines currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Discard queued lines until the stream has been quiet for `grace`, or
    /// until `max` has elapsed. Returns the number of discarded lines.
    pub fn drain(&self, grace: Duration, max: Duration) -> usize {
        let hard_stop = Instant::now() + max;
        let mut discarded = 0;
        loop {
            let now = Instant::now();
            if now >= hard_stop {
                break;
            }
            let quiet_until = (now + grace).min(hard_stop);
            match self.rx.recv_deadline(quiet_until) {
                Ok(line) => {
                    trace!(line = %line, "discarding stale output");
                    discarded += 1;
                }
                Err(_) => break,
            }
        }
        discarded
    }
}

// ---------------------------------------------------------------------------
// Reader threads
// ---------------------------------------------------------------------------

/// Spawn a thread that forwards `source` line by line into `tx` until EOF,
/// a read error, `stop` being set, or the receiver going away.
pub(crate) fn spawn_reader<R>(
    name: &str,
    source: R,
    profile: ShellProfile,
    tx: flume::Sender<String>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let label = name.to_string();
    std::thread::Builder::new()
        .name(format!("shell-{name}"))
        .spawn(move || {
            let mut reader = BufReader::new(source);
            let mut buf = Vec::with_capacity(256);
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                        while matches!(buf.last(), Some(b'\n' | b'\r')) {
                            buf.pop();
                        }
                        if tx.send(profile.decode(&buf)).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!(pipe = %label, "shell reader error: {e}");
                        break;
                    }
                }
            }
            debug!(pipe = %label, "shell reader finished");
        })
}
