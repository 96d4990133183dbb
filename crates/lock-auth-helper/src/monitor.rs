//! Background reader for the caller's input stream.
//!
//! The monitor owns the input on a dedicated thread so a blocking read never
//! stalls the dispatch loop. Each complete line is published into the
//! session's [`SecretSlot`]; the thread then waits for that line to be taken
//! before reading on, so end of stream never overtakes a line already sent.
//!
//! The thread polls the descriptor with a short timeout so it notices
//! cancellation even when the caller sends nothing. End of stream and read
//! errors both end the monitor and cancel the session.

use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lock_auth_core::{CancelReason, PendingSecret, SecretSlot};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use zeroize::{Zeroize, Zeroizing};

/// Bytes requested from the input per read.
pub const READ_CHUNK: usize = 256;

/// How long one `poll(2)` waits before the cancellation flag is rechecked.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed-capacity, memory-locked buffer that splits input into lines.
///
/// Lines longer than `max_line_len` are truncated; the excess up to the next
/// newline is dropped. Bytes are scrubbed as soon as they leave the buffer.
pub struct LineAssembler {
    buf: Box<[u8]>,
    len: usize,
    /// Offset of the first byte after the last stored newline.
    line_start: usize,
    max_line_len: usize,
    discarding: bool,
    memory_locked: bool,
}

impl LineAssembler {
    /// Create an assembler for lines of at most `max_line_len` bytes.
    pub fn new(max_line_len: usize) -> Self {
        let max_line_len = max_line_len.max(1);
        let mut assembler = Self {
            buf: vec![0u8; max_line_len + READ_CHUNK].into_boxed_slice(),
            len: 0,
            line_start: 0,
            max_line_len,
            discarding: false,
            memory_locked: false,
        };
        assembler.try_lock_memory();
        assembler
    }

    fn try_lock_memory(&mut self) {
        // Safety: the region is the boxed slice owned by self, which never
        // reallocates.
        let result = unsafe { memsec::mlock(self.buf.as_mut_ptr(), self.buf.len()) };
        if result {
            self.memory_locked = true;
            debug!(bytes = self.buf.len(), "Input buffer memory locked");
        } else {
            debug!("Failed to lock input buffer memory (this is normal for unprivileged processes)");
        }
    }

    /// Append freshly read bytes.
    ///
    /// Callers extract every complete line with [`next_line`](Self::next_line)
    /// before pushing again, which keeps the buffer within capacity.
    pub fn push(&mut self, data: &[u8]) {
        for &byte in data {
            if self.discarding {
                if byte == b'\n' {
                    self.discarding = false;
                    self.store(byte);
                }
                continue;
            }
            if byte != b'\n' && self.len - self.line_start >= self.max_line_len {
                warn!(max_line_len = self.max_line_len, "Input line too long, truncating");
                self.discarding = true;
                continue;
            }
            self.store(byte);
        }
    }

    fn store(&mut self, byte: u8) {
        if let Some(slot) = self.buf.get_mut(self.len) {
            *slot = byte;
            self.len += 1;
            if byte == b'\n' {
                self.line_start = self.len;
            }
        }
    }

    /// Take the next complete line, without its newline.
    ///
    /// The line's bytes are moved into a [`PendingSecret`] and scrubbed from
    /// the buffer, along with the slack left by shifting the remainder down.
    pub fn next_line(&mut self) -> Option<PendingSecret> {
        let end = self.buf[..self.len].iter().position(|&b| b == b'\n')?;
        let secret = PendingSecret::from_buffer(&mut self.buf[..end]);

        let consumed = end + 1;
        self.buf.copy_within(consumed..self.len, 0);
        let remaining = self.len - consumed;
        self.buf[remaining..self.len].zeroize();
        self.len = remaining;
        self.line_start -= consumed;

        Some(secret)
    }

    /// Number of buffered bytes not yet returned as a line.
    pub fn buffered(&self) -> usize {
        self.len
    }

    /// Scrub everything, including an incomplete trailing line.
    pub fn clear(&mut self) {
        self.buf.zeroize();
        self.len = 0;
        self.line_start = 0;
        self.discarding = false;
    }
}

impl Drop for LineAssembler {
    fn drop(&mut self) {
        self.buf.zeroize();
        if self.memory_locked {
            // Safety: unlocking the region locked in try_lock_memory
            unsafe {
                memsec::munlock(self.buf.as_mut_ptr(), self.buf.len());
            }
        }
    }
}

/// Handle to the running monitor thread.
pub struct StdinMonitor {
    handle: Option<JoinHandle<()>>,
    done: Option<oneshot::Receiver<()>>,
}

impl StdinMonitor {
    /// Start reading `input` on a new thread.
    pub fn spawn<I>(input: I, slot: Arc<SecretSlot>, max_line_len: usize) -> io::Result<Self>
    where
        I: Read + AsRawFd + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();

        let handle = thread::Builder::new()
            .name("stdin-monitor".to_string())
            .spawn(move || {
                let mut assembler = LineAssembler::new(max_line_len);
                read_loop(input, &slot, &mut assembler);
                assembler.clear();

                if slot.cancel(CancelReason::InputClosed) {
                    debug!("Input closed, session cancelled");
                }
                if slot.clear() {
                    debug!("Discarded unconsumed input line");
                }
                let _ = done_tx.send(());
            })?;

        Ok(Self {
            handle: Some(handle),
            done: Some(done_rx),
        })
    }

    /// Wait until the monitor thread has finished its cleanup.
    ///
    /// Cancel-safe; returns immediately once completion has been observed.
    pub async fn finished(&mut self) {
        if let Some(done) = self.done.as_mut() {
            let _ = done.await;
            self.done = None;
        }
    }

    /// Whether completion has been observed through [`finished`](Self::finished).
    pub fn is_finished(&self) -> bool {
        self.done.is_none()
    }

    /// Reap the thread. Only call after [`finished`](Self::finished) returned.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Stdin monitor thread panicked");
            }
        }
    }
}

fn read_loop<I: Read + AsRawFd>(mut input: I, slot: &SecretSlot, assembler: &mut LineAssembler) {
    let fd = input.as_raw_fd();

    loop {
        if slot.is_cancelled() {
            debug!("Stdin monitor observed cancellation");
            return;
        }

        if let Some(line) = assembler.next_line() {
            trace!(len = line.len(), "Read input line");
            if !slot.publish(line) || !slot.wait_consumed() {
                return;
            }
            continue;
        }

        match wait_readable(fd, POLL_INTERVAL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                debug!(error = %e, "Polling input failed, treating as end of stream");
                return;
            }
        }

        let mut chunk = Zeroizing::new([0u8; READ_CHUNK]);
        match input.read(&mut chunk[..]) {
            Ok(0) => {
                if assembler.buffered() > 0 {
                    debug!("Discarding incomplete line at end of stream");
                }
                debug!("End of input stream");
                return;
            }
            Ok(n) => assembler.push(&chunk[..n]),
            Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) => {}
            Err(e) => {
                debug!(error = %e, "Reading input failed, treating as end of stream");
                return;
            }
        }
    }
}

/// Wait up to `timeout` for `fd` to become readable (or hung up).
fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

    // Safety: pfd is a valid pollfd for the duration of the call
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0)
}
