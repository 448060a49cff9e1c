//! Cooperative single-threaded event loop
//!
//! Multiplexes level-triggered file descriptor readiness with periodic
//! timers over one `poll(2)` call per iteration; the poll is the only point
//! at which the process blocks. Callbacks receive a mutable reference to a
//! caller-supplied context (the node) and return `false` to stop the loop.
//!
//! Within an iteration every ready descriptor callback runs, in
//! registration order, before any timer callback. Timers re-arm relative to
//! their invocation instant, so a slow callback skews later firings instead
//! of producing a catch-up burst.

use crate::error::Result;
use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

type Callback<C> = Box<dyn FnMut(&mut C) -> bool>;

struct Timer<C> {
    interval: Duration,
    next_fire: Instant,
    callback: Callback<C>,
}

/// Event loop over a context type `C`.
///
/// Registered descriptors must stay open for as long as the loop runs; the
/// loop polls them by raw value each iteration.
pub struct EventLoop<C> {
    fds: Vec<RawFd>,
    fd_callbacks: Vec<Callback<C>>,
    timers: Vec<Timer<C>>,
}

impl<C> Default for EventLoop<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> EventLoop<C> {
    pub fn new() -> Self {
        Self {
            fds: Vec::new(),
            fd_callbacks: Vec::new(),
            timers: Vec::new(),
        }
    }

    /// Register a readiness callback for a descriptor. Dispatch order
    /// follows registration order.
    pub fn register_fd(
        &mut self,
        fd: RawFd,
        callback: impl FnMut(&mut C) -> bool + 'static,
    ) -> &mut Self {
        self.fds.push(fd);
        self.fd_callbacks.push(Box::new(callback));
        self
    }

    /// Register a periodic timer. The first firing is one interval from now.
    pub fn register_timer(
        &mut self,
        interval: Duration,
        callback: impl FnMut(&mut C) -> bool + 'static,
    ) -> &mut Self {
        self.timers.push(Timer {
            interval,
            next_fire: Instant::now() + interval,
            callback: Box::new(callback),
        });
        self
    }

    /// Run until a callback returns `false`. Interrupted waits are retried.
    pub fn run(&mut self, ctx: &mut C) -> Result<()> {
        let mut pollfds: Vec<libc::pollfd> = self
            .fds
            .iter()
            .map(|&fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        loop {
            let rc = unsafe {
                libc::poll(
                    pollfds.as_mut_ptr(),
                    pollfds.len() as libc::nfds_t,
                    self.poll_timeout_ms(),
                )
            };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }

            for (pollfd, callback) in pollfds.iter_mut().zip(&mut self.fd_callbacks) {
                if pollfd.revents != 0 {
                    pollfd.revents = 0;
                    if !callback(ctx) {
                        return Ok(());
                    }
                }
            }

            for timer in &mut self.timers {
                let now = Instant::now();
                if now >= timer.next_fire {
                    timer.next_fire = now + timer.interval;
                    if !(timer.callback)(ctx) {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Milliseconds until the earliest timer fires, zero if one is already
    /// due, -1 (wait forever) without timers.
    fn poll_timeout_ms(&self) -> libc::c_int {
        let now = Instant::now();
        self.timers
            .iter()
            .map(|t| {
                let remaining = t.next_fire.saturating_duration_since(now).as_millis();
                remaining.min(libc::c_int::MAX as u128) as libc::c_int
            })
            .min()
            .unwrap_or(-1)
    }
}
