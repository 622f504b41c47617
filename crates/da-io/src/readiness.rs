//! Multi-worker, edge-triggered, one-shot readiness loop.
//!
//! Wraps `mio::Poll` (epoll on Linux). Each registered source gets a
//! handler; after the handler runs, the loop re-registers the source for
//! the same interest (the one-shot "rearm" step), exactly mirroring the
//! add-then-rearm pattern of an `EPOLLONESHOT` event loop. A dedicated
//! `mio::Waker` plays the role of the shutdown eventfd: `stop()` wakes
//! every blocked worker so they observe the stop flag and return.
//!
//! `mio::Poll::poll` takes `&mut self`, so true concurrent `epoll_wait`
//! calls from multiple threads aren't reachable through the safe API
//! without unsafe fd sharing. This loop serializes the wait call itself
//! behind a mutex and releases it before dispatching, so several workers
//! can still be registered and can still take turns waiting — the
//! one-shot semantics and edge-triggered re-arm behavior are unaffected,
//! only true parallel blocking syscalls are not attempted.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Waker};

pub use mio::Token;

const SHUTDOWN_TOKEN: Token = Token(0);
const FIRST_DYNAMIC_TOKEN: usize = 1;

type Handler = Arc<dyn Fn(Token) + Send + Sync>;

struct Registration {
    socket: Arc<Mutex<UdpSocket>>,
    interest: Interest,
    handler: Handler,
}

/// A registry of non-blocking UDP sockets dispatched on readiness.
pub struct ReadinessLoop {
    poll: Mutex<Poll>,
    waker: Arc<Waker>,
    registrations: RwLock<HashMap<Token, Registration>>,
    next_token: AtomicUsize,
    running: AtomicBool,
}

impl ReadinessLoop {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), SHUTDOWN_TOKEN)?);
        Ok(ReadinessLoop {
            poll: Mutex::new(poll),
            waker,
            registrations: RwLock::new(HashMap::new()),
            next_token: AtomicUsize::new(FIRST_DYNAMIC_TOKEN),
            running: AtomicBool::new(true),
        })
    }

    /// Register a socket for `interest`, invoking `handler` on every
    /// readiness event until the registration is dropped via `deregister`.
    pub fn register(
        &self,
        socket: Arc<Mutex<UdpSocket>>,
        interest: Interest,
        handler: impl Fn(Token) + Send + Sync + 'static,
    ) -> io::Result<Token> {
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        {
            let poll = self.poll.lock().expect("readiness loop poll mutex poisoned");
            let mut guard = socket.lock().expect("socket mutex poisoned");
            poll.registry().register(&mut *guard, token, interest)?;
        }
        self.registrations.write().expect("registry poisoned").insert(
            token,
            Registration {
                socket,
                interest,
                handler: Arc::new(handler),
            },
        );
        Ok(token)
    }

    pub fn deregister(&self, token: Token) -> io::Result<()> {
        if let Some(reg) = self.registrations.write().expect("registry poisoned").remove(&token) {
            let poll = self.poll.lock().expect("readiness loop poll mutex poisoned");
            let mut guard = reg.socket.lock().expect("socket mutex poisoned");
            poll.registry().deregister(&mut *guard)?;
        }
        Ok(())
    }

    /// Run the dispatch loop until `stop()` is called. Safe to call from
    /// multiple worker threads on the same `ReadinessLoop`.
    pub fn run(&self) {
        let mut events = Events::with_capacity(128);
        while self.running.load(Ordering::Acquire) {
            let poll_result = {
                let mut poll = self.poll.lock().expect("readiness loop poll mutex poisoned");
                poll.poll(&mut events, None)
            };
            if let Err(err) = poll_result {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!(?err, "readiness loop poll failed");
                continue;
            }

            for event in events.iter() {
                if event.token() == SHUTDOWN_TOKEN {
                    continue;
                }
                self.dispatch(event.token());
            }
        }
    }

    fn dispatch(&self, token: Token) {
        let (handler, socket, interest) = {
            let registrations = self.registrations.read().expect("registry poisoned");
            match registrations.get(&token) {
                Some(reg) => (reg.handler.clone(), reg.socket.clone(), reg.interest),
                None => return,
            }
        };

        handler(token);

        if !self.running.load(Ordering::Acquire) {
            return;
        }

        // Rearm: a connection-refused on a datagram socket is a transient
        // condition the handler already logged and recovered from — the
        // rearm happens unconditionally so the socket keeps participating.
        let poll = self.poll.lock().expect("readiness loop poll mutex poisoned");
        let mut guard = socket.lock().expect("socket mutex poisoned");
        if let Err(err) = poll.registry().reregister(&mut *guard, token, interest) {
            tracing::warn!(?token, ?err, "failed to rearm readiness registration");
        }
    }

    /// Signal every blocked worker to return from `run()`. Call `times`
    /// equal to (or greater than) the number of workers calling `run()`
    /// concurrently, so each gets its own wake-up.
    pub fn stop(&self, times: usize) {
        self.running.store(false, Ordering::Release);
        for _ in 0..times.max(1) {
            if let Err(err) = self.waker.wake() {
                tracing::warn!(?err, "failed to wake readiness loop worker");
            }
        }
    }
}
