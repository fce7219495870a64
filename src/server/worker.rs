//! Reactor event loop, worker threads and accept dispatch.
//!
//! Every worker runs one single-threaded [`Reactor`]; sessions never
//! migrate between reactors, so no session state is shared across
//! threads. The listener's reactor hands accepted sockets to workers
//! through a mutex-guarded queue plus a [`mio::Waker`]; in
//! single-worker mode it constructs sessions inline instead.

use crate::config::Config;
use crate::server::reactor::{DateCache, LoopCtx, TimerKind, Timers};
use crate::server::session::Session;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use openssl::ssl::SslContext;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Instant;

const WAKER_TOKEN: Token = Token(0);

pub(crate) type Intake = Arc<Mutex<VecDeque<TcpStream>>>;

fn lock_intake(intake: &Intake) -> MutexGuard<'_, VecDeque<TcpStream>> {
    match intake.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Handle to one worker thread.
pub(crate) struct WorkerHandle {
    queue: Intake,
    waker: Arc<Waker>,
    thread: Option<JoinHandle<()>>,
}

/// Round-robin handoff of accepted sockets to the worker pool.
pub(crate) struct AcceptDispatcher {
    workers: Vec<WorkerHandle>,
    next_worker: usize,
}

impl AcceptDispatcher {
    pub(crate) fn dispatch(&mut self, socket: TcpStream) {
        let worker = &self.workers[self.next_worker];
        self.next_worker = (self.next_worker + 1) % self.workers.len();
        lock_intake(&worker.queue).push_back(socket);
        let _ = worker.waker.wake();
    }

    /// Wake every worker (they will observe the shutdown flag, drain
    /// and exit) and join the threads.
    fn join(&mut self) {
        for worker in &mut self.workers {
            let _ = worker.waker.wake();
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

/// Spawn `config.num_worker` worker reactors. Their wakers are appended
/// to `wakers` so a shutdown can reach every loop.
pub(crate) fn spawn_workers(
    config: &Arc<Config>,
    tls: Option<&SslContext>,
    shutdown: &Arc<AtomicBool>,
    wakers: &Mutex<Vec<Arc<Waker>>>,
) -> io::Result<AcceptDispatcher> {
    let mut workers = Vec::with_capacity(config.num_worker);
    for i in 0..config.num_worker {
        if config.verbose {
            log::info!("spawning worker thread #{}", i);
        }
        let mut reactor = Reactor::new(config.clone(), tls.cloned(), shutdown.clone())?;
        let waker = Arc::new(reactor.waker()?);
        let queue = reactor.intake();
        match wakers.lock() {
            Ok(mut guard) => guard.push(waker.clone()),
            Err(poisoned) => poisoned.into_inner().push(waker.clone()),
        }
        let thread = std::thread::Builder::new()
            .name(format!("h2-worker-{}", i))
            .spawn(move || reactor.run())?;
        workers.push(WorkerHandle {
            queue,
            waker,
            thread: Some(thread),
        });
    }
    Ok(AcceptDispatcher {
        workers,
        next_worker: 0,
    })
}

/// Single-threaded cooperative event loop: sockets, timers and the
/// cross-thread wakeup.
pub(crate) struct Reactor {
    poll: Poll,
    sessions: HashMap<Token, Session>,
    timers: Timers,
    date: DateCache,
    config: Arc<Config>,
    tls: Option<SslContext>,
    intake: Intake,
    shutdown: Arc<AtomicBool>,
    next_token: usize,
    next_session_id: i64,
    listeners: Vec<(Token, TcpListener)>,
    dispatcher: Option<AcceptDispatcher>,
    draining: bool,
}

impl Reactor {
    pub(crate) fn new(
        config: Arc<Config>,
        tls: Option<SslContext>,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<Reactor> {
        Ok(Reactor {
            poll: Poll::new()?,
            sessions: HashMap::new(),
            timers: Timers::new(),
            date: DateCache::new(),
            config,
            tls,
            intake: Arc::new(Mutex::new(VecDeque::new())),
            shutdown,
            next_token: 1,
            next_session_id: 1,
            listeners: Vec::new(),
            dispatcher: None,
            draining: false,
        })
    }

    pub(crate) fn waker(&self) -> io::Result<Waker> {
        Waker::new(self.poll.registry(), WAKER_TOKEN)
    }

    pub(crate) fn intake(&self) -> Intake {
        self.intake.clone()
    }

    pub(crate) fn set_dispatcher(&mut self, dispatcher: AcceptDispatcher) {
        self.dispatcher = Some(dispatcher);
    }

    pub(crate) fn add_listener(&mut self, mut listener: TcpListener) -> io::Result<()> {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll
            .registry()
            .register(&mut listener, token, Interest::READABLE)?;
        self.listeners.push((token, listener));
        Ok(())
    }

    pub(crate) fn run(&mut self) {
        let mut events = Events::with_capacity(256);
        loop {
            if self.shutdown.load(Ordering::Acquire) && !self.draining {
                self.begin_drain();
            }
            if self.draining && self.sessions.is_empty() {
                break;
            }

            let timeout = self
                .timers
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()));
            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("poll failed: {}", e);
                break;
            }

            for event in events.iter() {
                let token = event.token();
                if token == WAKER_TOKEN {
                    self.drain_intake();
                } else if self.listeners.iter().any(|(t, _)| *t == token) {
                    self.accept_ready(token);
                } else {
                    self.session_ready(token, event.is_readable(), event.is_writable());
                }
            }

            self.fire_timers();
        }

        if let Some(mut dispatcher) = self.dispatcher.take() {
            dispatcher.join();
        }
    }

    /// Swap the intake queue under the lock, then build sessions
    /// outside it.
    fn drain_intake(&mut self) {
        let mut queue = std::mem::take(&mut *lock_intake(&self.intake));
        for socket in queue.drain(..) {
            self.accept_connection(socket);
        }
    }

    /// Drain the listener until it would block.
    fn accept_ready(&mut self, token: Token) {
        loop {
            let result = {
                let Some((_, listener)) = self.listeners.iter().find(|(t, _)| *t == token)
                else {
                    return;
                };
                listener.accept()
            };
            match result {
                Ok((socket, _addr)) => {
                    if let Some(dispatcher) = self.dispatcher.as_mut() {
                        dispatcher.dispatch(socket);
                    } else {
                        self.accept_connection(socket);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn accept_connection(&mut self, socket: TcpStream) {
        if self.draining {
            return;
        }
        let token = Token(self.next_token);
        self.next_token += 1;
        let session_id = self.next_session_id;
        self.next_session_id = if self.next_session_id == i64::MAX {
            1
        } else {
            self.next_session_id + 1
        };

        let mut session = match Session::new(
            session_id,
            token,
            socket,
            self.tls.as_ref(),
            self.config.clone(),
            self.poll.registry(),
        ) {
            Ok(session) => session,
            Err(e) => {
                log::error!("failed to set up session: {}", e);
                return;
            }
        };

        let started = {
            let mut ctx = LoopCtx {
                registry: self.poll.registry(),
                timers: &mut self.timers,
                date: &mut self.date,
            };
            session.start(&mut ctx)
        };
        match started {
            Ok(()) => {
                self.sessions.insert(token, session);
            }
            Err(_) => session.teardown(&mut self.timers, self.poll.registry()),
        }
    }

    fn session_ready(&mut self, token: Token, readable: bool, writable: bool) {
        let result = {
            let Reactor {
                poll,
                sessions,
                timers,
                date,
                ..
            } = self;
            let Some(session) = sessions.get_mut(&token) else {
                return;
            };
            let mut ctx = LoopCtx {
                registry: poll.registry(),
                timers,
                date,
            };
            let mut result = Ok(());
            if readable {
                result = session.on_read(&mut ctx);
            }
            if result.is_ok() && writable {
                result = session.on_write(&mut ctx);
            }
            result
        };
        if result.is_err() {
            self.destroy_session(token);
        }
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();
        while let Some(kind) = self.timers.pop_due(now) {
            let (token, stream_id) = match kind {
                TimerKind::StreamRead { token, stream_id }
                | TimerKind::StreamWrite { token, stream_id } => (token, Some(stream_id)),
                TimerKind::SettingsAck { token } => (token, None),
            };
            let result = {
                let Reactor {
                    poll,
                    sessions,
                    timers,
                    date,
                    ..
                } = self;
                let Some(session) = sessions.get_mut(&token) else {
                    continue;
                };
                let mut ctx = LoopCtx {
                    registry: poll.registry(),
                    timers,
                    date,
                };
                match stream_id {
                    Some(stream_id) => session.on_stream_timeout(stream_id, &mut ctx),
                    None => session.on_settings_timeout(&mut ctx),
                }
            };
            if result.is_err() {
                self.destroy_session(token);
            }
        }
    }

    fn destroy_session(&mut self, token: Token) {
        if let Some(mut session) = self.sessions.remove(&token) {
            session.teardown(&mut self.timers, self.poll.registry());
        }
    }

    /// Stop accepting and ask every live session to finish; in-flight
    /// responses drain before the loop exits.
    fn begin_drain(&mut self) {
        self.draining = true;
        let registry = self.poll.registry();
        for (_, mut listener) in self.listeners.drain(..) {
            let _ = registry.deregister(&mut listener);
        }
        let tokens: Vec<Token> = self.sessions.keys().copied().collect();
        for token in tokens {
            let result = {
                let Reactor {
                    poll,
                    sessions,
                    timers,
                    date,
                    ..
                } = self;
                let Some(session) = sessions.get_mut(&token) else {
                    continue;
                };
                let mut ctx = LoopCtx {
                    registry: poll.registry(),
                    timers,
                    date,
                };
                session.initiate_shutdown(&mut ctx)
            };
            if result.is_err() {
                self.destroy_session(token);
            }
        }
    }
}
