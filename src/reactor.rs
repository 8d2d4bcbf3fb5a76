use std::collections::HashMap;
use std::io::Write as _;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Registry, Token};
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::AppConfig;
use crate::connection::{ConnState, Connection, ReadOutcome, WriteOutcome};
use crate::db::DbPool;
use crate::error::Result;
use crate::prelude::MAX_FD;
use crate::timer::{TimerAction, TimerHeap};
use crate::workerpool::WorkerPool;
use weblog::{error, info, warn};

const LISTENER_TOKEN: Token = Token(0);

type ConnMap = Arc<Mutex<HashMap<usize, Arc<Mutex<Connection>>>>>;

/// Owns the listening socket, the readiness poller, the timer heap, and the
/// map of live connections — adapted from the reference server's
/// `WebServer` + `Epoller` (`webserver.h`/.cpp, `epoller.h`/.cpp).
pub struct Server {
    listener: TcpListener,
    config: AppConfig,
    connections: ConnMap,
    timer: Arc<Mutex<TimerHeap>>,
    workers: Arc<WorkerPool>,
    db: Arc<DbPool>,
    next_token: AtomicUsize,
    user_count: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    pub fn new(config: AppConfig, poll: &Poll) -> Result<Self> {
        if !(1024..=65535).contains(&config.port) {
            return Err(format!("port {} out of range [1024, 65535]", config.port).into());
        }
        let std_listener = bind_listener(config.port, config.open_linger)?;
        let mut listener = TcpListener::from_std(std_listener);
        let listener_interest = if config.listener_edge_triggered() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, listener_interest)?;

        let db = DbPool::init(&config.db, config.db_pool_size)?;
        let workers = WorkerPool::new(config.thread_count);

        info!(
            "listening on port {} (trig_mode={})",
            config.port, config.trig_mode
        );

        Ok(Server {
            listener,
            config,
            connections: Arc::new(Mutex::new(HashMap::new())),
            timer: Arc::new(Mutex::new(TimerHeap::new())),
            workers: Arc::new(workers),
            db: Arc::new(db),
            next_token: AtomicUsize::new(1),
            user_count: Arc::new(AtomicUsize::new(0)),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Main reactor loop (§4.9): compute the next timer deadline, wait on
    /// the poller, dispatch each reported event, repeat until shutdown.
    pub fn run(mut self, mut poll: Poll) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        let registry = poll.registry().try_clone()?;

        while !self.shutdown.load(Ordering::Relaxed) {
            let (fired, next_deadline) = {
                let mut timer = self.timer.lock().unwrap();
                timer.get_next_tick()
            };
            for action in fired {
                self.fire_timer_action(action);
            }

            let poll_timeout = Some(
                next_deadline.unwrap_or_else(|| Duration::from_millis(self.config.timeout_ms.max(0) as u64)),
            );

            match poll.poll(&mut events, poll_timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            for event in events.iter() {
                if event.token() == LISTENER_TOKEN {
                    self.accept_loop(&registry);
                    continue;
                }
                let id = event.token().0;
                if event.is_error() || (event.is_read_closed() && event.is_write_closed()) {
                    self.close_connection(id);
                } else if event.is_readable() {
                    self.dispatch_read(id, &registry);
                } else if event.is_writable() {
                    self.dispatch_write(id, &registry);
                } else {
                    warn!("unexpected event for token {id}");
                }
            }
        }
        Ok(())
    }

    fn fire_timer_action(&self, action: TimerAction) {
        match action {
            TimerAction::CloseConnection(id) => self.close_connection(id),
        }
    }

    /// Drain loop bounded by `EAGAIN`, required under edge-triggering on the
    /// listener. Enforces `MAX_FD` by sending "Server busy!" over the
    /// accepted socket directly and closing it (§4.9).
    fn accept_loop(&self, registry: &Registry) {
        loop {
            let (mut stream, addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("accept failed: {e}");
                    break;
                }
            };

            if self.user_count.load(Ordering::Relaxed) >= MAX_FD {
                let _ = stream.write_all(b"Server busy!");
                drop(stream);
                warn!("connection refused, MAX_FD reached");
                continue;
            }

            let id = self.next_token.fetch_add(1, Ordering::Relaxed);
            let token = Token(id);
            let interest = if self.config.connection_edge_triggered() {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            if let Err(e) = registry.register(&mut stream, token, interest) {
                error!("failed to register connection: {e}");
                continue;
            }

            let conn = Connection::new(
                stream,
                token,
                addr,
                self.config.resource_dir(),
                self.config.connection_edge_triggered(),
            );
            self.connections
                .lock()
                .unwrap()
                .insert(id, Arc::new(Mutex::new(conn)));
            self.user_count.fetch_add(1, Ordering::Relaxed);
            self.timer.lock().unwrap().add(
                id,
                Duration::from_millis(self.config.timeout_ms.max(0) as u64),
                TimerAction::CloseConnection(id),
            );
            info!("accepted connection {addr} as token {id}");
        }
    }

    fn dispatch_read(&self, id: usize, registry: &Registry) {
        let Some(conn) = self.connections.lock().unwrap().get(&id).cloned() else {
            return;
        };
        self.refresh_deadline(id);

        let ctx = WorkerCtx {
            db: self.db.clone(),
            registry: registry.try_clone().expect("registry clone"),
            connections: self.connections.clone(),
            user_count: self.user_count.clone(),
            workers: self.workers.clone(),
            timer: self.timer.clone(),
        };
        self.workers.submit(move || run_read(id, conn, ctx));
    }

    fn dispatch_write(&self, id: usize, registry: &Registry) {
        let Some(conn) = self.connections.lock().unwrap().get(&id).cloned() else {
            return;
        };
        self.refresh_deadline(id);

        let ctx = WorkerCtx {
            db: self.db.clone(),
            registry: registry.try_clone().expect("registry clone"),
            connections: self.connections.clone(),
            user_count: self.user_count.clone(),
            workers: self.workers.clone(),
            timer: self.timer.clone(),
        };
        self.workers.submit(move || run_write(id, conn, ctx));
    }

    fn refresh_deadline(&self, id: usize) {
        self.timer
            .lock()
            .unwrap()
            .adjust(id, Duration::from_millis(self.config.timeout_ms.max(0) as u64));
    }

    fn close_connection(&self, id: usize) {
        if let Some(conn) = self.connections.lock().unwrap().remove(&id) {
            conn.lock().unwrap().terminate();
            self.user_count.fetch_sub(1, Ordering::Relaxed);
        }
        self.timer.lock().unwrap().remove(id);
    }
}

/// Bundle of handles a worker-pool task needs to finish processing a
/// connection and either re-arm it or evict it — the pieces a closure
/// submitted to `WorkerPool::submit` closes over.
struct WorkerCtx {
    db: Arc<DbPool>,
    registry: Registry,
    connections: ConnMap,
    user_count: Arc<AtomicUsize>,
    workers: Arc<WorkerPool>,
    timer: Arc<Mutex<TimerHeap>>,
}

impl Clone for WorkerCtx {
    fn clone(&self) -> Self {
        WorkerCtx {
            db: self.db.clone(),
            registry: self.registry.try_clone().expect("registry clone"),
            connections: self.connections.clone(),
            user_count: self.user_count.clone(),
            workers: self.workers.clone(),
            timer: self.timer.clone(),
        }
    }
}

fn run_read(id: usize, conn: Arc<Mutex<Connection>>, ctx: WorkerCtx) {
    let outcome = conn.lock().unwrap().handle_read_phase(&ctx.db);
    match outcome {
        ReadOutcome::NeedMoreData => {
            let mut guard = conn.lock().unwrap();
            let _ = ctx.registry.reregister(&mut guard.stream, Token(id), Interest::READABLE);
        }
        ReadOutcome::ResponseReady => {
            let mut guard = conn.lock().unwrap();
            let _ = ctx.registry.reregister(&mut guard.stream, Token(id), Interest::WRITABLE);
        }
        ReadOutcome::Closed => evict(id, &ctx),
    }
}

fn run_write(id: usize, conn: Arc<Mutex<Connection>>, ctx: WorkerCtx) {
    let outcome = conn.lock().unwrap().handle_write_phase();
    match outcome {
        WriteOutcome::WouldBlock => {
            let mut guard = conn.lock().unwrap();
            let _ = ctx.registry.reregister(&mut guard.stream, Token(id), Interest::WRITABLE);
        }
        WriteOutcome::Finished => {
            let pipelined = {
                let mut guard = conn.lock().unwrap();
                debug_assert_eq!(guard.state, ConnState::Reading);
                let _ = ctx.registry.reregister(&mut guard.stream, Token(id), Interest::READABLE);
                guard.has_buffered_request()
            };
            if pipelined {
                // One pipelined request (§1 Non-goals: at most one in
                // flight) may already be sitting in the read buffer;
                // process it immediately instead of waiting on another
                // readiness notification that may never come under LT.
                let ctx2 = ctx.clone();
                ctx.workers.submit(move || run_read(id, conn, ctx2));
            }
        }
        WriteOutcome::Closed => evict(id, &ctx),
    }
}

fn evict(id: usize, ctx: &WorkerCtx) {
    if let Some(conn) = ctx.connections.lock().unwrap().remove(&id) {
        conn.lock().unwrap().terminate();
        ctx.user_count.fetch_sub(1, Ordering::Relaxed);
    }
    ctx.timer.lock().unwrap().remove(id);
}

/// Binds with `SO_REUSEADDR`, optional `SO_LINGER`, and a backlog of 6,
/// matching `WebServer::InitSocket_`.
fn bind_listener(port: u16, linger: bool) -> std::io::Result<std::net::TcpListener> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse().expect("valid bind address");
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if linger {
        socket.set_linger(Some(Duration::from_secs(1)))?;
    }
    socket.bind(&addr.into())?;
    socket.listen(6)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}
