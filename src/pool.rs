use crate::context::Context;
use crate::guard::ConnectionGuard;
use crate::state::State;
use crate::{BadConn, Manager};
use dark_std::sync::AtomicDuration;
use flume::{Receiver, Sender};
use futures_core::future::BoxFuture;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How many times [`Pool::exec`] retries a statement that hit a broken connection.
pub const MAX_BAD_CONN_RETRIES: usize = 2;

/// Pool have manager, get/get_timeout Connection from Pool
pub struct Pool<M: Manager> {
    pub manager: Arc<M>,
    pub idle_send: Arc<Sender<M::Connection>>,
    pub idle_recv: Arc<Receiver<M::Connection>>,
    pub max_open: Arc<AtomicU64>,
    pub(crate) in_use: Arc<AtomicU64>,
    pub(crate) waits: Arc<AtomicU64>,
    pub(crate) connecting: Arc<AtomicU64>,
    pub(crate) checking: Arc<AtomicU64>,
    pub(crate) connections: Arc<AtomicU64>,
    pub(crate) connects: Arc<AtomicU64>,
    pub(crate) discarded: Arc<AtomicU64>,
    //timeout check connection default 10s
    pub timeout_check: Arc<AtomicDuration>,
}

impl<M: Manager> Debug for Pool<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        Debug::fmt(&state, f)
    }
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            idle_send: self.idle_send.clone(),
            idle_recv: self.idle_recv.clone(),
            max_open: self.max_open.clone(),
            in_use: self.in_use.clone(),
            waits: self.waits.clone(),
            connecting: self.connecting.clone(),
            checking: self.checking.clone(),
            connections: self.connections.clone(),
            connects: self.connects.clone(),
            discarded: self.discarded.clone(),
            timeout_check: self.timeout_check.clone(),
        }
    }
}

impl<M: Manager> Pool<M> {
    pub fn new(m: M) -> Self {
        let default_max = num_cpus::get() as u64;
        let (s, r) = flume::unbounded();
        Self {
            manager: Arc::new(m),
            idle_send: Arc::new(s),
            idle_recv: Arc::new(r),
            max_open: Arc::new(AtomicU64::new(default_max)),
            in_use: Arc::new(AtomicU64::new(0)),
            waits: Arc::new(AtomicU64::new(0)),
            connecting: Arc::new(AtomicU64::new(0)),
            checking: Arc::new(AtomicU64::new(0)),
            connections: Arc::new(AtomicU64::new(0)),
            connects: Arc::new(AtomicU64::new(0)),
            discarded: Arc::new(AtomicU64::new(0)),
            timeout_check: Arc::new(AtomicDuration::new(Some(Duration::from_secs(10)))),
        }
    }

    pub async fn get(&self) -> Result<ConnectionGuard<M>, M::Error> {
        self.get_timeout(None).await
    }

    /// Acquire a checked connection, opening a new one when below `max_open`.
    ///
    /// `d` bounds the whole acquisition and is also handed to the manager as the
    /// connect deadline.
    pub async fn get_timeout(&self, d: Option<Duration>) -> Result<ConnectionGuard<M>, M::Error> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        defer!(|| {
            self.waits.fetch_sub(1, Ordering::SeqCst);
        });
        let ctx = match d {
            Some(d) => Context::with_timeout(d),
            None => Context::background(),
        };
        let f = async {
            let v: Result<ConnectionGuard<M>, M::Error> = loop {
                let connections = self.connections.load(Ordering::SeqCst)
                    + self.connecting.load(Ordering::SeqCst);
                if connections < self.max_open.load(Ordering::SeqCst) && self.idle_send.is_empty() {
                    //reserve the slot while connecting
                    self.connecting.fetch_add(1, Ordering::SeqCst);
                    defer!(|| {
                        self.connecting.fetch_sub(1, Ordering::SeqCst);
                    });
                    let conn = self.manager.connect(&ctx).await?;
                    self.connects.fetch_add(1, Ordering::SeqCst);
                    tracing::debug!(connections = connections + 1, "opened new connection");
                    self.idle_send
                        .send(conn)
                        .map_err(|e| M::Error::from(&e.to_string()))?;
                    self.connections.fetch_add(1, Ordering::SeqCst);
                }
                let conn = self
                    .idle_recv
                    .recv_async()
                    .await
                    .map_err(|e| M::Error::from(&e.to_string()))?;
                let mut guard = ConnectionGuard::new(conn, self.clone());
                self.checking.fetch_add(1, Ordering::SeqCst);
                defer!(|| {
                    self.checking.fetch_sub(1, Ordering::SeqCst);
                });
                let check_result = match self.timeout_check.get() {
                    Some(t) => tokio::time::timeout(t, self.manager.check(&mut guard))
                        .await
                        .map_err(|e| M::Error::from(&format!("check_timeout={}", e)))?,
                    None => self.manager.check(&mut guard).await,
                };
                match check_result {
                    Ok(_) => break Ok(guard),
                    Err(_e) => {
                        tracing::debug!("connection failed check, discarding");
                        guard.discard();
                        continue;
                    }
                }
            };
            v
        };
        match d {
            None => f.await,
            Some(d) => tokio::time::timeout(d, f)
                .await
                .map_err(|_e| M::Error::from("get_timeout"))?,
        }
    }

    /// Run `op` on a pooled connection.
    ///
    /// When acquiring the connection or running `op` fails with a bad-connection
    /// error, the connection is discarded and the whole attempt is repeated, up
    /// to [`MAX_BAD_CONN_RETRIES`] times in total. Every other error is returned
    /// as is.
    pub async fn exec<T, F>(&self, op: F) -> Result<T, M::Error>
    where
        F: for<'c> Fn(&'c mut M::Connection) -> BoxFuture<'c, Result<T, M::Error>>,
        M::Error: BadConn,
    {
        let mut retries = 0;
        loop {
            let mut conn = match self.get().await {
                Ok(conn) => conn,
                Err(e) if e.is_bad_conn() && retries < MAX_BAD_CONN_RETRIES => {
                    retries += 1;
                    tracing::warn!(retries, "connection broke while being acquired, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let result = op(&mut *conn).await;
            match result {
                Ok(v) => return Ok(v),
                Err(e) if e.is_bad_conn() => {
                    conn.discard();
                    if retries >= MAX_BAD_CONN_RETRIES {
                        return Err(e);
                    }
                    retries += 1;
                    tracing::warn!(retries, "statement hit a broken connection, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn state(&self) -> State {
        State {
            max_open: self.max_open.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            in_use: self.in_use.load(Ordering::SeqCst),
            idle: self.idle_send.len() as u64,
            waits: self.waits.load(Ordering::SeqCst),
            connecting: self.connecting.load(Ordering::SeqCst),
            checking: self.checking.load(Ordering::SeqCst),
            connects: self.connects.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
        }
    }

    pub fn set_max_open(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.max_open.store(n, Ordering::SeqCst);
        while self.idle_send.len() > n as usize {
            if self.idle_recv.try_recv().is_ok() {
                self.release_slot();
            }
        }
    }

    pub fn get_max_open(&self) -> u64 {
        self.max_open.load(Ordering::SeqCst)
    }

    /// Drop every idle connection. Connections in use are unaffected.
    pub fn close_idle(&self) {
        while let Ok(conn) = self.idle_recv.try_recv() {
            drop(conn);
            self.release_slot();
        }
    }

    pub fn recycle(&self, arg: M::Connection) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
        if self.idle_send.len() < self.max_open.load(Ordering::SeqCst) as usize {
            _ = self.idle_send.send(arg);
        } else {
            self.release_slot();
        }
    }

    /// Close a checked-out connection instead of recycling it.
    pub fn discard(&self, arg: M::Connection) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
        self.discarded.fetch_add(1, Ordering::SeqCst);
        drop(arg);
        self.release_slot();
    }

    fn release_slot(&self) {
        _ = self
            .connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Set the timeout for checking connections in the pool.
    pub fn set_timeout_check(&self, duration: Option<Duration>) {
        self.timeout_check.store(duration);
    }

    /// Get the timeout for checking connections in the pool.
    pub fn get_timeout_check(&self) -> Option<Duration> {
        self.timeout_check.get()
    }
}
