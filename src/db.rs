use std::collections::VecDeque;
use std::sync::Mutex;

use mysql::{Conn, Opts, OptsBuilder};
use std_semaphore::Semaphore;

use crate::config::DbConfig;
use crate::error::Result;

/// Bounded, semaphore-guarded pool of database handles, adapted from the
/// reference server's `SqlConnPool` (`sqlconnpool.h`/.cpp). Where the
/// reference is a process-wide singleton, this is an explicit handle
/// threaded through construction (§9: "re-architect as explicit handles").
pub struct DbPool {
    handles: Mutex<VecDeque<Conn>>,
    semaphore: Semaphore,
    size: usize,
}

impl DbPool {
    /// Opens `size` connections up front and seeds the semaphore at `size`,
    /// mirroring `SqlConnPool::Init`.
    pub fn init(config: &DbConfig, size: usize) -> Result<Self> {
        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some(config.host.clone()))
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .db_name(Some(config.dbname.clone()))
            .into();
        let mut handles = VecDeque::with_capacity(size);
        for _ in 0..size {
            handles.push_back(Conn::new(opts.clone())?);
        }
        Ok(DbPool {
            handles: Mutex::new(handles),
            semaphore: Semaphore::new(size as isize),
            size,
        })
    }

    /// Waits on the semaphore, then pops a handle under the mutex. Blocks
    /// indefinitely if the pool is exhausted — there is no checkout
    /// deadline, a design choice documented in §7.
    pub fn acquire(&self) -> PooledConn<'_> {
        self.semaphore.acquire();
        let conn = self
            .handles
            .lock()
            .unwrap()
            .pop_front()
            .expect("semaphore permit without a queued handle");
        PooledConn {
            pool: self,
            conn: Some(conn),
        }
    }

    fn release(&self, conn: Conn) {
        self.handles.lock().unwrap().push_back(conn);
        self.semaphore.release();
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    pub fn checked_out(&self) -> usize {
        self.size - self.available()
    }
}

/// RAII guard returning the handle to the pool on drop, mirroring
/// `SqlConnRAII`.
pub struct PooledConn<'a> {
    pool: &'a DbPool,
    conn: Option<Conn>,
}

impl<'a> std::ops::Deref for PooledConn<'a> {
    type Target = Conn;
    fn deref(&self) -> &Conn {
        self.conn.as_ref().unwrap()
    }
}

impl<'a> std::ops::DerefMut for PooledConn<'a> {
    fn deref_mut(&mut self) -> &mut Conn {
        self.conn.as_mut().unwrap()
    }
}

impl<'a> Drop for PooledConn<'a> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
