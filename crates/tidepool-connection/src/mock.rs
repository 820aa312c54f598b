//! In-memory connection doubles shared by the unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tidepool_core::{
    Connection, ConnectionFactory, ConnectionParams, Result, StatementResult, TidepoolError,
};

/// Failure switches shared by a factory and every connection it opened
#[derive(Default)]
pub(crate) struct MockBehavior {
    pub(crate) fail_open: AtomicBool,
    pub(crate) open_closed: AtomicBool,
    pub(crate) fail_queries: AtomicBool,
    pub(crate) fail_rollback: AtomicBool,
    pub(crate) fail_close: AtomicBool,
}

/// Mock connection; `execute` reports the connection's serial number as the
/// affected row count so tests can tell physical connections apart
pub(crate) struct MockConnection {
    serial: usize,
    username: Option<String>,
    behavior: Arc<MockBehavior>,
    closed: AtomicBool,
    auto_commit: AtomicBool,
    executed: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl MockConnection {
    pub(crate) fn new(serial: usize) -> Self {
        Self::with_behavior(serial, None, Arc::default())
    }

    fn with_behavior(serial: usize, username: Option<String>, behavior: Arc<MockBehavior>) -> Self {
        let closed = behavior.open_closed.load(Ordering::SeqCst);
        Self {
            serial,
            username,
            behavior,
            closed: AtomicBool::new(closed),
            auto_commit: AtomicBool::new(true),
            executed: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
        }
    }

    pub(crate) fn serial(&self) -> usize {
        self.serial
    }

    pub(crate) fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub(crate) fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    pub(crate) fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_queries(&self) {
        self.behavior.fail_queries.store(true, Ordering::SeqCst);
    }
}

impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    fn execute(&self, sql: &str) -> Result<StatementResult> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(TidepoolError::Connection("connection is closed".into()));
        }
        if self.behavior.fail_queries.load(Ordering::SeqCst) {
            return Err(TidepoolError::Query(format!("mock failure: {}", sql)));
        }
        Ok(StatementResult::command(self.serial as u64))
    }

    fn auto_commit(&self) -> Result<bool> {
        Ok(self.auto_commit.load(Ordering::SeqCst))
    }

    fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.auto_commit.store(auto_commit, Ordering::SeqCst);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_rollback.load(Ordering::SeqCst) {
            return Err(TidepoolError::Connection("mock rollback failure".into()));
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.behavior.fail_close.load(Ordering::SeqCst) {
            return Err(TidepoolError::Connection("mock close failure".into()));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Mock factory that keeps every connection it opened
#[derive(Default)]
pub(crate) struct MockConnectionFactory {
    behavior: Arc<MockBehavior>,
    opened: Mutex<Vec<Arc<MockConnection>>>,
    open_delay: Mutex<Duration>,
}

impl MockConnectionFactory {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn behavior(&self) -> &MockBehavior {
        &self.behavior
    }

    pub(crate) fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock() = delay;
    }

    /// Number of physical connections opened so far
    pub(crate) fn created(&self) -> usize {
        self.opened.lock().len()
    }

    /// Number of opened connections that have since been closed
    pub(crate) fn closed(&self) -> usize {
        self.opened.lock().iter().filter(|c| c.is_closed()).count()
    }

    /// Total rollbacks across every opened connection
    pub(crate) fn rollbacks(&self) -> usize {
        self.opened.lock().iter().map(|c| c.rollbacks()).sum()
    }

    pub(crate) fn connection(&self, serial: usize) -> Arc<MockConnection> {
        Arc::clone(&self.opened.lock()[serial - 1])
    }
}

impl ConnectionFactory for MockConnectionFactory {
    fn open(&self, params: &ConnectionParams) -> Result<Arc<dyn Connection>> {
        let delay = *self.open_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.behavior.fail_open.load(Ordering::SeqCst) {
            return Err(TidepoolError::Connection(format!(
                "mock refused to connect to {}",
                params.url
            )));
        }
        let mut opened = self.opened.lock();
        let connection = Arc::new(MockConnection::with_behavior(
            opened.len() + 1,
            params.username.clone(),
            Arc::clone(&self.behavior),
        ));
        opened.push(Arc::clone(&connection));
        Ok(connection)
    }
}
