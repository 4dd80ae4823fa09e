use async_trait::async_trait;
use dynamic_pool::harness::{
    Admin, HarnessConfig, Phase, RotationHarness, Rotator, SessionId, Storage, Workload,
};
use dynamic_pool::jitter::JitterTicker;
use dynamic_pool::memory::{MemoryError, MemoryServer};
use dynamic_pool::secret::{generate_secret, CredentialStore, Credentials};
use dynamic_pool::memory::{MemoryConnection, MemoryConnector};
use dynamic_pool::{Context, DynamicManager, Manager, Pool, RotationError};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DB: &str = "rotationtest1";
const USER: &str = "rotationuser1";
const TABLE: &str = "test_table";

/// Database, principal and table as the harness sets them up.
async fn provision(server: &MemoryServer) -> CredentialStore {
    let secret = generate_secret();
    server.create_database(DB).await.unwrap();
    server.create_principal(USER, &secret).await.unwrap();
    server.create_table(DB, TABLE).await.unwrap();
    server.grant(USER, DB, TABLE).await.unwrap();
    CredentialStore::new(Credentials::new("mem", USER, secret, DB))
}

fn short_config() -> HarnessConfig {
    HarnessConfig::default()
        .with_duration(Duration::from_millis(400))
        .with_rotation(Duration::from_millis(15), Duration::from_millis(5))
        .with_writes(Duration::from_millis(2), Duration::from_millis(2))
        .with_max_open(4)
}

#[tokio::test]
async fn test_terminated_session_cannot_write() {
    let server = MemoryServer::new();
    let store = provision(&server).await;
    let old = store.snapshot();

    let mut conn = server.connector(&old).connect(&Context::background()).await.unwrap();
    conn.insert(TABLE).await.unwrap();

    let mut rotator = Rotator::new(Arc::new(server.clone()), store.clone());
    assert_eq!(rotator.rotate_once().await.unwrap(), 1);
    assert_eq!(rotator.rotations(), 1);
    assert_ne!(store.secret(), old.secret);

    assert_eq!(conn.insert(TABLE).await, Err(MemoryError::BadConnection));
    assert_eq!(server.rejected_writes(), 1);
    let denied = server.connector(&old).connect(&Context::background()).await;
    assert_eq!(denied.unwrap_err(), MemoryError::AccessDenied(USER.to_string()));

    let mut fresh = server
        .connector(&store.snapshot())
        .connect(&Context::background())
        .await
        .unwrap();
    fresh.insert(TABLE).await.unwrap();
    assert_eq!(server.rows(DB, TABLE), Some(2));
}

#[tokio::test]
async fn test_single_rotation_between_writes() {
    let server = MemoryServer::new();
    let store = provision(&server).await;
    let reader = store.clone();
    let factory_server = server.clone();
    let pool = Pool::new(DynamicManager::new(move || {
        Ok::<_, io::Error>(factory_server.connector(&reader.snapshot()))
    }));
    let mut workload = Workload::new(pool, TABLE);

    for _ in 0..5 {
        workload.write().await.unwrap();
    }
    let mut rotator = Rotator::new(Arc::new(server.clone()), store);
    rotator.rotate_once().await.unwrap();
    for _ in 0..5 {
        workload.write().await.unwrap();
    }

    assert_eq!(workload.writes(), 10);
    assert_eq!(workload.verify().await.unwrap(), 10);
    assert_eq!(server.rows(DB, TABLE), Some(10));
    let state = workload.pool().state();
    assert_eq!(state.connects, 2);
    assert_eq!(state.discarded, 1);
}

#[tokio::test]
async fn test_factory_failure_is_not_counted() {
    let server = MemoryServer::new();
    let store = provision(&server).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let factory_server = server.clone();
    let pool = Pool::new(DynamicManager::new(move || {
        if counted.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
            return Err(io::Error::new(io::ErrorKind::Other, "vault sealed"));
        }
        Ok(factory_server.connector(&store.snapshot()))
    }));
    pool.set_max_open(1);
    let mut workload = Workload::new(pool, TABLE);

    workload.write().await.unwrap();
    server.terminate_all(USER).await.unwrap();
    workload.write().await.unwrap();
    server.terminate_all(USER).await.unwrap();
    let err = workload.write().await.unwrap_err();

    assert!(matches!(err, RotationError::Workload(_)));
    assert!(err.to_string().contains("vault sealed"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(workload.writes(), 2);
    assert_eq!(server.rows(DB, TABLE), Some(2));
}

#[tokio::test]
async fn test_verify_reports_mismatch() {
    let server = MemoryServer::new();
    let store = provision(&server).await;
    let reader = store.clone();
    let factory_server = server.clone();
    let pool = Pool::new(DynamicManager::new(move || {
        Ok::<_, io::Error>(factory_server.connector(&reader.snapshot()))
    }));
    let mut workload = Workload::new(pool, TABLE);
    for _ in 0..3 {
        workload.write().await.unwrap();
    }

    // a write the workload never saw
    let mut other = server
        .connector(&store.snapshot())
        .connect(&Context::background())
        .await
        .unwrap();
    other.insert(TABLE).await.unwrap();

    match workload.verify().await {
        Err(RotationError::ConsistencyViolation { expected, actual }) => {
            assert_eq!(expected, 3);
            assert_eq!(actual, 4);
        }
        other => panic!("expected consistency violation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rotator_stops_on_request() {
    let server = MemoryServer::new();
    let store = provision(&server).await;
    let initial = store.secret();
    let handle = Rotator::new(Arc::new(server.clone()), store.clone())
        .spawn(JitterTicker::new(Duration::from_millis(2), Duration::ZERO));
    tokio::time::sleep(Duration::from_millis(30)).await;
    let rotations = handle.stop().await.unwrap();
    assert!(rotations >= 1);
    assert_ne!(store.secret(), initial);

    // no more rotations after the acknowledgement
    let settled = store.secret();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.secret(), settled);
}

#[tokio::test]
async fn test_full_run_is_consistent() {
    let server = MemoryServer::new().with_latency(Duration::from_micros(200));
    let mut harness = RotationHarness::new(server.clone(), short_config());
    let connectors = server.clone();
    let report = harness
        .run(move |credentials| connectors.connector(credentials))
        .await
        .unwrap();

    assert_eq!(report.writes, report.stored_rows);
    assert!(report.writes > 0);
    assert!(report.rotations > 0);
    assert!(report.pool.connects >= 1);
    assert_eq!(harness.phase(), Phase::Done);
    assert!(!server.database_exists(DB));
    assert!(!server.principal_exists(USER));
    assert_eq!(server.session_count(USER), 0);
}

#[tokio::test]
async fn test_full_run_without_rotations() {
    let server = MemoryServer::new();
    let config = short_config()
        .with_duration(Duration::from_millis(50))
        .with_rotation(Duration::from_secs(60), Duration::ZERO);
    let mut harness = RotationHarness::new(server.clone(), config);
    let connectors = server.clone();
    let report = harness
        .run(move |credentials| connectors.connector(credentials))
        .await
        .unwrap();
    assert_eq!(report.rotations, 0);
    assert_eq!(report.writes, report.stored_rows);
    assert_eq!(report.pool.connects, 1);
}

#[tokio::test]
async fn test_setup_leftovers_are_replaced() {
    let server = MemoryServer::new();
    server.create_database(DB).await.unwrap();
    server.create_principal(USER, "stale").await.unwrap();
    let config = short_config().with_duration(Duration::from_millis(30));
    let mut harness = RotationHarness::new(server.clone(), config);
    let connectors = server.clone();
    let report = harness
        .run(move |credentials| connectors.connector(credentials))
        .await
        .unwrap();
    assert_eq!(report.writes, report.stored_rows);
}

#[tokio::test]
async fn test_invalid_config_touches_nothing() {
    let server = MemoryServer::new();
    let config = short_config().with_database("db; DROP DATABASE mysql");
    let mut harness = RotationHarness::new(server.clone(), config);
    let connectors = server.clone();
    let err = harness
        .run(move |credentials| connectors.connector(credentials))
        .await
        .unwrap_err();
    assert!(matches!(err, RotationError::Config(_)));
    assert_eq!(harness.phase(), Phase::Setup);
}

/// Delegates to a [`MemoryServer`], optionally failing one named operation or
/// stretching out every secret change.
struct ScriptedAdmin {
    inner: MemoryServer,
    fail_on: Option<&'static str>,
    secret_delay: Duration,
    /// Start and end of every secret change
    secret_changes: Arc<Mutex<Vec<(Instant, Instant)>>>,
}

impl ScriptedAdmin {
    fn failing(inner: MemoryServer, op: &'static str) -> Self {
        Self {
            inner,
            fail_on: Some(op),
            secret_delay: Duration::ZERO,
            secret_changes: Arc::new(Mutex::new(vec![])),
        }
    }

    fn slow_rotation(inner: MemoryServer, delay: Duration) -> Self {
        Self {
            inner,
            fail_on: None,
            secret_delay: delay,
            secret_changes: Arc::new(Mutex::new(vec![])),
        }
    }

    fn gate(&self, op: &str) -> Result<(), MemoryError> {
        if self.fail_on == Some(op) {
            return Err(MemoryError::Other(format!("{} refused", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl Admin for ScriptedAdmin {
    type Error = MemoryError;

    async fn drop_database(&self, database: &str) -> Result<(), Self::Error> {
        self.gate("drop_database")?;
        self.inner.drop_database(database).await
    }

    async fn create_database(&self, database: &str) -> Result<(), Self::Error> {
        self.gate("create_database")?;
        self.inner.create_database(database).await
    }

    async fn drop_principal(&self, principal: &str) -> Result<(), Self::Error> {
        self.gate("drop_principal")?;
        self.inner.drop_principal(principal).await
    }

    async fn create_principal(&self, principal: &str, secret: &str) -> Result<(), Self::Error> {
        self.gate("create_principal")?;
        self.inner.create_principal(principal, secret).await
    }

    async fn create_table(&self, database: &str, table: &str) -> Result<(), Self::Error> {
        self.gate("create_table")?;
        self.inner.create_table(database, table).await
    }

    async fn grant(&self, principal: &str, database: &str, table: &str) -> Result<(), Self::Error> {
        self.gate("grant")?;
        self.inner.grant(principal, database, table).await
    }

    async fn set_secret(&self, principal: &str, secret: &str) -> Result<(), Self::Error> {
        self.gate("set_secret")?;
        let start = Instant::now();
        if !self.secret_delay.is_zero() {
            tokio::time::sleep(self.secret_delay).await;
        }
        self.inner.set_secret(principal, secret).await?;
        self.secret_changes.lock().push((start, Instant::now()));
        Ok(())
    }

    async fn sessions(&self, principal: &str) -> Result<Vec<SessionId>, Self::Error> {
        self.gate("sessions")?;
        self.inner.sessions(principal).await
    }

    async fn terminate(&self, session: SessionId) -> Result<bool, Self::Error> {
        self.gate("terminate")?;
        self.inner.terminate(session).await
    }
}

#[tokio::test]
async fn test_setup_failure_still_tears_down() {
    let server = MemoryServer::new();
    let admin = ScriptedAdmin::failing(server.clone(), "grant");
    let mut harness = RotationHarness::new(admin, short_config());
    let connectors = server.clone();
    let err = harness
        .run(move |credentials| connectors.connector(credentials))
        .await
        .unwrap_err();
    assert!(matches!(err, RotationError::Administrative { op: "grant", .. }));
    assert_eq!(harness.phase(), Phase::Failed);
    assert!(!server.database_exists(DB));
    assert!(!server.principal_exists(USER));
}

#[tokio::test]
async fn test_rotator_failure_aborts_run() {
    let server = MemoryServer::new();
    let admin = ScriptedAdmin::failing(server.clone(), "set_secret");
    let config = short_config()
        .with_duration(Duration::from_secs(30))
        .with_rotation(Duration::from_millis(5), Duration::ZERO);
    let mut harness = RotationHarness::new(admin, config);
    let connectors = server.clone();
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        harness.run(move |credentials| connectors.connector(credentials)),
    )
    .await
    .expect("run should abort long before its duration")
    .unwrap_err();
    assert!(matches!(err, RotationError::Administrative { op: "set secret", .. }));
    assert!(!server.database_exists(DB));
}

#[tokio::test]
async fn test_teardown_failure_is_reported() {
    let server = MemoryServer::new();
    let admin = Arc::new(ScriptedAdmin::failing(server.clone(), "sessions"));
    let config = short_config()
        .with_duration(Duration::from_millis(20))
        .with_rotation(Duration::from_secs(60), Duration::ZERO);
    let mut harness = RotationHarness::with_shared(admin, config);
    let connectors = server.clone();
    let err = harness
        .run(move |credentials| connectors.connector(credentials))
        .await
        .unwrap_err();
    assert!(matches!(err, RotationError::Administrative { op: "terminate sessions", .. }));
    assert_eq!(harness.phase(), Phase::Failed);
    assert_eq!(harness.config().database, DB);
    // the remaining steps still ran
    assert!(!server.database_exists(DB));
    assert!(!server.principal_exists(USER));
}

/// Memory connector that timestamps every successful insert.
struct RecordingConnector {
    inner: MemoryConnector,
    inserts: Arc<Mutex<Vec<Instant>>>,
}

struct RecordingConnection {
    inner: MemoryConnection,
    inserts: Arc<Mutex<Vec<Instant>>>,
}

impl Manager for RecordingConnector {
    type Connection = RecordingConnection;
    type Error = MemoryError;

    async fn connect(&self, ctx: &Context) -> Result<Self::Connection, Self::Error> {
        Ok(RecordingConnection {
            inner: self.inner.connect(ctx).await?,
            inserts: self.inserts.clone(),
        })
    }

    async fn check(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        self.inner.check(&mut conn.inner).await
    }
}

#[async_trait]
impl Storage for RecordingConnection {
    type Error = MemoryError;

    async fn insert(&mut self, table: &str) -> Result<(), Self::Error> {
        self.inner.insert(table).await?;
        self.inserts.lock().push(Instant::now());
        Ok(())
    }

    async fn count(&mut self, table: &str) -> Result<u64, Self::Error> {
        self.inner.count(table).await
    }
}

#[tokio::test]
async fn test_drain_stops_rotator_before_workload() {
    let server = MemoryServer::new();
    // the only rotation starts at 30ms and is still running when the run
    // ends at 50ms; it finishes around 90ms
    let admin = Arc::new(ScriptedAdmin::slow_rotation(
        server.clone(),
        Duration::from_millis(60),
    ));
    let config = short_config()
        .with_duration(Duration::from_millis(50))
        .with_rotation(Duration::from_millis(30), Duration::ZERO)
        .with_writes(Duration::from_millis(2), Duration::ZERO);
    let mut harness = RotationHarness::with_shared(admin.clone(), config);
    let inserts = Arc::new(Mutex::new(vec![]));
    let recorded = inserts.clone();
    let connectors = server.clone();
    let report = harness
        .run(move |credentials| RecordingConnector {
            inner: connectors.connector(credentials),
            inserts: recorded.clone(),
        })
        .await
        .unwrap();

    assert_eq!(report.rotations, 1);
    assert_eq!(report.writes, report.stored_rows);
    let changes = admin.secret_changes.lock().clone();
    assert_eq!(changes.len(), 1);
    let (start, end) = changes[0];

    let inserts = inserts.lock().clone();
    assert_eq!(inserts.len() as u64, report.writes);
    // writes went on after the run ended, while the rotator was finishing
    let drained = inserts
        .iter()
        .filter(|t| **t > start + Duration::from_millis(25) && **t < end)
        .count();
    assert!(drained >= 5, "only {} writes while draining", drained);
    assert!(inserts
        .iter()
        .any(|t| *t > end - Duration::from_millis(10)));

    // no rotation after the acknowledgement
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(admin.secret_changes.lock().len(), 1);
}

#[tokio::test]
async fn test_full_run_with_slow_connects() {
    let server = MemoryServer::new().with_connect_latency(Duration::from_millis(2));
    let config = short_config()
        .with_duration(Duration::from_millis(300))
        .with_rotation(Duration::from_millis(10), Duration::from_millis(3))
        .with_writes(Duration::from_millis(1), Duration::from_millis(1));
    let mut harness = RotationHarness::new(server.clone(), config);
    let connectors = server.clone();
    let report = harness
        .run(move |credentials| connectors.connector(credentials))
        .await
        .unwrap();
    assert_eq!(report.writes, report.stored_rows);
    assert!(report.rotations > 0);
    assert!(report.pool.connects > 1);
    assert_eq!(harness.phase(), Phase::Done);
    assert_eq!(server.session_count(USER), 0);
}
