use plugsql_driver::{Args, Driver, DriverConfig, PlugsqlError, TxnStatus};
use plugsql_protocol::HandshakeConfig;
use std::path::Path;
use std::time::Duration;

/// Config launching the mock plugin binary built alongside these tests.
fn mock(args: &[&str]) -> DriverConfig {
    let exe = Path::new(env!("CARGO_BIN_EXE_plugsql-mock-plugin"));
    let dir = exe.parent().expect("bin dir");
    let name = exe
        .file_name()
        .and_then(|name| name.to_str())
        .expect("bin name");
    DriverConfig::new(name)
        .prefix(format!("{}{}", dir.display(), std::path::MAIN_SEPARATOR))
        .args(args.iter().copied())
        .handshake_timeout(Duration::from_secs(30))
}

#[tokio::test]
async fn ping_and_close() {
    let driver = Driver::new(mock(&["pingable"])).expect("driver");
    driver.ping().await.expect("ping");
    assert!(driver.is_running().await);
    assert!(driver.pid().await.is_some());
    driver.close().await.expect("close");
    assert!(!driver.is_running().await);
}

#[tokio::test]
async fn exec_reports_counts() {
    let driver = Driver::new(mock(&[
        "execute",
        "--last-insert-id",
        "1",
        "--rows-affected",
        "1",
    ]))
    .expect("driver");
    let conn = driver.connect().await.expect("connect");
    let result = conn
        .execute("INSERT INTO t VALUES (?)", Args::new().push("x"))
        .await
        .expect("exec");
    assert_eq!(result.last_insert_id(), 1);
    assert_eq!(result.rows_affected(), 1);
    conn.close().await.expect("close conn");
    driver.close().await.expect("close");
}

#[tokio::test]
async fn query_in_transaction_returns_ten_rows() {
    let driver = Driver::new(mock(&["query", "--columns", "HELLO", "--total-rows", "10"]))
        .expect("driver");
    let conn = driver.connect().await.expect("connect");

    let tx = conn.begin().expect("begin");
    let mut rows = tx.query("SELECT HELLO", Args::new()).await.expect("query");
    assert_eq!(rows.columns(), ["HELLO".to_string()]);
    let mut seen = 0;
    while let Some(row) = rows.next() {
        let value: String = row.get(0).expect("string column");
        assert_eq!(value, format!("HELLO-{seen}"));
        seen += 1;
    }
    assert_eq!(seen, 10);
    assert!(rows.next().is_none());

    let done = tx.commit().await.expect("commit");
    assert!(done.committed);
    assert!(done.start_ts > 0);
    assert_eq!(conn.txn_status(), TxnStatus::Idle);
    driver.close().await.expect("close");
}

#[tokio::test]
async fn connections_share_one_process() {
    let driver = Driver::new(mock(&["pingable"])).expect("driver");
    let first = driver.connect().await.expect("first");
    let pid = driver.pid().await;
    let second = driver.connect().await.expect("second");
    assert_eq!(driver.pid().await, pid);
    assert_ne!(first.id(), second.id());
    first.ping().await.expect("ping first");
    second.ping().await.expect("ping second");
    let err = second.execute("INSERT", Args::new()).await.unwrap_err();
    assert!(matches!(err, PlugsqlError::Remote(_)));
    driver.close().await.expect("close");
}

#[tokio::test]
async fn missing_plugin_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = DriverConfig::new("plugsql-mock-plugin")
        .prefix(format!("{}{}", dir.path().display(), std::path::MAIN_SEPARATOR));
    let driver = Driver::new(config).expect("driver");
    assert!(matches!(
        driver.connect().await,
        Err(PlugsqlError::PluginNotFound { .. })
    ));
    assert!(!driver.is_running().await);
}

#[tokio::test]
async fn cookie_mismatch_fails_handshake() {
    let config = mock(&["pingable"]).handshake(HandshakeConfig {
        magic_cookie_value: "not-the-plugin-cookie".into(),
        ..HandshakeConfig::default()
    });
    let driver = Driver::new(config).expect("driver");
    assert!(matches!(
        driver.connect().await,
        Err(PlugsqlError::HandshakeFailed(_))
    ));
    assert!(!driver.is_running().await);
}

#[tokio::test]
async fn slow_query_hits_call_timeout() {
    let config = mock(&["query", "--total-rows", "1", "--delay-ms", "5000"])
        .call_timeout(Duration::from_millis(200));
    let driver = Driver::new(config).expect("driver");
    let conn = driver.connect().await.expect("connect");
    assert!(matches!(
        conn.query("SELECT HELLO", Args::new()).await,
        Err(PlugsqlError::DeadlineExceeded(_))
    ));
    assert!(matches!(conn.ping().await, Err(PlugsqlError::ChannelClosed)));
    driver.close().await.expect("close");
}

#[tokio::test]
async fn plugin_abort_on_commit_surfaces() {
    let driver = Driver::new(mock(&["abort-on-commit"])).expect("driver");
    let conn = driver.connect().await.expect("connect");
    let tx = conn.begin().expect("begin");
    tx.execute("INSERT", Args::new()).await.expect("exec");
    assert!(matches!(
        tx.commit().await,
        Err(PlugsqlError::TransactionAborted)
    ));
    assert!(!conn.in_transaction());
    driver.close().await.expect("close");
}

#[cfg(unix)]
#[tokio::test]
async fn unix_socket_transport() {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("plugin.sock");
    let socket = socket.to_str().expect("utf8 path");
    let driver = Driver::new(mock(&["--unix", socket, "execute", "--rows-affected", "3"]))
        .expect("driver");
    let conn = driver.connect().await.expect("connect");
    let result = conn.execute("DELETE", Args::new()).await.expect("exec");
    assert_eq!(result.rows_affected(), 3);
    driver.close().await.expect("close");
}

#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    // SAFETY: signal 0 only checks that the pid is live.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(unix)]
#[tokio::test]
async fn handshake_timeout_kills_silent_plugin() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pid_file = dir.path().join("plugin.pid");
    let pid_arg = pid_file.to_str().expect("utf8 path");
    let config = mock(&["hang", "--pid-file", pid_arg]).handshake_timeout(Duration::from_secs(2));
    let driver = Driver::new(config).expect("driver");

    assert!(matches!(
        driver.connect().await,
        Err(PlugsqlError::HandshakeTimeout(timeout)) if timeout == Duration::from_secs(2)
    ));
    assert!(!driver.is_running().await);
    assert!(driver.pid().await.is_none());

    let pid: u32 = std::fs::read_to_string(&pid_file)
        .expect("pid file")
        .trim()
        .parse()
        .expect("pid");
    assert!(!process_exists(pid));
}

#[cfg(unix)]
#[tokio::test]
async fn stop_kills_plugin_ignoring_sigterm() {
    let grace = Duration::from_millis(300);
    let driver = Driver::new(mock(&["ignore-term"]).stop_grace(grace)).expect("driver");
    let conn = driver.connect().await.expect("connect");
    conn.ping().await.expect("ping");
    let pid = driver.pid().await.expect("pid");

    let started = std::time::Instant::now();
    driver.close().await.expect("close");
    assert!(started.elapsed() >= grace);
    assert!(!driver.is_running().await);
    assert!(!process_exists(pid));
}

#[cfg(unix)]
#[tokio::test]
async fn stop_waits_for_plugin_honoring_sigterm() {
    let grace = Duration::from_secs(10);
    let driver = Driver::new(mock(&["pingable"]).stop_grace(grace)).expect("driver");
    driver.ping().await.expect("ping");
    let pid = driver.pid().await.expect("pid");

    let started = std::time::Instant::now();
    driver.close().await.expect("close");
    assert!(started.elapsed() < grace);
    assert!(!process_exists(pid));
}
