//! Integration tests for the reload transaction.
//!
//! These drive a real server on loopback sockets: a failed reload must be
//! invisible, a committed reload must swap every resource it promised to.

use std::net::{Ipv6Addr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;

use scribed::config::SecurityPolicy;
use scribed::lifecycle::{ReloadError, StartupError};
use scribed::net::AuthExchange;
use scribed::security::AuthOutcome;

mod common;
use common::{active_listener, free_port, start_server, wait_for, ConfigBuilder};

#[tokio::test]
async fn test_reload_with_malformed_config_leaves_server_untouched() {
    let state = tempfile::tempdir().unwrap();
    let config_path = state.path().join("scribed.toml");
    let port = free_port();
    ConfigBuilder::new(state.path(), port).write(&config_path);

    let mut run = start_server(&config_path);
    let old_listener = active_listener(&run);
    let old_storage = run.directory().storage();
    let old_plugins = run.plugin_manager().id();
    let old_options = run.options().clone();

    std::fs::write(&config_path, "[network\nport = oops").unwrap();

    let err = run.reload().unwrap_err();
    assert!(matches!(
        err,
        ReloadError::Startup(StartupError::Config(_))
    ));

    // Listener set, storage backend, plugin manager, and options are all
    // identical to their pre-call values.
    assert!(Arc::ptr_eq(&old_listener, &active_listener(&run)));
    assert!(!old_listener.is_closed());
    assert!(Arc::ptr_eq(&old_storage, &run.directory().storage()));
    assert_eq!(run.plugin_manager().id(), old_plugins);
    assert_eq!(run.options(), &old_options);
    assert_eq!(run.current_port(), Some(port));

    run.shutdown().await;
}

#[tokio::test]
async fn test_unchanged_port_reconfigures_listeners_in_place() {
    let state = tempfile::tempdir().unwrap();
    let config_path = state.path().join("scribed.toml");
    let port = free_port();
    ConfigBuilder::new(state.path(), port).write(&config_path);

    let mut run = start_server(&config_path);
    let old_listener = active_listener(&run);
    assert_eq!(old_listener.security_policy(), SecurityPolicy::Unsecured);
    assert!(old_listener.credentials().is_none());
    let pool_size = run.pool().len();

    ConfigBuilder::new(state.path(), port)
        .policy("allow-tls")
        .write(&config_path);
    run.reload().unwrap();

    // No listener objects were created; the existing one was reconfigured.
    let listener = active_listener(&run);
    assert!(Arc::ptr_eq(&old_listener, &listener));
    assert_eq!(run.pool().len(), pool_size);
    assert_eq!(listener.security_policy(), SecurityPolicy::AllowTls);
    assert!(listener.credentials().is_some());
    assert!(run.key_exchange_params().is_some());
    assert!(state.path().join("kx-params.bin").exists());

    run.shutdown().await;
}

#[tokio::test]
async fn test_port_change_swaps_listeners() {
    let state = tempfile::tempdir().unwrap();
    let config_path = state.path().join("scribed.toml");
    let port_a = free_port();
    ConfigBuilder::new(state.path(), port_a).write(&config_path);

    let mut run = start_server(&config_path);
    let old_listener = active_listener(&run);

    // A client connected to the old port rides through Phase 1 and is cut
    // off only by the commit's listener swap.
    let mut client = tokio::net::TcpStream::connect(("127.0.0.1", port_a))
        .await
        .unwrap();
    let directory = Arc::clone(run.directory());
    wait_for("client registration", || directory.connection_count() == 1).await;

    let port_b = free_port();
    ConfigBuilder::new(state.path(), port_b)
        .policy("allow-tls")
        .write(&config_path);
    run.reload().unwrap();

    assert_eq!(run.current_port(), Some(port_b));
    assert!(old_listener.is_closed());
    assert!(!run.pool().contains(&old_listener));

    let new_listener = active_listener(&run);
    assert!(!Arc::ptr_eq(&old_listener, &new_listener));
    assert_eq!(new_listener.security_policy(), SecurityPolicy::AllowTls);
    assert!(new_listener.credentials().is_some());

    // The old client sees the close.
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("old client never saw the close");
    assert_eq!(read.unwrap_or(0), 0);

    // The new port accepts connections.
    let _new_client = tokio::net::TcpStream::connect(("127.0.0.1", port_b))
        .await
        .unwrap();
    wait_for("new client registration", || {
        directory.connection_count() >= 1
    })
    .await;

    run.shutdown().await;
}

#[tokio::test]
async fn test_port_change_with_both_binds_failing_aborts() {
    let state = tempfile::tempdir().unwrap();
    let config_path = state.path().join("scribed.toml");
    let port = free_port();
    ConfigBuilder::new(state.path(), port).write(&config_path);

    let mut run = start_server(&config_path);
    let old_listener = active_listener(&run);
    let old_plugins = run.plugin_manager().id();

    // Occupy a port for both families so neither candidate can bind.
    let blocker6 =
        TcpListener::bind(SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)).unwrap();
    let blocked_port = blocker6.local_addr().unwrap().port();
    let _blocker4 = TcpListener::bind(("0.0.0.0", blocked_port)).ok();

    ConfigBuilder::new(state.path(), blocked_port).write(&config_path);

    let err = run.reload().unwrap_err();
    assert!(matches!(err, ReloadError::Listener(_)));

    // No listener, plugin, or task reconciliation happened.
    assert_eq!(run.current_port(), Some(port));
    assert!(Arc::ptr_eq(&old_listener, &active_listener(&run)));
    assert!(!old_listener.is_closed());
    assert_eq!(run.plugin_manager().id(), old_plugins);

    run.shutdown().await;
}

#[tokio::test]
async fn test_plugin_failure_aborts_whole_reload() {
    let state = tempfile::tempdir().unwrap();
    let config_path = state.path().join("scribed.toml");
    let port = free_port();
    ConfigBuilder::new(state.path(), port).write(&config_path);

    let mut run = start_server(&config_path);
    let old_listener = active_listener(&run);
    let old_storage = run.directory().storage();
    let old_plugins = run.plugin_manager().id();

    let plugin_dir = state.path().join("plugins");
    std::fs::create_dir_all(&plugin_dir).unwrap();
    ConfigBuilder::new(state.path(), port)
        .root_directory(&state.path().join("moved-documents"))
        .plugins(&plugin_dir, &["ghost"])
        .write(&config_path);

    let err = run.reload().unwrap_err();
    assert!(matches!(err, ReloadError::Plugin(_)));

    // The storage candidate built before the plugin failure was discarded.
    assert!(Arc::ptr_eq(&old_storage, &run.directory().storage()));
    assert!(Arc::ptr_eq(&old_listener, &active_listener(&run)));
    assert_eq!(run.plugin_manager().id(), old_plugins);

    run.shutdown().await;
}

#[tokio::test]
async fn test_storage_root_move_swaps_backend_without_copying() {
    let state = tempfile::tempdir().unwrap();
    let config_path = state.path().join("scribed.toml");
    let port = free_port();
    ConfigBuilder::new(state.path(), port).write(&config_path);

    let mut run = start_server(&config_path);
    let old_storage = run.directory().storage();
    old_storage.write_document("draft", b"kept at the old root").unwrap();

    let new_root = state.path().join("relocated");
    ConfigBuilder::new(state.path(), port)
        .root_directory(&new_root)
        .write(&config_path);
    run.reload().unwrap();

    let new_storage = run.directory().storage();
    assert!(!Arc::ptr_eq(&old_storage, &new_storage));
    assert_eq!(run.directory().root_directory(), new_root);

    // Pointer moved, nothing copied: the old content is orphaned.
    assert_eq!(new_storage.list_documents().unwrap(), Vec::<String>::new());
    assert_eq!(
        old_storage.read_document("draft").unwrap(),
        b"kept at the old root"
    );

    run.shutdown().await;
}

#[tokio::test]
async fn test_sync_task_reuse_and_recreate() {
    let state = tempfile::tempdir().unwrap();
    let config_path = state.path().join("scribed.toml");
    let port = free_port();
    let mirror = state.path().join("mirror");

    ConfigBuilder::new(state.path(), port)
        .sync(3600, &mirror, None)
        .write(&config_path);
    let mut run = start_server(&config_path);
    let sync_id = run.directory_sync().unwrap().id();

    // Unchanged settings: the task is reused, only its log is repointed.
    run.reload().unwrap();
    assert_eq!(run.directory_sync().unwrap().id(), sync_id);

    // A changed interval forces a recreate.
    ConfigBuilder::new(state.path(), port)
        .sync(1800, &mirror, None)
        .write(&config_path);
    run.reload().unwrap();
    let recreated_id = run.directory_sync().unwrap().id();
    assert_ne!(recreated_id, sync_id);

    // A changed hook forces a recreate too.
    ConfigBuilder::new(state.path(), port)
        .sync(1800, &mirror, Some(&state.path().join("hook.sh")))
        .write(&config_path);
    run.reload().unwrap();
    assert_ne!(run.directory_sync().unwrap().id(), recreated_id);

    // Unconfiguring destroys the task.
    ConfigBuilder::new(state.path(), port).write(&config_path);
    run.reload().unwrap();
    assert!(run.directory_sync().is_none());

    run.shutdown().await;
}

#[tokio::test]
async fn test_protector_reconciliation() {
    let state = tempfile::tempdir().unwrap();
    let config_path = state.path().join("scribed.toml");
    let port = free_port();

    ConfigBuilder::new(state.path(), port)
        .max_vdiff(100)
        .write(&config_path);
    let mut run = start_server(&config_path);

    let protector = run.transformation_protector().unwrap();
    assert!(!protector.check(150));
    assert_eq!(protector.rejected_count(), 1);

    // A new ceiling is applied in place: the rejection counter survives.
    ConfigBuilder::new(state.path(), port)
        .max_vdiff(200)
        .write(&config_path);
    run.reload().unwrap();
    let protector = run.transformation_protector().unwrap();
    assert_eq!(protector.max_vdiff(), 200);
    assert_eq!(protector.rejected_count(), 1);
    assert!(protector.check(150));

    // A zero ceiling destroys the protector.
    ConfigBuilder::new(state.path(), port).write(&config_path);
    run.reload().unwrap();
    assert!(run.transformation_protector().is_none());

    // And a positive one brings a fresh guard back.
    ConfigBuilder::new(state.path(), port)
        .max_vdiff(50)
        .write(&config_path);
    run.reload().unwrap();
    assert_eq!(run.transformation_protector().unwrap().rejected_count(), 0);

    run.shutdown().await;
}

#[tokio::test]
async fn test_traffic_logger_reconciliation() {
    let state = tempfile::tempdir().unwrap();
    let config_path = state.path().join("scribed.toml");
    let port = free_port();
    let target_a = state.path().join("traffic-a");
    let target_b = state.path().join("traffic-b");

    ConfigBuilder::new(state.path(), port)
        .traffic_log_directory(&target_a)
        .write(&config_path);
    let mut run = start_server(&config_path);
    let logger_id = run.traffic_logger().unwrap().id();

    // Unchanged target: reused.
    run.reload().unwrap();
    assert_eq!(run.traffic_logger().unwrap().id(), logger_id);

    // Changed target: recreated.
    ConfigBuilder::new(state.path(), port)
        .traffic_log_directory(&target_b)
        .write(&config_path);
    run.reload().unwrap();
    let logger = run.traffic_logger().unwrap();
    assert_ne!(logger.id(), logger_id);
    assert_eq!(logger.target(), target_b);

    // Unconfigured: destroyed.
    ConfigBuilder::new(state.path(), port).write(&config_path);
    run.reload().unwrap();
    assert!(run.traffic_logger().is_none());

    run.shutdown().await;
}

#[tokio::test]
async fn test_auth_context_propagation_aborts_exchange() {
    let state = tempfile::tempdir().unwrap();
    let config_path = state.path().join("scribed.toml");
    let port = free_port();
    ConfigBuilder::new(state.path(), port)
        .password("first-secret")
        .write(&config_path);

    let mut run = start_server(&config_path);
    let _client = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    let directory = Arc::clone(run.directory());
    wait_for("client registration", || directory.connection_count() == 1).await;

    let mut connections = Vec::new();
    directory.for_each_connection(|c| connections.push(Arc::clone(c)));
    let connection = connections.pop().unwrap();

    assert!(connection.begin_auth_exchange());
    assert_eq!(connection.auth_exchange(), AuthExchange::InProgress);
    let old_ctx = connection.auth_context().unwrap();

    ConfigBuilder::new(state.path(), port)
        .password("second-secret")
        .write(&config_path);
    run.reload().unwrap();

    // The exchange was invalidated but the connection survived.
    assert!(connection.is_open());
    assert_eq!(directory.connection_count(), 1);
    assert_eq!(connection.auth_exchange(), AuthExchange::Idle);

    let new_ctx = connection.auth_context().unwrap();
    assert!(!Arc::ptr_eq(&old_ctx, &new_ctx));
    assert_eq!(new_ctx.validate("second-secret"), AuthOutcome::Accept);
    assert_eq!(new_ctx.validate("first-secret"), AuthOutcome::Reject);

    // Listener and connection share the bundle's context.
    let listener = active_listener(&run);
    assert!(Arc::ptr_eq(
        &listener.auth_context().unwrap(),
        run.bundle().auth_context().unwrap()
    ));

    run.shutdown().await;
}

#[tokio::test]
async fn test_auth_disablement_propagates() {
    let state = tempfile::tempdir().unwrap();
    let config_path = state.path().join("scribed.toml");
    let port = free_port();
    ConfigBuilder::new(state.path(), port)
        .password("secret")
        .write(&config_path);

    let mut run = start_server(&config_path);
    let _client = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    let directory = Arc::clone(run.directory());
    wait_for("client registration", || directory.connection_count() == 1).await;

    let mut connections = Vec::new();
    directory.for_each_connection(|c| connections.push(Arc::clone(c)));
    let connection = connections.pop().unwrap();
    connection.begin_auth_exchange();

    // Disabling authentication is itself a propagated value.
    ConfigBuilder::new(state.path(), port).write(&config_path);
    run.reload().unwrap();

    assert!(connection.is_open());
    assert!(connection.auth_context().is_none());
    assert_eq!(connection.auth_exchange(), AuthExchange::Idle);
    assert!(active_listener(&run).auth_context().is_none());

    run.shutdown().await;
}
