//! Runtime configuration reload.
//!
//! Rebuilds the server configuration from disk and swaps it into the live
//! server without interrupting connected clients. The reload is a two-phase
//! transaction:
//!
//! 1. **Build candidates.** Everything that can fail happens here: bundle
//!    construction, key-exchange parameters, listener candidates, a storage
//!    candidate, a replacement plugin manager. Each candidate is exclusively
//!    owned by the attempt; any failure drops them all and returns the
//!    error with the running server byte-for-byte unchanged.
//! 2. **Commit.** Once every precondition is validated, ownership of the
//!    candidates transfers to the running server. Nothing in this phase can
//!    fail: it is task spawns, pointer swaps, and map operations only.
//!
//! The caller serializes reload attempts; the daemon's single control loop
//! guarantees that.

use std::sync::Arc;

use thiserror::Error;

use crate::config::CliOverrides;
use crate::lifecycle::run::{report_open, ServerRun};
use crate::lifecycle::startup::{StartupBundle, StartupError};
use crate::net::listener::{bind_family_candidates, ListenerError, OpenListener};
use crate::plugins::{PluginError, PluginManager};
use crate::security::{CryptoError, KeyExchangeParams};
use crate::storage::FilesystemStorage;
use crate::tasks::{DirectorySync, SyncSettings, TrafficLogger, TransformationProtector};

/// Reload failures. Every variant leaves the server running on its previous
/// configuration.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// Rebuilding the startup bundle failed (config, crypto, credentials).
    #[error("failed to rebuild configuration: {0}")]
    Startup(#[from] StartupError),

    /// Key-exchange parameters could not be ensured.
    #[error("failed to ensure key-exchange parameters: {0}")]
    KeyExchange(#[source] CryptoError),

    /// Neither address family could be bound or opened at the new port.
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// The replacement plugin manager could not be built.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// The server had no active listener at all. This is a broken runtime
    /// contract (the server is expected to always accept on at least one
    /// address family), not an operator-recoverable condition.
    #[error("server has no active listener")]
    NoActiveListener,
}

/// Reload the server's configuration from disk.
///
/// On success the new configuration is fully installed; on error the server
/// keeps running on the old one, untouched.
pub fn reload(run: &mut ServerRun) -> Result<(), ReloadError> {
    // Note that this opens a new handle to the log file.
    let bundle = StartupBundle::build(&run.sources, &CliOverrides::default())?;

    // Associate the existing document directory with the new log handle.
    bundle.log().set_directory(&run.directory);

    // Acquire key-exchange parameters if necessary (the security policy may
    // have changed from unsecured to allow-tls or require-tls).
    let kx_params = match bundle.credentials() {
        Some(_) => Some(
            KeyExchangeParams::ensure(
                bundle.log(),
                run.kx_params.as_ref(),
                &bundle.options().security.key_exchange_params_file,
            )
            .map_err(ReloadError::KeyExchange)?,
        ),
        None => None,
    };

    // Find out the port we are currently serving on.
    let current_port = run.current_port().ok_or(ReloadError::NoActiveListener)?;

    // If the port changes, bind new candidates. Binding is independent per
    // address family: zero, one, or both may succeed, and one is enough.
    let requested_port = bundle.options().network.port;
    let (mut cand6, mut cand4) = (None, None);
    if requested_port != current_port {
        match bind_family_candidates(requested_port) {
            (Err(e6), Err(e4)) => {
                tracing::error!(error = %e4, "IPv4 candidate failed to bind as well");
                return Err(e6.into());
            }
            (c6, c4) => {
                if let Err(e) = &c6 {
                    tracing::warn!(error = %e, "IPv6 candidate failed to bind");
                }
                if let Err(e) = &c4 {
                    tracing::warn!(error = %e, "IPv4 candidate failed to bind");
                }
                cand6 = c6.ok();
                cand4 = c4.ok();
            }
        }
    }

    // Storage candidate when the root moves. Construction does not disturb
    // the running backend; no content is copied.
    let storage_candidate = {
        let current_root = run.directory.root_directory();
        let new_root = &bundle.options().storage.root_directory;
        if &current_root != new_root {
            Some(Arc::new(FilesystemStorage::new(new_root)))
        } else {
            None
        }
    };

    // Rebuild the whole plugin set against the existing directory. The
    // running manager stays in service until commit; on failure the
    // listener and storage candidates are dropped with the error.
    let plugin_candidate = PluginManager::build(
        Arc::clone(&run.directory),
        &bundle.options().plugins.directory,
        &bundle.options().plugins.load,
        bundle.options().config_path.as_deref(),
    )?;

    // Open the bound candidates. This is the last thing that may fail: the
    // kernel queues connections on the new port from here on.
    let mut open6 = None;
    let mut open4 = None;
    if cand6.is_some() || cand4.is_some() {
        let mut open_error: Option<ListenerError> = None;
        open6 = cand6.take().and_then(|c| report_open(c.open(), &mut open_error));
        open4 = cand4.take().and_then(|c| report_open(c.open(), &mut open_error));

        if open6.is_none() && open4.is_none() {
            let e = open_error.expect("a candidate bound but no open error was recorded");
            return Err(e.into());
        }
    }

    // Beyond this point there is nothing that can fail anymore.
    commit(
        run,
        bundle,
        kx_params,
        storage_candidate,
        plugin_candidate,
        open6,
        open4,
    );
    Ok(())
}

/// Install the validated candidates into the running server.
fn commit(
    run: &mut ServerRun,
    bundle: StartupBundle,
    kx_params: Option<Arc<KeyExchangeParams>>,
    storage_candidate: Option<Arc<FilesystemStorage>>,
    plugin_candidate: PluginManager,
    open6: Option<OpenListener>,
    open4: Option<OpenListener>,
) {
    if open6.is_some() || open4.is_some() {
        // We have new listeners; close the old generation. This drops the
        // old sockets and with them their connections.
        for old in [run.listener_v6.take(), run.listener_v4.take()]
            .into_iter()
            .flatten()
        {
            run.pool.remove_server(&old);
            old.close();
        }

        let policy = bundle.options().security.policy;
        let credentials = bundle.credentials().cloned();
        let auth = bundle.auth_context().cloned();
        if let Some(open) = open6 {
            run.install_listener(open, policy, credentials.clone(), auth.clone());
        }
        if let Some(open) = open4 {
            run.install_listener(open, policy, credentials, auth);
        }
    } else {
        // Same port: reconfigure the existing listeners in place. The
        // credentials go in first; a policy that requires TLS is only valid
        // with credentials already present.
        for listener in [run.listener_v6.as_ref(), run.listener_v4.as_ref()]
            .into_iter()
            .flatten()
        {
            listener.set_credentials(bundle.credentials().cloned());
            listener.set_security_policy(bundle.options().security.policy);
        }
    }

    if let Some(storage) = storage_candidate {
        // The pointer moves; content under the old root becomes unreachable
        // from the server. Deliberate, but worth a trace for the operator.
        bundle.log().warn(format!(
            "storage root moved from {} to {}; existing content stays at the old root",
            run.directory.root_directory().display(),
            storage.root().display()
        ));
        run.directory.set_storage(storage);
    }

    run.plugin_manager = plugin_candidate;

    reconcile_directory_sync(run, &bundle);
    reconcile_protector(run, &bundle);
    reconcile_traffic_logger(run, &bundle);

    // Hand every listener and every live connection the new authentication
    // context (including explicit disablement). This aborts exchanges in
    // progress and otherwise has no effect on the connection.
    let auth = bundle.auth_context().cloned();
    for listener in [run.listener_v6.as_ref(), run.listener_v4.as_ref()]
        .into_iter()
        .flatten()
    {
        listener.set_auth_context(auth.clone());
    }
    run.directory
        .for_each_connection(|connection| connection.reset_authentication(auth.clone()));

    if let Some(kx) = kx_params {
        run.kx_params = Some(kx);
    }

    // The previous bundle is dropped here, releasing its auth context,
    // credentials, options, log handle, and runtime refcount.
    run.bundle = bundle;
}

/// Recreate the sync task iff its enabled state, interval, target, or hook
/// changed; otherwise keep it and repoint its log handle.
fn reconcile_directory_sync(run: &mut ServerRun, bundle: &StartupBundle) {
    let desired = SyncSettings::from_options(&bundle.options().sync);

    let reusable = matches!(
        (&run.dsync, &desired),
        (Some(active), Some(want)) if active.settings() == want
    );

    if reusable {
        if let Some(active) = &run.dsync {
            active.set_log(bundle.log().clone());
        }
    } else {
        run.dsync = desired.map(|settings| {
            DirectorySync::spawn(
                Arc::clone(&run.directory),
                bundle.log().clone(),
                settings,
            )
        });
    }
}

/// Keyed only on whether the ceiling is positive: an active protector gets
/// the new ceiling in place, otherwise it is created or destroyed.
fn reconcile_protector(run: &mut ServerRun, bundle: &StartupBundle) {
    let ceiling = bundle.options().max_transformation_vdiff;

    if ceiling > 0 {
        if let Some(active) = &run.protector {
            active.set_max_vdiff(ceiling);
            active.set_log(bundle.log().clone());
        } else {
            run.protector = Some(TransformationProtector::new(
                Arc::clone(&run.directory),
                bundle.log().clone(),
                ceiling,
            ));
        }
    } else {
        run.protector = None;
    }
}

/// Keyed on the target directory: unchanged loggers are kept with a
/// repointed log handle, anything else is recreated or destroyed.
fn reconcile_traffic_logger(run: &mut ServerRun, bundle: &StartupBundle) {
    let target = bundle.options().traffic_log_directory.clone();

    let reusable = matches!(
        (&run.traffic_logger, &target),
        (Some(active), Some(want)) if active.target() == want
    );

    if reusable {
        if let Some(active) = &run.traffic_logger {
            active.set_log(bundle.log().clone());
        }
    } else {
        run.traffic_logger = target.map(|target| {
            TrafficLogger::new(
                Arc::clone(&run.directory),
                bundle.log().clone(),
                &target,
            )
        });
    }
}
