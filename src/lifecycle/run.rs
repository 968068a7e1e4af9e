//! Running server state.
//!
//! [`ServerRun`] owns everything with a lifetime beyond one configuration
//! generation: the document directory, the listener pool, the per-family
//! session listeners, the plugin manager, the maintenance tasks, and the
//! currently installed startup bundle. The reload orchestrator mutates this
//! state only after every fallible step has succeeded.

use std::sync::Arc;

use thiserror::Error;

use crate::config::{OptionSources, SecurityPolicy, ServerOptions};
use crate::directory::DocumentDirectory;
use crate::lifecycle::reload::{reload, ReloadError};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::startup::StartupBundle;
use crate::net::listener::{bind_family_candidates, ListenerError, ListenerFamily, OpenListener};
use crate::net::pool::ListenerPool;
use crate::net::session::SessionListener;
use crate::net::LocalDiscovery;
use crate::plugins::{PluginError, PluginManager};
use crate::security::{AuthContext, Credentials, CryptoError, KeyExchangeParams};
use crate::storage::FilesystemStorage;
use crate::tasks::{DirectorySync, SyncSettings, TrafficLogger, TransformationProtector};

/// Initial-startup failures.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("failed to ensure key-exchange parameters: {0}")]
    KeyExchange(#[source] CryptoError),
}

/// The live server.
pub struct ServerRun {
    pub(crate) directory: Arc<DocumentDirectory>,
    pub(crate) pool: ListenerPool,
    pub(crate) listener_v6: Option<Arc<SessionListener>>,
    pub(crate) listener_v4: Option<Arc<SessionListener>>,
    pub(crate) plugin_manager: PluginManager,
    pub(crate) kx_params: Option<Arc<KeyExchangeParams>>,
    pub(crate) dsync: Option<DirectorySync>,
    pub(crate) protector: Option<TransformationProtector>,
    pub(crate) traffic_logger: Option<TrafficLogger>,
    pub(crate) bundle: StartupBundle,
    pub(crate) sources: OptionSources,
    pub(crate) discovery: Option<Arc<dyn LocalDiscovery>>,
    pub(crate) shutdown: Shutdown,
}

impl ServerRun {
    /// Bring the server up from a freshly built bundle.
    ///
    /// Must be called from within the async runtime. At least one address
    /// family must come up; the other may fail and is logged away.
    pub fn new(
        bundle: StartupBundle,
        sources: OptionSources,
        discovery: Option<Arc<dyn LocalDiscovery>>,
    ) -> Result<ServerRun, RunError> {
        let options = bundle.options().clone();

        let kx_params = match bundle.credentials() {
            Some(_) => Some(
                KeyExchangeParams::ensure(
                    bundle.log(),
                    None,
                    &options.security.key_exchange_params_file,
                )
                .map_err(RunError::KeyExchange)?,
            ),
            None => None,
        };

        let (cand6, cand4) = bind_family_candidates(options.network.port);
        let (cand6, cand4) = match (cand6, cand4) {
            (Err(e6), Err(e4)) => {
                tracing::error!(error = %e4, "IPv4 bind failed as well");
                return Err(e6.into());
            }
            (c6, c4) => {
                if let Err(e) = &c6 {
                    tracing::warn!(error = %e, "Continuing without an IPv6 listener");
                }
                if let Err(e) = &c4 {
                    tracing::warn!(error = %e, "Continuing without an IPv4 listener");
                }
                (c6.ok(), c4.ok())
            }
        };

        let mut open_error: Option<ListenerError> = None;
        let open6 = cand6.and_then(|c| report_open(c.open(), &mut open_error));
        let open4 = cand4.and_then(|c| report_open(c.open(), &mut open_error));
        if open6.is_none() && open4.is_none() {
            let e = open_error.expect("a candidate bound but no open error was recorded");
            return Err(e.into());
        }

        let storage = FilesystemStorage::new(&options.storage.root_directory);
        let directory = Arc::new(DocumentDirectory::new(storage));
        bundle.log().set_directory(&directory);

        let plugin_manager = PluginManager::build(
            Arc::clone(&directory),
            &options.plugins.directory,
            &options.plugins.load,
            options.config_path.as_deref(),
        )?;

        let mut run = ServerRun {
            directory,
            pool: ListenerPool::new(),
            listener_v6: None,
            listener_v4: None,
            plugin_manager,
            kx_params,
            dsync: None,
            protector: None,
            traffic_logger: None,
            bundle,
            sources,
            discovery,
            shutdown: Shutdown::new(),
        };

        let policy = run.bundle.options().security.policy;
        let credentials = run.bundle.credentials().cloned();
        let auth = run.bundle.auth_context().cloned();
        if let Some(open) = open6 {
            run.install_listener(open, policy, credentials.clone(), auth.clone());
        }
        if let Some(open) = open4 {
            run.install_listener(open, policy, credentials, auth);
        }

        run.dsync = SyncSettings::from_options(&run.bundle.options().sync).map(|settings| {
            DirectorySync::spawn(
                Arc::clone(&run.directory),
                run.bundle.log().clone(),
                settings,
            )
        });

        if run.bundle.options().max_transformation_vdiff > 0 {
            run.protector = Some(TransformationProtector::new(
                Arc::clone(&run.directory),
                run.bundle.log().clone(),
                run.bundle.options().max_transformation_vdiff,
            ));
        }

        if let Some(target) = run.bundle.options().traffic_log_directory.clone() {
            run.traffic_logger = Some(TrafficLogger::new(
                Arc::clone(&run.directory),
                run.bundle.log().clone(),
                &target,
            ));
        }

        run.bundle.log().info(format!(
            "serving on port {} (policy {})",
            run.current_port().unwrap_or(options.network.port),
            policy
        ));

        Ok(run)
    }

    /// Wrap an open listener with the given settings, register it in the
    /// pool, publish it if discovery is available, and take ownership of it.
    pub(crate) fn install_listener(
        &mut self,
        open: OpenListener,
        policy: SecurityPolicy,
        credentials: Option<Arc<Credentials>>,
        auth: Option<Arc<AuthContext>>,
    ) {
        let family = open.family();
        let listener = SessionListener::new(
            open,
            policy,
            credentials,
            auth,
            Arc::clone(&self.directory),
            self.shutdown.subscribe(),
        );

        self.pool.add_server(Arc::clone(&listener));
        if let Some(discovery) = &self.discovery {
            self.pool
                .add_local_publisher(&listener, Arc::clone(discovery));
        }

        match family {
            ListenerFamily::V6 => self.listener_v6 = Some(listener),
            ListenerFamily::V4 => self.listener_v4 = Some(listener),
        }
    }

    /// Rebuild configuration from disk and swap it into this server.
    pub fn reload(&mut self) -> Result<(), ReloadError> {
        reload(self)
    }

    /// The port the server currently accepts on.
    ///
    /// `None` means the server invariant "at least one listener is active"
    /// has been broken.
    pub fn current_port(&self) -> Option<u16> {
        self.listener_v6
            .as_ref()
            .or(self.listener_v4.as_ref())
            .map(|l| l.local_port())
    }

    pub fn directory(&self) -> &Arc<DocumentDirectory> {
        &self.directory
    }

    pub fn pool(&self) -> &ListenerPool {
        &self.pool
    }

    pub fn listener(&self, family: ListenerFamily) -> Option<&Arc<SessionListener>> {
        match family {
            ListenerFamily::V6 => self.listener_v6.as_ref(),
            ListenerFamily::V4 => self.listener_v4.as_ref(),
        }
    }

    pub fn plugin_manager(&self) -> &PluginManager {
        &self.plugin_manager
    }

    pub fn bundle(&self) -> &StartupBundle {
        &self.bundle
    }

    pub fn options(&self) -> &ServerOptions {
        self.bundle.options()
    }

    pub fn key_exchange_params(&self) -> Option<&Arc<KeyExchangeParams>> {
        self.kx_params.as_ref()
    }

    pub fn directory_sync(&self) -> Option<&DirectorySync> {
        self.dsync.as_ref()
    }

    pub fn transformation_protector(&self) -> Option<&TransformationProtector> {
        self.protector.as_ref()
    }

    pub fn traffic_logger(&self) -> Option<&TrafficLogger> {
        self.traffic_logger.as_ref()
    }

    /// Tear the server down: stop accepting, close connections, stop tasks.
    pub async fn shutdown(mut self) {
        self.bundle.log().info("shutting down");
        self.shutdown.trigger();

        for listener in [self.listener_v6.take(), self.listener_v4.take()]
            .into_iter()
            .flatten()
        {
            self.pool.remove_server(&listener);
            listener.close();
        }

        self.dsync = None;
        self.protector = None;
        self.traffic_logger = None;

        // Wait for connection tasks to drain the registry.
        for _ in 0..50 {
            if self.directory.connection_count() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}

impl std::fmt::Debug for ServerRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRun")
            .field("port", &self.current_port())
            .field("pool", &self.pool.len())
            .field("connections", &self.directory.connection_count())
            .finish()
    }
}

pub(crate) fn report_open(
    result: Result<OpenListener, ListenerError>,
    open_error: &mut Option<ListenerError>,
) -> Option<OpenListener> {
    match result {
        Ok(open) => Some(open),
        Err(e) => {
            tracing::warn!(error = %e, "Listener candidate failed to open");
            open_error.get_or_insert(e);
            None
        }
    }
}
