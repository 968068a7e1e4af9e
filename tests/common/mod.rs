//! Shared utilities for reload integration tests.

use std::net::{Ipv6Addr, SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use scribed::config::{CliOverrides, OptionSources};
use scribed::lifecycle::StartupBundle;
use scribed::net::{ListenerFamily, SessionListener};
use scribed::ServerRun;

/// Pick a currently free TCP port.
///
/// Racy in principle, but each test uses its own port and releases the
/// probe socket immediately.
pub fn free_port() -> u16 {
    let probe = TcpListener::bind(SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)).unwrap();
    probe.local_addr().unwrap().port()
}

/// Builder for test config files.
///
/// Everything lives under one state directory so a test tears down with its
/// tempdir.
pub struct ConfigBuilder {
    state: PathBuf,
    port: u16,
    policy: String,
    password: Option<String>,
    root_directory: Option<PathBuf>,
    max_vdiff: u64,
    traffic_log_directory: Option<PathBuf>,
    log_file: Option<PathBuf>,
    sync: Option<(u64, PathBuf, Option<PathBuf>)>,
    plugins: Option<(PathBuf, Vec<String>)>,
}

impl ConfigBuilder {
    pub fn new(state: &Path, port: u16) -> ConfigBuilder {
        ConfigBuilder {
            state: state.to_path_buf(),
            port,
            policy: "unsecured".to_string(),
            password: None,
            root_directory: None,
            max_vdiff: 0,
            traffic_log_directory: None,
            log_file: None,
            sync: None,
            plugins: None,
        }
    }

    pub fn policy(mut self, policy: &str) -> Self {
        self.policy = policy.to_string();
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn root_directory(mut self, root: &Path) -> Self {
        self.root_directory = Some(root.to_path_buf());
        self
    }

    pub fn max_vdiff(mut self, ceiling: u64) -> Self {
        self.max_vdiff = ceiling;
        self
    }

    pub fn traffic_log_directory(mut self, target: &Path) -> Self {
        self.traffic_log_directory = Some(target.to_path_buf());
        self
    }

    #[allow(dead_code)]
    pub fn log_file(mut self, path: &Path) -> Self {
        self.log_file = Some(path.to_path_buf());
        self
    }

    pub fn sync(mut self, interval_secs: u64, directory: &Path, hook: Option<&Path>) -> Self {
        self.sync = Some((
            interval_secs,
            directory.to_path_buf(),
            hook.map(Path::to_path_buf),
        ));
        self
    }

    pub fn plugins(mut self, directory: &Path, names: &[&str]) -> Self {
        self.plugins = Some((
            directory.to_path_buf(),
            names.iter().map(ToString::to_string).collect(),
        ));
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        if let Some(password) = &self.password {
            out.push_str(&format!("password = \"{password}\"\n"));
        }
        if self.max_vdiff > 0 {
            out.push_str(&format!("max_transformation_vdiff = {}\n", self.max_vdiff));
        }
        if let Some(target) = &self.traffic_log_directory {
            out.push_str(&format!(
                "traffic_log_directory = \"{}\"\n",
                target.display()
            ));
        }
        if let Some(log_file) = &self.log_file {
            out.push_str(&format!("log_file = \"{}\"\n", log_file.display()));
        }

        out.push_str(&format!("\n[network]\nport = {}\n", self.port));

        let root = self
            .root_directory
            .clone()
            .unwrap_or_else(|| self.state.join("documents"));
        out.push_str(&format!(
            "\n[storage]\nroot_directory = \"{}\"\n",
            root.display()
        ));

        out.push_str(&format!("\n[security]\npolicy = \"{}\"\n", self.policy));
        out.push_str(&format!(
            "key_exchange_params_file = \"{}\"\n",
            self.state.join("kx-params.bin").display()
        ));
        if self.policy != "unsecured" {
            out.push_str(&format!(
                "key_file = \"{}\"\ncertificate_file = \"{}\"\ncreate_key = true\ncreate_certificate = true\n",
                self.state.join("key.pem").display(),
                self.state.join("cert.pem").display()
            ));
        }

        if let Some((interval, directory, hook)) = &self.sync {
            out.push_str(&format!(
                "\n[sync]\ninterval_secs = {interval}\ndirectory = \"{}\"\n",
                directory.display()
            ));
            if let Some(hook) = hook {
                out.push_str(&format!("hook = \"{}\"\n", hook.display()));
            }
        }

        if let Some((directory, names)) = &self.plugins {
            let list = names
                .iter()
                .map(|n| format!("\"{n}\""))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(
                "\n[plugins]\nload = [{list}]\ndirectory = \"{}\"\n",
                directory.display()
            ));
        }

        out
    }

    pub fn write(&self, path: &Path) {
        std::fs::write(path, self.render()).unwrap();
    }
}

/// Build a bundle from the config file and boot a server on it.
///
/// Must be called from within a tokio runtime.
pub fn start_server(config_path: &Path) -> ServerRun {
    let sources = OptionSources::explicit(vec![config_path.to_path_buf()]);
    let bundle = StartupBundle::build(&sources, &CliOverrides::default()).expect("startup bundle");
    ServerRun::new(bundle, sources, None).expect("server boot")
}

/// The server's active listener (IPv6 preferred, matching the server's own
/// port probe).
pub fn active_listener(run: &ServerRun) -> Arc<SessionListener> {
    run.listener(ListenerFamily::V6)
        .or_else(|| run.listener(ListenerFamily::V4))
        .cloned()
        .expect("no active listener")
}

/// Poll until `predicate` holds or a couple of seconds pass.
pub async fn wait_for<F: Fn() -> bool>(what: &str, predicate: F) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
