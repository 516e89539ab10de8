//! `scp`: upload items over SFTP.
//!
//! The server's host key is accepted without verification.

use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use filerelay_types::{ConfigError, Properties, PropertyKind, PropertySpec};
use ssh2::{Session, Sftp};

use crate::error::StageError;
use crate::registry::Collaborators;
use crate::sink::{RemoteSink, RemoteStage};
use crate::stage::Stage;

const DIR_MODE: i32 = 0o755;

pub const SCHEMA: &[PropertySpec] = &[
    PropertySpec::required("remote_host", "SSH server host", PropertyKind::String),
    PropertySpec::optional("remote_port", "SSH server port", PropertyKind::Integer, "22"),
    PropertySpec::required("remote_dir", "Remote base directory", PropertyKind::String),
    PropertySpec::required("username", "Login user", PropertyKind::String),
    PropertySpec::optional(
        "password",
        "Login password, or the passphrase of key_filename",
        PropertyKind::String,
        "",
    ),
    PropertySpec::unset(
        "key_filename",
        "Private key file used instead of the password",
        PropertyKind::String,
    ),
    PropertySpec::optional(
        "timeout",
        "Connect and handshake timeout in seconds",
        PropertyKind::Float,
        "10",
    ),
    PropertySpec::optional(
        "channel_timeout",
        "SFTP operation timeout in seconds",
        PropertyKind::Float,
        "10",
    ),
    PropertySpec::optional(
        "check_open",
        "Fail items another process still holds open",
        PropertyKind::Boolean,
        "true",
    ),
];

/// How the session proves its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SftpAuth {
    Key {
        path: PathBuf,
        passphrase: Option<String>,
    },
    Password(String),
    Agent,
}

/// Connection settings shared by every fork of an SFTP stage.
#[derive(Debug, Clone)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SftpAuth,
    pub timeout: Duration,
    pub channel_timeout: Duration,
}

/// One SSH session with its SFTP channel.
pub struct SftpSink {
    settings: SftpSettings,
    session: Option<(Session, Sftp)>,
}

impl SftpSink {
    #[must_use]
    pub fn new(settings: SftpSettings) -> Self {
        Self {
            settings,
            session: None,
        }
    }

    fn sftp(&self) -> Result<&Sftp, StageError> {
        self.session
            .as_ref()
            .map(|(_, sftp)| sftp)
            .ok_or(StageError::NotConnected)
    }

    fn open(&self) -> Result<(Session, Sftp), StageError> {
        let settings = &self.settings;
        let addr = (settings.host.as_str(), settings.port)
            .to_socket_addrs()
            .map_err(|e| StageError::Remote(format!("resolve {}: {e}", settings.host)))?
            .next()
            .ok_or_else(|| StageError::Remote(format!("no address for {}", settings.host)))?;

        let tcp = TcpStream::connect_timeout(&addr, settings.timeout)
            .map_err(|e| StageError::Remote(format!("connect {addr}: {e}")))?;

        let mut session =
            Session::new().map_err(|e| StageError::Remote(format!("ssh session: {e}")))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(millis(settings.timeout));
        session
            .handshake()
            .map_err(|e| StageError::Remote(format!("ssh handshake with {addr}: {e}")))?;

        let user = settings.username.as_str();
        let auth = match &settings.auth {
            SftpAuth::Key { path, passphrase } => {
                session.userauth_pubkey_file(user, None, path, passphrase.as_deref())
            }
            SftpAuth::Password(password) => session.userauth_password(user, password),
            SftpAuth::Agent => session.userauth_agent(user),
        };
        auth.map_err(|e| StageError::Remote(format!("login as {user}: {e}")))?;
        if !session.authenticated() {
            return Err(StageError::Remote(format!("login as {user}: not authenticated")));
        }

        session.set_timeout(millis(settings.channel_timeout));
        let sftp = session
            .sftp()
            .map_err(|e| StageError::Remote(format!("sftp subsystem: {e}")))?;
        Ok((session, sftp))
    }
}

fn millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

impl RemoteSink for SftpSink {
    fn fork(&self) -> Self {
        Self::new(self.settings.clone())
    }

    fn connect(&mut self) -> Result<(), StageError> {
        self.session = Some(self.open()?);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some((session, sftp)) = self.session.take() {
            drop(sftp);
            if let Err(e) = session.disconnect(None, "filerelay done", None) {
                tracing::warn!(endpoint = %self.endpoint(), error = %e, "SSH disconnect failed");
            }
        }
    }

    fn ensure_directory(&mut self, path: &str) -> Result<(), StageError> {
        let sftp = self.sftp()?;
        let dir = Path::new(path);
        if sftp.stat(dir).is_ok() {
            return Ok(());
        }
        sftp.mkdir(dir, DIR_MODE)
            .map_err(|e| StageError::Remote(format!("mkdir {path}: {e}")))
    }

    fn put(&mut self, local: &Path, remote: &str) -> Result<(), StageError> {
        let mut file = std::fs::File::open(local).map_err(|e| StageError::io(local, e))?;
        let mut target = self
            .sftp()?
            .create(Path::new(remote))
            .map_err(|e| StageError::Remote(format!("create {remote}: {e}")))?;
        let bytes = std::io::copy(&mut file, &mut target)
            .map_err(|e| StageError::Remote(format!("write {remote}: {e}")))?;
        tracing::debug!(remote, bytes, "uploaded");
        Ok(())
    }

    fn endpoint(&self) -> String {
        format!(
            "sftp://{}@{}:{}",
            self.settings.username, self.settings.host, self.settings.port
        )
    }
}

fn property_error(props: &Properties, name: &str, raw: String, reason: &str) -> ConfigError {
    ConfigError::PropertyType {
        provider: props.provider().to_string(),
        name: name.to_string(),
        raw,
        reason: reason.to_string(),
    }
}

fn seconds(props: &Properties, name: &str) -> Result<Duration, ConfigError> {
    let secs = props.float(name)?;
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| property_error(props, name, secs.to_string(), "must be a positive number of seconds"))
}

/// Read and check SFTP connection settings.
///
/// # Errors
///
/// Fails on a missing property, a port outside `1..=65535` or a non-positive
/// timeout.
pub fn settings(props: &Properties) -> Result<SftpSettings, ConfigError> {
    let port = props.integer("remote_port")?;
    let port = u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| property_error(props, "remote_port", port.to_string(), "must be between 1 and 65535"))?;

    let password = props.string("password")?;
    let auth = match props.opt_string("key_filename")? {
        Some(key) => SftpAuth::Key {
            path: PathBuf::from(key),
            passphrase: (!password.is_empty()).then(|| password.to_string()),
        },
        None if !password.is_empty() => SftpAuth::Password(password.to_string()),
        None => SftpAuth::Agent,
    };

    Ok(SftpSettings {
        host: props.string("remote_host")?.to_string(),
        port,
        username: props.string("username")?.to_string(),
        auth,
        timeout: seconds(props, "timeout")?,
        channel_timeout: seconds(props, "channel_timeout")?,
    })
}

/// # Errors
///
/// See [`settings`].
pub fn build(props: &Properties, collab: &Collaborators) -> Result<Box<dyn Stage>, ConfigError> {
    Ok(Box::new(RemoteStage::new(
        SftpSink::new(settings(props)?),
        props.string("remote_dir")?,
        props.boolean("check_open")?,
        Arc::clone(&collab.guard),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ProviderRegistry, PROCESSOR_COMMON};
    use filerelay_types::materialize;
    use serde_json::{json, Map, Value};

    fn props(value: Value) -> Properties {
        let raw: Map<String, Value> = value.as_object().cloned().unwrap();
        let schema: Vec<_> = PROCESSOR_COMMON.iter().chain(SCHEMA).copied().collect();
        materialize("scp", &schema, &raw).unwrap()
    }

    fn base() -> Value {
        json!({
            "name": "upload",
            "remote_host": "127.0.0.1",
            "remote_dir": "/incoming",
            "username": "relay",
        })
    }

    fn with(mut value: Value, key: &str, extra: Value) -> Value {
        value[key] = extra;
        value
    }

    #[test]
    fn defaults_are_applied() {
        let settings = settings(&props(base())).unwrap();
        assert_eq!(settings.port, 22);
        assert_eq!(settings.timeout, Duration::from_secs(10));
        assert_eq!(settings.channel_timeout, Duration::from_secs(10));
        assert_eq!(settings.auth, SftpAuth::Agent);
    }

    #[test]
    fn password_selects_password_auth() {
        let settings = settings(&props(with(base(), "password", json!("s3cret")))).unwrap();
        assert_eq!(settings.auth, SftpAuth::Password("s3cret".to_string()));
    }

    #[test]
    fn key_file_takes_precedence_and_uses_password_as_passphrase() {
        let raw = with(
            with(base(), "key_filename", json!("/home/relay/.ssh/id_ed25519")),
            "password",
            json!("unlock"),
        );
        let settings = settings(&props(raw)).unwrap();
        assert_eq!(
            settings.auth,
            SftpAuth::Key {
                path: PathBuf::from("/home/relay/.ssh/id_ed25519"),
                passphrase: Some("unlock".to_string()),
            }
        );
    }

    #[test]
    fn port_out_of_range_names_the_property() {
        let err = settings(&props(with(base(), "remote_port", json!(0)))).unwrap_err();
        assert_eq!(err.property(), Some("remote_port"));
    }

    #[test]
    fn non_positive_channel_timeout_is_rejected() {
        let err = settings(&props(with(base(), "channel_timeout", json!(0)))).unwrap_err();
        assert_eq!(err.property(), Some("channel_timeout"));
    }

    #[test]
    fn missing_remote_dir_is_rejected_by_the_registry() {
        let registry = ProviderRegistry::builtin();
        let mut raw = base();
        raw.as_object_mut().unwrap().remove("remote_dir");
        let err = registry
            .build_processor("scp", raw.as_object().unwrap(), &Collaborators::default())
            .err()
            .unwrap();
        assert_eq!(err.property(), Some("remote_dir"));
    }

    #[test]
    fn refused_connection_fails_pre_process() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let registry = ProviderRegistry::builtin();
        let raw = with(with(base(), "remote_port", json!(port)), "timeout", json!(1));
        let built = registry
            .build_processor("scp", raw.as_object().unwrap(), &Collaborators::default())
            .unwrap();

        let mut worker = built.stage.fork();
        assert!(matches!(worker.pre_process(), Err(StageError::Remote(_))));
    }

    #[test]
    fn endpoint_and_summary() {
        let sink = SftpSink::new(settings(&props(base())).unwrap());
        assert_eq!(sink.endpoint(), "sftp://relay@127.0.0.1:22");
        let stage = RemoteStage::new(sink, "/incoming", true, Arc::new(crate::guard::NoopGuard));
        assert_eq!(stage.summary(), "sftp://relay@127.0.0.1:22 -> /incoming");
    }

    #[test]
    fn operations_require_a_connection() {
        let mut sink = SftpSink::new(settings(&props(base())).unwrap());
        assert!(matches!(sink.ensure_directory("/x"), Err(StageError::NotConnected)));
        assert!(matches!(
            sink.put(Path::new("/etc/hostname"), "/x/hostname"),
            Err(StageError::NotConnected) | Err(StageError::Io { .. })
        ));
        sink.disconnect();
    }
}
