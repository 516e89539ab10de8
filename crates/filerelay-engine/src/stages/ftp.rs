//! `ftp`: upload items over FTP, or explicit FTPS with the `ftps` feature.

use std::net::ToSocketAddrs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use filerelay_types::{ConfigError, Properties, PropertyKind, PropertySpec};
use suppaftp::types::FileType;

use crate::error::StageError;
use crate::registry::Collaborators;
use crate::sink::{RemoteSink, RemoteStage};
use crate::stage::Stage;

#[cfg(feature = "ftps")]
type Stream = suppaftp::NativeTlsFtpStream;
#[cfg(not(feature = "ftps"))]
type Stream = suppaftp::FtpStream;

pub const SCHEMA: &[PropertySpec] = &[
    PropertySpec::required("remote_host", "FTP server host", PropertyKind::String),
    PropertySpec::optional("remote_port", "FTP server port", PropertyKind::Integer, "21"),
    PropertySpec::required("remote_dir", "Remote base directory", PropertyKind::String),
    PropertySpec::required("username", "Login user", PropertyKind::String),
    PropertySpec::optional("password", "Login password", PropertyKind::String, ""),
    PropertySpec::optional(
        "is_ssl_auth",
        "Use explicit FTPS (AUTH TLS and PROT P)",
        PropertyKind::Boolean,
        "false",
    ),
    PropertySpec::optional(
        "is_ssl_data",
        "Use explicit FTPS (AUTH TLS and PROT P)",
        PropertyKind::Boolean,
        "false",
    ),
    PropertySpec::optional(
        "timeout",
        "Connect and transfer timeout in seconds",
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

/// Connection settings shared by every fork of an FTP stage.
#[derive(Debug, Clone)]
pub struct FtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Explicit FTPS. The TLS client secures the control and data channels
    /// together, so `is_ssl_auth` and `is_ssl_data` each turn on both.
    pub tls: bool,
    pub timeout: Duration,
}

/// One FTP control connection.
pub struct FtpSink {
    settings: FtpSettings,
    stream: Option<Stream>,
}

impl FtpSink {
    #[must_use]
    pub fn new(settings: FtpSettings) -> Self {
        Self {
            settings,
            stream: None,
        }
    }

    fn stream(&mut self) -> Result<&mut Stream, StageError> {
        self.stream.as_mut().ok_or(StageError::NotConnected)
    }

    fn open(&self) -> Result<Stream, StageError> {
        let settings = &self.settings;
        let addr = (settings.host.as_str(), settings.port)
            .to_socket_addrs()
            .map_err(|e| StageError::Remote(format!("resolve {}: {e}", settings.host)))?
            .next()
            .ok_or_else(|| StageError::Remote(format!("no address for {}", settings.host)))?;

        let stream = Stream::connect_timeout(addr, settings.timeout)
            .map_err(|e| StageError::Remote(format!("connect {addr}: {e}")))?;
        let socket = stream.get_ref();
        socket
            .set_read_timeout(Some(settings.timeout))
            .and_then(|()| socket.set_write_timeout(Some(settings.timeout)))
            .map_err(|e| StageError::Remote(format!("socket timeout: {e}")))?;

        #[cfg(feature = "ftps")]
        let stream = if settings.tls {
            let connector = suppaftp::native_tls::TlsConnector::new()
                .map_err(|e| StageError::Remote(format!("tls setup: {e}")))?;
            stream
                .into_secure(suppaftp::NativeTlsConnector::from(connector), &settings.host)
                .map_err(|e| StageError::Remote(format!("AUTH TLS: {e}")))?
        } else {
            stream
        };

        let mut stream = stream;
        stream
            .login(settings.username.as_str(), settings.password.as_str())
            .map_err(|e| StageError::Remote(format!("login as {}: {e}", settings.username)))?;
        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| StageError::Remote(format!("TYPE I: {e}")))?;
        Ok(stream)
    }
}

impl RemoteSink for FtpSink {
    fn fork(&self) -> Self {
        Self::new(self.settings.clone())
    }

    fn connect(&mut self) -> Result<(), StageError> {
        self.stream = Some(self.open()?);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.quit() {
                tracing::warn!(endpoint = %self.endpoint(), error = %e, "QUIT failed");
            }
        }
    }

    fn ensure_directory(&mut self, path: &str) -> Result<(), StageError> {
        // Servers disagree on the reply for an existing directory; a real
        // problem shows up in the following STOR.
        if let Err(e) = self.stream()?.mkdir(path) {
            tracing::debug!(path, error = %e, "MKD not applied");
        }
        Ok(())
    }

    fn put(&mut self, local: &Path, remote: &str) -> Result<(), StageError> {
        let mut file = std::fs::File::open(local).map_err(|e| StageError::io(local, e))?;
        let bytes = self
            .stream()?
            .put_file(remote, &mut file)
            .map_err(|e| StageError::Remote(format!("STOR {remote}: {e}")))?;
        tracing::debug!(remote, bytes, "uploaded");
        Ok(())
    }

    fn endpoint(&self) -> String {
        let scheme = if self.settings.tls { "ftps" } else { "ftp" };
        format!(
            "{scheme}://{}@{}:{}",
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

/// Read and check FTP connection settings.
///
/// # Errors
///
/// Fails on a missing property, a port outside `1..=65535`, a non-positive
/// timeout, or TLS requested without the `ftps` feature.
///
/// Either TLS flag enables FTPS for both channels; there is no mode with a
/// protected control channel and a clear data channel or the reverse.
pub fn settings(props: &Properties) -> Result<FtpSettings, ConfigError> {
    let tls = props.boolean("is_ssl_auth")? || props.boolean("is_ssl_data")?;
    if tls && !cfg!(feature = "ftps") {
        return Err(ConfigError::Invalid(format!(
            "{}: is_ssl_auth/is_ssl_data need filerelay built with the 'ftps' feature",
            props.provider()
        )));
    }

    let port = props.integer("remote_port")?;
    let port = u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| property_error(props, "remote_port", port.to_string(), "must be between 1 and 65535"))?;

    let timeout = props.float("timeout")?;
    let timeout = Duration::try_from_secs_f64(timeout)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| property_error(props, "timeout", timeout.to_string(), "must be a positive number of seconds"))?;

    Ok(FtpSettings {
        host: props.string("remote_host")?.to_string(),
        port,
        username: props.string("username")?.to_string(),
        password: props.string("password")?.to_string(),
        tls,
        timeout,
    })
}

/// # Errors
///
/// See [`settings`].
pub fn build(props: &Properties, collab: &Collaborators) -> Result<Box<dyn Stage>, ConfigError> {
    Ok(Box::new(RemoteStage::new(
        FtpSink::new(settings(props)?),
        props.string("remote_dir")?,
        props.boolean("check_open")?,
        Arc::clone(&collab.guard),
    )))
}
