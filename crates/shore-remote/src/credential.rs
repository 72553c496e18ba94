//! Credential Store: parámetros de conexión y su snapshot versionado.
//!
//! Nada de esto toca la red. El snapshot reemplaza al objeto de sesión
//! opaco: un JSON explícito con `format_version`, escrito con permisos
//! `0600` porque puede contener un password.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use shore_core::errors::OrchestratorError;

pub const CREDENTIAL_FORMAT_VERSION: u32 = 1;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Secret {
    Password(String),
    IdentityFile(PathBuf),
    /// Claves del agente SSH del usuario.
    Agent,
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::IdentityFile(p) => f.debug_tuple("IdentityFile").field(p).finish(),
            Self::Agent => f.write_str("Agent"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub host: String,
    pub username: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub secret: Secret,
}

impl Credential {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }
}

#[derive(Serialize, Deserialize)]
struct CredentialSnapshot {
    format_version: u32,
    saved_at: DateTime<Utc>,
    #[serde(flatten)]
    credential: Credential,
}

pub fn create(host: &str, username: &str, secret: Secret) -> Result<Credential, OrchestratorError> {
    if host.trim().is_empty() || username.trim().is_empty() {
        return Err(OrchestratorError::InvalidInput("host and username are required".into()));
    }
    Ok(Credential { host: host.trim().to_string(), username: username.trim().to_string(), port: None, secret })
}

pub fn persist(credential: &Credential, path: &Path) -> Result<(), OrchestratorError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let snap = CredentialSnapshot { format_version: CREDENTIAL_FORMAT_VERSION,
                                    saved_at: Utc::now(),
                                    credential: credential.clone() };
    let json = serde_json::to_string_pretty(&snap).map_err(|e| OrchestratorError::Internal(e.to_string()))?;
    let mut file = open_private(path)?;
    file.write_all(json.as_bytes())?;
    // un archivo previo conserva su modo al truncarse
    restrict_permissions(path)?;
    debug!("credential for {} saved to {}", credential.destination(), path.display());
    Ok(())
}

/// Crea el archivo ya con modo `0600`: el password nunca queda legible.
#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create(true).truncate(true).open(path)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

pub fn restore(path: &Path) -> Result<Credential, OrchestratorError> {
    let corrupt = |reason: String| OrchestratorError::CorruptCredential(format!("{}: {reason}", path.display()));
    let text = fs::read_to_string(path).map_err(|e| corrupt(e.to_string()))?;
    let raw: serde_json::Value = serde_json::from_str(&text).map_err(|e| corrupt(e.to_string()))?;
    match raw.get("format_version").and_then(|v| v.as_u64()) {
        Some(v) if v == u64::from(CREDENTIAL_FORMAT_VERSION) => {}
        Some(v) => return Err(corrupt(format!("format_version {v}, expected {CREDENTIAL_FORMAT_VERSION}"))),
        None => return Err(corrupt("missing format_version".into())),
    }
    let snap: CredentialSnapshot = serde_json::from_value(raw).map_err(|e| corrupt(e.to_string()))?;
    Ok(snap.credential)
}

/// Directorio con credenciales nombradas (`<dir>/<name>.credential.json`).
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.credential.json"))
    }

    pub fn save(&self, name: &str, credential: &Credential) -> Result<PathBuf, OrchestratorError> {
        let path = self.path_for(name);
        persist(credential, &path)?;
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Credential, OrchestratorError> {
        restore(&self.path_for(name))
    }

    pub fn names(&self) -> Result<Vec<String>, OrchestratorError> {
        let mut names = Vec::new();
        if !self.dir.exists() {
            return Ok(names);
        }
        for entry in fs::read_dir(&self.dir)? {
            let file = entry?.file_name().to_string_lossy().into_owned();
            if let Some(name) = file.strip_suffix(".credential.json") {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
