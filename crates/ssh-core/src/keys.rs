//! Persistent client keypair used to authenticate against cluster nodes.
//!
//! The keypair lives next to the operator's other SSH keys and is generated
//! once on first use. Two processes racing on first use are not coordinated:
//! the loser fails on `create_new` and the operator simply re-runs the command.

use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use base64::Engine;
use russh::keys::{
    self, PrivateKey, PublicKey,
    ssh_key::{Algorithm, LineEnding, rand_core::OsRng},
};
use tracing::{debug, info, warn};

use crate::error::{SshCoreError, SshResult};

/// Raw key file contents as stored on disk.
#[derive(Clone, PartialEq, Eq)]
pub struct Keypair {
    /// Single-line `authorized_keys` entry, newline terminated.
    pub public: Vec<u8>,
    /// Unencrypted OpenSSH private key container.
    pub private: Vec<u8>,
}

impl Keypair {
    /// Base64 of the public key line, the form the access API expects.
    pub fn public_key_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.public)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &String::from_utf8_lossy(&self.public).trim_end())
            .field("private", &"<redacted>")
            .finish()
    }
}

/// Canonical file locations for one identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPaths {
    pub private: PathBuf,
    pub public: PathBuf,
}

impl KeyPaths {
    pub fn new(dir: &Path, identity: &str) -> Self {
        let private = dir.join(format!("{identity}_ed25519"));
        let public = dir.join(format!("{identity}_ed25519.pub"));
        Self { private, public }
    }
}

/// `~/.ssh`, when a home directory can be determined.
pub fn default_key_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh"))
}

/// Load the keypair for `identity` from `dir`, generating it when absent.
pub fn ensure_keypair(dir: &Path, identity: &str) -> SshResult<Keypair> {
    ensure_key_dir(dir)?;
    let paths = KeyPaths::new(dir, identity);

    match fs::metadata(&paths.private) {
        Ok(_) => load_keypair(&paths),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            let keypair = generate_keypair(identity)?;
            persist_keypair(&paths, &keypair)?;
            info!(path = %paths.private.display(), "generated new SSH keypair");
            Ok(keypair)
        }
        Err(err) => Err(SshCoreError::KeyDirectory {
            path: paths.private,
            source: err,
        }),
    }
}

/// Generate an Ed25519 keypair whose public half is commented with `identity`.
pub fn generate_keypair(identity: &str) -> SshResult<Keypair> {
    let mut key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).map_err(|e| SshCoreError::KeyGeneration(e.to_string()))?;
    key.set_comment(identity);
    let private = key
        .to_openssh(LineEnding::LF)
        .map_err(|e| SshCoreError::KeyGeneration(e.to_string()))?;
    let mut public = key
        .public_key()
        .to_openssh()
        .map_err(|e| SshCoreError::KeyGeneration(e.to_string()))?;
    public.push('\n');
    Ok(Keypair {
        public: public.into_bytes(),
        private: private.as_bytes().to_vec(),
    })
}

/// Parse private key bytes in OpenSSH or PKCS#8 PEM form.
pub fn parse_private_key(data: &[u8]) -> SshResult<PrivateKey> {
    let text = std::str::from_utf8(data).map_err(|_| SshCoreError::InvalidPrivateKey("key is not valid UTF-8".into()))?;

    if let Ok(key) = PrivateKey::from_openssh(text) {
        return Ok(key);
    }

    match keys::decode_secret_key(text, None) {
        Ok(key) => Ok(key),
        Err(keys::Error::KeyIsEncrypted) => Err(SshCoreError::InvalidPrivateKey(
            "encrypted private keys are not supported".into(),
        )),
        Err(err) => Err(SshCoreError::InvalidPrivateKey(err.to_string())),
    }
}

fn ensure_key_dir(dir: &Path) -> SshResult<()> {
    if dir.is_dir() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).map_err(|source| SshCoreError::KeyDirectory {
        path: dir.to_path_buf(),
        source,
    })?;
    debug!(dir = %dir.display(), "created key directory");
    Ok(())
}

fn load_keypair(paths: &KeyPaths) -> SshResult<Keypair> {
    let private = fs::read(&paths.private).map_err(|source| SshCoreError::KeyDirectory {
        path: paths.private.clone(),
        source,
    })?;
    let public = fs::read(&paths.public)
        .map_err(|err| SshCoreError::corrupted(&paths.public, format!("public key unreadable ({err})")))?;

    let private_key = parse_private_key(&private).map_err(|err| SshCoreError::corrupted(&paths.private, err.to_string()))?;
    let public_line = std::str::from_utf8(&public)
        .map_err(|_| SshCoreError::corrupted(&paths.public, "public key is not valid UTF-8"))?;
    let public_key = PublicKey::from_openssh(public_line.trim())
        .map_err(|err| SshCoreError::corrupted(&paths.public, format!("public key unparsable ({err})")))?;
    if public_key.key_data() != private_key.public_key().key_data() {
        return Err(SshCoreError::corrupted(
            &paths.public,
            "public key does not belong to the private key",
        ));
    }

    debug!(path = %paths.private.display(), "loaded existing SSH keypair");
    Ok(Keypair { public, private })
}

fn persist_keypair(paths: &KeyPaths, keypair: &Keypair) -> SshResult<()> {
    write_owner_only(&paths.private, &keypair.private)?;
    if let Err(err) = write_owner_only(&paths.public, &keypair.public) {
        // A lone private key would read as a corrupted pair on the next run.
        if let Err(cleanup) = fs::remove_file(&paths.private) {
            warn!(path = %paths.private.display(), error = %cleanup, "failed to remove orphaned private key");
        }
        return Err(err);
    }
    Ok(())
}

fn write_owner_only(path: &Path, data: &[u8]) -> SshResult<()> {
    let mut options = OpenOptions::new();
    options.create_new(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o400);
    }
    let mut file = options.open(path).map_err(|source| SshCoreError::KeyDirectory {
        path: path.to_path_buf(),
        source,
    })?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}
