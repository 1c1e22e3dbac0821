//! Credential loading for the two APNs authentication schemes.
//!
//! Keystore parsing is left to the TLS backend and PEM parsing to
//! `jsonwebtoken`; this module only reads the files, checks that the
//! material is usable, and keeps it immutable for the client's lifetime.

use std::fmt;
use std::fs;
use std::path::Path;

use jsonwebtoken::{Algorithm, EncodingKey};
use reqwest::Identity;
use tracing::{error, info};

use crate::config::AuthConfig;
use crate::error::{ApnsError, Result};

/// PKCS#12 client identity presented during the TLS handshake
#[derive(Clone)]
pub struct ClientIdentity {
    der: Vec<u8>,
    passphrase: String,
}

impl ClientIdentity {
    pub fn from_pkcs12_der(der: Vec<u8>, passphrase: impl Into<String>) -> Result<Self> {
        let identity = Self {
            der,
            passphrase: passphrase.into(),
        };
        identity.to_identity()?;
        Ok(identity)
    }

    /// Materialize a fresh `reqwest::Identity` for a client builder.
    pub fn to_identity(&self) -> Result<Identity> {
        Identity::from_pkcs12_der(&self.der, &self.passphrase)
            .map_err(|e| ApnsError::Credential(format!("failed to load PKCS#12 keystore: {e}")))
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("der_len", &self.der.len())
            .finish_non_exhaustive()
    }
}

/// Key material for ES256 provider tokens
#[derive(Clone)]
pub struct SigningCredential {
    key_id: String,
    team_id: String,
    key: EncodingKey,
}

impl SigningCredential {
    /// Parse a PKCS#8 PEM (`.p8`) private key.
    pub fn from_pem(
        key_id: impl Into<String>,
        team_id: impl Into<String>,
        pem: &[u8],
    ) -> Result<Self> {
        let key = EncodingKey::from_ec_pem(pem)
            .map_err(|e| ApnsError::Credential(format!("failed to parse private key: {e}")))?;

        // from_ec_pem only checks the PEM framing; a trial signature proves the key is usable
        jsonwebtoken::crypto::sign(b"nova-apns-key-check", &key, Algorithm::ES256)
            .map_err(|e| ApnsError::Credential(format!("private key cannot sign ES256: {e}")))?;

        Ok(Self {
            key_id: key_id.into(),
            team_id: team_id.into(),
            key,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.key
    }
}

impl fmt::Debug for SigningCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredential")
            .field("key_id", &self.key_id)
            .field("team_id", &self.team_id)
            .finish_non_exhaustive()
    }
}

/// The single active credential of a client
#[derive(Debug, Clone)]
pub enum Credential {
    Certificate(ClientIdentity),
    Token(SigningCredential),
}

/// Read-only holder of the client's credential
#[derive(Debug, Clone)]
pub struct CredentialProvider {
    credential: Credential,
}

impl CredentialProvider {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }

    /// Load the credential described by `auth` from disk.
    pub fn load(auth: &AuthConfig) -> Result<Self> {
        let credential = match auth {
            AuthConfig::Certificate { path, passphrase } => {
                let der = read_file(path, "certificate")?;
                let identity = ClientIdentity::from_pkcs12_der(der, passphrase.clone())
                    .map_err(|e| {
                        error!("Failed to load APNs certificate {}: {}", path.display(), e);
                        e
                    })?;
                info!("Loaded APNs client certificate from {}", path.display());
                Credential::Certificate(identity)
            }
            AuthConfig::Token {
                key_path,
                key_id,
                team_id,
            } => {
                let pem = read_file(key_path, "signing key")?;
                let signing = SigningCredential::from_pem(key_id.clone(), team_id.clone(), &pem)
                    .map_err(|e| {
                        error!("Failed to load APNs signing key {}: {}", key_path.display(), e);
                        e
                    })?;
                info!(key_id = %key_id, team_id = %team_id, "Loaded APNs signing key");
                Credential::Token(signing)
            }
        };

        Ok(Self { credential })
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn client_identity(&self) -> Option<&ClientIdentity> {
        match &self.credential {
            Credential::Certificate(identity) => Some(identity),
            Credential::Token(_) => None,
        }
    }

    pub fn signing_credential(&self) -> Option<&SigningCredential> {
        match &self.credential {
            Credential::Token(signing) => Some(signing),
            Credential::Certificate(_) => None,
        }
    }

    pub fn uses_token_auth(&self) -> bool {
        matches!(self.credential, Credential::Token(_))
    }
}

fn read_file(path: &Path, what: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        ApnsError::Credential(format!("failed to open {what} file {}: {e}", path.display()))
    })
}
