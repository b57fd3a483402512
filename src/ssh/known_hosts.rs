//! Host key verification against configured `known_hosts` entries.
//!
//! Entries come from configuration text blocks rather than a file on disk.
//! Each block may hold several newline-separated lines in the usual
//! `[@marker] host-patterns key-type base64-key [comment]` layout.
//!
//! SECURITY: a verifier with no entries accepts every host key. This keeps
//! the connector usable without any host key configuration, at the cost of
//! no protection against a man-in-the-middle. Configure `known_hosts` to
//! turn verification on.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ring::hmac;
use russh::keys::{PublicKey, PublicKeyBase64};

use super::error::SshError;

/// Host key algorithms a `known_hosts` line can name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostKeyType {
    Rsa,
    Dss,
    EcdsaP256,
    EcdsaP384,
    EcdsaP521,
    Ed25519,
    SkEd25519,
    SkEcdsaP256,
}

impl HostKeyType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "ssh-rsa" => Some(HostKeyType::Rsa),
            "ssh-dss" => Some(HostKeyType::Dss),
            "ecdsa-sha2-nistp256" => Some(HostKeyType::EcdsaP256),
            "ecdsa-sha2-nistp384" => Some(HostKeyType::EcdsaP384),
            "ecdsa-sha2-nistp521" => Some(HostKeyType::EcdsaP521),
            "ssh-ed25519" => Some(HostKeyType::Ed25519),
            "sk-ssh-ed25519@openssh.com" => Some(HostKeyType::SkEd25519),
            "sk-ecdsa-sha2-nistp256@openssh.com" => Some(HostKeyType::SkEcdsaP256),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            HostKeyType::Rsa => "ssh-rsa",
            HostKeyType::Dss => "ssh-dss",
            HostKeyType::EcdsaP256 => "ecdsa-sha2-nistp256",
            HostKeyType::EcdsaP384 => "ecdsa-sha2-nistp384",
            HostKeyType::EcdsaP521 => "ecdsa-sha2-nistp521",
            HostKeyType::Ed25519 => "ssh-ed25519",
            HostKeyType::SkEd25519 => "sk-ssh-ed25519@openssh.com",
            HostKeyType::SkEcdsaP256 => "sk-ecdsa-sha2-nistp256@openssh.com",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Marker {
    Revoked,
    CertAuthority,
}

/// One host pattern, e.g. `*.example.com`, `!bastion.example.com` or `[git.example.com]:2222`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostPattern {
    pattern: String,
    negated: bool,
}

impl HostPattern {
    fn parse(raw: &str) -> Self {
        match raw.strip_prefix('!') {
            Some(rest) => Self {
                pattern: rest.to_lowercase(),
                negated: true,
            },
            None => Self {
                pattern: raw.to_lowercase(),
                negated: false,
            },
        }
    }

    fn matches(&self, target: &str) -> bool {
        wildcard_match(self.pattern.as_bytes(), target.as_bytes())
    }
}

#[derive(Clone, Debug)]
enum HostPatterns {
    List(Vec<HostPattern>),
    /// `|1|salt|hash`: HMAC-SHA1 of the host name keyed with the salt.
    Hashed { salt: Vec<u8>, hash: Vec<u8> },
}

impl HostPatterns {
    fn parse(field: &str) -> Result<Self, String> {
        if let Some(hashed) = field.strip_prefix('|') {
            let (salt, hash) = hashed
                .strip_prefix("1|")
                .and_then(|rest| rest.split_once('|'))
                .ok_or_else(|| format!("unsupported hashed host name '{}'", field))?;
            let salt = BASE64
                .decode(salt)
                .map_err(|e| format!("invalid hashed host salt: {}", e))?;
            let hash = BASE64
                .decode(hash)
                .map_err(|e| format!("invalid hashed host hash: {}", e))?;
            return Ok(HostPatterns::Hashed { salt, hash });
        }
        Ok(HostPatterns::List(
            field.split(',').filter(|p| !p.is_empty()).map(HostPattern::parse).collect(),
        ))
    }

    /// OpenSSH rules: any positive pattern matches and no negated one does.
    fn applies_to(&self, target: &str) -> bool {
        match self {
            HostPatterns::Hashed { salt, hash } => {
                let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, salt);
                hmac::verify(&key, target.as_bytes(), hash).is_ok()
            }
            HostPatterns::List(patterns) => {
                let mut matched = false;
                for pattern in patterns {
                    if pattern.matches(target) {
                        if pattern.negated {
                            return false;
                        }
                        matched = true;
                    }
                }
                matched
            }
        }
    }
}

#[derive(Clone, Debug)]
struct KnownHostEntry {
    marker: Option<Marker>,
    hosts: HostPatterns,
    key_type: Option<HostKeyType>,
    key_blob: Vec<u8>,
}

impl KnownHostEntry {
    fn parse(line: &str) -> Result<Self, String> {
        let mut fields = line.split_whitespace().peekable();

        let marker = match fields.peek().copied() {
            Some("@revoked") => Some(Marker::Revoked),
            Some("@cert-authority") => Some(Marker::CertAuthority),
            Some(other) if other.starts_with('@') => {
                return Err(format!("unknown marker '{}'", other));
            }
            _ => None,
        };
        if marker.is_some() {
            fields.next();
        }

        let (hosts, key_tag, key_b64) = match (fields.next(), fields.next(), fields.next()) {
            (Some(h), Some(t), Some(k)) => (h, t, k),
            _ => return Err("expected 'host-patterns key-type base64-key'".to_string()),
        };

        let key_blob = BASE64
            .decode(key_b64)
            .map_err(|e| format!("invalid base64 key: {}", e))?;

        // The blob starts with its own algorithm name; it has to agree with the key-type field.
        if let Some(embedded) = blob_algorithm(&key_blob) {
            if embedded != key_tag.as_bytes() {
                return Err(format!(
                    "key type '{}' does not match key data ({})",
                    key_tag,
                    String::from_utf8_lossy(embedded)
                ));
            }
        } else {
            return Err("truncated key data".to_string());
        }

        Ok(Self {
            marker,
            hosts: HostPatterns::parse(hosts)?,
            key_type: HostKeyType::from_tag(key_tag),
            key_blob,
        })
    }

    fn applies_to(&self, key_type: HostKeyType, target: &str) -> bool {
        self.key_type == Some(key_type) && self.hosts.applies_to(target)
    }

    fn verify(&self, key_blob: &[u8]) -> bool {
        self.key_blob == key_blob
    }
}

/// Trust store built from `known_hosts` text blocks.
#[derive(Clone, Debug, Default)]
pub struct KnownHostsVerifier {
    entries: Vec<KnownHostEntry>,
}

impl KnownHostsVerifier {
    /// Parse every block. Comments and blank lines are skipped; any malformed
    /// line fails the whole configuration.
    pub fn parse<S: AsRef<str>>(blocks: &[S]) -> Result<Self, SshError> {
        let mut entries = Vec::new();

        for block in blocks {
            for line in block.as_ref().lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let entry = KnownHostEntry::parse(line).map_err(|e| {
                    SshError::Configuration(format!(
                        "Error parsing known hosts entry {}: {}",
                        line, e
                    ))
                })?;
                entries.push(entry);
            }
        }

        if entries.is_empty() {
            log::warn!("No known hosts configured, every host key will be accepted");
        } else {
            log::debug!("Loaded {} known host entries", entries.len());
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check a presented server key.
    pub fn verify(&self, hostname: &str, port: u16, key: &PublicKey) -> bool {
        self.verify_tagged(hostname, port, key.algorithm().as_str(), &key.public_key_bytes())
    }

    /// Check a presented key given as its algorithm name and wire-format blob.
    /// Unrecognised algorithms are rejected unless the store is empty.
    pub fn verify_tagged(&self, hostname: &str, port: u16, algorithm: &str, key_blob: &[u8]) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        match HostKeyType::from_tag(algorithm) {
            Some(key_type) => self.verify_blob(hostname, port, key_type, key_blob),
            None => {
                log::warn!("Rejecting host key of unsupported type {}", algorithm);
                false
            }
        }
    }

    /// Check a presented key given as its type and SSH wire-format blob.
    pub fn verify_blob(&self, hostname: &str, port: u16, key_type: HostKeyType, key_blob: &[u8]) -> bool {
        if self.entries.is_empty() {
            return true;
        }

        let names = lookup_names(hostname, port);
        let covers = |e: &KnownHostEntry| {
            names.iter().any(|name| e.applies_to(key_type, name)) && e.verify(key_blob)
        };

        if self.entries.iter().any(|e| e.marker == Some(Marker::Revoked) && covers(e)) {
            log::warn!("Host key for {} ({}) is marked as revoked", names[0], key_type.tag());
            return false;
        }

        let trusted = self.entries.iter().filter(|e| e.marker.is_none()).any(covers);

        if trusted {
            log::debug!("Host key verified for {} (type: {})", names[0], key_type.tag());
        } else {
            log::warn!("No known hosts entry accepts the {} key of {}", key_type.tag(), names[0]);
        }
        trusted
    }
}

/// Names an entry may match, most specific first: `[host]:port` then the
/// bare host off port 22, only the bare host on it.
fn lookup_names(hostname: &str, port: u16) -> Vec<String> {
    let host = hostname.to_lowercase();
    if port == super::DEFAULT_PORT {
        vec![host]
    } else {
        vec![format!("[{}]:{}", host, port), host]
    }
}

/// Algorithm name at the front of an SSH public key blob.
fn blob_algorithm(blob: &[u8]) -> Option<&[u8]> {
    let len_bytes: [u8; 4] = blob.get(..4)?.try_into().ok()?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    blob.get(4..4 + len)
}

/// Glob match supporting `*` and `?` only; `[` stays literal for `[host]:port`.
fn wildcard_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = backtrack {
            p = star_p + 1;
            t = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}
