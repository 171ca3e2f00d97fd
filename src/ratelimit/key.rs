//! Rate limit key derivation.

/// Prefix for keys holding attempt windows.
pub const ATTEMPTS_PREFIX: &str = "auth_attempts";
/// Prefix for keys holding the lock that guards an attempt window.
pub const LOCK_PREFIX: &str = "auth_lock";

/// A key that identifies the failed-attempt window for one subject in one world.
///
/// Both parts are lower-cased, so `MyWorld.eth`/`0xABC` and
/// `myworld.eth`/`0xabc` share a single counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Optional namespace shared by every key of this deployment
    pub namespace: Option<String>,
    /// The normalized world name
    pub world: String,
    /// The normalized subject (IP address, wallet address, ...)
    pub subject: String,
}

impl RateLimitKey {
    /// Create a new key from a world name and subject.
    pub fn new(world: &str, subject: &str) -> Self {
        Self {
            namespace: None,
            world: world.to_lowercase(),
            subject: subject.to_lowercase(),
        }
    }

    /// Scope the key under a deployment namespace.
    pub fn with_namespace(mut self, namespace: Option<&str>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.is_empty()).map(str::to_string);
        self
    }

    /// Cache key holding the attempt window.
    pub fn attempts_key(&self) -> String {
        self.prefixed(ATTEMPTS_PREFIX)
    }

    /// Cache key holding the lock for the attempt window.
    pub fn lock_key(&self) -> String {
        self.prefixed(LOCK_PREFIX)
    }

    fn prefixed(&self, prefix: &str) -> String {
        // The subject is last, so escaping the world alone keeps the split unambiguous.
        let body = format!("{}:{}:{}", prefix, escape_component(&self.world), self.subject);
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, body),
            None => body,
        }
    }
}

fn escape_component(value: &str) -> String {
    if !value.contains(['%', ':']) {
        return value.to_string();
    }
    value.replace('%', "%25").replace(':', "%3a")
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.world, self.subject)
    }
}
