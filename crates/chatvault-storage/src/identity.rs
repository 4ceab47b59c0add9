//! Actor namespace resolution.
//!
//! The [`IdentityResolver`] derives the [`Namespace`] that partitions
//! the current actor's records. With a credential token present the
//! namespace comes from the token's subject claim; without one it comes
//! from a long-lived anonymous identifier kept in the secondary store.
//!
//! The token payload is decoded without signature verification. The
//! namespace is a partitioning key, not an authorization decision.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chatvault_types::{Namespace, Result, Timestamp, VaultError, ANONYMOUS_PREFIX};
use rand::Rng;

use crate::backend::{purge_prefix, PrimaryStore, SecondaryStore};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Un-namespaced primary-store key holding the credential token.
pub const TOKEN_KEY: &str = "auth_token";

/// Secondary-store record holding the anonymous identifier.
pub const ANONYMOUS_COOKIE: &str = "anonymous_id";

/// Claims checked, in order, for the subject identifier.
const SUBJECT_CLAIMS: [&str; 4] = ["sub", "user_id", "userId", "id"];

/// Characters of a non-decodable token used for its fallback namespace.
const TOKEN_PREFIX_LEN: usize = 20;

/// Length of the random suffix of an anonymous identifier.
const ANONYMOUS_SUFFIX_LEN: usize = 9;

const ANONYMOUS_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

// ---------------------------------------------------------------------------
// IdentityResolver
// ---------------------------------------------------------------------------

/// Derives the current actor's [`Namespace`] on demand.
///
/// Holds no namespace state: every call to [`resolve`](Self::resolve)
/// reads the token and cookie afresh.
#[derive(Clone)]
pub struct IdentityResolver {
    primary: Arc<dyn PrimaryStore>,
    secondary: Arc<dyn SecondaryStore>,
    anonymous_expiry_days: u64,
}

impl IdentityResolver {
    /// Creates a resolver over the two tiers.
    pub fn new(
        primary: Arc<dyn PrimaryStore>,
        secondary: Arc<dyn SecondaryStore>,
        anonymous_expiry_days: u64,
    ) -> Self {
        Self {
            primary,
            secondary,
            anonymous_expiry_days,
        }
    }

    /// Returns the namespace of the current actor.
    ///
    /// Never fails. Backend errors while reading the token degrade to the
    /// anonymous path; a failure to persist a freshly generated anonymous
    /// id is logged and the id is used for this call only.
    pub fn resolve(&self) -> Namespace {
        match self.token() {
            Some(token) => namespace_from_token(&token),
            None => self.anonymous_namespace(),
        }
    }

    /// Returns the stored credential token, if any.
    pub fn token(&self) -> Option<String> {
        match self.primary.get(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                tracing::warn!(%e, "failed to read credential token, resolving as anonymous");
                None
            }
        }
    }

    /// Stores `token` after discarding all anonymous data.
    ///
    /// Anonymous scratch data is never migrated into the authenticated
    /// partition.
    pub fn login(&self, token: &str) -> Result<()> {
        if token.is_empty() {
            return Err(VaultError::IdentityError {
                reason: "credential token must not be empty".into(),
            });
        }
        self.clear_anonymous()?;
        self.primary.set(TOKEN_KEY, token)
    }

    /// Forgets the credential token.
    pub fn logout(&self) -> Result<()> {
        self.primary.remove(TOKEN_KEY)?;
        Ok(())
    }

    /// Expires the anonymous identifier and deletes every record kept
    /// under an anonymous namespace, in both tiers.
    ///
    /// Returns the number of records removed.
    pub fn clear_anonymous(&self) -> Result<usize> {
        let expired = self.secondary.remove(ANONYMOUS_COOKIE)?;
        let prefix = format!("{ANONYMOUS_PREFIX}_");
        let removed = purge_prefix(self.primary.as_ref(), self.secondary.as_ref(), &prefix)?;
        tracing::info!(removed, cookie_expired = expired, "cleared anonymous data");
        Ok(removed)
    }

    fn anonymous_namespace(&self) -> Namespace {
        match self.secondary.get(ANONYMOUS_COOKIE) {
            Ok(Some(id)) if !id.is_empty() => return Namespace::anonymous(&id),
            Ok(_) => {}
            Err(e) => tracing::warn!(%e, "failed to read anonymous id cookie"),
        }

        let id = generate_anonymous_id(&Timestamp::now());
        let expires = Timestamp::now().plus_days(self.anonymous_expiry_days);
        if let Err(e) = self.secondary.set(ANONYMOUS_COOKIE, &id, Some(&expires)) {
            tracing::warn!(%e, "failed to persist anonymous id, namespace will not survive reload");
        }
        tracing::debug!(%id, "generated anonymous id");
        Namespace::anonymous(&id)
    }
}

// ---------------------------------------------------------------------------
// Token decoding
// ---------------------------------------------------------------------------

/// Maps a credential token to a namespace.
///
/// Tokens whose payload cannot be decoded still partition consistently
/// under `user_<first 20 chars>`.
pub fn namespace_from_token(token: &str) -> Namespace {
    match decode_subject(token) {
        Ok(subject) => Namespace::user(&subject),
        Err(e) => {
            tracing::debug!(%e, "token payload not decodable, using raw prefix");
            let prefix: String = token.chars().take(TOKEN_PREFIX_LEN).collect();
            Namespace::user(&prefix)
        }
    }
}

/// Extracts the subject identifier from a JWT-shaped token.
///
/// Decodes the second `.`-separated segment as base64url JSON and
/// returns the first non-empty claim of `sub`, `user_id`, `userId`,
/// `id`. String and integer claims are accepted.
pub fn decode_subject(token: &str) -> Result<String> {
    let segment = token
        .split('.')
        .nth(1)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| VaultError::IdentityError {
            reason: "token has no payload segment".into(),
        })?;

    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| VaultError::IdentityError {
            reason: format!("token payload is not base64url: {e}"),
        })?;

    let claims: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| VaultError::IdentityError {
            reason: format!("token payload is not JSON: {e}"),
        })?;

    SUBJECT_CLAIMS
        .iter()
        .find_map(|claim| match claims.get(claim) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| VaultError::IdentityError {
            reason: "token payload has no subject claim".into(),
        })
}

/// Generates `<unix millis>_<9 lowercase alphanumerics>`.
pub fn generate_anonymous_id(now: &Timestamp) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ANONYMOUS_SUFFIX_LEN)
        .map(|_| ANONYMOUS_ALPHABET[rng.gen_range(0..ANONYMOUS_ALPHABET.len())] as char)
        .collect();
    format!("{}_{suffix}", now.as_millis())
}
