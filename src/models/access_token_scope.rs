//! Access-token scopes and their bitmap encoding.
//!
//! DESIGN
//! ======
//! A scope string is a comma-separated list such as
//! `"read:repository,write:user"`. It is parsed into a `u64` bitmap where each
//! category owns three bits (read, write, delete) and the higher levels carry
//! the lower bits with them: `write:x` includes `read:x`, `delete:x` includes
//! `write:x`. `public` is one extra bit; `all` is the union of every
//! `delete:*` bitmap and does not include `public`.
//!
//! Normalizing walks the canonical order (`public`, then per category
//! delete, write, read) and emits only scopes that add new bits, so the
//! result is free of duplicates and of implied scopes.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ModelError};
use crate::models::perm::AccessMode;

pub const SCOPE_ALL: &str = "all";
pub const SCOPE_PUBLIC_ONLY: &str = "public";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("invalid access token scope: {0}")]
    Invalid(String),
}

impl ModelError for ScopeError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }

    fn error_code(&self) -> &'static str {
        "E_SCOPE_INVALID"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessTokenScopeCategory {
    ActivityPub,
    Admin,
    Misc,
    Notification,
    Organization,
    Package,
    Issue,
    Repository,
    User,
}

impl AccessTokenScopeCategory {
    pub const ALL: [Self; 9] = [
        Self::ActivityPub,
        Self::Admin,
        Self::Misc,
        Self::Notification,
        Self::Organization,
        Self::Package,
        Self::Issue,
        Self::Repository,
        Self::User,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ActivityPub => "activitypub",
            Self::Admin => "admin",
            Self::Misc => "misc",
            Self::Notification => "notification",
            Self::Organization => "organization",
            Self::Package => "package",
            Self::Issue => "issue",
            Self::Repository => "repository",
            Self::User => "user",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    const fn index(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessTokenScopeLevel {
    NoAccess,
    Read,
    Write,
    Delete,
}

impl AccessTokenScopeLevel {
    fn prefix(self) -> Option<&'static str> {
        match self {
            Self::NoAccess => None,
            Self::Read => Some("read"),
            Self::Write => Some("write"),
            Self::Delete => Some("delete"),
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

// =============================================================================
// BITMAP
// =============================================================================

const PUBLIC_ONLY_BITS: u64 = 1;

const fn read_bits(category: u32) -> u64 {
    1 << (1 + category * 3)
}

const fn write_bits(category: u32) -> u64 {
    (1 << (2 + category * 3)) | read_bits(category)
}

const fn delete_bits(category: u32) -> u64 {
    (1 << (3 + category * 3)) | write_bits(category)
}

const fn all_bits() -> u64 {
    let mut bits = 0;
    let mut category = 0;
    while category < 9 {
        bits |= delete_bits(category);
        category += 1;
    }
    bits
}

const ALL_BITS: u64 = all_bits();

/// Every single scope in normalization order. Parents precede children.
const CANONICAL_ORDER: [&str; 28] = [
    "public",
    "delete:activitypub",
    "write:activitypub",
    "read:activitypub",
    "delete:admin",
    "write:admin",
    "read:admin",
    "delete:misc",
    "write:misc",
    "read:misc",
    "delete:notification",
    "write:notification",
    "read:notification",
    "delete:organization",
    "write:organization",
    "read:organization",
    "delete:package",
    "write:package",
    "read:package",
    "delete:issue",
    "write:issue",
    "read:issue",
    "delete:repository",
    "write:repository",
    "read:repository",
    "delete:user",
    "write:user",
    "read:user",
];

const ALL_DELETE_RUN: &str = "delete:activitypub,delete:admin,delete:misc,delete:notification,delete:organization,delete:package,delete:issue,delete:repository,delete:user";

fn single_scope_bits(scope: &str) -> Option<u64> {
    match scope {
        SCOPE_ALL => Some(ALL_BITS),
        SCOPE_PUBLIC_ONLY => Some(PUBLIC_ONLY_BITS),
        _ => {
            let (prefix, name) = scope.split_once(':')?;
            let level = AccessTokenScopeLevel::from_prefix(prefix)?;
            let category = AccessTokenScopeCategory::from_name(name)?.index();
            Some(match level {
                AccessTokenScopeLevel::NoAccess => 0,
                AccessTokenScopeLevel::Read => read_bits(category),
                AccessTokenScopeLevel::Write => write_bits(category),
                AccessTokenScopeLevel::Delete => delete_bits(category),
            })
        }
    }
}

/// Parsed scope set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeBitmap(u64);

impl ScopeBitmap {
    /// Whether every bit of the named single scope is set.
    ///
    /// # Errors
    ///
    /// Returns `ScopeError::Invalid` for an unknown scope name.
    pub fn has_scope(self, scope: &str) -> Result<bool, ScopeError> {
        let expected = single_scope_bits(scope).ok_or_else(|| ScopeError::Invalid(scope.to_owned()))?;
        Ok(self.0 & expected == expected)
    }

    fn contains_bits(self, bits: u64) -> bool {
        self.0 & bits == bits
    }

    /// Rebuild the shortest canonical scope string for this bitmap.
    #[must_use]
    pub fn to_scope(self) -> AccessTokenScope {
        let mut scopes = Vec::new();
        let mut rebuilt = 0_u64;

        for scope in CANONICAL_ORDER {
            let Some(bits) = single_scope_bits(scope) else {
                continue;
            };
            if !self.contains_bits(bits) {
                continue;
            }
            let next = rebuilt | bits;
            if next == rebuilt {
                continue;
            }
            rebuilt = next;
            scopes.push(scope);
        }

        AccessTokenScope(scopes.join(",").replace(ALL_DELETE_RUN, SCOPE_ALL))
    }
}

// =============================================================================
// SCOPE STRING
// =============================================================================

/// A comma-separated scope list as stored on a token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessTokenScope(String);

impl AccessTokenScope {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The single scope for `level` in `category`; `NoAccess` has none.
    #[must_use]
    pub fn for_level(level: AccessTokenScopeLevel, category: AccessTokenScopeCategory) -> Option<Self> {
        level.prefix().map(|prefix| Self(format!("{prefix}:{}", category.as_str())))
    }

    /// Parse into a bitmap. Empty items are skipped; duplicates collapse.
    ///
    /// # Errors
    ///
    /// Returns `ScopeError::Invalid` naming the first unknown item.
    pub fn parse(&self) -> Result<ScopeBitmap, ScopeError> {
        let mut bitmap = 0_u64;
        for item in self.0.split(',') {
            if item.is_empty() {
                continue;
            }
            bitmap |= single_scope_bits(item).ok_or_else(|| ScopeError::Invalid(item.to_owned()))?;
        }
        Ok(ScopeBitmap(bitmap))
    }

    /// Canonical form without duplicates or implied scopes.
    ///
    /// # Errors
    ///
    /// Returns `ScopeError::Invalid` if any item is unknown.
    pub fn normalize(&self) -> Result<Self, ScopeError> {
        Ok(self.parse()?.to_scope())
    }

    /// Whether the token is limited to public resources.
    ///
    /// # Errors
    ///
    /// Returns `ScopeError::Invalid` if any item is unknown.
    pub fn public_only(&self) -> Result<bool, ScopeError> {
        self.parse()?.has_scope(SCOPE_PUBLIC_ONLY)
    }

    /// Whether every one of `scopes` is granted.
    ///
    /// # Errors
    ///
    /// Returns `ScopeError::Invalid` if this scope or a requested scope is
    /// unknown.
    pub fn has_scope(&self, scopes: &[&str]) -> Result<bool, ScopeError> {
        let bitmap = self.parse()?;
        for scope in scopes {
            if !bitmap.has_scope(scope)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether a token holding this scope may hand out `other`: every
    /// permission in `other` is held here, and a public-only restriction
    /// carries over.
    ///
    /// # Errors
    ///
    /// Returns `ScopeError::Invalid` if either scope has an unknown item.
    pub fn covers(&self, other: &AccessTokenScope) -> Result<bool, ScopeError> {
        let held = self.parse()?.0;
        let wanted = other.parse()?.0;
        let permissions = !PUBLIC_ONLY_BITS;
        if wanted & permissions & !held != 0 {
            return Ok(false);
        }
        Ok(held & PUBLIC_ONLY_BITS == 0 || wanted & PUBLIC_ONLY_BITS != 0)
    }

    #[must_use]
    pub fn string_slice(&self) -> Vec<&str> {
        self.0.split(',').collect()
    }
}

impl std::fmt::Display for AccessTokenScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AccessTokenScope {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for AccessTokenScope {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

/// Scopes a request needs at `level` for each of `categories`.
#[must_use]
pub fn required_scopes(level: AccessTokenScopeLevel, categories: &[AccessTokenScopeCategory]) -> Vec<AccessTokenScope> {
    categories
        .iter()
        .filter_map(|category| AccessTokenScope::for_level(level, *category))
        .collect()
}

#[must_use]
pub fn contains_category(categories: &[AccessTokenScopeCategory], category: AccessTokenScopeCategory) -> bool {
    categories.contains(&category)
}

#[must_use]
pub fn scope_level_from_access_mode(mode: AccessMode) -> AccessTokenScopeLevel {
    match mode {
        AccessMode::None => AccessTokenScopeLevel::NoAccess,
        AccessMode::Read => AccessTokenScopeLevel::Read,
        AccessMode::Write => AccessTokenScopeLevel::Write,
        AccessMode::Admin | AccessMode::Owner => AccessTokenScopeLevel::Delete,
    }
}

#[cfg(test)]
#[path = "access_token_scope_test.rs"]
mod tests;
