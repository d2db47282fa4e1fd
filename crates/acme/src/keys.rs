//! Key naming shared by every replica using one backend
//!
//! These names are an interoperability contract: replicas only see each
//! other's records if they derive exactly the same keys.
//!
//! | record | key |
//! |---|---|
//! | challenge token | `{domain}_{token}` |
//! | challenge leadership | `http_challenge_main` |
//! | account | `{resolver}_account` |
//! | certificates | `{resolver}_certificates` |
//!
//! Each record's lock lives at the record key plus `_lock`.

/// Singleton key holding the current challenge leader's identity
pub const CHALLENGE_MAIN_KEY: &str = "http_challenge_main";

/// Suffix appended to a record key to name its lock
pub const LOCK_SUFFIX: &str = "_lock";

/// Lock key guarding `key`
pub fn lock_key(key: &str) -> String {
    format!("{key}{LOCK_SUFFIX}")
}

/// Key holding the key authorization for one challenge
pub fn token_key(domain: &str, token: &str) -> String {
    format!("{domain}_{token}")
}

/// Key holding a resolver's ACME account
pub fn account_key(resolver: &str) -> String {
    format!("{resolver}_account")
}

/// Key holding a resolver's certificate list
pub fn certificates_key(resolver: &str) -> String {
    format!("{resolver}_certificates")
}
