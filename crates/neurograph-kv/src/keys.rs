//! Key namespace layout.
//!
//! Keys are printable ASCII under fixed prefixes. Branch-scoped keys are
//! rooted at `branches/<name>/…` for every branch except `main`, which owns
//! the root namespace. Locks are global per store and never branch-prefixed.

use neurograph_core::TimestampMillis;
use uuid::Uuid;

pub const NOUNS: &str = "nouns/";
pub const VERBS: &str = "verbs/";
pub const METADATA: &str = "metadata/";
pub const NOUN_METADATA: &str = "nounMetadata/";
pub const VERB_METADATA: &str = "verbMetadata/";
pub const SYSTEM: &str = "_system/";
pub const STATS: &str = "_system/stats/";
pub const CHANGELOG: &str = "_system/changelog/";
pub const LOCKS: &str = "_system/locks/";
pub const MINDEX: &str = "_system/mindex/";
pub const ID_MAP: &str = "_system/idmap";
pub const HNSW_ENTRYPOINT: &str = "_system/hnsw-entrypoint";
pub const VERSIONS: &str = "_version/";
pub const VERSION_BLOBS: &str = "_version_blob/";
pub const BRANCHES: &str = "branches/";
/// Pre-migration statistics location, read once on cold start.
pub const LEGACY_STATS: &str = "_index/statistics";

pub const MAIN_BRANCH: &str = "main";

pub fn noun(id: Uuid) -> String {
    format!("{NOUNS}{id}")
}

pub fn verb(id: Uuid) -> String {
    format!("{VERBS}{id}")
}

pub fn metadata(id: Uuid) -> String {
    format!("{METADATA}{id}")
}

pub fn noun_metadata(id: Uuid) -> String {
    format!("{NOUN_METADATA}{id}")
}

pub fn verb_metadata(id: Uuid) -> String {
    format!("{VERB_METADATA}{id}")
}

pub fn stats(date: &str) -> String {
    format!("{STATS}{date}")
}

/// Change-log keys zero-pad the timestamp so lexicographic key order is
/// chronological order.
pub fn changelog(ts: TimestampMillis, rand: u32) -> String {
    format!("{CHANGELOG}{ts:013}_{rand:08x}")
}

pub fn changelog_cursor(ts: TimestampMillis) -> String {
    format!("{CHANGELOG}{ts:013}")
}

pub fn lock(name: &str) -> String {
    format!("{LOCKS}{name}")
}

pub fn mindex_chunk(field: &str, chunk_ix: u32) -> String {
    format!("{MINDEX}{field}/{chunk_ix}")
}

pub fn version(entity_id: Uuid, n: u32, branch: &str) -> String {
    format!("{VERSIONS}{entity_id}/{n}/{branch}")
}

pub fn version_prefix(entity_id: Uuid) -> String {
    format!("{VERSIONS}{entity_id}/")
}

pub fn version_blob(hash: &str) -> String {
    format!("{VERSION_BLOBS}{hash}")
}

pub fn branch_record(name: &str) -> String {
    format!("{BRANCHES}{name}")
}

/// Scopes `key` to `branch`. `main` owns the root namespace; locks stay
/// global regardless of branch.
pub fn scoped(branch: &str, key: &str) -> String {
    if branch == MAIN_BRANCH || key.starts_with(LOCKS) {
        key.to_string()
    } else {
        format!("{BRANCHES}{branch}/{key}")
    }
}

/// Strips a branch scope back off a listed key.
pub fn unscoped<'a>(branch: &str, key: &'a str) -> &'a str {
    if branch == MAIN_BRANCH {
        return key;
    }
    let prefix = format!("{BRANCHES}{branch}/");
    key.strip_prefix(prefix.as_str()).unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changelog_keys_sort_chronologically() {
        let a = changelog(999, 0xff);
        let b = changelog(1_700_000_000_000, 0);
        assert!(a < b);
    }

    #[test]
    fn main_branch_is_unscoped() {
        assert_eq!(scoped("main", "nouns/x"), "nouns/x");
        assert_eq!(scoped("feature", "nouns/x"), "branches/feature/nouns/x");
        assert_eq!(unscoped("feature", "branches/feature/nouns/x"), "nouns/x");
    }

    #[test]
    fn locks_are_never_branch_scoped() {
        assert_eq!(scoped("feature", "_system/locks/stats"), "_system/locks/stats");
    }
}
