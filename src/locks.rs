// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Which user sessions hold which cached files against eviction.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::{FileId, UserId};

/// Many-to-many file ↔ user lock relation, indexed both ways.
///
/// Empty sets are pruned so `is_locked` is a plain key lookup.
#[derive(Debug, Default)]
pub struct LockTable {
    users_per_file: HashMap<FileId, HashSet<UserId>>,
    files_per_user: HashMap<UserId, HashSet<FileId>>,
}

impl LockTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if `user` already held the lock.
    pub fn lock(&mut self, file: FileId, user: UserId) -> bool {
        let added = self.users_per_file.entry(file).or_default().insert(user);
        self.files_per_user.entry(user).or_default().insert(file);
        added
    }

    /// Returns `false` if `user` did not hold the lock.
    pub fn unlock(&mut self, file: FileId, user: UserId) -> bool {
        let removed = remove_pair(&mut self.users_per_file, file, user);
        remove_pair(&mut self.files_per_user, user, file);
        removed
    }

    #[must_use]
    pub fn is_locked(&self, file: FileId) -> bool {
        self.users_per_file.contains_key(&file)
    }

    /// Drop every lock held by `user`, returning the files it had locked.
    pub fn release_all(&mut self, user: UserId) -> HashSet<FileId> {
        let files = self.files_per_user.remove(&user).unwrap_or_default();
        for &file in &files {
            remove_pair(&mut self.users_per_file, file, user);
        }
        files
    }

    #[must_use]
    pub fn locked_file_count(&self) -> usize {
        self.users_per_file.len()
    }

    #[must_use]
    pub fn holders(&self, file: FileId) -> usize {
        self.users_per_file.get(&file).map_or(0, HashSet::len)
    }
}

fn remove_pair<K: Hash + Eq, V: Hash + Eq>(map: &mut HashMap<K, HashSet<V>>, key: K, value: V) -> bool {
    let Some(set) = map.get_mut(&key) else {
        return false;
    };
    let removed = set.remove(&value);
    if set.is_empty() {
        map.remove(&key);
    }
    removed
}
