// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded buffer of file accesses between maintenance passes.
//!
//! Reads push here instead of taking the node lock. A full queue drops the
//! event: a missed access-time refresh only makes a file look a little colder.

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::FileId;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("access queue full ({capacity} events), dropped access to file {file_id}")]
pub struct QueueFull {
    pub file_id: FileId,
    pub capacity: usize,
}

pub struct AccessEventQueue {
    tx: mpsc::Sender<FileId>,
    rx: Mutex<mpsc::Receiver<FileId>>,
    capacity: usize,
}

impl AccessEventQueue {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    /// Enqueue without blocking.
    pub fn push(&self, file_id: FileId) -> Result<(), QueueFull> {
        match self.tx.try_send(file_id) {
            Ok(()) => Ok(()),
            // The receiver lives as long as self, so Closed cannot happen
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => Err(QueueFull {
                file_id,
                capacity: self.capacity,
            }),
        }
    }

    /// Take everything currently buffered, oldest first.
    pub fn drain(&self) -> Vec<FileId> {
        let mut rx = self.rx.lock();
        let mut drained = Vec::new();
        while let Ok(id) = rx.try_recv() {
            drained.push(id);
        }
        drained
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
