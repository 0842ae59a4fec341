use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::ItemSource;

/// In-memory FIFO item source.
///
/// Items may be pushed at any time, including from a task of the pipeline
/// that is draining this source.
#[derive(Debug)]
pub struct MemorySource<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> Default for MemorySource<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> MemorySource<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().collect()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) {
        self.lock().push_back(item);
    }

    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        self.lock().extend(items);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl<T: Send> ItemSource<T> for MemorySource<T> {
    async fn get_item(&self) -> anyhow::Result<Option<T>> {
        Ok(self.lock().pop_front())
    }
}
