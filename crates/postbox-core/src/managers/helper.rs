use tokio::task::JoinHandle;

enum HelperState<K> {
    Idle,
    Waiting {
        key: K,
        generation: u64,
        task: JoinHandle<()>,
    },
}

/// Keeps at most one armed wait for the current head of a schedule.
///
/// A wait is re-armed only when the head key changes or the generation was
/// bumped since it was armed. Dropping the helper cancels the armed wait.
pub struct OperationsHelper<K> {
    state: HelperState<K>,
    generation: u64,
}

impl<K: PartialEq> Default for OperationsHelper<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: PartialEq> OperationsHelper<K> {
    pub fn new() -> Self {
        Self {
            state: HelperState::Idle,
            generation: 0,
        }
    }

    /// Invalidate the armed wait; the next `update` re-arms even for the same key.
    pub fn bump_generation(&mut self) {
        self.generation += 1;
    }

    /// Arm `head` through `arm` unless it is already armed under the current
    /// generation. `None` cancels any armed wait.
    pub fn update<F>(&mut self, head: Option<K>, arm: F)
    where
        F: FnOnce(&K) -> JoinHandle<()>,
    {
        match (&self.state, &head) {
            (HelperState::Idle, None) => return,
            (
                HelperState::Waiting {
                    key, generation, ..
                },
                Some(head),
            ) if key == head && *generation == self.generation => return,
            _ => {}
        }

        self.reset();
        if let Some(key) = head {
            let task = arm(&key);
            self.state = HelperState::Waiting {
                key,
                generation: self.generation,
                task,
            };
        }
    }

    pub fn reset(&mut self) {
        if let HelperState::Waiting { task, .. } = std::mem::replace(&mut self.state, HelperState::Idle) {
            task.abort();
        }
    }

    pub fn armed_key(&self) -> Option<&K> {
        match &self.state {
            HelperState::Idle => None,
            HelperState::Waiting { key, .. } => Some(key),
        }
    }
}

impl<K> Drop for OperationsHelper<K> {
    fn drop(&mut self) {
        if let HelperState::Waiting { task, .. } = &self.state {
            task.abort();
        }
    }
}
