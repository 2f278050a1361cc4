//! FILENAME: engine/src/scheduler.rs
//! PURPOSE: Drives re-evaluation while asynchronous cells are outstanding.
//! CONTEXT: Armed automatically whenever a dispatch leaves the loading-cell
//! counter nonzero. The kernel owns no timer; the host polls `Model::tick` at
//! whatever interval it likes. Each tick compares the world against the last
//! check and, when a pending cell can make progress, folds the resolution
//! back into the command protocol as `EVALUATE_CELLS { onlyWaiting: true }`.
//! Intentionally simple and lossy-tolerant: a resolved-but-unpolled cell
//! merely delays display by one tick, never corrupts state.

#[derive(Debug, Default)]
pub struct Scheduler {
    armed: bool,
    /// Loading-cell counter observed at the previous tick.
    last_loading: usize,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            armed: false,
            last_loading: 0,
        }
    }

    pub fn arm(&mut self, loading: usize) {
        if !self.armed {
            log::debug!("scheduler armed with {} loading cells", loading);
        }
        self.armed = true;
        self.last_loading = loading;
    }

    pub fn disarm(&mut self) {
        if self.armed {
            log::debug!("scheduler disarmed");
        }
        self.armed = false;
        self.last_loading = 0;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether the counter moved since the previous observation.
    pub fn observe(&mut self, loading: usize) -> bool {
        let changed = loading != self.last_loading;
        self.last_loading = loading;
        changed
    }
}
