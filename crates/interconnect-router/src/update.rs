//! Composable router configuration updates
//!
//! Every component that contributes to the router configuration implements
//! [`ConfigUpdate`]. The controller applies an ordered [`ConfigUpdates`] list
//! to one snapshot and persists it only if something changed.

use crate::config::RouterConfig;

/// A contribution to a router configuration
pub trait ConfigUpdate {
    /// Apply this contribution, returning true if the config changed
    fn apply(&mut self, config: &mut RouterConfig) -> bool;
}

impl<F> ConfigUpdate for F
where
    F: FnMut(&mut RouterConfig) -> bool,
{
    fn apply(&mut self, config: &mut RouterConfig) -> bool {
        self(config)
    }
}

/// Updates applied in order to the same snapshot
#[derive(Default)]
pub struct ConfigUpdates<'a> {
    updates: Vec<&'a mut dyn ConfigUpdate>,
}

impl<'a> ConfigUpdates<'a> {
    /// An empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an update
    pub fn push(mut self, update: &'a mut dyn ConfigUpdate) -> Self {
        self.updates.push(update);
        self
    }

    /// Number of updates
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// True if there are no updates
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

impl ConfigUpdate for ConfigUpdates<'_> {
    /// Every member is applied, even after one reports a change
    fn apply(&mut self, config: &mut RouterConfig) -> bool {
        let mut changed = false;
        for update in self.updates.iter_mut() {
            if update.apply(config) {
                changed = true;
            }
        }
        changed
    }
}
