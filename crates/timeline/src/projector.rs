use std::collections::HashSet;

use tracing::debug;

use crate::{
    apply_event, Clock, Direction, EventId, EventStore, Result, Stepper, TimelineError, Uri,
    Worktree,
};

/// One event of a seek plan and the projector index once it is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekStep {
    pub index: usize,
    pub event_id: EventId,
    pub index_after: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeekPlan {
    pub steps: Vec<SeekStep>,
    pub direction: Direction,
}

impl SeekPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Keeps a [`Worktree`] in step with a position in an [`EventStore`].
///
/// `event_index` is the last applied event; `None` means nothing applied.
pub struct WorkspaceProjector {
    worktree: Worktree,
    event_index: Option<usize>,
    stepper: Box<dyn Stepper>,
    dirty: Option<HashSet<Uri>>,
}

impl WorkspaceProjector {
    pub fn new(stepper: impl Stepper + 'static) -> Self {
        Self::with_worktree(Worktree::new(), stepper)
    }

    /// Starts from a seeded worktree, e.g. the files present before recording.
    pub fn with_worktree(worktree: Worktree, stepper: impl Stepper + 'static) -> Self {
        Self {
            worktree,
            event_index: None,
            stepper: Box::new(stepper),
            dirty: None,
        }
    }

    pub fn worktree(&self) -> &Worktree {
        &self.worktree
    }

    pub fn event_index(&self) -> Option<usize> {
        self.event_index
    }

    /// Starts collecting the resources touched by applied steps.
    pub fn track_dirty(&mut self) {
        self.dirty.get_or_insert_with(HashSet::new);
    }

    pub fn take_dirty(&mut self) -> HashSet<Uri> {
        self.dirty.as_mut().map(std::mem::take).unwrap_or_default()
    }

    /// Steps needed to land on the last event whose clock is `<= clock`.
    pub fn compute_seek_plan(&self, store: &EventStore, clock: Clock) -> SeekPlan {
        self.plan_to_index(store, store.index_before_clock(clock))
    }

    pub fn plan_to_index(&self, store: &EventStore, target: Option<usize>) -> SeekPlan {
        let from = boundary(self.event_index);
        let to = boundary(target);
        let direction = if to < from {
            Direction::Backward
        } else {
            Direction::Forward
        };
        let steps = store
            .collect_range(from, to)
            .into_iter()
            .map(|(index, entry)| SeekStep {
                index,
                event_id: entry.id,
                index_after: match direction {
                    Direction::Forward => Some(index),
                    Direction::Backward => index.checked_sub(1),
                },
            })
            .collect();
        SeekPlan { steps, direction }
    }

    pub fn apply_step(&mut self, store: &EventStore, step: &SeekStep, dir: Direction) -> Result<()> {
        let entry = store
            .get(step.event_id)
            .ok_or(TimelineError::EventNotFound(step.event_id))?;
        let outcome = apply_event(self.stepper.as_mut(), &mut self.worktree, entry, dir)?;
        if let Some(dirty) = self.dirty.as_mut() {
            dirty.extend(outcome.touched);
        }
        self.event_index = step.index_after;
        Ok(())
    }

    /// Applies every step in order. A plan always runs to completion or to
    /// its first error; it is never reordered.
    pub fn apply_plan(&mut self, store: &EventStore, plan: &SeekPlan) -> Result<()> {
        for step in &plan.steps {
            self.apply_step(store, step, plan.direction)?;
        }
        Ok(())
    }

    pub fn seek(&mut self, store: &EventStore, clock: Clock) -> Result<usize> {
        let plan = self.compute_seek_plan(store, clock);
        if !plan.is_empty() {
            debug!(
                clock,
                steps = plan.steps.len(),
                direction = ?plan.direction,
                "projector seek"
            );
        }
        self.apply_plan(store, &plan)?;
        Ok(plan.steps.len())
    }

    pub fn seek_to_index(&mut self, store: &EventStore, target: Option<usize>) -> Result<()> {
        let plan = self.plan_to_index(store, target);
        self.apply_plan(store, &plan)
    }

    /// Applies the event at `index`, which must directly follow the current one.
    pub fn apply_next(&mut self, store: &EventStore, index: usize) -> Result<()> {
        if boundary(self.event_index) != index {
            return Err(TimelineError::InvalidOp(format!(
                "event {index} does not follow projector index {:?}",
                self.event_index
            )));
        }
        let entry = store.at(index).ok_or(TimelineError::IndexOutOfBounds {
            index,
            len: store.len(),
        })?;
        let step = SeekStep {
            index,
            event_id: entry.id,
            index_after: Some(index),
        };
        self.apply_step(store, &step, Direction::Forward)
    }
}

/// Number of events applied when the last applied event is `index`.
fn boundary(index: Option<usize>) -> usize {
    index.map_or(0, |i| i + 1)
}
