//! The queues of one run: an incoming queue per stage plus the egress collection.

use crate::core::{FlowRecord, Route, StageId};
use crate::queue::BoundedQueue;

/// Every queue touched by the scheduling loop.
///
/// Kept apart from the wrappers so a wrapper can be borrowed mutably while it
/// writes into the queues of its children.
#[derive(Debug)]
pub struct QueueSet {
    incoming: Vec<BoundedQueue>,
    egress: BoundedQueue,
}

impl QueueSet {
    /// Creates `stages` incoming queues of `capacity` and an unbounded egress queue.
    #[must_use]
    pub fn new(stages: usize, capacity: usize) -> Self {
        Self {
            incoming: (0..stages).map(|_| BoundedQueue::new(capacity)).collect(),
            egress: BoundedQueue::unbounded(),
        }
    }

    /// Returns the incoming queue of `id`, or `None` if the set has no such stage.
    #[must_use]
    pub fn incoming(&self, id: StageId) -> Option<&BoundedQueue> {
        self.incoming.get(id.index())
    }

    pub(crate) fn incoming_mut(&mut self, id: StageId) -> Option<&mut BoundedQueue> {
        self.incoming.get_mut(id.index())
    }

    /// Returns the terminal egress collection.
    #[must_use]
    pub fn egress(&self) -> &BoundedQueue {
        &self.egress
    }

    /// Offers a record to the queue a route points at.
    ///
    /// Only [`Route::Forward`] to a known stage and [`Route::TerminalEgress`]
    /// have a queue; any other route hands the record back.
    pub(crate) fn deliver(&mut self, route: Route, record: FlowRecord) -> Result<(), FlowRecord> {
        match route {
            Route::Forward(target) => match self.incoming_mut(target) {
                Some(queue) => queue.offer(record),
                None => Err(record),
            },
            Route::TerminalEgress => self.egress.offer(record),
            Route::AutoTerminate | Route::Unresolved => Err(record),
        }
    }

    /// Returns true if a record could be offered on `route` right now.
    #[must_use]
    pub fn accepts(&self, route: Route) -> bool {
        match route {
            Route::Forward(target) => self.incoming(target).is_some_and(BoundedQueue::has_capacity),
            Route::TerminalEgress => self.egress.has_capacity(),
            Route::AutoTerminate => true,
            Route::Unresolved => false,
        }
    }

    /// Total records waiting in incoming queues.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.incoming.iter().map(BoundedQueue::len).sum()
    }

    /// Moves every egressed record into `output`, returning how many moved.
    pub(crate) fn drain_egress_into(&mut self, output: &mut Vec<FlowRecord>) -> usize {
        let records = self.egress.drain();
        let count = records.len();
        output.extend(records);
        count
    }

    /// Drops every record still waiting in an incoming queue.
    pub(crate) fn abandon_all(&mut self) -> usize {
        self.incoming.iter_mut().map(BoundedQueue::abandon).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_by_route() {
        let mut queues = QueueSet::new(2, 1);

        assert!(queues.deliver(Route::Forward(StageId(1)), FlowRecord::from_text("a")).is_ok());
        assert!(!queues.accepts(Route::Forward(StageId(1))));
        let rejected = queues
            .deliver(Route::Forward(StageId(1)), FlowRecord::from_text("b"))
            .unwrap_err();
        assert_eq!(rejected.content_text(), "b");

        assert!(queues.deliver(Route::TerminalEgress, FlowRecord::from_text("c")).is_ok());
        assert!(queues.deliver(Route::AutoTerminate, FlowRecord::from_text("d")).is_err());
        assert_eq!(queues.queued(), 1);
        assert_eq!(queues.egress().len(), 1);
    }

    #[test]
    fn test_drain_and_abandon() {
        let mut queues = QueueSet::new(1, 0);
        queues.deliver(Route::TerminalEgress, FlowRecord::from_text("out")).unwrap();
        queues.deliver(Route::Forward(StageId(0)), FlowRecord::from_text("left")).unwrap();

        let mut output = vec![FlowRecord::from_text("earlier")];
        assert_eq!(queues.drain_egress_into(&mut output), 1);
        assert_eq!(output.len(), 2);
        assert_eq!(queues.abandon_all(), 1);
        assert_eq!(queues.queued(), 0);
    }

    #[test]
    fn test_unknown_stage_has_no_queue() {
        let mut queues = QueueSet::new(1, 0);

        assert!(queues.incoming(StageId(0)).is_some());
        assert!(queues.incoming(StageId(3)).is_none());
        assert!(!queues.accepts(Route::Forward(StageId(3))));
        let rejected = queues
            .deliver(Route::Forward(StageId(3)), FlowRecord::from_text("lost"))
            .unwrap_err();
        assert_eq!(rejected.content_text(), "lost");
    }
}
