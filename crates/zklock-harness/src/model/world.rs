//! Model world - the reference lock queue.
//!
//! The model keeps requests in arrival order and derives who holds the lock
//! straight from the queue. No sessions, no watches, no sequence numbers.

use zklock_core::NodeKind;

use super::operation::{ClientId, Operation, OperationError, OperationResult};

/// Observable state for oracle comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Clients holding the lock and the mode they hold, by client id.
    pub holders: Vec<(ClientId, NodeKind)>,
    /// Clients with a request still waiting, by client id.
    pub waiting: Vec<ClientId>,
}

impl ObservableState {
    /// Requests present in the queue, held or waiting.
    pub fn outstanding(&self) -> usize {
        self.holders.len() + self.waiting.len()
    }
}

/// Model world - the reference implementation.
#[derive(Debug, Clone)]
pub struct ModelWorld {
    /// Number of clients.
    num_clients: usize,
    /// Outstanding requests, oldest first.
    queue: Vec<(ClientId, NodeKind)>,
}

impl ModelWorld {
    /// Create a new model world with the given number of clients.
    pub fn new(num_clients: usize) -> Self {
        Self { num_clients, queue: Vec::new() }
    }

    /// Number of clients in the world.
    pub fn num_clients(&self) -> usize {
        self.num_clients
    }

    /// Apply an operation and return the result.
    ///
    /// The result should match the real implementation's result.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        let client_id = op.client_id();
        if client_id as usize >= self.num_clients {
            return OperationResult::Error(OperationError::InvalidClient);
        }

        match op {
            Operation::Read { .. } => self.apply_request(client_id, NodeKind::Read),
            Operation::Write { .. } => self.apply_request(client_id, NodeKind::Write),
            Operation::Release { .. } => self.apply_release(client_id),
            Operation::Crash { .. } => {
                self.queue.retain(|(id, _)| *id != client_id);
                OperationResult::Ok
            },
        }
    }

    /// True if `client_id` currently holds the lock.
    pub fn holds(&self, client_id: ClientId) -> bool {
        self.queue
            .iter()
            .position(|(id, _)| *id == client_id)
            .is_some_and(|index| self.eligible(index))
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        let mut holders = Vec::new();
        let mut waiting = Vec::new();
        for (index, (client_id, kind)) in self.queue.iter().enumerate() {
            if self.eligible(index) {
                holders.push((*client_id, *kind));
            } else {
                waiting.push(*client_id);
            }
        }
        holders.sort_by_key(|(id, _)| *id);
        waiting.sort_unstable();

        ObservableState { holders, waiting }
    }

    fn eligible(&self, index: usize) -> bool {
        match self.queue[index].1 {
            NodeKind::Write => index == 0,
            NodeKind::Read => self.queue[..index].iter().all(|(_, kind)| *kind == NodeKind::Read),
        }
    }

    fn apply_request(&mut self, client_id: ClientId, kind: NodeKind) -> OperationResult {
        if self.queue.iter().any(|(id, _)| *id == client_id) {
            return OperationResult::Error(OperationError::Busy);
        }
        self.queue.push((client_id, kind));
        OperationResult::Ok
    }

    fn apply_release(&mut self, client_id: ClientId) -> OperationResult {
        if !self.holds(client_id) {
            return OperationResult::Error(OperationError::NotHolding);
        }
        self.queue.retain(|(id, _)| *id != client_id);
        OperationResult::Ok
    }
}
