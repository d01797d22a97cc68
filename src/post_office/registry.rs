use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time;

use crate::connection::Connection;
use crate::packet::{Identity, Port};

#[derive(Debug, Eq, PartialEq)]
pub enum InsertError {
    Occupied,
    Closed,
}

struct ConnectionTable {
    connections: HashMap<Identity, Arc<Connection>>,
    closed: bool,
}

/// Active connections keyed by identity.
pub struct ConnectionRegistry {
    table: Mutex<ConnectionTable>,
    // Notified on every removal
    removed: Condvar,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(ConnectionTable {
                connections: HashMap::new(),
                closed: false,
            }),
            removed: Condvar::new(),
        }
    }

    /// Inserts `connection` unless its identity is taken or the registry is closed.
    pub fn try_insert(&self, connection: Arc<Connection>) -> Result<(), InsertError> {
        let ref mut table = *self.table.lock().unwrap();

        if table.closed {
            return Err(InsertError::Closed);
        }

        let identity = *connection.identity();

        if table.connections.contains_key(&identity) {
            return Err(InsertError::Occupied);
        }

        table.connections.insert(identity, connection);

        Ok(())
    }

    pub fn get(&self, identity: &Identity) -> Option<Arc<Connection>> {
        self.table.lock().unwrap().connections.get(identity).cloned()
    }

    /// Removes `connection` if it is the one registered under its identity. Repeated calls are
    /// harmless.
    pub fn remove(&self, connection: &Connection) -> bool {
        let ref mut table = *self.table.lock().unwrap();

        let identity = connection.identity();

        let registered = match table.connections.get(identity) {
            Some(entry) => std::ptr::eq(Arc::as_ptr(entry), connection),
            None => false,
        };

        if registered {
            table.connections.remove(identity);
            self.removed.notify_all();
        }

        registered
    }

    pub fn len(&self) -> usize {
        self.table.lock().unwrap().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.table
            .lock()
            .unwrap()
            .connections
            .values()
            .cloned()
            .collect()
    }

    /// Refuses further insertions and returns the connections currently registered.
    pub fn close(&self) -> Vec<Arc<Connection>> {
        let ref mut table = *self.table.lock().unwrap();

        table.closed = true;

        table.connections.values().cloned().collect()
    }

    /// Blocks until no connection is registered, or until `timeout` has passed. Returns true if
    /// the registry emptied.
    pub fn wait_empty(&self, timeout: Option<time::Duration>) -> bool {
        let deadline = timeout.map(|timeout| time::Instant::now() + timeout);

        let mut table = self.table.lock().unwrap();

        while !table.connections.is_empty() {
            match deadline {
                Some(deadline) => {
                    let now = time::Instant::now();

                    if now >= deadline {
                        return false;
                    }

                    table = self.removed.wait_timeout(table, deadline - now).unwrap().0;
                }
                None => {
                    table = self.removed.wait(table).unwrap();
                }
            }
        }

        true
    }
}

struct PendingTable {
    connections: HashMap<Port, Arc<Connection>>,
    closed: bool,
}

/// Passively opened connections awaiting accept(), at most one per local port.
pub struct PendingAcceptRegistry {
    table: Mutex<PendingTable>,
}

impl PendingAcceptRegistry {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(PendingTable {
                connections: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Offers `connection` under its local port. Returns false if the port already has a pending
    /// connection or the registry is closed.
    pub fn offer(&self, connection: Arc<Connection>) -> bool {
        let ref mut table = *self.table.lock().unwrap();

        if table.closed {
            return false;
        }

        let port = connection.identity().local_port;

        if table.connections.contains_key(&port) {
            return false;
        }

        table.connections.insert(port, connection);

        true
    }

    pub fn take(&self, port: Port) -> Option<Arc<Connection>> {
        self.table.lock().unwrap().connections.remove(&port)
    }

    /// Removes `connection` if it is pending. Repeated calls are harmless.
    pub fn remove(&self, connection: &Connection) -> bool {
        let ref mut table = *self.table.lock().unwrap();

        let port = connection.identity().local_port;

        let pending = match table.connections.get(&port) {
            Some(entry) => std::ptr::eq(Arc::as_ptr(entry), connection),
            None => false,
        };

        if pending {
            table.connections.remove(&port);
        }

        pending
    }

    pub fn len(&self) -> usize {
        self.table.lock().unwrap().connections.len()
    }

    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.table
            .lock()
            .unwrap()
            .connections
            .values()
            .cloned()
            .collect()
    }

    /// Refuses further offers and drops everything pending.
    pub fn close(&self) -> Vec<Arc<Connection>> {
        let ref mut table = *self.table.lock().unwrap();

        table.closed = true;

        table.connections.drain().map(|(_, c)| c).collect()
    }
}
