//! Reference-counted resources shared between isolation contexts
//!
//! A pooled resource (a backend connection, a worker handle) is torn down
//! when the last context that acquired it is disposed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub trait PooledResource {
    /// Called once, when the last user releases the resource
    fn teardown(&self);
}

struct Entry {
    resource: Rc<dyn PooledResource>,
    users: usize,
}

#[derive(Default)]
pub struct ResourcePool {
    entries: RefCell<HashMap<String, Entry>>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a reference on `key`, creating the resource if nobody holds it
    pub fn acquire<F>(&self, key: &str, create: F) -> Rc<dyn PooledResource>
    where
        F: FnOnce() -> Rc<dyn PooledResource>,
    {
        let mut entries = self.entries.borrow_mut();
        let entry = entries.entry(key.to_string()).or_insert_with(|| {
            tracing::debug!(resource = key, "Creating pooled resource");
            Entry {
                resource: create(),
                users: 0,
            }
        });
        entry.users += 1;
        Rc::clone(&entry.resource)
    }

    /// Drop a reference; returns true if this tore the resource down
    pub fn release(&self, key: &str) -> bool {
        let removed = {
            let mut entries = self.entries.borrow_mut();
            let Some(entry) = entries.get_mut(key) else {
                return false;
            };
            entry.users = entry.users.saturating_sub(1);
            if entry.users > 0 {
                return false;
            }
            entries.remove(key)
        };
        match removed {
            Some(entry) => {
                tracing::debug!(resource = key, "Tearing down pooled resource");
                entry.resource.teardown();
                true
            }
            None => false,
        }
    }

    pub fn active_users(&self, key: &str) -> usize {
        self.entries.borrow().get(key).map_or(0, |e| e.users)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Connection {
        closed: Rc<Cell<u32>>,
    }

    impl PooledResource for Connection {
        fn teardown(&self) {
            self.closed.set(self.closed.get() + 1);
        }
    }

    #[test]
    fn test_teardown_after_last_release() {
        let pool = ResourcePool::new();
        let closed = Rc::new(Cell::new(0));
        let created = Cell::new(0);
        let make = || {
            created.set(created.get() + 1);
            Rc::new(Connection {
                closed: Rc::clone(&closed),
            }) as Rc<dyn PooledResource>
        };

        pool.acquire("db", make);
        pool.acquire("db", make);
        assert_eq!(created.get(), 1);
        assert_eq!(pool.active_users("db"), 2);

        assert!(!pool.release("db"));
        assert_eq!(closed.get(), 0);
        assert!(pool.release("db"));
        assert_eq!(closed.get(), 1);
        assert!(pool.is_empty());
        assert!(!pool.release("db"));
    }
}
