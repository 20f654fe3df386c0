// network_service/src/collection.rs
use std::sync::Arc;

pub struct ServiceEntry<T: ?Sized> {
    pub name: String,
    pub service: Arc<T>,
}

impl<T: ?Sized> Clone for ServiceEntry<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            service: Arc::clone(&self.service),
        }
    }
}

/// Round-robin failover list of interchangeable providers of one capability.
///
/// Cloning shares the providers but gives the clone its own cursor, so a
/// bounded retry loop can rotate without moving the shared cursor.
pub struct ServiceCollection<T: ?Sized> {
    services: Vec<ServiceEntry<T>>,
    index: usize,
}

impl<T: ?Sized> Clone for ServiceCollection<T> {
    fn clone(&self) -> Self {
        Self {
            services: self.services.clone(),
            index: self.index,
        }
    }
}

impl<T: ?Sized> Default for ServiceCollection<T> {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            index: 0,
        }
    }
}

impl<T: ?Sized> ServiceCollection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, service: Arc<T>) -> &mut Self {
        self.services.push(ServiceEntry {
            name: name.to_string(),
            service,
        });
        self
    }

    /// Removes every entry called `name`. The cursor keeps pointing at the
    /// same surviving entry, or wraps to the start.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.services.len();
        let mut position = 0;
        let mut index = self.index;
        self.services.retain(|entry| {
            let keep = entry.name != name;
            if !keep && position < index {
                index -= 1;
            }
            position += 1;
            keep
        });
        self.index = if index >= self.services.len() { 0 } else { index };
        self.services.len() != before
    }

    pub fn current(&self) -> Option<&ServiceEntry<T>> {
        self.services.get(self.index)
    }

    pub fn name(&self) -> Option<&str> {
        self.current().map(|entry| entry.name.as_str())
    }

    /// Moves to the next entry, wrapping after the last. Returns the new index.
    pub fn advance(&mut self) -> usize {
        if !self.services.is_empty() {
            self.index = (self.index + 1) % self.services.len();
        }
        self.index
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn count(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.services.iter().map(|e| e.name.clone()).collect()
    }

    pub fn entries(&self) -> &[ServiceEntry<T>] {
        &self.services
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn id(&self) -> u32;
    }

    struct Fixed(u32);

    impl Named for Fixed {
        fn id(&self) -> u32 {
            self.0
        }
    }

    fn collection(n: u32) -> ServiceCollection<dyn Named> {
        let mut services: ServiceCollection<dyn Named> = ServiceCollection::new();
        for i in 0..n {
            services.add(&format!("s{}", i), Arc::new(Fixed(i)));
        }
        services
    }

    #[test]
    fn advance_cycles_back_after_count_calls() {
        let mut services = collection(3);
        services.advance();
        let start = services.index();
        for _ in 0..services.count() {
            services.advance();
        }
        assert_eq!(services.index(), start);
        assert_eq!(services.current().unwrap().service.id(), 1);
    }

    #[test]
    fn clone_rotates_independently() {
        let services = collection(3);
        let mut local = services.clone();
        local.advance();
        local.advance();
        assert_eq!(services.index(), 0);
        assert_eq!(local.name(), Some("s2"));
        assert!(Arc::ptr_eq(
            &services.entries()[2].service,
            &local.current().unwrap().service
        ));
    }

    #[test]
    fn removing_current_entry_keeps_current_valid() {
        let mut services = collection(3);
        services.advance();
        services.advance();
        assert!(services.remove("s2"));
        assert_eq!(services.name(), Some("s0"));

        services.advance();
        assert!(services.remove("s0"));
        assert_eq!(services.name(), Some("s1"));

        assert!(services.remove("s1"));
        assert!(services.current().is_none());
        assert_eq!(services.advance(), 0);
        assert!(!services.remove("missing"));
    }
}
