//! # Worker Assignment
//!
//! Deterministic round-robin mapping from a worker index to its
//! (endpoint, destination) pair. This is intentional load-spreading, not
//! randomized: for a fixed configuration the assignment is reproducible,
//! which makes it testable without a live broker.

use broker_client::{Destination, DestinationKind, Endpoint};

/// Round-robin allocator over one destination class
#[derive(Debug, Clone)]
pub struct WorkerAllocator {
    endpoints: Vec<Endpoint>,
    destinations: Vec<Destination>,
}

impl WorkerAllocator {
    /// Build an allocator for the given endpoints and destination names.
    ///
    /// Both lists must be non-empty; configuration validation guarantees this
    /// before any allocator is built.
    pub fn new(endpoints: &[Endpoint], names: &[String], kind: DestinationKind) -> Self {
        debug_assert!(!endpoints.is_empty() && !names.is_empty());
        Self {
            endpoints: endpoints.to_vec(),
            destinations: names
                .iter()
                .map(|name| Destination {
                    kind,
                    name: name.clone(),
                })
                .collect(),
        }
    }

    /// Assignment for worker `index`: `endpoints[index % len]` and
    /// `destinations[index % len]`
    pub fn assignment(&self, index: usize) -> (Endpoint, Destination) {
        let endpoint = self.endpoints[index % self.endpoints.len()].clone();
        let destination = self.destinations[index % self.destinations.len()].clone();
        (endpoint, destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn wraps_independently_over_both_lists() {
        let endpoints = vec![
            Endpoint::new("a", 1),
            Endpoint::new("b", 2),
            Endpoint::new("c", 3),
        ];
        let allocator = WorkerAllocator::new(
            &endpoints,
            &names(&["q1", "q2"]),
            DestinationKind::Queue,
        );

        let (ep, dest) = allocator.assignment(0);
        assert_eq!((ep.host.as_str(), dest.name.as_str()), ("a", "q1"));
        let (ep, dest) = allocator.assignment(3);
        assert_eq!((ep.host.as_str(), dest.name.as_str()), ("a", "q2"));
        let (ep, dest) = allocator.assignment(5);
        assert_eq!((ep.host.as_str(), dest.name.as_str()), ("c", "q2"));
    }

    proptest! {
        #[test]
        fn assignment_is_modular_and_deterministic(
            endpoint_count in 1usize..8,
            name_count in 1usize..8,
            index in 0usize..1000,
        ) {
            let endpoints: Vec<Endpoint> = (0..endpoint_count)
                .map(|i| Endpoint::new(format!("host{i}"), i as u16 + 1))
                .collect();
            let destination_names: Vec<String> =
                (0..name_count).map(|i| format!("d{i}")).collect();
            let allocator = WorkerAllocator::new(
                &endpoints,
                &destination_names,
                DestinationKind::Topic,
            );

            let (ep, dest) = allocator.assignment(index);
            prop_assert_eq!(&ep, &endpoints[index % endpoint_count]);
            prop_assert_eq!(&dest.name, &destination_names[index % name_count]);

            // Same index, same answer.
            let (ep2, dest2) = allocator.assignment(index);
            prop_assert_eq!(ep, ep2);
            prop_assert_eq!(dest, dest2);
        }
    }
}
