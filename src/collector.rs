//! Result collector
//!
//! Thread-safe sink that reassembles concurrently-completing results into the
//! input order. The identifier→index map is built once before scheduling
//! starts and is read-only afterwards; the slot vector is the only state
//! behind the write lock.
//!
//! Duplicate identifiers in the input are processed once; the single computed
//! result is fanned out to every position the identifier held, so the output
//! always has the input's length and order.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

use crate::config::LookupResult;
use crate::error::LookupError;

pub struct ResultCollector {
    identifiers: Vec<String>,
    index: HashMap<String, Vec<usize>>,
    slots: Mutex<Vec<Option<LookupResult>>>,
}

impl ResultCollector {
    pub fn new(identifiers: &[String]) -> Self {
        let mut index: HashMap<String, Vec<usize>> = HashMap::with_capacity(identifiers.len());
        for (position, identifier) in identifiers.iter().enumerate() {
            index.entry(identifier.clone()).or_default().push(position);
        }
        Self {
            identifiers: identifiers.to_vec(),
            index,
            slots: Mutex::new(vec![None; identifiers.len()]),
        }
    }

    /// Record a terminal result into every input position of its identifier.
    pub fn record(&self, result: LookupResult) {
        let Some(positions) = self.index.get(&result.identifier) else {
            warn!(identifier = %result.identifier, "result for unknown identifier dropped");
            return;
        };
        let mut slots = self.slots.lock().unwrap();
        for &position in positions {
            slots[position] = Some(result.clone());
        }
    }

    /// Number of input positions with a recorded result.
    pub fn completed(&self) -> usize {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }

    pub fn total(&self) -> usize {
        self.identifiers.len()
    }

    /// Ordered output sequence. Only valid once the scheduler has drained;
    /// positions never reached (cancellation, deadline) are filled with a
    /// terminal error rather than left empty.
    pub fn finalize(&self) -> Vec<LookupResult> {
        let mut slots = self.slots.lock().unwrap();
        slots
            .iter_mut()
            .enumerate()
            .map(|(position, slot)| {
                slot.take().unwrap_or_else(|| {
                    LookupResult::failure(
                        self.identifiers[position].clone(),
                        LookupError::Cancelled,
                        0,
                        Duration::ZERO,
                    )
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LookupStatus, RegistryFields};

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn success(identifier: &str) -> LookupResult {
        LookupResult::success(
            identifier,
            RegistryFields::default(),
            1,
            Duration::from_millis(10),
        )
    }

    #[test]
    fn results_come_back_in_input_order() {
        let collector = ResultCollector::new(&ids(&["300", "100", "200"]));
        collector.record(success("100"));
        collector.record(success("300"));
        collector.record(success("200"));

        let results = collector.finalize();
        let order: Vec<&str> = results.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(order, vec!["300", "100", "200"]);
    }

    #[test]
    fn duplicate_identifiers_fan_out_to_every_position() {
        let collector = ResultCollector::new(&ids(&["100", "200", "100"]));
        collector.record(success("100"));
        collector.record(success("200"));

        let results = collector.finalize();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(LookupResult::is_success));
        assert_eq!(results[0].identifier, "100");
        assert_eq!(results[2].identifier, "100");
    }

    #[test]
    fn unreached_positions_are_filled_with_cancelled_errors() {
        let collector = ResultCollector::new(&ids(&["100", "200"]));
        collector.record(success("100"));

        let results = collector.finalize();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_success());
        assert_eq!(results[1].status, LookupStatus::Error);
        assert_eq!(results[1].error, Some(LookupError::Cancelled));
    }

    #[test]
    fn unknown_identifier_is_dropped() {
        let collector = ResultCollector::new(&ids(&["100"]));
        collector.record(success("999"));
        assert_eq!(collector.completed(), 0);
    }
}
