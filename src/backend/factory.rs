//! Backend selection with ordered fallback and pinning.
//!
//! Each pipeline kind carries a fixed ordered candidate list. Selection
//! probes candidates in order, silently absorbing unavailability unless
//! the caller pinned one specific candidate, in which case unavailability
//! is fatal. The factory also remembers the last backend that constructed
//! successfully for its family, so sibling pipelines in the same logical
//! group land on the same program without a fresh scan.
//!
//! The factory is owned by the orchestrating thread and passed by handle;
//! there is deliberately no process-wide singleton, and worker threads
//! never touch it.

use log::debug;
use std::sync::Arc;

use super::invoker::InvokerFactory;
use super::mosflm::{MosflmIndexer, MosflmIntegrater};
use super::traits::{IndexingBackend, IntegrationBackend};
use super::xds::{XdsIndexer, XdsIntegrater};
use crate::error::{ProcessError, Result};

/// Record of one candidate probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAttempt {
    pub name: String,
    pub available: bool,
    /// True when unavailability was fatal because the caller pinned this
    /// candidate.
    pub fatal: bool,
}

type Constructor<T> = Box<dyn Fn(&Arc<dyn InvokerFactory>) -> Result<T> + Send + Sync>;

/// Ordered-candidate factory for one pipeline family.
pub struct BackendFactory<T> {
    family: &'static str,
    candidates: Vec<(&'static str, Constructor<T>)>,
    affinity: Option<&'static str>,
    attempts: Vec<BackendAttempt>,
}

impl<T> BackendFactory<T> {
    pub fn new(family: &'static str) -> Self {
        Self {
            family,
            candidates: Vec::new(),
            affinity: None,
            attempts: Vec::new(),
        }
    }

    /// Append a candidate; earlier candidates are preferred.
    pub fn push(
        &mut self,
        name: &'static str,
        constructor: impl Fn(&Arc<dyn InvokerFactory>) -> Result<T> + Send + Sync + 'static,
    ) {
        self.candidates.push((name, Box::new(constructor)));
    }

    /// Candidate names in probe order.
    pub fn candidate_names(&self) -> Vec<&'static str> {
        self.candidates.iter().map(|(n, _)| *n).collect()
    }

    /// Last successful candidate for this family, if any.
    pub fn affinity(&self) -> Option<&'static str> {
        self.affinity
    }

    /// Probe history from all `select` calls so far.
    pub fn attempts(&self) -> &[BackendAttempt] {
        &self.attempts
    }

    /// Select a backend. With `preferred` set only that candidate is
    /// tried and unavailability is fatal; otherwise candidates are tried
    /// in order, starting with the affinity hint when one is recorded.
    pub fn select(
        &mut self,
        invokers: &Arc<dyn InvokerFactory>,
        preferred: Option<&str>,
    ) -> Result<T> {
        if let Some(pinned) = preferred {
            let (name, constructor) = self
                .candidates
                .iter()
                .find(|(n, _)| *n == pinned)
                .ok_or_else(|| ProcessError::NotAvailable {
                    backend: format!("{} (not a {} candidate)", pinned, self.family),
                })?;
            return match constructor(invokers) {
                Ok(backend) => {
                    self.attempts.push(BackendAttempt {
                        name: name.to_string(),
                        available: true,
                        fatal: false,
                    });
                    self.affinity = Some(name);
                    debug!("{}: using pinned backend {}", self.family, name);
                    Ok(backend)
                }
                Err(ProcessError::NotAvailable { backend }) => {
                    self.attempts.push(BackendAttempt {
                        name: name.to_string(),
                        available: false,
                        fatal: true,
                    });
                    Err(ProcessError::NotAvailable {
                        backend: format!("pinned {} backend {}", self.family, backend),
                    })
                }
                Err(e) => Err(e),
            };
        }

        let mut order: Vec<usize> = (0..self.candidates.len()).collect();
        if let Some(hint) = self.affinity {
            if let Some(pos) = self.candidates.iter().position(|(n, _)| *n == hint) {
                order.retain(|&i| i != pos);
                order.insert(0, pos);
            }
        }

        for i in order {
            let (name, constructor) = &self.candidates[i];
            match constructor(invokers) {
                Ok(backend) => {
                    self.attempts.push(BackendAttempt {
                        name: name.to_string(),
                        available: true,
                        fatal: false,
                    });
                    self.affinity = Some(name);
                    debug!("{}: using backend {}", self.family, name);
                    return Ok(backend);
                }
                Err(ProcessError::NotAvailable { .. }) => {
                    self.attempts.push(BackendAttempt {
                        name: name.to_string(),
                        available: false,
                        fatal: false,
                    });
                    debug!("{}: backend {} not available, trying next", self.family, name);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ProcessError::NotAvailable {
            backend: format!("no {} implementations found", self.family),
        })
    }
}

/// The standard autoindexing candidate list.
pub fn default_indexer_factory() -> BackendFactory<Box<dyn IndexingBackend>> {
    let mut factory = BackendFactory::new("indexer");
    factory.push("mosflm", |invokers| {
        MosflmIndexer::new(invokers.clone()).map(|b| Box::new(b) as Box<dyn IndexingBackend>)
    });
    factory.push("xds", |invokers| {
        XdsIndexer::new(invokers.clone()).map(|b| Box::new(b) as Box<dyn IndexingBackend>)
    });
    factory
}

/// The standard integration candidate list.
pub fn default_integrater_factory() -> BackendFactory<Box<dyn IntegrationBackend>> {
    let mut factory = BackendFactory::new("integrater");
    factory.push("mosflm", |invokers| {
        MosflmIntegrater::new(invokers.clone()).map(|b| Box::new(b) as Box<dyn IntegrationBackend>)
    });
    factory.push("xds", |invokers| {
        XdsIntegrater::new(invokers.clone()).map(|b| Box::new(b) as Box<dyn IntegrationBackend>)
    });
    factory
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_factory(available: &'static [&'static str]) -> Arc<dyn InvokerFactory> {
        struct F(&'static [&'static str]);
        impl InvokerFactory for F {
            fn available(&self, program: &str) -> bool {
                self.0.contains(&program)
            }
            fn spawn(&self, program: &str) -> Result<Box<dyn crate::backend::BackendInvoker>> {
                Err(ProcessError::NotAvailable {
                    backend: program.to_string(),
                })
            }
        }
        Arc::new(F(available))
    }

    fn two_candidate_factory() -> BackendFactory<&'static str> {
        let mut factory: BackendFactory<&'static str> = BackendFactory::new("test");
        factory.push("a", |invokers| {
            if invokers.available("prog-a") {
                Ok("a")
            } else {
                Err(ProcessError::NotAvailable {
                    backend: "prog-a".to_string(),
                })
            }
        });
        factory.push("b", |invokers| {
            if invokers.available("prog-b") {
                Ok("b")
            } else {
                Err(ProcessError::NotAvailable {
                    backend: "prog-b".to_string(),
                })
            }
        });
        factory
    }

    #[test]
    fn test_fallback_to_second_candidate() {
        let invokers = probe_factory(&["prog-b"]);
        let mut factory = two_candidate_factory();
        assert_eq!(factory.select(&invokers, None).unwrap(), "b");

        let attempts = factory.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].available);
        assert!(!attempts[0].fatal);
        assert!(attempts[1].available);
    }

    #[test]
    fn test_pinned_unavailable_is_fatal() {
        let invokers = probe_factory(&["prog-b"]);
        let mut factory = two_candidate_factory();
        let result = factory.select(&invokers, Some("a"));
        assert!(matches!(result, Err(ProcessError::NotAvailable { .. })));
        assert!(factory.attempts().last().unwrap().fatal);
    }

    #[test]
    fn test_first_candidate_wins_when_available() {
        let invokers = probe_factory(&["prog-a", "prog-b"]);
        let mut factory = two_candidate_factory();
        assert_eq!(factory.select(&invokers, None).unwrap(), "a");
        assert_eq!(factory.affinity(), Some("a"));
    }

    #[test]
    fn test_affinity_reorders_probing() {
        let invokers = probe_factory(&["prog-a", "prog-b"]);
        let mut factory = two_candidate_factory();
        factory.affinity = Some("b");
        assert_eq!(factory.select(&invokers, None).unwrap(), "b");
        // only one probe needed, no scan of a
        assert_eq!(factory.attempts().len(), 1);
    }

    #[test]
    fn test_unknown_pin_rejected() {
        let invokers = probe_factory(&["prog-a"]);
        let mut factory = two_candidate_factory();
        assert!(factory.select(&invokers, Some("zzz")).is_err());
    }

    #[test]
    fn test_nothing_available() {
        let invokers = probe_factory(&[]);
        let mut factory = two_candidate_factory();
        assert!(factory.select(&invokers, None).is_err());
        assert_eq!(factory.attempts().len(), 2);
    }

    #[test]
    fn test_default_candidate_order() {
        assert_eq!(default_indexer_factory().candidate_names(), ["mosflm", "xds"]);
        assert_eq!(
            default_integrater_factory().candidate_names(),
            ["mosflm", "xds"]
        );
    }
}
