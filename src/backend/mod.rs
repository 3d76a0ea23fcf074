//! External program backends.
//!
//! A backend is a thin driver over one external crystallographic program,
//! exposed through the capability traits in [`traits`]. Drivers stream
//! command lines through an injected [`InvokerFactory`] and parse the
//! captured log with a per-program [`parse::Vocabulary`]. Selection and
//! fallback between candidate programs lives in [`factory`].

pub mod factory;
pub mod invoker;
pub mod mosflm;
pub mod parse;
pub mod traits;
pub mod xds;

pub use factory::{
    default_indexer_factory, default_integrater_factory, BackendAttempt, BackendFactory,
};
pub use invoker::{BackendInvoker, InvokerFactory, ScriptedInvoker, ScriptedInvokerFactory};
pub use traits::{
    ImageAware, IndexOutcome, IndexRequest, IndexingBackend, IntegrateOutcome, IntegrateRequest,
    IntegrationBackend, LatticeAware, PostrefDeviations, Runnable,
};
