//! This is the library module that provides the load balancing core:
//! BackendTable, the selection hash, the packet classifier, the Dispatcher
//! and the observers that receive one event per forwarding decision
//!
//! A packet I/O substrate hands raw Ethernet frames to the Dispatcher and
//! gets back a ForwardingDecision; frames that were assigned a backend are
//! rewritten in place

pub mod apis;

pub use apis::*;
