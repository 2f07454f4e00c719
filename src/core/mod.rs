// Core modules: endpoint identity, frame classification, reactor, and error modeling.
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod reactor;
