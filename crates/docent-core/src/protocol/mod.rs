//! Agent protocol layer.
//!
//! A transport-agnostic request/response protocol for agent-to-agent and
//! agent-to-tool calls:
//!
//! - [`envelope`]: the wire envelope and its exactly-once resolution.
//! - [`registry`]: method handlers, the method registry, and parameter
//!   validation against each handler's input schema.
//! - [`responder`]: dispatches an incoming envelope to its handler.
//! - [`correlation`]: tracks in-flight correlation IDs on the calling side.
//!
//! Transports (in-process queue, HTTP) and the timed caller live in the
//! `docent` app crate.

pub mod correlation;
pub mod envelope;
pub mod registry;
pub mod responder;

pub use correlation::{InFlight, InFlightGuard};
pub use envelope::{AgentEnvelope, EnvelopeError, PROTOCOL_VERSION};
pub use registry::{validate_params, MethodHandler, MethodInfo, MethodRegistry};
pub use responder::Responder;
