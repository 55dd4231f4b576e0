//! Membrane inbound event gateway.
//!
//! Raw envelopes from the delivery runtime are classified by shape, resolved
//! against the deployment's tagged resources, normalized into one of the
//! request types in `membrane-core`, handed to the matching capability handler,
//! and the result is adapted back into the wire format the runtime expects.
pub mod adapt;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod lifecycle;
pub mod normalize;

pub use adapt::{Framing, HttpReply, WireResponse};
pub use classify::{Shape, classify};
pub use config::{GatewayConfig, GatewayMode};
pub use dispatch::{DispatchContext, Dispatcher};
pub use error::DispatchError;
pub use lifecycle::{Gateway, HttpGateway, LambdaGateway, LifecycleError, LifecycleState};
