//! SAI object layer for the virtual dataplane.
//!
//! A [`Switch`] owns one forwarding context of a [`vdp_fwd::Engine`]. SAI
//! objects (ports, router interfaces, next hops, routes, ACLs, host
//! interfaces) are created through typed APIs and compiled into the
//! context's pipeline tables:
//!
//! - [`types`]: type-safe object ids
//! - [`error`]: SAI status codes and errors
//! - [`attr`]: attribute values, attribute enums and the attribute store
//! - [`pipeline`]: the fixed table layout every switch starts with
//! - [`switch`]: bootstrap, switch attributes and port notifications
//! - [`api`]: one API per object family
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vdp_fwd::{Engine, LoopbackLinks};
//! use vdp_sai::api::port::{PortRequest, PortSpeed};
//! use vdp_sai::{SaiResult, Switch, SwitchConfig};
//!
//! # async fn demo() -> SaiResult<()> {
//! let engine = Arc::new(Engine::new(Arc::new(LoopbackLinks::new())));
//! let switch = Switch::create(engine, SwitchConfig::default())?;
//! let port = switch.port_api().create_port(&PortRequest {
//!     hw_lanes: Some(vec![1]),
//!     speed: Some(PortSpeed::GE_100),
//!     admin_state: Some(true),
//!     ..Default::default()
//! })?;
//! println!("created port {}", port);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod attr;
pub mod error;
pub mod pipeline;
pub mod switch;
pub mod types;

pub use api::{AclApi, HostifApi, LagApi, NeighborApi, NextHopApi, PacketAction, PortApi, RouteApi, RouterApi};
pub use attr::{AttrValue, AttributeRequest, AttributeStore, SaiAttribute};
pub use error::{SaiError, SaiResult, SaiStatus};
pub use switch::{
    AclConfig, Defaults, PortEvents, PortOperEvent, SaiHashAlgorithm, Switch, SwitchAttr, SwitchConfig,
    SwitchRequest,
};
pub use types::*;
