//! Virtual dataplane forwarding engine.
//!
//! The engine forwards parsed packets through action lists attached to
//! ports and tables. Everything lives inside a named [`Context`]:
//!
//! - [`packet`]: the header stack, payload and metadata of a packet
//! - [`table`]: exact, prefix (longest match) and flow (TCAM-style) tables
//! - [`action`]: the action interpreter
//! - [`port`]: CPU, kernel, TAP, fake, aggregate, genetlink and hostif ports
//! - [`service`]: the [`Engine`], the control surface over all of the above

pub mod action;
pub mod context;
pub mod counter;
pub mod error;
pub mod field;
pub mod hash;
pub mod notify;
pub mod object;
pub mod packet;
pub mod port;
pub mod service;
pub mod set;
pub mod table;

pub use action::{Action, UpdateValue, Verdict};
pub use context::{Context, FwdObject};
pub use counter::{CounterId, CounterValue};
pub use error::{FwdError, Result};
pub use field::{FieldId, FieldNum, HeaderGroup};
pub use hash::HashAlgorithm;
pub use notify::{PortStateEvent, Subscription};
pub use object::{Nid, Object, ObjectKind};
pub use packet::{HeaderId, Packet, UpdateOp};
pub use port::{
    AggregateConfig, AggregateMember, LinkPeer, LinkProvider, LoopbackLinks, PacketSink, PortConfig, PortDesc, PortType,
    PortUpdate,
};
pub use service::{Direction, Engine, InfoReply, InfoRequest, PortStatus};
pub use set::FwdSet;
pub use table::{EntryDesc, EntryKey, TableDesc, TableKind};
