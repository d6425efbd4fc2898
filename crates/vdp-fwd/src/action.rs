//! Actions and the action interpreter.
//!
//! An action list is executed in order against a packet. Each step yields a
//! [`Verdict`]; execution stops at the first step that does not return
//! [`Verdict::Continue`]. Port and table references are ids, resolved when
//! the step runs.

use crate::context::Context;
use crate::error::{FwdError, Result};
use crate::field::{FieldId, FieldNum};
use crate::hash::{hash_key, HashAlgorithm};
use crate::packet::{HeaderId, Packet, UpdateOp};
use crate::port;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Lookups nested deeper than this drop the packet.
pub const MAX_LOOKUP_DEPTH: usize = 32;

/// Outcome of running an action or an action list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    /// Keep going.
    Continue,
    /// Discard the packet.
    Drop,
    /// The packet was taken over by another path; nothing more to do.
    Consume,
    /// Send the packet to the output port now.
    Output,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Continue => write!(f, "continue"),
            Verdict::Drop => write!(f, "drop"),
            Verdict::Consume => write!(f, "consume"),
            Verdict::Output => write!(f, "output"),
        }
    }
}

/// Right-hand side of an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateValue {
    Bytes(Vec<u8>),
    /// Current value of another field.
    Field(FieldId),
}

/// A typed pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Drop,
    Continue,
    /// Sets the output port. An immediate transmit stops the list.
    Transmit { port: String, immediate: bool },
    /// Runs the packet through a table and executes what it returns.
    Lookup { table: String },
    Update {
        field: FieldId,
        op: UpdateOp,
        value: UpdateValue,
    },
    Encap { header: HeaderId, data: Vec<u8> },
    Decap { header: HeaderId },
    Reparse {
        start: HeaderId,
        preserve: Vec<FieldId>,
        prepend: Vec<u8>,
    },
    /// Sends a rebuilt copy to `port`; the original continues.
    Mirror { preserve: Vec<FieldId>, port: String },
    /// Hash-selects one member of an aggregate port.
    Select { port: String },
    /// Floods to every ready member of an aggregate port.
    Flood { port: String },
    /// Runs exactly one list, chosen by hashing `fields`.
    SelectActionList {
        algorithm: HashAlgorithm,
        fields: Vec<FieldId>,
        lists: Vec<Vec<Action>>,
    },
    /// Runs every list on its own copy of the packet.
    FloodActionList { lists: Vec<Vec<Action>> },
    /// Swaps the output port with its paired internal port.
    SwapOutputInternalExternal,
}

impl Action {
    pub fn transmit(port: impl Into<String>) -> Self {
        Action::Transmit {
            port: port.into(),
            immediate: false,
        }
    }

    pub fn transmit_now(port: impl Into<String>) -> Self {
        Action::Transmit {
            port: port.into(),
            immediate: true,
        }
    }

    pub fn lookup(table: impl Into<String>) -> Self {
        Action::Lookup {
            table: table.into(),
        }
    }

    pub fn set(field: impl Into<FieldId>, value: impl Into<Vec<u8>>) -> Self {
        Action::Update {
            field: field.into(),
            op: UpdateOp::Set,
            value: UpdateValue::Bytes(value.into()),
        }
    }

    pub fn set_u64(field: impl Into<FieldId>, value: u64) -> Self {
        Action::set(field, value.to_be_bytes().to_vec())
    }

    pub fn copy(field: impl Into<FieldId>, source: impl Into<FieldId>) -> Self {
        Action::Update {
            field: field.into(),
            op: UpdateOp::Set,
            value: UpdateValue::Field(source.into()),
        }
    }

    pub fn dec(field: impl Into<FieldId>, by: u8) -> Self {
        Action::Update {
            field: field.into(),
            op: UpdateOp::Dec,
            value: UpdateValue::Bytes(vec![by]),
        }
    }

    pub fn inc(field: impl Into<FieldId>, by: u8) -> Self {
        Action::Update {
            field: field.into(),
            op: UpdateOp::Inc,
            value: UpdateValue::Bytes(vec![by]),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Drop => write!(f, "Drop"),
            Action::Continue => write!(f, "Continue"),
            Action::Transmit { port, immediate } => {
                write!(f, "Transmit({}{})", port, if *immediate { ", now" } else { "" })
            }
            Action::Lookup { table } => write!(f, "Lookup({})", table),
            Action::Update { field, op, value } => match value {
                UpdateValue::Bytes(b) => write!(f, "Update({}, {:?}, {})", field, op, hex(b)),
                UpdateValue::Field(src) => write!(f, "Update({}, {:?}, {})", field, op, src),
            },
            Action::Encap { header, .. } => write!(f, "Encap({})", header),
            Action::Decap { header } => write!(f, "Decap({})", header),
            Action::Reparse { start, prepend, .. } => {
                write!(f, "Reparse({}, +{} bytes)", start, prepend.len())
            }
            Action::Mirror { port, .. } => write!(f, "Mirror({})", port),
            Action::Select { port } => write!(f, "Select({})", port),
            Action::Flood { port } => write!(f, "Flood({})", port),
            Action::SelectActionList {
                algorithm, lists, ..
            } => write!(f, "SelectActionList({}, {} lists)", algorithm, lists.len()),
            Action::FloodActionList { lists } => write!(f, "FloodActionList({} lists)", lists.len()),
            Action::SwapOutputInternalExternal => write!(f, "SwapOutputInternalExternal"),
        }
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Checks that every port and table the actions name exists.
pub fn validate(ctx: &Context, actions: &[Action]) -> Result<()> {
    for action in actions {
        match action {
            Action::Transmit { port, .. }
            | Action::Mirror { port, .. }
            | Action::Select { port }
            | Action::Flood { port } => {
                ctx.port(port)?;
            }
            Action::Lookup { table } => {
                ctx.table(table)?;
            }
            Action::SelectActionList { lists, .. } | Action::FloodActionList { lists } => {
                for list in lists {
                    validate(ctx, list)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Executes `actions` against `pkt`.
pub fn execute(ctx: &Arc<Context>, actions: &[Action], pkt: &mut Packet) -> Verdict {
    run(ctx, actions, pkt, 0)
}

fn run(ctx: &Arc<Context>, actions: &[Action], pkt: &mut Packet, depth: usize) -> Verdict {
    for action in actions {
        pkt.log(|| format!("{:indent$}{}", "", action, indent = depth * 2));
        let verdict = match step(ctx, action, pkt, depth) {
            Ok(v) => v,
            Err(e) => {
                pkt.log(|| format!("{:indent$}error: {}", "", e, indent = depth * 2));
                debug!(context = %ctx.name(), action = %action, error = %e, "action failed, dropping packet");
                Verdict::Drop
            }
        };
        if verdict != Verdict::Continue {
            return verdict;
        }
    }
    Verdict::Continue
}

fn step(ctx: &Arc<Context>, action: &Action, pkt: &mut Packet, depth: usize) -> Result<Verdict> {
    match action {
        Action::Drop => Ok(Verdict::Drop),
        Action::Continue => Ok(Verdict::Continue),
        Action::Transmit { port, immediate } => {
            let port = ctx.port(port)?;
            pkt.set_metadata_u64(FieldNum::PacketPortOutput, port.nid());
            Ok(if *immediate {
                Verdict::Output
            } else {
                Verdict::Continue
            })
        }
        Action::Lookup { table } => {
            if depth >= MAX_LOOKUP_DEPTH {
                return Err(FwdError::internal(format!(
                    "lookup depth {} exceeded at {}",
                    MAX_LOOKUP_DEPTH, table
                )));
            }
            let table = ctx.table(table)?;
            let (actions, _) = table.process(pkt);
            Ok(run(ctx, &actions, pkt, depth + 1))
        }
        Action::Update { field, op, value } => {
            let bytes = match value {
                UpdateValue::Bytes(b) => b.clone(),
                UpdateValue::Field(src) => pkt.field(src)?,
            };
            pkt.update(field, *op, &bytes)?;
            Ok(Verdict::Continue)
        }
        Action::Encap { header, data } => {
            pkt.encap(*header, data)?;
            Ok(Verdict::Continue)
        }
        Action::Decap { header } => {
            pkt.decap(*header)?;
            Ok(Verdict::Continue)
        }
        Action::Reparse {
            start,
            preserve,
            prepend,
        } => {
            pkt.reparse(*start, preserve, prepend)?;
            Ok(Verdict::Continue)
        }
        Action::Mirror { preserve, port } => {
            let port = ctx.port(port)?;
            let copy = pkt.mirror(preserve)?;
            port::output(ctx, &port, copy);
            Ok(Verdict::Continue)
        }
        Action::Select { port } => {
            let port = ctx.port(port)?;
            let agg = port
                .aggregate()
                .ok_or_else(|| FwdError::invalid_argument(format!("{} is not an aggregate", port.id())))?;
            agg.select(ctx, &port, pkt.clone());
            Ok(Verdict::Consume)
        }
        Action::Flood { port } => {
            let port = ctx.port(port)?;
            let agg = port
                .aggregate()
                .ok_or_else(|| FwdError::invalid_argument(format!("{} is not an aggregate", port.id())))?;
            agg.flood(ctx, &port, pkt);
            Ok(Verdict::Consume)
        }
        Action::SelectActionList {
            algorithm,
            fields,
            lists,
        } => {
            if lists.is_empty() {
                return Ok(Verdict::Drop);
            }
            if algorithm.is_flood() {
                return Ok(flood_lists(ctx, lists, pkt, depth));
            }
            let idx = algorithm.index(&hash_key(pkt, fields), lists.len());
            pkt.log(|| format!("{:indent$}selected list {}", "", idx, indent = depth * 2));
            Ok(run(ctx, &lists[idx], pkt, depth + 1))
        }
        Action::FloodActionList { lists } => Ok(flood_lists(ctx, lists, pkt, depth)),
        Action::SwapOutputInternalExternal => {
            let out = pkt.metadata_u64(FieldNum::PacketPortOutput);
            if let Some(peer) = ctx.paired(out) {
                pkt.set_metadata_u64(FieldNum::PacketPortOutput, peer);
            }
            Ok(Verdict::Continue)
        }
    }
}

fn flood_lists(ctx: &Arc<Context>, lists: &[Vec<Action>], pkt: &Packet, depth: usize) -> Verdict {
    for list in lists {
        let mut copy = pkt.clone();
        match run(ctx, list, &mut copy, depth + 1) {
            Verdict::Drop | Verdict::Consume => {}
            Verdict::Continue | Verdict::Output => {
                port::forward(ctx, copy);
            }
        }
    }
    Verdict::Consume
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Action::transmit_now("cpu").to_string(), "Transmit(cpu, now)");
        assert_eq!(Action::lookup("fib-v4").to_string(), "Lookup(fib-v4)");
        assert_eq!(
            Action::set(FieldNum::PacketVrf, vec![1]).to_string(),
            "Update(PACKET_VRF, Set, 01)"
        );
    }

    #[test]
    fn test_constructors() {
        assert_eq!(
            Action::copy(FieldNum::NextHopIp, FieldNum::IpAddrDst),
            Action::Update {
                field: FieldId::new(FieldNum::NextHopIp),
                op: UpdateOp::Set,
                value: UpdateValue::Field(FieldId::new(FieldNum::IpAddrDst)),
            }
        );
    }
}
