//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv6Addr;

use serde::{Deserialize, Serialize};
use tether_utils::addr::AllocError;
use tether_utils::dhcp::DhcpError;
use tether_utils::link::InterfaceType;
use tether_utils::netd::CallError;
use tracing::warn;

// Error codes reported to the controller's owner alongside interface state
// updates. They identify which setup phase failed; `None` accompanies every
// successful transition.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ErrorCode {
    #[default]
    None,
    IfaceCfg,
    TetherIface,
    UntetherIface,
    EnableForwarding,
    DisableForwarding,
}

// Downstream controller errors.
#[derive(Debug)]
pub enum Error {
    // Network control daemon call failure, tagged with the operation.
    NetdCall(&'static str, CallError),
    // Address allocator failures
    AddressAllocation(InterfaceType, AllocError),
    // DHCP lifecycle failures
    DhcpCreation(DhcpError),
    DhcpCreationTimeout,
    DhcpStart(DhcpError),
    DhcpUpdate(DhcpError),
    DhcpStop(DhcpError),
    // RA daemon failures
    RaStart,
    // Neighbor offload failures
    OffloadRuleAdd(Ipv6Addr, CallError),
    OffloadRuleRemove(Ipv6Addr, CallError),
    NeighborMonitorStart(std::io::Error),
}

// ===== impl ErrorCode =====

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::None => write!(f, "no error"),
            ErrorCode::IfaceCfg => write!(f, "interface configuration error"),
            ErrorCode::TetherIface => write!(f, "tether interface error"),
            ErrorCode::UntetherIface => write!(f, "untether interface error"),
            ErrorCode::EnableForwarding => {
                write!(f, "enable forwarding error")
            }
            ErrorCode::DisableForwarding => {
                write!(f, "disable forwarding error")
            }
        }
    }
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::NetdCall(op, error) => {
                warn!(%op, error = %with_source(error), "{}", self);
            }
            Error::AddressAllocation(if_type, error) => {
                warn!(%if_type, error = %with_source(error), "{}", self);
            }
            Error::DhcpCreation(error)
            | Error::DhcpStart(error)
            | Error::DhcpUpdate(error)
            | Error::DhcpStop(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            Error::DhcpCreationTimeout => {
                warn!("{}", self);
            }
            Error::RaStart => {
                warn!("{}", self);
            }
            Error::OffloadRuleAdd(dst, error)
            | Error::OffloadRuleRemove(dst, error) => {
                warn!(%dst, error = %with_source(error), "{}", self);
            }
            Error::NeighborMonitorStart(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NetdCall(..) => {
                write!(f, "network daemon call failed")
            }
            Error::AddressAllocation(..) => {
                write!(f, "failed to allocate downstream address")
            }
            Error::DhcpCreation(..) => {
                write!(f, "failed to create DHCP server")
            }
            Error::DhcpCreationTimeout => {
                write!(f, "timed out waiting for DHCP server creation")
            }
            Error::DhcpStart(..) => {
                write!(f, "failed to start DHCP server")
            }
            Error::DhcpUpdate(..) => {
                write!(f, "failed to update DHCP serving parameters")
            }
            Error::DhcpStop(..) => {
                write!(f, "failed to stop DHCP server")
            }
            Error::RaStart => {
                write!(f, "failed to start Router Advertisement daemon")
            }
            Error::OffloadRuleAdd(..) => {
                write!(f, "failed to install forwarding rule")
            }
            Error::OffloadRuleRemove(..) => {
                write!(f, "failed to remove forwarding rule")
            }
            Error::NeighborMonitorStart(..) => {
                write!(f, "failed to start neighbor monitor")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::NetdCall(_, error) => Some(error),
            Error::AddressAllocation(_, error) => Some(error),
            Error::DhcpCreation(error)
            | Error::DhcpStart(error)
            | Error::DhcpUpdate(error)
            | Error::DhcpStop(error) => Some(error),
            Error::OffloadRuleAdd(_, error)
            | Error::OffloadRuleRemove(_, error) => Some(error),
            Error::NeighborMonitorStart(error) => Some(error),
            _ => None,
        }
    }
}

// ===== global functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
