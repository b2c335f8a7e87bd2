//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tether_utils::UnboundedSender;
use tether_utils::dhcp::DhcpServerMsg;
use tether_utils::task::TimeoutTask;

use crate::dhcp::DHCP_CREATION_TIMEOUT;

//
// Downstream instance tasks diagram:
//
//                                  +--------------+
//                                  |    owner     |
//                                  +--------------+
//                                        | ^
//                                        | |
//                        command (1x)    V | (1x) owner_tx
//                                  +--------------+
//                                  |              |
//        dhcp created/events ->    |   instance   |
//  dhcp creation timeout (0/1x) -> |              |
//         neighbor events (Nx) ->  |              |
//                                  +--------------+
//                                        |
//                                        V  synchronous calls
//                     netd / allocator / dhcp / ra / bpf
//

// Downstream inter-task message types.
pub mod messages {
    // Type aliases.
    pub type CommandMsg = input::CommandMsg;

    // Input messages (owner/child task -> instance task).
    pub mod input {
        use serde::{Deserialize, Serialize};

        use crate::instance::ServingMode;
        use crate::upstream::Ipv6Upstream;

        #[derive(Debug, Deserialize, Serialize)]
        pub enum CommandMsg {
            TetherRequest(TetherRequestMsg),
            TetherUnrequest(TetherUnrequestMsg),
            InterfaceDown(InterfaceDownMsg),
            UpstreamChanged(UpstreamChangedMsg),
            Ipv6TetherUpdate(Ipv6TetherUpdateMsg),
            Stop(StopMsg),
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct TetherRequestMsg {
            pub mode: ServingMode,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct TetherUnrequestMsg {}

        #[derive(Debug, Deserialize, Serialize)]
        pub struct InterfaceDownMsg {}

        #[derive(Debug, Deserialize, Serialize)]
        pub struct UpstreamChangedMsg {
            pub ifname: Option<String>,
            pub ifindex: u32,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct Ipv6TetherUpdateMsg {
            pub upstream: Option<Ipv6Upstream>,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct StopMsg {}
    }
}

// ===== Downstream tasks =====

// Bounded wait on the asynchronous DHCP server creation.
pub(crate) fn dhcp_creation_timeout(
    index: u32,
    dhcp_msgp: &UnboundedSender<DhcpServerMsg>,
) -> TimeoutTask {
    let dhcp_msgp = dhcp_msgp.clone();
    TimeoutTask::new(DHCP_CREATION_TIMEOUT, move || async move {
        let msg = DhcpServerMsg::CreationTimeout { index };
        let _ = dhcp_msgp.send(msg);
    })
}
