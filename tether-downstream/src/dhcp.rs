//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tether_utils::UnboundedSender;
use tether_utils::dhcp::{
    DhcpCreateCallback, DhcpError, DhcpServerFactory, DhcpServerHandle,
    DhcpServerMsg, DhcpServingParams,
};
use tether_utils::task::TimeoutTask;

use crate::debug::Debug;
use crate::error::Error;
use crate::tasks;

// Bounded wait for the asynchronous DHCP server creation before it is
// considered failed.
pub const DHCP_CREATION_TIMEOUT: Duration = Duration::from_secs(10);

// Drives the external DHCP server process for one downstream.
//
// Server creation is asynchronous: the factory delivers the handle through
// a callback on an arbitrary thread, which re-posts it into the instance's
// serialized queue. The start index ties callbacks to the lifecycle
// generation that requested them; a bumped index invalidates everything
// still in flight.
#[derive(Debug)]
pub struct DhcpLifecycle {
    factory: Arc<dyn DhcpServerFactory>,
    tx: UnboundedSender<DhcpServerMsg>,
    ifname: String,
    start_index: u32,
    server: Option<Arc<dyn DhcpServerHandle>>,
    params: Option<DhcpServingParams>,
    creation_timeout: Option<TimeoutTask>,
    pub statistics: DhcpStatistics,
}

#[derive(Debug, Default)]
pub struct DhcpStatistics {
    pub creation_failures: u32,
    pub creation_timeouts: u32,
    pub last_created_time: Option<DateTime<Utc>>,
}

// ===== impl DhcpLifecycle =====

impl DhcpLifecycle {
    pub fn new(
        factory: Arc<dyn DhcpServerFactory>,
        tx: UnboundedSender<DhcpServerMsg>,
        ifname: String,
    ) -> Self {
        DhcpLifecycle {
            factory,
            tx,
            ifname,
            start_index: 0,
            server: None,
            params: None,
            creation_timeout: None,
            statistics: Default::default(),
        }
    }

    pub fn params(&self) -> Option<&DhcpServingParams> {
        self.params.as_ref()
    }

    pub fn is_serving(&self) -> bool {
        self.server.is_some()
    }

    // Requests creation of a DHCP server for the given parameters. The
    // result arrives later as a `DhcpServerMsg::Created` message.
    pub fn start_serving(&mut self, params: DhcpServingParams) {
        self.start_index = self.start_index.wrapping_add(1);
        self.params = Some(params.clone());

        let callback =
            DhcpCreateCallback::new(self.start_index, self.tx.clone());
        self.factory.make_dhcp_server(&self.ifname, &params, callback);
        self.creation_timeout =
            Some(tasks::dhcp_creation_timeout(self.start_index, &self.tx));
    }

    // Handles the asynchronous creation result. `serving` tells whether
    // the downstream is still in a serving state; a server delivered after
    // teardown is stopped and discarded.
    pub fn handle_created(
        &mut self,
        index: u32,
        result: Result<Arc<dyn DhcpServerHandle>, DhcpError>,
        serving: bool,
    ) -> Result<(), Error> {
        if index != self.start_index {
            // Stale callback from a previous lifecycle generation.
            if let Ok(server) = result {
                let _ = server.stop();
            }
            return Ok(());
        }
        self.creation_timeout = None;

        let server = match result {
            Ok(server) => server,
            Err(error) => {
                self.statistics.creation_failures += 1;
                return Err(Error::DhcpCreation(error));
            }
        };
        if !serving {
            let _ = server.stop();
            return Ok(());
        }

        Debug::DhcpServerCreated(index).log();
        self.statistics.last_created_time = Some(Utc::now());

        let Some(params) = &self.params else {
            return Ok(());
        };
        server
            .start_with_callbacks(params, self.tx.clone())
            .map_err(Error::DhcpStart)?;
        self.server = Some(server);
        Ok(())
    }

    // Handles expiry of the bounded creation wait. The downstream keeps
    // serving without functioning DHCP; there is no retry at this layer.
    pub fn handle_creation_timeout(&mut self, index: u32) -> Result<(), Error> {
        if index != self.start_index || self.server.is_some() {
            return Ok(());
        }
        self.creation_timeout = None;
        self.statistics.creation_timeouts += 1;
        Err(Error::DhcpCreationTimeout)
    }

    // Pushes recomputed serving parameters to the live server. A no-op
    // when the parameters are unchanged.
    pub fn update_params(
        &mut self,
        params: DhcpServingParams,
    ) -> Result<(), Error> {
        if self.params.as_ref() == Some(&params) {
            return Ok(());
        }
        self.params = Some(params.clone());
        if let Some(server) = &self.server {
            server.update_params(&params).map_err(Error::DhcpUpdate)?;
        }
        Ok(())
    }

    // Stops the server and invalidates any in-flight creation.
    pub fn stop_serving(&mut self) {
        self.start_index = self.start_index.wrapping_add(1);
        self.creation_timeout = None;
        self.params = None;
        if let Some(server) = self.server.take()
            && let Err(error) = server.stop()
        {
            Error::DhcpStop(error).log();
        }
    }
}
