// Copyright (C) 2024 The dtnd Authors
//
// This file is part of dtnd.
//
// dtnd is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// dtnd is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::common::messages::Shutdown;

use super::messages::{RegisterCronJob, UnregisterCronJob};
use actix::prelude::*;

/// Named periodic tasks inside one actor context. The heavy lifting
/// happens in the agents the tasks message, a job itself must return
/// quickly.
#[derive(Default)]
pub struct Daemon {
    tasks: HashMap<String, SpawnHandle>,
}

impl Actor for Daemon {
    type Context = Context<Self>;
}

impl actix::Supervised for Daemon {}

impl SystemService for Daemon {}

impl Handler<RegisterCronJob> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: RegisterCronJob, ctx: &mut Context<Self>) -> Self::Result {
        let RegisterCronJob {
            name,
            interval,
            task,
        } = msg;
        if let Some(previous) = self.tasks.remove(&name) {
            warn!("Replacing the existing cron job {name}");
            ctx.cancel_future(previous);
        }
        debug!("Registering cron job {name} every {interval:?}");
        let handle = ctx.run_interval(interval, move |_act, _ctx| task());
        self.tasks.insert(name, handle);
    }
}

impl Handler<UnregisterCronJob> for Daemon {
    type Result = ();

    fn handle(&mut self, msg: UnregisterCronJob, ctx: &mut Context<Self>) -> Self::Result {
        match self.tasks.remove(&msg.name) {
            Some(handle) => {
                ctx.cancel_future(handle);
            }
            None => warn!("No cron job named {} to unregister", msg.name),
        }
    }
}

impl Handler<Shutdown> for Daemon {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Context<Self>) -> Self::Result {
        info!("Stopping the scheduler with {} jobs", self.tasks.len());
        for (_, handle) in self.tasks.drain() {
            ctx.cancel_future(handle);
        }
    }
}
