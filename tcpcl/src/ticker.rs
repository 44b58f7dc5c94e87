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

use std::time::Duration;

use tokio::{sync::mpsc, time::Instant};

/// A wind-up timer for keepalive duties.
///
/// Every `reschedule` arms exactly one future tick; the ticker never fires
/// on its own and never closes its channel, so a consumer can always tell a
/// tick from session teardown. Concurrent reschedules each produce their
/// own tick.
pub struct Ticker {
    sender: mpsc::Sender<Instant>,
    receiver: mpsc::Receiver<Instant>,
}

impl Default for Ticker {
    fn default() -> Self {
        Ticker::new()
    }
}

impl Ticker {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel(8);
        Ticker { sender, receiver }
    }

    /// Arms one tick to fire `after` from now.
    pub fn reschedule(&self, after: Duration) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            // The receiver lives as long as the ticker, this only fails
            // when the whole session is already gone.
            let _ = sender.send(Instant::now()).await;
        });
    }

    /// Waits for the next armed tick.
    pub async fn tick(&mut self) -> Instant {
        self.receiver
            .recv()
            .await
            .expect("the ticker holds its own sender, the channel cannot close")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Ticker;

    #[tokio::test]
    async fn fires_once_per_reschedule() {
        let mut ticker = Ticker::new();
        ticker.reschedule(Duration::from_millis(10));
        ticker.tick().await;
        // no second tick without another reschedule
        let res =
            tokio::time::timeout(Duration::from_millis(50), ticker.tick()).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn multiple_reschedules_are_independent() {
        let mut ticker = Ticker::new();
        ticker.reschedule(Duration::from_millis(5));
        ticker.reschedule(Duration::from_millis(10));
        ticker.reschedule(Duration::from_millis(15));
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_millis(100), ticker.tick())
                .await
                .expect("tick did not arrive");
        }
    }
}
