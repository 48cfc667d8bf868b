// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::VecDeque;

use futures::channel::mpsc::UnboundedReceiver;
use futures::StreamExt;
use log::debug;

use crate::controller::Event;
use crate::controller::Scsis;

/// Feeds `events` to `scsis` one at a time until the stream closes, then hands the logical unit
/// back.
///
/// Commands arriving while a descriptor fetch is pending are queued and replayed once the logical
/// unit is idle again.
pub async fn run_worker<C: Clone>(
    mut scsis: Scsis<C>,
    mut events: UnboundedReceiver<Event>,
) -> Scsis<C> {
    let mut pending = VecDeque::new();
    while let Some(event) = events.next().await {
        match event {
            Event::Command { .. } if !scsis.is_idle() => {
                debug!("SCSI: queueing command while {:?}", scsis.state());
                pending.push_back(event);
                continue;
            }
            event => scsis.handle_event(event),
        }
        while scsis.is_idle() {
            match pending.pop_front() {
                Some(event) => scsis.handle_event(event),
                None => break,
            }
        }
    }
    scsis
}
