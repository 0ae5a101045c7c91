/*
 *
 * Copyright 2025 gRPC authors.
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to
 * deal in the Software without restriction, including without limitation the
 * rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
 * sell copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
 * IN THE SOFTWARE.
 *
 */

//! The subchannel list built from one resolver update, and the Happy Eyeballs
//! scheduler that walks it.

use std::sync::Arc;
use std::time::Duration;

use tonic::Status;
use tracing::{debug, trace, warn};

use super::WorkRequests;
use crate::attributes::Attributes;
use crate::client::ConnectivityState;
use crate::client::load_balancing::{ChannelController, Subchannel, SubchannelState};
use crate::client::name_resolution::Address;
use crate::rt::{BoxedTaskHandle, Runtime};

/// Identifies one arming of the Connection Attempt Delay timer of one list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct TimerToken {
    pub(super) list_id: u64,
    seq: u64,
}

/// Arms Connection Attempt Delay timers.
///
/// Timers never touch the policy: when one fires it queues its token and asks
/// the channel for a call into the policy's work method.
pub(super) struct HappyEyeballsTimer {
    runtime: Arc<dyn Runtime>,
    delay: Duration,
    work: Arc<WorkRequests>,
}

impl HappyEyeballsTimer {
    pub(super) fn new(runtime: Arc<dyn Runtime>, delay: Duration, work: Arc<WorkRequests>) -> Self {
        Self {
            runtime,
            delay,
            work,
        }
    }

    fn start(&self, token: TimerToken) -> BoxedTaskHandle {
        let sleep = self.runtime.sleep(self.delay);
        let work = self.work.clone();
        self.runtime.spawn(Box::pin(async move {
            sleep.await;
            work.timer_fired(token);
        }))
    }
}

struct PendingTimer {
    token: TimerToken,
    handle: BoxedTaskHandle,
}

// Data tracked for each subchannel in the subchannel list.
pub(super) struct SubchannelData {
    // None once shut down.
    subchannel: Option<Arc<dyn Subchannel>>,
    index: usize,
    // None until the first notification arrives.
    connectivity_state: Option<ConnectivityState>,
    status: Option<Status>,
    seen_transient_failure: bool,
}

impl SubchannelData {
    fn new(index: usize, subchannel: Arc<dyn Subchannel>) -> Self {
        Self {
            subchannel: Some(subchannel),
            index,
            connectivity_state: None,
            status: None,
            seen_transient_failure: false,
        }
    }

    fn is(&self, sc: &Arc<dyn Subchannel>) -> bool {
        self.subchannel.as_ref().is_some_and(|s| s == sc)
    }

    fn request_connection(&self) {
        if let Some(sc) = &self.subchannel {
            sc.connect();
        }
    }

    fn reset_backoff(&self) {
        if let Some(sc) = &self.subchannel {
            sc.reset_backoff();
        }
    }

    // Releases the subchannel, which cancels the channel's watch for it.
    fn shutdown(&mut self) {
        if let Some(sc) = self.subchannel.take() {
            trace!("index {}: shutting down subchannel {}", self.index, sc);
        }
    }
}

// A list of subchannels created from one address list from the resolver.
//
// The list tracks the state of each subchannel, and drives the Happy Eyeballs
// pass: addresses are attempted strictly in order, with the next attempt
// starting either when the current one fails or when the Connection Attempt
// Delay timer fires, whichever comes first.  Once every subchannel has failed
// at least once, the pass is complete and every subchannel is retried as soon
// as it becomes IDLE.
pub(super) struct SubchannelList {
    id: u64,
    subchannels: Vec<SubchannelData>,
    resolution_note: Option<String>,
    shutting_down: bool,
    num_initial_notifications_seen: usize,
    // Index of the subchannel being attempted during the Happy Eyeballs pass.
    // Equal to len() once the pass has visited every subchannel.
    attempting_index: usize,
    timer: Option<PendingTimer>,
    timer_seq: u64,
    // Failures seen after the Happy Eyeballs pass completed.
    num_failures: usize,
    last_failure: Option<Status>,
}

impl SubchannelList {
    /// Creates one subchannel per address.  Addresses rejected by the channel
    /// are skipped.
    pub(super) fn new(
        id: u64,
        addresses: &[Address],
        args: &Attributes,
        resolution_note: Option<String>,
        channel_controller: &mut dyn ChannelController,
    ) -> Self {
        let mut subchannels = Vec::with_capacity(addresses.len());
        for address in addresses {
            let Some(sc) = channel_controller.new_subchannel(address, args) else {
                debug!(
                    "subchannel list {}: could not create subchannel for address {}, ignoring",
                    id, address
                );
                continue;
            };
            trace!(
                "subchannel list {} index {}: created subchannel {} for address {}",
                id,
                subchannels.len(),
                sc,
                address
            );
            subchannels.push(SubchannelData::new(subchannels.len(), sc));
        }
        debug!(
            "created subchannel list {} with {} subchannels",
            id,
            subchannels.len()
        );
        Self {
            id,
            subchannels,
            resolution_note,
            shutting_down: false,
            num_initial_notifications_seen: 0,
            attempting_index: 0,
            timer: None,
            timer_seq: 0,
            num_failures: 0,
            last_failure: None,
        }
    }

    pub(super) fn id(&self) -> u64 {
        self.id
    }

    pub(super) fn len(&self) -> usize {
        self.subchannels.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.subchannels.is_empty()
    }

    pub(super) fn resolution_note(&self) -> Option<&str> {
        self.resolution_note.as_deref()
    }

    pub(super) fn last_failure(&self) -> Option<&Status> {
        self.last_failure.as_ref()
    }

    /// Returns the index of `sc`, if it is still owned by this list.
    pub(super) fn index_of(&self, sc: &Arc<dyn Subchannel>) -> Option<usize> {
        if self.shutting_down {
            return None;
        }
        self.subchannels.iter().position(|sd| sd.is(sc))
    }

    pub(super) fn subchannel(&self, index: usize) -> Option<&Arc<dyn Subchannel>> {
        self.subchannels.get(index)?.subchannel.as_ref()
    }

    /// Records a connectivity state notification for the subchannel at
    /// `index`.
    ///
    /// Returns the previous state (None for the first notification), or None
    /// if the notification must be ignored: the list is shutting down or the
    /// state did not change.
    pub(super) fn record_state(
        &mut self,
        index: usize,
        state: &SubchannelState,
    ) -> Option<Option<ConnectivityState>> {
        if self.shutting_down {
            return None;
        }
        let len = self.len();
        let sd = self.subchannels.get_mut(index)?;
        let new_state = state.connectivity_state;
        let old_state = sd.connectivity_state;
        trace!(
            "subchannel list {} index {} of {}: connectivity changed: old_state={:?}, new_state={}, seen_transient_failure={}",
            self.id,
            index,
            len,
            old_state,
            new_state,
            sd.seen_transient_failure
        );
        if old_state == Some(new_state) {
            return None;
        }
        sd.connectivity_state = Some(new_state);
        sd.status = state.last_connection_error.clone();
        if new_state == ConnectivityState::TransientFailure {
            self.last_failure = Some(
                sd.status
                    .clone()
                    .unwrap_or_else(|| Status::unavailable("connection attempt failed")),
            );
        }
        if old_state.is_none() {
            self.num_initial_notifications_seen += 1;
        }
        Some(old_state)
    }

    pub(super) fn all_subchannels_seen_initial_state(&self) -> bool {
        self.num_initial_notifications_seen == self.subchannels.len()
    }

    /// Reports whether every subchannel has failed at least once since the
    /// list was created.  Checking attempting_index first only avoids the
    /// scan while the pass is obviously still in progress.
    pub(super) fn is_happy_eyeballs_pass_complete(&self) -> bool {
        if self.attempting_index < self.subchannels.len() {
            return false;
        }
        self.subchannels.iter().all(|sd| sd.seen_transient_failure)
    }

    /// Marks the subchannel at `index` as having failed.  Returns true if this
    /// is its first failure.
    pub(super) fn note_transient_failure(&mut self, index: usize) -> bool {
        match self.subchannels.get_mut(index) {
            Some(sd) => !std::mem::replace(&mut sd.seen_transient_failure, true),
            None => false,
        }
    }

    /// If `index` is the subchannel being attempted, cancels its timer and
    /// moves the cursor past it.  Returns whether the cursor moved.
    pub(super) fn advance_past(&mut self, index: usize) -> bool {
        if index != self.attempting_index {
            return false;
        }
        self.cancel_timer();
        self.attempting_index += 1;
        true
    }

    /// Counts a failure seen after the Happy Eyeballs pass.  Returns true
    /// every len() failures, when the failure should be surfaced again.
    pub(super) fn count_failure_after_pass(&mut self) -> bool {
        self.num_failures += 1;
        self.num_failures % self.subchannels.len() == 0
    }

    /// Scans forward from attempting_index for the first subchannel not in
    /// TRANSIENT_FAILURE and starts a connection attempt on it.  Subchannels
    /// skipped along the way are marked as having failed.
    ///
    /// Returns false if no subchannel was left to attempt, in which case the
    /// caller must check whether the pass is complete.
    pub(super) fn start_connecting_next_subchannel(&mut self, timer: &HappyEyeballsTimer) -> bool {
        while self.attempting_index < self.subchannels.len() {
            let sd = &mut self.subchannels[self.attempting_index];
            if sd.connectivity_state != Some(ConnectivityState::TransientFailure) {
                self.request_connection_with_timer(self.attempting_index, timer);
                return true;
            }
            sd.seen_transient_failure = true;
            self.attempting_index += 1;
        }
        false
    }

    fn request_connection_with_timer(&mut self, index: usize, timer: &HappyEyeballsTimer) {
        let sd = &self.subchannels[index];
        match sd.connectivity_state {
            Some(ConnectivityState::Idle) => sd.request_connection(),
            Some(ConnectivityState::Connecting) => {}
            other => {
                warn!(
                    "subchannel list {} index {}: unexpected state {:?} when starting a connection attempt",
                    self.id, index, other
                );
                debug_assert!(false, "unexpected state {other:?} for connection attempt");
            }
        }
        // The last subchannel has nothing to fall back to.
        if index + 1 == self.subchannels.len() {
            return;
        }
        self.cancel_timer();
        self.timer_seq += 1;
        let token = TimerToken {
            list_id: self.id,
            seq: self.timer_seq,
        };
        debug!(
            "subchannel list {}: starting Connection Attempt Delay timer for {:?} for index {}",
            self.id, timer.delay, index
        );
        self.timer = Some(PendingTimer {
            token,
            handle: timer.start(token),
        });
    }

    /// Handles a fired Connection Attempt Delay timer.  Returns true if the
    /// cursor moved and the next subchannel should be attempted, false if the
    /// timer was cancelled or superseded after it fired.
    pub(super) fn on_timer_fired(&mut self, token: TimerToken) -> bool {
        if self.shutting_down || self.timer.as_ref().map(|t| t.token) != Some(token) {
            trace!(
                "subchannel list {}: ignoring stale Connection Attempt Delay timer",
                self.id
            );
            return false;
        }
        self.timer = None;
        debug!(
            "subchannel list {}: Connection Attempt Delay timer fired for index {}",
            self.id, self.attempting_index
        );
        self.attempting_index += 1;
        true
    }

    pub(super) fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }

    pub(super) fn request_connection(&self, index: usize) {
        if let Some(sd) = self.subchannels.get(index) {
            sd.request_connection();
        }
    }

    /// Starts a connection attempt on every subchannel currently IDLE.
    pub(super) fn request_connection_for_idle_subchannels(&self) {
        for sd in &self.subchannels {
            if sd.connectivity_state == Some(ConnectivityState::Idle) {
                sd.request_connection();
            }
        }
    }

    /// Shuts down every subchannel except the one at `index`.
    pub(super) fn shutdown_all_except(&mut self, index: usize) {
        for sd in self.subchannels.iter_mut().filter(|sd| sd.index != index) {
            sd.shutdown();
        }
    }

    pub(super) fn reset_backoff(&self) {
        for sd in &self.subchannels {
            sd.reset_backoff();
        }
    }

    /// Shuts the list down.  Notifications already queued for its subchannels
    /// are ignored afterwards.
    pub(super) fn orphan(&mut self) {
        debug!("shutting down subchannel list {}", self.id);
        debug_assert!(!self.shutting_down, "subchannel list orphaned twice");
        self.shutting_down = true;
        for sd in &mut self.subchannels {
            sd.shutdown();
        }
        self.cancel_timer();
    }
}

impl Drop for SubchannelList {
    fn drop(&mut self) {
        if !self.shutting_down {
            self.orphan();
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::client::load_balancing::test_utils::{
        TestChannelController, TestEvent, TestWorkScheduler,
    };
    use crate::rt::tokio::TokioRuntime;

    fn new_list(
        n: usize,
    ) -> (
        SubchannelList,
        HappyEyeballsTimer,
        mpsc::UnboundedReceiver<TestEvent>,
    ) {
        let (tx_events, mut rx_events) = mpsc::unbounded_channel();
        let mut tcc = TestChannelController::new(tx_events.clone());
        let addresses: Vec<Address> = (0..n)
            .map(|i| Address::new(format!("{i}.{i}.{i}.{i}:{i}")))
            .collect();
        let list = SubchannelList::new(7, &addresses, &Attributes::new(), None, &mut tcc);
        for _ in 0..n {
            assert!(matches!(
                rx_events.try_recv(),
                Ok(TestEvent::NewSubchannel(..))
            ));
        }
        let work = Arc::new(WorkRequests::new(Arc::new(TestWorkScheduler { tx_events })));
        let timer = HappyEyeballsTimer::new(
            Arc::new(TokioRuntime::default()),
            Duration::from_millis(250),
            work,
        );
        (list, timer, rx_events)
    }

    fn report(list: &mut SubchannelList, index: usize, state: ConnectivityState) {
        let state = match state {
            ConnectivityState::TransientFailure => {
                SubchannelState::transient_failure(Status::unavailable("failed"))
            }
            other => SubchannelState::new(other),
        };
        list.record_state(index, &state);
    }

    #[tokio::test(start_paused = true)]
    async fn record_state_counts_initial_notifications_and_drops_duplicates() {
        let (mut list, _timer, _rx_events) = new_list(2);
        assert!(!list.all_subchannels_seen_initial_state());

        let idle = SubchannelState::new(ConnectivityState::Idle);
        assert_eq!(list.record_state(0, &idle), Some(None));
        assert_eq!(list.record_state(0, &idle), None);
        assert!(!list.all_subchannels_seen_initial_state());
        assert_eq!(list.record_state(1, &idle), Some(None));
        assert!(list.all_subchannels_seen_initial_state());

        let connecting = SubchannelState::new(ConnectivityState::Connecting);
        assert_eq!(
            list.record_state(1, &connecting),
            Some(Some(ConnectivityState::Idle))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pass_completes_only_after_every_subchannel_failed() {
        let (mut list, timer, mut rx_events) = new_list(2);
        report(&mut list, 0, ConnectivityState::Idle);
        report(&mut list, 1, ConnectivityState::Idle);

        assert!(list.start_connecting_next_subchannel(&timer));
        assert!(matches!(rx_events.try_recv(), Ok(TestEvent::Connect(_))));

        report(&mut list, 0, ConnectivityState::TransientFailure);
        assert!(list.note_transient_failure(0));
        assert!(!list.note_transient_failure(0));
        assert!(list.advance_past(0));
        assert!(!list.is_happy_eyeballs_pass_complete());

        assert!(list.start_connecting_next_subchannel(&timer));
        report(&mut list, 1, ConnectivityState::TransientFailure);
        assert!(list.note_transient_failure(1));
        assert!(list.advance_past(1));
        assert!(!list.start_connecting_next_subchannel(&timer));
        assert!(list.is_happy_eyeballs_pass_complete());
        assert_eq!(list.last_failure().unwrap().message(), "failed");
    }

    #[tokio::test(start_paused = true)]
    async fn scan_skips_subchannels_in_transient_failure() {
        let (mut list, timer, mut rx_events) = new_list(3);
        report(&mut list, 0, ConnectivityState::TransientFailure);
        report(&mut list, 1, ConnectivityState::TransientFailure);
        report(&mut list, 2, ConnectivityState::Idle);

        assert!(list.start_connecting_next_subchannel(&timer));
        match rx_events.try_recv() {
            Ok(TestEvent::Connect(addr)) => assert_eq!(addr, Address::new("2.2.2.2:2")),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(list.subchannels[0].seen_transient_failure);
        assert!(list.subchannels[1].seen_transient_failure);
        assert!(!list.is_happy_eyeballs_pass_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn orphan_releases_subchannels_and_ignores_notifications() {
        let (mut list, _timer, _rx_events) = new_list(2);
        let sc = list.subchannel(0).unwrap().clone();
        assert_eq!(list.index_of(&sc), Some(0));

        list.orphan();
        assert!(list.subchannel(0).is_none());
        assert_eq!(list.index_of(&sc), None);
        assert_eq!(
            list.record_state(0, &SubchannelState::new(ConnectivityState::Connecting)),
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failures_after_pass_are_surfaced_every_len_failures() {
        let (mut list, _timer, _rx_events) = new_list(3);
        assert!(!list.count_failure_after_pass());
        assert!(!list.count_failure_after_pass());
        assert!(list.count_failure_after_pass());
        assert!(!list.count_failure_after_pass());
    }
}
