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

//! The pick_first LB policy.
//!
//! pick_first connects to the addresses from the resolver in order, as
//! described in [gRFC A61] and [gRFC A62], and sends every RPC to the first
//! one that becomes READY.  Connection attempts are staggered following
//! [RFC 8305]: when an attempt has neither failed nor succeeded after the
//! Connection Attempt Delay, the next address is attempted in parallel.
//!
//! While connected, a new resolver update is connected in the background as a
//! pending subchannel list, and only replaces the current connection once one
//! of its subchannels is READY, or once the current connection is lost.
//!
//! [gRFC A61]: https://github.com/grpc/proposal/blob/master/A61-IPv4-IPv6-dualstack-backends.md
//! [gRFC A62]: https://github.com/grpc/proposal/blob/master/A62-pick-first.md
//! [RFC 8305]: https://www.rfc-editor.org/rfc/rfc8305

use std::{
    error::Error,
    sync::{Arc, LazyLock, Once},
};

use parking_lot::Mutex;
use rand::{rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};
use tonic::{Status, metadata::MetadataMap};
use tracing::{debug, trace, warn};

use crate::attributes::Attributes;
use crate::client::{
    ConnectivityState,
    load_balancing::{
        ChannelController, Failing, GLOBAL_LB_REGISTRY, LbPolicy, LbPolicyBuilder,
        LbPolicyOptions, LbState, ParsedJsonLbConfig, Pick, PickResult, Picker, QueuingPicker,
        Request, Subchannel, SubchannelState, WorkScheduler,
    },
    name_resolution::{Address, Endpoint, ResolverUpdate},
    service_config::LbConfig,
};

use self::subchannel_list::{HappyEyeballsTimer, SubchannelList, TimerToken};

mod address_list;
mod subchannel_list;

// A function type that takes a mutable slice of endpoints and shuffles them.
type EndpointShuffler = dyn Fn(&mut [Endpoint]) + Send + Sync + 'static;

// A global shuffler function that can be overridden for testing.
pub static SHUFFLE_ENDPOINTS_FN: LazyLock<Mutex<Box<EndpointShuffler>>> =
    LazyLock::new(|| Mutex::new(thread_rng_shuffler()));

pub(crate) fn thread_rng_shuffler() -> Box<EndpointShuffler> {
    Box::new(|endpoints: &mut [Endpoint]| {
        let mut rng = rng();
        endpoints.shuffle(&mut rng);
    })
}

pub static POLICY_NAME: &str = "pick_first";

const DISCONNECTIONS_METRIC: &str = "grpc.lb.pick_first.disconnections";
const CONNECTION_ATTEMPTS_SUCCEEDED_METRIC: &str =
    "grpc.lb.pick_first.connection_attempts_succeeded";
const CONNECTION_ATTEMPTS_FAILED_METRIC: &str = "grpc.lb.pick_first.connection_attempts_failed";

struct Builder {}

impl LbPolicyBuilder for Builder {
    fn build(&self, options: LbPolicyOptions) -> Box<dyn LbPolicy> {
        let work = Arc::new(WorkRequests::new(options.work_scheduler));
        let delay = options.channel_args.connection_attempt_delay();
        Box::new(PickFirstPolicy {
            timer: HappyEyeballsTimer::new(options.runtime, delay, work.clone()),
            work,
            enable_health_checking: options.channel_args.pick_first_enable_health_checking,
            omit_status_message_prefix: options.channel_args.pick_first_omit_status_message_prefix,
            target: options.channel_args.target,
            latest_update: None,
            subchannel_list: None,
            pending_subchannel_list: None,
            selected: None,
            connectivity_state: ConnectivityState::Connecting,
            next_list_id: 0,
            shutdown: false,
        })
    }

    fn name(&self) -> &'static str {
        POLICY_NAME
    }

    fn parse_config(
        &self,
        config: &ParsedJsonLbConfig,
    ) -> Result<Option<LbConfig>, Box<dyn Error + Send + Sync>> {
        let cfg: PickFirstConfig = config.convert_to()?;
        Ok(Some(LbConfig::new(cfg)))
    }
}

/// The JSON configuration of the pick_first policy.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PickFirstConfig {
    shuffle_address_list: Option<bool>,
}

impl PickFirstConfig {
    /// Whether endpoints are shuffled before the address list is built.
    pub fn shuffle_addresses(&self) -> bool {
        self.shuffle_address_list.unwrap_or(false)
    }
}

pub fn reg() {
    static REGISTER_ONCE: Once = Once::new();
    REGISTER_ONCE.call_once(|| {
        GLOBAL_LB_REGISTRY.add_builder(Builder {});
    });
}

// Work requested from outside the policy's serialized context: by pickers and
// by Connection Attempt Delay timers.  The policy drains it in work().
struct WorkRequests {
    work_scheduler: Arc<dyn WorkScheduler>,
    pending: Mutex<PendingWork>,
}

#[derive(Default)]
struct PendingWork {
    exit_idle: bool,
    fired_timers: Vec<TimerToken>,
}

impl WorkRequests {
    fn new(work_scheduler: Arc<dyn WorkScheduler>) -> Self {
        Self {
            work_scheduler,
            pending: Mutex::default(),
        }
    }

    fn request_exit_idle(&self) {
        self.pending.lock().exit_idle = true;
        self.work_scheduler.schedule_work();
    }

    fn timer_fired(&self, token: TimerToken) {
        self.pending.lock().fired_timers.push(token);
        self.work_scheduler.schedule_work();
    }

    fn take(&self) -> PendingWork {
        std::mem::take(&mut *self.pending.lock())
    }
}

// The most recent resolver update, kept for re-entering from IDLE.
struct UpdateArgs {
    addresses: Result<Vec<Address>, Status>,
    attributes: Attributes,
    resolution_note: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ListKind {
    Current,
    Pending,
}

struct PickFirstPolicy {
    work: Arc<WorkRequests>,
    timer: HappyEyeballsTimer,
    enable_health_checking: bool,
    omit_status_message_prefix: bool,
    target: String,
    latest_update: Option<UpdateArgs>,
    // The list the selected subchannel, if any, belongs to.
    subchannel_list: Option<SubchannelList>,
    // A newer list being connected in the background while a subchannel of
    // subchannel_list is selected.
    pending_subchannel_list: Option<SubchannelList>,
    // Index of the selected subchannel in subchannel_list.
    selected: Option<usize>,
    // The state most recently reported to the channel.
    connectivity_state: ConnectivityState,
    next_list_id: u64,
    shutdown: bool,
}

impl LbPolicy for PickFirstPolicy {
    fn resolver_update(
        &mut self,
        update: ResolverUpdate,
        config: Option<&LbConfig>,
        channel_controller: &mut dyn ChannelController,
    ) -> Result<(), Status> {
        if self.shutdown {
            warn!("ignoring resolver update after shutdown");
            return Ok(());
        }
        let config = match config {
            Some(config) => match config.convert_to::<PickFirstConfig>() {
                Some(cfg) => Some(cfg),
                None => {
                    warn!("received LB config of unexpected type");
                    return Err(Status::invalid_argument(
                        "pick_first received an LB config of unexpected type",
                    ));
                }
            },
            None => None,
        };

        let mut result = Ok(());
        let addresses = match update.endpoints {
            Ok(mut endpoints) => {
                debug!(
                    "received update from resolver with endpoints: {:?}",
                    endpoints
                );
                // Shuffling changes the order of the endpoints but never the
                // order of the addresses within each endpoint.
                if config.is_some_and(|cfg| cfg.shuffle_addresses()) {
                    (SHUFFLE_ENDPOINTS_FN.lock())(endpoints.as_mut_slice());
                }
                let addresses = address_list::address_list_from_endpoints(&endpoints);
                if addresses.is_empty() {
                    result = Err(Status::unavailable("address list must not be empty"));
                }
                Ok(addresses)
            }
            Err(error) => {
                debug!("received error from resolver: {}", error);
                result = Err(Status::unavailable(error.clone()));
                // Keep using the previous addresses, if there were any.
                match self.latest_update.take().map(|args| args.addresses) {
                    Some(Ok(addresses)) => Ok(addresses),
                    _ => Err(Status::unavailable(error)),
                }
            }
        };

        self.latest_update = Some(UpdateArgs {
            addresses,
            attributes: update.attributes,
            resolution_note: update.resolution_note,
        });

        // When idle, connecting waits for exit_idle().
        if !self.is_idle() {
            self.attempt_to_connect_using_latest_update(channel_controller);
        }
        result
    }

    fn subchannel_update(
        &mut self,
        subchannel: Arc<dyn Subchannel>,
        state: &SubchannelState,
        channel_controller: &mut dyn ChannelController,
    ) {
        if self.shutdown {
            return;
        }
        trace!("received update for {}: {}", subchannel, state);
        if state.connectivity_state == ConnectivityState::Shutdown {
            warn!(
                "ignoring unexpected Shutdown state for subchannel {}",
                subchannel
            );
            return;
        }

        let (kind, index) = if let Some(index) = self
            .subchannel_list
            .as_ref()
            .and_then(|list| list.index_of(&subchannel))
        {
            (ListKind::Current, index)
        } else if let Some(index) = self
            .pending_subchannel_list
            .as_ref()
            .and_then(|list| list.index_of(&subchannel))
        {
            (ListKind::Pending, index)
        } else {
            // Updates queued before a list was shut down may still arrive.
            trace!("ignoring update for unknown subchannel {}", subchannel);
            return;
        };
        self.on_connectivity_state_change(kind, index, state, channel_controller);
    }

    fn subchannel_health_update(
        &mut self,
        subchannel: Arc<dyn Subchannel>,
        state: &SubchannelState,
        channel_controller: &mut dyn ChannelController,
    ) {
        if self.shutdown || !self.enable_health_checking {
            return;
        }
        let Some(selected) = self.selected_subchannel().cloned() else {
            return;
        };
        if !Arc::ptr_eq(&selected, &subchannel) {
            trace!("ignoring health update for unselected {}", subchannel);
            return;
        }
        debug!("health watch for {} reported {}", subchannel, state);
        match state.connectivity_state {
            ConnectivityState::Ready => self.update_state(
                ConnectivityState::Ready,
                Arc::new(OneSubchannelPicker { sc: selected }),
                channel_controller,
            ),
            ConnectivityState::Idle => {}
            ConnectivityState::Connecting => self.update_state(
                ConnectivityState::Connecting,
                Arc::new(QueuingPicker {}),
                channel_controller,
            ),
            ConnectivityState::TransientFailure => {
                let msg = format!(
                    "health watch: {}",
                    state
                        .last_connection_error
                        .as_ref()
                        .map_or("unknown error", |st| st.message())
                );
                let note = self
                    .subchannel_list
                    .as_ref()
                    .and_then(|list| list.resolution_note().map(str::to_string));
                self.report_transient_failure(&msg, note.as_deref(), channel_controller);
            }
            ConnectivityState::Shutdown => {
                warn!("ignoring unexpected Shutdown health state for {}", subchannel);
            }
        }
    }

    fn work(&mut self, channel_controller: &mut dyn ChannelController) {
        let PendingWork {
            exit_idle,
            fired_timers,
        } = self.work.take();
        if self.shutdown {
            return;
        }
        for token in fired_timers {
            self.on_timer_fired(token, channel_controller);
        }
        if exit_idle {
            self.exit_idle(channel_controller);
        }
    }

    fn exit_idle(&mut self, channel_controller: &mut dyn ChannelController) {
        if self.shutdown || !self.is_idle() {
            return;
        }
        debug!("exiting idle");
        self.attempt_to_connect_using_latest_update(channel_controller);
    }

    fn reset_backoff(&mut self) {
        if let Some(list) = &self.subchannel_list {
            list.reset_backoff();
        }
        if let Some(list) = &self.pending_subchannel_list {
            list.reset_backoff();
        }
    }

    fn shutdown(&mut self) {
        if self.shutdown {
            return;
        }
        debug!("shutting down");
        self.shutdown = true;
        self.unset_selected_subchannel();
        if let Some(mut list) = self.subchannel_list.take() {
            list.orphan();
        }
        if let Some(mut list) = self.pending_subchannel_list.take() {
            list.orphan();
        }
    }
}

impl Drop for PickFirstPolicy {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl PickFirstPolicy {
    fn is_idle(&self) -> bool {
        self.connectivity_state == ConnectivityState::Idle && self.subchannel_list.is_none()
    }

    fn list_mut(&mut self, kind: ListKind) -> Option<&mut SubchannelList> {
        match kind {
            ListKind::Current => self.subchannel_list.as_mut(),
            ListKind::Pending => self.pending_subchannel_list.as_mut(),
        }
    }

    fn list(&self, kind: ListKind) -> Option<&SubchannelList> {
        match kind {
            ListKind::Current => self.subchannel_list.as_ref(),
            ListKind::Pending => self.pending_subchannel_list.as_ref(),
        }
    }

    fn selected_subchannel(&self) -> Option<&Arc<dyn Subchannel>> {
        self.subchannel_list.as_ref()?.subchannel(self.selected?)
    }

    // Builds a new subchannel list from the latest update.  Without a
    // selected subchannel the new list replaces the current one right away.
    // Otherwise it becomes the pending list, replacing any older pending list.
    fn attempt_to_connect_using_latest_update(
        &mut self,
        channel_controller: &mut dyn ChannelController,
    ) {
        let Some(update) = self.latest_update.as_ref() else {
            return;
        };
        let id = self.next_list_id;
        self.next_list_id += 1;
        let addresses: &[Address] = match &update.addresses {
            Ok(addresses) => addresses,
            Err(_) => &[],
        };
        let new_list = SubchannelList::new(
            id,
            addresses,
            &update.attributes,
            update.resolution_note.clone(),
            channel_controller,
        );

        if new_list.is_empty() {
            let msg = match &update.addresses {
                Ok(_) => "empty address list".to_string(),
                Err(status) => status.message().to_string(),
            };
            let note = update.resolution_note.clone();
            self.unset_selected_subchannel();
            self.replace_subchannel_lists(new_list);
            self.report_transient_failure(&msg, note.as_deref(), channel_controller);
            channel_controller.request_resolution();
            return;
        }

        if self.selected.is_none() {
            self.replace_subchannel_lists(new_list);
            // Stay in TRANSIENT_FAILURE until a subchannel connects.
            if self.connectivity_state != ConnectivityState::TransientFailure {
                self.update_state(
                    ConnectivityState::Connecting,
                    Arc::new(QueuingPicker {}),
                    channel_controller,
                );
            }
            return;
        }

        if let Some(mut old) = self.pending_subchannel_list.replace(new_list) {
            debug!(
                "replacing pending subchannel list {} with {}",
                old.id(),
                id
            );
            old.orphan();
        }
    }

    // Makes `list` the current list, shutting down both existing lists.
    fn replace_subchannel_lists(&mut self, list: SubchannelList) {
        if let Some(mut old) = self.pending_subchannel_list.take() {
            old.orphan();
        }
        if let Some(mut old) = self.subchannel_list.replace(list) {
            old.orphan();
        }
    }

    fn promote_pending_subchannel_list(&mut self) {
        let Some(pending) = self.pending_subchannel_list.take() else {
            return;
        };
        debug!("promoting pending subchannel list {}", pending.id());
        self.unset_selected_subchannel();
        if let Some(mut old) = self.subchannel_list.replace(pending) {
            old.orphan();
        }
    }

    fn unset_selected_subchannel(&mut self) {
        let Some(index) = self.selected.take() else {
            return;
        };
        if !self.enable_health_checking {
            return;
        }
        if let Some(sc) = self
            .subchannel_list
            .as_ref()
            .and_then(|list| list.subchannel(index))
        {
            debug!("cancelling health watch for {}", sc);
            sc.cancel_health_watch();
        }
    }

    fn on_connectivity_state_change(
        &mut self,
        kind: ListKind,
        index: usize,
        state: &SubchannelState,
        channel_controller: &mut dyn ChannelController,
    ) {
        let new_state = state.connectivity_state;
        if kind == ListKind::Current && self.selected == Some(index) {
            if new_state == ConnectivityState::Ready {
                trace!("ignoring duplicate Ready for the selected subchannel");
                return;
            }
            self.on_selected_subchannel_lost(new_state, channel_controller);
            return;
        }

        let Some(list) = self.list_mut(kind) else {
            return;
        };
        let Some(old_state) = list.record_state(index, state) else {
            return;
        };
        if new_state == ConnectivityState::Ready {
            self.select(kind, index, old_state, channel_controller);
            return;
        }
        // The Happy Eyeballs pass starts once the initial state of every
        // subchannel is known.
        if !list.all_subchannels_seen_initial_state() {
            return;
        }
        if old_state.is_none() {
            self.start_connecting_next_subchannel(kind, channel_controller);
            return;
        }

        match new_state {
            ConnectivityState::TransientFailure => {
                self.on_transient_failure(kind, index, channel_controller);
            }
            ConnectivityState::Idle => {
                // After the pass, subchannels are retried as soon as their
                // backoff expires.
                if list.is_happy_eyeballs_pass_complete() {
                    list.request_connection(index);
                }
            }
            ConnectivityState::Connecting => {
                if kind == ListKind::Current
                    && self.connectivity_state != ConnectivityState::TransientFailure
                {
                    self.update_state(
                        ConnectivityState::Connecting,
                        Arc::new(QueuingPicker {}),
                        channel_controller,
                    );
                }
            }
            ConnectivityState::Ready | ConnectivityState::Shutdown => {}
        }
    }

    fn on_transient_failure(
        &mut self,
        kind: ListKind,
        index: usize,
        channel_controller: &mut dyn ChannelController,
    ) {
        metrics::counter!(CONNECTION_ATTEMPTS_FAILED_METRIC, "grpc.target" => self.target.clone())
            .increment(1);
        let omit_prefix = self.omit_status_message_prefix;
        let Some(list) = self.list_mut(kind) else {
            return;
        };

        if list.note_transient_failure(index) {
            if list.advance_past(index) {
                self.start_connecting_next_subchannel(kind, channel_controller);
            } else {
                self.maybe_finish_happy_eyeballs_pass(kind, channel_controller);
            }
            return;
        }

        if !list.is_happy_eyeballs_pass_complete() || !list.count_failure_after_pass() {
            return;
        }
        // Only the current list reports, once per len() failures, so the
        // channel sees an up-to-date error without a picker per failure.
        if kind == ListKind::Current {
            let msg = all_addresses_failed_message(omit_prefix, list.last_failure());
            let note = list.resolution_note().map(str::to_string);
            self.report_transient_failure(&msg, note.as_deref(), channel_controller);
            channel_controller.request_resolution();
        }
    }

    fn start_connecting_next_subchannel(
        &mut self,
        kind: ListKind,
        channel_controller: &mut dyn ChannelController,
    ) {
        let list = match kind {
            ListKind::Current => self.subchannel_list.as_mut(),
            ListKind::Pending => self.pending_subchannel_list.as_mut(),
        };
        let Some(list) = list else {
            return;
        };
        if !list.start_connecting_next_subchannel(&self.timer) {
            self.maybe_finish_happy_eyeballs_pass(kind, channel_controller);
        }
    }

    fn maybe_finish_happy_eyeballs_pass(
        &mut self,
        kind: ListKind,
        channel_controller: &mut dyn ChannelController,
    ) {
        if !self
            .list(kind)
            .is_some_and(|list| list.is_happy_eyeballs_pass_complete())
        {
            return;
        }
        if kind == ListKind::Pending {
            // A pending list that failed entirely is better than a current
            // connection to addresses the resolver no longer returns.
            self.promote_pending_subchannel_list();
        }
        let Some(list) = self.subchannel_list.as_ref() else {
            return;
        };
        debug!(
            "subchannel list {} failed to connect to all addresses",
            list.id()
        );
        let msg = all_addresses_failed_message(self.omit_status_message_prefix, list.last_failure());
        let note = list.resolution_note().map(str::to_string);
        self.report_transient_failure(&msg, note.as_deref(), channel_controller);
        channel_controller.request_resolution();
        if let Some(list) = self.subchannel_list.as_ref() {
            list.request_connection_for_idle_subchannels();
        }
    }

    fn select(
        &mut self,
        kind: ListKind,
        index: usize,
        old_state: Option<ConnectivityState>,
        channel_controller: &mut dyn ChannelController,
    ) {
        if let Some(list) = self.list_mut(kind) {
            list.cancel_timer();
        }
        if kind == ListKind::Pending {
            self.promote_pending_subchannel_list();
        } else {
            self.unset_selected_subchannel();
        }
        let Some(list) = self.subchannel_list.as_mut() else {
            return;
        };
        let Some(sc) = list.subchannel(index).cloned() else {
            return;
        };
        debug!("selected subchannel {} from list {}", sc, list.id());
        list.shutdown_all_except(index);
        self.selected = Some(index);
        if old_state == Some(ConnectivityState::Connecting) {
            metrics::counter!(CONNECTION_ATTEMPTS_SUCCEEDED_METRIC, "grpc.target" => self.target.clone())
                .increment(1);
        }

        if self.enable_health_checking {
            debug!("starting health watch for {}", sc);
            sc.start_health_watch();
            return;
        }
        self.update_state(
            ConnectivityState::Ready,
            Arc::new(OneSubchannelPicker { sc }),
            channel_controller,
        );
    }

    // Any state other than Ready for the selected subchannel means the
    // connection was lost.
    fn on_selected_subchannel_lost(
        &mut self,
        new_state: ConnectivityState,
        channel_controller: &mut dyn ChannelController,
    ) {
        debug!("selected subchannel reported {}, connection lost", new_state);
        metrics::counter!(DISCONNECTIONS_METRIC, "grpc.target" => self.target.clone())
            .increment(1);

        if self.pending_subchannel_list.is_none() {
            self.unset_selected_subchannel();
            if let Some(mut list) = self.subchannel_list.take() {
                list.orphan();
            }
            self.update_state(
                ConnectivityState::Idle,
                Arc::new(IdlePicker {
                    work: self.work.clone(),
                }),
                channel_controller,
            );
            channel_controller.request_resolution();
            return;
        }

        self.promote_pending_subchannel_list();
        let Some(list) = self.subchannel_list.as_ref() else {
            return;
        };
        if list.is_happy_eyeballs_pass_complete() {
            let msg = format!(
                "selected subchannel failed; switching to pending update; last failure: {}",
                list.last_failure().map_or("unknown error", |st| st.message())
            );
            let note = list.resolution_note().map(str::to_string);
            self.report_transient_failure(&msg, note.as_deref(), channel_controller);
        } else {
            self.update_state(
                ConnectivityState::Connecting,
                Arc::new(QueuingPicker {}),
                channel_controller,
            );
        }
        channel_controller.request_resolution();
    }

    fn on_timer_fired(&mut self, token: TimerToken, channel_controller: &mut dyn ChannelController) {
        let kind = if self
            .subchannel_list
            .as_ref()
            .is_some_and(|list| list.id() == token.list_id)
        {
            ListKind::Current
        } else if self
            .pending_subchannel_list
            .as_ref()
            .is_some_and(|list| list.id() == token.list_id)
        {
            ListKind::Pending
        } else {
            trace!("ignoring timer for shut down subchannel list {}", token.list_id);
            return;
        };
        if kind == ListKind::Current && self.selected.is_some() {
            return;
        }
        let Some(list) = self.list_mut(kind) else {
            return;
        };
        if list.on_timer_fired(token) {
            self.start_connecting_next_subchannel(kind, channel_controller);
        }
    }

    fn report_transient_failure(
        &mut self,
        msg: &str,
        resolution_note: Option<&str>,
        channel_controller: &mut dyn ChannelController,
    ) {
        let error = match resolution_note {
            Some(note) if !note.is_empty() => format!("{msg} ({note})"),
            _ => msg.to_string(),
        };
        self.update_state(
            ConnectivityState::TransientFailure,
            Arc::new(Failing { error }),
            channel_controller,
        );
    }

    fn update_state(
        &mut self,
        state: ConnectivityState,
        picker: Arc<dyn Picker>,
        channel_controller: &mut dyn ChannelController,
    ) {
        debug!("reporting connectivity state {}", state);
        self.connectivity_state = state;
        channel_controller.update_picker(LbState {
            connectivity_state: state,
            picker,
        });
    }
}

fn all_addresses_failed_message(omit_prefix: bool, last_failure: Option<&Status>) -> String {
    let last_error = last_failure.map_or("unknown error", |st| st.message());
    if omit_prefix {
        return last_error.to_string();
    }
    format!("failed to connect to all addresses; last error: {last_error}")
}

struct OneSubchannelPicker {
    sc: Arc<dyn Subchannel>,
}

impl Picker for OneSubchannelPicker {
    fn pick(&self, _request: &Request) -> PickResult {
        PickResult::Pick(Pick {
            subchannel: self.sc.clone(),
            metadata: MetadataMap::new(),
        })
    }
}

// A picker that always queues picks and asks the policy to leave IDLE.  This
// triggers the LB policy to start connecting from the first address.
struct IdlePicker {
    work: Arc<WorkRequests>,
}

impl Picker for IdlePicker {
    fn pick(&self, _request: &Request) -> PickResult {
        self.work.request_exit_idle();
        PickResult::Queue
    }
}
