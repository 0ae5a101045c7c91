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

use std::collections::HashSet;
use std::fmt::{Debug, Display};
use std::sync::Arc;

use tokio::sync::mpsc;
use tonic::Status;

use crate::attributes::Attributes;
use crate::client::load_balancing::{
    ChannelController, LbPolicy, LbPolicyBuilder, LbPolicyOptions, LbState, ParsedJsonLbConfig,
    Request, Subchannel, SubchannelState, WorkScheduler,
};
use crate::client::name_resolution::{Address, ResolverUpdate};
use crate::client::service_config::LbConfig;

pub(crate) fn new_request() -> Request {
    Request::new(())
}

// A test subchannel that forwards calls made by the LB policy to a channel.
// This allows tests to verify when a subchannel is asked to connect.
pub(crate) struct TestSubchannel {
    address: Address,
    tx_events: mpsc::UnboundedSender<TestEvent>,
}

impl TestSubchannel {
    pub fn new(address: Address, tx_events: mpsc::UnboundedSender<TestEvent>) -> Self {
        Self { address, tx_events }
    }
}

impl Display for TestSubchannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TestSubchannel({})", self.address)
    }
}

impl Subchannel for TestSubchannel {
    fn connect(&self) {
        tracing::debug!("connect called for subchannel {}", self.address);
        self.tx_events
            .send(TestEvent::Connect(self.address.clone()))
            .unwrap();
    }

    fn reset_backoff(&self) {
        self.tx_events
            .send(TestEvent::ResetBackoff(self.address.clone()))
            .unwrap();
    }

    fn start_health_watch(&self) {
        self.tx_events
            .send(TestEvent::StartHealthWatch(self.address.clone()))
            .unwrap();
    }

    fn cancel_health_watch(&self) {
        self.tx_events
            .send(TestEvent::CancelHealthWatch(self.address.clone()))
            .unwrap();
    }
}

pub(crate) enum TestEvent {
    NewSubchannel(Address, Arc<dyn Subchannel>),
    UpdatePicker(LbState),
    RequestResolution,
    Connect(Address),
    ResetBackoff(Address),
    StartHealthWatch(Address),
    CancelHealthWatch(Address),
    ScheduleWork,
}

impl Debug for TestEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewSubchannel(addr, _) => write!(f, "NewSubchannel({addr})"),
            Self::UpdatePicker(state) => write!(f, "UpdatePicker({})", state.connectivity_state),
            Self::RequestResolution => write!(f, "RequestResolution"),
            Self::Connect(addr) => write!(f, "Connect({addr})"),
            Self::ResetBackoff(addr) => write!(f, "ResetBackoff({addr})"),
            Self::StartHealthWatch(addr) => write!(f, "StartHealthWatch({addr})"),
            Self::CancelHealthWatch(addr) => write!(f, "CancelHealthWatch({addr})"),
            Self::ScheduleWork => write!(f, "ScheduleWork"),
        }
    }
}

impl Display for TestEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// A test channel controller that forwards calls to a channel.  This allows
/// tests to verify when a channel controller is asked to create subchannels or
/// update the picker.
pub(crate) struct TestChannelController {
    pub(crate) tx_events: mpsc::UnboundedSender<TestEvent>,
    // Addresses for which new_subchannel returns None.
    pub(crate) rejected_addresses: HashSet<Address>,
}

impl TestChannelController {
    pub(crate) fn new(tx_events: mpsc::UnboundedSender<TestEvent>) -> Self {
        Self {
            tx_events,
            rejected_addresses: HashSet::new(),
        }
    }
}

impl ChannelController for TestChannelController {
    fn new_subchannel(
        &mut self,
        address: &Address,
        _args: &Attributes,
    ) -> Option<Arc<dyn Subchannel>> {
        if self.rejected_addresses.contains(address) {
            tracing::debug!("rejecting subchannel for address {}", address);
            return None;
        }
        let subchannel: Arc<dyn Subchannel> =
            Arc::new(TestSubchannel::new(address.clone(), self.tx_events.clone()));
        self.tx_events
            .send(TestEvent::NewSubchannel(address.clone(), subchannel.clone()))
            .unwrap();
        Some(subchannel)
    }

    fn update_picker(&mut self, update: LbState) {
        tracing::debug!("picker_update called with {}", update.connectivity_state);
        self.tx_events
            .send(TestEvent::UpdatePicker(update))
            .unwrap();
    }

    fn request_resolution(&mut self) {
        self.tx_events.send(TestEvent::RequestResolution).unwrap();
    }
}

pub(crate) struct TestWorkScheduler {
    pub(crate) tx_events: mpsc::UnboundedSender<TestEvent>,
}

impl WorkScheduler for TestWorkScheduler {
    fn schedule_work(&self) {
        self.tx_events.send(TestEvent::ScheduleWork).unwrap();
    }
}

/// A policy that ignores everything it is given.  Used to exercise the
/// registry without depending on a real policy.
pub(crate) struct StubPolicy {}

impl LbPolicy for StubPolicy {
    fn resolver_update(
        &mut self,
        _update: ResolverUpdate,
        _config: Option<&LbConfig>,
        _channel_controller: &mut dyn ChannelController,
    ) -> Result<(), Status> {
        Ok(())
    }

    fn subchannel_update(
        &mut self,
        _subchannel: Arc<dyn Subchannel>,
        _state: &SubchannelState,
        _channel_controller: &mut dyn ChannelController,
    ) {
    }

    fn exit_idle(&mut self, _channel_controller: &mut dyn ChannelController) {}

    fn work(&mut self, _channel_controller: &mut dyn ChannelController) {}
}

/// Builds StubPolicy under the given name.
pub(crate) struct StubPolicyBuilder {
    name: &'static str,
}

impl StubPolicyBuilder {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl LbPolicyBuilder for StubPolicyBuilder {
    fn build(&self, _options: LbPolicyOptions) -> Box<dyn LbPolicy> {
        Box::new(StubPolicy {})
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn parse_config(
        &self,
        _config: &ParsedJsonLbConfig,
    ) -> Result<Option<LbConfig>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(None)
    }
}
