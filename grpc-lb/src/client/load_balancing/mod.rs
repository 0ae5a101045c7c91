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

use std::{
    error::Error,
    fmt::{self, Debug, Display},
    sync::Arc,
    time::Duration,
};

use serde::de::DeserializeOwned;
use tonic::{Status, metadata::MetadataMap};

use crate::attributes::Attributes;
use crate::client::{
    ConnectivityState,
    name_resolution::{Address, ResolverUpdate},
    service_config::LbConfig,
};
use crate::rt::Runtime;

pub mod pick_first;
mod registry;
#[cfg(test)]
pub(crate) mod test_utils;

pub use registry::{GLOBAL_LB_REGISTRY, LbPolicyRegistry};

/// The request handed to a [`Picker`].  Only the request headers and
/// extensions are visible to LB policies.
pub type Request = tonic::Request<()>;

/// A collection of data configured on the channel that is constructing this
/// LbPolicy.
pub struct LbPolicyOptions {
    /// A hook into the channel's work scheduler that allows the LbPolicy to
    /// request the ability to perform operations on the ChannelController.
    pub work_scheduler: Arc<dyn WorkScheduler>,

    /// The runtime which provides timers and task spawning.
    pub runtime: Arc<dyn Runtime>,

    /// Channel arguments relevant to LB policies.
    pub channel_args: ChannelArgs,
}

/// Channel-level knobs which affect LB policy behavior but are not part of the
/// LB policy's JSON configuration.
#[derive(Debug, Clone, Default)]
pub struct ChannelArgs {
    /// The channel's target, used to label metrics.
    pub target: String,

    /// The Happy Eyeballs Connection Attempt Delay.  Values are clamped to
    /// the range between MIN_CONNECTION_ATTEMPT_DELAY and
    /// MAX_CONNECTION_ATTEMPT_DELAY.  If unset,
    /// DEFAULT_CONNECTION_ATTEMPT_DELAY is used.
    pub happy_eyeballs_connection_attempt_delay: Option<Duration>,

    /// Whether pick_first should gate READY on the selected subchannel's
    /// health watch.
    pub pick_first_enable_health_checking: bool,

    /// Whether pick_first should drop the "failed to connect to all
    /// addresses" prefix from its TRANSIENT_FAILURE status messages.
    pub pick_first_omit_status_message_prefix: bool,
}

pub const DEFAULT_CONNECTION_ATTEMPT_DELAY: Duration = Duration::from_millis(250);
pub const MIN_CONNECTION_ATTEMPT_DELAY: Duration = Duration::from_millis(100);
pub const MAX_CONNECTION_ATTEMPT_DELAY: Duration = Duration::from_millis(2000);

impl ChannelArgs {
    /// Returns the configured connection attempt delay after clamping.
    pub fn connection_attempt_delay(&self) -> Duration {
        self.happy_eyeballs_connection_attempt_delay
            .unwrap_or(DEFAULT_CONNECTION_ATTEMPT_DELAY)
            .clamp(MIN_CONNECTION_ATTEMPT_DELAY, MAX_CONNECTION_ATTEMPT_DELAY)
    }
}

/// Used to asynchronously request a call into the LbPolicy's work method if
/// the LbPolicy needs to provide an update without waiting for an update
/// from the channel first.
pub trait WorkScheduler: Send + Sync {
    // Schedules a call into the LbPolicy's work method.  If there is already a
    // pending work call that has not yet started, this may not schedule another
    // call.
    fn schedule_work(&self);
}

/// Errors produced while parsing an LB policy's JSON configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration is not valid JSON or does not match the policy's
    /// schema.
    #[error("invalid LB policy config: {0}")]
    Json(#[from] serde_json::Error),
    /// LB policy configurations are always JSON objects.
    #[error("LB policy config must be a JSON object, got: {0}")]
    NotAnObject(serde_json::Value),
}

/// A JSON LB policy configuration, as found in the service config, which has
/// not yet been converted into the policy's own representation.
#[derive(Debug, Clone)]
pub struct ParsedJsonLbConfig {
    value: serde_json::Value,
}

impl ParsedJsonLbConfig {
    /// Parses `json` into a ParsedJsonLbConfig.
    pub fn new(json: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            value: serde_json::from_str(json)?,
        })
    }

    pub fn from_value(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Converts the JSON into the LB policy's configuration type.
    pub fn convert_to<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        if !self.value.is_object() {
            return Err(ConfigError::NotAnObject(self.value.clone()));
        }
        Ok(T::deserialize(&self.value)?)
    }
}

/// An LB policy factory that produces LbPolicy instances used by the channel
/// to manage connections and pick connections for RPCs.
pub trait LbPolicyBuilder: Send + Sync {
    /// Builds and returns a new LB policy instance.
    ///
    /// Note that build must not fail.  Any optional configuration is delivered
    /// via the LbPolicy's resolver_update method.
    ///
    /// An LbPolicy instance is assumed to begin in a Connecting state that
    /// queues RPCs until its first update.
    fn build(&self, options: LbPolicyOptions) -> Box<dyn LbPolicy>;

    /// Reports the name of the LB Policy.
    fn name(&self) -> &'static str;

    /// Parses the JSON LB policy configuration into an internal representation.
    ///
    /// LB policies do not need to accept a configuration, in which case the
    /// default implementation returns Ok(None).
    fn parse_config(
        &self,
        _config: &ParsedJsonLbConfig,
    ) -> Result<Option<LbConfig>, Box<dyn Error + Send + Sync>> {
        Ok(None)
    }
}

/// An LB policy instance.
///
/// LB policies are responsible for creating connections (modeled as
/// Subchannels) and producing Picker instances for picking connections for
/// RPCs.
///
/// The channel calls every method serially.  No two calls into the same
/// policy instance ever run concurrently.
pub trait LbPolicy: Send {
    /// Called by the channel when the name resolver produces a new set of
    /// resolved addresses or a new service config.
    ///
    /// An Err return tells the channel the update was not acceptable, and that
    /// the resolver should be asked to re-resolve.  The policy still acts on
    /// the update as best it can.
    fn resolver_update(
        &mut self,
        update: ResolverUpdate,
        config: Option<&LbConfig>,
        channel_controller: &mut dyn ChannelController,
    ) -> Result<(), Status>;

    /// Called by the channel when any subchannel created by the LB policy
    /// changes state.
    fn subchannel_update(
        &mut self,
        subchannel: Arc<dyn Subchannel>,
        state: &SubchannelState,
        channel_controller: &mut dyn ChannelController,
    );

    /// Called by the channel when the health watch started through
    /// [`Subchannel::start_health_watch`] reports a new health state.
    fn subchannel_health_update(
        &mut self,
        _subchannel: Arc<dyn Subchannel>,
        _state: &SubchannelState,
        _channel_controller: &mut dyn ChannelController,
    ) {
    }

    /// Called by the channel in response to a call from the LB policy to the
    /// WorkScheduler's schedule_work method.
    fn work(&mut self, channel_controller: &mut dyn ChannelController);

    /// Called by the channel when an LbPolicy goes idle and the channel
    /// wants it to start connecting to subchannels again.
    fn exit_idle(&mut self, channel_controller: &mut dyn ChannelController);

    /// Resets the connection backoff of every subchannel owned by the policy.
    fn reset_backoff(&mut self) {}

    /// Permanently shuts the policy down, releasing every subchannel.  The
    /// channel must not call any other method afterwards.
    fn shutdown(&mut self) {}
}

/// Controls channel behaviors.
pub trait ChannelController: Send + Sync {
    /// Creates a new subchannel in IDLE state for `address`.  `args` are the
    /// list-wide arguments from the resolver update.
    ///
    /// Returns None if the channel rejects the address, e.g. because it is
    /// malformed.  The channel starts delivering state updates for the
    /// returned subchannel via LbPolicy::subchannel_update.
    fn new_subchannel(
        &mut self,
        address: &Address,
        args: &Attributes,
    ) -> Option<Arc<dyn Subchannel>>;

    /// Provides a new snapshot of the LB policy's state to the channel.
    fn update_picker(&mut self, update: LbState);

    /// Signals the name resolver to attempt to re-resolve addresses.  Typically
    /// used when connections fail, indicating a possible change in the overall
    /// network configuration.
    fn request_resolution(&mut self);
}

/// Represents the current state of a Subchannel.
#[derive(Clone, Debug)]
pub struct SubchannelState {
    /// The connectivity state of the subchannel.  See SubChannel for a
    /// description of the various states and their valid transitions.
    pub connectivity_state: ConnectivityState,
    // Set if connectivity state is TransientFailure to describe the most recent
    // connection error.  None for any other connectivity_state value.
    pub last_connection_error: Option<Status>,
}

impl SubchannelState {
    pub fn new(connectivity_state: ConnectivityState) -> Self {
        Self {
            connectivity_state,
            last_connection_error: None,
        }
    }

    /// Returns a TransientFailure state carrying `error`.
    pub fn transient_failure(error: Status) -> Self {
        Self {
            connectivity_state: ConnectivityState::TransientFailure,
            last_connection_error: Some(error),
        }
    }
}

impl Default for SubchannelState {
    fn default() -> Self {
        Self::new(ConnectivityState::Idle)
    }
}

impl Display for SubchannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connectivity_state: {}", self.connectivity_state)?;
        if let Some(err) = &self.last_connection_error {
            write!(f, ", last_connection_error: {}", err.message())?;
        }
        Ok(())
    }
}

/// A Picker is responsible for deciding what Subchannel to use for any given
/// request.  A Picker is only used once for any RPC.  If pick() returns Queue,
/// the channel will queue the RPC until a new Picker is produced by the
/// LbPolicy, and will call pick() on the new Picker for the request.
///
/// Pickers are always paired with a ConnectivityState which the channel will
/// expose to applications so they can predict what might happens when
/// performing RPCs:
///
/// If the ConnectivityState is Idle, the Picker should ensure connections are
/// initiated by the LbPolicy that produced the Picker, and return a Queue
/// result so the request is attempted the next time a Picker is produced.
///
/// If the ConnectivityState is Connecting, the Picker should return a Queue
/// result and continue to wait for pending connections.
///
/// If the ConnectivityState is Ready, the Picker should return a Ready
/// Subchannel.
///
/// If the ConnectivityState is TransientFailure, the Picker should return an
/// Err with an error that describes why connections are failing.
pub trait Picker: Send + Sync {
    /// Picks a connection to use for the request.
    ///
    /// This function should not block.  If the Picker needs to do blocking or
    /// time-consuming work to service this request, it should return Queue, and
    /// the Pick call will be repeated by the channel when a new Picker is
    /// produced by the LbPolicy.
    fn pick(&self, request: &Request) -> PickResult;
}

pub enum PickResult {
    /// Indicates the Subchannel in the Pick should be used for the request.
    Pick(Pick),
    /// Indicates the LbPolicy is attempting to connect to a server to use for
    /// the request.
    Queue,
    /// Indicates that the request should fail with the included error status
    /// (with the code converted to UNAVAILABLE).  If the RPC is wait-for-ready,
    /// then it will not be terminated, but instead attempted on a new picker if
    /// one is produced before it is cancelled.
    Fail(Status),
}

impl Debug for PickResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pick(pick) => write!(f, "Pick({})", pick.subchannel),
            Self::Queue => write!(f, "Queue"),
            Self::Fail(st) => write!(f, "Fail({st})"),
        }
    }
}

impl Display for PickResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

/// Data provided by the LB policy.
#[derive(Clone)]
pub struct LbState {
    pub connectivity_state: ConnectivityState,
    pub picker: Arc<dyn Picker>,
}

/// A collection of data used by the channel for routing a request.
pub struct Pick {
    /// The Subchannel for the request.
    pub subchannel: Arc<dyn Subchannel>,
    // Metadata to be added to existing outgoing metadata.
    pub metadata: MetadataMap,
}

/// A Subchannel represents a method of communicating with a server which may be
/// connected or disconnected many times across its lifetime.
///
/// - Subchannels start IDLE.
///
/// - IDLE transitions to CONNECTING when connect() is called.
///
/// - CONNECTING transitions to READY on success or TRANSIENT_FAILURE on error.
///
/// - READY transitions to IDLE when the connection is lost.
///
/// - TRANSIENT_FAILURE transitions to IDLE when the reconnect backoff timer
///   has expired.  This timer scales exponentially and is reset when the
///   subchannel becomes READY.
///
/// When the last reference to a Subchannel held by the LB policy is dropped,
/// the channel cancels its state watch, and no subsequent state updates are
/// provided for it to the LB policy.
///
/// Subchannels are compared by identity, never by address: two subchannels
/// for the same address are different subchannels.
pub trait Subchannel: Display + Send + Sync {
    /// Requests a connection attempt.  No-op unless the subchannel is IDLE.
    fn connect(&self);

    /// Resets the reconnect backoff, so the next attempt happens immediately.
    fn reset_backoff(&self) {}

    /// Starts watching the health of this subchannel.  Health states are
    /// delivered through LbPolicy::subchannel_health_update.
    fn start_health_watch(&self) {}

    /// Stops a watch started by start_health_watch.
    fn cancel_health_watch(&self) {}
}

impl PartialEq for dyn Subchannel {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(self, other)
    }
}

impl Eq for dyn Subchannel {}

/// QueuingPicker always returns Queue.  LB policies that are not actively
/// Connecting should not use this picker.
pub struct QueuingPicker {}

impl Picker for QueuingPicker {
    fn pick(&self, _request: &Request) -> PickResult {
        PickResult::Queue
    }
}

/// Failing fails every pick with an UNAVAILABLE status carrying `error`.
pub struct Failing {
    pub error: String,
}

impl Picker for Failing {
    fn pick(&self, _request: &Request) -> PickResult {
        PickResult::Fail(Status::unavailable(self.error.clone()))
    }
}
