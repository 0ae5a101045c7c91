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

//! The output of name resolution, as consumed by LB policies.
//!
//! Name Resolution is the process by which a channel's target is converted into
//! network addresses (typically IP addresses) used by the channel to connect to
//! a service.  Resolvers themselves live outside this crate; only the data they
//! hand to the LB policy is modelled here.

use std::{
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
    net::{IpAddr, SocketAddr},
};

use crate::attributes::Attributes;

/// ResolverUpdate contains the current Resolver state relevant to the
/// channel.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ResolverUpdate {
    /// Attributes contains arbitrary data about the resolver intended for
    /// consumption by the load balancing policy.  They are passed to the
    /// channel as the list-wide arguments of every subchannel the policy
    /// creates.
    pub attributes: Attributes,

    /// A list of endpoints which each identify a logical host serving the
    /// service indicated by the target URI, or the error the resolver hit
    /// while producing them.
    pub endpoints: Result<Vec<Endpoint>, String>,

    /// An optional human-readable note describing context about the
    /// resolution, to be passed along to the LB policy for inclusion in
    /// RPC failure status messages.  For example, a resolver that returns an
    /// empty endpoint list may set this to something like "no DNS entries
    /// found for <name>".
    pub resolution_note: Option<String>,
}

impl Default for ResolverUpdate {
    fn default() -> Self {
        ResolverUpdate {
            attributes: Default::default(),
            endpoints: Ok(Default::default()),
            resolution_note: Default::default(),
        }
    }
}

/// An Endpoint is an address or a collection of addresses which reference one
/// logical server.  Multiple addresses may be used if there are multiple ways
/// which the server can be reached, e.g. via IPv4 and IPv6 addresses.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Endpoint {
    /// Addresses contains a list of addresses used to access this endpoint.
    pub addresses: Vec<Address>,

    /// Attributes contains arbitrary data about this endpoint intended for
    /// consumption by the LB policy.
    pub attributes: Attributes,
}

impl Endpoint {
    pub fn new(addresses: Vec<Address>) -> Self {
        Endpoint {
            addresses,
            ..Default::default()
        }
    }
}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addresses.hash(state);
    }
}

/// An Address is an identifier that indicates how to connect to a server.
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct Address {
    /// The network type is used to identify what kind of transport to create
    /// when connecting to this address.  Typically TCP_IP_NETWORK_TYPE.
    pub network_type: &'static str,

    /// The address itself is passed to the transport in order to create a
    /// connection to it.
    pub address: String,

    /// Attributes contains arbitrary data about this address intended for
    /// consumption by the subchannel.
    pub attributes: Attributes,
}

impl Address {
    /// Creates a TCP/IP address.
    pub fn new(address: impl Into<String>) -> Self {
        Address {
            network_type: TCP_IP_NETWORK_TYPE,
            address: address.into(),
            attributes: Attributes::default(),
        }
    }

    /// Returns the address family used when interleaving addresses as
    /// described in RFC 8305 section 4.
    ///
    /// IP literals map to "ipv4" or "ipv6".  Addresses of the form
    /// `scheme:rest` map to their scheme, unless `rest` is a port number.
    /// Everything else is "other".
    pub fn family(&self) -> &str {
        if let Ok(addr) = self.address.parse::<SocketAddr>() {
            return if addr.is_ipv4() { "ipv4" } else { "ipv6" };
        }
        if let Ok(ip) = self.address.parse::<IpAddr>() {
            return if ip.is_ipv4() { "ipv4" } else { "ipv6" };
        }
        match self.address.split_once(':') {
            Some((scheme, rest))
                if !scheme.is_empty()
                    && !rest.chars().all(|c| c.is_ascii_digit())
                    && scheme
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-') =>
            {
                scheme
            }
            _ => "other",
        }
    }
}

impl Eq for Address {}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.network_type == other.network_type && self.address == other.address
    }
}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.network_type.hash(state);
        self.address.hash(state);
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.network_type, self.address)
    }
}

/// Indicates the address is an IPv4 or IPv6 address that should be connected to
/// via TCP/IP.
pub static TCP_IP_NETWORK_TYPE: &str = "tcp";
