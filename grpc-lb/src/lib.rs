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

//! The pick_first load balancing policy for [gRPC] channels.
//!
//! pick_first walks the list of addresses produced by the name resolver,
//! staggering connection attempts as described in [RFC 8305] ("Happy
//! Eyeballs"), and routes every RPC to the first address that connects.
//!
//! The channel drives the policy through the [`LbPolicy`] trait and observes
//! it through the [`ChannelController`] trait.  All calls into a policy are
//! made serially, so the policy itself holds no locks around its state.
//!
//! This version is in progress and not recommended for any production use.  All
//! APIs are unstable.  Proceed at your own risk.
//!
//! [gRPC]: https://grpc.io
//! [RFC 8305]: https://www.rfc-editor.org/rfc/rfc8305
//! [`LbPolicy`]: client::load_balancing::LbPolicy
//! [`ChannelController`]: client::load_balancing::ChannelController

pub mod attributes;
pub mod client;
pub mod rt;
