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

use std::collections::{HashSet, VecDeque};

use crate::client::name_resolution::{Address, Endpoint};

/// Converts the resolver's endpoints into the ordered list of addresses to
/// attempt.
///
/// Addresses keep the order of their endpoints, with endpoint attributes
/// merged into each address.  Duplicates are dropped, keeping the first
/// occurrence, and the result is interleaved by address family.
pub(super) fn address_list_from_endpoints(endpoints: &[Endpoint]) -> Vec<Address> {
    let mut uniques = HashSet::new();
    let addresses: Vec<Address> = endpoints
        .iter()
        .flat_map(|ep| {
            ep.addresses.iter().map(move |addr| {
                let mut addr = addr.clone();
                addr.attributes = ep.attributes.union(&addr.attributes);
                addr
            })
        })
        .filter(|addr| uniques.insert(addr.clone()))
        .collect();
    interleave_address_families(addresses)
}

/// Interleaves addresses by family as described in RFC 8305 section 4: the
/// first address of each family in order of first appearance, then the second
/// of each, and so on.  Order within a family is preserved.
pub(super) fn interleave_address_families(addresses: Vec<Address>) -> Vec<Address> {
    let total = addresses.len();
    let mut families: Vec<(String, VecDeque<Address>)> = Vec::new();
    for addr in addresses {
        let family = addr.family().to_string();
        match families.iter_mut().find(|(f, _)| *f == family) {
            Some((_, queue)) => queue.push_back(addr),
            None => families.push((family, VecDeque::from([addr]))),
        }
    }
    if families.len() < 2 {
        return families
            .into_iter()
            .flat_map(|(_, queue)| queue)
            .collect();
    }

    let mut interleaved = Vec::with_capacity(total);
    while interleaved.len() < total {
        for (_, queue) in families.iter_mut() {
            if let Some(addr) = queue.pop_front() {
                interleaved.push(addr);
            }
        }
    }
    interleaved
}
