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

//! Opaque argument bags attached to addresses, endpoints and resolver updates.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

// Values are compared by value so that two bags built independently from the
// same data are equal.
trait AttributeValue: Any + Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn AttributeValue) -> bool;
}

impl<T: Any + Send + Sync + Eq + Debug> AttributeValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn AttributeValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }
}

/// A collection of values indexed by their type.
///
/// `Attributes` is persistent: every mutation returns a new collection and
/// leaves the original untouched, so a bag can be shared between the resolver
/// update it arrived in and every subchannel created from it.
#[derive(Clone, Default, Debug)]
pub struct Attributes {
    map: Arc<BTreeMap<TypeId, Arc<dyn AttributeValue>>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new collection with `value` added, replacing any existing
    /// value of the same type.
    pub fn add<T: Any + Send + Sync + Eq + Debug>(&self, value: T) -> Self {
        let mut map = (*self.map).clone();
        map.insert(TypeId::of::<T>(), Arc::new(value));
        Attributes { map: Arc::new(map) }
    }

    /// Gets a reference to the value of type T, if present.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|v| v.as_any().downcast_ref())
    }

    /// Returns a new collection without the value of type T.
    pub fn remove<T: 'static>(&self) -> Self {
        let mut map = (*self.map).clone();
        map.remove(&TypeId::of::<T>());
        Attributes { map: Arc::new(map) }
    }

    /// Returns a new collection holding the values of both `self` and `other`.
    /// Values from `other` win when both contain the same type.
    pub fn union(&self, other: &Attributes) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        let mut map = (*self.map).clone();
        for (k, v) in other.map.iter() {
            map.insert(*k, v.clone());
        }
        Attributes { map: Arc::new(map) }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl PartialEq for Attributes {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.map, &other.map)
            || (self.map.len() == other.map.len()
                && self
                    .map
                    .iter()
                    .zip(other.map.iter())
                    .all(|((ka, va), (kb, vb))| ka == kb && va.dyn_eq(vb.as_ref())))
    }
}

impl Eq for Attributes {}
