// Copyright 2016 Pierre-Étienne Meunier
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Named algorithm factories, ordered by preference.

use std::borrow::Cow;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// An ordered set of `(name, factory)` pairs. The order is the order
/// in which names are advertised during negotiation, most preferred
/// first.
pub struct Registry<T: ?Sized> {
    entries: Vec<(Cow<'static, str>, Arc<T>)>,
}

impl<T: ?Sized> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Registry {
            entries: self.entries.clone(),
        }
    }
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Registry {
            entries: Vec::new(),
        }
    }
}

impl<T: ?Sized> Debug for Registry<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`. A new name is added with the
    /// lowest preference; an existing name keeps its position and gets
    /// the new factory.
    pub fn register(&mut self, name: impl Into<Cow<'static, str>>, factory: Arc<T>) -> &mut Self {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = factory;
        } else {
            self.entries.push((name, factory));
        }
        self
    }

    /// Moves `name` to the front of the list. Returns `false` if it is
    /// not registered.
    pub fn prefer(&mut self, name: &str) -> bool {
        match self.entries.iter().position(|(n, _)| n == name) {
            Some(i) => {
                let entry = self.entries.remove(i);
                self.entries.insert(0, entry);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<T>> {
        let i = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(i).1)
    }

    /// Keeps only the given names, in the given order. Unknown names
    /// are skipped.
    pub fn restrict_to(&mut self, names: &[&str]) {
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            if let Some(i) = self.entries.iter().position(|(n, _)| n == name) {
                entries.push(self.entries.remove(i));
            }
        }
        self.entries = entries;
    }

    pub fn get(&self, name: &str) -> Option<&Arc<T>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, factory)| factory)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered names, most preferred first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
