// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2026 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Test support for bus handlers.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

/// Shared, clonable call log for stub handlers.
///
/// Handlers push a line per received call; assertions drain the log with
/// [`RecordingLog::take`].
#[derive(Clone, Default)]
pub struct RecordingLog {
    entries: Rc<RefCell<Vec<String>>>,
}

impl RecordingLog {
    /// Creates a new empty [`RecordingLog`] instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one entry.
    pub fn push(&self, entry: String) {
        self.entries.borrow_mut().push(entry);
    }

    /// Returns and clears the recorded entries.
    #[must_use]
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut self.entries.borrow_mut())
    }

    /// Returns the number of recorded entries without clearing.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Returns whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

/// Shared call-count flag for handlers that only need to prove they ran.
#[derive(Clone, Default)]
pub struct CallCheck {
    calls: Rc<Cell<usize>>,
}

impl CallCheck {
    /// Creates a new [`CallCheck`] instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one call.
    pub fn mark(&self) {
        self.calls.set(self.calls.get() + 1);
    }

    /// Returns whether at least one call was recorded.
    #[must_use]
    pub fn was_called(&self) -> bool {
        self.calls.get() > 0
    }

    /// Returns the recorded call count.
    #[must_use]
    pub fn count(&self) -> usize {
        self.calls.get()
    }
}
