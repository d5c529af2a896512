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

//! Traversal error reporting.
//!
//! Data errors (unknown type ids, mismatched container elements, failed
//! reservations) are expected when loading foreign documents. They are
//! reported through an [`ErrorHandler`] carried along the traversal: each
//! message is prefixed with the current reflection stack so the offending
//! path is readable, counted, and emitted through the `log` channel. The
//! traversal itself continues wherever a local skip is possible.

use std::fmt::{Display, Write};

use ustr::Ustr;
use velcro_core::TypeUuid;

/// One frame of the traversal stack.
#[derive(Clone, Debug)]
pub struct DbgStackEntry {
    pub uuid: TypeUuid,
    pub class_name: Ustr,
    pub element_name: Option<Ustr>,
}

impl Display for DbgStackEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.element_name {
            Some(element) => write!(f, "{}::{element}", self.class_name),
            None => write!(f, "{}", self.class_name),
        }
    }
}

/// Collects traversal errors and warnings with positional context.
#[derive(Default)]
pub struct ErrorHandler {
    stack: Vec<DbgStackEntry>,
    error_count: usize,
    warning_count: usize,
}

impl ErrorHandler {
    /// Creates a new empty [`ErrorHandler`] instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a stack frame for the element being visited.
    pub fn push(&mut self, entry: DbgStackEntry) {
        self.stack.push(entry);
    }

    /// Pops the innermost stack frame.
    pub fn pop(&mut self) {
        self.stack.pop();
    }

    /// Renders the current stack as a `/`-separated path.
    #[must_use]
    pub fn stack_description(&self) -> String {
        let mut description = String::new();
        for (index, entry) in self.stack.iter().enumerate() {
            if index > 0 {
                description.push('/');
            }
            let _ = write!(description, "{entry}");
        }
        description
    }

    /// Records and logs an error at the current stack position.
    pub fn report_error(&mut self, message: &str) {
        self.error_count += 1;
        let stack = self.stack_description();
        if stack.is_empty() {
            log::error!("{message}");
        } else {
            log::error!("[{stack}] {message}");
        }
    }

    /// Records and logs a warning at the current stack position.
    pub fn report_warning(&mut self, message: &str) {
        self.warning_count += 1;
        let stack = self.stack_description();
        if stack.is_empty() {
            log::warn!("{message}");
        } else {
            log::warn!("[{stack}] {message}");
        }
    }

    /// Total errors reported over the traversal.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    /// Total warnings reported over the traversal.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    /// Clears counters and the stack for reuse.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.error_count = 0;
        self.warning_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use velcro_core::TypeInfo;

    use super::*;

    fn entry(class: &str, element: Option<&str>) -> DbgStackEntry {
        DbgStackEntry {
            uuid: i32::type_uuid(),
            class_name: Ustr::from(class),
            element_name: element.map(Ustr::from),
        }
    }

    #[rstest]
    fn test_stack_description_format() {
        let mut errors = ErrorHandler::new();
        errors.push(entry("World", None));
        errors.push(entry("Entity", Some("transform")));
        assert_eq!(errors.stack_description(), "World/Entity::transform");

        errors.pop();
        assert_eq!(errors.stack_description(), "World");
    }

    #[rstest]
    fn test_counts_accumulate() {
        let mut errors = ErrorHandler::new();
        errors.report_error("bad id");
        errors.report_error("bad element");
        errors.report_warning("old version");

        assert_eq!(errors.error_count(), 2);
        assert_eq!(errors.warning_count(), 1);

        errors.reset();
        assert_eq!(errors.error_count(), 0);
        assert_eq!(errors.warning_count(), 0);
        assert!(errors.stack_description().is_empty());
    }
}
