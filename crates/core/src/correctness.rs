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

//! Defensive condition checks for function arguments and internal state.
//!
//! Checks return an `anyhow::Result` so call sites choose the failure mode:
//! propagate with `?`, or `.expect(FAILED)` where the condition is a
//! programming-error invariant rather than expected-bad input.

/// Standard message appended when a correctness check is expected to hold.
pub const FAILED: &str = "Condition failed";

/// Checks the `predicate` is true.
///
/// # Errors
///
/// Returns an error if `predicate` is false.
pub fn check_predicate_true(predicate: bool, fail_msg: &str) -> anyhow::Result<()> {
    if !predicate {
        anyhow::bail!("{fail_msg}")
    }
    Ok(())
}

/// Checks the string `value` is non-empty and contains no interior NUL bytes.
///
/// # Errors
///
/// Returns an error if `value` is empty, all whitespace, or contains a NUL.
pub fn check_valid_string<T: AsRef<str>>(value: T, key: &str) -> anyhow::Result<()> {
    let value = value.as_ref();
    if value.is_empty() {
        anyhow::bail!("invalid string for '{key}', was empty");
    }
    if value.chars().all(char::is_whitespace) {
        anyhow::bail!("invalid string for '{key}', was all whitespace");
    }
    if value.contains('\0') {
        anyhow::bail!("invalid string for '{key}', contained a NUL byte");
    }
    Ok(())
}

/// Checks the `value` is a power of two (alignment requirement).
///
/// # Errors
///
/// Returns an error if `value` is zero or not a power of two.
pub fn check_power_of_two(value: usize, key: &str) -> anyhow::Result<()> {
    if !value.is_power_of_two() {
        anyhow::bail!("invalid value for '{key}', expected a power of two, was {value}");
    }
    Ok(())
}

/// Checks the `value` is in the inclusive range [`l`, `r`].
///
/// # Errors
///
/// Returns an error if `value` is outside the range.
pub fn check_in_range_inclusive_usize(
    value: usize,
    l: usize,
    r: usize,
    key: &str,
) -> anyhow::Result<()> {
    if value < l || value > r {
        anyhow::bail!("invalid value for '{key}' not in range [{l}, {r}], was {value}");
    }
    Ok(())
}
