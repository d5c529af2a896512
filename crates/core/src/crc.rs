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

//! CRC-32 name keys.
//!
//! Reflected field names, attribute names and document element names are
//! keyed by their CRC-32 (ISO-HDLC polynomial, the common zlib variant).
//! The same function is used at registration time and at lookup time, so a
//! key computed from a runtime string always matches one computed from a
//! static name.

use crc::{CRC_32_ISO_HDLC, Crc};

const CRC32_ALG: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Returns the CRC-32 of `name`'s UTF-8 bytes.
#[must_use]
pub fn crc32(name: &str) -> u32 {
    CRC32_ALG.checksum(name.as_bytes())
}

/// Returns the CRC-32 of a raw byte slice.
#[must_use]
pub fn crc32_bytes(data: &[u8]) -> u32 {
    CRC32_ALG.checksum(data)
}
