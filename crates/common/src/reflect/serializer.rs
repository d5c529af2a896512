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

//! Leaf value serializers.
//!
//! A [`DataSerializer`] converts one value between its in-memory form and a
//! document payload. Binary payloads are little-endian by default; the
//! big-endian document category reverses bytes per numeric field, never
//! stream-wide. Text payloads are UTF-8: integers in decimal, floats with
//! seven fractional digits, booleans as the literals `true`/`false`.
//!
//! [`LeafSerializer<T>`] covers every primitive through the [`LeafValue`]
//! trait. Serializers plug into class registrations either as owned boxes
//! or as borrowed statics; [`leaf_serializer`] hands out the shared static
//! instance.

use std::{any::Any, marker::PhantomData};

use velcro_core::typeid::TypeInfo;

/// Byte order of one binary payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Converts one leaf value between memory and document payloads.
pub trait DataSerializer: 'static {
    /// Appends the binary form of `value` to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is not of this serializer's type.
    fn save(&self, value: &dyn Any, out: &mut Vec<u8>, order: ByteOrder) -> anyhow::Result<usize>;

    /// Overwrites `value` from a binary payload.
    ///
    /// # Errors
    ///
    /// Returns an error on a type or payload-size mismatch.
    fn load(
        &self,
        value: &mut dyn Any,
        data: &[u8],
        order: ByteOrder,
        version: u32,
    ) -> anyhow::Result<()>;

    /// Renders a little-endian binary payload as text.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be decoded.
    fn data_to_text(&self, data: &[u8]) -> anyhow::Result<String>;

    /// Appends the little-endian binary form of a text payload to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be parsed.
    fn text_to_data(&self, text: &str, out: &mut Vec<u8>) -> anyhow::Result<usize>;

    /// Compares two values of this serializer's type.
    fn compare(&self, a: &dyn Any, b: &dyn Any) -> bool;

    /// Copies `src` over `dst` directly, bypassing the byte round-trip.
    /// Returns false when the fast path is unavailable.
    fn clone_value(&self, _src: &dyn Any, _dst: &mut dyn Any) -> bool {
        false
    }
}

/// A value storable by [`LeafSerializer`].
pub trait LeafValue: Clone + PartialEq + Default + 'static {
    /// Appends the binary form in the given byte order.
    fn write_bytes(&self, out: &mut Vec<u8>, order: ByteOrder);

    /// Decodes from a complete binary payload.
    ///
    /// # Errors
    ///
    /// Returns an error on a payload-size or encoding mismatch.
    fn read_bytes(data: &[u8], order: ByteOrder) -> anyhow::Result<Self>;

    /// Renders as document text.
    fn to_text(&self) -> String;

    /// Parses from document text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text does not parse.
    fn from_text(text: &str) -> anyhow::Result<Self>;
}

macro_rules! impl_leaf_value_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl LeafValue for $ty {
                fn write_bytes(&self, out: &mut Vec<u8>, order: ByteOrder) {
                    match order {
                        ByteOrder::Little => out.extend_from_slice(&self.to_le_bytes()),
                        ByteOrder::Big => out.extend_from_slice(&self.to_be_bytes()),
                    }
                }

                fn read_bytes(data: &[u8], order: ByteOrder) -> anyhow::Result<Self> {
                    let bytes: [u8; std::mem::size_of::<$ty>()] = data.try_into().map_err(|_| {
                        anyhow::anyhow!(
                            "payload size mismatch for {}: expected {} bytes, was {}",
                            stringify!($ty),
                            std::mem::size_of::<$ty>(),
                            data.len(),
                        )
                    })?;
                    Ok(match order {
                        ByteOrder::Little => <$ty>::from_le_bytes(bytes),
                        ByteOrder::Big => <$ty>::from_be_bytes(bytes),
                    })
                }

                fn to_text(&self) -> String {
                    format!("{self}")
                }

                fn from_text(text: &str) -> anyhow::Result<Self> {
                    text.trim().parse::<$ty>().map_err(|e| {
                        anyhow::anyhow!("failed to parse {} from '{text}': {e}", stringify!($ty))
                    })
                }
            }
        )*
    };
}

impl_leaf_value_int!(i8, i16, i32, i64, u8, u16, u32, u64);

macro_rules! impl_leaf_value_float {
    ($($ty:ty),* $(,)?) => {
        $(
            impl LeafValue for $ty {
                fn write_bytes(&self, out: &mut Vec<u8>, order: ByteOrder) {
                    match order {
                        ByteOrder::Little => out.extend_from_slice(&self.to_le_bytes()),
                        ByteOrder::Big => out.extend_from_slice(&self.to_be_bytes()),
                    }
                }

                fn read_bytes(data: &[u8], order: ByteOrder) -> anyhow::Result<Self> {
                    let bytes: [u8; std::mem::size_of::<$ty>()] = data.try_into().map_err(|_| {
                        anyhow::anyhow!(
                            "payload size mismatch for {}: expected {} bytes, was {}",
                            stringify!($ty),
                            std::mem::size_of::<$ty>(),
                            data.len(),
                        )
                    })?;
                    Ok(match order {
                        ByteOrder::Little => <$ty>::from_le_bytes(bytes),
                        ByteOrder::Big => <$ty>::from_be_bytes(bytes),
                    })
                }

                fn to_text(&self) -> String {
                    format!("{self:.7}")
                }

                fn from_text(text: &str) -> anyhow::Result<Self> {
                    text.trim().parse::<$ty>().map_err(|e| {
                        anyhow::anyhow!("failed to parse {} from '{text}': {e}", stringify!($ty))
                    })
                }
            }
        )*
    };
}

impl_leaf_value_float!(f32, f64);

impl LeafValue for bool {
    fn write_bytes(&self, out: &mut Vec<u8>, _order: ByteOrder) {
        out.push(u8::from(*self));
    }

    fn read_bytes(data: &[u8], _order: ByteOrder) -> anyhow::Result<Self> {
        match data {
            [byte] => Ok(*byte != 0),
            _ => anyhow::bail!("payload size mismatch for bool: expected 1 byte, was {}", data.len()),
        }
    }

    fn to_text(&self) -> String {
        if *self { "true".to_string() } else { "false".to_string() }
    }

    fn from_text(text: &str) -> anyhow::Result<Self> {
        match text.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => anyhow::bail!("failed to parse bool from '{other}'"),
        }
    }
}

impl LeafValue for char {
    fn write_bytes(&self, out: &mut Vec<u8>, order: ByteOrder) {
        (*self as u32).write_bytes(out, order);
    }

    fn read_bytes(data: &[u8], order: ByteOrder) -> anyhow::Result<Self> {
        let raw = u32::read_bytes(data, order)?;
        char::from_u32(raw).ok_or_else(|| anyhow::anyhow!("invalid char scalar {raw}"))
    }

    fn to_text(&self) -> String {
        self.to_string()
    }

    fn from_text(text: &str) -> anyhow::Result<Self> {
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => anyhow::bail!("failed to parse char from '{text}'"),
        }
    }
}

impl LeafValue for String {
    // Strings are byte sequences, not numeric fields; the big-endian
    // category leaves them untouched
    fn write_bytes(&self, out: &mut Vec<u8>, _order: ByteOrder) {
        out.extend_from_slice(self.as_bytes());
    }

    fn read_bytes(data: &[u8], _order: ByteOrder) -> anyhow::Result<Self> {
        String::from_utf8(data.to_vec()).map_err(|e| anyhow::anyhow!("invalid UTF-8 payload: {e}"))
    }

    fn to_text(&self) -> String {
        self.clone()
    }

    fn from_text(text: &str) -> anyhow::Result<Self> {
        Ok(text.to_string())
    }
}

/// The shared serializer for a [`LeafValue`] type.
pub struct LeafSerializer<T: LeafValue>(PhantomData<T>);

impl<T: LeafValue> LeafSerializer<T> {
    /// The shared instance; borrow it with [`leaf_serializer`].
    pub const INSTANCE: Self = Self(PhantomData);
}

impl<T: LeafValue> Default for LeafSerializer<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: LeafValue> DataSerializer for LeafSerializer<T> {
    fn save(&self, value: &dyn Any, out: &mut Vec<u8>, order: ByteOrder) -> anyhow::Result<usize> {
        let value = value
            .downcast_ref::<T>()
            .ok_or_else(|| type_mismatch::<T>())?;
        let start = out.len();
        value.write_bytes(out, order);
        Ok(out.len() - start)
    }

    fn load(
        &self,
        value: &mut dyn Any,
        data: &[u8],
        order: ByteOrder,
        _version: u32,
    ) -> anyhow::Result<()> {
        let decoded = T::read_bytes(data, order)?;
        let slot = value
            .downcast_mut::<T>()
            .ok_or_else(|| type_mismatch::<T>())?;
        *slot = decoded;
        Ok(())
    }

    fn data_to_text(&self, data: &[u8]) -> anyhow::Result<String> {
        Ok(T::read_bytes(data, ByteOrder::Little)?.to_text())
    }

    fn text_to_data(&self, text: &str, out: &mut Vec<u8>) -> anyhow::Result<usize> {
        let start = out.len();
        T::from_text(text)?.write_bytes(out, ByteOrder::Little);
        Ok(out.len() - start)
    }

    fn compare(&self, a: &dyn Any, b: &dyn Any) -> bool {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn clone_value(&self, src: &dyn Any, dst: &mut dyn Any) -> bool {
        match (src.downcast_ref::<T>(), dst.downcast_mut::<T>()) {
            (Some(src), Some(dst)) => {
                *dst = src.clone();
                true
            }
            _ => false,
        }
    }
}

/// Borrows the shared serializer for a leaf type.
#[must_use]
pub fn leaf_serializer<T: LeafValue + TypeInfo>() -> &'static dyn DataSerializer {
    &LeafSerializer::<T>::INSTANCE
}

fn type_mismatch<T: 'static>() -> anyhow::Error {
    anyhow::anyhow!(
        "value is not of serializer type {}",
        std::any::type_name::<T>()
    )
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_i32_little_endian_bytes() {
        let mut out = Vec::new();
        let written = LeafSerializer::<i32>::INSTANCE
            .save(&42i32, &mut out, ByteOrder::Little)
            .unwrap();
        assert_eq!(written, 4);
        assert_eq!(out, vec![0x2A, 0x00, 0x00, 0x00]);
    }

    #[rstest]
    fn test_i32_big_endian_bytes() {
        let mut out = Vec::new();
        LeafSerializer::<i32>::INSTANCE
            .save(&42i32, &mut out, ByteOrder::Big)
            .unwrap();
        assert_eq!(out, vec![0x00, 0x00, 0x00, 0x2A]);
    }

    #[rstest]
    fn test_i32_round_trip_both_orders() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let mut out = Vec::new();
            LeafSerializer::<i32>::INSTANCE
                .save(&-123_456i32, &mut out, order)
                .unwrap();
            let mut value = 0i32;
            LeafSerializer::<i32>::INSTANCE
                .load(&mut value, &out, order, 0)
                .unwrap();
            assert_eq!(value, -123_456);
        }
    }

    #[rstest]
    fn test_load_rejects_size_mismatch() {
        let mut value = 0u64;
        let result =
            LeafSerializer::<u64>::INSTANCE.load(&mut value, &[1, 2, 3], ByteOrder::Little, 0);
        assert!(result.is_err());
    }

    #[rstest]
    fn test_save_rejects_wrong_type() {
        let mut out = Vec::new();
        let result = LeafSerializer::<i32>::INSTANCE.save(&1.5f32, &mut out, ByteOrder::Little);
        assert!(result.is_err());
    }

    #[rstest]
    #[case(7i32, "7")]
    #[case(-19i32, "-19")]
    fn test_int_text_form(#[case] value: i32, #[case] expected: &str) {
        assert_eq!(value.to_text(), expected);
        assert_eq!(i32::from_text(expected).unwrap(), value);
    }

    #[rstest]
    fn test_float_text_uses_seven_digits() {
        assert_eq!(1.5f32.to_text(), "1.5000000");
        assert_eq!(f64::from_text("2.2500000").unwrap(), 2.25);
    }

    #[rstest]
    fn test_bool_text_literals() {
        assert_eq!(true.to_text(), "true");
        assert_eq!(false.to_text(), "false");
        assert!(bool::from_text("yes").is_err());
    }

    #[rstest]
    fn test_text_to_data_matches_binary() {
        let mut from_text = Vec::new();
        LeafSerializer::<u32>::INSTANCE
            .text_to_data("42", &mut from_text)
            .unwrap();
        let mut from_value = Vec::new();
        LeafSerializer::<u32>::INSTANCE
            .save(&42u32, &mut from_value, ByteOrder::Little)
            .unwrap();
        assert_eq!(from_text, from_value);

        let text = LeafSerializer::<u32>::INSTANCE
            .data_to_text(&from_value)
            .unwrap();
        assert_eq!(text, "42");
    }

    #[rstest]
    fn test_string_payload_is_utf8() {
        let value = "velcro".to_string();
        let mut out = Vec::new();
        LeafSerializer::<String>::INSTANCE
            .save(&value, &mut out, ByteOrder::Big)
            .unwrap();
        assert_eq!(out, b"velcro");

        let mut loaded = String::new();
        LeafSerializer::<String>::INSTANCE
            .load(&mut loaded, &out, ByteOrder::Big, 0)
            .unwrap();
        assert_eq!(loaded, value);
    }

    #[rstest]
    fn test_char_round_trip() {
        let mut out = Vec::new();
        LeafSerializer::<char>::INSTANCE
            .save(&'ß', &mut out, ByteOrder::Little)
            .unwrap();
        let mut loaded = ' ';
        LeafSerializer::<char>::INSTANCE
            .load(&mut loaded, &out, ByteOrder::Little, 0)
            .unwrap();
        assert_eq!(loaded, 'ß');
    }

    #[rstest]
    fn test_compare_and_clone_fast_path() {
        let serializer = leaf_serializer::<i32>();
        assert!(serializer.compare(&5i32, &5i32));
        assert!(!serializer.compare(&5i32, &6i32));
        assert!(!serializer.compare(&5i32, &5.0f32));

        let mut dst = 0i32;
        assert!(serializer.clone_value(&9i32, &mut dst));
        assert_eq!(dst, 9);
    }
}
