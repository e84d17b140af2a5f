//! Byte encoding of stored values and B+Tree keys.
//!
//! Every type stored through the typed store helpers or kept in a B+Tree implements [`Codec`].
//! Keys are encoded a node at a time through [`Codec::encode_keys`], which lets integer and
//! byte-string keys exploit the ordering of a node: integers are written as deltas from their
//! predecessor and strings share their common prefix with the previous key.

use integer_encoding::VarInt;

use crate::error::{Error, Result};

/// Encoder/decoder for one stored type.
pub trait Codec: Sized {
	/// Identifies the encoding. Persisted with every B+Tree and checked when it is loaded.
	const TYPE_NAME: &'static str;

	fn encode(&self, out: &mut Vec<u8>);

	/// Decodes one value from the head of `input` and advances it.
	fn decode(input: &mut &[u8]) -> Result<Self>;

	/// Encodes the keys of one node, in node order.
	fn encode_keys(keys: &[Self], out: &mut Vec<u8>) {
		for key in keys {
			key.encode(out);
		}
	}

	fn decode_keys(input: &mut &[u8], count: usize) -> Result<Vec<Self>> {
		(0..count).map(|_| Self::decode(input)).collect()
	}
}

/// Encodes `value` into a new buffer.
pub fn to_bytes<T: Codec>(value: &T) -> Vec<u8> {
	let mut out = Vec::new();
	value.encode(&mut out);
	out
}

/// Decodes a value that must span all of `bytes`.
pub fn from_bytes<T: Codec>(bytes: &[u8]) -> Result<T> {
	let mut input = bytes;
	let value = T::decode(&mut input)?;
	if !input.is_empty() {
		return Err(Error::Decode(format!(
			"{} trailing bytes after {}",
			input.len(),
			T::TYPE_NAME
		)));
	}
	Ok(value)
}

pub(crate) fn write_var<V: VarInt>(out: &mut Vec<u8>, value: V) {
	out.extend_from_slice(&value.encode_var_vec());
}

pub(crate) fn read_var<V: VarInt>(input: &mut &[u8]) -> Result<V> {
	let (value, n) =
		V::decode_var(input).ok_or_else(|| Error::Decode("truncated or invalid varint".into()))?;
	*input = &input[n..];
	Ok(value)
}

pub(crate) fn read_slice<'a>(input: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
	if input.len() < len {
		return Err(Error::Decode(format!(
			"expected {len} bytes, only {} remain",
			input.len()
		)));
	}
	let (head, tail) = input.split_at(len);
	*input = tail;
	Ok(head)
}

macro_rules! impl_integer_codec {
	($ty:ty, $name:expr) => {
		impl Codec for $ty {
			const TYPE_NAME: &'static str = $name;

			fn encode(&self, out: &mut Vec<u8>) {
				write_var(out, *self);
			}

			fn decode(input: &mut &[u8]) -> Result<Self> {
				read_var(input)
			}

			// First key in full, then the wrapping difference to the previous key.
			fn encode_keys(keys: &[Self], out: &mut Vec<u8>) {
				let mut prev: Option<u64> = None;
				for key in keys {
					let bits = *key as u64;
					match prev {
						None => key.encode(out),
						Some(prev) => write_var(out, bits.wrapping_sub(prev)),
					}
					prev = Some(bits);
				}
			}

			fn decode_keys(input: &mut &[u8], count: usize) -> Result<Vec<Self>> {
				let mut keys = Vec::with_capacity(count);
				let mut prev: Option<u64> = None;
				for _ in 0..count {
					let bits = match prev {
						None => Self::decode(input)? as u64,
						Some(prev) => prev.wrapping_add(read_var::<u64>(input)?),
					};
					keys.push(bits as $ty);
					prev = Some(bits);
				}
				Ok(keys)
			}
		}
	};
}

impl_integer_codec!(u32, "u32");
impl_integer_codec!(u64, "u64");
impl_integer_codec!(i32, "i32");
impl_integer_codec!(i64, "i64");

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
	a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

// [shared: varint][unshared: varint][suffix] per key, sharing with the previous key.
fn encode_prefixed<'a>(keys: impl Iterator<Item = &'a [u8]>, out: &mut Vec<u8>) {
	let mut prev: &[u8] = &[];
	for key in keys {
		let shared = shared_prefix_len(prev, key);
		write_var(out, shared as u64);
		write_var(out, (key.len() - shared) as u64);
		out.extend_from_slice(&key[shared..]);
		prev = key;
	}
}

fn decode_prefixed(input: &mut &[u8], count: usize) -> Result<Vec<Vec<u8>>> {
	let mut keys: Vec<Vec<u8>> = Vec::with_capacity(count);
	for _ in 0..count {
		let shared = read_var::<u64>(input)? as usize;
		let unshared = read_var::<u64>(input)? as usize;
		let prev = keys.last().map(Vec::as_slice).unwrap_or_default();
		if shared > prev.len() {
			return Err(Error::Decode(format!(
				"key shares {shared} bytes with a {} byte predecessor",
				prev.len()
			)));
		}
		let mut key = Vec::with_capacity(shared + unshared);
		key.extend_from_slice(&prev[..shared]);
		key.extend_from_slice(read_slice(input, unshared)?);
		keys.push(key);
	}
	Ok(keys)
}

impl Codec for Vec<u8> {
	const TYPE_NAME: &'static str = "bytes";

	fn encode(&self, out: &mut Vec<u8>) {
		write_var(out, self.len() as u64);
		out.extend_from_slice(self);
	}

	fn decode(input: &mut &[u8]) -> Result<Self> {
		let len = read_var::<u64>(input)? as usize;
		Ok(read_slice(input, len)?.to_vec())
	}

	fn encode_keys(keys: &[Self], out: &mut Vec<u8>) {
		encode_prefixed(keys.iter().map(Vec::as_slice), out);
	}

	fn decode_keys(input: &mut &[u8], count: usize) -> Result<Vec<Self>> {
		decode_prefixed(input, count)
	}
}

fn utf8(bytes: Vec<u8>) -> Result<String> {
	String::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid utf-8: {e}")))
}

impl Codec for String {
	const TYPE_NAME: &'static str = "string";

	fn encode(&self, out: &mut Vec<u8>) {
		write_var(out, self.len() as u64);
		out.extend_from_slice(self.as_bytes());
	}

	fn decode(input: &mut &[u8]) -> Result<Self> {
		utf8(Vec::<u8>::decode(input)?)
	}

	fn encode_keys(keys: &[Self], out: &mut Vec<u8>) {
		encode_prefixed(keys.iter().map(String::as_bytes), out);
	}

	fn decode_keys(input: &mut &[u8], count: usize) -> Result<Vec<Self>> {
		decode_prefixed(input, count)?.into_iter().map(utf8).collect()
	}
}

impl Codec for bool {
	const TYPE_NAME: &'static str = "bool";

	fn encode(&self, out: &mut Vec<u8>) {
		out.push(*self as u8);
	}

	fn decode(input: &mut &[u8]) -> Result<Self> {
		match read_slice(input, 1)?[0] {
			0 => Ok(false),
			1 => Ok(true),
			b => Err(Error::Decode(format!("invalid bool byte {b}"))),
		}
	}
}

/// Zero-sized values, for trees used as sets.
impl Codec for () {
	const TYPE_NAME: &'static str = "unit";

	fn encode(&self, _out: &mut Vec<u8>) {}

	fn decode(_input: &mut &[u8]) -> Result<Self> {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn keys_round_trip<T: Codec + PartialEq + std::fmt::Debug>(keys: Vec<T>) -> usize {
		let mut out = Vec::new();
		T::encode_keys(&keys, &mut out);
		let mut input = out.as_slice();
		let decoded = T::decode_keys(&mut input, keys.len()).unwrap();
		assert!(input.is_empty());
		assert_eq!(decoded, keys);
		out.len()
	}

	#[test]
	fn ascending_integers_encode_as_small_deltas() {
		let keys: Vec<u64> = (1_000_000_000..1_000_000_032).collect();
		// One full varint then a single byte per delta.
		assert_eq!(keys_round_trip(keys), 5 + 31);
	}

	#[test]
	fn signed_keys_cross_zero() {
		keys_round_trip(vec![i64::MIN, -5, -1, 0, 1, i64::MAX]);
		keys_round_trip(vec![i32::MIN, -70000, 0, i32::MAX]);
		keys_round_trip(vec![0u32, 7, u32::MAX]);
	}

	#[test]
	fn unordered_integers_still_round_trip() {
		keys_round_trip(vec![50u64, 3, u64::MAX, 0]);
	}

	#[test]
	fn strings_share_prefixes() {
		let keys: Vec<String> =
			["apple", "apricot", "banana", "band", "bandana"].iter().map(|s| s.to_string()).collect();
		let full: usize = keys.iter().map(|k| k.len() + 2).sum();
		assert!(keys_round_trip(keys) < full);
		keys_round_trip(vec!["é".to_string(), "ê".to_string(), "".to_string()]);
		keys_round_trip(vec![vec![0u8, 1, 2], vec![0, 1, 3], vec![]]);
	}

	#[test]
	fn truncated_input_is_a_decode_error() {
		let bytes = to_bytes(&"hello".to_string());
		assert!(matches!(from_bytes::<String>(&bytes[..3]), Err(Error::Decode(_))));
		assert!(matches!(from_bytes::<u64>(&[0x80]), Err(Error::Decode(_))));
		assert!(matches!(from_bytes::<bool>(&[2]), Err(Error::Decode(_))));
		assert!(matches!(from_bytes::<u32>(&[1, 2]), Err(Error::Decode(_))));
		assert!(from_bytes::<String>(&[2, 0xff, 0xfe]).is_err());
	}

	#[test]
	fn prefix_longer_than_predecessor_is_rejected() {
		let mut input: &[u8] = &[3, 1, b'x'];
		assert!(matches!(String::decode_keys(&mut input, 1), Err(Error::Decode(_))));
	}
}
