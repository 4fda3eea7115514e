//! Allow-list network matching (literal addresses + IPv4 CIDR ranges).
//!
//! CIDR containment uses the usual prefix-mask comparison on `u32` addresses and is
//! deliberately IPv4-only; identities that do not parse as IPv4 addresses (API keys,
//! IPv6 callers) never match a CIDR entry and can only be allow-listed literally.

// std
use std::net::Ipv4Addr;
// self
use crate::_prelude::*;

/// Error returned when a network range fails to parse.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum NetworkParseError {
	/// The entry was empty.
	#[error("Network entry cannot be empty.")]
	Empty,
	/// The network portion is not a valid IPv4 address.
	#[error("Network address `{value}` is not a valid IPv4 address.")]
	BadAddress {
		/// Offending raw value.
		value: String,
	},
	/// The prefix length is missing or outside 0..=32.
	#[error("Prefix length `{value}` is not a valid IPv4 prefix.")]
	BadPrefix {
		/// Offending raw value.
		value: String,
	},
}

/// One allow-list entry: either a literal identity or an IPv4 CIDR range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NetworkRange {
	/// Exact identity match (IP address or key).
	Literal(String),
	/// IPv4 network + prefix length.
	Cidr {
		/// Network address as a big-endian `u32`.
		network: u32,
		/// Prefix length in 0..=32.
		prefix: u8,
	},
}
impl NetworkRange {
	/// Parses a literal address or a `network/prefix` CIDR entry.
	pub fn parse(entry: impl AsRef<str>) -> Result<Self, NetworkParseError> {
		let view = entry.as_ref().trim();

		if view.is_empty() {
			return Err(NetworkParseError::Empty);
		}

		let Some((network, prefix)) = view.split_once('/') else {
			return Ok(Self::Literal(view.to_owned()));
		};
		let address: Ipv4Addr = network
			.parse()
			.map_err(|_| NetworkParseError::BadAddress { value: network.to_owned() })?;
		let prefix: u8 = prefix
			.parse()
			.ok()
			.filter(|parsed| *parsed <= 32)
			.ok_or_else(|| NetworkParseError::BadPrefix { value: prefix.to_owned() })?;

		Ok(Self::Cidr { network: u32::from(address), prefix })
	}

	/// Tests whether the provided identity falls inside this range.
	pub fn contains(&self, identity: &str) -> bool {
		match self {
			Self::Literal(literal) => literal == identity,
			Self::Cidr { network, prefix } => {
				let Ok(address) = identity.parse::<Ipv4Addr>() else {
					return false;
				};

				let mask = prefix_mask(*prefix);

				(u32::from(address) & mask) == (*network & mask)
			},
		}
	}
}
impl FromStr for NetworkRange {
	type Err = NetworkParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}
impl TryFrom<String> for NetworkRange {
	type Error = NetworkParseError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::parse(value)
	}
}
impl From<NetworkRange> for String {
	fn from(value: NetworkRange) -> Self {
		value.to_string()
	}
}
impl Display for NetworkRange {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Literal(literal) => f.write_str(literal),
			Self::Cidr { network, prefix } =>
				write!(f, "{}/{prefix}", Ipv4Addr::from(*network)),
		}
	}
}

/// Tests the identity against every entry of an allow-list.
pub fn any_contains(ranges: &[NetworkRange], identity: &str) -> bool {
	ranges.iter().any(|range| range.contains(identity))
}

fn prefix_mask(prefix: u8) -> u32 {
	if prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(prefix)) }
}
