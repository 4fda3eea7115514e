//! Response-size reduction applied before payloads reach callers.

// crates.io
use serde_json::Value;

const DEFAULT_ALLOWED_FIELDS: &[&str] =
	&["id", "title", "status", "items", "variants", "images", "assets", "metadata"];
const DEFAULT_MAX_LIST_LEN: usize = 20;

/// Strategy applied to every parsed upstream payload before it is returned.
///
/// Injected at construction so callers can swap shaping behavior without touching
/// the façade; the default is [`WhitelistShaper`].
pub trait ResponseShaper
where
	Self: Send + Sync,
{
	/// Produces the reduced payload.
	fn shape(&self, value: Value) -> Value;
}

/// Field whitelist + list caps governing a [`WhitelistShaper`].
#[derive(Clone, Debug)]
pub struct ReductionPolicy {
	/// Top-level object fields retained in the output; empty keeps every field.
	pub allowed_fields: Vec<String>,
	/// Maximum length of any array in the output.
	pub max_list_len: usize,
}
impl Default for ReductionPolicy {
	fn default() -> Self {
		Self {
			allowed_fields: DEFAULT_ALLOWED_FIELDS
				.iter()
				.map(|field| (*field).to_owned())
				.collect(),
			max_list_len: DEFAULT_MAX_LIST_LEN,
		}
	}
}

/// Default [`ResponseShaper`]: keeps whitelisted top-level fields and caps list lengths.
#[derive(Clone, Debug, Default)]
pub struct WhitelistShaper {
	policy: ReductionPolicy,
}
impl WhitelistShaper {
	/// Creates a shaper applying the provided policy.
	pub fn new(policy: ReductionPolicy) -> Self {
		Self { policy }
	}

	fn cap_lists(&self, value: Value) -> Value {
		match value {
			Value::Array(items) => Value::Array(
				items
					.into_iter()
					.take(self.policy.max_list_len)
					.map(|item| self.cap_lists(item))
					.collect(),
			),
			Value::Object(fields) => Value::Object(
				fields.into_iter().map(|(name, item)| (name, self.cap_lists(item))).collect(),
			),
			other => other,
		}
	}
}
impl ResponseShaper for WhitelistShaper {
	fn shape(&self, value: Value) -> Value {
		let filtered = match value {
			Value::Object(mut fields) => {
				if !self.policy.allowed_fields.is_empty() {
					fields.retain(|name, _| {
						self.policy.allowed_fields.iter().any(|allowed| allowed == name)
					});
				}

				Value::Object(fields)
			},
			other => other,
		};

		self.cap_lists(filtered)
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;

	fn shaper(allowed: &[&str], max_list_len: usize) -> WhitelistShaper {
		WhitelistShaper::new(ReductionPolicy {
			allowed_fields: allowed.iter().map(|field| (*field).to_owned()).collect(),
			max_list_len,
		})
	}

	#[test]
	fn drops_fields_outside_the_whitelist() {
		let shaped = shaper(&["id", "items"], 10).shape(json!({
			"id": 7,
			"items": [1, 2, 3],
			"internal_notes": "drop me",
			"debug": {"trace": true},
		}));

		assert_eq!(shaped, json!({"id": 7, "items": [1, 2, 3]}));
	}

	#[test]
	fn caps_lists_at_every_depth() {
		let shaped = shaper(&["items"], 2).shape(json!({
			"items": [
				{"images": [1, 2, 3, 4]},
				{"images": [5]},
				{"images": []},
			],
		}));

		assert_eq!(shaped, json!({"items": [{"images": [1, 2]}, {"images": [5]}]}));
	}

	#[test]
	fn empty_whitelist_keeps_every_field() {
		let payload = json!({"anything": 1, "goes": [2]});
		let shaped = shaper(&[], 10).shape(payload.clone());

		assert_eq!(shaped, payload);
	}

	#[test]
	fn non_object_payloads_pass_through_with_caps() {
		let shaped = shaper(&["id"], 2).shape(json!([1, 2, 3]));

		assert_eq!(shaped, json!([1, 2]));

		let scalar = shaper(&["id"], 2).shape(json!("plain"));

		assert_eq!(scalar, json!("plain"));
	}
}
