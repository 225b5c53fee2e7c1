//! Synthetic visitor profiles.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// One synthetic visitor's targeting attributes.
///
/// Immutable once generated. Pools are sampled with replacement.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    /// Ad placement identifier.
    pub slot_id: String,
    /// Placement type. `1` is a banner.
    pub slot_type: u32,
    /// ISO country code.
    pub country: String,
    /// City name, `Unknown` when synthesized.
    pub city: String,
    /// Dotted-quad IPv4 address.
    pub ip: String,
    /// Operating system, lowercase.
    pub os: String,
    /// Browser, lowercase.
    pub browser: String,
    /// Device model.
    pub device: String,
    /// Application bundle identifier.
    pub app_id: String,
    /// Age in years.
    pub age: u8,
    /// Declared gender.
    pub gender: Gender,
    /// Zero or more interest tags. May contain duplicates.
    pub interests: Vec<String>,
    /// Page context the slot is rendered in.
    pub page_context: String,
}

/// Visitor gender as understood by the ad server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Gender {
    /// Serialized as `M`.
    #[serde(rename = "M")]
    Male,
    /// Serialized as `F`.
    #[serde(rename = "F")]
    Female,
    /// Allowed by the ad server but never synthesized.
    #[default]
    #[serde(rename = "U")]
    Unknown,
}

impl Gender {
    /// The wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
            Gender::Unknown => "U",
        }
    }
}

impl Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl UserProfile {
    /// Does the named field hold `value`, ignoring case?
    ///
    /// Empty fields never match. For `interests` any single interest may match. Unknown field names
    /// never match.
    pub fn field_matches(&self, field: &str, value: &str) -> bool {
        let text = |s: &str| !s.is_empty() && eq_ignore_case(s, value);

        match field {
            "slot_id" => text(self.slot_id.as_str()),
            "slot_type" => text(self.slot_type.to_string().as_str()),
            "country" => text(self.country.as_str()),
            "city" => text(self.city.as_str()),
            "ip" => text(self.ip.as_str()),
            "os" => text(self.os.as_str()),
            "browser" => text(self.browser.as_str()),
            "device" => text(self.device.as_str()),
            "app_id" => text(self.app_id.as_str()),
            "age" => self.age > 0 && text(self.age.to_string().as_str()),
            "gender" => text(self.gender.as_str()),
            "interests" => self.interests.iter().any(|i| text(i.as_str())),
            "page_context" => text(self.page_context.as_str()),
            _ => false,
        }
    }

    /// Does this profile have the given interest?
    pub fn has_interest(&self, interest: &str) -> bool {
        self.interests.iter().any(|i| i == interest)
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}
