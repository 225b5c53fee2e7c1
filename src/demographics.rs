//! Baseline demographic tables used when synthesizing profiles.
//!
//! Order matters: weighted sampling falls back to the first entry of a table.

/// Approximate share of ad traffic by country.
pub const COUNTRIES: &[(&str, f64)] = &[
    ("US", 0.20),
    ("CN", 0.18),
    ("IN", 0.12),
    ("JP", 0.05),
    ("GB", 0.04),
    ("DE", 0.03),
    ("BR", 0.03),
    ("FR", 0.03),
    ("KR", 0.02),
    ("SG", 0.01),
];

/// Operating system market share.
pub const OPERATING_SYSTEMS: &[(&str, f64)] = &[
    ("android", 0.45),
    ("ios", 0.25),
    ("windows", 0.20),
    ("macos", 0.08),
    ("linux", 0.02),
];

/// Browser market share.
pub const BROWSERS: &[(&str, f64)] = &[
    ("chrome", 0.60),
    ("safari", 0.20),
    ("edge", 0.10),
    ("firefox", 0.05),
    ("opera", 0.03),
    ("uc browser", 0.02),
];

/// Interest vocabulary.
pub const INTERESTS: &[&str] = &[
    "tech", "news", "sports", "finance", "fashion", "travel", "gaming", "music",
];

/// Mobile Apple OS. Always paired with [`APPLE_BROWSER`].
pub const MOBILE_APPLE_OS: &str = "ios";
/// Desktop Apple OS. Never paired with [`BIASED_AWAY_BROWSER`].
pub const DESKTOP_APPLE_OS: &str = "macos";
/// The only browser on [`MOBILE_APPLE_OS`].
pub const APPLE_BROWSER: &str = "safari";
/// Overridden to [`APPLE_BROWSER`] on [`DESKTOP_APPLE_OS`].
pub const BIASED_AWAY_BROWSER: &str = "edge";

const GENERIC_DEVICES: &[&str] = &["generic"];

/// Devices available for an OS. Unknown operating systems get a generic device.
pub fn devices_for(os: &str) -> &'static [&'static str] {
    match os {
        "android" => &[
            "samsung",
            "xiaomi",
            "huawei",
            "oppo",
            "vivo",
            "google pixel",
            "oneplus",
            "sony",
            "motorola",
        ],
        "ios" => &["iphone", "ipad"],
        "windows" => &["dell", "hp", "lenovo", "asus", "acer"],
        "macos" => &["macbook", "imac"],
        "linux" => &["thinkpad", "dell"],
        _ => GENERIC_DEVICES,
    }
}

/// First IPv4 octet for countries we have a rough allocation for.
pub fn ip_prefix(country: &str) -> Option<u8> {
    match country {
        "US" => Some(104),
        "CN" => Some(202),
        "JP" => Some(150),
        "GB" => Some(80),
        _ => None,
    }
}
