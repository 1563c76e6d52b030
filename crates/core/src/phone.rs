//! Nigerian phone numbers and carrier prefixes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{CoreError, Result};

/// Mobile network carrier accepted by the billing provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Carrier {
    #[serde(rename = "MTN")]
    Mtn,
    #[serde(rename = "GLO")]
    Glo,
    #[serde(rename = "AIRTEL")]
    Airtel,
    #[serde(rename = "9MOBILE")]
    NineMobile,
    #[serde(rename = "NTEL")]
    Ntel,
}

impl Carrier {
    pub const ALL: [Carrier; 5] = [
        Carrier::Mtn,
        Carrier::Glo,
        Carrier::Airtel,
        Carrier::NineMobile,
        Carrier::Ntel,
    ];

    /// Provider code sent to the billing API
    pub fn code(&self) -> &'static str {
        match self {
            Carrier::Mtn => "MTN",
            Carrier::Glo => "GLO",
            Carrier::Airtel => "AIRTEL",
            Carrier::NineMobile => "9MOBILE",
            Carrier::Ntel => "NTEL",
        }
    }

    /// Four-digit local prefixes assigned to this carrier
    pub fn prefixes(&self) -> &'static [&'static str] {
        match self {
            Carrier::Mtn => &[
                "0703", "0706", "0803", "0806", "0810", "0813", "0814", "0816", "0903", "0906",
                "0913", "0916",
            ],
            Carrier::Glo => &["0705", "0805", "0807", "0811", "0815", "0905", "0915"],
            Carrier::Airtel => &[
                "0701", "0708", "0802", "0808", "0812", "0901", "0902", "0904", "0907", "0912",
            ],
            Carrier::NineMobile => &["0809", "0817", "0818", "0908", "0909"],
            Carrier::Ntel => &["0804"],
        }
    }
}

impl fmt::Display for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Carrier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        Carrier::ALL
            .into_iter()
            .find(|c| c.code() == upper)
            .ok_or_else(|| CoreError::UnknownCarrier(s.to_string()))
    }
}

/// Normalise to the 11-digit local format.
///
/// `+234 803 123 4567` and `2348031234567` become `08031234567`; a 10-digit
/// number without the leading zero gets one. Anything else is returned as its
/// digits only.
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.starts_with("234") && digits.len() == 13 {
        return format!("0{}", &digits[3..]);
    }
    if digits.len() == 10 && !digits.starts_with('0') {
        return format!("0{}", digits);
    }
    digits
}

/// Carrier owning the number's prefix, if any
pub fn detect_carrier(phone: &str) -> Option<Carrier> {
    let local = normalize_phone(phone);
    if local.len() != 11 || !local.starts_with('0') {
        return None;
    }
    let prefix = &local[..4];
    Carrier::ALL
        .into_iter()
        .find(|carrier| carrier.prefixes().contains(&prefix))
}

pub fn is_valid_phone(phone: &str) -> bool {
    detect_carrier(phone).is_some()
}

/// Normalised number, or an error if it is not a routable local number
pub fn parse_phone(phone: &str) -> Result<String> {
    if is_valid_phone(phone) {
        Ok(normalize_phone(phone))
    } else {
        Err(CoreError::InvalidPhone(phone.to_string()))
    }
}
