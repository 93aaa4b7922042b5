//! Market grading for pepper clusters.
//!
//! The bunga model labels a cluster as `Class X-y`, where `X` (A..D) is the
//! ripeness grade and `y` (a..d) is the health grade, or as `rotten`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketGrade {
    Premium,
    Standard,
    Commercial,
    Reject,
    Unknown,
}

impl MarketGrade {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketGrade::Premium => "Premium",
            MarketGrade::Standard => "Standard",
            MarketGrade::Commercial => "Commercial",
            MarketGrade::Reject => "Reject",
            MarketGrade::Unknown => "Unknown",
        }
    }
}

/// Decoded bunga class label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassGrade {
    /// "A".."D", "Rotten" or "Unknown".
    pub ripeness: String,
    /// 'a'..'d' when the label carried one.
    pub health: Option<char>,
    pub market: MarketGrade,
}

impl ClassGrade {
    pub fn parse(class: &str) -> Self {
        if class.trim().eq_ignore_ascii_case("rotten") {
            return Self {
                ripeness: "Rotten".to_string(),
                health: None,
                market: MarketGrade::Reject,
            };
        }

        match find_class_code(class) {
            Some((ripeness, health)) => Self {
                ripeness: ripeness.to_string(),
                health: Some(health),
                market: market_grade(ripeness, health),
            },
            None => Self {
                ripeness: "Unknown".to_string(),
                health: None,
                market: MarketGrade::Unknown,
            },
        }
    }
}

fn market_grade(ripeness: char, health: char) -> MarketGrade {
    match (ripeness, health) {
        ('C', 'd') | ('D', 'd') => MarketGrade::Reject,
        ('A', 'a') => MarketGrade::Premium,
        ('A', 'b') | ('B', 'a') | ('B', 'b') => MarketGrade::Standard,
        _ => MarketGrade::Commercial,
    }
}

/// Locate `Class\s*[A-D]-[a-d]` anywhere in the label.
fn find_class_code(label: &str) -> Option<(char, char)> {
    let mut rest = label;
    while let Some(pos) = rest.find("Class") {
        let after = &rest[pos + "Class".len()..];
        let mut chars = after.trim_start().chars();
        if let (Some(r), Some('-'), Some(h)) = (chars.next(), chars.next(), chars.next()) {
            if ('A'..='D').contains(&r) && ('a'..='d').contains(&h) {
                return Some((r, h));
            }
        }
        rest = after;
    }
    None
}
