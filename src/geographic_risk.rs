//! Geographic risk lists
//!
//! Country classifications used by the geographic indicators and by the
//! network builder's country filters. Codes are matched after trimming and
//! upper-casing.

use crate::dataset::normalize_label;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Country risk level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CountryRiskLevel {
    Low,
    Medium,
    High,
    Prohibited,
}

impl fmt::Display for CountryRiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountryRiskLevel::Low => write!(f, "low"),
            CountryRiskLevel::Medium => write!(f, "medium"),
            CountryRiskLevel::High => write!(f, "high"),
            CountryRiskLevel::Prohibited => write!(f, "prohibited"),
        }
    }
}

/// Country risk entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CountryRisk {
    pub country_code: String,
    pub risk_level: CountryRiskLevel,
    #[serde(default)]
    pub factors: Vec<String>,
}

impl CountryRisk {
    pub fn new(code: &str, risk_level: CountryRiskLevel, factors: &[&str]) -> Self {
        Self {
            country_code: normalize_label(code),
            risk_level,
            factors: factors.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Check if enhanced due diligence is required
    pub fn requires_edd(&self) -> bool {
        matches!(
            self.risk_level,
            CountryRiskLevel::High | CountryRiskLevel::Prohibited
        )
    }
}

/// Configured country classifications
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "Vec<CountryRisk>", into = "Vec<CountryRisk>")]
pub struct CountryRiskList {
    entries: BTreeMap<String, CountryRisk>,
}

impl CountryRiskList {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Add or replace a classification
    pub fn insert(&mut self, mut risk: CountryRisk) {
        risk.country_code = normalize_label(&risk.country_code);
        self.entries.insert(risk.country_code.clone(), risk);
    }

    pub fn get(&self, country: &str) -> Option<&CountryRisk> {
        self.entries.get(&normalize_label(country))
    }

    /// Level for a country; unlisted countries are `Low`
    pub fn level(&self, country: &str) -> CountryRiskLevel {
        self.get(country)
            .map_or(CountryRiskLevel::Low, |r| r.risk_level)
    }

    /// Whether the country triggers the high-risk country indicator
    pub fn is_high_risk(&self, country: &str) -> bool {
        self.level(country) >= CountryRiskLevel::High
    }

    pub fn high_risk_countries(&self) -> Vec<&str> {
        self.entries
            .values()
            .filter(|r| r.requires_edd())
            .map(|r| r.country_code.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CountryRiskList {
    fn default() -> Self {
        let mut list = Self::empty();
        list.insert(CountryRisk::new(
            "IR",
            CountryRiskLevel::Prohibited,
            &["FATF Blacklist", "US Comprehensive Sanctions"],
        ));
        list.insert(CountryRisk::new(
            "KP",
            CountryRiskLevel::Prohibited,
            &["FATF Blacklist", "UN Sanctions"],
        ));
        list.insert(CountryRisk::new(
            "SY",
            CountryRiskLevel::Prohibited,
            &["US Comprehensive Sanctions", "EU Sanctions"],
        ));
        list.insert(CountryRisk::new(
            "MM",
            CountryRiskLevel::High,
            &["FATF Blacklist", "Targeted Sanctions"],
        ));
        list.insert(CountryRisk::new(
            "YE",
            CountryRiskLevel::High,
            &["Conflict Zone", "Weak AML Controls"],
        ));
        list.insert(CountryRisk::new(
            "AF",
            CountryRiskLevel::High,
            &["Conflict Zone", "Targeted Sanctions"],
        ));
        list.insert(CountryRisk::new(
            "PK",
            CountryRiskLevel::Medium,
            &["FATF Greylist history"],
        ));
        list
    }
}

impl From<Vec<CountryRisk>> for CountryRiskList {
    fn from(risks: Vec<CountryRisk>) -> Self {
        let mut list = Self::empty();
        for risk in risks {
            list.insert(risk);
        }
        list
    }
}

impl From<CountryRiskList> for Vec<CountryRisk> {
    fn from(list: CountryRiskList) -> Self {
        list.entries.into_values().collect()
    }
}
