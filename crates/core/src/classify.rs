//! Keyword classifier mapping a part description to a category label.
//!
//! Rules are evaluated top to bottom against the upper-cased description and the first
//! rule with any matching keyword wins, so the order of [`BUILTIN_RULES`] is part of the
//! contract: multi-word terms such as `OIL FILTER` sit above the generic `OIL` tier, and
//! the whole fluids tier sits above `OIL SEAL`.

use serde::Deserialize;

pub const CABIN_FILTER: &str = "Cabin Filter";
pub const OIL_FILTER: &str = "Oil Filter";
pub const AIR_FILTER: &str = "Air Filter";
pub const BRAKES: &str = "Brakes";
pub const IGNITION: &str = "Ignition (Plugs/Coils)";
pub const FLUIDS: &str = "Fluids & Oils";
pub const SUSPENSION: &str = "Suspension (Absorbers/Links)";
pub const BELTS: &str = "Belts";
pub const GASKETS_SEALS: &str = "Gaskets & Seals";
pub const COOLING: &str = "Cooling System";
pub const BATTERY: &str = "Battery";
pub const WIPERS: &str = "Wipers";
pub const ELECTRICAL: &str = "Electrical/Relays";
/// Fallback for descriptions no rule matches.
pub const OTHER: &str = "Other/Hardware";

pub const BUILTIN_RULES: &[(&str, &[&str])] = &[
    (CABIN_FILTER, &["CABIN FILTER"]),
    (OIL_FILTER, &["OIL FILTER"]),
    (AIR_FILTER, &["AIR FILTER"]),
    (
        BRAKES,
        &[
            "BRAKE PAD",
            "BRAKE PUMP",
            "BRAKE SHOE",
            "BRAKE CALIPER",
            "BRAKE SWITCH",
            "DISC ROTOR",
        ],
    ),
    (
        IGNITION,
        &["SPARK PLUG", "PLUG CABLE", "IGNITION COIL", "PLUG SEAL"],
    ),
    (FLUIDS, &["OIL", "FLUID", "ATF", "CVT", "GEAR OIL"]),
    (
        SUSPENSION,
        &[
            "ABSORBER",
            "LOWER ARM",
            "STABILIZER",
            "BALL JOINT",
            "RACK END",
            "TIE ROD",
        ],
    ),
    (BELTS, &["BELT", "PK", "BANDO"]),
    (GASKETS_SEALS, &["GASKET", "OIL SEAL", "CAM SEAL", "O-RING"]),
    (
        COOLING,
        &[
            "COOLANT",
            "RADIATOR",
            "WATER PUMP",
            "FAN MOTOR",
            "THERMOSTAT",
            "HOSE",
        ],
    ),
    (BATTERY, &["BATTERY", "NS40", "DIN55"]),
    (WIPERS, &["WIPER"]),
    (
        ELECTRICAL,
        &[
            "RELAY",
            "BULB",
            "FUSE",
            "SWITCH",
            "SENSOR",
            "ALTERNATOR",
            "STARTER",
        ],
    ),
];

/// Classify with the built-in rule table.
pub fn classify(description: &str) -> &'static str {
    let desc = description.to_uppercase();
    BUILTIN_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| desc.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(OTHER)
}

/// One (keyword set → category) rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Rule {
    pub category: String,
    pub keywords: Vec<String>,
}

impl Rule {
    pub fn new<I, S>(category: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            category: category.into(),
            keywords: keywords
                .into_iter()
                .map(|k| k.into().to_uppercase())
                .collect(),
        }
    }

    fn matches(&self, upper_description: &str) -> bool {
        self.keywords.iter().any(|k| upper_description.contains(k.as_str()))
    }
}

/// Ordered rule list with a fallback label. Pure and total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    rules: Vec<Rule>,
    fallback: String,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            rules: BUILTIN_RULES
                .iter()
                .map(|(category, keywords)| Rule::new(*category, keywords.iter().copied()))
                .collect(),
            fallback: OTHER.to_string(),
        }
    }
}

impl Classifier {
    /// Built-in table preceded by `extra` rules, which therefore take priority.
    pub fn with_extra_rules(extra: Vec<Rule>) -> Self {
        let mut classifier = Self::default();
        let extra = extra
            .into_iter()
            .map(|r| Rule::new(r.category, r.keywords))
            .collect::<Vec<_>>();
        classifier.rules.splice(0..0, extra);
        classifier
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn classify(&self, description: &str) -> &str {
        let desc = description.to_uppercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&desc))
            .map(|rule| rule.category.as_str())
            .unwrap_or(&self.fallback)
    }
}
