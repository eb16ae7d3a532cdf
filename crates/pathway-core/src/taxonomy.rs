//! Tier vocabularies shared by catalog resources and student profiles.
//!
//! Every categorical attribute maps to an explicit ordinal. Lower ordinals always
//! mean lower barrier or lower intensity, so a distance in encoded space reads the
//! same way for every attribute of a dimension.

use serde::{Deserialize, Serialize};

/// Version of the tier → ordinal tables below. Persisted model state records it
/// and is rejected when it differs.
pub const MAPPING_TABLE_VERSION: &str = "mapping.v1";

pub trait OrdinalTier: Copy + Eq + Sized + 'static {
    const ATTRIBUTE: &'static str;
    const ALL: &'static [Self];
    const DEFAULT: Self;

    fn ordinal(self) -> u8;

    fn as_str(self) -> &'static str;

    /// Parse a canonical label or a known catalog spelling of it.
    fn parse(value: &str) -> Option<Self>;

    #[must_use]
    fn from_ordinal(value: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|tier| tier.ordinal() == value)
    }

    /// Parse `value`, treating a blank cell as absent.
    ///
    /// # Errors
    /// Returns the offending label when it is not blank and cannot be parsed.
    fn parse_optional(value: &str) -> Result<Option<Self>, String> {
        if value.trim().is_empty() {
            return Ok(None);
        }
        Self::parse(value).map(Some).ok_or_else(|| value.trim().to_string())
    }
}

/// Lowercase, collapse separators to `_`, drop surrounding punctuation.
#[must_use]
pub fn normalize_label(value: &str) -> String {
    let mut normalized = String::with_capacity(value.len());
    let mut pending_separator = false;
    for ch in value.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_separator && !normalized.is_empty() {
                normalized.push('_');
            }
            pending_separator = false;
            normalized.extend(ch.to_lowercase());
        } else {
            pending_separator = true;
        }
    }
    normalized
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FinancialBarrier {
    Low,
    Medium,
    High,
    Prohibitive,
}

impl OrdinalTier for FinancialBarrier {
    const ATTRIBUTE: &'static str = "financial_barrier";
    const ALL: &'static [Self] = &[Self::Low, Self::Medium, Self::High, Self::Prohibitive];
    const DEFAULT: Self = Self::Low;

    fn ordinal(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Prohibitive => 3,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Prohibitive => "prohibitive",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match normalize_label(value).as_str() {
            "low" | "none" => Some(Self::Low),
            "medium" | "moderate" => Some(Self::Medium),
            "high" => Some(Self::High),
            "prohibitive" | "very_high" => Some(Self::Prohibitive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HiddenCosts {
    None,
    Low,
    Medium,
    High,
}

impl OrdinalTier for HiddenCosts {
    const ATTRIBUTE: &'static str = "hidden_costs";
    const ALL: &'static [Self] = &[Self::None, Self::Low, Self::Medium, Self::High];
    const DEFAULT: Self = Self::Low;

    fn ordinal(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match normalize_label(value).as_str() {
            "none" => Some(Self::None),
            "low" => Some(Self::Low),
            "medium" | "moderate" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    Free,
    LowCost,
    MediumCost,
    HighCost,
}

impl CostCategory {
    /// Display label with the dollar band a cost tier stands for.
    #[must_use]
    pub fn display_label(self) -> &'static str {
        match self {
            Self::Free => "Free ($0)",
            Self::LowCost => "Low Cost ($1-$500)",
            Self::MediumCost => "Medium Cost ($501-$2K)",
            Self::HighCost => "High Cost ($2K+)",
        }
    }
}

impl OrdinalTier for CostCategory {
    const ATTRIBUTE: &'static str = "cost_category";
    const ALL: &'static [Self] = &[Self::Free, Self::LowCost, Self::MediumCost, Self::HighCost];
    const DEFAULT: Self = Self::Free;

    fn ordinal(self) -> u8 {
        match self {
            Self::Free => 0,
            Self::LowCost => 1,
            Self::MediumCost => 2,
            Self::HighCost => 3,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::LowCost => "low_cost",
            Self::MediumCost => "medium_cost",
            Self::HighCost => "high_cost",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        let normalized = normalize_label(value);
        match normalized.as_str() {
            "free" | "free_0" | "no_cost" => Some(Self::Free),
            "low_cost" | "low" => Some(Self::LowCost),
            "medium_cost" | "medium" | "moderate_cost" => Some(Self::MediumCost),
            "high_cost" | "high" => Some(Self::HighCost),
            _ if normalized.starts_with("free_") => Some(Self::Free),
            _ if normalized.starts_with("low_cost_") => Some(Self::LowCost),
            _ if normalized.starts_with("medium_cost_") => Some(Self::MediumCost),
            _ if normalized.starts_with("high_cost_") => Some(Self::HighCost),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Virtual,
    Hybrid,
    InPerson,
}

impl OrdinalTier for DeliveryMode {
    const ATTRIBUTE: &'static str = "delivery_mode";
    const ALL: &'static [Self] = &[Self::Virtual, Self::Hybrid, Self::InPerson];
    const DEFAULT: Self = Self::Virtual;

    fn ordinal(self) -> u8 {
        match self {
            Self::Virtual => 0,
            Self::Hybrid => 1,
            Self::InPerson => 2,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Virtual => "virtual",
            Self::Hybrid => "hybrid",
            Self::InPerson => "in_person",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match normalize_label(value).as_str() {
            "virtual" | "online" | "remote" => Some(Self::Virtual),
            "hybrid" | "blended" => Some(Self::Hybrid),
            "in_person" | "inperson" | "on_site" | "onsite" => Some(Self::InPerson),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Transportation {
    No,
    Optional,
    Yes,
}

impl OrdinalTier for Transportation {
    const ATTRIBUTE: &'static str = "transportation";
    const ALL: &'static [Self] = &[Self::No, Self::Optional, Self::Yes];
    const DEFAULT: Self = Self::No;

    fn ordinal(self) -> u8 {
        match self {
            Self::No => 0,
            Self::Optional => 1,
            Self::Yes => 2,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Optional => "optional",
            Self::Yes => "yes",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match normalize_label(value).as_str() {
            "no" | "false" | "not_required" | "none" => Some(Self::No),
            "optional" | "sometimes" => Some(Self::Optional),
            "yes" | "true" | "required" => Some(Self::Yes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Low,
    Medium,
    High,
}

impl OrdinalTier for Connectivity {
    const ATTRIBUTE: &'static str = "connectivity";
    const ALL: &'static [Self] = &[Self::Low, Self::Medium, Self::High];
    const DEFAULT: Self = Self::Medium;

    fn ordinal(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match normalize_label(value).as_str() {
            "low" | "none" | "offline" => Some(Self::Low),
            "medium" | "moderate" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PrerequisiteLevel {
    None,
    Beginner,
    Intermediate,
    Advanced,
}

impl OrdinalTier for PrerequisiteLevel {
    const ATTRIBUTE: &'static str = "prerequisite_level";
    const ALL: &'static [Self] = &[Self::None, Self::Beginner, Self::Intermediate, Self::Advanced];
    const DEFAULT: Self = Self::Beginner;

    fn ordinal(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Beginner => 1,
            Self::Intermediate => 2,
            Self::Advanced => 3,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match normalize_label(value).as_str() {
            "none" | "no_prerequisites" => Some(Self::None),
            "beginner" | "basic" | "introductory" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SupportLevel {
    Low,
    Medium,
    High,
}

impl OrdinalTier for SupportLevel {
    const ATTRIBUTE: &'static str = "support_level";
    const ALL: &'static [Self] = &[Self::Low, Self::Medium, Self::High];
    const DEFAULT: Self = Self::Medium;

    fn ordinal(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match normalize_label(value).as_str() {
            "low" | "minimal" => Some(Self::Low),
            "medium" | "moderate" => Some(Self::Medium),
            "high" | "extensive" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StructureType {
    SelfPaced,
    Flexible,
    Scheduled,
}

impl OrdinalTier for StructureType {
    const ATTRIBUTE: &'static str = "structure_type";
    const ALL: &'static [Self] = &[Self::SelfPaced, Self::Flexible, Self::Scheduled];
    const DEFAULT: Self = Self::Flexible;

    fn ordinal(self) -> u8 {
        match self {
            Self::SelfPaced => 0,
            Self::Flexible => 1,
            Self::Scheduled => 2,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::SelfPaced => "self_paced",
            Self::Flexible => "flexible",
            Self::Scheduled => "scheduled",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match normalize_label(value).as_str() {
            "self_paced" | "selfpaced" | "asynchronous" => Some(Self::SelfPaced),
            "flexible" | "mixed" => Some(Self::Flexible),
            "scheduled" | "structured" | "cohort" | "synchronous" => Some(Self::Scheduled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FinancialSituation {
    Low,
    Medium,
    High,
}

impl OrdinalTier for FinancialSituation {
    const ATTRIBUTE: &'static str = "financial_situation";
    const ALL: &'static [Self] = &[Self::Low, Self::Medium, Self::High];
    const DEFAULT: Self = Self::Medium;

    fn ordinal(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match normalize_label(value).as_str() {
            "low" | "low_income" => Some(Self::Low),
            "medium" | "moderate" | "middle" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AcademicLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl OrdinalTier for AcademicLevel {
    const ATTRIBUTE: &'static str = "academic_level";
    const ALL: &'static [Self] = &[Self::Beginner, Self::Intermediate, Self::Advanced];
    const DEFAULT: Self = Self::Beginner;

    // Shares the prerequisite scale so that a beginner lands on beginner resources.
    fn ordinal(self) -> u8 {
        match self {
            Self::Beginner => 1,
            Self::Intermediate => 2,
            Self::Advanced => 3,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match normalize_label(value).as_str() {
            "beginner" | "basic" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MappingEntry {
    pub attribute: String,
    pub label: String,
    pub ordinal: u8,
}

fn entries_for<T: OrdinalTier>(entries: &mut Vec<MappingEntry>) {
    for tier in T::ALL {
        entries.push(MappingEntry {
            attribute: T::ATTRIBUTE.to_string(),
            label: tier.as_str().to_string(),
            ordinal: tier.ordinal(),
        });
    }
}

/// Flattened view of every tier table, in attribute order.
#[must_use]
pub fn mapping_table() -> Vec<MappingEntry> {
    let mut entries = Vec::new();
    entries_for::<FinancialBarrier>(&mut entries);
    entries_for::<HiddenCosts>(&mut entries);
    entries_for::<CostCategory>(&mut entries);
    entries_for::<DeliveryMode>(&mut entries);
    entries_for::<Transportation>(&mut entries);
    entries_for::<Connectivity>(&mut entries);
    entries_for::<PrerequisiteLevel>(&mut entries);
    entries_for::<SupportLevel>(&mut entries);
    entries_for::<StructureType>(&mut entries);
    entries_for::<FinancialSituation>(&mut entries);
    entries_for::<AcademicLevel>(&mut entries);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_round_trips<T: OrdinalTier + std::fmt::Debug>() {
        for tier in T::ALL {
            assert_eq!(T::from_ordinal(tier.ordinal()), Some(*tier), "{}", T::ATTRIBUTE);
            assert_eq!(T::parse(tier.as_str()), Some(*tier), "{}", T::ATTRIBUTE);
        }
    }

    fn assert_strictly_increasing<T: OrdinalTier>() {
        let ordinals = T::ALL.iter().map(|tier| tier.ordinal()).collect::<Vec<_>>();
        assert!(
            ordinals.windows(2).all(|pair| pair[0] < pair[1]),
            "{} ordinals must increase with barrier/intensity: {ordinals:?}",
            T::ATTRIBUTE
        );
    }

    // Test IDs: TMAP-001
    #[test]
    fn every_tier_round_trips_through_ordinal_and_label() {
        assert_round_trips::<FinancialBarrier>();
        assert_round_trips::<HiddenCosts>();
        assert_round_trips::<CostCategory>();
        assert_round_trips::<DeliveryMode>();
        assert_round_trips::<Transportation>();
        assert_round_trips::<Connectivity>();
        assert_round_trips::<PrerequisiteLevel>();
        assert_round_trips::<SupportLevel>();
        assert_round_trips::<StructureType>();
        assert_round_trips::<FinancialSituation>();
        assert_round_trips::<AcademicLevel>();
    }

    // Test IDs: TMAP-002
    #[test]
    fn tier_tables_are_ordered_low_to_high() {
        assert_strictly_increasing::<FinancialBarrier>();
        assert_strictly_increasing::<HiddenCosts>();
        assert_strictly_increasing::<CostCategory>();
        assert_strictly_increasing::<DeliveryMode>();
        assert_strictly_increasing::<Transportation>();
        assert_strictly_increasing::<Connectivity>();
        assert_strictly_increasing::<PrerequisiteLevel>();
        assert_strictly_increasing::<SupportLevel>();
        assert_strictly_increasing::<StructureType>();
        assert_strictly_increasing::<FinancialSituation>();
        assert_strictly_increasing::<AcademicLevel>();
    }

    // Test IDs: TMAP-003
    #[test]
    fn catalog_spellings_parse_to_canonical_tiers() {
        assert_eq!(CostCategory::parse("Low-cost"), Some(CostCategory::LowCost));
        assert_eq!(CostCategory::parse("Free ($0)"), Some(CostCategory::Free));
        assert_eq!(CostCategory::parse("High Cost ($2K+)"), Some(CostCategory::HighCost));
        assert_eq!(DeliveryMode::parse("In-person"), Some(DeliveryMode::InPerson));
        assert_eq!(Transportation::parse("Required"), Some(Transportation::Yes));
        assert_eq!(FinancialBarrier::parse(" Prohibitive "), Some(FinancialBarrier::Prohibitive));
        assert_eq!(StructureType::parse("Self-paced"), Some(StructureType::SelfPaced));
        assert_eq!(SupportLevel::parse("unknown"), None);
    }

    // Test IDs: TMAP-004
    #[test]
    fn blank_cells_parse_as_absent_and_garbage_is_reported() {
        assert_eq!(HiddenCosts::parse_optional("  "), Ok(None));
        assert_eq!(HiddenCosts::parse_optional("High"), Ok(Some(HiddenCosts::High)));
        assert_eq!(HiddenCosts::parse_optional("lots"), Err("lots".to_string()));
    }

    // Test IDs: TMAP-005
    #[test]
    fn mapping_table_lists_every_tier_once() {
        let table = mapping_table();
        let mut keys = table
            .iter()
            .map(|entry| (entry.attribute.clone(), entry.label.clone()))
            .collect::<Vec<_>>();
        let total = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), total);
        assert!(table.iter().any(|entry| entry.attribute == "financial_barrier"
            && entry.label == "prohibitive"
            && entry.ordinal == 3));
    }

    #[test]
    fn normalize_label_collapses_separators() {
        assert_eq!(normalize_label("  In-Person "), "in_person");
        assert_eq!(normalize_label("Free ($0)"), "free_0");
        assert_eq!(normalize_label("--"), "");
    }
}
