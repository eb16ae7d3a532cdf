use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::PathwayError;
use crate::taxonomy::{
    normalize_label, AcademicLevel, DeliveryMode, FinancialSituation, OrdinalTier, SupportLevel,
};

pub const MAX_GRADE_LEVEL: u8 = 12;
pub const MAX_SUBJECT_AREAS: usize = 5;
pub const MAX_FORMAT_PREFERENCES: usize = 5;
pub const MAX_WEEKLY_HOURS: f32 = 80.0;
pub const MAX_INTEREST_CHARS: usize = 2_000;

fn default_location() -> DeliveryMode {
    DeliveryMode::Virtual
}

fn default_academic_level() -> AcademicLevel {
    AcademicLevel::Beginner
}

fn default_time_availability() -> f32 {
    5.0
}

fn default_support_need() -> SupportLevel {
    SupportLevel::Medium
}

// Location labels meaning "any delivery mode" resolve to the default.
const NO_LOCATION_PREFERENCE: [&str; 4] = ["no_preference", "any", "either", "none"];

fn tier_label<'de, D, T>(deserializer: D, field: &str) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: OrdinalTier,
{
    let raw = String::deserialize(deserializer)?;
    T::parse(&raw).ok_or_else(|| {
        let labels = T::ALL.iter().map(|tier| tier.as_str()).collect::<Vec<_>>().join(", ");
        D::Error::custom(format!("{field} MUST be one of [{labels}], got `{}`", raw.trim()))
    })
}

fn financial_situation_label<'de, D>(deserializer: D) -> Result<FinancialSituation, D::Error>
where
    D: Deserializer<'de>,
{
    tier_label(deserializer, "financial_situation")
}

fn academic_level_label<'de, D>(deserializer: D) -> Result<AcademicLevel, D::Error>
where
    D: Deserializer<'de>,
{
    tier_label(deserializer, "academic_level")
}

fn support_needed_label<'de, D>(deserializer: D) -> Result<SupportLevel, D::Error>
where
    D: Deserializer<'de>,
{
    tier_label(deserializer, "support_needed")
}

fn location_preference_label<'de, D>(deserializer: D) -> Result<DeliveryMode, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if NO_LOCATION_PREFERENCE.contains(&normalize_label(&raw).as_str()) {
        return Ok(default_location());
    }
    DeliveryMode::parse(&raw).ok_or_else(|| {
        D::Error::custom(format!(
            "location_preference MUST be one of [virtual, hybrid, in_person, no_preference], \
             got `{}`",
            raw.trim()
        ))
    })
}

/// One student's query. Unknown JSON fields are ignored and every optional field
/// falls back to the documented default. Tier fields accept any known spelling
/// (`"Low"`, `"In-person"`), not only the canonical snake_case label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudentProfile {
    /// Kindergarten is grade 0.
    pub grade_level: u8,
    #[serde(deserialize_with = "financial_situation_label")]
    pub financial_situation: FinancialSituation,
    #[serde(default = "default_location", deserialize_with = "location_preference_label")]
    pub location_preference: DeliveryMode,
    #[serde(default)]
    pub transportation_available: bool,
    #[serde(default = "default_academic_level", deserialize_with = "academic_level_label")]
    pub academic_level: AcademicLevel,
    /// Hours per week.
    #[serde(default = "default_time_availability")]
    pub time_availability: f32,
    #[serde(default = "default_support_need", deserialize_with = "support_needed_label")]
    pub support_needed: SupportLevel,
    #[serde(default)]
    pub interests: String,
    #[serde(default)]
    pub subject_areas: Vec<String>,
    #[serde(default)]
    pub format_preferences: Vec<String>,
}

impl StudentProfile {
    /// Profile with every optional field at its default.
    #[must_use]
    pub fn new(grade_level: u8, financial_situation: FinancialSituation) -> Self {
        Self {
            grade_level,
            financial_situation,
            location_preference: default_location(),
            transportation_available: false,
            academic_level: default_academic_level(),
            time_availability: default_time_availability(),
            support_needed: default_support_need(),
            interests: String::new(),
            subject_areas: Vec::new(),
            format_preferences: Vec::new(),
        }
    }

    /// Validate one profile before it reaches the encoder.
    ///
    /// # Errors
    /// Returns [`PathwayError::Validation`] naming the first violated field.
    pub fn validate(&self) -> Result<(), PathwayError> {
        if self.grade_level > MAX_GRADE_LEVEL {
            return Err(PathwayError::Validation(format!(
                "grade_level MUST be in [0, {MAX_GRADE_LEVEL}], got {}",
                self.grade_level
            )));
        }

        if !self.time_availability.is_finite()
            || self.time_availability < 0.0
            || self.time_availability > MAX_WEEKLY_HOURS
        {
            return Err(PathwayError::Validation(format!(
                "time_availability MUST be in [0, {MAX_WEEKLY_HOURS}] hours per week"
            )));
        }

        if self.interests.chars().count() > MAX_INTEREST_CHARS {
            return Err(PathwayError::Validation(format!(
                "interests MUST be at most {MAX_INTEREST_CHARS} characters"
            )));
        }

        check_list("subject_areas", &self.subject_areas, MAX_SUBJECT_AREAS)?;
        check_list("format_preferences", &self.format_preferences, MAX_FORMAT_PREFERENCES)?;

        Ok(())
    }
}

fn check_list(field: &str, values: &[String], limit: usize) -> Result<(), PathwayError> {
    if values.len() > limit {
        return Err(PathwayError::Validation(format!(
            "{field} MUST contain at most {limit} entries, got {}",
            values.len()
        )));
    }
    if values.iter().any(|value| value.trim().is_empty()) {
        return Err(PathwayError::Validation(format!("{field} entries MUST be non-empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_validation_error_contains(profile: &StudentProfile, expected_substring: &str) {
        match profile.validate() {
            Err(PathwayError::Validation(message)) => {
                assert!(
                    message.contains(expected_substring),
                    "expected `{expected_substring}` in `{message}`"
                );
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    // Test IDs: TPRO-001
    #[test]
    fn missing_optional_fields_take_defaults_and_unknown_fields_are_ignored() {
        let profile: StudentProfile = match serde_json::from_value(serde_json::json!({
            "grade_level": 10,
            "financial_situation": "low",
            "favorite_color": "green"
        })) {
            Ok(profile) => profile,
            Err(err) => panic!("profile should deserialize: {err}"),
        };
        assert_eq!(profile, StudentProfile::new(10, FinancialSituation::Low));
        assert!(profile.validate().is_ok());
    }

    // Test IDs: TPRO-002
    #[test]
    fn out_of_range_grade_is_rejected_with_field_name() {
        let profile = StudentProfile::new(13, FinancialSituation::Medium);
        assert_validation_error_contains(&profile, "grade_level MUST be in [0, 12]");
    }

    // Test IDs: TPRO-003
    #[test]
    fn oversized_lists_are_rejected() {
        let mut profile = StudentProfile::new(9, FinancialSituation::Medium);
        profile.subject_areas = (0..6).map(|index| format!("subject-{index}")).collect();
        assert_validation_error_contains(&profile, "subject_areas MUST contain at most 5");

        let mut profile = StudentProfile::new(9, FinancialSituation::Medium);
        profile.format_preferences = vec![" ".to_string()];
        assert_validation_error_contains(&profile, "format_preferences entries MUST be non-empty");
    }

    // Test IDs: TPRO-004
    #[test]
    fn non_finite_time_availability_is_rejected() {
        let mut profile = StudentProfile::new(9, FinancialSituation::High);
        profile.time_availability = f32::NAN;
        assert_validation_error_contains(&profile, "time_availability");
    }

    #[test]
    fn kindergarten_is_a_valid_grade() {
        let profile = StudentProfile::new(0, FinancialSituation::Low);
        assert!(profile.validate().is_ok());
    }

    fn parsed(value: serde_json::Value) -> StudentProfile {
        match serde_json::from_value(value) {
            Ok(profile) => profile,
            Err(err) => panic!("profile should deserialize: {err}"),
        }
    }

    // Test IDs: TPRO-005
    #[test]
    fn form_style_tier_labels_deserialize() {
        let profile = parsed(serde_json::json!({
            "grade_level": 11,
            "financial_situation": "Low",
            "location_preference": "In-person",
            "academic_level": "Intermediate",
            "support_needed": "High"
        }));
        assert_eq!(profile.financial_situation, FinancialSituation::Low);
        assert_eq!(profile.location_preference, DeliveryMode::InPerson);
        assert_eq!(profile.academic_level, AcademicLevel::Intermediate);
        assert_eq!(profile.support_needed, SupportLevel::High);

        let canonical = parsed(serde_json::json!({
            "grade_level": 11,
            "financial_situation": "low",
            "location_preference": "in_person"
        }));
        assert_eq!(canonical.location_preference, DeliveryMode::InPerson);
    }

    // Test IDs: TPRO-006
    #[test]
    fn no_location_preference_maps_to_default_delivery_mode() {
        let profile = parsed(serde_json::json!({
            "grade_level": 9,
            "financial_situation": "Medium",
            "location_preference": "No preference"
        }));
        assert_eq!(profile.location_preference, DeliveryMode::Virtual);
    }

    // Test IDs: TPRO-007
    #[test]
    fn unknown_tier_label_names_the_field() {
        let result = serde_json::from_value::<StudentProfile>(serde_json::json!({
            "grade_level": 9,
            "financial_situation": "Wealthy"
        }));
        match result {
            Err(err) => {
                let message = err.to_string();
                assert!(
                    message.contains("financial_situation MUST be one of [low, medium, high]"),
                    "unexpected message: {message}"
                );
            }
            Ok(profile) => panic!("expected deserialization error, got {profile:?}"),
        }
    }
}
