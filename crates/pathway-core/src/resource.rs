use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::PathwayError;
use crate::taxonomy::{
    Connectivity, CostCategory, DeliveryMode, FinancialBarrier, HiddenCosts, OrdinalTier,
    PrerequisiteLevel, StructureType, SupportLevel, Transportation,
};

/// Confidence at or above which a predicted value counts as reliable.
pub const HIGH_CONFIDENCE_THRESHOLD: f32 = 0.70;

/// Grade midpoint assumed when a resource does not state a target grade.
pub const DEFAULT_GRADE_MIDPOINT: f32 = 9.0;

/// Weekly hours assumed when a resource does not state a usable time commitment.
pub const DEFAULT_WEEKLY_HOURS: f32 = 5.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct ResourceId(pub u32);

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReliabilityFlag {
    Observed,
    HighConfidencePredicted,
    LowConfidencePredicted,
}

impl ReliabilityFlag {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Observed => "observed",
            Self::HighConfidencePredicted => "high_confidence_predicted",
            Self::LowConfidencePredicted => "low_confidence_predicted",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match crate::taxonomy::normalize_label(value).as_str() {
            "observed" | "original" => Some(Self::Observed),
            "high_confidence_predicted" | "high_confidence" | "high" => {
                Some(Self::HighConfidencePredicted)
            }
            "low_confidence_predicted" | "low_confidence" | "low" => {
                Some(Self::LowConfidencePredicted)
            }
            _ => None,
        }
    }

    /// Derive a flag from a model prediction marker and its confidence.
    #[must_use]
    pub fn from_prediction(predicted: bool, confidence: Option<f32>) -> Self {
        if !predicted {
            return Self::Observed;
        }
        match confidence {
            Some(value) if value >= HIGH_CONFIDENCE_THRESHOLD => Self::HighConfidencePredicted,
            _ => Self::LowConfidencePredicted,
        }
    }

    #[must_use]
    pub fn requires_value(self) -> bool {
        matches!(self, Self::Observed | Self::HighConfidencePredicted)
    }
}

/// A catalog attribute that may have been filled in by an upstream model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct Predicted<T> {
    pub value: Option<T>,
    pub reliability: ReliabilityFlag,
}

impl<T: Copy> Predicted<T> {
    #[must_use]
    pub fn observed(value: T) -> Self {
        Self { value: Some(value), reliability: ReliabilityFlag::Observed }
    }

    /// A blank cell carries no usable observation.
    #[must_use]
    pub fn missing() -> Self {
        Self { value: None, reliability: ReliabilityFlag::LowConfidencePredicted }
    }

    /// The value when it may take part in clustering.
    #[must_use]
    pub fn usable(&self, allow_low_confidence: bool) -> Option<T> {
        match self.reliability {
            ReliabilityFlag::LowConfidencePredicted if !allow_low_confidence => None,
            _ => self.value,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubjectTag {
    pub tier1: String,
    pub tier2: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Category {
    pub tier1: String,
    pub tier2: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GradeRange {
    pub min: f32,
    pub max: f32,
}

impl GradeRange {
    /// Parse labels such as `9-12`, `K-5`, `Grade 6` or `K`.
    ///
    /// Returns `None` when the label carries no grade at all.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let upper = value.to_uppercase();
        let mut grades = Vec::new();
        for token in upper.split(|ch: char| !ch.is_alphanumeric()).filter(|token| !token.is_empty())
        {
            if token == "K" || token == "KINDERGARTEN" {
                grades.push(0.0);
                continue;
            }
            let digits = token.trim_start_matches('K');
            if digits.len() < token.len()
                && !digits.is_empty()
                && digits.chars().all(|ch| ch.is_ascii_digit())
            {
                // K12 style shorthand.
                grades.push(0.0);
            }
            let leading = digits.chars().take_while(char::is_ascii_digit).collect::<String>();
            if !leading.is_empty() {
                grades.push(parse_grade_digits(&leading));
            }
        }

        if grades.is_empty() {
            return None;
        }
        let min = grades.iter().copied().fold(f32::INFINITY, f32::min);
        let max = grades.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        Some(Self { min, max })
    }

    #[must_use]
    pub fn midpoint(&self) -> f32 {
        (self.min + self.max) / 2.0
    }

    /// Whether `grade` falls inside the range widened by `tolerance` on both sides.
    #[must_use]
    pub fn admits(&self, grade: f32, tolerance: f32) -> bool {
        grade >= self.min - tolerance && grade <= self.max + tolerance
    }

    #[must_use]
    pub fn label(&self) -> String {
        let render = |grade: f32| {
            if grade <= 0.0 {
                "K".to_string()
            } else {
                format!("{grade:.0}")
            }
        };
        if (self.max - self.min).abs() < f32::EPSILON {
            render(self.min)
        } else {
            format!("{}-{}", render(self.min), render(self.max))
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn parse_grade_digits(digits: &str) -> f32 {
    digits.parse::<u32>().map_or(DEFAULT_GRADE_MIDPOINT, |value| value as f32)
}

/// Convert a free-form time commitment into hours per week.
///
/// Daily figures are multiplied by seven, monthly figures are amortized over a
/// year, minutes are converted to hours, and self-paced or unparseable values fall
/// back to [`DEFAULT_WEEKLY_HOURS`]. Several numbers are averaged.
#[must_use]
pub fn parse_weekly_hours(value: &str) -> f32 {
    let lower = value.to_lowercase();
    if lower.trim().is_empty() || lower.contains("self-paced") || lower.contains("variable") {
        return DEFAULT_WEEKLY_HOURS;
    }

    let numbers = extract_numbers(&lower);
    if numbers.is_empty() {
        return DEFAULT_WEEKLY_HOURS;
    }
    #[allow(clippy::cast_precision_loss)]
    let average = numbers.iter().sum::<f32>() / numbers.len() as f32;

    if lower.contains("week") {
        average
    } else if lower.contains("month") {
        average * 4.0 * 5.0 / 12.0
    } else if lower.contains("day") {
        average * 7.0
    } else if lower.contains("minute") && !lower.contains("hour") {
        average / 60.0
    } else {
        average
    }
}

fn extract_numbers(value: &str) -> Vec<f32> {
    let mut numbers = Vec::new();
    let mut current = String::new();
    for ch in value.chars() {
        if ch.is_ascii_digit() || (ch == '.' && !current.is_empty() && !current.contains('.')) {
            current.push(ch);
        } else if !current.is_empty() {
            if let Ok(number) = current.trim_end_matches('.').parse::<f32>() {
                numbers.push(number);
            }
            current.clear();
        }
    }
    if let Ok(number) = current.trim_end_matches('.').parse::<f32>() {
        numbers.push(number);
    }
    numbers
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessibilityAttributes {
    pub financial_barrier: Predicted<FinancialBarrier>,
    pub hidden_costs: Predicted<HiddenCosts>,
    pub cost_category: Option<CostCategory>,
    pub delivery_mode: Option<DeliveryMode>,
    pub transportation: Option<Transportation>,
    pub connectivity: Predicted<Connectivity>,
    pub rural_accessible: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcademicAttributes {
    pub prerequisite: Option<PrerequisiteLevel>,
    pub target_grade: Option<GradeRange>,
    pub weekly_hours: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormatAttributes {
    pub support_level: Option<SupportLevel>,
    pub structure_type: Option<StructureType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub resource_id: ResourceId,
    pub name: String,
    pub description: String,
    pub url: String,
    pub category: Category,
    pub subjects: Vec<SubjectTag>,
    pub accessibility: AccessibilityAttributes,
    pub academic: AcademicAttributes,
    pub format: FormatAttributes,
    #[serde(default)]
    pub search_text: Option<String>,
}

impl Resource {
    /// Validate one catalog row before it is persisted or encoded.
    ///
    /// # Errors
    /// Returns [`PathwayError::Validation`] when identity, subject tagging, numeric
    /// ranges, or the reliability/value pairing of a predicted attribute is violated.
    pub fn validate(&self) -> Result<(), PathwayError> {
        if self.name.trim().is_empty() {
            return Err(PathwayError::Validation(format!(
                "resource {}: name MUST be non-empty",
                self.resource_id
            )));
        }

        if self.subjects.is_empty() || self.subjects.iter().any(|tag| tag.tier1.trim().is_empty())
        {
            return Err(PathwayError::Validation(format!(
                "resource {}: at least one non-empty subject tag MUST be provided",
                self.resource_id
            )));
        }

        if self.category.tier1.trim().is_empty() {
            return Err(PathwayError::Validation(format!(
                "resource {}: category_tier1 MUST be non-empty",
                self.resource_id
            )));
        }

        check_predicted(self.resource_id, &self.accessibility.financial_barrier)?;
        check_predicted(self.resource_id, &self.accessibility.hidden_costs)?;
        check_predicted(self.resource_id, &self.accessibility.connectivity)?;

        if let Some(hours) = self.academic.weekly_hours {
            if !hours.is_finite() || hours < 0.0 {
                return Err(PathwayError::Validation(format!(
                    "resource {}: weekly_hours MUST be a finite non-negative number",
                    self.resource_id
                )));
            }
        }

        if let Some(range) = self.academic.target_grade {
            if !range.min.is_finite() || !range.max.is_finite() || range.min > range.max {
                return Err(PathwayError::Validation(format!(
                    "resource {}: target_grade range MUST satisfy min <= max",
                    self.resource_id
                )));
            }
        }

        Ok(())
    }

    /// Text indexed for interest similarity.
    #[must_use]
    pub fn similarity_text(&self) -> String {
        if let Some(text) = self.search_text.as_deref().filter(|text| !text.trim().is_empty()) {
            return text.to_string();
        }

        let mut parts = vec![
            self.name.clone(),
            self.description.clone(),
            self.category.tier1.clone(),
            self.category.tier2.clone(),
        ];
        for tag in &self.subjects {
            parts.push(tag.tier1.clone());
            if let Some(tier2) = &tag.tier2 {
                parts.push(tier2.clone());
            }
        }
        parts.retain(|part| !part.trim().is_empty());
        parts.join(" ")
    }

    #[must_use]
    pub fn primary_subject(&self) -> &str {
        self.subjects.first().map_or("", |tag| tag.tier1.as_str())
    }

    #[must_use]
    pub fn grade_midpoint(&self) -> f32 {
        self.academic.target_grade.map_or(DEFAULT_GRADE_MIDPOINT, |range| range.midpoint())
    }

    #[must_use]
    pub fn weekly_hours(&self) -> f32 {
        self.academic.weekly_hours.unwrap_or(DEFAULT_WEEKLY_HOURS)
    }
}

fn check_predicted<T: OrdinalTier>(
    resource_id: ResourceId,
    attribute: &Predicted<T>,
) -> Result<(), PathwayError> {
    if attribute.reliability.requires_value() && attribute.value.is_none() {
        return Err(PathwayError::Validation(format!(
            "resource {resource_id}: {} MUST carry a value when flagged {}",
            T::ATTRIBUTE,
            attribute.reliability.as_str()
        )));
    }
    Ok(())
}
