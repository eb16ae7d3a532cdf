use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use pathway_core::{
    parse_weekly_hours, AcademicAttributes, AccessibilityAttributes, Category, Connectivity,
    CostCategory, DeliveryMode, FinancialBarrier, FormatAttributes, GradeRange, HiddenCosts,
    OrdinalTier, PathwayError, Predicted, PrerequisiteLevel, ReliabilityFlag, Resource,
    ResourceId, StructureType, SubjectTag, SupportLevel, Transportation,
};

pub const REQUIRED_COLUMNS: [&str; 15] = [
    "resource_id",
    "name",
    "description",
    "url",
    "category_tier1",
    "category_tier2",
    "stem_field_tier1",
    "financial_barrier_level",
    "cost_category",
    "location_type",
    "transportation_required",
    "prerequisite_level",
    "target_grade",
    "time_commitment",
    "support_level",
];

const OPTIONAL_COLUMNS: [&str; 6] = [
    "stem_field_tier2",
    "hidden_costs_level",
    "internet_dependency",
    "rural_accessible",
    "structure_type",
    "tfidf_text",
];

const SUBJECT_SEPARATORS: [char; 2] = [';', '|'];

struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let index = headers
            .iter()
            .enumerate()
            .map(|(position, name)| (name.trim().to_lowercase(), position))
            .collect::<HashMap<_, _>>();
        if let Some(missing) = REQUIRED_COLUMNS.iter().find(|column| !index.contains_key(**column))
        {
            return Err(PathwayError::Schema(format!(
                "catalog is missing required column `{missing}`"
            ))
            .into());
        }
        Ok(Self { index })
    }

    fn has(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }
}

struct Row<'a> {
    line: u64,
    record: &'a csv::StringRecord,
    columns: &'a Columns,
}

impl Row<'_> {
    fn cell(&self, column: &str) -> &str {
        self.columns
            .index
            .get(column)
            .and_then(|position| self.record.get(*position))
            .map_or("", str::trim)
    }

    fn invalid(&self, column: &str, message: &str) -> PathwayError {
        PathwayError::Validation(format!("catalog line {}: {column} {message}", self.line))
    }

    fn tier<T: OrdinalTier>(&self, column: &str) -> Result<Option<T>, PathwayError> {
        T::parse_optional(self.cell(column)).map_err(|label| {
            self.invalid(column, &format!("MUST be a known {} label, got `{label}`", T::ATTRIBUTE))
        })
    }

    fn flag(&self, column: &str) -> Result<Option<bool>, PathwayError> {
        let value = self.cell(column);
        if value.is_empty() {
            return Ok(None);
        }
        match value.to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Ok(Some(true)),
            "false" | "no" | "n" | "0" => Ok(Some(false)),
            _ => Err(self.invalid(column, &format!("MUST be a boolean, got `{value}`"))),
        }
    }

    /// Value plus reliability for a predicted attribute. An explicit
    /// `<column>_reliability` cell wins; otherwise the flag is derived from
    /// `<column>_predicted` and `<column>_confidence` when those exist.
    fn predicted<T: OrdinalTier>(&self, column: &str) -> Result<Predicted<T>, PathwayError> {
        let value = self.tier::<T>(column)?;
        let reliability_column = format!("{column}_reliability");
        let predicted_column = format!("{column}_predicted");

        let explicit = self.cell(&reliability_column);
        let reliability = if !explicit.is_empty() {
            ReliabilityFlag::parse(explicit).ok_or_else(|| {
                self.invalid(
                    &reliability_column,
                    &format!("MUST be a known reliability flag, got `{explicit}`"),
                )
            })?
        } else if self.columns.has(&predicted_column) && !self.cell(&predicted_column).is_empty() {
            let was_predicted = self.flag(&predicted_column)?.unwrap_or(false);
            let confidence_column = format!("{column}_confidence");
            let confidence = self.number(&confidence_column)?;
            ReliabilityFlag::from_prediction(was_predicted, confidence)
        } else if value.is_some() {
            ReliabilityFlag::Observed
        } else {
            return Ok(Predicted::missing());
        };

        Ok(Predicted { value, reliability })
    }

    fn number(&self, column: &str) -> Result<Option<f32>, PathwayError> {
        let value = self.cell(column);
        if value.is_empty() {
            return Ok(None);
        }
        value
            .parse::<f32>()
            .ok()
            .filter(|number| number.is_finite())
            .map(Some)
            .ok_or_else(|| self.invalid(column, &format!("MUST be a number, got `{value}`")))
    }
}

/// Read a catalog CSV file.
///
/// # Errors
/// Returns an error when the file cannot be opened or any row is rejected by
/// [`parse_catalog`].
pub fn read_catalog(path: &Path) -> Result<Vec<Resource>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open catalog csv {}", path.display()))?;
    parse_catalog(file).with_context(|| format!("failed to import catalog {}", path.display()))
}

/// Parse catalog CSV rows into validated resources.
///
/// # Errors
/// Returns [`PathwayError::Schema`] for a missing required column or a repeated
/// `resource_id`, and [`PathwayError::Validation`] for a malformed cell or a row
/// that fails [`Resource::validate`].
pub fn parse_catalog<R: Read>(reader: R) -> Result<Vec<Resource>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = reader.headers().context("failed to read catalog header row")?.clone();
    let columns = Columns::from_headers(&headers)?;
    let absent = OPTIONAL_COLUMNS
        .iter()
        .filter(|column| !columns.has(column))
        .copied()
        .collect::<Vec<_>>();
    if !absent.is_empty() {
        tracing::debug!(?absent, "catalog lacks optional columns");
    }

    let mut resources = Vec::new();
    let mut seen = BTreeSet::new();
    for record in reader.records() {
        let record = record.context("failed to read catalog row")?;
        let line = record.position().map_or(0, csv::Position::line);
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let row = Row { line, record: &record, columns: &columns };
        let resource = parse_row(&row)?;
        resource.validate()?;
        if !seen.insert(resource.resource_id) {
            return Err(PathwayError::Schema(format!(
                "catalog line {line}: resource_id {} is repeated",
                resource.resource_id
            ))
            .into());
        }
        resources.push(resource);
    }

    tracing::debug!(resources = resources.len(), "catalog csv parsed");
    Ok(resources)
}

fn parse_row(row: &Row<'_>) -> Result<Resource, PathwayError> {
    let raw_id = row.cell("resource_id");
    let resource_id = raw_id.parse::<u32>().map(ResourceId).map_err(|_| {
        row.invalid("resource_id", &format!("MUST be a non-negative integer, got `{raw_id}`"))
    })?;

    let search_text = Some(row.cell("tfidf_text").to_string()).filter(|text| !text.is_empty());
    let time_commitment = row.cell("time_commitment");

    Ok(Resource {
        resource_id,
        name: row.cell("name").to_string(),
        description: row.cell("description").to_string(),
        url: row.cell("url").to_string(),
        category: Category {
            tier1: row.cell("category_tier1").to_string(),
            tier2: row.cell("category_tier2").to_string(),
        },
        subjects: parse_subjects(row.cell("stem_field_tier1"), row.cell("stem_field_tier2")),
        accessibility: AccessibilityAttributes {
            financial_barrier: row.predicted::<FinancialBarrier>("financial_barrier_level")?,
            hidden_costs: row.predicted::<HiddenCosts>("hidden_costs_level")?,
            cost_category: row.tier::<CostCategory>("cost_category")?,
            delivery_mode: row.tier::<DeliveryMode>("location_type")?,
            transportation: row.tier::<Transportation>("transportation_required")?,
            connectivity: row.predicted::<Connectivity>("internet_dependency")?,
            rural_accessible: row.flag("rural_accessible")?,
        },
        academic: AcademicAttributes {
            prerequisite: row.tier::<PrerequisiteLevel>("prerequisite_level")?,
            target_grade: GradeRange::parse(row.cell("target_grade")),
            weekly_hours: Some(time_commitment)
                .filter(|value| !value.is_empty())
                .map(parse_weekly_hours),
        },
        format: FormatAttributes {
            support_level: row.tier::<SupportLevel>("support_level")?,
            structure_type: row.tier::<StructureType>("structure_type")?,
        },
        search_text,
    })
}

/// Split multi-valued subject cells. Second-tier labels pair with first-tier labels
/// by position.
fn parse_subjects(tier1: &str, tier2: &str) -> Vec<SubjectTag> {
    let split = |cell: &str| {
        cell.split(SUBJECT_SEPARATORS)
            .map(str::trim)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
    };
    let second = split(tier2);
    split(tier1)
        .into_iter()
        .enumerate()
        .filter(|(_, label)| !label.is_empty())
        .map(|(position, label)| SubjectTag {
            tier1: label,
            tier2: second.get(position).filter(|value| !value.is_empty()).cloned(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "resource_id,name,description,url,category_tier1,category_tier2,\
        stem_field_tier1,stem_field_tier2,financial_barrier_level,cost_category,location_type,\
        transportation_required,prerequisite_level,target_grade,time_commitment,support_level,\
        hidden_costs_level,internet_dependency,rural_accessible,structure_type";

    fn parse(rows: &[&str]) -> Result<Vec<Resource>> {
        let mut text = HEADER.to_string();
        for row in rows {
            text.push('\n');
            text.push_str(row);
        }
        parse_catalog(text.as_bytes())
    }

    fn schema_message(err: &anyhow::Error) -> Option<String> {
        match err.downcast_ref::<PathwayError>() {
            Some(PathwayError::Schema(message)) => Some(message.clone()),
            _ => None,
        }
    }

    // Test IDs: TCSV-001
    #[test]
    fn parses_multi_valued_subjects_and_tiers() -> Result<()> {
        let resources = parse(&[
            "7,Robotics Club,Build robots,https://example.org/7,Competition,Team,\
             Engineering; AI/ML,Robotics|Machine Learning,Low,Free ($0),In-Person,Optional,\
             Intermediate,9-12,2 hours/day,High,None,Medium,yes,Scheduled",
        ])?;
        let resource = &resources[0];
        assert_eq!(resource.resource_id, ResourceId(7));
        assert_eq!(
            resource.subjects,
            vec![
                SubjectTag { tier1: "Engineering".into(), tier2: Some("Robotics".into()) },
                SubjectTag { tier1: "AI/ML".into(), tier2: Some("Machine Learning".into()) },
            ]
        );
        assert_eq!(resource.accessibility.cost_category, Some(CostCategory::Free));
        assert_eq!(resource.accessibility.delivery_mode, Some(DeliveryMode::InPerson));
        assert_eq!(resource.accessibility.transportation, Some(Transportation::Optional));
        assert_eq!(resource.accessibility.rural_accessible, Some(true));
        assert_eq!(
            resource.accessibility.financial_barrier,
            Predicted::observed(FinancialBarrier::Low)
        );
        assert_eq!(resource.academic.weekly_hours, Some(14.0));
        assert_eq!(resource.academic.target_grade, Some(GradeRange { min: 9.0, max: 12.0 }));
        assert_eq!(resource.format.structure_type, Some(StructureType::Scheduled));
        Ok(())
    }

    // Test IDs: TCSV-002
    #[test]
    fn missing_required_column_is_a_schema_error_naming_it() {
        let text = "resource_id,name\n1,Only a name\n";
        let err = match parse_catalog(text.as_bytes()) {
            Ok(_) => panic!("catalog without required columns should fail"),
            Err(err) => err,
        };
        let message = schema_message(&err).unwrap_or_else(|| panic!("schema error: {err:#}"));
        assert!(message.contains("`description`"), "{message}");
    }

    // Test IDs: TCSV-003
    #[test]
    fn blank_optional_cells_are_tolerated() -> Result<()> {
        let resources = parse(&[
            "3,Open Notes,Notes,https://example.org/3,Online Course,Self-paced,Mathematics,,\
             ,,,,,,,Medium,,,,",
        ])?;
        let resource = &resources[0];
        assert_eq!(resource.accessibility.financial_barrier, Predicted::missing());
        assert_eq!(resource.accessibility.cost_category, None);
        assert_eq!(resource.academic.target_grade, None);
        assert_eq!(resource.academic.weekly_hours, None);
        assert_eq!(resource.accessibility.rural_accessible, None);
        Ok(())
    }

    // Test IDs: TCSV-004
    #[test]
    fn reliability_follows_prediction_confidence_columns() -> Result<()> {
        let text = "resource_id,name,description,url,category_tier1,category_tier2,\
            stem_field_tier1,financial_barrier_level,financial_barrier_level_predicted,\
            financial_barrier_level_confidence,internet_dependency,internet_dependency_reliability,\
            cost_category,location_type,transportation_required,prerequisite_level,target_grade,\
            time_commitment,support_level\n\
            1,A,a,u,Camp,Summer,Biology,High,true,0.91,Low,low_confidence_predicted,Free,Virtual,\
            No,Beginner,6-8,3 hours/week,Medium\n\
            2,B,b,u,Camp,Summer,Biology,Medium,true,0.4,,,Free,Virtual,\
            No,Beginner,6-8,3 hours/week,Medium\n\
            3,C,c,u,Camp,Summer,Biology,Low,false,,,,Free,Virtual,\
            No,Beginner,6-8,3 hours/week,Medium";
        let resources = parse_catalog(text.as_bytes())?;
        let flags = resources
            .iter()
            .map(|resource| resource.accessibility.financial_barrier.reliability)
            .collect::<Vec<_>>();
        assert_eq!(
            flags,
            vec![
                ReliabilityFlag::HighConfidencePredicted,
                ReliabilityFlag::LowConfidencePredicted,
                ReliabilityFlag::Observed,
            ]
        );
        assert_eq!(
            resources[0].accessibility.connectivity.reliability,
            ReliabilityFlag::LowConfidencePredicted
        );
        Ok(())
    }

    // Test IDs: TCSV-005
    #[test]
    fn malformed_rows_are_rejected() {
        let unknown_label = parse(&[
            "1,A,a,u,Camp,Summer,Biology,,Astronomical,Free,Virtual,No,Beginner,6-8,3,Medium,,,,",
        ]);
        let err = match unknown_label {
            Ok(_) => panic!("unknown financial barrier label should fail"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("financial_barrier_level"), "{err:#}");

        let repeated = parse(&[
            "1,A,a,u,Camp,Summer,Biology,,Low,Free,Virtual,No,Beginner,6-8,3,Medium,,,,",
            "1,B,b,u,Camp,Summer,Biology,,Low,Free,Virtual,No,Beginner,6-8,3,Medium,,,,",
        ]);
        let err = match repeated {
            Ok(_) => panic!("repeated resource_id should fail"),
            Err(err) => err,
        };
        assert!(schema_message(&err).is_some_and(|message| message.contains("repeated")));

        let nameless = parse(&[
            "2,,a,u,Camp,Summer,Biology,,Low,Free,Virtual,No,Beginner,6-8,3,Medium,,,,",
        ]);
        assert!(nameless.is_err());
    }
}
