use crate::config::{KRange, TrainingConfig};
use crate::dimension::DimensionMap;
use crate::resource::{
    AcademicAttributes, AccessibilityAttributes, Category, FormatAttributes, GradeRange,
    Predicted, Resource, ResourceId, SubjectTag,
};
use crate::taxonomy::{
    Connectivity, CostCategory, DeliveryMode, FinancialBarrier, HiddenCosts, PrerequisiteLevel,
    StructureType, SupportLevel, Transportation,
};

pub const SUBJECTS: [(&str, &str, &str); 4] = [
    ("AI/ML", "Online Course", "machine learning python neural networks"),
    ("Biology", "Research Program", "genetics cells laboratory research"),
    ("Engineering", "Competition", "robotics design build engineering"),
    ("Mathematics", "Online Course", "algebra proofs problem solving"),
];

const VARIANTS: [&str; 3] = ["introductory workshop", "project studio", "mentored program"];

pub fn mk_resource(id: u32, subject: &str, category: &str) -> Resource {
    Resource {
        resource_id: ResourceId(id),
        name: format!("{subject} resource {id}"),
        description: format!("{subject} learning opportunity"),
        url: format!("https://example.org/resources/{id}"),
        category: Category { tier1: category.to_string(), tier2: "General".to_string() },
        subjects: vec![SubjectTag { tier1: subject.to_string(), tier2: None }],
        accessibility: open_access(),
        academic: beginner_academics(),
        format: FormatAttributes {
            support_level: Some(SupportLevel::High),
            structure_type: Some(StructureType::SelfPaced),
        },
        search_text: None,
    }
}

pub fn open_access() -> AccessibilityAttributes {
    AccessibilityAttributes {
        financial_barrier: Predicted::observed(FinancialBarrier::Low),
        hidden_costs: Predicted::observed(HiddenCosts::None),
        cost_category: Some(CostCategory::Free),
        delivery_mode: Some(DeliveryMode::Virtual),
        transportation: Some(Transportation::No),
        connectivity: Predicted::observed(Connectivity::Medium),
        rural_accessible: Some(true),
    }
}

pub fn premium_access() -> AccessibilityAttributes {
    AccessibilityAttributes {
        financial_barrier: Predicted::observed(FinancialBarrier::Prohibitive),
        hidden_costs: Predicted::observed(HiddenCosts::High),
        cost_category: Some(CostCategory::HighCost),
        delivery_mode: Some(DeliveryMode::InPerson),
        transportation: Some(Transportation::Yes),
        connectivity: Predicted::observed(Connectivity::Medium),
        rural_accessible: Some(false),
    }
}

pub fn beginner_academics() -> AcademicAttributes {
    AcademicAttributes {
        prerequisite: Some(PrerequisiteLevel::Beginner),
        target_grade: Some(GradeRange { min: 6.0, max: 8.0 }),
        weekly_hours: Some(3.0),
    }
}

pub fn advanced_academics() -> AcademicAttributes {
    AcademicAttributes {
        prerequisite: Some(PrerequisiteLevel::Advanced),
        target_grade: Some(GradeRange { min: 11.0, max: 12.0 }),
        weekly_hours: Some(10.0),
    }
}

/// 48 resources: four subjects, two accessibility profiles, two academic levels,
/// three variants each. Ids run from 1 in that nesting order.
pub fn mk_catalog() -> Vec<Resource> {
    let mut resources = Vec::new();
    let mut id = 1_u32;
    for (subject, category, keywords) in SUBJECTS {
        for premium in [false, true] {
            for advanced in [false, true] {
                for variant in VARIANTS {
                    let mut resource = mk_resource(id, subject, category);
                    resource.name = format!("{subject} {variant} {id}");
                    let access_words =
                        if premium { "tuition residential campus" } else { "free online open" };
                    let level_words =
                        if advanced { "advanced rigorous seminar" } else { "beginner friendly" };
                    resource.description =
                        format!("{keywords} {variant} {access_words} {level_words}");
                    if premium {
                        resource.accessibility = premium_access();
                    }
                    if advanced {
                        resource.academic = advanced_academics();
                        resource.format = FormatAttributes {
                            support_level: Some(SupportLevel::Low),
                            structure_type: Some(StructureType::Scheduled),
                        };
                    }
                    resources.push(resource);
                    id += 1;
                }
            }
        }
    }
    resources
}

pub fn test_training_config() -> TrainingConfig {
    TrainingConfig {
        n_init: 3,
        k_ranges: DimensionMap {
            accessibility: KRange::new(2, 8),
            academic: KRange::new(2, 8),
            subject_focus: KRange::new(2, 8),
            format: KRange::new(2, 8),
        },
        ..TrainingConfig::default()
    }
}
