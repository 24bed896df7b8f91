//! Completeness checks over an extracted building record.

use serde::{Deserialize, Serialize};

use super::building::{ElementCounts, ProjectInfo, Space};

/// Warnings beyond this count trigger a review recommendation.
const WARNING_REVIEW_THRESHOLD: usize = 3;

pub const MISSING_MATERIALS: &str = "Materials (IfcMaterial)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    #[serde(rename = "type")]
    pub kind: String,
    pub location: String,
    pub message: String,
    pub severity: Severity,
}

impl ValidationIssue {
    fn new(kind: &str, location: &str, message: &str, severity: Severity) -> Self {
        Self {
            kind: kind.to_string(),
            location: location.to_string(),
            message: message.to_string(),
            severity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub missing_elements: Vec<String>,
    pub recommendations: Vec<String>,
    pub total_issues: usize,
    pub error_count: usize,
    pub warning_count: usize,
}

/// Check a record for missing identity, structure and material data.
///
/// Only a missing wall set invalidates the model. Missing materials are
/// reported as an error but leave `is_valid` untouched.
pub fn validate(
    info: &ProjectInfo,
    counts: &ElementCounts,
    materials: &[String],
    spaces: &[Space],
) -> ValidationReport {
    let mut is_valid = true;
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut missing_elements = Vec::new();
    let mut recommendations = Vec::new();

    if !info.has_project_name() {
        warnings.push(ValidationIssue::new(
            "Missing Project Name",
            "IfcProject",
            "Project name is missing. This is mandatory information.",
            Severity::Medium,
        ));
    }
    if !info.has_building_name() {
        warnings.push(ValidationIssue::new(
            "Missing Building Name",
            "IfcBuilding",
            "Building name is not set.",
            Severity::Low,
        ));
    }

    if counts.walls == 0 {
        errors.push(ValidationIssue::new(
            "No Walls Found",
            "IfcWall elements",
            "The building has no walls. This may be a structural issue.",
            Severity::High,
        ));
        is_valid = false;
    }
    if counts.slabs == 0 {
        warnings.push(ValidationIssue::new(
            "No Slabs Found",
            "IfcSlab elements",
            "No floor slabs found. Floors are not properly defined.",
            Severity::Medium,
        ));
    }
    if counts.doors == 0 {
        warnings.push(ValidationIssue::new(
            "No Doors Found",
            "IfcDoor elements",
            "The building has no doors. Entry and exit points are missing.",
            Severity::Medium,
        ));
    }
    if counts.windows == 0 {
        warnings.push(ValidationIssue::new(
            "No Windows Found",
            "IfcWindow elements",
            "No windows found. Windows are needed for natural light and ventilation.",
            Severity::Low,
        ));
    }

    if materials.is_empty() {
        errors.push(ValidationIssue::new(
            "No Materials Defined",
            "IfcMaterial",
            "Building materials are not defined. Materials are required for cost estimation and analysis.",
            Severity::High,
        ));
        missing_elements.push(MISSING_MATERIALS.to_string());
    }

    if spaces.is_empty() {
        warnings.push(ValidationIssue::new(
            "No Spaces Defined",
            "IfcSpace",
            "Rooms and spaces are not defined. Space planning is incomplete.",
            Severity::Medium,
        ));
    }

    if counts.columns == 0 && counts.beams == 0 {
        warnings.push(ValidationIssue::new(
            "No Structural Elements",
            "IfcColumn, IfcBeam",
            "No columns or beams found. The structural framework looks incomplete.",
            Severity::Medium,
        ));
    }

    if !errors.is_empty() {
        recommendations
            .push("Critical errors found. Fix them before construction.".to_string());
    }
    if warnings.len() > WARNING_REVIEW_THRESHOLD {
        recommendations.push(
            "Many warnings found. Review the IFC file and add the missing elements.".to_string(),
        );
    }

    ValidationReport {
        is_valid,
        total_issues: errors.len() + warnings.len(),
        error_count: errors.len(),
        warning_count: warnings.len(),
        errors,
        warnings,
        missing_elements,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::super::building::ElementKind;
    use super::*;

    fn named() -> ProjectInfo {
        ProjectInfo::default()
            .with_project(Some("Tower".into()), Some("Offices".into()))
            .with_building(Some("A".into()))
    }

    #[test]
    fn complete_model_has_no_issues() {
        let counts = ElementCounts::default()
            .with(ElementKind::Wall, 8)
            .with(ElementKind::Slab, 2)
            .with(ElementKind::Door, 2)
            .with(ElementKind::Window, 6)
            .with(ElementKind::Column, 4);
        let report = validate(
            &named(),
            &counts,
            &["Concrete".to_string()],
            &[Space::new(Some("101".into()), None)],
        );

        assert!(report.is_valid);
        assert_eq!(report.total_issues, 0);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn empty_model_reports_everything() {
        let report = validate(&ProjectInfo::default(), &ElementCounts::default(), &[], &[]);

        assert!(!report.is_valid);
        assert_eq!(report.error_count, 2);
        assert_eq!(report.warning_count, 7);
        assert_eq!(report.total_issues, 9);
        assert_eq!(report.missing_elements, vec![MISSING_MATERIALS]);
        assert_eq!(report.recommendations.len(), 2);
        assert_eq!(report.errors[0].severity, Severity::High);
    }

    #[test]
    fn missing_materials_alone_keeps_model_valid() {
        let counts = ElementCounts::default()
            .with(ElementKind::Wall, 1)
            .with(ElementKind::Slab, 1)
            .with(ElementKind::Door, 1)
            .with(ElementKind::Window, 1)
            .with(ElementKind::Beam, 1);
        let report = validate(&named(), &counts, &[], &[Space::new(None, None)]);

        assert!(report.is_valid);
        assert_eq!(report.error_count, 1);
        assert_eq!(
            report.recommendations,
            vec!["Critical errors found. Fix them before construction."]
        );
    }

    #[test]
    fn issue_type_serializes_as_type() {
        let report = validate(&named(), &ElementCounts::default(), &[], &[]);
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["errors"][0]["type"], "No Walls Found");
        assert_eq!(json["errors"][0]["severity"], "high");
    }
}
