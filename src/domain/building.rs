//! Structured building record extracted from a model file.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{Fingerprint, hash_record, hash_serializable};

use super::costing::{self, CostEstimate};
use super::validation::{self, ValidationReport};

pub const UNKNOWN: &str = "Unknown";
pub const UNKNOWN_PROJECT: &str = "Unknown Project";
pub const UNKNOWN_BUILDING: &str = "Unknown Building";
pub const NO_DESCRIPTION: &str = "No description";
const NO_DESCRIPTION_AVAILABLE: &str = "No description available";
const UNNAMED_SPACE: &str = "Unnamed Space";
const SPACE_KIND: &str = "Space";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub project_name: String,
    pub building_name: String,
    pub description: String,
}

impl Default for ProjectInfo {
    fn default() -> Self {
        Self {
            project_name: UNKNOWN.to_string(),
            building_name: UNKNOWN.to_string(),
            description: NO_DESCRIPTION_AVAILABLE.to_string(),
        }
    }
}

impl ProjectInfo {
    /// Apply the attributes of the model's first project entity.
    pub fn with_project(mut self, name: Option<String>, description: Option<String>) -> Self {
        self.project_name = name.unwrap_or_else(|| UNKNOWN_PROJECT.to_string());
        self.description = description.unwrap_or_else(|| NO_DESCRIPTION.to_string());
        self
    }

    /// Apply the name of the model's first building entity.
    pub fn with_building(mut self, name: Option<String>) -> Self {
        self.building_name = name.unwrap_or_else(|| UNKNOWN_BUILDING.to_string());
        self
    }

    pub fn has_project_name(&self) -> bool {
        self.project_name != UNKNOWN && self.project_name != UNKNOWN_PROJECT
    }

    pub fn has_building_name(&self) -> bool {
        self.building_name != UNKNOWN && self.building_name != UNKNOWN_BUILDING
    }
}

/// Counted element categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Wall,
    Door,
    Window,
    Slab,
    Column,
    Beam,
    Stair,
    Roof,
}

impl ElementKind {
    pub const ALL: [ElementKind; 8] = [
        ElementKind::Wall,
        ElementKind::Door,
        ElementKind::Window,
        ElementKind::Slab,
        ElementKind::Column,
        ElementKind::Beam,
        ElementKind::Stair,
        ElementKind::Roof,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Wall => "walls",
            ElementKind::Door => "doors",
            ElementKind::Window => "windows",
            ElementKind::Slab => "slabs",
            ElementKind::Column => "columns",
            ElementKind::Beam => "beams",
            ElementKind::Stair => "stairs",
            ElementKind::Roof => "roofs",
        }
    }
}

/// Per-category element counts. `total` always equals the sum of the others.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementCounts {
    pub walls: u64,
    pub doors: u64,
    pub windows: u64,
    pub slabs: u64,
    pub columns: u64,
    pub beams: u64,
    pub stairs: u64,
    pub roofs: u64,
    pub total: u64,
}

impl ElementCounts {
    pub fn add(&mut self, kind: ElementKind, count: u64) {
        let slot = match kind {
            ElementKind::Wall => &mut self.walls,
            ElementKind::Door => &mut self.doors,
            ElementKind::Window => &mut self.windows,
            ElementKind::Slab => &mut self.slabs,
            ElementKind::Column => &mut self.columns,
            ElementKind::Beam => &mut self.beams,
            ElementKind::Stair => &mut self.stairs,
            ElementKind::Roof => &mut self.roofs,
        };
        *slot += count;
        self.total += count;
    }

    pub fn get(&self, kind: ElementKind) -> u64 {
        match kind {
            ElementKind::Wall => self.walls,
            ElementKind::Door => self.doors,
            ElementKind::Window => self.windows,
            ElementKind::Slab => self.slabs,
            ElementKind::Column => self.columns,
            ElementKind::Beam => self.beams,
            ElementKind::Stair => self.stairs,
            ElementKind::Roof => self.roofs,
        }
    }

    pub fn with(mut self, kind: ElementKind, count: u64) -> Self {
        self.add(kind, count);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub name: String,
    pub long_name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Space {
    pub fn new(name: Option<String>, long_name: Option<String>) -> Self {
        Self {
            name: name.unwrap_or_else(|| UNNAMED_SPACE.to_string()),
            long_name: long_name.unwrap_or_else(|| NO_DESCRIPTION.to_string()),
            kind: SPACE_KIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    #[default]
    FullAnalysis,
    FastSummary,
}

/// Everything extracted from one model file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildingRecord {
    pub project_info: ProjectInfo,
    pub element_counts: ElementCounts,
    pub materials: Vec<String>,
    pub spaces: Vec<Space>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub costing: Option<CostEstimate>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub source_file: Option<String>,
    #[serde(default)]
    pub mode: ExtractionMode,
}

impl BuildingRecord {
    /// Build a full-analysis record, deriving validation and costing.
    ///
    /// Materials are deduplicated and sorted so that equal models always
    /// produce equal records.
    pub fn assemble(
        project_info: ProjectInfo,
        element_counts: ElementCounts,
        mut materials: Vec<String>,
        spaces: Vec<Space>,
        schema: Option<String>,
    ) -> Self {
        materials.retain(|name| !name.trim().is_empty());
        materials.sort();
        materials.dedup();

        let validation = validation::validate(&project_info, &element_counts, &materials, &spaces);
        let costing = costing::estimate(&element_counts, materials.len());

        Self {
            project_info,
            element_counts,
            materials,
            spaces,
            validation: Some(validation),
            costing: Some(costing),
            schema,
            source_file: None,
            mode: ExtractionMode::FullAnalysis,
        }
    }

    pub fn with_source_file(mut self, source_file: impl Into<String>) -> Self {
        self.source_file = Some(source_file.into());
        self
    }

    /// Project info and counts only.
    pub fn fast_summary(&self) -> Self {
        Self {
            project_info: self.project_info.clone(),
            element_counts: self.element_counts,
            materials: Vec::new(),
            spaces: Vec::new(),
            validation: None,
            costing: None,
            schema: self.schema.clone(),
            source_file: self.source_file.clone(),
            mode: ExtractionMode::FastSummary,
        }
    }

    /// Fingerprint of the record's content, independent of where it was read from.
    pub fn analysis_signature(&self) -> Fingerprint {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => {
                map.remove("source_file");
                hash_record(&Value::Object(map))
            }
            _ => hash_serializable(self),
        }
    }

    pub fn space_count(&self) -> usize {
        self.spaces.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tower() -> BuildingRecord {
        let counts = ElementCounts::default()
            .with(ElementKind::Wall, 12)
            .with(ElementKind::Door, 4)
            .with(ElementKind::Slab, 3);
        BuildingRecord::assemble(
            ProjectInfo::default()
                .with_project(Some("Tower".into()), None)
                .with_building(Some("Block A".into())),
            counts,
            vec!["Concrete".into(), "Brick".into(), "Concrete".into(), " ".into()],
            vec![Space::new(Some("101".into()), None)],
            Some("IFC4".into()),
        )
    }

    #[test]
    fn totals_track_individual_counts() {
        let counts = ElementCounts::default()
            .with(ElementKind::Wall, 2)
            .with(ElementKind::Roof, 1)
            .with(ElementKind::Wall, 3);
        assert_eq!(counts.walls, 5);
        assert_eq!(counts.get(ElementKind::Roof), 1);
        assert_eq!(counts.total, 6);
    }

    #[test]
    fn materials_are_sorted_and_deduplicated() {
        assert_eq!(tower().materials, vec!["Brick", "Concrete"]);
    }

    #[test]
    fn project_defaults_distinguish_missing_entity_from_missing_name() {
        let absent = ProjectInfo::default();
        assert_eq!(absent.project_name, "Unknown");
        assert!(!absent.has_project_name());

        let unnamed = ProjectInfo::default().with_project(None, None);
        assert_eq!(unnamed.project_name, "Unknown Project");
        assert_eq!(unnamed.description, "No description");
        assert!(!unnamed.has_project_name());
    }

    #[test]
    fn signature_ignores_source_file() {
        let first = tower().with_source_file("uploads/a.ifc");
        let second = tower().with_source_file("uploads/copy-of-a.ifc");
        assert_eq!(first.analysis_signature(), second.analysis_signature());

        let mut changed = tower();
        changed.element_counts.add(ElementKind::Window, 1);
        assert_ne!(first.analysis_signature(), changed.analysis_signature());
    }

    #[test]
    fn record_serializes_with_expected_field_names() {
        let json = serde_json::to_value(tower()).expect("serialize");
        assert_eq!(json["mode"], "full_analysis");
        assert_eq!(json["spaces"][0]["type"], "Space");
        assert_eq!(json["spaces"][0]["long_name"], "No description");
        assert_eq!(json["element_counts"]["total"], 19);
        assert!(json["validation"]["is_valid"].as_bool().expect("bool"));
    }

    #[test]
    fn fast_summary_drops_derived_sections() {
        let summary = tower().fast_summary();
        assert_eq!(summary.mode, ExtractionMode::FastSummary);
        assert!(summary.validation.is_none());
        assert!(summary.materials.is_empty());

        let json = serde_json::to_value(&summary).expect("serialize");
        assert!(json.get("costing").is_none());
    }
}
