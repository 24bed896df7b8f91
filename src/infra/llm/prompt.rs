use std::fmt::Write as _;

use crate::domain::building::{BuildingRecord, ElementKind};

fn element_label(kind: ElementKind) -> &'static str {
    match kind {
        ElementKind::Wall => "Walls",
        ElementKind::Door => "Doors",
        ElementKind::Window => "Windows",
        ElementKind::Slab => "Slabs (floor slabs)",
        ElementKind::Column => "Columns",
        ElementKind::Beam => "Beams",
        ElementKind::Stair => "Stairs",
        ElementKind::Roof => "Roofs",
    }
}

fn materials_line(record: &BuildingRecord, empty: &str) -> String {
    if record.materials.is_empty() {
        empty.to_string()
    } else {
        record.materials.join(", ")
    }
}

pub fn analysis_prompt(record: &BuildingRecord) -> String {
    let info = &record.project_info;
    let mut prompt = String::with_capacity(1024);

    let _ = writeln!(
        prompt,
        "You are given BIM (Building Information Modeling) data extracted from an IFC model."
    );
    let _ = writeln!(prompt, "Provide a detailed analysis of the building.\n");

    let _ = writeln!(prompt, "PROJECT INFORMATION:");
    let _ = writeln!(prompt, "- Project Name: {}", info.project_name);
    let _ = writeln!(prompt, "- Building Name: {}", info.building_name);
    let _ = writeln!(prompt, "- Description: {}\n", info.description);

    let _ = writeln!(prompt, "BUILDING ELEMENT COUNTS:");
    for kind in ElementKind::ALL {
        let _ = writeln!(
            prompt,
            "- {}: {}",
            element_label(kind),
            record.element_counts.get(kind)
        );
    }
    let _ = writeln!(prompt, "- Total Elements: {}\n", record.element_counts.total);

    let _ = writeln!(prompt, "MATERIALS USED:");
    let _ = writeln!(prompt, "{}\n", materials_line(record, "No materials data"));

    let _ = writeln!(prompt, "SPACES/ROOMS:");
    let _ = writeln!(prompt, "{} spaces found\n", record.space_count());

    let _ = writeln!(prompt, "Structure the analysis in these sections:\n");
    let _ = writeln!(prompt, "1. **Building Overview** - summary of the building");
    let _ = writeln!(prompt, "2. **Structural Analysis** - the structural elements");
    let _ = writeln!(prompt, "3. **Space Analysis** - rooms and spaces");
    let _ = writeln!(prompt, "4. **Material Analysis** - insights about the materials");
    let _ = writeln!(prompt, "5. **Recommendations** - suggested improvements");
    prompt
}

pub fn question_prompt(record: &BuildingRecord, question: &str) -> String {
    let mut prompt = String::with_capacity(768);

    let _ = writeln!(
        prompt,
        "You are given BIM data for a building and a question from the user.\n"
    );
    let _ = writeln!(prompt, "Project: {}", record.project_info.project_name);
    let _ = writeln!(prompt, "Building elements:");
    for kind in ElementKind::ALL {
        let _ = writeln!(prompt, "- {}: {}", kind.as_str(), record.element_counts.get(kind));
    }
    let _ = writeln!(prompt, "Materials: {}", materials_line(record, "No data"));
    let _ = writeln!(prompt, "Total spaces: {}\n", record.space_count());

    let _ = writeln!(prompt, "USER QUESTION: {question}\n");
    let _ = writeln!(
        prompt,
        "Answer in a detailed and helpful way. If the data does not cover the question, say so clearly."
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::building::{ElementCounts, ProjectInfo, Space};

    fn record() -> BuildingRecord {
        BuildingRecord::assemble(
            ProjectInfo::default().with_project(Some("Riverside".into()), None),
            ElementCounts::default()
                .with(ElementKind::Wall, 7)
                .with(ElementKind::Stair, 2),
            vec!["Timber".into(), "Glass".into()],
            vec![Space::new(None, None), Space::new(None, None)],
            None,
        )
    }

    #[test]
    fn analysis_prompt_lists_counts_and_sections() {
        let prompt = analysis_prompt(&record());
        assert!(prompt.contains("- Project Name: Riverside"));
        assert!(prompt.contains("- Walls: 7"));
        assert!(prompt.contains("- Stairs: 2"));
        assert!(prompt.contains("- Total Elements: 9"));
        assert!(prompt.contains("Glass, Timber"));
        assert!(prompt.contains("2 spaces found"));
        assert!(prompt.contains("5. **Recommendations**"));
    }

    #[test]
    fn question_prompt_carries_the_question() {
        let prompt = question_prompt(&BuildingRecord::default(), "Is there a lift?");
        assert!(prompt.contains("USER QUESTION: Is there a lift?"));
        assert!(prompt.contains("Materials: No data"));
        assert!(prompt.contains("- walls: 0"));
    }
}
