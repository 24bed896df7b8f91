//! IFC extraction from STEP physical files.

pub mod step;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::application::ports::{BuildingParser, ParseError};
use crate::domain::building::{BuildingRecord, ElementCounts, ElementKind, ProjectInfo, Space};

use step::{Param, Statement, Statements, SyntaxError, entity_instance, excerpt, parse_params};

const MAGIC: &str = "ISO-10303-21";

/// Reads `.ifc` STEP files on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct IfcStepParser;

impl IfcStepParser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BuildingParser for IfcStepParser {
    async fn parse(&self, path: &Path) -> Result<BuildingRecord, ParseError> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || parse_file(&path))
            .await
            .map_err(|err| ParseError::Worker(err.to_string()))?
    }
}

pub fn parse_file(path: &Path) -> Result<BuildingRecord, ParseError> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let record = parse_text(&text)?;
    info!(
        target = "bimvision::ifc",
        path = %path.display(),
        schema = record.schema.as_deref().unwrap_or("unknown"),
        elements = record.element_counts.total,
        materials = record.materials.len(),
        spaces = record.spaces.len(),
        "model parsed"
    );
    Ok(record)
}

fn element_kind(type_name: &str) -> Option<ElementKind> {
    let kind = match type_name {
        "IFCWALL" | "IFCWALLSTANDARDCASE" | "IFCWALLELEMENTEDCASE" => ElementKind::Wall,
        "IFCDOOR" | "IFCDOORSTANDARDCASE" => ElementKind::Door,
        "IFCWINDOW" | "IFCWINDOWSTANDARDCASE" => ElementKind::Window,
        "IFCSLAB" | "IFCSLABSTANDARDCASE" | "IFCSLABELEMENTEDCASE" => ElementKind::Slab,
        "IFCCOLUMN" | "IFCCOLUMNSTANDARDCASE" => ElementKind::Column,
        "IFCBEAM" | "IFCBEAMSTANDARDCASE" => ElementKind::Beam,
        "IFCSTAIR" => ElementKind::Stair,
        "IFCROOF" => ElementKind::Roof,
        _ => return None,
    };
    Some(kind)
}

#[derive(Default)]
struct Extraction {
    project: Option<(Option<String>, Option<String>)>,
    building: Option<Option<String>>,
    counts: ElementCounts,
    materials: Vec<String>,
    spaces: Vec<Space>,
}

impl Extraction {
    fn visit(&mut self, statement: &Statement<'_>) -> Result<(), ParseError> {
        let Some(instance) = entity_instance(statement).map_err(syntax)? else {
            return Ok(());
        };
        let type_name = instance.type_name.to_ascii_uppercase();

        if let Some(kind) = element_kind(&type_name) {
            self.counts.add(kind, 1);
            return Ok(());
        }

        match type_name.as_str() {
            "IFCPROJECT" if self.project.is_none() => {
                let params = attributes(statement, instance.params)?;
                self.project = Some((string_at(&params, 2), string_at(&params, 3)));
            }
            "IFCBUILDING" if self.building.is_none() => {
                let params = attributes(statement, instance.params)?;
                self.building = Some(string_at(&params, 2));
            }
            "IFCMATERIAL" => {
                let params = attributes(statement, instance.params)?;
                if let Some(name) = string_at(&params, 0) {
                    self.materials.push(name);
                }
            }
            "IFCSPACE" => {
                let params = attributes(statement, instance.params)?;
                self.spaces
                    .push(Space::new(string_at(&params, 2), string_at(&params, 7)));
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(self, schema: Option<String>) -> BuildingRecord {
        let mut info = ProjectInfo::default();
        if let Some((name, description)) = self.project {
            info = info.with_project(name, description);
        }
        if let Some(name) = self.building {
            info = info.with_building(name);
        }
        BuildingRecord::assemble(info, self.counts, self.materials, self.spaces, schema)
    }
}

fn syntax(err: SyntaxError) -> ParseError {
    ParseError::Syntax {
        line: err.line,
        message: err.message,
    }
}

fn attributes(statement: &Statement<'_>, params: &str) -> Result<Vec<Param>, ParseError> {
    parse_params(params).map_err(|message| ParseError::Syntax {
        line: statement.line,
        message: format!("{message} in `{}`", excerpt(statement.text)),
    })
}

fn string_at(params: &[Param], index: usize) -> Option<String> {
    params.get(index).and_then(Param::non_empty_str)
}

fn keyword(statement: &Statement<'_>) -> String {
    let end = statement
        .text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(statement.text.len());
    statement.text[..end].to_ascii_uppercase()
}

/// Extract a building record from the text of a STEP physical file.
pub fn parse_text(text: &str) -> Result<BuildingRecord, ParseError> {
    let mut statements = Statements::new(text);

    match statements.next() {
        Some(Ok(first)) if first.text.eq_ignore_ascii_case(MAGIC) => {}
        _ => return Err(ParseError::NotStep),
    }

    let mut schema = None;
    let mut in_data = false;
    let mut saw_data = false;
    let mut data_closed = false;
    let mut extraction = Extraction::default();
    let mut last_line = 1;

    for statement in statements {
        let statement = statement.map_err(syntax)?;
        last_line = statement.line;

        if in_data {
            if statement.text.starts_with('#') {
                extraction.visit(&statement)?;
                continue;
            }
            match keyword(&statement).as_str() {
                "ENDSEC" => {
                    in_data = false;
                    data_closed = true;
                }
                _ => {
                    return Err(ParseError::Syntax {
                        line: statement.line,
                        message: format!("unexpected `{}` in DATA section", excerpt(statement.text)),
                    });
                }
            }
            continue;
        }

        match keyword(&statement).as_str() {
            "FILE_SCHEMA" if schema.is_none() => {
                schema = schema_name(&statement)?;
            }
            "DATA" => {
                in_data = true;
                saw_data = true;
                data_closed = false;
            }
            "END-ISO-10303-21" => break,
            _ => {}
        }
    }

    if !saw_data {
        return Err(ParseError::MissingData);
    }
    if !data_closed {
        return Err(ParseError::Syntax {
            line: last_line,
            message: "DATA section is not closed by ENDSEC".to_string(),
        });
    }

    debug!(
        target = "bimvision::ifc",
        schema = schema.as_deref().unwrap_or("unknown"),
        "STEP scan complete"
    );
    Ok(extraction.finish(schema))
}

fn schema_name(statement: &Statement<'_>) -> Result<Option<String>, ParseError> {
    let Some(open) = statement.text.find('(') else {
        return Ok(None);
    };
    let inner = statement.text[open..]
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or_default();
    let params = attributes(statement, inner)?;
    let name = match params.first() {
        Some(Param::List(names)) => names.first().and_then(Param::non_empty_str),
        Some(other) => other.non_empty_str(),
        None => None,
    };
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::validation::Severity;

    const SAMPLE: &str = r"ISO-10303-21;
HEADER;
FILE_DESCRIPTION(('ViewDefinition [CoordinationView]'),'2;1');
FILE_NAME('tower.ifc','2024-05-01T10:00:00',('Architect'),('Studio'),'IFC Engine','Modeller','');
FILE_SCHEMA(('IFC4'));
ENDSEC;
DATA;
/* project and site */
#1=IFCPROJECT('0YvctVUKr0kugbFTf53O9L',$,'Riverside Tower','Mixed-use; phase 1',$,$,$,$,$);
#2=IFCBUILDING('2FCZDorxHDT8NI01kdXi8P',$,'Block \X2\00C4\X0\',$,$,$,$,$,.ELEMENT.,$,$,$);
#10=IFCWALLSTANDARDCASE('1',$,'Wall-01',$,$,$,$,$);
#11=IFCWALL('2',$,'Wall-02',$,$,$,$,$,.NOTDEFINED.);
#12 = IfcDoor('3',$,'Door',$,$,$,$,$,2.1,0.9);
#13=IFCSLAB('4',$,'Slab',$,$,$,$,$,.FLOOR.);
#14=IFCCOLUMN('5',$,'Col',$,$,$,$,$);
#20=IFCMATERIAL('Concrete',$,$);
#21=IFCMATERIAL('Brick',$,$);
#22=IFCMATERIAL('Concrete',$,$);
#23=IFCMATERIAL('',$,$);
#30=IFCSPACE('6',$,'101',$,$,$,$,'Lobby',.ELEMENT.,$,$);
#31=IFCSPACE('7',$,$,$,$,$,$,$,.ELEMENT.,$,$);
#40=(IFCLENGTHMEASURE() IFCNAMEDUNIT());
ENDSEC;
END-ISO-10303-21;
";

    #[test]
    fn sample_model_is_extracted() {
        let record = parse_text(SAMPLE).expect("parse sample");

        assert_eq!(record.schema.as_deref(), Some("IFC4"));
        assert_eq!(record.project_info.project_name, "Riverside Tower");
        assert_eq!(record.project_info.description, "Mixed-use; phase 1");
        assert_eq!(record.project_info.building_name, "Block Ä");

        assert_eq!(record.element_counts.walls, 2);
        assert_eq!(record.element_counts.doors, 1);
        assert_eq!(record.element_counts.windows, 0);
        assert_eq!(record.element_counts.total, 5);

        assert_eq!(record.materials, vec!["Brick", "Concrete"]);
        assert_eq!(record.spaces.len(), 2);
        assert_eq!(record.spaces[0].name, "101");
        assert_eq!(record.spaces[0].long_name, "Lobby");
        assert_eq!(record.spaces[1].name, "Unnamed Space");

        let validation = record.validation.as_ref().expect("validation");
        assert!(validation.is_valid);
        assert_eq!(validation.warnings[0].kind, "No Windows Found");
        assert_eq!(validation.warnings[0].severity, Severity::Low);
        assert!(record.costing.is_some());
    }

    #[test]
    fn missing_entities_fall_back_to_defaults() {
        let text = "ISO-10303-21;\nHEADER;\nENDSEC;\nDATA;\n#1=IFCPROJECT('a',$,$,$,$,$,$,$,$);\nENDSEC;\nEND-ISO-10303-21;";
        let record = parse_text(text).expect("parse");

        assert_eq!(record.project_info.project_name, "Unknown Project");
        assert_eq!(record.project_info.description, "No description");
        assert_eq!(record.project_info.building_name, "Unknown");
        assert_eq!(record.schema, None);
        assert!(record.materials.is_empty());
    }

    #[test]
    fn non_step_input_is_rejected() {
        assert!(matches!(parse_text("hello world"), Err(ParseError::NotStep)));
        assert!(matches!(parse_text(""), Err(ParseError::NotStep)));
    }

    #[test]
    fn model_without_data_is_rejected() {
        let text = "ISO-10303-21;\nHEADER;\nFILE_SCHEMA(('IFC2X3'));\nENDSEC;\nEND-ISO-10303-21;";
        assert!(matches!(parse_text(text), Err(ParseError::MissingData)));
    }

    #[test]
    fn truncated_data_reports_a_line() {
        let text = "ISO-10303-21;\nHEADER;\nENDSEC;\nDATA;\n#1=IFCWALL('a',$);\n#2=IFCWALL('b";
        match parse_text(text) {
            Err(ParseError::Syntax { line, .. }) => assert_eq!(line, 6),
            other => panic!("expected syntax error, got {other:?}"),
        }

        let unclosed = "ISO-10303-21;\nDATA;\n#1=IFCWALL('a',$);\n";
        assert!(matches!(
            parse_text(unclosed),
            Err(ParseError::Syntax { .. })
        ));
    }

    #[test]
    fn malformed_attributes_of_read_entities_are_errors() {
        let text = "ISO-10303-21;\nDATA;\n#1=IFCMATERIAL('Steel' 'x');\nENDSEC;\nEND-ISO-10303-21;";
        match parse_text(text) {
            Err(ParseError::Syntax { line, message }) => {
                assert_eq!(line, 3);
                assert!(message.contains("IFCMATERIAL"));
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn parser_reads_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tower.ifc");
        std::fs::write(&path, SAMPLE).expect("write sample");

        let record = IfcStepParser::new().parse(&path).await.expect("parse");
        assert_eq!(record.element_counts.total, 5);

        let missing = IfcStepParser::new().parse(&dir.path().join("absent.ifc")).await;
        assert!(matches!(missing, Err(ParseError::Io(_))));
    }
}
