//! Persistencia de proyectos en disco.
//!
//! Cada proyecto vive en `<base>/<project_id>/` con dos artefactos acoplados:
//!   - `tree.yaml`: índice estructural (nombre del proyecto y, por nodo,
//!     id, título, posición, estado desplegado y padre). Sin pregunta ni respuesta.
//!   - `nodes/<node_id>.md`: un documento de contenido por nodo con las
//!     secciones `# Question` y `# Answer` separadas por `---`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::DialogueError;
use crate::models::{ConversationProject, NodeData, Position, ProjectSummary};

const INDEX_FILE_NAME: &str = "tree.yaml";
const NODES_DIR_NAME: &str = "nodes";
const CONTENT_EXTENSION: &str = "md";

const QUESTION_HEADER: &str = "# Question";
const ANSWER_HEADER: &str = "# Answer";
const DELIMITER: &str = "---";

const PLACEHOLDER_QUESTION: &str = "(question could not be loaded)";

#[derive(Debug, Serialize, Deserialize)]
struct TreeIndex {
    #[serde(default)]
    nodes: Vec<NodeRecord>,
    #[serde(default)]
    project_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeRecord {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    position: Position,
    #[serde(default)]
    expanded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
}

/// Resultado de un guardado parcial: los fallos por documento no abortan el resto.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SaveReport {
    pub written: usize,
    pub failed: usize,
    pub pruned: usize,
}

#[derive(Debug, Clone)]
pub struct ProjectPersistence {
    base_dir: PathBuf,
}

impl ProjectPersistence {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn project_dir(&self, project_id: &str) -> Result<PathBuf, DialogueError> {
        validate_id(project_id)?;
        Ok(self.base_dir.join(project_id))
    }

    /// Escribe el índice estructural y después un documento por nodo.
    pub fn save(&self, project: &ConversationProject) -> Result<SaveReport, DialogueError> {
        let project_dir = self.project_dir(&project.id)?;
        let nodes_dir = project_dir.join(NODES_DIR_NAME);

        fs::create_dir_all(&nodes_dir).map_err(|e| DialogueError::storage(&nodes_dir, e))?;

        let index = TreeIndex {
            nodes: project.nodes.iter().map(NodeRecord::from).collect(),
            project_name: project.name.clone(),
        };
        let index_path = project_dir.join(INDEX_FILE_NAME);
        let yaml = serde_yaml::to_string(&index)
            .map_err(|e| DialogueError::parse(&index_path, e.to_string()))?;
        write_atomically(&index_path, yaml.as_bytes())?;

        let mut report = SaveReport::default();
        let mut live = HashSet::new();
        for node in &project.nodes {
            let path = match content_path(&nodes_dir, &node.id) {
                Ok(path) => path,
                Err(e) => {
                    warn!(node_id = %node.id, "documento de contenido omitido: {}", e);
                    report.failed += 1;
                    continue;
                }
            };
            match fs::write(&path, render_content(&node.question, &node.answer)) {
                Ok(()) => report.written += 1,
                Err(e) => {
                    warn!("Error escribiendo {}: {}", path.display(), e);
                    report.failed += 1;
                }
            }
            live.insert(path);
        }

        report.pruned = prune_stale_documents(&nodes_dir, &live);

        info!(
            project_id = %project.id,
            nodes = project.nodes.len(),
            written = report.written,
            failed = report.failed,
            pruned = report.pruned,
            "Proyecto '{}' guardado",
            project.name
        );
        Ok(report)
    }

    /// Lee el índice y, por cada nodo, su documento de contenido. Un documento
    /// ausente o corrupto se sustituye por un texto de reemplazo.
    pub fn load(&self, project_id: &str) -> Result<ConversationProject, DialogueError> {
        let project_dir = self.project_dir(project_id)?;
        let index_path = project_dir.join(INDEX_FILE_NAME);
        let nodes_dir = project_dir.join(NODES_DIR_NAME);

        let raw = fs::read_to_string(&index_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DialogueError::ProjectNotFound(project_id.to_string())
            } else {
                DialogueError::storage(&index_path, e)
            }
        })?;
        let index: TreeIndex = serde_yaml::from_str(&raw)
            .map_err(|e| DialogueError::parse(&index_path, e.to_string()))?;

        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(index.nodes.len());
        for record in index.nodes {
            if !seen.insert(record.id.clone()) {
                warn!(node_id = %record.id, "id duplicado en el índice, se ignora la repetición");
                continue;
            }
            let (question, answer) = match read_content(&nodes_dir, &record.id) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(node_id = %record.id, "documento de contenido no cargado: {}", e);
                    (PLACEHOLDER_QUESTION.to_string(), placeholder_answer(&e))
                }
            };
            nodes.push(record.into_node(question, answer));
        }

        info!(project_id, nodes = nodes.len(), "Proyecto '{}' cargado", index.project_name);
        Ok(ConversationProject {
            id: project_id.to_string(),
            name: index.project_name,
            nodes,
        })
    }

    /// Enumera los directorios de proyecto con su nombre visible.
    pub fn list_projects(&self) -> Result<Vec<ProjectSummary>, DialogueError> {
        fs::create_dir_all(&self.base_dir)
            .map_err(|e| DialogueError::storage(&self.base_dir, e))?;

        let mut projects = Vec::new();
        for entry in WalkDir::new(&self.base_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("No se pudo leer una entrada de {}: {}", self.base_dir.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            let display_name = read_project_name(&entry.path().join(INDEX_FILE_NAME))
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| id.clone());
            projects.push(ProjectSummary { id, display_name });
        }
        Ok(projects)
    }
}

impl From<&NodeData> for NodeRecord {
    fn from(node: &NodeData) -> Self {
        Self {
            id: node.id.clone(),
            title: node.title.clone(),
            position: node.position,
            expanded: node.expanded,
            parent_id: node.parent_id.clone(),
        }
    }
}

impl NodeRecord {
    fn into_node(self, question: String, answer: String) -> NodeData {
        let mut node = NodeData::new(self.id, self.parent_id, self.title, question, answer);
        node.position = self.position;
        node.expanded = self.expanded;
        node
    }
}

/// Los ids se usan como componentes de ruta: ni vacíos, ni separadores, ni `..`.
fn validate_id(id: &str) -> Result<(), DialogueError> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(&['/', '\\'][..])
        || id.contains('\0');
    if invalid {
        Err(DialogueError::InvalidId(id.to_string()))
    } else {
        Ok(())
    }
}

fn content_path(nodes_dir: &Path, node_id: &str) -> Result<PathBuf, DialogueError> {
    validate_id(node_id)?;
    Ok(nodes_dir.join(format!("{node_id}.{CONTENT_EXTENSION}")))
}

fn render_content(question: &str, answer: &str) -> String {
    format!("{QUESTION_HEADER}\n\n{question}\n\n{DELIMITER}\n\n{ANSWER_HEADER}\n\n{answer}")
}

fn read_content(nodes_dir: &Path, node_id: &str) -> Result<(String, String), DialogueError> {
    let path = content_path(nodes_dir, node_id)?;
    let raw = fs::read_to_string(&path).map_err(|e| DialogueError::storage(&path, e))?;
    parse_content(&raw).ok_or_else(|| {
        DialogueError::parse(&path, "faltan las secciones '# Question' / '# Answer'")
    })
}

/// Separa pregunta y respuesta. Primero intenta el formato exacto que escribe
/// `render_content` (conserva el texto tal cual); si el fichero se editó a
/// mano, recurre a un escaneo por líneas de los marcadores.
///
/// El formato es ambiguo si la pregunta contiene el separador: gana la
/// primera aparición, así que el resto pasa a la respuesta. Un separador
/// dentro de la respuesta sí se conserva.
fn parse_content(raw: &str) -> Option<(String, String)> {
    let head = format!("{QUESTION_HEADER}\n\n");
    let separator = format!("\n\n{DELIMITER}\n\n{ANSWER_HEADER}\n\n");
    if let Some(rest) = raw.strip_prefix(head.as_str()) {
        if let Some((question, answer)) = rest.split_once(separator.as_str()) {
            return Some((question.to_string(), answer.to_string()));
        }
    }
    parse_content_lenient(raw)
}

fn parse_content_lenient(raw: &str) -> Option<(String, String)> {
    enum Section {
        None,
        Question,
        Answer,
    }

    let mut section = Section::None;
    let mut found = false;
    let mut question: Vec<&str> = Vec::new();
    let mut answer: Vec<&str> = Vec::new();

    for line in raw.lines() {
        let trimmed = line.trim_end_matches('\r');
        if section_is(trimmed, QUESTION_HEADER) && !matches!(section, Section::Answer) {
            section = Section::Question;
            found = true;
            question.clear();
            continue;
        }
        if section_is(trimmed, ANSWER_HEADER) && !matches!(section, Section::Answer) {
            section = Section::Answer;
            found = true;
            continue;
        }
        match section {
            Section::Question if trimmed.trim() == DELIMITER => section = Section::None,
            Section::Question => question.push(trimmed),
            Section::Answer => answer.push(trimmed),
            Section::None => {}
        }
    }

    found.then(|| {
        (
            question.join("\n").trim().to_string(),
            answer.join("\n").trim().to_string(),
        )
    })
}

fn section_is(line: &str, header: &str) -> bool {
    line.trim() == header
}

fn placeholder_answer(err: &DialogueError) -> String {
    match err {
        DialogueError::Storage { path, source } => format!(
            "Failed to load content document '{}': {}",
            path.display(),
            source
        ),
        other => format!("Failed to load content document: {other}"),
    }
}

fn read_project_name(index_path: &Path) -> Option<String> {
    let raw = match fs::read_to_string(index_path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("No se pudo leer {}: {}", index_path.display(), e);
            return None;
        }
    };
    match serde_yaml::from_str::<TreeIndex>(&raw) {
        Ok(index) => Some(index.project_name),
        Err(e) => {
            warn!("Índice no válido en {}: {}", index_path.display(), e);
            None
        }
    }
}

/// Escribe a un fichero temporal y lo renombra, para no dejar un índice a medias.
fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), DialogueError> {
    let tmp = path.with_extension("yaml.tmp");
    fs::write(&tmp, contents).map_err(|e| DialogueError::storage(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| DialogueError::storage(path, e))
}

/// Borra documentos de contenido de nodos que ya no están en el índice.
fn prune_stale_documents(nodes_dir: &Path, live: &HashSet<PathBuf>) -> usize {
    let entries = match fs::read_dir(nodes_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("No se pudo listar {}: {}", nodes_dir.display(), e);
            return 0;
        }
    };

    let mut pruned = 0;
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let is_content = path.extension().and_then(|e| e.to_str()) == Some(CONTENT_EXTENSION);
        if !is_content || live.contains(&path) {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => pruned += 1,
            Err(e) => warn!("No se pudo borrar {}: {}", path.display(), e),
        }
    }
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_project() -> ConversationProject {
        let mut a = NodeData::new("a", None, "Raíz", "¿Qué es Rust?", "Un lenguaje.\n\n---\n\nCon *markdown*.");
        a.position = Position::new(50.0, 200.0);
        let mut b = NodeData::new("b", Some("a".into()), "Hijo", "  espacios  \n", "");
        b.position = Position::new(374.5, 200.25);
        b.expanded = true;
        ConversationProject {
            id: "p1".into(),
            name: "Mi proyecto".into(),
            nodes: vec![a, b],
        }
    }

    #[test]
    fn failed_document_does_not_stop_the_rest() {
        let dir = TempDir::new().unwrap();
        let persistence = ProjectPersistence::new(dir.path());
        // Un directorio donde debería ir el fichero hace fallar esa escritura.
        fs::create_dir_all(dir.path().join("p1/nodes/a.md")).unwrap();

        let report = persistence.save(&sample_project()).unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(report.failed, 1);
        assert!(dir.path().join("p1/nodes/b.md").is_file());
        assert!(dir.path().join("p1").join(INDEX_FILE_NAME).is_file());
    }

    #[test]
    fn first_separator_wins_when_parsing_content() {
        let answer_with_separator = render_content("x", "y\n\n---\n\n# Answer\n\nz");
        assert_eq!(
            parse_content(&answer_with_separator).unwrap(),
            ("x".to_string(), "y\n\n---\n\n# Answer\n\nz".to_string())
        );

        let question_with_separator = render_content("x\n\n---\n\n# Answer\n\ny", "z");
        assert_eq!(
            parse_content(&question_with_separator).unwrap(),
            ("x".to_string(), "y\n\n---\n\n# Answer\n\nz".to_string())
        );
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let persistence = ProjectPersistence::new(dir.path());
        let project = sample_project();

        let report = persistence.save(&project).unwrap();
        assert_eq!(report, SaveReport { written: 2, failed: 0, pruned: 0 });

        let loaded = persistence.load("p1").unwrap();
        assert_eq!(loaded.id, "p1");
        assert_eq!(loaded.name, "Mi proyecto");
        assert_eq!(loaded.nodes, project.nodes);
    }

    #[test]
    fn index_excludes_question_and_answer() {
        let dir = TempDir::new().unwrap();
        let persistence = ProjectPersistence::new(dir.path());
        persistence.save(&sample_project()).unwrap();

        let index = fs::read_to_string(dir.path().join("p1").join(INDEX_FILE_NAME)).unwrap();
        assert!(index.contains("project_name: Mi proyecto"));
        assert!(!index.contains("¿Qué es Rust?"));
        assert!(!index.contains("question"));
        assert_eq!(index.matches("parent_id").count(), 1);
    }

    #[test]
    fn content_document_layout() {
        assert_eq!(
            render_content("q", "a"),
            "# Question\n\nq\n\n---\n\n# Answer\n\na"
        );
    }

    #[test]
    fn missing_content_document_yields_placeholder() {
        let dir = TempDir::new().unwrap();
        let persistence = ProjectPersistence::new(dir.path());
        persistence.save(&sample_project()).unwrap();
        fs::remove_file(dir.path().join("p1/nodes/a.md")).unwrap();

        let loaded = persistence.load("p1").unwrap();
        assert_eq!(loaded.nodes.len(), 2);
        assert_eq!(loaded.nodes[0].question, PLACEHOLDER_QUESTION);
        assert!(loaded.nodes[0].answer.starts_with("Failed to load content document"));
        assert_eq!(loaded.nodes[1].question, "  espacios  \n");
    }

    #[test]
    fn malformed_content_document_yields_placeholder() {
        let dir = TempDir::new().unwrap();
        let persistence = ProjectPersistence::new(dir.path());
        persistence.save(&sample_project()).unwrap();
        fs::write(dir.path().join("p1/nodes/b.md"), "texto sin secciones").unwrap();

        let loaded = persistence.load("p1").unwrap();
        assert_eq!(loaded.nodes[1].question, PLACEHOLDER_QUESTION);
        assert_eq!(loaded.nodes[0].question, "¿Qué es Rust?");
    }

    #[test]
    fn hand_edited_content_is_parsed_leniently() {
        let raw = "# Question\r\nHola\r\n---\r\n# Answer\r\nLínea 1\r\n---\r\nLínea 2\r\n";
        let (q, a) = parse_content(raw).unwrap();
        assert_eq!(q, "Hola");
        assert_eq!(a, "Línea 1\n---\nLínea 2");
    }

    #[test]
    fn malformed_index_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("bad")).unwrap();
        fs::write(dir.path().join("bad").join(INDEX_FILE_NAME), "nodes: [[[").unwrap();

        let err = ProjectPersistence::new(dir.path()).load("bad").unwrap_err();
        assert!(matches!(err, DialogueError::Parse { .. }));
    }

    #[test]
    fn unknown_project_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = ProjectPersistence::new(dir.path()).load("nope").unwrap_err();
        assert!(matches!(err, DialogueError::ProjectNotFound(id) if id == "nope"));
    }

    #[test]
    fn path_like_ids_are_rejected() {
        let dir = TempDir::new().unwrap();
        let persistence = ProjectPersistence::new(dir.path());
        assert!(matches!(persistence.load("../x"), Err(DialogueError::InvalidId(_))));
        assert!(matches!(persistence.load(""), Err(DialogueError::InvalidId(_))));
    }

    #[test]
    fn deleted_nodes_lose_their_content_document() {
        let dir = TempDir::new().unwrap();
        let persistence = ProjectPersistence::new(dir.path());
        let mut project = sample_project();
        persistence.save(&project).unwrap();

        project.nodes.retain(|n| n.id == "a");
        let report = persistence.save(&project).unwrap();
        assert_eq!(report.pruned, 1);
        assert!(!dir.path().join("p1/nodes/b.md").exists());
        assert!(dir.path().join("p1/nodes/a.md").exists());
    }

    #[test]
    fn list_projects_uses_name_or_directory() {
        let dir = TempDir::new().unwrap();
        let persistence = ProjectPersistence::new(dir.path());
        persistence.save(&sample_project()).unwrap();
        fs::create_dir_all(dir.path().join("p0-broken")).unwrap();
        fs::write(dir.path().join("p0-broken").join(INDEX_FILE_NAME), ":::").unwrap();
        fs::create_dir_all(dir.path().join("p2-empty")).unwrap();
        fs::write(dir.path().join("stray.txt"), "x").unwrap();

        let projects = persistence.list_projects().unwrap();
        assert_eq!(
            projects,
            vec![
                ProjectSummary { id: "p0-broken".into(), display_name: "p0-broken".into() },
                ProjectSummary { id: "p1".into(), display_name: "Mi proyecto".into() },
                ProjectSummary { id: "p2-empty".into(), display_name: "p2-empty".into() },
            ]
        );
    }

    #[test]
    fn list_projects_creates_the_base_dir() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("projects");
        let projects = ProjectPersistence::new(&base).list_projects().unwrap();
        assert!(projects.is_empty());
        assert!(base.is_dir());
    }
}
