//! Sesión: el proyecto abierto en este momento.
//!
//! Es dueña del `NodeStore`, del planificador de posiciones y de la
//! persistencia, además de la identidad del proyecto, el origen de rama y
//! el mensaje de estado. Todas las mutaciones estructurales (alta aplicada,
//! borrado, nuevo/abrir proyecto) y el guardado que disparan se ejecutan
//! bajo `apply_lock`, de modo que sólo hay un guardado en curso a la vez.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Local;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::DialogueError;
use crate::layout::LayoutPlanner;
use crate::models::{
    ConversationProject, NodeData, Position, ProjectIdentity, ProjectSummary, Size,
};
use crate::node_store::NodeStore;
use crate::persistence::{ProjectPersistence, SaveReport};
use crate::text_util::node_preview;

const READY_NO_PROJECT: &str = "Listo (sin proyecto)";

/// Nodo producido por una tarea de generación, etiquetado con la época
/// de la sesión en la que se pidió.
#[derive(Debug, Clone)]
pub struct GeneratedNode {
    pub node: NodeData,
    pub epoch: u64,
}

/// Resultado de aplicar un nodo generado.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied { node_id: String, position: Position },
    /// El proyecto cambió mientras se generaba; el nodo se descarta.
    Stale,
}

/// Vista de un nodo para el lienzo (sin el texto completo).
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub preview: String,
    pub position: Position,
    pub size: Size,
    pub expanded: bool,
    pub is_branch_source: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeView {
    pub project: Option<ProjectIdentity>,
    pub branch_source: Option<String>,
    pub nodes: Vec<NodeView>,
}

#[derive(Debug)]
pub struct Session {
    store: NodeStore,
    planner: LayoutPlanner,
    persistence: ProjectPersistence,
    project: RwLock<Option<ProjectIdentity>>,
    branch_source: RwLock<Option<String>>,
    status: Mutex<String>,
    epoch: AtomicU64,
    apply_lock: Mutex<()>,
}

impl Session {
    pub fn new(persistence: ProjectPersistence, planner: LayoutPlanner) -> Self {
        Self {
            store: NodeStore::new(),
            planner,
            persistence,
            project: RwLock::new(None),
            branch_source: RwLock::new(None),
            status: Mutex::new(READY_NO_PROJECT.to_string()),
            epoch: AtomicU64::new(0),
            apply_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn project(&self) -> Option<ProjectIdentity> {
        self.project.read().clone()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> String {
        self.status.lock().clone()
    }

    pub fn set_status(&self, message: impl Into<String>) {
        *self.status.lock() = message.into();
    }

    pub fn branch_source(&self) -> Option<String> {
        self.branch_source.read().clone()
    }

    /// Fija el origen de rama. Sólo acepta ids presentes; `None` lo borra.
    /// Se serializa con los borrados para no apuntar nunca a un nodo eliminado.
    pub fn set_branch_source(&self, node_id: Option<&str>) -> bool {
        let _guard = self.apply_lock.lock();
        self.set_branch_source_locked(node_id)
    }

    /// Aplica un nodo recién generado: crea el proyecto si es el primero,
    /// lo coloca, lo marca como origen de rama y guarda.
    pub fn apply_generated(&self, generated: GeneratedNode) -> Result<ApplyOutcome, DialogueError> {
        let _guard = self.apply_lock.lock();

        if generated.epoch != self.epoch() {
            warn!(
                node_id = %generated.node.id,
                epoch = generated.epoch,
                current = self.epoch(),
                "resultado de un proyecto anterior, se descarta"
            );
            return Ok(ApplyOutcome::Stale);
        }

        self.ensure_project(&generated.node.title);

        let node_id = generated.node.id.clone();
        let position = self.store.add_placed(generated.node, &self.planner)?;
        info!(node_id = %node_id, x = position.x, y = position.y, "nodo aplicado");
        self.set_branch_source_locked(Some(&node_id));
        self.save_locked();

        Ok(ApplyOutcome::Applied { node_id, position })
    }

    /// Borra el nodo y su subárbol; los huérfanos pasan a ser raíces.
    /// Devuelve los ids eliminados ordenados; vacío si el id no existe.
    pub fn delete_node(&self, node_id: &str) -> Vec<String> {
        let _guard = self.apply_lock.lock();

        let removed = self.store.delete_cascade(node_id);
        if removed.is_empty() {
            return Vec::new();
        }

        let source_removed = self
            .branch_source
            .read()
            .as_ref()
            .is_some_and(|id| removed.contains(id));
        if source_removed {
            *self.branch_source.write() = None;
        }

        if self.project.read().is_some() {
            self.save_locked();
        }

        let mut removed: Vec<String> = removed.into_iter().collect();
        removed.sort();
        removed
    }

    pub fn move_node(&self, node_id: &str, position: Position) -> bool {
        self.store.set_position(node_id, position)
    }

    pub fn set_expanded(&self, node_id: &str, expanded: bool) -> bool {
        self.store.set_expanded(node_id, expanded)
    }

    /// Vacía el proyecto actual. Las generaciones en curso quedan obsoletas.
    pub fn new_project(&self) {
        let _guard = self.apply_lock.lock();
        self.reset_locked();
        self.set_status("Nuevo proyecto (sin nombre)");
        info!("Nuevo proyecto");
    }

    /// Carga un proyecto guardado. Si falla, la sesión queda vacía.
    pub fn open_project(&self, project_id: &str) -> Result<ProjectIdentity, DialogueError> {
        let _guard = self.apply_lock.lock();
        self.reset_locked();

        match self.persistence.load(project_id) {
            Ok(project) => {
                let identity = ProjectIdentity {
                    id: project.id,
                    name: project.name,
                };
                self.store.replace_all(project.nodes);
                *self.project.write() = Some(identity.clone());
                self.set_status(format!("Proyecto «{}» cargado", display_name(&identity)));
                Ok(identity)
            }
            Err(e) => {
                error!(project_id, "Error cargando el proyecto: {}", e);
                self.set_status(format!("Error cargando el proyecto: {e}"));
                Err(e)
            }
        }
    }

    /// Guardado explícito del proyecto abierto.
    pub fn save_project(&self) -> Result<SaveReport, DialogueError> {
        let _guard = self.apply_lock.lock();
        let project = self.snapshot_project().ok_or(DialogueError::NoProject)?;
        let result = self.persistence.save(&project);
        self.report_save(&project.name, &result);
        result
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectSummary>, DialogueError> {
        self.persistence.list_projects()
    }

    pub fn node(&self, node_id: &str) -> Option<NodeData> {
        self.store.get(node_id)
    }

    /// Ancestros de `node_id` (raíz primero), para construir el contexto.
    pub fn ancestor_chain(&self, node_id: &str) -> Vec<NodeData> {
        self.store.ancestor_chain(node_id)
    }

    pub fn tree_view(&self) -> TreeView {
        let nodes = self
            .store
            .snapshot()
            .into_iter()
            .map(|n| NodeView {
                preview: node_preview(&n),
                size: self.planner.node_size(&n),
                id: n.id,
                parent_id: n.parent_id,
                title: n.title,
                position: n.position,
                expanded: n.expanded,
                is_branch_source: n.is_branch_source,
            })
            .collect();
        TreeView {
            project: self.project(),
            branch_source: self.branch_source(),
            nodes,
        }
    }

    /// Requiere `apply_lock` tomado.
    fn set_branch_source_locked(&self, node_id: Option<&str>) -> bool {
        if let Some(id) = node_id {
            if !self.store.contains(id) {
                warn!(node_id = id, "origen de rama inexistente, se ignora");
                return false;
            }
        }
        *self.branch_source.write() = node_id.map(str::to_string);
        self.store.mark_branch_source(node_id);
        info!(branch_source = ?node_id, "origen de rama actualizado");
        true
    }

    fn ensure_project(&self, first_title: &str) {
        let mut project = self.project.write();
        if project.is_some() {
            return;
        }
        let name = if first_title.trim().is_empty() {
            format!("New Project - {}", Local::now().format("%H%M%S"))
        } else {
            first_title.to_string()
        };
        let identity = ProjectIdentity {
            id: Uuid::new_v4().to_string(),
            name,
        };
        info!(project_id = %identity.id, "Nuevo proyecto creado: {}", identity.name);
        *project = Some(identity);
    }

    fn snapshot_project(&self) -> Option<ConversationProject> {
        let identity = self.project()?;
        Some(ConversationProject {
            id: identity.id,
            name: identity.name,
            nodes: self.store.snapshot(),
        })
    }

    /// Guardado disparado por una mutación; los errores se notifican, no se propagan.
    fn save_locked(&self) {
        if let Some(project) = self.snapshot_project() {
            let result = self.persistence.save(&project);
            self.report_save(&project.name, &result);
        }
    }

    fn report_save(&self, name: &str, result: &Result<SaveReport, DialogueError>) {
        match result {
            Ok(report) if report.failed > 0 => self.set_status(format!(
                "Proyecto «{name}» guardado con {} documentos fallidos",
                report.failed
            )),
            Ok(_) => self.set_status(format!("Proyecto «{name}» guardado")),
            Err(e) => {
                error!("Error guardando el proyecto: {}", e);
                self.set_status(format!("Error guardando el proyecto: {e}"));
            }
        }
    }

    fn reset_locked(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.store.clear();
        *self.project.write() = None;
        *self.branch_source.write() = None;
        self.set_status(READY_NO_PROJECT);
    }
}

fn display_name(identity: &ProjectIdentity) -> &str {
    if identity.name.is_empty() {
        &identity.id
    } else {
        &identity.name
    }
}
