//! Modelos de dominio: nodos de conversación, geometría y proyectos.

use serde::{Deserialize, Serialize};

/// Coordenada en el plano lógico (sin límites) del lienzo.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Tamaño mínimo renderizado de un nodo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Un turno de conversación (pregunta + respuesta) con sus metadatos de vista.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeData {
    pub id: String,
    /// Nodo origen de la rama; `None` para las raíces.
    pub parent_id: Option<String>,
    pub title: String,
    pub question: String,
    pub answer: String,
    pub position: Position,
    pub expanded: bool,
    /// Marca transitoria del nodo que es el origen de rama activo. Nunca se persiste.
    pub is_branch_source: bool,
}

impl NodeData {
    pub fn new(
        id: impl Into<String>,
        parent_id: Option<String>,
        title: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id: parent_id.filter(|p| !p.is_empty()),
            title: title.into(),
            question: question.into(),
            answer: answer.into(),
            position: Position::default(),
            expanded: false,
            is_branch_source: false,
        }
    }
}

/// Identidad de un proyecto: id opaco (también nombre del directorio) y nombre visible.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectIdentity {
    pub id: String,
    pub name: String,
}

/// Todos los nodos de una sesión junto con la identidad del proyecto.
#[derive(Debug, Clone)]
pub struct ConversationProject {
    pub id: String,
    pub name: String,
    pub nodes: Vec<NodeData>,
}

/// Entrada del listado de proyectos guardados.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectSummary {
    pub id: String,
    pub display_name: String,
}
