//! Colocación automática de nodos nuevos en el lienzo.
//!
//! Las raíces (y los nodos cuyo padre no existe) van a una rejilla fija de
//! 5 columnas; los hijos se abren en abanico vertical a la derecha del padre.
//! Si la posición candidata (de rejilla o de hijo) solapa con algún nodo ya
//! colocado se desplaza una sola vez `NODE_SPACING` en ambos ejes y se acepta
//! tal cual: no se itera hasta eliminar el solape (limitación conocida).
//!
//! En la rejilla el solape se mide con la huella de celda (220x110), que es
//! la que respeta su paso; los hijos usan el tamaño mínimo renderizado.

use std::collections::HashSet;

use crate::models::{NodeData, Position, Size};

pub const NODE_SPACING: f32 = 40.0;

const NODE_WIDTH_COLLAPSED: f32 = 220.0;
const NODE_HEIGHT_COLLAPSED: f32 = 110.0;
const NODE_WIDTH_EXPANDED: f32 = 380.0;
const MAX_NODE_HEIGHT_EXPANDED: f32 = 600.0;
const MAX_ANSWER_LINES_COLLAPSED: f32 = 2.0;

const GRID_COLUMNS: usize = 5;
const GRID_GAP: f32 = 20.0;
const GRID_ORIGIN_X: f32 = 50.0;
const GRID_ORIGIN_Y: f32 = 200.0;

/// Medidas del tema con las que se calcula el tamaño mínimo de un nodo.
#[derive(Debug, Clone, Copy)]
pub struct NodeMetrics {
    pub padding: f32,
    pub text_size: f32,
    pub icon_size: f32,
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self {
            padding: 4.0,
            text_size: 14.0,
            icon_size: 20.0,
        }
    }
}

/// Planificador de posiciones. Función pura sobre la instantánea de nodos colocados.
#[derive(Debug, Clone, Default)]
pub struct LayoutPlanner {
    metrics: NodeMetrics,
}

impl LayoutPlanner {
    /// Tamaño mínimo renderizado del nodo; es su caja para el cálculo de solapes.
    pub fn node_size(&self, node: &NodeData) -> Size {
        let m = &self.metrics;
        let button = m.icon_size + m.padding * 2.0;
        // Botones de rama y borrado a la derecha del contenido.
        let chrome_width = button * 2.0 + m.padding * 2.0;

        if !node.expanded {
            return Size::new(NODE_WIDTH_COLLAPSED + chrome_width, NODE_HEIGHT_COLLAPSED);
        }

        let title_height = (m.text_size * 1.5).max(20.0);
        let max_answer_height = (MAX_NODE_HEIGHT_EXPANDED - title_height - button - m.padding * 4.0)
            .max(m.text_size * 2.0);
        let answer_height = (m.text_size * 6.0)
            .max(m.text_size * (MAX_ANSWER_LINES_COLLAPSED + 1.0) + m.padding)
            .min(max_answer_height);

        let height = (title_height + answer_height + button + m.padding * 4.0)
            .min(MAX_NODE_HEIGHT_EXPANDED)
            .max(NODE_HEIGHT_COLLAPSED);

        Size::new(NODE_WIDTH_EXPANDED + chrome_width, height)
    }

    /// Calcula la posición de `node` frente a los nodos ya colocados en `placed`.
    /// No modifica ninguna posición existente.
    pub fn place(&self, placed: &[NodeData], node: &NodeData) -> Position {
        let parent = node
            .parent_id
            .as_deref()
            .and_then(|pid| placed.iter().find(|n| n.id == pid));

        let Some(parent) = parent else {
            // Tras un borrado el recuento baja y la celda puede estar ocupada.
            let candidate = grid_position(root_count(placed));
            return nudge_if(candidate, |c| {
                placed
                    .iter()
                    .filter(|n| n.id != node.id)
                    .any(|existing| overlaps(c, GRID_CELL, existing.position, GRID_CELL))
            });
        };

        let parent_size = self.node_size(parent);
        let size = self.node_size(node);
        let siblings = placed
            .iter()
            .filter(|n| n.parent_id.as_deref() == Some(parent.id.as_str()))
            .count();

        let candidate = Position::new(
            parent.position.x + parent_size.width + NODE_SPACING,
            parent.position.y + siblings as f32 * (size.height + NODE_SPACING / 2.0)
                - parent_size.height / 2.0
                + size.height / 2.0,
        );

        nudge_if(candidate, |c| {
            placed.iter().filter(|n| n.id != node.id).any(|existing| {
                overlaps(c, size, existing.position, self.node_size(existing))
            })
        })
    }
}

const GRID_CELL: Size = Size {
    width: NODE_WIDTH_COLLAPSED,
    height: NODE_HEIGHT_COLLAPSED,
};

/// Un único desplazamiento diagonal si `collides` lo pide.
fn nudge_if(candidate: Position, collides: impl Fn(Position) -> bool) -> Position {
    if collides(candidate) {
        Position::new(candidate.x + NODE_SPACING, candidate.y + NODE_SPACING)
    } else {
        candidate
    }
}

/// Número de nodos que ocupan una celda de la rejilla: raíces y huérfanos.
fn root_count(placed: &[NodeData]) -> usize {
    let ids: HashSet<&str> = placed.iter().map(|n| n.id.as_str()).collect();
    placed
        .iter()
        .filter(|n| match n.parent_id.as_deref() {
            None => true,
            Some(pid) => !ids.contains(pid),
        })
        .count()
}

fn grid_position(index: usize) -> Position {
    let column = (index % GRID_COLUMNS) as f32;
    let row = (index / GRID_COLUMNS) as f32;
    Position::new(
        column * (NODE_WIDTH_COLLAPSED + GRID_GAP) + GRID_ORIGIN_X,
        row * (NODE_HEIGHT_COLLAPSED + GRID_GAP) + GRID_ORIGIN_Y,
    )
}

fn overlaps(a: Position, a_size: Size, b: Position, b_size: Size) -> bool {
    let overlap_x = a.x < b.x + b_size.width && a.x + a_size.width > b.x;
    let overlap_y = a.y < b.y + b_size.height && a.y + a_size.height > b.y;
    overlap_x && overlap_y
}
