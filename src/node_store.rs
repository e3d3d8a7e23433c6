//! Almacén autoritativo de nodos del árbol de conversación.
//!
//! Todas las lecturas y escrituras pasan por un `RwLock`: las altas y los
//! borrados toman acceso exclusivo; la reconstrucción de contexto y las
//! instantáneas toman acceso compartido. Los nodos se guardan en orden de
//! inserción, que es también el orden en que se persisten.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::DialogueError;
use crate::layout::LayoutPlanner;
use crate::models::{NodeData, Position};

#[derive(Debug, Default)]
pub struct NodeStore {
    nodes: RwLock<Vec<NodeData>>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserta un nodo. No valida que el padre exista: un padre ausente hace
    /// que el nodo se comporte como raíz, pero la referencia se conserva.
    pub fn add(&self, node: NodeData) -> Result<(), DialogueError> {
        let mut nodes = self.nodes.write();
        insert(&mut nodes, node)
    }

    /// Coloca el nodo con `planner` e inserta, todo bajo el mismo bloqueo exclusivo.
    pub fn add_placed(
        &self,
        mut node: NodeData,
        planner: &LayoutPlanner,
    ) -> Result<Position, DialogueError> {
        let mut nodes = self.nodes.write();
        if nodes.iter().any(|n| n.id == node.id) {
            return Err(DialogueError::DuplicateNode(node.id));
        }
        node.position = planner.place(&nodes, &node);
        let position = node.position;
        insert(&mut nodes, node)?;
        Ok(position)
    }

    /// Elimina `root_id` y todos sus descendientes. Devuelve los ids eliminados;
    /// vacío (y sin mutación) si `root_id` no existe.
    pub fn remove_subtree(&self, root_id: &str) -> HashSet<String> {
        let mut nodes = self.nodes.write();
        remove_closure(&mut nodes, root_id)
    }

    /// Convierte en raíz todo nodo restante cuyo padre esté en `removed`.
    pub fn repair_orphans(&self, removed: &HashSet<String>) -> usize {
        let mut nodes = self.nodes.write();
        repair(&mut nodes, removed)
    }

    /// Borrado en cascada más reparación de huérfanos en un único paso atómico.
    pub fn delete_cascade(&self, root_id: &str) -> HashSet<String> {
        let mut nodes = self.nodes.write();
        let removed = remove_closure(&mut nodes, root_id);
        if !removed.is_empty() {
            repair(&mut nodes, &removed);
        }
        removed
    }

    /// Cadena de ancestros de `node_id`, de la raíz al propio nodo.
    ///
    /// El recorrido termina en una raíz o en un padre que no está en el
    /// almacén. Trabaja sobre una vista consistente tomada con el bloqueo
    /// compartido, así que es seguro llamarla mientras otros hilos mutan.
    pub fn ancestor_chain(&self, node_id: &str) -> Vec<NodeData> {
        let nodes = self.nodes.read();
        let by_id: HashMap<&str, &NodeData> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = Some(node_id);

        while let Some(id) = current {
            if !visited.insert(id) {
                break;
            }
            let Some(node) = by_id.get(id) else {
                debug!(node_id = id, "ancestro no encontrado, fin del recorrido");
                break;
            };
            chain.push((*node).clone());
            current = node.parent_id.as_deref();
        }

        chain.reverse();
        chain
    }

    pub fn get(&self, node_id: &str) -> Option<NodeData> {
        self.nodes.read().iter().find(|n| n.id == node_id).cloned()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.read().iter().any(|n| n.id == node_id)
    }

    /// Copia de todos los nodos en orden de inserción.
    pub fn snapshot(&self) -> Vec<NodeData> {
        self.nodes.read().clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    pub fn clear(&self) {
        self.nodes.write().clear();
    }

    /// Sustituye el contenido completo (carga de proyecto).
    pub fn replace_all(&self, mut new_nodes: Vec<NodeData>) {
        for node in &mut new_nodes {
            node.is_branch_source = false;
        }
        *self.nodes.write() = new_nodes;
    }

    /// Reposicionamiento directo por el usuario (arrastre).
    pub fn set_position(&self, node_id: &str, position: Position) -> bool {
        self.update(node_id, |n| n.position = position)
    }

    pub fn set_expanded(&self, node_id: &str, expanded: bool) -> bool {
        self.update(node_id, |n| n.expanded = expanded)
    }

    /// Marca `node_id` como origen de rama y desmarca el resto.
    pub fn mark_branch_source(&self, node_id: Option<&str>) {
        for node in self.nodes.write().iter_mut() {
            node.is_branch_source = Some(node.id.as_str()) == node_id;
        }
    }

    fn update(&self, node_id: &str, f: impl FnOnce(&mut NodeData)) -> bool {
        let mut nodes = self.nodes.write();
        match nodes.iter_mut().find(|n| n.id == node_id) {
            Some(node) => {
                f(node);
                true
            }
            None => false,
        }
    }
}

fn insert(nodes: &mut Vec<NodeData>, node: NodeData) -> Result<(), DialogueError> {
    if nodes.iter().any(|n| n.id == node.id) {
        return Err(DialogueError::DuplicateNode(node.id));
    }
    debug!(node_id = %node.id, parent_id = ?node.parent_id, "nodo añadido");
    nodes.push(node);
    Ok(())
}

/// Cierre de `root_id` sobre los enlaces padre actuales, con conjunto de visitados.
fn subtree_closure(nodes: &[NodeData], root_id: &str) -> HashSet<String> {
    let mut closure = HashSet::new();
    if !nodes.iter().any(|n| n.id == root_id) {
        return closure;
    }

    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in nodes {
        if let Some(parent) = node.parent_id.as_deref() {
            children.entry(parent).or_default().push(node.id.as_str());
        }
    }

    let mut queue = VecDeque::from([root_id]);
    while let Some(id) = queue.pop_front() {
        if !closure.insert(id.to_string()) {
            continue;
        }
        if let Some(kids) = children.get(id) {
            queue.extend(kids.iter().copied());
        }
    }
    closure
}

fn remove_closure(nodes: &mut Vec<NodeData>, root_id: &str) -> HashSet<String> {
    let closure = subtree_closure(nodes, root_id);
    if closure.is_empty() {
        debug!(node_id = root_id, "borrado de nodo inexistente, sin cambios");
        return closure;
    }
    nodes.retain(|n| !closure.contains(&n.id));
    info!(root_id, removed = closure.len(), remaining = nodes.len(), "subárbol eliminado");
    closure
}

fn repair(nodes: &mut [NodeData], removed: &HashSet<String>) -> usize {
    let mut repaired = 0;
    for node in nodes.iter_mut() {
        if node.parent_id.as_ref().is_some_and(|p| removed.contains(p)) {
            info!(node_id = %node.id, parent_id = ?node.parent_id, "padre eliminado, el nodo pasa a ser raíz");
            node.parent_id = None;
            repaired += 1;
        }
    }
    repaired
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn node(id: &str, parent: Option<&str>) -> NodeData {
        NodeData::new(id, parent.map(str::to_string), format!("t-{id}"), format!("q-{id}"), format!("a-{id}"))
    }

    fn ids(set: &HashSet<String>) -> Vec<String> {
        let mut v: Vec<String> = set.iter().cloned().collect();
        v.sort();
        v
    }

    fn store_with(specs: &[(&str, Option<&str>)]) -> NodeStore {
        let store = NodeStore::new();
        for (id, parent) in specs {
            store.add(node(id, *parent)).unwrap();
        }
        store
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let store = store_with(&[("a", None)]);
        let err = store.add(node("a", None)).unwrap_err();
        assert!(matches!(err, DialogueError::DuplicateNode(id) if id == "a"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn add_keeps_dangling_parent_reference() {
        let store = store_with(&[("x", Some("missing"))]);
        assert_eq!(store.get("x").unwrap().parent_id.as_deref(), Some("missing"));
    }

    #[test]
    fn removing_a_root_removes_all_children() {
        let store = store_with(&[("A", None), ("B", Some("A")), ("C", Some("A"))]);
        let removed = store.delete_cascade("A");
        assert_eq!(ids(&removed), vec!["A", "B", "C"]);
        assert!(store.is_empty());
    }

    #[test]
    fn removing_a_middle_node_keeps_the_ancestor() {
        let store = store_with(&[("A", None), ("B", Some("A")), ("C", Some("B"))]);
        let removed = store.delete_cascade("B");
        assert_eq!(ids(&removed), vec!["B", "C"]);

        let a = store.get("A").unwrap();
        assert_eq!(a.parent_id, None);
        assert!(store.get("C").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn deleting_an_unknown_id_is_a_no_op() {
        let store = store_with(&[("A", None), ("B", Some("A"))]);
        let before = store.snapshot();
        assert!(store.delete_cascade("nope").is_empty());
        assert!(store.remove_subtree("nope").is_empty());
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn repair_promotes_orphans_to_roots() {
        let store = store_with(&[("A", None), ("B", Some("A")), ("D", None)]);
        let removed: HashSet<String> = ["A".to_string()].into();
        assert_eq!(store.repair_orphans(&removed), 1);
        assert_eq!(store.get("B").unwrap().parent_id, None);
        assert_eq!(store.get("D").unwrap().parent_id, None);
    }

    #[test]
    fn delete_leaves_unrelated_parent_links_untouched() {
        let store = store_with(&[
            ("A", None),
            ("B", Some("A")),
            ("C", Some("B")),
            ("X", None),
            ("Y", Some("X")),
        ]);
        store.delete_cascade("B");
        assert_eq!(store.get("Y").unwrap().parent_id.as_deref(), Some("X"));
        assert_eq!(store.get("A").unwrap().parent_id, None);
    }

    #[test]
    fn remove_subtree_survives_cycles() {
        let store = store_with(&[("A", Some("B")), ("B", Some("A")), ("Z", None)]);
        let removed = store.remove_subtree("A");
        assert_eq!(ids(&removed), vec!["A", "B"]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn ancestor_chain_is_root_first() {
        let store = store_with(&[("A", None), ("B", Some("A")), ("C", Some("B"))]);
        let chain: Vec<String> = store.ancestor_chain("C").into_iter().map(|n| n.id).collect();
        assert_eq!(chain, vec!["A", "B", "C"]);
    }

    #[test]
    fn ancestor_chain_stops_at_dangling_parent() {
        let store = store_with(&[("B", Some("gone")), ("C", Some("B"))]);
        let chain: Vec<String> = store.ancestor_chain("C").into_iter().map(|n| n.id).collect();
        assert_eq!(chain, vec!["B", "C"]);
        assert!(store.ancestor_chain("unknown").is_empty());
    }

    #[test]
    fn ancestor_chain_terminates_on_cycles() {
        let store = store_with(&[("A", Some("B")), ("B", Some("A"))]);
        assert_eq!(store.ancestor_chain("A").len(), 2);
    }

    #[test]
    fn add_placed_assigns_a_position() {
        let store = NodeStore::new();
        let planner = LayoutPlanner::default();
        let pos = store.add_placed(node("A", None), &planner).unwrap();
        assert_eq!(pos, Position::new(50.0, 200.0));
        assert_eq!(store.get("A").unwrap().position, pos);
    }

    #[test]
    fn branch_source_marker_is_exclusive() {
        let store = store_with(&[("A", None), ("B", Some("A"))]);
        store.mark_branch_source(Some("A"));
        store.mark_branch_source(Some("B"));
        let marked: Vec<String> = store
            .snapshot()
            .into_iter()
            .filter(|n| n.is_branch_source)
            .map(|n| n.id)
            .collect();
        assert_eq!(marked, vec!["B"]);
    }

    #[test]
    fn concurrent_adds_and_chain_reads() {
        let store = Arc::new(store_with(&[("root", None)]));
        let mut handles = Vec::new();
        for t in 0..4 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                let mut parent = "root".to_string();
                for i in 0..25 {
                    let id = format!("t{t}-{i}");
                    store.add(node(&id, Some(&parent))).unwrap();
                    let chain = store.ancestor_chain(&id);
                    assert_eq!(chain.len(), i + 2);
                    assert_eq!(chain[0].id, "root");
                    parent = id;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 101);
    }
}
