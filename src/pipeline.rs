//! Canal de entrega de nodos generados.
//!
//! Flujo:
//!   1. `dispatch` lanza una tarea por petición (sin límite de tareas).
//!   2. La tarea lee la cadena de ancestros (sólo lectura), llama al backend
//!      y construye el `NodeData`.
//!   3. El nodo se envía por un `mpsc` acotado; si está lleno, la tarea espera.
//!   4. Un único aplicador consume el canal en orden y llama a
//!      `Session::apply_generated`, que coloca, inserta y guarda.
//!
//! Las tareas nunca mutan el `NodeStore` directamente.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::compose::{build_prompt, split_title};
use crate::llm::TextGenerator;
use crate::models::NodeData;
use crate::session::{ApplyOutcome, GeneratedNode, Session};

/// Una pregunta del usuario y el nodo del que parte la rama (si lo hay).
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub question: String,
    pub parent_id: Option<String>,
}

#[derive(Clone)]
pub struct UpdatePipeline {
    session: Arc<Session>,
    generator: Option<Arc<dyn TextGenerator>>,
    sender: mpsc::Sender<GeneratedNode>,
    in_flight: Arc<AtomicUsize>,
}

impl UpdatePipeline {
    /// Crea el canal con la capacidad indicada; el receptor es para `spawn_applier`.
    pub fn new(
        session: Arc<Session>,
        generator: Option<Arc<dyn TextGenerator>>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<GeneratedNode>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let pipeline = Self {
            session,
            generator,
            sender,
            in_flight: Arc::new(AtomicUsize::new(0)),
        };
        (pipeline, receiver)
    }

    /// Peticiones aún no entregadas al aplicador.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn has_backend(&self) -> bool {
        self.generator.is_some()
    }

    /// Lanza la generación en segundo plano. La época se fija aquí, en el
    /// momento de la petición.
    pub fn dispatch(&self, request: GenerationRequest) -> JoinHandle<()> {
        let epoch = self.session.epoch();
        let tracker = InFlight::start(self.in_flight.clone());
        let this = self.clone();

        tokio::spawn(async move {
            let _tracker = tracker;
            let node = this.generate_node(request).await;
            let node_id = node.id.clone();
            if this.sender.send(GeneratedNode { node, epoch }).await.is_err() {
                warn!(node_id = %node_id, "el aplicador ya no consume resultados");
            } else {
                debug!(node_id = %node_id, "nodo encolado");
            }
        })
    }

    pub(crate) async fn generate_node(&self, request: GenerationRequest) -> NodeData {
        let chain = match request.parent_id.as_deref() {
            Some(parent_id) => self.session.ancestor_chain(parent_id),
            None => Vec::new(),
        };
        let prompt = build_prompt(&chain, &request.question);

        let raw = match &self.generator {
            Some(generator) => match generator.generate(&prompt).await {
                Ok(text) => text,
                Err(e) => {
                    error!("Error del backend de generación: {}", e);
                    format!("API Error: {e}")
                }
            },
            None => {
                info!("Sin backend de generación configurado.");
                format!(
                    "Response to \"{}\" (no generation backend configured)",
                    request.question
                )
            }
        };

        let parsed = split_title(&raw);
        NodeData::new(
            Uuid::new_v4().to_string(),
            request.parent_id,
            parsed.title,
            request.question,
            parsed.answer,
        )
    }
}

/// Consumidor único: aplica los nodos de uno en uno y en orden de llegada.
/// Termina cuando se cierran todos los emisores.
pub fn spawn_applier(
    session: Arc<Session>,
    mut receiver: mpsc::Receiver<GeneratedNode>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(generated) = receiver.recv().await {
            let session = session.clone();
            // El guardado hace E/S bloqueante.
            let result =
                tokio::task::spawn_blocking(move || session.apply_generated(generated)).await;
            match result {
                Ok(Ok(ApplyOutcome::Applied { node_id, .. })) => {
                    debug!(node_id = %node_id, "nodo aplicado por el consumidor")
                }
                Ok(Ok(ApplyOutcome::Stale)) => {}
                Ok(Err(e)) => error!("No se pudo aplicar el nodo: {}", e),
                Err(e) => error!("La tarea de aplicación falló: {}", e),
            }
        }
        info!("Canal de actualizaciones cerrado; aplicador detenido.");
    })
}

/// Cuenta una petición en curso mientras vive.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn start(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
