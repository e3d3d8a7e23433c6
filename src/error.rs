//! Taxonomía de errores del motor de árbol de conversación.
//!
//! Ningún error aquí es fatal para el proceso: los fallos del backend se
//! convierten en texto de respuesta, los de almacenamiento y parseo se
//! notifican al usuario y el estado en memoria se deja en un punto seguro.

use std::io;
use std::path::PathBuf;

/// Errores del núcleo (almacenamiento, parseo y validación).
#[derive(Debug, thiserror::Error)]
pub enum DialogueError {
    /// Fallo leyendo o escribiendo en disco.
    #[error("error de almacenamiento en {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Documento estructural o de contenido mal formado.
    #[error("error de parseo en {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("el nodo {0} ya existe")]
    DuplicateNode(String),

    /// Identificador no utilizable como componente de ruta.
    #[error("identificador no válido: '{0}'")]
    InvalidId(String),

    #[error("no hay ningún proyecto abierto")]
    NoProject,

    #[error("el proyecto '{0}' no existe")]
    ProjectNotFound(String),
}

impl DialogueError {
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Fallo del backend de generación (transporte, autenticación, cuota...).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl From<anyhow::Error> for BackendError {
    fn from(err: anyhow::Error) -> Self {
        Self(format!("{err:#}"))
    }
}
