#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A route endpoint names a backend that is not configured.
    #[error("route #{edge_index} references unknown backend '{backend}'")]
    UnknownBackend { edge_index: usize, backend: String },

    /// A route endpoint has an empty backend or room.
    #[error("route #{edge_index} has an empty {field}")]
    EmptyField {
        edge_index: usize,
        field: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
