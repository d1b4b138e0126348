pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Embedding generation failed: {0}")]
	EmbeddingGeneration(#[source] fedmem_providers::Error),
	#[error("Dimension mismatch: expected {expected}, got {actual}.")]
	DimensionMismatch { expected: usize, actual: usize },
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Unknown module: {module_id}.")]
	UnknownModule { module_id: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl From<fedmem_providers::Error> for Error {
	fn from(err: fedmem_providers::Error) -> Self {
		Self::EmbeddingGeneration(err)
	}
}

impl From<fedmem_domain::Error> for Error {
	fn from(err: fedmem_domain::Error) -> Self {
		match err {
			fedmem_domain::Error::DimensionMismatch { expected, actual } =>
				Self::DimensionMismatch { expected, actual },
		}
	}
}

impl From<fedmem_storage::Error> for Error {
	fn from(err: fedmem_storage::Error) -> Self {
		match err {
			fedmem_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			other => Self::Storage { message: other.to_string() },
		}
	}
}
