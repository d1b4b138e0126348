pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid {env}: {source}")]
	InvalidDsn {
		env: &'static str,
		#[source]
		source: sqlx::Error,
	},
	#[error("No admin database reachable: {0}")]
	AdminUnavailable(#[source] sqlx::Error),
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
}
