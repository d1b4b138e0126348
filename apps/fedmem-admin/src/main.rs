use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = fedmem_admin::Args::parse();

	fedmem_admin::run(args).await
}
