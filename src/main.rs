use tracing_subscriber::EnvFilter;

fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(err) = obo_term_index::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
