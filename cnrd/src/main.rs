use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = cnrd::Cli::parse();
    cnrd::init_tracing();
    if let Err(err) = cnrd::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
