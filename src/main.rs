#[tokio::main]
async fn main() {
    if let Err(e) = iam_proxy::run_server().await {
        // Logging may not be up yet when configuration fails
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}
