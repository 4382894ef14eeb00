#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

#[tokio::main]
async fn main() {
    if let Err(e) = voip_alert::run().await {
        eprintln!("voip-alert: {}", e);
        std::process::exit(1);
    }
}
