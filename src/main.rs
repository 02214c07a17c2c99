#[tokio::main]
async fn main() {
    if let Err(e) = carequeue_lib::run().await {
        eprintln!("carequeue: {e}");
        std::process::exit(1);
    }
}
