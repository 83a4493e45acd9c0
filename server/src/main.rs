#[tokio::main]
async fn main() {
    lead_webhook::app::run().await;
}
